//! Console command dispatcher
//!
//! Takes the assembly buffer a framer filled (units separated by `\n`),
//! resolves each unit against the registry and runs the handler if the
//! current application allows it.
//!
//! A unit is either a text command, `NAME [ARG...]`, or a JSON object
//! `{"CMD":"NAME","PARAMS":{...}}`. The whole buffer is uppercased first,
//! so JSON keys are matched in uppercase as well.
//!
//! Replies:
//!
//! - handler output, verbatim
//! - `error  incompatible mode\r\n` when the command exists but is not
//!   allowed in the current application
//! - `error  function\r\n` when the handler fails
//! - nothing at all for unknown commands

use serde_json::Value;
use tracing::{debug, trace};
use uwb_wire::reply::{error_reply, ERR_FUNCTION, ERR_INCOMPATIBLE_MODE};

use crate::app::AppDescriptor;
use crate::context::SystemContext;
use crate::registry::{CommandArgs, CommandDescriptor, Permission};

/// Longest command name that is matched
pub const MAX_NAME_LEN: usize = 9;

/// What dispatching one unit led to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
    /// Handler ran and succeeded
    Executed,
    /// Handler ran and failed
    Failed,
    /// Command exists but the current application forbids it
    Denied,
    /// No such command
    NotFound,
}

/// Whether `cmd` may run while `app` is current
pub fn is_allowed(cmd: &CommandDescriptor, app: &AppDescriptor) -> bool {
    match cmd.permission {
        Permission::Anytime => true,
        Permission::IdleOnly if app.is_idle() => true,
        _ => app.owns(cmd),
    }
}

/// Leading decimal integer of `word`, like `%d` would read it
pub(crate) fn leading_int(word: &str) -> Option<i32> {
    let bytes = word.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    let value: i64 = word[..end].parse().ok()?;
    Some(value.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}

/// The part of `word` that is matched against command names
pub(crate) fn command_name(word: &str) -> &str {
    match word.char_indices().nth(MAX_NAME_LEN) {
        Some((idx, _)) => &word[..idx],
        None => word,
    }
}

/// Split a text unit into its (truncated) name and numeric argument
fn scan_text(token: &str) -> (&str, i32) {
    let mut words = token.split_whitespace();
    let name = command_name(words.next().unwrap_or(""));
    let val = words.next().and_then(leading_int).unwrap_or(0);
    (name, val)
}

/// Pull `CMD` and `PARAMS` out of a JSON unit
fn scan_json(token: &str) -> Option<(String, Option<Value>)> {
    let mut root: Value = match serde_json::from_str(token) {
        Ok(v) => v,
        Err(e) => {
            debug!("malformed JSON command: {}", e);
            return None;
        }
    };
    let obj = root.as_object_mut()?;
    let name = obj.get("CMD")?.as_str()?.to_string();
    let params = obj.remove("PARAMS");
    Some((name, params))
}

/// Dispatch one unit
pub fn dispatch_token(token: &str, ctx: &mut SystemContext) -> DispatchOutcome {
    let json;
    let (name, val, params) = if token.starts_with('{') {
        json = scan_json(token);
        match &json {
            Some((name, params)) => (name.as_str(), 0, params.as_ref()),
            None => return DispatchOutcome::NotFound,
        }
    } else {
        let (name, val) = scan_text(token);
        (name, val, None)
    };

    let Some(cmd) = ctx.registry().lookup(name) else {
        trace!("unknown command {:?}", name);
        return DispatchOutcome::NotFound;
    };

    if !is_allowed(cmd, ctx.current()) {
        debug!("{} not allowed in {}", name, ctx.current().name);
        ctx.tx.print(&error_reply(ERR_INCOMPATIBLE_MODE));
        return DispatchOutcome::Denied;
    }

    let Some(handler) = cmd.handler else {
        return DispatchOutcome::NotFound;
    };

    let args = CommandArgs {
        text: token,
        val,
        params,
    };
    match handler(&args, ctx) {
        Ok(reply) => {
            if !reply.is_empty() {
                ctx.tx.print(&reply);
            }
            DispatchOutcome::Executed
        }
        Err(e) => {
            debug!("{} failed: {}", name, e);
            ctx.tx.print(&error_reply(ERR_FUNCTION));
            DispatchOutcome::Failed
        }
    }
}

/// Dispatch every unit in an assembly buffer
///
/// Returns the outcome of each non-empty unit, in order.
pub fn command_parser(units: &[u8], ctx: &mut SystemContext) -> Vec<DispatchOutcome> {
    let text = String::from_utf8_lossy(units).to_uppercase();
    text.split('\n')
        .map(|t| t.trim_end_matches('\r'))
        .filter(|t| !t.trim().is_empty())
        .map(|token| dispatch_token(token, ctx))
        .collect()
}
