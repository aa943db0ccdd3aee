//! Console reply conventions
//!
//! Plain replies are `\r\n` terminated. Structured replies use the
//! pseudo-JSON envelope `JS<len>{...}\r\n`, where `<len>` is the byte
//! length of the `{...}` body as four uppercase hex digits.

use std::fmt::{self, Write};

/// Generic success reply
pub const CMD_FN_RET_OK: &str = "ok\r\n";

/// Detail used when a command is recognised but not allowed right now
pub const ERR_INCOMPATIBLE_MODE: &str = " incompatible mode";

/// Detail used when a handler reports failure
pub const ERR_FUNCTION: &str = " function";

/// Build an `error` reply line
///
/// The detail strings above carry their own leading space, so the result
/// reads `error  incompatible mode\r\n` on the wire.
pub fn error_reply(detail: &str) -> String {
    format!("error {}\r\n", detail)
}

/// Wrap a `{...}` body in the `JS` envelope
pub fn js_reply(body: &str) -> String {
    format!("JS{:04X}{}\r\n", body.len(), body)
}

/// Incremental builder for `JS` replies
///
/// ```rust
/// use std::fmt::Write;
/// use uwb_wire::JsBuilder;
///
/// let mut js = JsBuilder::new();
/// write!(js, "{{\"AVERAGE\":{}}}", 4).unwrap();
/// assert_eq!(js.finish(), "JS000D{\"AVERAGE\":4}\r\n");
/// ```
#[derive(Debug, Default, Clone)]
pub struct JsBuilder {
    body: String,
}

impl JsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body written so far
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Append raw body text
    pub fn push_str(&mut self, s: &str) -> &mut Self {
        self.body.push_str(s);
        self
    }

    /// Close the envelope
    pub fn finish(self) -> String {
        js_reply(&self.body)
    }
}

impl Write for JsBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.body.push_str(s);
        Ok(())
    }
}
