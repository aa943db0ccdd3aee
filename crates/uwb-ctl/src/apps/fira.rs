//! FiRa ranging applications
//!
//! `INITF` and `RESPF` stage the numeric session parameters, print them
//! and select the initiator or responder application. Starting either
//! opens a session on the [`RangingMac`](crate::hal::RangingMac); the
//! stack's reports are printed straight into the tx ring from its own
//! context.

use std::sync::Arc;

use tracing::{debug, warn};
use uwb_wire::reply::{js_reply, CMD_FN_RET_OK};

use crate::app::{AppDescriptor, AppMode, Application};
use crate::context::SystemContext;
use crate::dispatch::leading_int;
use crate::error::CtlError;
use crate::hal::{RangingCallback, RangingEvent, RangingMeasurement, RangingRole, SessionParams};
use crate::registry::{CommandArgs, CommandDescriptor, Permission};
use crate::txbuf::TxRing;

const HELP_INITF: &str = "FiRa initiator. All parameters are optional and positional: INITF [RFRAME BPRF set] [Slot duration rstu] [Block duration ms] [Round duration slots] [RR usage] [Session id] [vupper64 xx:xx:xx:xx:xx:xx:xx:xx] [Multi node mode] [Round hopping] [Initiator Addr] [Responder 1 Addr] ... [Responder n Addr]";
const HELP_RESPF: &str = "FiRa responder. All parameters are optional and positional: RESPF [RFRAME BPRF set] [Slot duration rstu] [Block duration ms] [Round duration slots] [RR usage] [Session id] [vupper64 xx:xx:xx:xx:xx:xx:xx:xx] [Multi node mode] [Round hopping] [Initiator Addr] [Responder Addr]";
const HELP_PAVRG: &str = "Phase difference averaging.\r\nUsage: \"PAVRG\" to show, \"PAVRG <DEC>\" to set";

pub static LAUNCHERS: [CommandDescriptor; 2] = [
    CommandDescriptor::launcher("RESPF", f_respf, HELP_RESPF),
    CommandDescriptor::launcher("INITF", f_initf, HELP_INITF),
];

pub static FIRA_SUBMODES: [CommandDescriptor; 2] = [
    CommandDescriptor::delimiter(Permission::IdleOnly, "FiRa Options -----"),
    CommandDescriptor::command("PAVRG", Permission::IdleOnly, f_pdoa_average, HELP_PAVRG),
];

pub static INITF_APP: AppDescriptor = AppDescriptor {
    name: "INITF",
    mode: AppMode::Owned,
    saveable: true,
    block_flush: false,
    submodes: Some(&FIRA_SUBMODES),
    create: create_initiator,
};

pub static RESPF_APP: AppDescriptor = AppDescriptor {
    name: "RESPF",
    mode: AppMode::Owned,
    saveable: true,
    block_flush: false,
    submodes: Some(&FIRA_SUBMODES),
    create: create_responder,
};

fn invalid(what: &str, word: &str) -> CtlError {
    CtlError::InvalidArgument(format!("{}: {}", what, word))
}

fn parse_num<T: TryFrom<i32>>(word: &str, what: &str) -> Result<T, CtlError> {
    leading_int(word)
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| invalid(what, word))
}

/// `xx:xx:xx:xx:xx:xx:xx:xx`
fn parse_vupper64(word: &str) -> Result<[u8; 8], CtlError> {
    let mut out = [0u8; 8];
    let mut parts = word.split(':');
    for byte in out.iter_mut() {
        let part = parts.next().ok_or_else(|| invalid("vupper64", word))?;
        *byte = u8::from_str_radix(part, 16).map_err(|_| invalid("vupper64", word))?;
    }
    if parts.next().is_some() {
        return Err(invalid("vupper64", word));
    }
    Ok(out)
}

/// Fill `params` from the positional arguments present
///
/// Missing trailing arguments keep their current value. A responder takes
/// a single responder address, an initiator one or more.
pub fn parse_session(args: &CommandArgs<'_>, role: RangingRole, params: &mut SessionParams) -> Result<(), CtlError> {
    let mut words = args.words();
    macro_rules! next {
        ($field:expr, $parse:expr) => {
            match words.next() {
                Some(w) => $field = $parse(w)?,
                None => return Ok(()),
            }
        };
    }

    next!(params.rframe_config, |w| parse_num(w, "rframe"));
    next!(params.slot_duration_rstu, |w| parse_num(w, "slot duration"));
    next!(params.block_duration_ms, |w| parse_num(w, "block duration"));
    next!(params.round_duration_slots, |w| parse_num(w, "round duration"));
    next!(params.ranging_round_usage, |w| parse_num::<u8>(w, "ranging round usage")
        .and_then(|v| if v == 1 || v == 2 { Ok(v) } else { Err(invalid("ranging round usage", w)) }));
    next!(params.session_id, |w| parse_num(w, "session id"));
    next!(params.vupper64, parse_vupper64);
    next!(params.multi_node, |w| parse_num::<u8>(w, "multi node").map(|v| v != 0));
    next!(params.round_hopping, |w| parse_num::<u8>(w, "round hopping").map(|v| v != 0));
    next!(params.initiator_address, |w| parse_num(w, "initiator address"));

    let responders = words
        .map(|w| parse_num::<u16>(w, "responder address"))
        .collect::<Result<Vec<_>, _>>()?;
    if responders.is_empty() {
        return Ok(());
    }
    if role == RangingRole::Responder && responders.len() > 1 {
        return Err(CtlError::InvalidArgument("a responder takes one address".into()));
    }
    params.responder_addresses = responders;
    Ok(())
}

/// Session parameters as a JS report
pub fn session_report(params: &SessionParams) -> String {
    let vupper: Vec<String> = params.vupper64.iter().map(|b| format!("{:02X}", b)).collect();
    let responders: Vec<String> = params
        .responder_addresses
        .iter()
        .map(|a| format!("\"0x{:04x}\"", a))
        .collect();
    js_reply(&format!(
        "{{\"FiRa PARAM\":{{\r\n\"RFRAME\":{},\r\n\"SLOT_RSTU\":{},\r\n\"BLOCK_MS\":{},\r\n\"ROUND_SLOTS\":{},\r\n\"RR_USAGE\":{},\r\n\"SESSION_ID\":{},\r\n\"VUPPER64\":\"{}\",\r\n\"MULTI_NODE\":{},\r\n\"ROUND_HOPPING\":{},\r\n\"INITIATOR\":\"0x{:04x}\",\r\n\"RESPONDERS\":[{}]}}}}",
        params.rframe_config,
        params.slot_duration_rstu,
        params.block_duration_ms,
        params.round_duration_slots,
        params.ranging_round_usage,
        params.session_id,
        vupper.join(":"),
        u8::from(params.multi_node),
        u8::from(params.round_hopping),
        params.initiator_address,
        responders.join(",")
    ))
}

fn launch(
    args: &CommandArgs<'_>,
    ctx: &mut SystemContext,
    role: RangingRole,
    app: &'static AppDescriptor,
) -> Result<String, CtlError> {
    let mut params = ctx.staged.session.clone();
    parse_session(args, role, &mut params)?;
    let mut out = session_report(&params);
    out.push_str(CMD_FN_RET_OK);
    ctx.staged.session = params;
    ctx.request_app(app);
    Ok(out)
}

fn f_initf(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    launch(args, ctx, RangingRole::Initiator, &INITF_APP)
}

fn f_respf(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    launch(args, ctx, RangingRole::Responder, &RESPF_APP)
}

fn f_pdoa_average(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    if args.words().next().and_then(leading_int).is_some() {
        ctx.config.rf.pdoa_average = args.val as i16;
    }
    let mut out = js_reply(&format!("{{\"AVERAGE\":{}}}", ctx.config.rf.pdoa_average));
    out.push_str(CMD_FN_RET_OK);
    Ok(out)
}

fn measurement_json(m: &RangingMeasurement) -> String {
    if m.ok {
        format!(
            "{{\"Addr\":\"0x{:04x}\",\"Status\":\"Ok\",\"D_cm\":{}}}",
            m.peer_address, m.distance_cm
        )
    } else {
        format!("{{\"Addr\":\"0x{:04x}\",\"Status\":\"Err\"}}", m.peer_address)
    }
}

/// One ranging report line
pub fn ranging_report(event: &RangingEvent) -> String {
    match event {
        RangingEvent::Report {
            block_index,
            measurements,
        } => {
            let results: Vec<String> = measurements.iter().map(measurement_json).collect();
            format!("{{\"Block\":{}, \"results\":[{}]}}\r\n", block_index, results.join(","))
        }
        RangingEvent::Stopped(reason) => format!("{{\"Session Stopped\":\"{}\"}}\r\n", reason.label()),
    }
}

fn report_callback(tx: Arc<TxRing>) -> RangingCallback {
    Box::new(move |event| tx.print(&ranging_report(&event)))
}

struct Fira {
    role: RangingRole,
    session_open: bool,
}

impl Application for Fira {
    fn start(&mut self, ctx: &mut SystemContext) -> Result<(), CtlError> {
        let board = ctx.board.clone();
        board.bring_up(&ctx.config)?;

        let mut radio = board.radio();
        board
            .mac()
            .start_session(&ctx.staged.session, self.role, report_callback(Arc::clone(&ctx.tx)))?;
        self.session_open = true;
        radio.enable_irq();
        debug!("FiRa {:?} session {} started", self.role, ctx.staged.session.session_id);
        Ok(())
    }

    fn stop(&mut self, ctx: &mut SystemContext) {
        if self.session_open {
            if let Err(e) = ctx.board.mac().stop_session() {
                warn!("FiRa session stop failed: {}", e);
            }
            self.session_open = false;
        }
        let mut radio = ctx.board.radio();
        radio.disable_irq();
        radio.sleep();
    }
}

fn create_initiator(_ctx: &SystemContext) -> Box<dyn Application> {
    Box::new(Fira {
        role: RangingRole::Initiator,
        session_open: false,
    })
}

fn create_responder(_ctx: &SystemContext) -> Box<dyn Application> {
    Box::new(Fira {
        role: RangingRole::Responder,
        session_open: false,
    })
}
