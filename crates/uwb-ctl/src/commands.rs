//! Built-in console commands
//!
//! Anytime commands (help, stop, status, save), idle-time RF tuning and
//! the service commands that show or change the configuration blocks.
//! Application launchers and submode commands live with their
//! applications under [`crate::apps`].
//!
//! Handlers that print a report return it followed by `ok\r\n`. Service
//! commands given malformed arguments still print the current values
//! before failing, so the operator sees what is in effect.

use uwb_wire::reply::{js_reply, JsBuilder, CMD_FN_RET_OK};

use crate::apps::idle::IDLE_APP;
use crate::config::{AntennaType, ANTENNA_PORTS};
use crate::context::SystemContext;
use crate::dispatch::{command_name, is_allowed, leading_int};
use crate::error::{CtlError, Severity};
use crate::hal::XTAL_TRIM_MASK;
use crate::registry::{CommandArgs, CommandDescriptor, Permission, RegistryBuilder, Section};

const COLUMN_WIDTH: usize = 10;
const COLUMNS: usize = 4;
const HELP_WRAP: usize = 77;

const HELP_HELP: &str = "Lists the commands available right now.\r\nUsage: \"HELP\" for the list, \"HELP <CMD>\" for details on one command, e.g. \"HELP SAVE\".";
const HELP_STOP: &str = "Stops the running application and returns to idle";
const HELP_THREAD: &str = "Lists the tasks of the running application and their state";
const HELP_STAT: &str = "Shows the current mode, the last error and the device information";
const HELP_SAVE: &str = "Stores the configuration and the running application as the boot default";
const HELP_DECA: &str = "Reports the device, the running application and version information";

const HELP_UART: &str = "Turns the UART console on or off.\r\nUsage: \"UART <DEC>\" (0:OFF, 1:ON)";
const HELP_ANTTXA: &str = "Antenna TX delay.\r\nUsage: \"ANTTXA\" to show, \"ANTTXA <DEC>\" to set";
const HELP_ANTRXA: &str = "Antenna RX delay.\r\nUsage: \"ANTRXA\" to show, \"ANTRXA <DEC>\" to set";
const HELP_ANTRXB: &str = "Second antenna RX delay, reserved";
const HELP_XTALTRIM: &str = "Crystal trim.\r\nUsage: \"XTALTRIM\" to show, \"XTALTRIM 0x<HEX>\" to set [0..7F]. Bit 0x80 forces the value over the factory calibration.";
const HELP_PDOAOFF: &str = "Phase difference offset of this node in degrees.\r\nUsage: \"PDOAOFF\" to show, \"PDOAOFF <DEC>\" to set";

const HELP_RESTORE: &str = "Puts every configuration block back to its factory value";
const HELP_DIAG: &str = "Extra diagnostic output while ranging.\r\nUsage: \"DIAG <DEC>\" (0:OFF, 1:ON)";
const HELP_UWBCFG: &str = "Radio channel parameters.\r\nUsage: \"UWBCFG\" to show. To set, give all thirteen values in the order they are shown: \"UWBCFG <CHAN> <PLEN> <PAC> <TXCODE> <RXCODE> <SFDTYPE> <DATARATE> <PHRMODE> <PHRRATE> <SFDTO> <STSMODE> <STSLEN> <PDOAMODE>\"";
const HELP_STSKEYIV: &str = "STS key, IV and mode.\r\nUsage: \"STSKEYIV\" to show, \"STSKEYIV 0x<KEY_HEX_32> 0x<IV_HEX_32> <MODE_DEC>\" to set.\r\n<MODE_DEC>: 1 static STS (default), 0 dynamic STS";
const HELP_TXPOWER: &str = "Transmit power.\r\nUsage: \"TXPOWER\" to show, \"TXPOWER 0x<POWER_HEX> 0x<PGDLY_HEX> 0x<PGCOUNT_HEX>\" to set";
const HELP_ANTENNA: &str = "Antenna fitted to each RF port.\r\nUsage: \"ANTENNA\" to show, \"ANTENNA <PORT1> <PORT2>...\" to set, \"ANTENNA VALUES\" for the accepted names.";
const HELP_DECAID: &str = "Shows the UWB chip identifiers";
const HELP_VERSION: &str = "Shows the software version";

static ANYTIME_COMMANDS: [CommandDescriptor; 7] = [
    CommandDescriptor::command("HELP", Permission::Anytime, f_help, HELP_HELP),
    CommandDescriptor::command("?", Permission::Anytime, f_help, HELP_HELP),
    CommandDescriptor::command("STOP", Permission::Anytime, f_stop, HELP_STOP),
    CommandDescriptor::command("THREAD", Permission::Anytime, f_thread, HELP_THREAD),
    CommandDescriptor::command("STAT", Permission::Anytime, f_stat, HELP_STAT),
    CommandDescriptor::command("SAVE", Permission::Anytime, f_save, HELP_SAVE),
    CommandDescriptor::command("DECA$", Permission::Anytime, f_deca, HELP_DECA),
];

static IDLE_COMMANDS: [CommandDescriptor; 6] = [
    CommandDescriptor::command("UART", Permission::IdleOnly, f_uart, HELP_UART),
    CommandDescriptor::command("ANTTXA", Permission::IdleOnly, f_ant_tx_a, HELP_ANTTXA),
    CommandDescriptor::command("ANTRXA", Permission::IdleOnly, f_ant_rx_a, HELP_ANTRXA),
    CommandDescriptor::command("ANTRXB", Permission::IdleOnly, f_ant_rx_b, HELP_ANTRXB),
    CommandDescriptor::command("XTALTRIM", Permission::IdleOnly, f_xtal_trim, HELP_XTALTRIM),
    CommandDescriptor::command("PDOAOFF", Permission::IdleOnly, f_pdoa_offset, HELP_PDOAOFF),
];

static SERVICE_COMMANDS: [CommandDescriptor; 8] = [
    CommandDescriptor::command("RESTORE", Permission::IdleOnly, f_restore, HELP_RESTORE),
    CommandDescriptor::command("DIAG", Permission::IdleOnly, f_diag, HELP_DIAG),
    CommandDescriptor::command("UWBCFG", Permission::IdleOnly, f_uwbcfg, HELP_UWBCFG),
    CommandDescriptor::command("STSKEYIV", Permission::IdleOnly, f_stskeyiv, HELP_STSKEYIV),
    CommandDescriptor::command("TXPOWER", Permission::IdleOnly, f_txpower, HELP_TXPOWER),
    CommandDescriptor::command("ANTENNA", Permission::IdleOnly, f_antenna, HELP_ANTENNA),
    CommandDescriptor::command("DECAID", Permission::IdleOnly, f_decaid, HELP_DECAID),
    CommandDescriptor::command("VERSION", Permission::IdleOnly, f_version, HELP_VERSION),
];

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .add(Section::Anytime, &ANYTIME_COMMANDS)
        .add(Section::Idle, &IDLE_COMMANDS)
        .add(Section::Service, &SERVICE_COMMANDS)
        .add_app(&IDLE_APP);
}

fn ok(mut report: String) -> Result<String, CtlError> {
    report.push_str(CMD_FN_RET_OK);
    Ok(report)
}

/// Leading words that parse with `parse`, like a `sscanf` conversion count
fn count_parsed<'a, T>(words: impl Iterator<Item = &'a str>, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    let mut out = Vec::new();
    for word in words {
        match parse(word) {
            Some(v) => out.push(v),
            None => break,
        }
    }
    out
}

/// `0X`-prefixed hex word, at most `max_digits` digits read
pub(crate) fn parse_hex(word: &str, max_digits: usize) -> Option<u32> {
    let digits = word.strip_prefix("0X")?;
    let end = digits
        .char_indices()
        .take(max_digits)
        .take_while(|(_, c)| c.is_ascii_hexdigit())
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    u32::from_str_radix(&digits[..end], 16).ok()
}

/// Up to four 8-digit hex groups following `0X`, most significant first
fn parse_hex128(word: &str) -> Vec<u32> {
    let Some(digits) = word.strip_prefix("0X") else {
        return Vec::new();
    };
    let hex: String = digits.chars().take_while(|c| c.is_ascii_hexdigit()).take(32).collect();
    hex.as_bytes()
        .chunks(8)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .filter_map(|s| u32::from_str_radix(s, 16).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// HELP
// ---------------------------------------------------------------------------

struct HelpTable {
    out: String,
    row: String,
}

impl HelpTable {
    fn new() -> Self {
        Self {
            out: String::new(),
            row: String::new(),
        }
    }

    fn line(&mut self, cmd: &CommandDescriptor) {
        match cmd.name {
            None => {
                if !self.row.is_empty() {
                    self.out.push_str(&self.row);
                    self.out.push_str("\r\n");
                    self.row.clear();
                }
                self.out.push_str(&format!("---- {}---\r\n", cmd.help));
            }
            Some(name) => {
                self.row.push_str(&format!("{:<width$}", name, width = COLUMN_WIDTH));
                if self.row.len() >= COLUMN_WIDTH * COLUMNS {
                    self.out.push_str(&self.row);
                    self.out.push_str("\r\n");
                    self.row.clear();
                }
            }
        }
    }

    fn finish(mut self) -> String {
        self.out.push_str(&self.row);
        self.out.push_str("\r\n");
        self.out
    }
}

/// Command list for the current application
pub fn help_listing(ctx: &SystemContext) -> String {
    let app = ctx.current();
    let mut table = HelpTable::new();
    table.out.push_str(&ctx.device.project_name);
    table.out.push_str("\r\n");

    for cmd in ctx.registry().iter() {
        if cmd.permission == Permission::Anytime || app.is_idle() {
            table.line(cmd);
        }
    }
    if !app.is_idle() {
        if let Some(submodes) = app.submodes {
            for cmd in submodes {
                table.line(cmd);
            }
        }
    }
    table.finish()
}

fn wrap_help(text: &str, out: &mut String) {
    if text.contains('\r') {
        out.push_str(text);
        return;
    }
    let mut rest = text;
    loop {
        match rest.char_indices().nth(HELP_WRAP) {
            Some((idx, _)) => {
                out.push_str(&rest[..idx]);
                out.push_str("\r\n");
                rest = &rest[idx..];
            }
            None => {
                out.push_str(rest);
                out.push_str("\r\n");
                break;
            }
        }
    }
}

/// Help text of one command, if it is reachable right now
pub fn help_detail(ctx: &SystemContext, name: &str) -> String {
    let app = ctx.current();
    let mut out = String::new();
    let found = ctx
        .registry()
        .iter()
        .find(|cmd| cmd.name == Some(name) && is_allowed(cmd, app));
    if let Some(cmd) = found {
        out.push_str(&format!("\r\n{}:\r\n", name));
        wrap_help(cmd.help, &mut out);
    }
    out.push_str("\r\n");
    out
}

fn f_help(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    match args.words().next() {
        None => ok(help_listing(ctx)),
        Some(topic) => ok(help_detail(ctx, command_name(topic))),
    }
}

// ---------------------------------------------------------------------------
// Anytime
// ---------------------------------------------------------------------------

fn f_stop(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ctx.tx.reset();
    ctx.request_idle();
    ok("\r\n".to_string())
}

fn f_thread(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let mut js = JsBuilder::new();
    js.push_str(&format!("{{\"Threads\":{{\"App\":\"{}\",\"Tasks\":[", ctx.current().name));
    for (i, t) in ctx.tasks().iter().enumerate() {
        if i > 0 {
            js.push_str(",");
        }
        js.push_str(&format!("{{\"Name\":\"{}\",\"State\":\"{}\"}}", t.name(), t.state()));
    }
    js.push_str("]}}");
    ok(js.finish())
}

/// `DECA$` report
pub fn deca_info(ctx: &SystemContext) -> String {
    let apps: Vec<String> = ctx.registry().launchers().map(|n| format!("\"{}\"", n)).collect();
    let driver = ctx.board.radio().driver_version();
    let body = format!(
        "{{\"Info\":{{\r\n\"Device\":\"{}\",\r\n\"Current App\":\"{}\",\r\n\"Version\":\"{}\",\r\n\"Build\":\"{}\",\r\n\"Apps\":[{}],\r\n\"Driver\":\"{}\"}}}}",
        ctx.device.project_name,
        ctx.current().name,
        ctx.device.version,
        ctx.device.build,
        apps.join(","),
        driver
    );
    js_reply(&body)
}

fn f_deca(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ok(deca_info(ctx))
}

fn f_stat(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let mut out = format!(
        "MODE: {}\r\nLAST ERR CODE: {}\r\nMAX MSG LEN: {}\r\n",
        ctx.current().name,
        ctx.last_error(),
        0
    );
    out.push_str(&deca_info(ctx));
    ok(out)
}

fn f_save(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let current = ctx.current();
    let target = if current.saveable { current } else { &IDLE_APP };
    let board = ctx.board.clone();
    let res = {
        let _critical = board.radio();
        ctx.set_default_app(target)
    };
    if let Err(e) = res {
        ctx.errors.report(Severity::Recoverable, &e);
        return Err(e);
    }
    ok(String::new())
}

// ---------------------------------------------------------------------------
// Idle time
// ---------------------------------------------------------------------------

fn f_uart(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let enable = (args.val as u8) == 1;
    ctx.config.comm.uart_enabled = enable;
    ctx.tx.set_uart_enabled(enable);
    ok(String::new())
}

fn antenna_delay(args: &CommandArgs<'_>, label: &str, slot: &mut u16) -> Result<String, CtlError> {
    match args.words().next().and_then(|w| w.parse::<u32>().ok()) {
        Some(dly) => {
            *slot = dly as u16;
            ok(String::new())
        }
        None => ok(format!("{}: {} \r\n", label, slot)),
    }
}

fn f_ant_tx_a(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    antenna_delay(args, "ANT_TXA", &mut ctx.config.rf.ant_tx_a)
}

fn f_ant_rx_a(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    antenna_delay(args, "ANT_RXA", &mut ctx.config.rf.ant_rx_a)
}

fn f_ant_rx_b(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    antenna_delay(args, "ANT_RXB", &mut ctx.config.rf.ant_rx_b)
}

fn f_xtal_trim(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let requested = args.words().next().and_then(|w| parse_hex(w, 2));
    let trim = {
        let mut radio = ctx.board.radio();
        match requested {
            Some(v) => {
                let v = v as u8;
                radio.set_xtal_trim(v & XTAL_TRIM_MASK);
                v
            }
            None => {
                let stored = ctx.config.rf.xtal_trim;
                radio.set_xtal_trim(stored & XTAL_TRIM_MASK);
                radio.xtal_trim() | (stored & !XTAL_TRIM_MASK)
            }
        }
    };
    ctx.config.rf.xtal_trim = trim;
    ok(js_reply(&format!("{{\"XTAL\":{{\r\n\"TEMP TRIM\":\"0x{:02x}\"}}}}", trim)))
}

fn f_pdoa_offset(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    if args.words().next().and_then(leading_int).is_some() {
        ctx.config.rf.pdoa_offset_deg = args.val as i16;
    }
    ok(js_reply(&format!("{{\"PDOAOFF_deg\":{}}}", ctx.config.rf.pdoa_offset_deg)))
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

fn f_restore(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let board = ctx.board.clone();
    let _critical = board.radio();
    ctx.restore_defaults();
    ok(String::new())
}

fn f_diag(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ctx.config.debug.diag_enabled = (args.val as u8) != 0;
    ok(String::new())
}

fn uwbcfg_report(ctx: &SystemContext) -> String {
    let c = &ctx.config.uwb;
    js_reply(&format!(
        "{{\"UWB PARAM\":{{\r\n\"CHAN\":{},\r\n\"PLEN\":{},\r\n\"PAC\":{},\r\n\"TXCODE\":{},\r\n\"RXCODE\":{},\r\n\"SFDTYPE\":{},\r\n\"DATARATE\":{},\r\n\"PHRMODE\":{},\r\n\"PHRRATE\":{},\r\n\"SFDTO\":{},\r\n\"STSMODE\":{},\r\n\"STSLEN\":{},\r\n\"PDOAMODE\":{}}}}}",
        c.channel,
        c.preamble_length,
        c.pac,
        c.tx_code,
        c.rx_code,
        c.sfd_type,
        c.data_rate,
        c.phr_mode,
        c.phr_rate,
        c.sfd_timeout,
        c.sts_mode,
        c.sts_length,
        c.pdoa_mode
    ))
}

fn f_uwbcfg(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let values = count_parsed(args.words(), leading_int);
    let argc = args.argc();
    if values.len() == 13 {
        let c = &mut ctx.config.uwb;
        c.channel = values[0] as u8;
        c.preamble_length = values[1] as u16;
        c.pac = values[2] as u8;
        c.tx_code = values[3] as u8;
        c.rx_code = values[4] as u8;
        c.sfd_type = values[5] as u8;
        c.data_rate = values[6] as u16;
        c.phr_mode = values[7] as u8;
        c.phr_rate = values[8] as u8;
        c.sfd_timeout = values[9] as u16;
        c.sts_mode = values[10] as u8;
        c.sts_length = values[11] as u16;
        c.pdoa_mode = values[12] as u8;
    } else if argc != 0 {
        ctx.tx.print(&uwbcfg_report(ctx));
        return Err(CtlError::InvalidArgument(format!(
            "UWBCFG takes 13 values, {} given",
            values.len()
        )));
    }
    ok(uwbcfg_report(ctx))
}

fn stskeyiv_report(ctx: &SystemContext) -> String {
    let s = &ctx.config.sts;
    js_reply(&format!(
        "{{\"STS KEY_IV\":{{\r\n\"STS KEY\":\"0x{:08X}{:08X}{:08X}{:08X}\",\r\n\"STS IV\":\"0x{:08X}{:08X}{:08X}{:08X}\",\r\n\"STS_STATIC\":\"{}\"}}}}",
        s.key[0], s.key[1], s.key[2], s.key[3], s.iv[0], s.iv[1], s.iv[2], s.iv[3], s.static_sts
    ))
}

fn f_stskeyiv(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let mut words = args.words();
    let key = words.next().map(parse_hex128).unwrap_or_default();
    let iv = if key.len() == 4 {
        words.next().map(parse_hex128).unwrap_or_default()
    } else {
        Vec::new()
    };
    let mode = if iv.len() == 4 {
        words.next().and_then(leading_int)
    } else {
        None
    };

    if key.len() == 4 && iv.len() == 4 {
        let s = &mut ctx.config.sts;
        s.key.copy_from_slice(&key);
        s.iv.copy_from_slice(&iv);
        if let Some(mode) = mode {
            s.static_sts = mode as u32;
        }
    } else if args.argc() != 0 {
        ctx.tx.print(&stskeyiv_report(ctx));
        return Err(CtlError::InvalidArgument("STSKEYIV needs a 128-bit key and IV".into()));
    }
    ok(stskeyiv_report(ctx))
}

fn txpower_report(ctx: &SystemContext) -> String {
    let p = &ctx.config.tx_power;
    js_reply(&format!(
        "{{\"TX POWER\":{{\r\n\"PWR\":\"0x{:08X}\",\r\n\"PGDLY\":\"0x{:08X}\",\r\n\"PGCOUNT\":\"0x{:08X}\"}}}}",
        p.power, p.pg_delay, p.pg_count
    ))
}

fn f_txpower(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let values = count_parsed(args.words(), |w| parse_hex(w, 8));
    if values.len() == 3 {
        let p = &mut ctx.config.tx_power;
        p.power = values[0];
        p.pg_delay = values[1];
        p.pg_count = values[2];
    } else if args.argc() != 0 {
        ctx.tx.print(&txpower_report(ctx));
        return Err(CtlError::InvalidArgument("TXPOWER takes three hex values".into()));
    }
    ok(txpower_report(ctx))
}

fn f_antenna(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let words: Vec<&str> = args.words().collect();
    let mut out = String::from("\r\n");

    if words.len() > ANTENNA_PORTS {
        out.push_str("INVALID COMMAND FORMAT!\r\n");
        ctx.tx.print(&out);
        return Err(CtlError::InvalidArgument("too many antenna ports".into()));
    }

    if words.first() == Some(&"VALUES") {
        out.push_str("ANTENNA_TYPE POSSIBLE VALUES:\r\n");
        for ant in AntennaType::ALL {
            out.push_str(&format!("- {}\r\n", ant.name()));
        }
        out.push_str("\r\n");
    } else if !words.is_empty() {
        let mut types = Vec::with_capacity(words.len());
        for word in &words {
            match AntennaType::from_name(word) {
                Some(t) => types.push(t),
                None => {
                    out.push_str(&format!("INVALID ANTENNA_TYPE: {}\r\n", word));
                    ctx.tx.print(&out);
                    return Err(CtlError::InvalidArgument(format!("unknown antenna {}", word)));
                }
            }
        }
        for (port, t) in ctx.config.rf.antennas.iter_mut().zip(types) {
            *port = t;
        }
    }

    out.push_str("CURRENT ANTENNA_TYPE:\r\n");
    for (i, ant) in ctx.config.rf.antennas.iter().enumerate() {
        out.push_str(&format!("PORT{}: {}\r\n", i + 1, ant.name()));
    }
    ok(out)
}

fn f_decaid(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let mut radio = ctx.board.radio();
    radio.wakeup();
    let out = format!(
        "Decawave device ID = 0x{:08x}\r\nDecawave lotID = 0x{:08x}, partID = 0x{:08x}\r\n",
        radio.device_id(),
        radio.lot_id(),
        radio.part_id()
    );
    radio.sleep();
    ok(out)
}

fn f_version(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ok(format!("VERSION:{}\r\n", ctx.device.version))
}
