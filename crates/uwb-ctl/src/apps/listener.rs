//! Listener application
//!
//! Puts the radio in permanent receive and reports every good frame as a
//! JS line. The radio callback only copies the frame into an SPSC ring and
//! wakes the listener task; the task formats and queues the reports, then
//! notifies the flush task once per batch.
//!
//! # Architecture
//!
//! ```text
//! radio IRQ ──RxEvent──► rx handler ──Producer<RxFrame>──► listener task ──► TxRing
//!                           │                                   │
//!                     ListenerStats ◄──────── LSTAT        rx re-arm
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};
use uwb_wire::reply::{js_reply, CMD_FN_RET_OK};

use crate::app::{AppDescriptor, AppMode, Application};
use crate::context::{ListenerMode, SystemContext};
use crate::error::{CtlError, ErrorReporter, Severity};
use crate::hal::{Board, RxEvent, RxFrame, RxHandler};
use crate::registry::{CommandArgs, CommandDescriptor, Permission};
use crate::ring::{spsc, Consumer, Producer};
use crate::task::{RtTask, TaskContext, TaskSignal, Wake};
use crate::txbuf::TxRing;

/// Frames buffered between the rx callback and the listener task
pub const LISTENER_RING_DEPTH: usize = 16;

/// Payload bytes shown per frame in speed mode
pub const SPEED_MODE_BYTES: usize = 6;

/// Payload bytes shown per frame in data mode
pub const DATA_MODE_BYTES: usize = 127;

const HELP_LISTENER: &str = "Listener mode, reports every received frame.\r\nUsage: \"LISTENER2 <PARAM>\"\r\n<PARAM> 0: fast mode, at most 6 payload bytes per report (default)\r\n<PARAM> 1: data mode, at most 127 payload bytes per report";
const HELP_LSTAT: &str = "Shows the receive event counters of the listener";

pub static LAUNCHERS: [CommandDescriptor; 1] = [CommandDescriptor::launcher("LISTENER2", f_listener, HELP_LISTENER)];

pub static LISTENER_SUBMODES: [CommandDescriptor; 2] = [
    CommandDescriptor::delimiter(Permission::AppOwned, "LISTENER Options -----"),
    CommandDescriptor::command("LSTAT", Permission::AppOwned, f_lstat, HELP_LSTAT),
];

pub static LISTENER_APP: AppDescriptor = AppDescriptor {
    name: "LISTENER",
    mode: AppMode::Owned,
    saveable: false,
    block_flush: false,
    submodes: Some(&LISTENER_SUBMODES),
    create,
};

/// Receive event counters, written from the radio callback
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub crc_good: AtomicU32,
    pub crc_bad: AtomicU32,
    pub filter_rejected: AtomicU32,
    pub phr_error: AtomicU32,
    pub rs_error: AtomicU32,
    pub sfd_timeout: AtomicU32,
    pub preamble_timeout: AtomicU32,
    pub frame_timeout: AtomicU32,
    pub sts_bad: AtomicU32,
    pub sts_good: AtomicU32,
    pub sfd_detected: AtomicU32,
    /// Good frames lost because the ring was full
    pub dropped: AtomicU32,
}

impl ListenerStats {
    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, event: &RxEvent) {
        match event {
            RxEvent::Frame(frame) => {
                Self::bump(&self.crc_good);
                match frame.sts_ok {
                    Some(true) => Self::bump(&self.sts_good),
                    Some(false) => Self::bump(&self.sts_bad),
                    None => {}
                }
            }
            RxEvent::CrcError => Self::bump(&self.crc_bad),
            RxEvent::FilterRejected => Self::bump(&self.filter_rejected),
            RxEvent::PhrError => Self::bump(&self.phr_error),
            RxEvent::RsError => Self::bump(&self.rs_error),
            RxEvent::SfdTimeout => Self::bump(&self.sfd_timeout),
            RxEvent::PreambleTimeout => Self::bump(&self.preamble_timeout),
            RxEvent::FrameTimeout => Self::bump(&self.frame_timeout),
            RxEvent::SfdDetected => Self::bump(&self.sfd_detected),
        }
    }

    /// `LSTAT` report
    pub fn report(&self) -> String {
        let get = |c: &AtomicU32| c.load(Ordering::Relaxed);
        js_reply(&format!(
            "{{\"RX Events\":{{\r\n\"CRCG\":{},\r\n\"CRCB\":{},\r\n\"ARFE\":{},\r\n\"PHE\":{},\r\n\"RSL\":{},\r\n\"SFDTO\":{},\r\n\"PTO\":{},\r\n\"FTO\":{},\r\n\"STSE\":{},\r\n\"STSG\":{},\r\n\"SFDD\":{}}}}}",
            get(&self.crc_good),
            get(&self.crc_bad),
            get(&self.filter_rejected),
            get(&self.phr_error),
            get(&self.rs_error),
            get(&self.sfd_timeout),
            get(&self.preamble_timeout),
            get(&self.frame_timeout),
            get(&self.sts_bad),
            get(&self.sts_good),
            get(&self.sfd_detected)
        ))
    }
}

fn f_listener(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ctx.staged.listener_mode = if args.val == 1 {
        ListenerMode::Data
    } else {
        ListenerMode::Speed
    };
    ctx.request_app(&LISTENER_APP);
    Ok(CMD_FN_RET_OK.to_string())
}

fn f_lstat(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    let stats = ctx
        .published::<ListenerStats>()
        .ok_or(CtlError::Alloc("listener statistics"))?;
    let mut out = stats.report();
    out.push_str(CMD_FN_RET_OK);
    Ok(out)
}

/// Hundredths as `d.dd`, sign in front
fn centi(value: i32) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Carrier offset in hundredths of ppm
fn cfo_pphm(cfo: i16) -> i32 {
    (cfo as f64 * 1e8 / (1u64 << 26) as f64) as i32
}

/// One frame report line
pub fn frame_report(frame: &RxFrame, mode: ListenerMode) -> String {
    let limit = match mode {
        ListenerMode::Speed => SPEED_MODE_BYTES,
        ListenerMode::Data => DATA_MODE_BYTES,
    };
    let mut items: Vec<String> = frame.data.iter().take(limit).map(|b| format!("{:02X}", b)).collect();
    if mode == ListenerMode::Speed && frame.data.len() > limit {
        items.push("+".to_string());
    }
    let ts = &frame.timestamp;
    js_reply(&format!(
        "{{\"LSTN\":[{}],\"TS4ns\":\"0x{:02X}{:02X}{:02X}{:02X}\",\"O\":{},\"rsl\":{},\"fsl\":{}}}",
        items.join(","),
        ts[4],
        ts[3],
        ts[2],
        ts[1],
        cfo_pphm(frame.cfo),
        centi(frame.rsl_100),
        centi(frame.fsl_100)
    ))
}

fn rx_handler(
    mut frames: Producer<RxFrame, LISTENER_RING_DEPTH>,
    stats: Arc<ListenerStats>,
    wake: TaskSignal,
) -> RxHandler {
    Box::new(move |event| {
        stats.record(&event);
        if let RxEvent::Frame(frame) = event {
            if frames.push(frame).is_err() {
                ListenerStats::bump(&stats.dropped);
            }
        }
        wake.signal();
    })
}

fn rx_enable(board: &Board, errors: &ErrorReporter) {
    if let Err(e) = board.radio().rx_enable() {
        errors.report(Severity::Recoverable, &e.into());
    }
}

fn run_listener(
    task: &TaskContext,
    mut frames: Consumer<RxFrame, LISTENER_RING_DEPTH>,
    board: Board,
    tx: Arc<TxRing>,
    errors: Arc<ErrorReporter>,
    mode: ListenerMode,
) {
    rx_enable(&board, &errors);
    loop {
        if task.wait_signal() == Wake::Exit {
            break;
        }

        let mut reported = 0;
        while let Some(frame) = frames.pop() {
            if let Err(CtlError::Busy) = tx.enqueue(frame_report(&frame, mode).as_bytes()) {
                trace!("tx ring busy, listener report dropped");
            }
            reported += 1;
        }
        if reported > 0 {
            tx.notify();
        }

        if task.should_exit() {
            break;
        }
        rx_enable(&board, &errors);
    }
    debug!("listener task leaving");
}

#[derive(Default)]
struct Listener {
    task: Option<RtTask>,
}

impl Application for Listener {
    fn start(&mut self, ctx: &mut SystemContext) -> Result<(), CtlError> {
        let board = ctx.board.clone();
        board.bring_up(&ctx.config)?;

        let stats = Arc::new(ListenerStats::default());
        let (producer, consumer) = spsc::<RxFrame, LISTENER_RING_DEPTH>();
        let task = {
            let board = board.clone();
            let tx = Arc::clone(&ctx.tx);
            let errors = Arc::clone(&ctx.errors);
            let mode = ctx.staged.listener_mode;
            RtTask::spawn_gated("listener", move |task| run_listener(task, consumer, board, tx, errors, mode))?
        };

        let mut radio = board.radio();
        radio.set_rx_handler(Some(rx_handler(producer, Arc::clone(&stats), task.signal_handle())));
        ctx.publish(stats);
        ctx.register_task(task.monitor());
        radio.enable_irq();
        task.open_gate();
        drop(radio);

        debug!("listener started in {:?} mode", ctx.staged.listener_mode);
        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self, ctx: &mut SystemContext) {
        {
            let mut radio = ctx.board.radio();
            radio.disable_irq();
            radio.set_rx_handler(None);
            radio.reset();
        }
        if let Some(mut task) = self.task.take() {
            task.terminate();
        }
        ctx.board.radio().sleep();
    }
}

fn create(_ctx: &SystemContext) -> Box<dyn Application> {
    Box::new(Listener::default())
}
