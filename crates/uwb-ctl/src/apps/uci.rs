//! UCI application
//!
//! Hands the console transport over to the binary UCI protocol. Incoming
//! bytes bypass the line framer and go to the UCI task, which reassembles
//! packets, passes them to the [`UciCore`](crate::hal::UciCore) and writes
//! the responses back through the tx ring. Typing `STOP` or `SAVE` still
//! reaches the control plane.
//!
//! The first transport that delivers bytes owns the protocol until the
//! application stops. Responses the tx ring cannot take yet stay queued and
//! are retried without waiting for more input.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use uwb_wire::reply::CMD_FN_RET_OK;
use uwb_wire::uci::{PacketAssembler, SendQueue, UciInterface};
use uwb_wire::{RxStatus, StreamFramer, WireError};

use crate::app::{AppDescriptor, AppMode, Application, PortFramers};
use crate::context::SystemContext;
use crate::error::{CtlError, ErrorReporter, Severity};
use crate::hal::Board;
use crate::registry::{CommandArgs, CommandDescriptor};
use crate::ring::{spsc, Consumer, Producer};
use crate::task::{RtTask, TaskContext, TaskSignal, Wake};
use crate::txbuf::TxRing;

/// Received chunks buffered between the control task and the UCI task
const CHUNK_QUEUE_DEPTH: usize = 16;

/// Retry period for responses the tx ring refused
const SEND_RETRY: Duration = Duration::from_millis(5);

const HELP_UCI: &str = "Switches the console to the UCI binary protocol. Send \"STOP\" to return to the console, \"SAVE\" to boot into UCI";

pub static LAUNCHERS: [CommandDescriptor; 1] = [CommandDescriptor::launcher("UCI", f_uci, HELP_UCI)];

pub static UCI_APP: AppDescriptor = AppDescriptor {
    name: "UCI",
    mode: AppMode::Owned,
    saveable: true,
    block_flush: true,
    submodes: None,
    create,
};

fn f_uci(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ctx.request_app(&UCI_APP);
    Ok(CMD_FN_RET_OK.to_string())
}

/// State owned by the UCI task
struct UciWorker {
    assembler: PacketAssembler,
    queue: SendQueue,
    board: Board,
    tx: Arc<TxRing>,
    errors: Arc<ErrorReporter>,
}

impl UciWorker {
    fn receive(&mut self, chunk: &[u8]) {
        let board = &self.board;
        let queue = &mut self.queue;
        let res = self.assembler.read(chunk, Instant::now(), &mut |packet| {
            trace!("UCI rx {:?}", packet);
            for response in board.uci().packet_recv(packet) {
                queue.push(response);
            }
        });
        if let Err(e) = res {
            self.errors.report(Severity::Recoverable, &e.into());
        }
    }

    /// Write queued responses, returning true once nothing is left
    fn send(&mut self) -> bool {
        let tx = &self.tx;
        let board = &self.board;
        let res = self.queue.drain(
            |bytes| {
                tx.enqueue_and_notify(bytes)
                    .map_err(|e| WireError::WriteFailed(e.to_string()))
            },
            |packet, res| board.uci().send_done(packet, res.is_ok()),
        );
        if let Err(e) = res {
            debug!("UCI send deferred, {} packet(s) queued: {}", self.queue.len(), e);
        }
        self.queue.is_empty()
    }
}

fn run_uci(task: &TaskContext, mut chunks: Consumer<Vec<u8>, CHUNK_QUEUE_DEPTH>, mut worker: UciWorker) {
    let mut backlog = false;
    loop {
        let wake = if backlog {
            task.wait_signal_timeout(SEND_RETRY)
        } else {
            task.wait_signal()
        };
        if wake == Wake::Exit {
            break;
        }
        while let Some(chunk) = chunks.pop() {
            worker.receive(&chunk);
        }
        backlog = !worker.send();
    }
    worker.assembler.flush();
}

#[derive(Default)]
struct Uci {
    task: Option<RtTask>,
    chunks: Option<Producer<Vec<u8>, CHUNK_QUEUE_DEPTH>>,
    wake: Option<TaskSignal>,
    interface: UciInterface,
}

impl Uci {
    fn forward(&mut self, units: &[u8], ctx: &mut SystemContext) {
        let Some(candidate) = ctx.rx_source().map(|kind| kind.uci_interface()) else {
            return;
        };
        if !self.interface.claim(candidate) {
            trace!("UCI owned by {:?}, ignoring {:?}", self.interface, candidate);
            return;
        }
        let (Some(chunks), Some(wake)) = (self.chunks.as_mut(), self.wake.as_ref()) else {
            return;
        };
        if chunks.push(units.to_vec()).is_err() {
            ctx.errors
                .report(Severity::Recoverable, &CtlError::RxOverflow { dropped: units.len() });
            return;
        }
        wake.signal();
    }
}

impl Application for Uci {
    fn start(&mut self, ctx: &mut SystemContext) -> Result<(), CtlError> {
        let mut assembler = PacketAssembler::with_limits(ctx.engine.max_uci_payload, ctx.engine.garbage_timeout());
        assembler.set_streaming(self.interface == UciInterface::Hsspi);
        let worker = UciWorker {
            assembler,
            queue: SendQueue::new(),
            board: ctx.board.clone(),
            tx: Arc::clone(&ctx.tx),
            errors: Arc::clone(&ctx.errors),
        };

        let (producer, consumer) = spsc::<Vec<u8>, CHUNK_QUEUE_DEPTH>();
        let task = RtTask::spawn_gated("uci", move |task| run_uci(task, consumer, worker))?;

        let board = ctx.board.clone();
        let mut radio = board.radio();
        self.wake = Some(task.signal_handle());
        self.chunks = Some(producer);
        ctx.register_task(task.monitor());
        radio.enable_irq();
        task.open_gate();
        drop(radio);

        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self, ctx: &mut SystemContext) {
        ctx.board.radio().disable_irq();
        self.chunks = None;
        self.wake = None;
        if let Some(mut task) = self.task.take() {
            task.terminate();
        }
        self.interface = UciInterface::None;
        ctx.board.radio().sleep();
        ctx.tx.print("Ok\r\n");
    }

    fn classify<'p>(&self, framers: &'p mut PortFramers) -> &'p mut dyn StreamFramer {
        &mut framers.raw
    }

    fn dispatch(&mut self, status: RxStatus, units: &[u8], ctx: &mut SystemContext) {
        match status {
            RxStatus::DataStop => ctx.request_idle(),
            RxStatus::DataSave => {
                if let Err(e) = ctx.set_default_app(&UCI_APP) {
                    ctx.errors.report(Severity::Recoverable, &e);
                }
            }
            RxStatus::DataReady => self.forward(units, ctx),
            other => warn!("UCI ignoring {:?}", other),
        }
    }
}

fn create(_ctx: &SystemContext) -> Box<dyn Application> {
    Box::new(Uci::default())
}
