//! Test continuous frame mode
//!
//! Transmits a fixed test payload at a fixed period. Bytes 1 and 2 of
//! every frame carry a 16-bit frame counter, least significant byte
//! first. With a frame count set, the task asks the control task for the
//! idle application once the last frame is out.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uwb_wire::reply::CMD_FN_RET_OK;

use crate::app::{AppDescriptor, AppMode, Application};
use crate::context::SystemContext;
use crate::control::ControlHandle;
use crate::dispatch::leading_int;
use crate::error::{CtlError, ErrorReporter, Severity};
use crate::hal::Board;
use crate::registry::{CommandArgs, CommandDescriptor};
use crate::task::{RtTask, TaskContext};

/// Longest frame the radio takes
pub const MAX_FRAME_LEN: usize = 127;

/// Payload length the 5-byte interop frame uses
const INTEROP_FRAME_LEN: usize = 5;

const TEST_PATTERN: &[u8] = b"The quick brown fox jumps over the lazy dog";

const HELP_TCFM: &str = "Continuous frame test mode, transmits frames for test purposes.\r\nUsage: \"TCFM <NUM> <PAUSE> <LEN>\"\r\n<NUM>: frames to send, 0 runs until STOP. <PAUSE>: period between frames in ms. <LEN>: frame length in bytes";

pub static LAUNCHERS: [CommandDescriptor; 1] = [CommandDescriptor::launcher("TCFM", f_tcfm, HELP_TCFM)];

pub static TCFM_APP: AppDescriptor = AppDescriptor {
    name: "TCFM",
    mode: AppMode::Owned,
    saveable: false,
    block_flush: false,
    submodes: None,
    create,
};

/// Arguments of the last `TCFM` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcfmParams {
    /// Frames to send, 0 for endless
    pub nframes: u32,
    pub period_ms: u32,
    pub nbytes: usize,
}

impl Default for TcfmParams {
    fn default() -> Self {
        Self {
            nframes: 0,
            period_ms: 1,
            nbytes: 20,
        }
    }
}

impl TcfmParams {
    /// Parse `TCFM [NUM] [PAUSE] [LEN]`; omitted values take the defaults
    pub fn from_args(args: &CommandArgs<'_>) -> Result<Self, CtlError> {
        let mut params = Self::default();
        let values: Vec<i32> = args.words().map_while(leading_int).take(3).collect();
        if let Some(&n) = values.first() {
            params.nframes = u32::try_from(n).map_err(|_| CtlError::InvalidArgument(format!("frame count {}", n)))?;
        }
        if let Some(&p) = values.get(1) {
            params.period_ms = u32::try_from(p).map_err(|_| CtlError::InvalidArgument(format!("period {}", p)))?;
        }
        if let Some(&len) = values.get(2) {
            params.nbytes = usize::try_from(len)
                .ok()
                .filter(|l| (1..=MAX_FRAME_LEN).contains(l))
                .ok_or_else(|| CtlError::InvalidArgument(format!("frame length {}", len)))?;
        }
        Ok(params)
    }
}

/// Test frame generator
#[derive(Debug, Clone)]
pub struct TestFrames {
    payload: [u8; MAX_FRAME_LEN],
    len: usize,
    count: u16,
}

impl TestFrames {
    pub fn new(len: usize) -> Self {
        let len = len.clamp(1, MAX_FRAME_LEN);
        let mut payload = [0u8; MAX_FRAME_LEN];
        for (dst, src) in payload.iter_mut().zip(TEST_PATTERN.iter().cycle()) {
            *dst = *src;
        }
        if len == INTEROP_FRAME_LEN {
            payload[0] = 0x10;
        }
        Self {
            payload,
            len,
            count: 0,
        }
    }

    /// Frames produced so far
    pub fn count(&self) -> u16 {
        self.count
    }

    /// The next frame, counter already stamped
    pub fn next_frame(&mut self) -> &[u8] {
        self.count = self.count.wrapping_add(1);
        let [lo, hi] = self.count.to_le_bytes();
        self.payload[1] = lo;
        self.payload[2] = hi;
        &self.payload[..self.len]
    }
}

fn f_tcfm(args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ctx.staged.tcfm = TcfmParams::from_args(args)?;
    ctx.request_app(&TCFM_APP);
    Ok(CMD_FN_RET_OK.to_string())
}

fn run_tcfm(task: &TaskContext, params: TcfmParams, board: Board, control: ControlHandle, errors: Arc<ErrorReporter>) {
    let mut frames = TestFrames::new(params.nbytes);
    let period = Duration::from_millis(u64::from(params.period_ms));
    let mut sent: u32 = 0;

    loop {
        if task.should_exit() {
            return;
        }
        if let Err(e) = board.radio().transmit(frames.next_frame()) {
            errors.report(Severity::Recoverable, &e.into());
            control.stop_app(&TCFM_APP);
            return;
        }
        sent += 1;

        if params.nframes != 0 && sent >= params.nframes {
            info!("TCFM sent {} frame(s)", sent);
            control.stop_app(&TCFM_APP);
            return;
        }
        if task.pause(period) {
            break;
        }
    }
    debug!("TCFM stopped after {} frame(s)", sent);
}

#[derive(Default)]
struct Tcfm {
    task: Option<RtTask>,
}

impl Application for Tcfm {
    fn start(&mut self, ctx: &mut SystemContext) -> Result<(), CtlError> {
        let board = ctx.board.clone();
        board.bring_up(&ctx.config)?;

        let task = {
            let params = ctx.staged.tcfm;
            let board = board.clone();
            let control = ctx.control.clone();
            let errors = Arc::clone(&ctx.errors);
            RtTask::spawn_gated("tcfm", move |task| run_tcfm(task, params, board, control, errors))?
        };

        let mut radio = board.radio();
        ctx.register_task(task.monitor());
        radio.enable_irq();
        task.open_gate();
        drop(radio);

        self.task = Some(task);
        Ok(())
    }

    fn stop(&mut self, ctx: &mut SystemContext) {
        {
            let mut radio = ctx.board.radio();
            radio.disable_irq();
            radio.stop_all();
        }
        if let Some(mut task) = self.task.take() {
            task.terminate();
        }
        ctx.board.radio().sleep();
    }
}

fn create(_ctx: &SystemContext) -> Box<dyn Application> {
    Box::new(Tcfm::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlSignal;
    use crate::dispatch::command_parser;
    use crate::lifecycle::Lifecycle;
    use crate::testutil::rig;

    #[test]
    fn test_params_defaults_follow_argument_count() {
        let p = TcfmParams::from_args(&CommandArgs::new("TCFM")).unwrap();
        assert_eq!(p, TcfmParams { nframes: 0, period_ms: 1, nbytes: 20 });

        let p = TcfmParams::from_args(&CommandArgs::new("TCFM 10")).unwrap();
        assert_eq!(p, TcfmParams { nframes: 10, period_ms: 1, nbytes: 20 });

        let p = TcfmParams::from_args(&CommandArgs::new("TCFM 10 5")).unwrap();
        assert_eq!(p, TcfmParams { nframes: 10, period_ms: 5, nbytes: 20 });

        let p = TcfmParams::from_args(&CommandArgs::new("TCFM 10 5 40")).unwrap();
        assert_eq!(p, TcfmParams { nframes: 10, period_ms: 5, nbytes: 40 });
    }

    #[test]
    fn test_params_rejects_bad_values() {
        assert!(TcfmParams::from_args(&CommandArgs::new("TCFM -1")).is_err());
        assert!(TcfmParams::from_args(&CommandArgs::new("TCFM 1 1 200")).is_err());
        assert!(TcfmParams::from_args(&CommandArgs::new("TCFM 1 1 0")).is_err());
    }

    #[test]
    fn test_frames_carry_counter() {
        let mut frames = TestFrames::new(20);
        let first = frames.next_frame().to_vec();
        assert_eq!(first.len(), 20);
        assert_eq!(first[0], b'T');
        assert_eq!(&first[1..3], &[1, 0]);
        assert_eq!(&first[3..], b" quick brown fox ");

        for _ in 0..0x100 {
            frames.next_frame();
        }
        let later = frames.next_frame();
        assert_eq!(&later[1..3], &[0x02, 0x01]);
        assert_eq!(frames.count(), 0x102);
    }

    #[test]
    fn test_interop_frame() {
        let mut frames = TestFrames::new(5);
        assert_eq!(frames.next_frame(), &[0x10, 1, 0, b' ', b'q']);
    }

    #[test]
    fn test_long_frames_repeat_pattern() {
        let mut frames = TestFrames::new(MAX_FRAME_LEN);
        let frame = frames.next_frame();
        assert_eq!(frame.len(), MAX_FRAME_LEN);
        assert_eq!(&frame[43..46], b"The");
    }

    #[test]
    fn test_counted_run_posts_stop() {
        let mut rig = rig(None);
        let mut lifecycle = Lifecycle::boot(&mut rig.ctx);
        command_parser(b"tcfm 3 1 10\n", &mut rig.ctx);
        assert!(lifecycle.apply_pending(&mut rig.ctx));
        assert!(rig.ctx.current().is(&TCFM_APP));

        let signal = rig.signals.blocking_recv();
        assert!(matches!(signal, Some(ControlSignal::StopApp(app)) if app.is(&TCFM_APP)));
        assert_eq!(rig.radio.transmitted().len(), 3);

        lifecycle.switch(&mut rig.ctx, &crate::apps::idle::IDLE_APP);
        assert!(rig.radio.calls().contains(&"stop_all"));
    }
}
