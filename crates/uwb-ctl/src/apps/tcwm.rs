//! Test continuous wave mode
//!
//! Configures the radio and leaves it transmitting an unmodulated
//! carrier until the application is stopped.

use uwb_wire::reply::CMD_FN_RET_OK;

use crate::app::{AppDescriptor, AppMode, Application};
use crate::context::SystemContext;
use crate::error::CtlError;
use crate::registry::{CommandArgs, CommandDescriptor};

const HELP_TCWM: &str = "Continuous wave test mode, transmits a carrier for test purposes until STOP";

pub static LAUNCHERS: [CommandDescriptor; 1] = [CommandDescriptor::launcher("TCWM", f_tcwm, HELP_TCWM)];

pub static TCWM_APP: AppDescriptor = AppDescriptor {
    name: "TCWM",
    mode: AppMode::Owned,
    saveable: false,
    block_flush: false,
    submodes: None,
    create,
};

fn f_tcwm(_args: &CommandArgs<'_>, ctx: &mut SystemContext) -> Result<String, CtlError> {
    ctx.request_app(&TCWM_APP);
    Ok(CMD_FN_RET_OK.to_string())
}

struct Tcwm;

impl Application for Tcwm {
    fn start(&mut self, ctx: &mut SystemContext) -> Result<(), CtlError> {
        ctx.board.bring_up(&ctx.config)?;
        ctx.board.radio().start_continuous_wave()?;
        Ok(())
    }

    fn stop(&mut self, ctx: &mut SystemContext) {
        let mut radio = ctx.board.radio();
        radio.stop_all();
        radio.sleep();
    }
}

fn create(_ctx: &SystemContext) -> Box<dyn Application> {
    Box::new(Tcwm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::command_parser;
    use crate::lifecycle::Lifecycle;
    use crate::testutil::rig;

    #[test]
    fn test_tcwm_start_and_stop() {
        let mut rig = rig(None);
        let mut lifecycle = Lifecycle::boot(&mut rig.ctx);
        command_parser(b"tcwm\n", &mut rig.ctx);
        lifecycle.apply_pending(&mut rig.ctx);
        assert!(rig.ctx.current().is(&TCWM_APP));
        assert_eq!(rig.radio.calls().last(), Some(&"continuous_wave"));

        command_parser(b"stop\n", &mut rig.ctx);
        lifecycle.apply_pending(&mut rig.ctx);
        assert!(rig.radio.calls().ends_with(&["stop_all", "sleep"]));
    }

    #[test]
    fn test_tcwm_radio_failure_is_fatal() {
        let mut rig = rig(None);
        let mut lifecycle = Lifecycle::boot(&mut rig.ctx);
        rig.radio.fail_init(true);
        lifecycle.switch(&mut rig.ctx, &TCWM_APP);
        assert!(rig.ctx.current().is(&TCWM_APP));
        assert!(rig.ctx.errors.is_fatal());
        assert_eq!(rig.ctx.last_error(), 8);
    }
}
