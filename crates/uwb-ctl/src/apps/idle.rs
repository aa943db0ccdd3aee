//! The idle application
//!
//! Current at boot and after `STOP`. It touches no hardware; while it is
//! current the idle-only and service commands are accepted.

use crate::app::{AppDescriptor, AppMode, Application};
use crate::context::SystemContext;
use crate::error::CtlError;

struct Idle;

impl Application for Idle {
    fn start(&mut self, _ctx: &mut SystemContext) -> Result<(), CtlError> {
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut SystemContext) {}
}

fn create(_ctx: &SystemContext) -> Box<dyn Application> {
    Box::new(Idle)
}

pub static IDLE_APP: AppDescriptor = AppDescriptor {
    name: "STOP",
    mode: AppMode::Idle,
    saveable: false,
    block_flush: false,
    submodes: None,
    create,
};
