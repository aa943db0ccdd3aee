//! Application lifecycle
//!
//! [`Lifecycle`] holds the behaviour object of the running application and
//! performs switches in a strict order:
//!
//! 1. stop the outgoing application (IRQ off, tasks joined, radio asleep)
//! 2. repoint the current descriptor
//! 3. create and start the incoming application
//!
//! A start that fails is reported as fatal. The current descriptor keeps
//! naming the failed application; `STOP` is the way out.

use tracing::{debug, info};

use crate::app::{AppDescriptor, Application};
use crate::context::SystemContext;
use crate::error::Severity;

/// Owner of the running application's behaviour object
pub struct Lifecycle {
    running: Box<dyn Application>,
}

impl Lifecycle {
    /// Start with the idle application, then switch to the stored default
    pub fn boot(ctx: &mut SystemContext) -> Self {
        let idle = ctx.current();
        let mut lifecycle = Self {
            running: (idle.create)(ctx),
        };
        if let Err(e) = lifecycle.running.start(ctx) {
            ctx.errors.report(Severity::Fatal, &e);
        }

        let target = ctx.default_app();
        if !target.is(idle) {
            info!("restoring default application {}", target.name);
            lifecycle.switch(ctx, target);
        }
        lifecycle
    }

    /// Stop whatever runs and start `target`
    pub fn switch(&mut self, ctx: &mut SystemContext, target: &'static AppDescriptor) {
        info!("switching application {} -> {}", ctx.current().name, target.name);

        self.running.stop(ctx);
        ctx.clear_app_state();

        ctx.set_current(target);
        self.running = (target.create)(ctx);
        match self.running.start(ctx) {
            Ok(()) => debug!("application {} started", target.name),
            Err(e) => ctx.errors.report(Severity::Fatal, &e),
        }
    }

    /// Apply a switch requested during the last dispatch
    ///
    /// Returns true if a switch happened.
    pub fn apply_pending(&mut self, ctx: &mut SystemContext) -> bool {
        match ctx.take_pending() {
            Some(target) => {
                self.switch(ctx, target);
                true
            }
            None => false,
        }
    }

    pub fn running(&self) -> &dyn Application {
        self.running.as_ref()
    }

    pub fn running_mut(&mut self) -> &mut dyn Application {
        self.running.as_mut()
    }

    /// Stop the running application for good
    pub fn shutdown(&mut self, ctx: &mut SystemContext) {
        info!("stopping {} for shutdown", ctx.current().name);
        self.running.stop(ctx);
        ctx.clear_app_state();
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").finish_non_exhaustive()
    }
}
