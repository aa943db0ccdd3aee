//! Application descriptors and the behaviour trait
//!
//! An application owns the radio while it is current. Exactly one
//! [`AppDescriptor`] is current at any time; the descriptors are `'static`
//! and selected by reference, and their identity is the descriptor
//! address, never the name.

use std::fmt;

use uwb_wire::{LineFramer, PassthroughFramer, RxStatus, StreamFramer};

use crate::context::SystemContext;
use crate::error::CtlError;
use crate::registry::CommandDescriptor;

/// Whether an application leaves the console in idle mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppMode {
    /// No radio work; idle-only commands are accepted
    Idle,
    /// Owns the radio; only anytime and submode commands are accepted
    Owned,
}

/// Builds a fresh behaviour object for one run of an application
pub type AppFactory = fn(&SystemContext) -> Box<dyn Application>;

/// Static description of an application
pub struct AppDescriptor {
    pub name: &'static str,
    pub mode: AppMode,
    /// `SAVE` may make this the boot default
    pub saveable: bool,
    /// Flush drains the whole tx ring on each call while this runs
    pub block_flush: bool,
    /// Commands reachable only while this application runs
    pub submodes: Option<&'static [CommandDescriptor]>,
    pub create: AppFactory,
}

impl AppDescriptor {
    pub fn is_idle(&self) -> bool {
        self.mode == AppMode::Idle
    }

    /// Identity comparison
    pub fn is(&self, other: &AppDescriptor) -> bool {
        std::ptr::eq(self, other)
    }

    /// Whether `cmd` is one of this application's submode entries
    pub fn owns(&self, cmd: &CommandDescriptor) -> bool {
        self.submodes
            .is_some_and(|table| table.iter().any(|d| std::ptr::eq(d, cmd)))
    }
}

impl fmt::Debug for AppDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppDescriptor")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("saveable", &self.saveable)
            .field("block_flush", &self.block_flush)
            .finish_non_exhaustive()
    }
}

/// The framers one transport can route its bytes through
#[derive(Debug, Default)]
pub struct PortFramers {
    /// Console text and JSON commands
    pub line: LineFramer,
    /// Raw bytes for binary protocols
    pub raw: PassthroughFramer,
}

impl PortFramers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.line.clear();
        self.raw.clear();
    }
}

/// Behaviour of a running application
///
/// `stop` must be safe to call on an application whose `start` failed
/// part way, or never ran.
pub trait Application: Send {
    /// Configure the hardware and open the task gates
    fn start(&mut self, ctx: &mut SystemContext) -> Result<(), CtlError>;

    /// Quiesce: IRQ off, tasks terminated, state released, radio asleep
    fn stop(&mut self, ctx: &mut SystemContext);

    /// Pick the framer incoming bytes go through
    fn classify<'p>(&self, framers: &'p mut PortFramers) -> &'p mut dyn StreamFramer {
        &mut framers.line
    }

    /// Handle what the framer produced
    fn dispatch(&mut self, status: RxStatus, units: &[u8], ctx: &mut SystemContext) {
        if status == RxStatus::CommandReady {
            crate::dispatch::command_parser(units, ctx);
        }
    }
}
