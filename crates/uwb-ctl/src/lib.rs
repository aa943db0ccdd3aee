//! UWB Console Control Plane
//!
//! This crate runs the text command console of a UWB evaluation board:
//!
//! - **Command registry**: static descriptor tables with permissions
//! - **Dispatcher**: uppercases lines, checks permissions, runs handlers
//! - **Applications**: idle, listener, test modes, FiRa ranging and UCI,
//!   one running at a time
//! - **Tx ring**: lock-free-ish output buffer drained by a periodic flush
//!
//! # Architecture
//!
//! ```text
//! transport ──RxSender──► Controller ──► Application::classify ──► framer
//!                             │                                      │
//!                             │◄──────────── units ◄─────────────────┘
//!                             ▼
//!                    Application::dispatch ──► command_parser ──► TxRing ──► flush task
//!                             │
//!                             ▼
//!                      Lifecycle::switch ──► Board (radio, ranging MAC, UCI core)
//! ```
//!
//! Hardware sits behind the traits in [`hal`]. The `uwb-sim` crate
//! provides software versions of them.

pub mod app;
pub mod apps;
pub mod commands;
pub mod config;
pub mod context;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod flush;
pub mod hal;
pub mod lifecycle;
pub mod registry;
pub mod ring;
pub mod task;
pub mod transport;
pub mod txbuf;

#[cfg(test)]
mod testutil;

pub use app::{AppDescriptor, AppMode, Application};
pub use config::{ConfigBlocks, ConfigStore, ControlConfig, JsonFileStore};
pub use context::SystemContext;
pub use control::{ControlHandle, ControlSignal, Controller};
pub use dispatch::{command_parser, DispatchOutcome};
pub use error::{CtlError, ErrorReporter, RadioError, Severity};
pub use hal::{Board, RangingMac, UciCore, UwbRadio};
pub use lifecycle::Lifecycle;
pub use registry::{CommandDescriptor, Permission, Registry};
pub use transport::{rx_channel, RxPort, RxSender, TransportKind};
pub use txbuf::{TxRing, TxSink};
