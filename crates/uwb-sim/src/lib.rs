//! UWB Board Simulation Library
//!
//! This crate provides software versions of the hardware collaborators the
//! control plane expects, so the console runs and tests without a board:
//!
//! - **SimRadio**: transceiver with an air-interface handle for injecting
//!   receive events
//! - **SimMac**: FiRa ranging stack that reports synthetic distances
//! - **EchoUciCore**: UCI core answering device info and echoing the rest
//! - **MemoryStore**: configuration store kept in memory
//! - **RecordingSink**: tx sink capturing flushed output
//!
//! # Example
//!
//! ```rust
//! use uwb_sim::SimBoard;
//! use uwb_ctl::hal::RxEvent;
//!
//! let sim = SimBoard::new();
//! let board = sim.board.clone();
//!
//! // Nothing is delivered until the radio has its IRQ enabled
//! assert!(!sim.radio.inject(RxEvent::CrcError));
//! board.radio().enable_irq();
//! assert_eq!(sim.radio.state().masked_events, 1);
//! ```

pub mod mac;
pub mod radio;
pub mod sink;
pub mod store;
pub mod uci;

pub use mac::SimMac;
pub use radio::{run_traffic_task, SimRadio, SimRadioConfig, SimRadioHandle, SimRadioState};
pub use sink::RecordingSink;
pub use store::MemoryStore;
pub use uci::EchoUciCore;

use uwb_ctl::Board;

/// A simulated board and the handle to its radio
#[derive(Debug, Clone)]
pub struct SimBoard {
    pub board: Board,
    pub radio: SimRadioHandle,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::with_config(SimRadioConfig::default(), SimMac::new())
    }

    pub fn with_config(config: SimRadioConfig, mac: SimMac) -> Self {
        let (radio, handle) = SimRadio::new(config);
        Self {
            board: Board::new(Box::new(radio), Box::new(mac), Box::new(EchoUciCore::new())),
            radio: handle,
        }
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}
