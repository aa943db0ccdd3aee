//! UWB Console Wire Library
//!
//! This crate turns raw transport bytes into discrete logical units for the
//! UWB control plane:
//!
//! - **Command lines**: plain text terminated by `\r` or `\n`
//! - **JSON commands**: a single object framed by balanced braces
//! - **Pass-through streams**: raw bytes with in-band `STOP`/`SAVE` detection
//! - **UCI packets**: 4-byte header, payload length in byte 3
//!
//! # Architecture
//!
//! Text-side framers implement [`StreamFramer`]. They consume a run of
//! bytes, echo what the operator typed, and append every completed unit to
//! a caller-owned assembly buffer with a `\n` separator. The returned
//! [`RxStatus`] tells the caller what to do with that buffer.
//!
//! The binary side is split into [`uci::PacketAssembler`] (receive) and
//! [`uci::SendQueue`] (transmit).
//!
//! # Example
//!
//! ```rust
//! use uwb_wire::{LineFramer, RxStatus};
//!
//! let mut framer = LineFramer::new();
//! let mut echoed = Vec::new();
//! let mut units = Vec::new();
//!
//! let status = framer.feed(b"stat\r".iter().copied(), &mut |b: &[u8]| echoed.extend_from_slice(b), &mut units);
//!
//! assert_eq!(status, RxStatus::CommandReady);
//! assert_eq!(units, b"stat\n");
//! assert_eq!(echoed, b"stat\r");
//! ```

pub mod error;
pub mod line;
pub mod passthrough;
pub mod reply;
pub mod uci;

pub use error::{FrameError, WireError};
pub use line::{Classification, LineFramer, MAX_CMD_LENGTH};
pub use passthrough::PassthroughFramer;
pub use reply::{error_reply, js_reply, JsBuilder, CMD_FN_RET_OK};

/// Outcome of feeding bytes into a framer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RxStatus {
    /// Nothing complete yet
    NoData,
    /// Raw data is ready for the application
    DataReady,
    /// At least one command unit is ready for the dispatcher
    CommandReady,
    /// Pending output should be sent
    DataSend,
    /// Pending output should be flushed
    DataFlush,
    /// In-band request to leave the running application
    DataStop,
    /// In-band request to persist the running application
    DataSave,
    /// The input could not be accepted
    DataError,
}

impl RxStatus {
    /// Returns true when the assembly buffer holds something to dispatch
    pub fn has_data(&self) -> bool {
        !matches!(self, RxStatus::NoData | RxStatus::DataError)
    }
}

/// Trait for framers that turn a byte stream into dispatchable units
///
/// Object-safe so a transport can hold `Box<dyn StreamFramer + Send>`.
pub trait StreamFramer {
    /// Consume bytes, echoing as appropriate, and append completed units
    fn feed_dyn(
        &mut self,
        input: &mut dyn Iterator<Item = u8>,
        echo: &mut dyn FnMut(&[u8]),
        units: &mut Vec<u8>,
    ) -> RxStatus;

    /// Drop any partially assembled unit
    fn clear(&mut self);
}
