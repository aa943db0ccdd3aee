//! Error types for stream framing

use thiserror::Error;

/// Errors raised while assembling binary packets
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A partial header sat idle longer than the garbage timeout
    #[error("garbage on the line: {buffered} stale byte(s) discarded after {idle_ms}ms of silence")]
    GarbageTimeout { buffered: usize, idle_ms: u64 },

    /// Declared payload length is above the configured maximum
    #[error("payload too large: declared {declared} bytes, maximum {max}")]
    PayloadTooLarge { declared: usize, max: usize },

    /// A packet was too short to carry a header
    #[error("truncated packet: {len} byte(s), header needs {needed}")]
    Truncated { len: usize, needed: usize },
}

impl FrameError {
    /// Negative result code handed back to the binary transport caller
    pub fn code(&self) -> i32 {
        // -EINVAL
        -22
    }
}

/// Higher-level wire errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Framing error
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// The transport write primitive refused a packet
    #[error("transport write failed: {0}")]
    WriteFailed(String),

    /// No transport has claimed the binary protocol yet
    #[error("no UCI interface attached")]
    NoInterface,
}
