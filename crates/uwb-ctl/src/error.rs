//! Error types and the central error reporter

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use thiserror::Error;
use tracing::{error, warn};

/// Errors raised by the radio collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Device did not come up
    #[error("radio initialisation failed: {0}")]
    Init(String),

    /// Configuration was refused by the driver
    #[error("radio configuration rejected: {0}")]
    Config(String),

    /// Transmission could not be started
    #[error("radio transmit failed: {0}")]
    Transmit(String),

    /// Ranging stack refused a session operation
    #[error("ranging session error: {0}")]
    Session(String),

    /// Device did not answer
    #[error("radio not responding")]
    NoResponse,
}

/// Errors raised by the control plane
#[derive(Debug, Error)]
pub enum CtlError {
    /// Lock or flush already held, retry later
    #[error("resource busy")]
    Busy,

    /// The tx ring cannot take the whole write
    #[error("tx buffer overflow: {requested} bytes requested, {free} free")]
    TxOverflow { requested: usize, free: usize },

    /// Neither UART nor USB nor Bluetooth can carry output
    #[error("no transport available for output")]
    TransportUnavailable,

    /// A transport write primitive failed
    #[error("transport write failed: {0}")]
    TransportWrite(String),

    /// A bounded receive ring is full
    #[error("rx ring full: {dropped} byte(s) dropped")]
    RxOverflow { dropped: usize },

    /// Per-application state could not be set up
    #[error("cannot allocate {0}")]
    Alloc(&'static str),

    /// Real-time task could not be created or controlled
    #[error("task error: {0}")]
    Task(String),

    /// Radio collaborator error
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    /// Binary protocol error
    #[error("wire error: {0}")]
    Wire(#[from] uwb_wire::WireError),

    /// Framing error
    #[error("framing error: {0}")]
    Frame(#[from] uwb_wire::FrameError),

    /// Command argument out of range or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration persistence failed
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration (de)serialisation failed
    #[error("config encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CtlError {
    /// Stable numeric code shown by `STAT`
    pub fn code(&self) -> i32 {
        match self {
            CtlError::Busy => 1,
            CtlError::TxOverflow { .. } => 2,
            CtlError::TransportUnavailable => 3,
            CtlError::TransportWrite(_) => 4,
            CtlError::RxOverflow { .. } => 5,
            CtlError::Alloc(_) => 6,
            CtlError::Task(_) => 7,
            CtlError::Radio(RadioError::Init(_)) => 8,
            CtlError::Radio(_) => 9,
            CtlError::Wire(_) | CtlError::Frame(_) => 10,
            CtlError::InvalidArgument(_) => 11,
            CtlError::Storage(_) | CtlError::Io(_) | CtlError::Json(_) => 12,
        }
    }
}

/// How bad a reported error is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Operation aborted, system continues
    Recoverable = 0,
    /// Initialisation failure; the board decides whether to halt
    Fatal = 1,
}

/// Central error sink
///
/// Remembers the last error code for `STAT` and latches a fatal flag the
/// board can poll.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    last_code: AtomicI32,
    count: AtomicU32,
    fatal: AtomicBool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error
    pub fn report(&self, severity: Severity, err: &CtlError) {
        self.last_code.store(err.code(), Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        match severity {
            Severity::Recoverable => warn!("{}", err),
            Severity::Fatal => {
                error!("fatal: {}", err);
                self.fatal.store(true, Ordering::Release);
            }
        }
    }

    pub fn last_code(&self) -> i32 {
        self.last_code.load(Ordering::Relaxed)
    }

    /// Number of errors reported since boot
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Clear the fatal latch once the board has dealt with it
    pub fn clear_fatal(&self) {
        self.fatal.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_sets_last_code_only() {
        let reporter = ErrorReporter::new();
        reporter.report(Severity::Recoverable, &CtlError::TxOverflow { requested: 10, free: 2 });
        assert_eq!(reporter.last_code(), 2);
        assert_eq!(reporter.count(), 1);
        assert!(!reporter.is_fatal());
    }

    #[test]
    fn test_fatal_latches() {
        let reporter = ErrorReporter::new();
        reporter.report(Severity::Fatal, &RadioError::Init("no device".into()).into());
        assert!(reporter.is_fatal());
        assert_eq!(reporter.last_code(), 8);
        reporter.clear_fatal();
        assert!(!reporter.is_fatal());
        assert_eq!(reporter.last_code(), 8);
    }
}
