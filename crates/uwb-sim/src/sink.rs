//! Capturing tx sink

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uwb_ctl::{CtlError, TxSink};

#[derive(Debug, Default)]
struct Capture {
    bytes: Mutex<Vec<u8>>,
    busy: AtomicBool,
    broken: AtomicBool,
}

/// Tx sink that records every chunk it is given
///
/// Clones share the capture. A busy sink reports not-ready, a broken one
/// fails its writes.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    capture: Arc<Capture>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn bytes(&self) -> MutexGuard<'_, Vec<u8>> {
        self.capture.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take everything captured so far
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes())
    }

    /// Captured bytes as text, lossy
    pub fn take_string(&self) -> String {
        String::from_utf8_lossy(&self.take()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_busy(&self, busy: bool) {
        self.capture.busy.store(busy, Ordering::Relaxed);
    }

    pub fn set_broken(&self, broken: bool) {
        self.capture.broken.store(broken, Ordering::Relaxed);
    }
}

impl TxSink for RecordingSink {
    fn is_ready(&self) -> bool {
        !self.capture.busy.load(Ordering::Relaxed)
    }

    fn transmit(&mut self, chunk: &[u8]) -> Result<(), CtlError> {
        if self.capture.broken.load(Ordering::Relaxed) {
            return Err(CtlError::TransportWrite("simulated link down".into()));
        }
        self.bytes().extend_from_slice(chunk);
        Ok(())
    }
}
