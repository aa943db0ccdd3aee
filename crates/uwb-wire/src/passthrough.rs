//! Raw pass-through framer
//!
//! Binary-protocol applications take the transport bytes as they are, but
//! an operator must still be able to get back to the console. The framer
//! keeps a rolling window of the last four bytes (uppercased) and reports
//! `STOP` or `SAVE` as soon as either word appears anywhere in the stream,
//! including across read boundaries.

use tracing::warn;

use crate::{RxStatus, StreamFramer};

/// Largest raw run accepted in one call before the input is dropped
pub const MAX_PASSTHROUGH_LEN: usize = 0x400;

const STOP_WORD: [u8; 4] = *b"STOP";
const SAVE_WORD: [u8; 4] = *b"SAVE";

/// Pass-through framer with in-band `STOP`/`SAVE` detection
#[derive(Debug, Clone)]
pub struct PassthroughFramer {
    window: [u8; 4],
    limit: usize,
}

impl PassthroughFramer {
    pub fn new() -> Self {
        Self::with_limit(MAX_PASSTHROUGH_LEN)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            window: [0; 4],
            limit,
        }
    }

    fn scan(&mut self, byte: u8) -> Option<RxStatus> {
        self.window.rotate_left(1);
        self.window[3] = byte.to_ascii_uppercase();
        if self.window == STOP_WORD {
            Some(RxStatus::DataStop)
        } else if self.window == SAVE_WORD {
            Some(RxStatus::DataSave)
        } else {
            None
        }
    }

    /// Copy a run of raw bytes into `units` and classify it
    ///
    /// `units` is replaced with this run. Returns [`RxStatus::DataStop`] or
    /// [`RxStatus::DataSave`] as soon as the keyword completes, otherwise
    /// [`RxStatus::DataReady`]. A run longer than the limit is dropped
    /// whole and reported as [`RxStatus::NoData`].
    pub fn feed<I>(&mut self, input: I, units: &mut Vec<u8>) -> RxStatus
    where
        I: IntoIterator<Item = u8>,
    {
        units.clear();
        units.extend(input);

        if units.len() >= self.limit {
            warn!("Pass-through overflow: dropping {} bytes", units.len());
            units.clear();
            return RxStatus::NoData;
        }

        if units.is_empty() {
            return RxStatus::NoData;
        }

        for &byte in units.iter() {
            if let Some(status) = self.scan(byte) {
                return status;
            }
        }
        RxStatus::DataReady
    }
}

impl Default for PassthroughFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer for PassthroughFramer {
    fn feed_dyn(
        &mut self,
        input: &mut dyn Iterator<Item = u8>,
        _echo: &mut dyn FnMut(&[u8]),
        units: &mut Vec<u8>,
    ) -> RxStatus {
        self.feed(input, units)
    }

    fn clear(&mut self) {
        self.window = [0; 4];
    }
}
