//! Transmit ring buffer
//!
//! Every byte the device says goes through one circular buffer: command
//! echo, replies, application reports, UCI responses. Producers append
//! whole messages under a lock that is only ever tried, never waited on.
//! A single flusher copies fixed-size chunks out to whichever transport is
//! active.
//!
//! # Transport selection
//!
//! - UART when it is enabled
//! - otherwise USB when the host has configured it
//! - Bluetooth mirrors whatever took the USB path while it is connected
//!
//! A USB chunk that fails to transmit stays in the buffer and is retried by
//! the next flush. UART failures are reported and the chunk is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{CtlError, ErrorReporter, Severity};

/// Default ring capacity
pub const DEFAULT_TX_CAPACITY: usize = 0x8000;

/// Largest chunk handed to a transport in one write
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Chunk size shrinks by this much when Bluetooth shares the buffer
const BT_CHUNK_RESERVE: usize = 2;

/// One outbound transport
pub trait TxSink: Send {
    /// Whether the far end can take data right now
    fn is_ready(&self) -> bool {
        true
    }

    /// Write one chunk
    fn transmit(&mut self, chunk: &[u8]) -> Result<(), CtlError>;
}

#[derive(Default)]
struct TxPorts {
    uart: Option<Box<dyn TxSink>>,
    usb: Option<Box<dyn TxSink>>,
    bt: Option<Box<dyn TxSink>>,
}

struct RingState {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    generation: u64,
}

impl RingState {
    fn count(&self, mask: usize) -> usize {
        self.head.wrapping_sub(self.tail) & mask
    }

    fn space(&self, mask: usize) -> usize {
        mask - self.count(mask)
    }
}

/// Outcome of one flush call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Bytes removed from the ring
    pub sent: usize,
    /// Bytes still waiting
    pub remaining: usize,
}

/// Shared transmit ring
pub struct TxRing {
    state: Mutex<RingState>,
    mask: usize,
    chunk_size: usize,
    timeout: Duration,
    ports: Mutex<TxPorts>,
    uart_enabled: AtomicBool,
    block_flush: AtomicBool,
    flushing: AtomicBool,
    overflows: AtomicU64,
    notify: Notify,
    errors: Arc<ErrorReporter>,
}

impl TxRing {
    /// Create a ring of `capacity` bytes (rounded up to a power of two)
    pub fn new(capacity: usize, chunk_size: usize, errors: Arc<ErrorReporter>) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            state: Mutex::new(RingState {
                buf: vec![0; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                generation: 0,
            }),
            mask: capacity - 1,
            chunk_size: chunk_size.max(BT_CHUNK_RESERVE + 1),
            // Time to push the whole buffer out at 115200 baud, 10 bits per byte
            timeout: Duration::from_millis((capacity as u64 * 10) / 115),
            ports: Mutex::new(TxPorts::default()),
            uart_enabled: AtomicBool::new(false),
            block_flush: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            overflows: AtomicU64::new(0),
            notify: Notify::new(),
            errors,
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Wall-clock budget of a single flush call
    pub fn flush_timeout(&self) -> Duration {
        self.timeout
    }

    /// Bytes waiting to be flushed
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count(self.mask)
    }

    /// Number of writes dropped for lack of space
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn set_uart_sink(&self, sink: Option<Box<dyn TxSink>>) {
        self.lock_ports().uart = sink;
    }

    pub fn set_usb_sink(&self, sink: Option<Box<dyn TxSink>>) {
        self.lock_ports().usb = sink;
    }

    pub fn set_bt_sink(&self, sink: Option<Box<dyn TxSink>>) {
        self.lock_ports().bt = sink;
    }

    pub fn set_uart_enabled(&self, enabled: bool) {
        self.uart_enabled.store(enabled, Ordering::Release);
    }

    pub fn uart_enabled(&self) -> bool {
        self.uart_enabled.load(Ordering::Acquire)
    }

    /// Drain fully on each flush instead of one chunk at a time
    pub fn set_block_flush(&self, block: bool) {
        self.block_flush.store(block, Ordering::Release);
    }

    fn lock_ports(&self) -> std::sync::MutexGuard<'_, TxPorts> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a whole message
    ///
    /// Fails with [`CtlError::Busy`] if another producer holds the lock and
    /// with [`CtlError::TxOverflow`] if the message does not fit. Nothing is
    /// written in either case.
    pub fn enqueue(&self, bytes: &[u8]) -> Result<(), CtlError> {
        let mut st = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(CtlError::Busy),
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };

        let free = st.space(self.mask);
        if bytes.len() > free {
            drop(st);
            self.overflows.fetch_add(1, Ordering::Relaxed);
            let err = CtlError::TxOverflow {
                requested: bytes.len(),
                free,
            };
            self.errors.report(Severity::Recoverable, &err);
            return Err(err);
        }

        let mut head = st.head;
        for &b in bytes {
            st.buf[head] = b;
            head = (head + 1) & self.mask;
        }
        st.head = head;
        Ok(())
    }

    /// Append a message and wake the flush task
    pub fn enqueue_and_notify(&self, bytes: &[u8]) -> Result<(), CtlError> {
        let res = self.enqueue(bytes);
        self.notify.notify_one();
        res
    }

    /// Fire-and-forget variant used for console output
    ///
    /// Errors are already counted by the reporter; a busy ring is logged.
    pub fn print(&self, text: &str) {
        if let Err(CtlError::Busy) = self.enqueue_and_notify(text.as_bytes()) {
            debug!("tx ring busy, dropped {} byte(s)", text.len());
        }
    }

    /// Wake the flush task without writing
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Wait until someone asks for a flush
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Discard everything not yet flushed
    pub fn reset(&self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.head = 0;
        st.tail = 0;
        st.generation = st.generation.wrapping_add(1);
    }

    fn peek_chunk(&self, limit: usize) -> Option<(Vec<u8>, u64)> {
        let st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let len = st.count(self.mask).min(limit);
        if len == 0 {
            return None;
        }
        let mut chunk = Vec::with_capacity(len);
        let mut tail = st.tail;
        for _ in 0..len {
            chunk.push(st.buf[tail]);
            tail = (tail + 1) & self.mask;
        }
        Some((chunk, st.generation))
    }

    fn commit(&self, len: usize, generation: u64) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // A reset in between already threw these bytes away
        if st.generation == generation {
            st.tail = (st.tail + len) & self.mask;
        }
    }

    /// Push pending output to the active transport
    ///
    /// Sends one chunk, or loops until empty (bounded by the flush timeout)
    /// when block flush is set. A concurrent call gets [`CtlError::Busy`].
    pub fn flush(&self) -> Result<FlushReport, CtlError> {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return Err(CtlError::Busy);
        }
        let _guard = FlushGuard(&self.flushing);

        let mut ports = self.lock_ports();
        let uart_active = self.uart_enabled() && ports.uart.is_some();
        let usb_active = ports.usb.as_ref().is_some_and(|s| s.is_ready());
        let bt_active = ports.bt.as_ref().is_some_and(|s| s.is_ready());
        if !uart_active && !usb_active && !bt_active {
            return Err(CtlError::TransportUnavailable);
        }

        let chunk_size = if ports.bt.is_some() {
            self.chunk_size - BT_CHUNK_RESERVE
        } else {
            self.chunk_size
        };
        let block = self.block_flush.load(Ordering::Acquire);
        let started = Instant::now();
        let mut sent = 0;
        let mut result = Ok(());

        while let Some((chunk, generation)) = self.peek_chunk(chunk_size) {
            if started.elapsed() > self.timeout {
                debug!("flush timeout after {} byte(s)", sent);
                break;
            }

            if uart_active {
                if let Some(uart) = ports.uart.as_mut() {
                    if let Err(e) = uart.transmit(&chunk) {
                        self.errors.report(Severity::Recoverable, &e);
                        result = Err(e);
                    }
                }
                self.commit(chunk.len(), generation);
            } else {
                if usb_active {
                    if let Some(usb) = ports.usb.as_mut() {
                        if let Err(e) = usb.transmit(&chunk) {
                            self.errors.report(Severity::Recoverable, &e);
                            result = Err(e);
                            break;
                        }
                    }
                }
                if bt_active {
                    if let Some(bt) = ports.bt.as_mut() {
                        if let Err(e) = bt.transmit(&chunk) {
                            trace!("bluetooth mirror dropped chunk: {}", e);
                        }
                    }
                }
                self.commit(chunk.len(), generation);
            }
            sent += chunk.len();

            if !block {
                break;
            }
        }

        result.map(|()| FlushReport {
            sent,
            remaining: self.pending(),
        })
    }
}

impl std::fmt::Debug for TxRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxRing")
            .field("capacity", &self.capacity())
            .field("pending", &self.pending())
            .field("uart_enabled", &self.uart_enabled())
            .finish()
    }
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
