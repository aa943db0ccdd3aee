//! Receive side of the transports
//!
//! Each transport (UART, USB, Bluetooth UART) gets an SPSC byte ring. The
//! reader half ([`RxSender`]) lives with the peripheral driver and plays
//! the interrupt: it deposits bytes and signals the control task. The
//! consumer half ([`RxPort`]) belongs to the control task together with
//! that transport's framer state, so every transport has exactly one unit
//! in flight.

use std::fmt;
use std::sync::Arc;

use tracing::trace;
use uwb_wire::uci::UciInterface;

use crate::app::PortFramers;
use crate::control::ControlHandle;
use crate::error::{CtlError, ErrorReporter, Severity};
use crate::ring::{spsc, Consumer, Producer};

/// Slots in each transport's receive ring
pub const RX_RING_DEPTH: usize = 0x800;

/// Which physical link bytes came in on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Uart,
    Usb,
    Bluetooth,
}

impl TransportKind {
    /// Interface the binary protocol binds to when it arrives here
    pub fn uci_interface(&self) -> UciInterface {
        match self {
            TransportKind::Usb => UciInterface::Uart0,
            TransportKind::Uart => UciInterface::Uart1,
            TransportKind::Bluetooth => UciInterface::None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Uart => write!(f, "UART"),
            TransportKind::Usb => write!(f, "USB"),
            TransportKind::Bluetooth => write!(f, "BT"),
        }
    }
}

/// Driver-side half of a transport's receive path
pub struct RxSender {
    kind: TransportKind,
    producer: Producer<u8, RX_RING_DEPTH>,
    control: ControlHandle,
    errors: Arc<ErrorReporter>,
}

impl RxSender {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Deposit received bytes and wake the control task
    ///
    /// Bytes that do not fit are dropped and reported. Returns how many
    /// were accepted.
    pub fn deliver(&mut self, bytes: &[u8]) -> usize {
        let accepted = self.producer.push_iter(bytes.iter().copied());
        if accepted < bytes.len() {
            self.errors.report(
                Severity::Recoverable,
                &CtlError::RxOverflow {
                    dropped: bytes.len() - accepted,
                },
            );
        }
        if accepted > 0 {
            trace!("{}: {} byte(s) received", self.kind, accepted);
            self.control.data_received();
        }
        accepted
    }
}

impl fmt::Debug for RxSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxSender")
            .field("kind", &self.kind)
            .field("queued", &self.producer.len())
            .finish()
    }
}

/// Control-task half of a transport's receive path
#[derive(Debug)]
pub struct RxPort {
    kind: TransportKind,
    consumer: Consumer<u8, RX_RING_DEPTH>,
    pub framers: PortFramers,
}

impl RxPort {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn has_data(&self) -> bool {
        !self.consumer.is_empty()
    }

    /// Take everything received so far
    pub fn take_bytes(&mut self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.consumer.len());
        self.consumer.drain_into(&mut bytes);
        bytes
    }
}

/// Create the receive path for one transport
pub fn rx_channel(kind: TransportKind, control: ControlHandle, errors: Arc<ErrorReporter>) -> (RxSender, RxPort) {
    let (producer, consumer) = spsc();
    (
        RxSender {
            kind,
            producer,
            control,
            errors,
        },
        RxPort {
            kind,
            consumer,
            framers: PortFramers::new(),
        },
    )
}
