//! UCI-style binary packet transport
//!
//! Packets carry a fixed 4-byte header followed by the payload:
//!
//! | byte | content                          |
//! |------|----------------------------------|
//! | 0    | MT (bits 7..5), PBF (4), GID (3..0) |
//! | 1    | OID (bits 5..0)                  |
//! | 2    | RFU                              |
//! | 3    | payload length                   |
//!
//! [`PacketAssembler`] rebuilds packets from arbitrarily chunked reads and
//! [`SendQueue`] drains outgoing packets in FIFO order through whichever
//! write primitive the active interface provides.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{FrameError, WireError};

/// Size of the fixed packet header
pub const HEADER_SIZE: usize = 4;

/// Largest payload accepted unless configured otherwise
pub const DEFAULT_MAX_PAYLOAD: usize = 255;

/// Silence after which a partial header is considered line noise
pub const DEFAULT_GARBAGE_TIMEOUT: Duration = Duration::from_millis(100);

/// Message type carried in the top three bits of byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Data,
    Command,
    Response,
    Notification,
    /// Reserved encodings are passed through untouched
    Reserved(u8),
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MessageType::Data,
            1 => MessageType::Command,
            2 => MessageType::Response,
            3 => MessageType::Notification,
            other => MessageType::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            MessageType::Data => 0,
            MessageType::Command => 1,
            MessageType::Response => 2,
            MessageType::Notification => 3,
            MessageType::Reserved(b) => b & 0x07,
        }
    }
}

/// One complete binary packet (header and payload)
#[derive(Clone, PartialEq, Eq)]
pub struct UciPacket {
    bytes: Vec<u8>,
}

impl UciPacket {
    /// Build a packet from its fields
    ///
    /// Payloads above 255 bytes cannot be described by the length byte.
    pub fn new(mt: MessageType, pbf: bool, gid: u8, oid: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > u8::MAX as usize {
            return Err(FrameError::PayloadTooLarge {
                declared: payload.len(),
                max: u8::MAX as usize,
            });
        }
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.push((mt.bits() << 5) | (u8::from(pbf) << 4) | (gid & 0x0F));
        bytes.push(oid & 0x3F);
        bytes.push(0);
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(payload);
        Ok(Self { bytes })
    }

    /// Wrap raw bytes, checking that the length byte matches
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed: HEADER_SIZE,
            });
        }
        let needed = HEADER_SIZE + bytes[3] as usize;
        if bytes.len() != needed {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed,
            });
        }
        Ok(Self { bytes })
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_bits(self.bytes[0] >> 5)
    }

    /// Packet boundary flag (segmented message continues)
    pub fn pbf(&self) -> bool {
        self.bytes[0] & 0x10 != 0
    }

    pub fn gid(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    pub fn oid(&self) -> u8 {
        self.bytes[1] & 0x3F
    }

    pub fn payload_len(&self) -> usize {
        self.bytes[3] as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for UciPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UciPacket")
            .field("mt", &self.message_type())
            .field("gid", &self.gid())
            .field("oid", &self.oid())
            .field("len", &self.payload_len())
            .finish()
    }
}

/// Receive-side packet reassembly
///
/// One assembler exists per connection. It holds at most one packet in
/// flight; completed packets are handed to the sink immediately.
#[derive(Debug)]
pub struct PacketAssembler {
    partial: Vec<u8>,
    last_chunk: Option<Instant>,
    garbage_timeout: Duration,
    max_payload: usize,
    streaming: bool,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_PAYLOAD, DEFAULT_GARBAGE_TIMEOUT)
    }

    pub fn with_limits(max_payload: usize, garbage_timeout: Duration) -> Self {
        Self {
            partial: Vec::new(),
            last_chunk: None,
            garbage_timeout,
            max_payload,
            streaming: false,
        }
    }

    /// Mark the transport as streaming (always connected)
    ///
    /// Streaming transports never time out a partial header.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Bytes of the packet currently in flight
    pub fn buffered(&self) -> usize {
        self.partial.len()
    }

    /// Discard any partial packet
    pub fn flush(&mut self) {
        if !self.partial.is_empty() {
            debug!("UCI assembler flushing {} partial byte(s)", self.partial.len());
        }
        self.partial = Vec::new();
    }

    fn needed(&self) -> usize {
        if self.partial.len() < HEADER_SIZE {
            HEADER_SIZE
        } else {
            HEADER_SIZE + self.partial[3] as usize
        }
    }

    /// Feed one read's worth of bytes
    ///
    /// Every packet completed by this read is passed to `sink` in order.
    /// Returns the number of bytes consumed. On error the partial packet
    /// is flushed and the remainder of `data` is dropped.
    pub fn read(
        &mut self,
        data: &[u8],
        now: Instant,
        sink: &mut dyn FnMut(UciPacket),
    ) -> Result<usize, FrameError> {
        let stale = self
            .last_chunk
            .map(|last| now.saturating_duration_since(last))
            .filter(|idle| *idle > self.garbage_timeout);
        self.last_chunk = Some(now);

        let mut rest = data;
        while !rest.is_empty() {
            let take = (self.needed() - self.partial.len()).min(rest.len());
            self.partial.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.partial.len() < HEADER_SIZE {
                if let Some(idle) = stale.filter(|_| !self.streaming && self.partial.len() > take) {
                    let buffered = self.partial.len();
                    warn!("UCI garbage: {} byte(s) idle for {:?}", buffered, idle);
                    self.flush();
                    return Err(FrameError::GarbageTimeout {
                        buffered,
                        idle_ms: idle.as_millis() as u64,
                    });
                }
                continue;
            }

            let declared = self.partial[3] as usize;
            if declared > self.max_payload {
                warn!("UCI payload length {} above maximum {}", declared, self.max_payload);
                self.flush();
                return Err(FrameError::PayloadTooLarge {
                    declared,
                    max: self.max_payload,
                });
            }

            if self.partial.len() == HEADER_SIZE + declared {
                let bytes = std::mem::take(&mut self.partial);
                sink(UciPacket { bytes });
            }
        }

        Ok(data.len())
    }
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Interface that carries the binary protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UciInterface {
    #[default]
    None,
    Uart0,
    Uart1,
    Hsspi,
}

impl UciInterface {
    /// Claim the binary protocol for `candidate` if nobody has yet
    ///
    /// Returns true when `candidate` is (now) the selected interface.
    pub fn claim(&mut self, candidate: UciInterface) -> bool {
        if candidate == UciInterface::None {
            return false;
        }
        if *self == UciInterface::None {
            debug!("UCI interface selected: {:?}", candidate);
            *self = candidate;
        }
        *self == candidate
    }
}

/// FIFO of packets waiting to be written
#[derive(Debug, Default)]
pub struct SendQueue {
    pending: VecDeque<UciPacket>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: UciPacket) {
        self.pending.push_back(packet);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write every queued packet in order
    ///
    /// `send_done` is called once per packet with the write outcome. A
    /// failed write stops the drain; that packet stays at the front and is
    /// retried by the next call.
    pub fn drain<W, D>(&mut self, mut write: W, mut send_done: D) -> Result<usize, WireError>
    where
        W: FnMut(&[u8]) -> Result<(), WireError>,
        D: FnMut(&UciPacket, Result<(), &WireError>),
    {
        let mut sent = 0;
        while let Some(packet) = self.pending.front() {
            match write(packet.as_bytes()) {
                Ok(()) => {
                    send_done(packet, Ok(()));
                    self.pending.pop_front();
                    sent += 1;
                }
                Err(e) => {
                    send_done(packet, Err(&e));
                    return Err(e);
                }
            }
        }
        Ok(sent)
    }
}
