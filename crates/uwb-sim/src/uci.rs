//! Simulated UCI core
//!
//! Answers `CORE_GET_DEVICE_INFO` the way a device would and turns every
//! other command into a response carrying the same payload, which is
//! enough for a host to check the transport end to end.

use tracing::debug;
use uwb_ctl::UciCore;
use uwb_wire::uci::{MessageType, UciPacket};

/// Core group
pub const GID_CORE: u8 = 0x00;
pub const OID_CORE_DEVICE_INFO: u8 = 0x02;

const STATUS_OK: u8 = 0x00;
const STATUS_SYNTAX_ERROR: u8 = 0x02;

/// UCI generic version 1.1, MAC 1.3, PHY 1.3, test 1.1
const VERSIONS: [u8; 8] = [0x01, 0x10, 0x01, 0x30, 0x01, 0x30, 0x01, 0x10];

const VENDOR_INFO: [u8; 12] = *b"uwb-sim\0\0\0\0\0";

/// UCI core that echoes
#[derive(Debug, Default)]
pub struct EchoUciCore {
    received: usize,
    sent: usize,
}

impl EchoUciCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands received so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Responses confirmed sent
    pub fn sent(&self) -> usize {
        self.sent
    }

    fn device_info() -> Vec<u8> {
        let mut payload = Vec::with_capacity(1 + VERSIONS.len() + 1 + VENDOR_INFO.len());
        payload.push(STATUS_OK);
        payload.extend_from_slice(&VERSIONS);
        payload.push(VENDOR_INFO.len() as u8);
        payload.extend_from_slice(&VENDOR_INFO);
        payload
    }
}

impl UciCore for EchoUciCore {
    fn packet_recv(&mut self, packet: UciPacket) -> Vec<UciPacket> {
        self.received += 1;
        if packet.message_type() != MessageType::Command {
            debug!("sim UCI ignoring {:?}", packet.message_type());
            return Vec::new();
        }

        let payload = match (packet.gid(), packet.oid()) {
            (GID_CORE, OID_CORE_DEVICE_INFO) if packet.payload().is_empty() => Self::device_info(),
            (GID_CORE, OID_CORE_DEVICE_INFO) => vec![STATUS_SYNTAX_ERROR],
            _ => packet.payload().to_vec(),
        };
        UciPacket::new(MessageType::Response, false, packet.gid(), packet.oid(), &payload)
            .ok()
            .into_iter()
            .collect()
    }

    fn send_done(&mut self, _packet: &UciPacket, ok: bool) {
        if ok {
            self.sent += 1;
        }
    }
}
