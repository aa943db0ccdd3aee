//! Hardware collaborator interfaces
//!
//! The control plane never talks to a radio directly. It sees three traits:
//!
//! - [`UwbRadio`]: the transceiver driver (init, configure, rx/tx, IRQ gate)
//! - [`RangingMac`]: the FiRa ranging stack
//! - [`UciCore`]: the UCI protocol core that answers binary packets
//!
//! A [`Board`] bundles one of each behind shared locks. Holding the radio
//! lock is the global critical section: application start/stop and every
//! multi-step radio configuration run under it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uwb_wire::uci::UciPacket;

use crate::config::{ConfigBlocks, StsConfig, TxPower, UwbConfig};
use crate::error::RadioError;

/// A frame received by the radio
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RxFrame {
    /// Frame payload without the FCS
    pub data: Vec<u8>,
    /// 40-bit receive timestamp, least significant byte first
    pub timestamp: [u8; 5],
    /// Carrier frequency offset in 2^-26 units
    pub cfo: i16,
    /// Received signal level, hundredths of dBm
    pub rsl_100: i32,
    /// First path signal level, hundredths of dBm
    pub fsl_100: i32,
    /// STS quality, when STS is enabled
    pub sts_ok: Option<bool>,
}

/// Events raised from the radio interrupt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// Good frame (CRC ok)
    Frame(RxFrame),
    /// Frame with a bad CRC
    CrcError,
    /// Frame rejected by the address filter
    FilterRejected,
    /// PHY header error
    PhrError,
    /// Reed-Solomon decoder error
    RsError,
    /// SFD timeout
    SfdTimeout,
    /// Preamble detection timeout
    PreambleTimeout,
    /// Frame wait timeout
    FrameTimeout,
    /// SFD detected without a frame following
    SfdDetected,
}

/// Callback installed by an application to receive radio events
///
/// Runs in interrupt-like context: it must not block and must not take the
/// radio lock.
pub type RxHandler = Box<dyn FnMut(RxEvent) + Send>;

/// The UWB transceiver driver
pub trait UwbRadio: Send {
    fn device_id(&self) -> u32;
    fn lot_id(&self) -> u32;
    fn part_id(&self) -> u32;
    fn driver_version(&self) -> String;

    /// Leave deep sleep
    fn wakeup(&mut self);
    /// Enter deep sleep
    fn sleep(&mut self);

    fn disable_irq(&mut self);
    fn enable_irq(&mut self);

    /// Hard reset, cancels any rx/tx in progress
    fn reset(&mut self);

    /// Bring the chip up after reset
    fn initialise(&mut self) -> Result<(), RadioError>;

    /// Apply channel, STS and power settings
    fn configure(&mut self, uwb: &UwbConfig, sts: &StsConfig, tx_power: &TxPower) -> Result<(), RadioError>;

    /// Install or remove the receive callback
    fn set_rx_handler(&mut self, handler: Option<RxHandler>);

    /// Start listening immediately
    fn rx_enable(&mut self) -> Result<(), RadioError>;

    /// Send one frame immediately
    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Continuous wave on the configured channel
    fn start_continuous_wave(&mut self) -> Result<(), RadioError>;

    /// Stop rx, tx and continuous modes
    fn stop_all(&mut self);

    fn set_xtal_trim(&mut self, trim: u8);
    fn xtal_trim(&self) -> u8;

    /// Whether the part has a second antenna path for PDoA
    fn is_aoa(&self) -> bool {
        false
    }
}

/// Ranging role of a FiRa session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangingRole {
    Initiator,
    Responder,
}

/// Numeric session parameters given to `INITF`/`RESPF`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub rframe_config: u8,
    pub slot_duration_rstu: u32,
    pub block_duration_ms: u32,
    pub round_duration_slots: u32,
    /// 1 = SS-TWR, 2 = DS-TWR
    pub ranging_round_usage: u8,
    pub session_id: u32,
    pub vupper64: [u8; 8],
    pub multi_node: bool,
    pub round_hopping: bool,
    pub initiator_address: u16,
    pub responder_addresses: Vec<u16>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            rframe_config: 3,
            slot_duration_rstu: 2400,
            block_duration_ms: 200,
            round_duration_slots: 25,
            ranging_round_usage: 2,
            session_id: 42,
            vupper64: [1, 2, 3, 4, 5, 6, 7, 8],
            multi_node: false,
            round_hopping: false,
            initiator_address: 0,
            responder_addresses: vec![1],
        }
    }
}

/// One peer in a ranging report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangingMeasurement {
    pub peer_address: u16,
    pub ok: bool,
    pub distance_cm: i32,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    StopRequest,
    InbandStop,
    MaxAttempts,
    Unknown,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::StopRequest => "Stop request",
            StopReason::InbandStop => "Inband Stop",
            StopReason::MaxAttempts => "Max attempts",
            StopReason::Unknown => "Unknown",
        }
    }
}

/// Reports delivered by the ranging stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangingEvent {
    Report {
        block_index: u32,
        measurements: Vec<RangingMeasurement>,
    },
    Stopped(StopReason),
}

pub type RangingCallback = Box<dyn FnMut(RangingEvent) + Send>;

/// The FiRa ranging stack
pub trait RangingMac: Send {
    fn start_session(
        &mut self,
        params: &SessionParams,
        role: RangingRole,
        callback: RangingCallback,
    ) -> Result<(), RadioError>;

    /// Stop the session if one runs; idempotent
    fn stop_session(&mut self) -> Result<(), RadioError>;
}

/// The UCI protocol core
pub trait UciCore: Send {
    /// Handle one complete packet, returning the packets to send back
    fn packet_recv(&mut self, packet: UciPacket) -> Vec<UciPacket>;

    /// Notification that a previously returned packet left the device
    fn send_done(&mut self, _packet: &UciPacket, _ok: bool) {}
}

/// Radio, ranging stack and UCI core of one board
#[derive(Clone)]
pub struct Board {
    radio: Arc<Mutex<Box<dyn UwbRadio>>>,
    mac: Arc<Mutex<Box<dyn RangingMac>>>,
    uci: Arc<Mutex<Box<dyn UciCore>>>,
}

impl Board {
    pub fn new(radio: Box<dyn UwbRadio>, mac: Box<dyn RangingMac>, uci: Box<dyn UciCore>) -> Self {
        Self {
            radio: Arc::new(Mutex::new(radio)),
            mac: Arc::new(Mutex::new(mac)),
            uci: Arc::new(Mutex::new(uci)),
        }
    }

    /// Enter the critical section
    pub fn radio(&self) -> MutexGuard<'_, Box<dyn UwbRadio>> {
        self.radio.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mac(&self) -> MutexGuard<'_, Box<dyn RangingMac>> {
        self.mac.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn uci(&self) -> MutexGuard<'_, Box<dyn UciCore>> {
        self.uci.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset, initialise and configure the radio with IRQ left disabled
    ///
    /// Applies the stored crystal trim when the driver came up with the
    /// factory value or when the override bit is set.
    pub fn bring_up(&self, config: &ConfigBlocks) -> Result<(), RadioError> {
        let mut radio = self.radio();
        radio.disable_irq();
        radio.reset();
        radio.initialise()?;
        radio.configure(&config.uwb, &config.sts, &config.tx_power)?;
        let trim = config.rf.xtal_trim;
        if radio.xtal_trim() == DEFAULT_XTAL_TRIM || trim & !XTAL_TRIM_MASK != 0 {
            radio.set_xtal_trim(trim & XTAL_TRIM_MASK);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board").finish_non_exhaustive()
    }
}

/// Trim value the driver falls back to without OTP calibration
pub const DEFAULT_XTAL_TRIM: u8 = 0x2E;

/// Bits of the crystal trim the radio actually uses
pub const XTAL_TRIM_MASK: u8 = 0x7F;
