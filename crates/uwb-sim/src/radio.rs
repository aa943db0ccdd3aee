//! Simulated UWB transceiver
//!
//! [`SimRadio`] implements [`UwbRadio`] over a shared state block. The
//! matching [`SimRadioHandle`] stays with the test or the binary and plays
//! the air interface: it raises receive events through the installed
//! handler and reads back what the radio was told to do.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, trace};
use uwb_ctl::config::{StsConfig, TxPower, UwbConfig};
use uwb_ctl::hal::{RxEvent, RxFrame, RxHandler, DEFAULT_XTAL_TRIM};
use uwb_ctl::{RadioError, UwbRadio};

/// Identity reported by a simulated radio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRadioConfig {
    pub device_id: u32,
    pub lot_id: u32,
    pub part_id: u32,
    /// Trim the driver comes up with
    pub initial_trim: u8,
    /// Report an angle-of-arrival capable part
    pub aoa: bool,
}

impl Default for SimRadioConfig {
    fn default() -> Self {
        Self {
            device_id: 0xDECA_0302,
            lot_id: 0x1234_5678,
            part_id: 0x0000_2A3B,
            initial_trim: DEFAULT_XTAL_TRIM,
            aoa: true,
        }
    }
}

/// Observable radio state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimRadioState {
    pub awake: bool,
    pub initialised: bool,
    pub configured: Option<UwbConfig>,
    pub irq_enabled: bool,
    pub receiving: bool,
    pub continuous_wave: bool,
    pub xtal_trim: u8,
    /// Frames handed to `transmit`
    pub transmitted: Vec<Vec<u8>>,
    /// Events raised while the IRQ was off
    pub masked_events: u32,
    /// Every driver call, in order
    pub calls: Vec<&'static str>,
    pub fail_init: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SimRadioState>,
    handler: Mutex<Option<RxHandler>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SimRadioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self) -> MutexGuard<'_, Option<RxHandler>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("state", &*self.state())
            .field("handler", &self.handler().is_some())
            .finish()
    }
}

/// Driver side of the simulated radio
#[derive(Debug)]
pub struct SimRadio {
    config: SimRadioConfig,
    shared: Arc<Shared>,
}

impl SimRadio {
    /// Create a radio and the handle that drives it
    pub fn new(config: SimRadioConfig) -> (Self, SimRadioHandle) {
        let shared = Arc::new(Shared::default());
        shared.state().xtal_trim = config.initial_trim;
        let handle = SimRadioHandle {
            shared: Arc::clone(&shared),
        };
        (Self { config, shared }, handle)
    }

    fn record(&self, call: &'static str) -> MutexGuard<'_, SimRadioState> {
        let mut state = self.shared.state();
        state.calls.push(call);
        state
    }
}

impl UwbRadio for SimRadio {
    fn device_id(&self) -> u32 {
        self.config.device_id
    }

    fn lot_id(&self) -> u32 {
        self.config.lot_id
    }

    fn part_id(&self) -> u32 {
        self.config.part_id
    }

    fn driver_version(&self) -> String {
        format!("sim {}", env!("CARGO_PKG_VERSION"))
    }

    fn wakeup(&mut self) {
        self.record("wakeup").awake = true;
    }

    fn sleep(&mut self) {
        let mut state = self.record("sleep");
        state.awake = false;
        state.receiving = false;
    }

    fn disable_irq(&mut self) {
        self.record("disable_irq").irq_enabled = false;
    }

    fn enable_irq(&mut self) {
        self.record("enable_irq").irq_enabled = true;
    }

    fn reset(&mut self) {
        let mut state = self.record("reset");
        state.awake = true;
        state.initialised = false;
        state.receiving = false;
        state.continuous_wave = false;
    }

    fn initialise(&mut self) -> Result<(), RadioError> {
        let mut state = self.record("initialise");
        if state.fail_init {
            return Err(RadioError::Init("simulated device absent".into()));
        }
        state.initialised = true;
        Ok(())
    }

    fn configure(&mut self, uwb: &UwbConfig, _sts: &StsConfig, _tx_power: &TxPower) -> Result<(), RadioError> {
        let mut state = self.record("configure");
        if !state.initialised {
            return Err(RadioError::Config("radio not initialised".into()));
        }
        state.configured = Some(*uwb);
        Ok(())
    }

    fn set_rx_handler(&mut self, handler: Option<RxHandler>) {
        *self.shared.handler() = handler;
    }

    fn rx_enable(&mut self) -> Result<(), RadioError> {
        let mut state = self.record("rx_enable");
        if state.configured.is_none() {
            return Err(RadioError::Config("receiver not configured".into()));
        }
        state.receiving = true;
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let mut state = self.shared.state();
        if state.configured.is_none() {
            return Err(RadioError::Transmit("transmitter not configured".into()));
        }
        trace!("sim radio tx {} byte(s)", frame.len());
        state.transmitted.push(frame.to_vec());
        Ok(())
    }

    fn start_continuous_wave(&mut self) -> Result<(), RadioError> {
        let mut state = self.record("continuous_wave");
        if state.configured.is_none() {
            return Err(RadioError::Transmit("transmitter not configured".into()));
        }
        state.continuous_wave = true;
        Ok(())
    }

    fn stop_all(&mut self) {
        let mut state = self.record("stop_all");
        state.receiving = false;
        state.continuous_wave = false;
    }

    fn set_xtal_trim(&mut self, trim: u8) {
        self.shared.state().xtal_trim = trim;
    }

    fn xtal_trim(&self) -> u8 {
        self.shared.state().xtal_trim
    }

    fn is_aoa(&self) -> bool {
        self.config.aoa
    }
}

/// Air-interface side of the simulated radio
#[derive(Debug, Clone)]
pub struct SimRadioHandle {
    shared: Arc<Shared>,
}

impl SimRadioHandle {
    /// Raise a receive event as the interrupt would
    ///
    /// Events raised while the IRQ is disabled are counted and dropped.
    /// Returns true if a handler saw the event.
    pub fn inject(&self, event: RxEvent) -> bool {
        {
            let mut state = self.shared.state();
            if !state.irq_enabled {
                state.masked_events += 1;
                return false;
            }
            if matches!(event, RxEvent::Frame(_)) {
                state.receiving = false;
            }
        }
        match self.shared.handler().as_mut() {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    /// Raise a good frame if the receiver is armed
    pub fn receive(&self, frame: RxFrame) -> bool {
        if !self.shared.state().receiving {
            return false;
        }
        self.inject(RxEvent::Frame(frame))
    }

    pub fn state(&self) -> SimRadioState {
        self.shared.state().clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.shared.state().calls.clone()
    }

    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.shared.state().transmitted.clone()
    }

    /// Make the next `initialise` calls fail
    pub fn set_fail_init(&self, fail: bool) {
        self.shared.state().fail_init = fail;
    }
}

/// Frame the traffic generator sends, counter in bytes 1 and 2
pub fn synthetic_frame(seq: u16) -> RxFrame {
    let mut data = b"\x41\x00\x00sim-traffic".to_vec();
    data[1..3].copy_from_slice(&seq.to_le_bytes());
    let ts = u64::from(seq) * 0x0001_0000;
    let mut timestamp = [0u8; 5];
    timestamp.copy_from_slice(&ts.to_le_bytes()[..5]);
    RxFrame {
        data,
        timestamp,
        cfo: -150 + i16::try_from(seq % 64).unwrap_or(0),
        rsl_100: -8_250 - i32::from(seq % 16) * 10,
        fsl_100: -8_900 - i32::from(seq % 16) * 10,
        sts_ok: None,
    }
}

/// Feed synthetic frames into the radio until shutdown
///
/// A frame goes out on every tick where the receiver is armed, so a
/// listener sees steady traffic and other applications see nothing.
pub async fn run_traffic_task(radio: SimRadioHandle, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    let mut seq: u16 = 0;
    info!("sim traffic every {:?}", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if radio.receive(synthetic_frame(seq)) {
                    seq = seq.wrapping_add(1);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("sim traffic stopped after {} frame(s)", seq);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn configured() -> (SimRadio, SimRadioHandle) {
        let (mut radio, handle) = SimRadio::new(SimRadioConfig::default());
        radio.reset();
        radio.initialise().unwrap();
        radio
            .configure(&UwbConfig::default(), &StsConfig::default(), &TxPower::default())
            .unwrap();
        (radio, handle)
    }

    #[test]
    fn test_events_masked_while_irq_off() {
        let (mut radio, handle) = configured();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        radio.set_rx_handler(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(!handle.inject(RxEvent::CrcError));
        assert_eq!(handle.state().masked_events, 1);

        radio.enable_irq();
        assert!(handle.inject(RxEvent::CrcError));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_receive_needs_armed_receiver() {
        let (mut radio, handle) = configured();
        radio.set_rx_handler(Some(Box::new(|_| {})));
        radio.enable_irq();
        assert!(!handle.receive(synthetic_frame(0)));

        radio.rx_enable().unwrap();
        assert!(handle.receive(synthetic_frame(0)));
        // one frame per arm
        assert!(!handle.receive(synthetic_frame(1)));
    }

    #[test]
    fn test_unconfigured_radio_refuses_tx() {
        let (mut radio, _handle) = SimRadio::new(SimRadioConfig::default());
        assert!(radio.transmit(b"abc").is_err());
        assert!(radio.start_continuous_wave().is_err());
    }

    #[test]
    fn test_fail_init() {
        let (mut radio, handle) = SimRadio::new(SimRadioConfig::default());
        handle.set_fail_init(true);
        assert!(matches!(radio.initialise(), Err(RadioError::Init(_))));
    }

    #[test]
    fn test_synthetic_frame_counter() {
        let frame = synthetic_frame(0x0102);
        assert_eq!(&frame.data[1..3], &[0x02, 0x01]);
        assert_eq!(&frame.data[3..], b"sim-traffic");
    }

    #[tokio::test]
    async fn test_traffic_task_feeds_armed_receiver() {
        let (mut radio, handle) = configured();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        radio.set_rx_handler(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        radio.enable_irq();
        radio.rx_enable().unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_traffic_task(handle.clone(), Duration::from_millis(2), stop_rx));
        for _ in 0..200 {
            if seen.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        stop_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
