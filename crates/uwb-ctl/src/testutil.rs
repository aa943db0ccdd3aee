//! In-crate fakes for the unit tests
//!
//! The integration tests use `uwb-sim`; unit tests cannot, so a minimal
//! radio, ranging stack, UCI core and store live here.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use uwb_wire::uci::{MessageType, UciPacket};

use crate::config::{ConfigBlocks, ConfigStore, ControlConfig, StsConfig, TxPower, UwbConfig};
use crate::context::SystemContext;
use crate::control::{ControlHandle, ControlSignal};
use crate::error::{CtlError, ErrorReporter, RadioError};
use crate::hal::{
    Board, RangingCallback, RangingEvent, RangingMac, RangingRole, RxEvent, RxHandler, SessionParams, UciCore,
    UwbRadio, DEFAULT_XTAL_TRIM,
};
use crate::registry::Registry;
use crate::txbuf::{TxRing, TxSink};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Byte capture shared between a sink and the test
#[derive(Debug, Clone, Default)]
pub struct SharedBytes(Arc<Mutex<Vec<u8>>>);

impl SharedBytes {
    pub fn sink(&self) -> SharedSink {
        SharedSink(Arc::clone(&self.0))
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl TxSink for SharedSink {
    fn transmit(&mut self, chunk: &[u8]) -> Result<(), CtlError> {
        self.0.lock().unwrap().extend_from_slice(chunk);
        Ok(())
    }
}

#[derive(Default)]
struct RadioState {
    calls: Vec<&'static str>,
    transmitted: Vec<Vec<u8>>,
    trim: u8,
    fail_init: bool,
}

pub struct FakeRadio {
    state: Arc<Mutex<RadioState>>,
    handler: Arc<Mutex<Option<RxHandler>>>,
}

impl FakeRadio {
    fn log(&self, call: &'static str) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl UwbRadio for FakeRadio {
    fn device_id(&self) -> u32 {
        0xDECA_0302
    }

    fn lot_id(&self) -> u32 {
        0x0012_3456
    }

    fn part_id(&self) -> u32 {
        0x0789_ABCD
    }

    fn driver_version(&self) -> String {
        "fake 1.0".to_string()
    }

    fn wakeup(&mut self) {
        self.log("wakeup");
    }

    fn sleep(&mut self) {
        self.log("sleep");
    }

    fn disable_irq(&mut self) {
        self.log("disable_irq");
    }

    fn enable_irq(&mut self) {
        self.log("enable_irq");
    }

    fn reset(&mut self) {
        self.log("reset");
    }

    fn initialise(&mut self) -> Result<(), RadioError> {
        self.log("initialise");
        if self.state.lock().unwrap().fail_init {
            return Err(RadioError::Init("no device".into()));
        }
        Ok(())
    }

    fn configure(&mut self, _uwb: &UwbConfig, _sts: &StsConfig, _tx_power: &TxPower) -> Result<(), RadioError> {
        self.log("configure");
        Ok(())
    }

    fn set_rx_handler(&mut self, handler: Option<RxHandler>) {
        *self.handler.lock().unwrap() = handler;
    }

    fn rx_enable(&mut self) -> Result<(), RadioError> {
        self.log("rx_enable");
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        self.state.lock().unwrap().transmitted.push(frame.to_vec());
        Ok(())
    }

    fn start_continuous_wave(&mut self) -> Result<(), RadioError> {
        self.log("continuous_wave");
        Ok(())
    }

    fn stop_all(&mut self) {
        self.log("stop_all");
    }

    fn set_xtal_trim(&mut self, trim: u8) {
        self.state.lock().unwrap().trim = trim;
    }

    fn xtal_trim(&self) -> u8 {
        self.state.lock().unwrap().trim
    }
}

/// Test side of [`FakeRadio`]
#[derive(Clone)]
pub struct FakeRadioHandle {
    state: Arc<Mutex<RadioState>>,
    handler: Arc<Mutex<Option<RxHandler>>>,
}

impl FakeRadioHandle {
    /// Raise a radio event as the interrupt would
    pub fn inject(&self, event: RxEvent) {
        if let Some(handler) = self.handler.lock().unwrap().as_mut() {
            handler(event);
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().transmitted.clone()
    }

    pub fn fail_init(&self, fail: bool) {
        self.state.lock().unwrap().fail_init = fail;
    }
}

#[derive(Default)]
struct MacState {
    started: Vec<(u32, RangingRole)>,
    stops: usize,
    callback: Option<RangingCallback>,
}

pub struct FakeMac(Arc<Mutex<MacState>>);

impl RangingMac for FakeMac {
    fn start_session(
        &mut self,
        params: &SessionParams,
        role: RangingRole,
        callback: RangingCallback,
    ) -> Result<(), RadioError> {
        let mut st = self.0.lock().unwrap();
        st.started.push((params.session_id, role));
        st.callback = Some(callback);
        Ok(())
    }

    fn stop_session(&mut self) -> Result<(), RadioError> {
        let mut st = self.0.lock().unwrap();
        st.stops += 1;
        st.callback = None;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeMacHandle(Arc<Mutex<MacState>>);

impl FakeMacHandle {
    pub fn emit(&self, event: RangingEvent) {
        if let Some(callback) = self.0.lock().unwrap().callback.as_mut() {
            callback(event);
        }
    }

    pub fn started(&self) -> Vec<(u32, RangingRole)> {
        self.0.lock().unwrap().started.clone()
    }

    pub fn stops(&self) -> usize {
        self.0.lock().unwrap().stops
    }
}

/// Answers every packet with a response carrying the same payload
pub struct EchoCore;

impl UciCore for EchoCore {
    fn packet_recv(&mut self, packet: UciPacket) -> Vec<UciPacket> {
        UciPacket::new(MessageType::Response, false, packet.gid(), packet.oid(), packet.payload())
            .ok()
            .into_iter()
            .collect()
    }
}

#[derive(Default)]
struct StoreState {
    initial: Option<ConfigBlocks>,
    saved: Option<ConfigBlocks>,
    fail: bool,
}

pub struct MemStore(Arc<Mutex<StoreState>>);

impl ConfigStore for MemStore {
    fn load(&mut self) -> Result<Option<ConfigBlocks>, CtlError> {
        Ok(self.0.lock().unwrap().initial.clone())
    }

    fn save(&mut self, blocks: &ConfigBlocks) -> Result<(), CtlError> {
        let mut st = self.0.lock().unwrap();
        if st.fail {
            return Err(CtlError::Storage("flash write failed".into()));
        }
        st.saved = Some(blocks.clone());
        Ok(())
    }
}

/// A context wired to fakes, with handles to all of them
pub struct Rig {
    pub ctx: SystemContext,
    pub out: SharedBytes,
    pub radio: FakeRadioHandle,
    pub mac: FakeMacHandle,
    pub signals: UnboundedReceiver<ControlSignal>,
    store: Arc<Mutex<StoreState>>,
}

impl Rig {
    /// Last configuration written to the store
    pub fn saved(&self) -> Option<ConfigBlocks> {
        self.store.lock().unwrap().saved.clone()
    }

    pub fn fail_saves(&self) {
        self.store.lock().unwrap().fail = true;
    }
}

pub fn rig(stored: Option<ConfigBlocks>) -> Rig {
    let radio_state = Arc::new(Mutex::new(RadioState {
        trim: DEFAULT_XTAL_TRIM,
        ..Default::default()
    }));
    let handler = Arc::new(Mutex::new(None));
    let radio = FakeRadio {
        state: Arc::clone(&radio_state),
        handler: Arc::clone(&handler),
    };
    let mac_state = Arc::new(Mutex::new(MacState::default()));
    let store = Arc::new(Mutex::new(StoreState {
        initial: stored,
        ..Default::default()
    }));

    let board = Board::new(Box::new(radio), Box::new(FakeMac(Arc::clone(&mac_state))), Box::new(EchoCore));
    let errors = Arc::new(ErrorReporter::new());
    let tx = Arc::new(TxRing::new(0x2000, 64, Arc::clone(&errors)));
    let out = SharedBytes::default();
    tx.set_usb_sink(Some(Box::new(out.sink())));
    let (control, signals) = ControlHandle::channel();

    let ctx = SystemContext::new(
        Arc::new(Registry::standard()),
        board,
        Box::new(MemStore(Arc::clone(&store))),
        tx,
        errors,
        control,
        ControlConfig::default(),
    );

    Rig {
        ctx,
        out,
        radio: FakeRadioHandle {
            state: radio_state,
            handler,
        },
        mac: FakeMacHandle(mac_state),
        signals,
        store,
    }
}

/// Context plus its output capture, fakes not needed
pub fn context_with(stored: Option<ConfigBlocks>) -> (SystemContext, SharedBytes) {
    let rig = rig(stored);
    (rig.ctx, rig.out)
}

/// Flush the tx ring and return what came out
pub fn output(ctx: &SystemContext, out: &SharedBytes) -> String {
    crate::flush::drain(&ctx.tx);
    String::from_utf8_lossy(&out.take()).into_owned()
}

/// Keep flushing until `needle` shows up or the wait limit passes
pub fn wait_for_output(ctx: &SystemContext, out: &SharedBytes, needle: &str) -> String {
    let deadline = Instant::now() + WAIT_LIMIT;
    let mut seen = String::new();
    while Instant::now() < deadline {
        seen.push_str(&output(ctx, out));
        if seen.contains(needle) {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    seen
}

/// Keep flushing until at least `len` bytes came out
pub fn wait_for_bytes(ctx: &SystemContext, out: &SharedBytes, len: usize) -> Vec<u8> {
    let deadline = Instant::now() + WAIT_LIMIT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        crate::flush::drain(&ctx.tx);
        seen.extend(out.take());
        if seen.len() >= len {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    seen
}
