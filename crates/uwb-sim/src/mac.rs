//! Simulated FiRa ranging stack
//!
//! A started session runs a ticker thread that reports one ranging block
//! per block duration. Distances follow a slow sawtooth per peer so
//! successive reports differ.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use uwb_ctl::hal::{RangingCallback, RangingEvent, RangingMeasurement, RangingRole, SessionParams, StopReason};
use uwb_ctl::{RadioError, RangingMac};

/// Report period used when the session asks for 0 ms blocks
const MIN_BLOCK: Duration = Duration::from_millis(1);

/// Synthetic distance for a peer in a given block
pub fn synthetic_distance_cm(peer: u16, block: u32) -> i32 {
    let base = 100 + i32::from(peer % 16) * 50;
    let wobble = i32::try_from(block % 40).unwrap_or(0);
    base + wobble
}

/// Peers reported by a session in `role`
fn peers(params: &SessionParams, role: RangingRole) -> Vec<u16> {
    match role {
        RangingRole::Initiator => params.responder_addresses.clone(),
        RangingRole::Responder => vec![params.initiator_address],
    }
}

struct Session {
    stop: Arc<AtomicBool>,
    callback: Arc<Mutex<RangingCallback>>,
    handle: Option<JoinHandle<()>>,
}

/// Ranging stack with no radio behind it
#[derive(Default)]
pub struct SimMac {
    session: Option<Session>,
    started: Arc<AtomicU32>,
    /// Block period override, for tests
    period: Option<Duration>,
}

impl SimMac {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report at `period` whatever the session's block duration says
    pub fn with_period(period: Duration) -> Self {
        let mut mac = Self::default();
        mac.period = Some(period);
        mac
    }

    /// Sessions started so far
    pub fn sessions_started(&self) -> u32 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }
}

impl std::fmt::Debug for SimMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMac")
            .field("running", &self.is_running())
            .field("started", &self.sessions_started())
            .finish()
    }
}

impl RangingMac for SimMac {
    fn start_session(
        &mut self,
        params: &SessionParams,
        role: RangingRole,
        callback: RangingCallback,
    ) -> Result<(), RadioError> {
        if self.session.is_some() {
            return Err(RadioError::Session("session already active".into()));
        }

        let period = self
            .period
            .unwrap_or_else(|| Duration::from_millis(u64::from(params.block_duration_ms)))
            .max(MIN_BLOCK);
        let peers = peers(params, role);
        let stop = Arc::new(AtomicBool::new(false));
        let callback = Arc::new(Mutex::new(callback));

        let handle = {
            let stop = Arc::clone(&stop);
            let callback = Arc::clone(&callback);
            thread::Builder::new()
                .name(format!("sim-fira-{}", params.session_id))
                .spawn(move || {
                    let mut block: u32 = 0;
                    while !stop.load(Ordering::Acquire) {
                        thread::sleep(period);
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        let measurements = peers
                            .iter()
                            .map(|&peer| RangingMeasurement {
                                peer_address: peer,
                                ok: true,
                                distance_cm: synthetic_distance_cm(peer, block),
                            })
                            .collect();
                        let event = RangingEvent::Report {
                            block_index: block,
                            measurements,
                        };
                        (callback.lock().unwrap_or_else(PoisonError::into_inner))(event);
                        block = block.wrapping_add(1);
                    }
                })
                .map_err(|e| RadioError::Session(format!("cannot start ranging thread: {}", e)))?
        };

        self.started.fetch_add(1, Ordering::Relaxed);
        debug!("sim FiRa session {} started as {:?}", params.session_id, role);
        self.session = Some(Session {
            stop,
            callback,
            handle: Some(handle),
        });
        Ok(())
    }

    fn stop_session(&mut self) -> Result<(), RadioError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.stop.store(true, Ordering::Release);
        if let Some(handle) = session.handle.take() {
            if handle.join().is_err() {
                warn!("sim FiRa thread panicked");
            }
        }
        (session.callback.lock().unwrap_or_else(PoisonError::into_inner))(RangingEvent::Stopped(StopReason::StopRequest));
        debug!("sim FiRa session stopped");
        Ok(())
    }
}

impl Drop for SimMac {
    fn drop(&mut self) {
        let _ = self.stop_session();
    }
}
