//! Control task
//!
//! One control task owns the [`SystemContext`], the running application
//! and the receive side of every transport. It sleeps on a signal channel
//! and wakes when a transport deposits bytes or when an application task
//! asks for a switch.
//!
//! # Architecture
//!
//! ```text
//! RxSender::deliver ──DataReceived──► Controller ──► framer ──► dispatch ──► TxRing
//! app task ──────────StopApp/SwitchApp──┘
//! ```
//!
//! The loop is blocking and runs on its own thread (`spawn_blocking` in
//! the binary). Handlers run synchronously on it, one at a time.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::apps::idle::IDLE_APP;
use crate::app::AppDescriptor;
use crate::context::SystemContext;
use crate::lifecycle::Lifecycle;
use crate::transport::{RxPort, TransportKind};

/// Events that wake the control task
#[derive(Debug, Clone, Copy)]
pub enum ControlSignal {
    /// A transport has bytes waiting
    DataReceived,
    /// Return to idle if the named application is still current
    StopApp(&'static AppDescriptor),
    /// Switch to another application
    SwitchApp(&'static AppDescriptor),
    /// Stop the running application and leave the loop
    Shutdown,
}

/// Sending side of the control channel
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlSignal>,
}

impl ControlHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, signal: ControlSignal) {
        if self.tx.send(signal).is_err() {
            debug!("control task gone, dropped {:?}", signal);
        }
    }

    pub fn data_received(&self) {
        self.send(ControlSignal::DataReceived);
    }

    /// Ask for `app` to be stopped; ignored once `app` is no longer current
    pub fn stop_app(&self, app: &'static AppDescriptor) {
        self.send(ControlSignal::StopApp(app));
    }

    pub fn switch_app(&self, app: &'static AppDescriptor) {
        self.send(ControlSignal::SwitchApp(app));
    }

    pub fn shutdown(&self) {
        self.send(ControlSignal::Shutdown);
    }
}

/// The control task
pub struct Controller {
    ctx: SystemContext,
    lifecycle: Lifecycle,
    ports: Vec<RxPort>,
    signals: mpsc::UnboundedReceiver<ControlSignal>,
    units: Vec<u8>,
}

impl Controller {
    /// Boot the default application and take ownership of the ports
    pub fn new(
        mut ctx: SystemContext,
        ports: Vec<RxPort>,
        signals: mpsc::UnboundedReceiver<ControlSignal>,
    ) -> Self {
        let lifecycle = Lifecycle::boot(&mut ctx);
        Self {
            ctx,
            lifecycle,
            ports,
            signals,
            units: Vec::new(),
        }
    }

    pub fn context(&self) -> &SystemContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SystemContext {
        &mut self.ctx
    }

    /// Handle one signal; false means the loop should end
    pub fn handle_signal(&mut self, signal: ControlSignal) -> bool {
        match signal {
            ControlSignal::DataReceived => {
                while self.poll_transports() {}
            }
            ControlSignal::StopApp(app) => {
                if !self.ctx.current().is(app) {
                    debug!("stale stop from {} ignored", app.name);
                } else if !app.is_idle() {
                    self.switch_to(&IDLE_APP);
                }
            }
            ControlSignal::SwitchApp(app) => self.switch_to(app),
            ControlSignal::Shutdown => return false,
        }
        true
    }

    /// Handle every signal already queued, without blocking
    pub fn drain_signals(&mut self) -> bool {
        while let Ok(signal) = self.signals.try_recv() {
            if !self.handle_signal(signal) {
                return false;
            }
        }
        true
    }

    /// Serve one round of received bytes
    ///
    /// UART is read when it is enabled and has data, USB otherwise.
    /// Bluetooth is served independently. Returns true if anything was
    /// processed.
    pub fn poll_transports(&mut self) -> bool {
        let mut served = false;

        let uart_ready = self.ctx.tx.uart_enabled()
            && self.port_index(TransportKind::Uart).is_some_and(|i| self.ports[i].has_data());
        if uart_ready {
            served |= self.serve(TransportKind::Uart);
        } else {
            if !self.ctx.tx.uart_enabled() {
                if let Some(i) = self.port_index(TransportKind::Uart) {
                    let dropped = self.ports[i].take_bytes();
                    if !dropped.is_empty() {
                        debug!("UART disabled, dropped {} byte(s)", dropped.len());
                    }
                }
            }
            served |= self.serve(TransportKind::Usb);
        }
        served |= self.serve(TransportKind::Bluetooth);
        served
    }

    fn port_index(&self, kind: TransportKind) -> Option<usize> {
        self.ports.iter().position(|p| p.kind() == kind)
    }

    fn serve(&mut self, kind: TransportKind) -> bool {
        let Some(idx) = self.port_index(kind) else {
            return false;
        };
        let bytes = self.ports[idx].take_bytes();
        if bytes.is_empty() {
            return false;
        }

        let tx = std::sync::Arc::clone(&self.ctx.tx);
        let mut echo = |b: &[u8]| {
            let _ = tx.enqueue_and_notify(b);
        };
        self.units.clear();
        let status = {
            let framer = self.lifecycle.running().classify(&mut self.ports[idx].framers);
            framer.feed_dyn(&mut bytes.into_iter(), &mut echo, &mut self.units)
        };

        if status.has_data() {
            let units = std::mem::take(&mut self.units);
            self.ctx.set_rx_source(Some(kind));
            self.lifecycle.running_mut().dispatch(status, &units, &mut self.ctx);
            self.ctx.set_rx_source(None);
            self.units = units;
        }
        if self.lifecycle.apply_pending(&mut self.ctx) {
            self.clear_framers();
        }
        true
    }

    fn switch_to(&mut self, target: &'static AppDescriptor) {
        self.lifecycle.switch(&mut self.ctx, target);
        self.clear_framers();
    }

    /// Partial input never crosses an application switch
    fn clear_framers(&mut self) {
        for port in &mut self.ports {
            port.framers.clear();
        }
    }

    /// Run until [`ControlSignal::Shutdown`] or until every sender is gone
    ///
    /// Must not be called from inside an async context.
    pub fn run(mut self) -> SystemContext {
        info!("control task running, application {}", self.ctx.current().name);
        while let Some(signal) = self.signals.blocking_recv() {
            if !self.handle_signal(signal) {
                break;
            }
        }
        self.lifecycle.shutdown(&mut self.ctx);
        info!("control task stopped");
        self.ctx
    }

    /// Stop the running application without consuming the controller
    pub fn shutdown(&mut self) {
        self.lifecycle.shutdown(&mut self.ctx);
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("ctx", &self.ctx)
            .field("ports", &self.ports.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::listener::LISTENER_APP;
    use crate::apps::tcfm::TCFM_APP;
    use crate::testutil::{output, rig, Rig, SharedBytes};
    use crate::transport::{rx_channel, RxSender};
    use std::sync::Arc;

    fn controller() -> (Controller, RxSender, SharedBytes) {
        let Rig { ctx, out, signals, .. } = rig(None);
        let (usb, port) = rx_channel(TransportKind::Usb, ctx.control.clone(), Arc::clone(&ctx.errors));
        (Controller::new(ctx, vec![port], signals), usb, out)
    }

    #[test]
    fn test_stale_stop_leaves_current_app_running() {
        let (mut ctl, _usb, _out) = controller();
        assert!(ctl.handle_signal(ControlSignal::SwitchApp(&LISTENER_APP)));

        // a finished TCFM run reporting late
        assert!(ctl.handle_signal(ControlSignal::StopApp(&TCFM_APP)));
        assert!(ctl.context().current().is(&LISTENER_APP));

        assert!(ctl.handle_signal(ControlSignal::StopApp(&LISTENER_APP)));
        assert!(ctl.context().current().is_idle());
        ctl.shutdown();
    }

    #[test]
    fn test_switch_discards_half_typed_line() {
        let (mut ctl, mut usb, out) = controller();
        usb.deliver(b"sta");
        assert!(ctl.handle_signal(ControlSignal::DataReceived));
        assert!(ctl.handle_signal(ControlSignal::SwitchApp(&LISTENER_APP)));

        usb.deliver(b"t\r");
        assert!(ctl.handle_signal(ControlSignal::DataReceived));
        assert!(!output(ctl.context(), &out).contains("MODE:"));

        usb.deliver(b"stat\r");
        assert!(ctl.handle_signal(ControlSignal::DataReceived));
        assert!(output(ctl.context(), &out).contains("MODE: LISTENER"));
        ctl.shutdown();
    }
}
