//! Integration tests for the UWB control plane
//!
//! These tests drive a complete controller over simulated transports and a
//! simulated board:
//! - Command dispatch, permissions and reply formats
//! - Application switches, boot restore and SAVE
//! - Radio-driven output from the listener and FiRa sessions
//! - The UCI pass-through and its in-band STOP/SAVE keywords

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uwb_ctl::config::ConfigBlocks;
use uwb_ctl::flush::drain;
use uwb_ctl::{rx_channel, ControlHandle, Controller, ErrorReporter, Registry, RxSender, SystemContext, TransportKind, TxRing};
use uwb_sim::{MemoryStore, RecordingSink, SimBoard, SimMac, SimRadioConfig, SimRadioHandle};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    const WAIT_LIMIT: Duration = Duration::from_secs(3);

    /// A controller wired to simulated USB and UART links
    pub struct Bench {
        pub controller: Controller,
        pub usb: RxSender,
        pub uart: RxSender,
        pub usb_out: RecordingSink,
        pub uart_out: RecordingSink,
        pub radio: SimRadioHandle,
        pub store: MemoryStore,
        pub tx: Arc<TxRing>,
    }

    impl Bench {
        pub fn new() -> Self {
            Self::with_store(MemoryStore::new())
        }

        pub fn with_store(store: MemoryStore) -> Self {
            let sim = SimBoard::with_config(SimRadioConfig::default(), SimMac::with_period(Duration::from_millis(5)));
            let errors = Arc::new(ErrorReporter::new());
            let tx = Arc::new(TxRing::new(0x4000, 64, Arc::clone(&errors)));
            let usb_out = RecordingSink::new();
            let uart_out = RecordingSink::new();
            tx.set_usb_sink(Some(Box::new(usb_out.clone())));
            tx.set_uart_sink(Some(Box::new(uart_out.clone())));

            let (control, signals) = ControlHandle::channel();
            let (usb, usb_port) = rx_channel(TransportKind::Usb, control.clone(), Arc::clone(&errors));
            let (uart, uart_port) = rx_channel(TransportKind::Uart, control.clone(), Arc::clone(&errors));

            let ctx = SystemContext::new(
                Arc::new(Registry::standard()),
                sim.board.clone(),
                Box::new(store.clone()),
                Arc::clone(&tx),
                errors,
                control,
                Default::default(),
            );
            let controller = Controller::new(ctx, vec![usb_port, uart_port], signals);

            Self {
                controller,
                usb,
                uart,
                usb_out,
                uart_out,
                radio: sim.radio,
                store,
                tx,
            }
        }

        pub fn ctx(&self) -> &SystemContext {
            self.controller.context()
        }

        /// Everything flushed to USB since the last call
        pub fn usb_output(&self) -> String {
            drain(&self.tx);
            self.usb_out.take_string()
        }

        /// Type on the USB link and return what came back
        pub fn type_usb(&mut self, text: &str) -> String {
            self.usb.deliver(text.as_bytes());
            self.controller.drain_signals();
            self.usb_output()
        }

        /// Send raw bytes on the USB link without collecting output
        pub fn send_usb(&mut self, bytes: &[u8]) {
            self.usb.deliver(bytes);
            self.controller.drain_signals();
        }

        pub fn type_uart(&mut self, text: &str) {
            self.uart.deliver(text.as_bytes());
            self.controller.drain_signals();
        }

        /// Keep serving signals and collecting USB output until `needle` shows up
        pub fn wait_for(&mut self, needle: &str) -> String {
            let deadline = Instant::now() + WAIT_LIMIT;
            let mut seen = String::new();
            while Instant::now() < deadline {
                self.controller.drain_signals();
                seen.push_str(&self.usb_output());
                if seen.contains(needle) {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
            seen
        }

        /// Raw USB bytes, waiting until at least `len` arrived
        pub fn wait_for_bytes(&mut self, len: usize) -> Vec<u8> {
            let deadline = Instant::now() + WAIT_LIMIT;
            let mut seen = Vec::new();
            while Instant::now() < deadline {
                self.controller.drain_signals();
                drain(&self.tx);
                seen.extend(self.usb_out.take());
                if seen.len() >= len {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
            seen
        }

        pub fn current(&self) -> &'static str {
            self.ctx().current().name
        }
    }

    impl Drop for Bench {
        fn drop(&mut self) {
            self.controller.shutdown();
        }
    }

    /// Body of the first `JS` reply in `text`, length checked
    pub fn js_body(text: &str) -> Option<&str> {
        let start = text.find("JS")?;
        let len = usize::from_str_radix(text.get(start + 2..start + 6)?, 16).ok()?;
        let body = text.get(start + 6..start + 6 + len)?;
        text.get(start + 6 + len..)?.starts_with("\r\n").then_some(body)
    }
}

use helpers::*;

// ============================================================================
// Dispatch
// ============================================================================

mod dispatch_tests {
    use super::*;

    #[test]
    fn test_typed_command_is_echoed_then_answered() {
        let mut bench = Bench::new();
        let out = bench.type_usb("version\r");
        assert!(out.starts_with("version\r"));
        assert!(out.ends_with(&format!("VERSION:{}\r\nok\r\n", bench.ctx().device.version)));
    }

    #[test]
    fn test_stat_reports_mode_and_info() {
        let mut bench = Bench::new();
        let out = bench.type_usb("stat\r");
        assert!(out.contains("MODE: STOP\r\nLAST ERR CODE: 0\r\nMAX MSG LEN: 0\r\n"));
        let body = js_body(&out).unwrap();
        assert!(body.starts_with("{\"Info\":{"));
        assert!(body.contains("\"Current App\":\"STOP\""));
        assert!(body.contains("\"Apps\":[\"LISTENER2\",\"TCFM\",\"TCWM\",\"RESPF\",\"INITF\",\"UCI\"]"));
        assert!(out.ends_with("}}\r\nok\r\n"));
    }

    #[test]
    fn test_unknown_command_only_echoes() {
        let mut bench = Bench::new();
        assert_eq!(bench.type_usb("frobnicate\r"), "frobnicate\r");
    }

    #[test]
    fn test_json_command() {
        let mut bench = Bench::new();
        let out = bench.type_usb("{\"CMD\":\"PAVRG\",\r\n\"PARAMS\":{}}");
        let body = js_body(&out).unwrap();
        assert!(body.starts_with("{\"AVERAGE\":"));
    }

    #[test]
    fn test_command_split_across_deliveries() {
        let mut bench = Bench::new();
        assert_eq!(bench.type_usb("vers"), "vers");
        let out = bench.type_usb("ion\r");
        assert!(out.contains("VERSION:"));
    }

    #[test]
    fn test_idle_only_command_denied_while_app_runs() {
        let mut bench = Bench::new();
        bench.type_usb("tcwm\r");
        assert_eq!(bench.current(), "TCWM");

        let out = bench.type_usb("xtaltrim 0x10\r");
        assert!(out.ends_with("error  incompatible mode\r\n"));

        // anytime commands still work
        assert!(bench.type_usb("stat\r").contains("MODE: TCWM\r\n"));
    }

    #[test]
    fn test_help_in_idle_lists_every_section() {
        let mut bench = Bench::new();
        let out = bench.type_usb("help\r");
        let anytime = out.find("---- Anytime commands --------\r\n").unwrap();
        let launch = out.find("---- Application selection ---\r\n").unwrap();
        let idle = out.find("---- IDLE time commands -----\r\n").unwrap();
        let service = out.find("---- Service commands --------\r\n").unwrap();
        assert!(anytime < launch && launch < idle && idle < service);
        assert!(out.contains("HELP      ?         STOP      THREAD    \r\n"));
    }

    #[test]
    fn test_help_in_app_shows_anytime_and_submodes() {
        let mut bench = Bench::new();
        bench.type_usb("listener2\r");
        let out = bench.type_usb("help\r");
        assert!(out.contains("---- Anytime commands"));
        assert!(out.contains("LISTENER Options"));
        assert!(out.contains("LSTAT"));
        assert!(!out.contains("---- Service commands"));
    }

    #[test]
    fn test_uart_transport_needs_enable() {
        let mut bench = Bench::new();
        bench.type_uart("version\r");
        drain(&bench.tx);
        assert!(bench.uart_out.is_empty());
        assert!(bench.usb_out.is_empty());

        bench.type_usb("uart 1\r");
        bench.uart_out.take();
        bench.type_uart("version\r");
        drain(&bench.tx);
        let out = bench.uart_out.take_string();
        assert!(out.contains("VERSION:"));
    }
}

// ============================================================================
// Application lifecycle
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_stop_returns_to_idle_and_sleeps_radio() {
        let mut bench = Bench::new();
        bench.type_usb("tcwm\r");
        assert!(bench.radio.state().continuous_wave);

        let out = bench.type_usb("stop\r");
        assert!(out.contains("ok\r\n"));
        assert_eq!(bench.current(), "STOP");
        let state = bench.radio.state();
        assert!(!state.continuous_wave);
        assert!(!state.awake);
    }

    #[test]
    fn test_thread_lists_application_tasks() {
        let mut bench = Bench::new();
        bench.type_usb("listener2\r");
        let out = bench.type_usb("thread\r");
        let body = js_body(&out).unwrap();
        assert!(body.starts_with("{\"Threads\":{\"App\":\"LISTENER\""));
        assert!(body.contains("\"Name\":\"listener\""));

        bench.type_usb("stop\r");
        let out = bench.type_usb("thread\r");
        assert!(js_body(&out).unwrap().contains("\"Tasks\":[]"));
    }

    #[test]
    fn test_save_persists_saveable_app() {
        let mut bench = Bench::new();
        bench.type_usb("initf\r");
        assert_eq!(bench.current(), "INITF");
        bench.type_usb("save\r");
        assert_eq!(bench.store.blocks().unwrap().default_app, "INITF");
        bench.type_usb("stop\r");
    }

    #[test]
    fn test_save_of_unsaveable_app_stores_idle() {
        let mut bench = Bench::new();
        bench.type_usb("tcwm\r");
        bench.type_usb("save\r");
        assert_eq!(bench.store.blocks().unwrap().default_app, "STOP");
    }

    #[test]
    fn test_boot_restores_default_app() {
        let mut blocks = ConfigBlocks::default();
        blocks.default_app = "LISTENER".into();
        let bench = Bench::with_store(MemoryStore::with_blocks(blocks));
        assert_eq!(bench.current(), "LISTENER");
        assert!(bench.radio.state().irq_enabled);
    }

    #[test]
    fn test_failed_radio_start_is_fatal_until_stop() {
        let mut bench = Bench::new();
        bench.radio.set_fail_init(true);
        bench.type_usb("tcwm\r");
        assert_eq!(bench.current(), "TCWM");
        assert!(bench.ctx().errors.is_fatal());
        assert!(bench.type_usb("stat\r").contains("LAST ERR CODE: 8\r\n"));

        bench.radio.set_fail_init(false);
        bench.type_usb("stop\r");
        assert_eq!(bench.current(), "STOP");
    }

    #[test]
    fn test_tcfm_counted_run_returns_to_idle() {
        let mut bench = Bench::new();
        bench.type_usb("tcfm 4 1 12\r");
        let deadline = Instant::now() + Duration::from_secs(3);
        while bench.current() != "STOP" && Instant::now() < deadline {
            bench.controller.drain_signals();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(bench.current(), "STOP");

        let frames = bench.radio.transmitted();
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.len() == 12));
        assert_eq!(&frames[3][1..3], &[4, 0]);
    }

    #[test]
    fn test_restore_resets_configuration() {
        let mut bench = Bench::new();
        bench.type_usb("xtaltrim 0x20\r");
        assert_eq!(bench.ctx().config.rf.xtal_trim, 0x20);
        bench.type_usb("restore\r");
        assert_eq!(bench.ctx().config.rf.xtal_trim, ConfigBlocks::default().rf.xtal_trim);
    }
}

// ============================================================================
// Radio-driven output
// ============================================================================

mod radio_tests {
    use super::*;
    use uwb_ctl::hal::{RxEvent, RxFrame};

    #[test]
    fn test_listener_reports_frames_and_counts() {
        let mut bench = Bench::new();
        bench.type_usb("listener2\r");
        bench.usb_output();

        // the listener task arms the receiver on its own thread
        let deadline = Instant::now() + Duration::from_secs(3);
        while !bench.radio.state().receiving && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        let frame = RxFrame {
            data: vec![0x41, 0x88, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07],
            timestamp: [0x10, 0x20, 0x30, 0x40, 0x50],
            cfo: 0,
            rsl_100: -8_012,
            fsl_100: -8_345,
            sts_ok: None,
        };
        assert!(bench.radio.receive(frame));

        let out = bench.wait_for("\"fsl\"");
        let body = js_body(&out).unwrap();
        assert!(body.starts_with("{\"LSTN\":[41,88,01,02,03,04,+]"));
        assert!(body.contains("\"rsl\":-80.12"));
        assert!(body.contains("\"fsl\":-83.45"));

        bench.radio.inject(RxEvent::CrcError);
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut stats = String::new();
        while Instant::now() < deadline {
            stats = bench.type_usb("lstat\r");
            if stats.contains("\"CRCB\":1") {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(stats.contains("\"CRCG\":1"));
        assert!(stats.contains("\"CRCB\":1"));

        bench.type_usb("stop\r");
        assert!(!bench.radio.state().irq_enabled);
    }

    #[test]
    fn test_fira_session_reports_and_stops() {
        let mut bench = Bench::new();
        let mut out = bench.type_usb("initf 3 2400 200 25 2 77\r");
        assert!(js_body(&out).unwrap().starts_with("{\"FiRa PARAM\":"));
        assert!(out.contains("\"SESSION_ID\":77,\r\n"));
        assert_eq!(bench.current(), "INITF");

        if !out.contains("\"results\"") {
            out.push_str(&bench.wait_for("\"results\""));
        }
        assert!(out.contains("{\"Block\":0, \"results\":[{\"Addr\":\"0x0001\",\"Status\":\"Ok\",\"D_cm\":"));

        // the session reports its end synchronously while stopping
        let out = bench.type_usb("stop\r");
        assert!(out.contains("{\"Session Stopped\":\"Stop request\"}\r\n"));
        assert_eq!(bench.current(), "STOP");
    }

    #[test]
    fn test_pavrg_allowed_during_fira() {
        let mut bench = Bench::new();
        bench.type_usb("respf\r");
        let out = bench.type_usb("pavrg 5\r");
        assert!(!out.contains("incompatible mode"));
        bench.type_usb("stop\r");
    }
}

// ============================================================================
// UCI pass-through
// ============================================================================

mod uci_tests {
    use super::*;

    #[test]
    fn test_uci_device_info_round_trip() {
        let mut bench = Bench::new();
        bench.type_usb("uci\r");
        assert_eq!(bench.current(), "UCI");

        bench.send_usb(&[0x20, 0x02, 0x00, 0x00]);
        let bytes = bench.wait_for_bytes(4 + 22);
        assert_eq!(&bytes[..4], &[0x40, 0x02, 0x00, 22]);
        assert_eq!(&bytes[14..21], b"uwb-sim");
    }

    #[test]
    fn test_uci_packet_split_across_deliveries() {
        let mut bench = Bench::new();
        bench.type_usb("uci\r");
        bench.send_usb(&[0x21, 0x03]);
        bench.send_usb(&[0x00, 0x02, 0xAA]);
        bench.send_usb(&[0xBB]);
        let bytes = bench.wait_for_bytes(6);
        assert_eq!(bytes, vec![0x41, 0x03, 0x00, 0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn test_inband_save_and_stop() {
        let mut bench = Bench::new();
        bench.type_usb("uci\r");
        bench.send_usb(b"save");
        assert_eq!(bench.store.blocks().unwrap().default_app, "UCI");

        bench.send_usb(b"STOP");
        assert_eq!(bench.current(), "STOP");
        assert!(bench.usb_output().contains("Ok\r\n"));

        // text console is back
        assert!(bench.type_usb("version\r").contains("VERSION:"));
    }

    #[test]
    fn test_boot_into_uci() {
        let mut blocks = ConfigBlocks::default();
        blocks.default_app = "UCI".into();
        let mut bench = Bench::with_store(MemoryStore::with_blocks(blocks));
        assert_eq!(bench.current(), "UCI");
        bench.send_usb(&[0x20, 0x02, 0x00, 0x00]);
        assert_eq!(&bench.wait_for_bytes(4)[..2], &[0x40, 0x02]);
    }
}
