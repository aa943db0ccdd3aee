//! UWB Dev-Kit Detection Library
//!
//! This crate enumerates serial ports, classifies them by USB ID and
//! probes them for a UWB console by asking for its `DECA$` report.
//!
//! # Example
//!
//! ```rust,no_run
//! use uwb_detect::PortScanner;
//!
//! let scanner = PortScanner::new();
//! let ports = scanner.enumerate_ports().unwrap();
//!
//! for port in ports {
//!     println!("{} {:?}", port.port, port.classification());
//! }
//! ```

pub mod error;
pub mod probe;
pub mod scanner;
pub mod usb_ids;

pub use error::DetectError;
pub use probe::{parse_info_reply, probe_port, ConsoleInfo, ProbeConfig};
pub use scanner::{PortScanner, ScannerConfig, SerialPortInfo};
pub use usb_ids::{classify_port, PortClassification};
