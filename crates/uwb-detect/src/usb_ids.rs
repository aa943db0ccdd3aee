//! USB Vendor/Product ID database for UWB dev kits
//!
//! Dev kits show up either through their on-board debug probe, through
//! the radio MCU's own USB CDC port, or behind a generic USB-to-serial
//! adapter wired to the UART header.

use serde::Serialize;

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// SEGGER J-Link on-board probes (virtual COM port)
pub mod segger {
    pub const VID: u16 = 0x1366;

    pub const ALL_PIDS: &[u16] = &[0x0105, 0x1015, 0x1051, 0x1061];
}

/// Nordic nRF52 native USB CDC ACM
pub mod nordic {
    pub const VID: u16 = 0x1915;

    pub const ALL_PIDS: &[u16] = &[0x520F, 0x521A, 0xC00A];
}

/// FTDI
pub mod ftdi {
    pub const VID: u16 = 0x0403;

    pub const ALL_PIDS: &[u16] = &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015];
}

/// Silicon Labs CP210x
pub mod cp210x {
    pub const VID: u16 = 0x10C4;

    pub const ALL_PIDS: &[u16] = &[0xEA60, 0xEA70, 0xEA71];
}

/// WCH CH340/CH341
pub mod ch340 {
    pub const VID: u16 = 0x1A86;

    pub const ALL_PIDS: &[u16] = &[0x7523, 0x5523];
}

/// How likely a port is to carry a UWB console
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PortClassification {
    /// On-board USB of a dev kit
    DevKit,
    /// Generic adapter, possibly wired to the UART header
    KnownAdapter,
    Unknown,
}

/// Dev-kit name for a VID/PID, if it is one
pub fn dev_kit_name(vid: u16, pid: u16) -> Option<&'static str> {
    match vid {
        segger::VID if segger::ALL_PIDS.contains(&pid) => Some("J-Link VCOM"),
        nordic::VID if nordic::ALL_PIDS.contains(&pid) => Some("nRF52 USB CDC"),
        _ => None,
    }
}

/// Adapter family from VID
pub fn adapter_name(vid: u16) -> Option<&'static str> {
    match vid {
        ftdi::VID => Some("FTDI"),
        cp210x::VID => Some("CP210x"),
        ch340::VID => Some("CH340"),
        _ => None,
    }
}

fn is_known_adapter(vid: u16, pid: u16) -> bool {
    match vid {
        ftdi::VID => ftdi::ALL_PIDS.contains(&pid),
        cp210x::VID => cp210x::ALL_PIDS.contains(&pid),
        ch340::VID => ch340::ALL_PIDS.contains(&pid),
        _ => false,
    }
}

/// Classify a port by its USB IDs, with a display hint
pub fn classify_port(vid: Option<u16>, pid: Option<u16>) -> (PortClassification, Option<&'static str>) {
    let (Some(vid), Some(pid)) = (vid, pid) else {
        return (PortClassification::Unknown, None);
    };
    if let Some(name) = dev_kit_name(vid, pid) {
        return (PortClassification::DevKit, Some(name));
    }
    if is_known_adapter(vid, pid) {
        return (PortClassification::KnownAdapter, adapter_name(vid));
    }
    (PortClassification::Unknown, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dev_kit_ports() {
        assert_eq!(
            classify_port(Some(segger::VID), Some(0x1015)),
            (PortClassification::DevKit, Some("J-Link VCOM"))
        );
        assert_eq!(
            classify_port(Some(nordic::VID), Some(0x520F)),
            (PortClassification::DevKit, Some("nRF52 USB CDC"))
        );
    }

    #[test]
    fn test_adapters() {
        assert_eq!(
            classify_port(Some(ftdi::VID), Some(0x6001)),
            (PortClassification::KnownAdapter, Some("FTDI"))
        );
        // right vendor, unknown product
        assert_eq!(classify_port(Some(ftdi::VID), Some(0x1234)).0, PortClassification::Unknown);
    }

    #[test]
    fn test_non_usb_port() {
        assert_eq!(classify_port(None, None), (PortClassification::Unknown, None));
    }

    #[test]
    fn test_dev_kits_sort_first() {
        let mut classes = vec![
            PortClassification::Unknown,
            PortClassification::DevKit,
            PortClassification::KnownAdapter,
        ];
        classes.sort();
        assert_eq!(classes[0], PortClassification::DevKit);
    }

    proptest! {
        #[test]
        fn prop_unlisted_vendors_are_unknown(vid in any::<u16>(), pid in any::<u16>()) {
            prop_assume!(![segger::VID, nordic::VID, ftdi::VID, cp210x::VID, ch340::VID].contains(&vid));
            prop_assert_eq!(classify_port(Some(vid), Some(pid)), (PortClassification::Unknown, None));
        }
    }
}
