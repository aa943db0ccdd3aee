//! Persisted configuration blocks and engine knobs
//!
//! The configuration blocks mirror what the device keeps in NVM: radio
//! channel parameters, STS key/IV, TX power, RF tuning, diagnostics and
//! comm settings, plus the name of the application to start at boot. They
//! are restored at boot and changed by the service commands.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CtlError;
use crate::txbuf::{DEFAULT_CHUNK_SIZE, DEFAULT_TX_CAPACITY};

/// Radio channel parameters as shown by `UWBCFG`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UwbConfig {
    pub channel: u8,
    pub preamble_length: u16,
    pub pac: u8,
    pub tx_code: u8,
    pub rx_code: u8,
    pub sfd_type: u8,
    pub data_rate: u16,
    pub phr_mode: u8,
    pub phr_rate: u8,
    pub sfd_timeout: u16,
    pub sts_mode: u8,
    pub sts_length: u16,
    pub pdoa_mode: u8,
}

impl Default for UwbConfig {
    fn default() -> Self {
        Self {
            channel: 9,
            preamble_length: 64,
            pac: 8,
            tx_code: 9,
            rx_code: 9,
            sfd_type: 3,
            data_rate: 6810,
            phr_mode: 0,
            phr_rate: 0,
            sfd_timeout: 65,
            sts_mode: 0,
            sts_length: 64,
            pdoa_mode: 0,
        }
    }
}

/// STS key, IV and whether the STS is kept static between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StsConfig {
    /// Most significant word first
    pub key: [u32; 4],
    /// Most significant word first
    pub iv: [u32; 4],
    pub static_sts: u32,
}

impl Default for StsConfig {
    fn default() -> Self {
        Self {
            key: [0x14148674, 0xD1D336AA, 0xF86050A8, 0x14EB220F],
            iv: [0x362EEB34, 0xC44FA8FB, 0xD37EC3CA, 0x1F9A3DE4],
            static_sts: 1,
        }
    }
}

/// Transmitter power settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxPower {
    pub power: u32,
    pub pg_delay: u32,
    pub pg_count: u32,
}

impl Default for TxPower {
    fn default() -> Self {
        Self {
            power: 0xFDFDFDFD,
            pg_delay: 0x34,
            pg_count: 0,
        }
    }
}

/// Antenna fitted to one RF port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AntennaType {
    #[default]
    None,
    Man5,
    CpWing5,
    CpWing9,
    MonaLisa5,
    MonaLisa9,
    Jolie5,
    Jolie9,
    Custom,
}

impl AntennaType {
    pub const ALL: [AntennaType; 9] = [
        AntennaType::None,
        AntennaType::Man5,
        AntennaType::CpWing5,
        AntennaType::CpWing9,
        AntennaType::MonaLisa5,
        AntennaType::MonaLisa9,
        AntennaType::Jolie5,
        AntennaType::Jolie9,
        AntennaType::Custom,
    ];

    /// Console spelling
    pub fn name(&self) -> &'static str {
        match self {
            AntennaType::None => "NONE",
            AntennaType::Man5 => "MAN5",
            AntennaType::CpWing5 => "CPWING5",
            AntennaType::CpWing9 => "CPWING9",
            AntennaType::MonaLisa5 => "MONALISA5",
            AntennaType::MonaLisa9 => "MONALISA9",
            AntennaType::Jolie5 => "JOLIE5",
            AntennaType::Jolie9 => "JOLIE9",
            AntennaType::Custom => "CUSTOM",
        }
    }

    /// Parse the console spelling (already uppercased)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

/// Number of RF ports that carry an antenna
pub const ANTENNA_PORTS: usize = 4;

/// RF tuning block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfTuning {
    pub ant_tx_a: u16,
    pub ant_rx_a: u16,
    pub ant_rx_b: u16,
    /// Bit 7 set means "override the factory trim at app start"
    pub xtal_trim: u8,
    pub pdoa_offset_deg: i16,
    pub pdoa_average: i16,
    pub antennas: [AntennaType; ANTENNA_PORTS],
}

impl Default for RfTuning {
    fn default() -> Self {
        Self {
            ant_tx_a: 16385 / 2,
            ant_rx_a: 16385 / 2,
            ant_rx_b: 16385 / 2,
            xtal_trim: 0x2E,
            pdoa_offset_deg: 0,
            pdoa_average: 1,
            antennas: [
                AntennaType::Jolie5,
                AntennaType::Jolie9,
                AntennaType::None,
                AntennaType::None,
            ],
        }
    }
}

/// Diagnostic output switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub diag_enabled: bool,
}

/// Transport settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    pub uart_enabled: bool,
}

fn default_app_name() -> String {
    "STOP".to_string()
}

/// Everything that survives a reboot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBlocks {
    #[serde(default)]
    pub uwb: UwbConfig,
    #[serde(default)]
    pub sts: StsConfig,
    #[serde(default)]
    pub tx_power: TxPower,
    #[serde(default)]
    pub rf: RfTuning,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub comm: CommConfig,
    /// Application started at boot, by name
    #[serde(default = "default_app_name")]
    pub default_app: String,
}

impl Default for ConfigBlocks {
    fn default() -> Self {
        Self {
            uwb: UwbConfig::default(),
            sts: StsConfig::default(),
            tx_power: TxPower::default(),
            rf: RfTuning::default(),
            debug: DebugConfig::default(),
            comm: CommConfig::default(),
            default_app: default_app_name(),
        }
    }
}

/// Non-volatile storage for [`ConfigBlocks`]
pub trait ConfigStore: Send {
    /// Read the stored blocks, `None` if nothing was ever saved
    fn load(&mut self) -> Result<Option<ConfigBlocks>, CtlError>;

    /// Replace the stored blocks
    fn save(&mut self, blocks: &ConfigBlocks) -> Result<(), CtlError>;
}

/// Pretty-printed JSON file under the user's config directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `$XDG_CONFIG_HOME/uwb-console/config.json`,
    /// falling back to the platform config dir
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("uwb-console").join("config.json"));
            }
        }
        dirs::config_dir().map(|p| p.join("uwb-console").join("config.json"))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<ConfigBlocks>, CtlError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no stored config at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&mut self, blocks: &ConfigBlocks) -> Result<(), CtlError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CtlError::Storage(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(blocks)?;
        std::fs::write(&self.path, json)
            .map_err(|e| CtlError::Storage(format!("cannot write {}: {}", self.path.display(), e)))?;
        info!("configuration saved to {}", self.path.display());
        Ok(())
    }
}

fn default_garbage_timeout_ms() -> u64 {
    100
}

/// Runtime engine knobs (not persisted by the device itself)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Tx ring capacity in bytes (power of two)
    pub tx_capacity: usize,
    /// Largest chunk per transport write
    pub chunk_size: usize,
    /// Silence after which a partial UCI header is discarded
    #[serde(default = "default_garbage_timeout_ms")]
    pub garbage_timeout_ms: u64,
    /// Largest UCI payload accepted
    pub max_uci_payload: usize,
    /// Period of the background flush tick
    pub flush_period_ms: u64,
    /// Device name reported by `HELP` and `DECA$`
    pub project_name: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tx_capacity: DEFAULT_TX_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            garbage_timeout_ms: default_garbage_timeout_ms(),
            max_uci_payload: uwb_wire::uci::DEFAULT_MAX_PAYLOAD,
            flush_period_ms: 20,
            project_name: "DWM3001CDK - DW3_QM33_SDK - FreeRTOS".to_string(),
        }
    }
}

impl ControlConfig {
    pub fn garbage_timeout(&self) -> Duration {
        Duration::from_millis(self.garbage_timeout_ms)
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.flush_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_antenna_names_roundtrip() {
        for ant in AntennaType::ALL {
            assert_eq!(AntennaType::from_name(ant.name()), Some(ant));
        }
        assert_eq!(AntennaType::from_name("DIPOLE"), None);
    }

    #[test]
    fn test_old_file_missing_fields_loads() {
        let blocks: ConfigBlocks = serde_json::from_str(r#"{"comm":{"uart_enabled":true}}"#).unwrap();
        assert!(blocks.comm.uart_enabled);
        assert_eq!(blocks.uwb, UwbConfig::default());
        assert_eq!(blocks.default_app, "STOP");
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("uwb-ctl-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.json");
        let mut store = JsonFileStore::new(&path);
        assert!(store.load().unwrap().is_none());

        let mut blocks = ConfigBlocks::default();
        blocks.default_app = "LISTENER".into();
        blocks.rf.pdoa_offset_deg = -12;
        store.save(&blocks).unwrap();

        assert_eq!(store.load().unwrap(), Some(blocks));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_control_config_defaults() {
        let cfg = ControlConfig::default();
        assert_eq!(cfg.tx_capacity, 0x8000);
        assert_eq!(cfg.garbage_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.max_uci_payload, 255);
    }
}
