//! Console probing
//!
//! Sends `DECA$` to a stream and waits for the `JS`-framed info report a
//! UWB console answers with.

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::DetectError;

/// Identification query, terminated the way a terminal would
pub const INFO_QUERY: &[u8] = b"deca$\r";

/// What a console says about itself
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsoleInfo {
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "Current App")]
    pub current_app: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Apps", default)]
    pub apps: Vec<String>,
}

#[derive(Deserialize)]
struct InfoReply {
    #[serde(rename = "Info")]
    info: ConsoleInfo,
}

/// Configuration for probing
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Time allowed for the whole reply
    pub timeout: Duration,
    /// Delay after opening the port
    pub settle: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            settle: Duration::from_millis(50),
        }
    }
}

/// Find a complete `JS` info reply in `bytes`
///
/// Echo and other output around the reply is skipped.
pub fn parse_info_reply(bytes: &[u8]) -> Option<ConsoleInfo> {
    let mut from = 0;
    while let Some(pos) = bytes[from..].windows(2).position(|w| w == b"JS") {
        let start = from + pos;
        from = start + 2;
        let Some(len) = bytes
            .get(start + 2..start + 6)
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| usize::from_str_radix(hex, 16).ok())
        else {
            continue;
        };
        let Some(body) = bytes.get(start + 6..start + 6 + len) else {
            continue;
        };
        match serde_json::from_slice::<InfoReply>(body) {
            Ok(reply) => return Some(reply.info),
            Err(e) => trace!("JS reply at {} is not an info report: {}", start, e),
        }
    }
    None
}

/// Ask a stream for its info report
pub async fn probe<S>(stream: &mut S, config: &ProbeConfig) -> Option<ConsoleInfo>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = stream.write_all(INFO_QUERY).await {
        warn!("Failed to write info query: {}", e);
        return None;
    }
    let _ = stream.flush().await;

    let deadline = Instant::now() + config.timeout;
    let mut seen = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match timeout(left, stream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                seen.extend_from_slice(&buf[..n]);
                if let Some(found) = parse_info_reply(&seen) {
                    info!("Identified {} running {}", found.device, found.current_app);
                    return Some(found);
                }
            }
            Ok(Err(e)) => {
                trace!("probe read error: {}", e);
                break;
            }
            Err(_) => {
                trace!("probe timeout after {} byte(s)", seen.len());
                break;
            }
        }
    }
    None
}

/// Open a serial port and probe it
pub async fn probe_port(port_name: &str, baud_rate: u32, config: &ProbeConfig) -> Result<ConsoleInfo, DetectError> {
    use tokio_serial::SerialPortBuilderExt;

    debug!("Probing {} at {} baud", port_name, baud_rate);
    let mut stream = tokio_serial::new(port_name, baud_rate)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| DetectError::OpenFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        })?;

    tokio::time::sleep(config.settle).await;
    probe(&mut stream, config)
        .await
        .ok_or_else(|| DetectError::Timeout(port_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "{\"Info\":{\r\n\"Device\":\"DWM3001CDK\",\r\n\"Current App\":\"STOP\",\r\n\"Version\":\"0.11.0\",\r\n\"Build\":\"sim\",\r\n\"Apps\":[\"LISTENER2\",\"UCI\"],\r\n\"Driver\":\"sim 0.11.0\"}}";

    fn reply() -> Vec<u8> {
        format!("JS{:04X}{}\r\nok\r\n", BODY.len(), BODY).into_bytes()
    }

    #[test]
    fn test_parse_reply_after_echo() {
        let mut bytes = b"deca$\r\n".to_vec();
        bytes.extend(reply());
        let info = parse_info_reply(&bytes).unwrap();
        assert_eq!(info.device, "DWM3001CDK");
        assert_eq!(info.current_app, "STOP");
        assert_eq!(info.apps, vec!["LISTENER2", "UCI"]);
    }

    #[test]
    fn test_truncated_reply() {
        let bytes = reply();
        assert!(parse_info_reply(&bytes[..bytes.len() / 2]).is_none());
    }

    #[test]
    fn test_other_js_reply_is_skipped() {
        let other = "{\"AVERAGE\":3}";
        let mut bytes = format!("JS{:04X}{}\r\n", other.len(), other).into_bytes();
        assert!(parse_info_reply(&bytes).is_none());
        bytes.extend(reply());
        assert!(parse_info_reply(&bytes).is_some());
    }

    #[tokio::test]
    async fn test_probe_over_duplex() {
        let (mut host, mut device) = tokio::io::duplex(1024);
        let responder = tokio::spawn(async move {
            let mut query = [0u8; 6];
            device.read_exact(&mut query).await.unwrap();
            assert_eq!(&query, INFO_QUERY);
            device.write_all(&reply()).await.unwrap();
        });

        let info = probe(&mut host, &ProbeConfig::default()).await.unwrap();
        assert_eq!(info.version, "0.11.0");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_silent_peer_times_out() {
        let (mut host, _device) = tokio::io::duplex(64);
        let config = ProbeConfig {
            timeout: Duration::from_millis(20),
            ..ProbeConfig::default()
        };
        assert!(probe(&mut host, &config).await.is_none());
    }
}
