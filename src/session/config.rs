use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decoder::DeviceKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// RTSP lower transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Interleaved over the RTSP TCP connection
    Tcp,
    Udp,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

/// Low-latency input options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    pub transport: Transport,
    /// Frames buffered by the demuxer before delivery; 1 disables buffering
    pub receive_buffer_frames: u32,
    pub max_reorder_delay_us: u64,
    pub reorder_queue_size: u32,
    /// Socket I/O timeout; a read blocked longer than this fails with a transient error
    pub timeout_ms: Option<u64>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            receive_buffer_frames: 1,
            max_reorder_delay_us: 0,
            reorder_queue_size: 1,
            timeout_ms: Some(5_000),
        }
    }
}

impl TransportOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Key/value pairs for the FFmpeg input dictionary
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("rtsp_transport", self.transport.as_str().to_string())];
        if self.receive_buffer_frames <= 1 {
            pairs.push(("fflags", "nobuffer".to_string()));
            pairs.push(("flags", "low_delay".to_string()));
        }
        pairs.push(("max_delay", self.max_reorder_delay_us.to_string()));
        pairs.push(("reorder_queue_size", self.reorder_queue_size.to_string()));
        if let Some(timeout) = self.timeout_ms {
            // microseconds
            pairs.push(("timeout", (timeout * 1_000).to_string()));
        }
        pairs
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub transport: TransportOptions,
    pub prefer_hardware_decode: bool,
    pub prefer_hardware_convert: bool,
    /// Appended to the codec name to form the hardware decoder name
    pub hardware_decoder_suffix: String,
    pub device: DeviceKind,
    /// Device node, e.g. `/dev/dri/renderD128`; backend default if unset
    pub device_path: Option<String>,
    /// Decoder thread count; backend default if unset
    pub decoder_threads: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportOptions::default(),
            prefer_hardware_decode: true,
            prefer_hardware_convert: true,
            hardware_decoder_suffix: "rkmpp".to_string(),
            device: DeviceKind::Drm,
            device_path: None,
            decoder_threads: None,
        }
    }
}

impl SessionConfig {
    /// Software decode and software conversion only
    pub fn software_only() -> Self {
        Self {
            prefer_hardware_decode: false,
            prefer_hardware_convert: false,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_pairs() {
        let pairs = TransportOptions::default().to_pairs();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("rtsp_transport"), Some("tcp"));
        assert_eq!(get("fflags"), Some("nobuffer"));
        assert_eq!(get("max_delay"), Some("0"));
        assert_eq!(get("reorder_queue_size"), Some("1"));
        assert_eq!(get("timeout"), Some("5000000"));
    }

    #[test]
    fn test_buffered_udp_pairs() {
        let options = TransportOptions {
            transport: Transport::Udp,
            receive_buffer_frames: 8,
            timeout_ms: None,
            ..TransportOptions::default()
        };
        let pairs = options.to_pairs();
        assert!(pairs.contains(&("rtsp_transport", "udp".to_string())));
        assert!(!pairs.iter().any(|(k, _)| *k == "fflags" || *k == "timeout"));
        assert_eq!(options.timeout(), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{ "prefer_hardware_convert": false, "device": "vaapi", "transport": { "timeout_ms": 250 } }"#,
        )
        .unwrap();
        assert!(config.prefer_hardware_decode);
        assert!(!config.prefer_hardware_convert);
        assert_eq!(config.device, DeviceKind::Vaapi);
        assert_eq!(config.hardware_decoder_suffix, "rkmpp");
        assert_eq!(config.transport.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.transport.reorder_queue_size, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{}", serde_json::to_string(&SessionConfig::software_only()).unwrap()).unwrap();
        drop(file);

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config, SessionConfig::software_only());

        assert!(matches!(
            SessionConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SessionConfig::load(&path), Err(ConfigError::Json(_))));
    }
}
