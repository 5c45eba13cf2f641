// Hardware capability probe
// Device nodes, kernel modules, hardware decoders, device context, accelerator,
// and optionally the strategy a live session negotiates.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::decoder::{CodecKind, MediaBackend};
use crate::session::{DecodePath, SessionConfig, StreamDecodeSession};

pub const DEVICE_NODES: [&str; 4] = [
    "/dev/mpp_service",
    "/dev/rga",
    "/dev/dri/card0",
    "/dev/dri/renderD128",
];

pub const KERNEL_MODULES: [&str; 5] = ["mpp_service", "rkvdec", "rkvenc", "rga3_core", "rockchipdrm"];

const PROC_MODULES: &str = "/proc/modules";

const PROBED_CODECS: [CodecKind; 5] = [
    CodecKind::H264,
    CodecKind::Hevc,
    CodecKind::Vp8,
    CodecKind::Vp9,
    CodecKind::Av1,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Ready,
    Unreadable,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub path: PathBuf,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecoderReport {
    pub codec: String,
    /// Hardware decoder name that was looked up
    pub name: Option<String>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub url: String,
    pub decoder: Option<String>,
    pub path: Option<DecodePath>,
    pub frame: Option<(u32, u32)>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub nodes: Vec<NodeReport>,
    /// `None` when the module list could not be read
    pub modules: Option<Vec<(String, bool)>>,
    pub decoders: Vec<DecoderReport>,
    pub device: String,
    pub device_error: Option<String>,
    pub accelerator: Option<String>,
    pub session: Option<SessionReport>,
}

impl CapabilityReport {
    /// Hardware decode and hardware conversion both look usable
    pub fn hardware_ready(&self) -> bool {
        self.device_error.is_none()
            && self.accelerator.is_some()
            && self.decoders.iter().any(|d| d.available)
    }
}

pub fn check_node(path: &Path) -> NodeStatus {
    match fs::File::open(path) {
        Ok(_) => NodeStatus::Ready,
        Err(e) if e.kind() == ErrorKind::NotFound => NodeStatus::Missing,
        Err(_) => NodeStatus::Unreadable,
    }
}

pub fn probe_nodes<P: AsRef<Path>>(paths: &[P]) -> Vec<NodeReport> {
    paths
        .iter()
        .map(|p| NodeReport {
            path: p.as_ref().to_path_buf(),
            status: check_node(p.as_ref()),
        })
        .collect()
}

/// Which of `wanted` appear in a `/proc/modules` listing
pub fn loaded_modules(listing: &str, wanted: &[&str]) -> Vec<(String, bool)> {
    let loaded: Vec<&str> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    wanted
        .iter()
        .map(|m| (m.to_string(), loaded.contains(m)))
        .collect()
}

/// Inspect the platform through `backend` without opening a stream
pub fn probe<B: MediaBackend>(backend: &mut B, config: &SessionConfig) -> CapabilityReport {
    let modules = match fs::read_to_string(PROC_MODULES) {
        Ok(listing) => Some(loaded_modules(&listing, &KERNEL_MODULES)),
        Err(e) => {
            log::debug!("Cannot read {}: {}", PROC_MODULES, e);
            None
        }
    };

    let decoders = PROBED_CODECS
        .iter()
        .map(|codec| {
            let name = codec.hardware_decoder_name(&config.hardware_decoder_suffix);
            let available = name
                .as_deref()
                .and_then(|n| backend.find_decoder_by_name(n))
                .is_some();
            DecoderReport {
                codec: codec.to_string(),
                name,
                available,
            }
        })
        .collect();

    let device_error = backend
        .create_device(config.device, config.device_path.as_deref())
        .err()
        .map(|e| e.to_string());

    let accelerator = backend.accelerator().map(|a| a.name().to_string());

    CapabilityReport {
        nodes: probe_nodes(&DEVICE_NODES),
        modules,
        decoders,
        device: config.device.to_string(),
        device_error,
        accelerator,
        session: None,
    }
}

/// Open `url` with a fresh session and decode one frame
pub fn probe_session<B: MediaBackend>(backend: B, config: SessionConfig, url: &str) -> SessionReport {
    let mut session = StreamDecodeSession::new(backend, config);
    let mut report = SessionReport {
        url: url.to_string(),
        decoder: None,
        path: None,
        frame: None,
        error: None,
    };

    if let Err(e) = session.open(url) {
        report.error = Some(e.to_string());
        return report;
    }
    let frame = session.next_frame();
    report.decoder = session.decoder_info().map(|d| d.name.clone());
    report.path = Some(session.decode_path());
    match frame {
        Ok(frame) => report.frame = Some((frame.width(), frame.height())),
        Err(e) => report.error = Some(e.to_string()),
    }
    session.close();
    report
}

fn mark(ok: bool) -> &'static str {
    if ok { "ok" } else { "--" }
}

impl fmt::Display for CapabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device nodes:")?;
        for node in &self.nodes {
            let status = match node.status {
                NodeStatus::Ready => "ok    ready",
                NodeStatus::Unreadable => "--    exists, not readable (check permissions)",
                NodeStatus::Missing => "--    missing",
            };
            writeln!(f, "  {:<22} {}", node.path.display(), status)?;
        }

        match &self.modules {
            Some(modules) => {
                writeln!(f, "Kernel modules:")?;
                for (name, loaded) in modules {
                    writeln!(f, "  {:<22} {}", name, mark(*loaded))?;
                }
            }
            None => writeln!(f, "Kernel modules: unknown")?,
        }

        writeln!(f, "Hardware decoders:")?;
        for decoder in &self.decoders {
            writeln!(
                f,
                "  {:<22} {}",
                decoder.name.as_deref().unwrap_or(&decoder.codec),
                mark(decoder.available)
            )?;
        }

        match &self.device_error {
            None => writeln!(f, "Device context ({}): ok", self.device)?,
            Some(e) => writeln!(f, "Device context ({}): failed: {}", self.device, e)?,
        }
        match &self.accelerator {
            Some(name) => writeln!(f, "Color converter: {}", name)?,
            None => writeln!(f, "Color converter: software only")?,
        }

        if let Some(session) = &self.session {
            writeln!(f, "Test stream {}:", session.url)?;
            if let Some(decoder) = &session.decoder {
                writeln!(f, "  decoder  {}", decoder)?;
            }
            if let Some(path) = session.path {
                writeln!(f, "  strategy {}", path)?;
            }
            if let Some((w, h)) = session.frame {
                writeln!(f, "  frame    {}x{}", w, h)?;
            }
            if let Some(e) = &session.error {
                writeln!(f, "  error    {}", e)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fake::{FakeBackend, Script};

    #[test]
    fn test_node_status() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("mpp_service");
        fs::write(&present, b"").unwrap();
        let missing = dir.path().join("rga");

        let nodes = probe_nodes(&[&present, &missing]);
        assert_eq!(nodes[0].status, NodeStatus::Ready);
        assert_eq!(nodes[1].status, NodeStatus::Missing);
        assert_eq!(nodes[1].path, missing);
    }

    #[test]
    fn test_loaded_modules() {
        let listing = "rga3_core 90112 0 - Live 0x0000000000000000\n\
                       mpp_service 135168 2 rkvdec, Live 0x0000000000000000\n";
        let modules = loaded_modules(listing, &["mpp_service", "rkvdec", "rga3_core"]);
        assert_eq!(
            modules,
            vec![
                ("mpp_service".to_string(), true),
                ("rkvdec".to_string(), false),
                ("rga3_core".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_probe_reports_backend_capabilities() {
        let mut backend = FakeBackend::new(Script {
            device_fails: true,
            ..Script::default()
        });
        let report = probe(&mut backend, &SessionConfig::default());
        assert_eq!(report.decoders.len(), 5);
        assert!(report.decoders.iter().all(|d| d.available));
        assert_eq!(report.decoders[0].name.as_deref(), Some("h264_rkmpp"));
        assert!(report.device_error.as_deref().unwrap().contains("drm"));
        assert_eq!(report.accelerator.as_deref(), Some("fake accelerator"));
        assert!(!report.hardware_ready());

        let text = report.to_string();
        assert!(text.contains("hevc_rkmpp"));
        assert!(text.contains("Device context (drm): failed"));
    }

    #[test]
    fn test_probe_session() {
        let ok = probe_session(FakeBackend::new(Script::default()), SessionConfig::default(), "rtsp://cam/1");
        assert_eq!(ok.decoder.as_deref(), Some("h264_rkmpp"));
        assert_eq!(ok.path, Some(DecodePath::HardwareDecodeHardwareConvert));
        assert_eq!(ok.frame, Some((8, 4)));
        assert!(ok.error.is_none());

        let failed = probe_session(
            FakeBackend::new(Script {
                open_fails: true,
                ..Script::default()
            }),
            SessionConfig::default(),
            "rtsp://cam/2",
        );
        assert!(failed.error.unwrap().contains("rtsp://cam/2"));
        assert!(failed.path.is_none());
    }
}
