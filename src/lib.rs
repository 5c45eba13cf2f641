// RTSP Reader - decoded BGR frames from live RTSP sources
// Main library entry point
//
// create -> `connect(url)` / `StreamDecodeSession::open`
// read -> `StreamDecodeSession::next_frame`
// release -> `StreamDecodeSession::close` (also on drop)

pub mod convert;
pub mod decoder;
pub mod frame;
pub mod monitor;
pub mod probe;
pub mod session;

pub use frame::{BgrFrame, BufferInfo};
pub use monitor::{CameraMonitor, MonitorConfig, compose_grid};
pub use session::{
    DecodePath, SessionConfig, SessionError, SessionState, SessionStats, StreamDecodeSession,
    TransportOptions,
};

#[cfg(feature = "ffmpeg")]
pub use decoder::ffmpeg::FfmpegBackend;

/// Session over the FFmpeg backend
#[cfg(feature = "ffmpeg")]
pub type RtspReader = StreamDecodeSession<FfmpegBackend>;

/// Open `url` with the FFmpeg backend and `config`
#[cfg(feature = "ffmpeg")]
pub fn connect_with(url: &str, config: SessionConfig) -> Result<RtspReader, SessionError> {
    let backend = FfmpegBackend::new().map_err(|e| SessionError::Open {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let mut session = StreamDecodeSession::new(backend, config);
    session.open(url)?;
    Ok(session)
}

/// Open `url` with the FFmpeg backend and default configuration
#[cfg(feature = "ffmpeg")]
pub fn connect(url: &str) -> Result<RtspReader, SessionError> {
    connect_with(url, SessionConfig::default())
}
