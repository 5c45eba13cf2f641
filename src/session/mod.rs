// Stream decode session
// One RTSP source -> one BGR frame per call
//
// Strategy negotiation at open, each step degrading on failure:
// 1. Hardware decoder (<codec>_<suffix>) with a hardware device context
// 2. Hardware color conversion (2D accelerator)
// 3. Generic software decoder + software color conversion
//
// Demotion is permanent for the open session and never surfaces as an error.

mod config;
mod path;

pub use config::{ConfigError, SessionConfig, Transport, TransportOptions};
pub use path::DecodePath;

use serde::Serialize;
use thiserror::Error;

use crate::convert::{ColorConverter, ConvertError};
use crate::decoder::{
    BackendError, CompressedUnit, DecoderInfo, Demuxer, MediaBackend, Picture, Received,
    StreamInfo, VideoDecoder,
};
use crate::frame::BgrFrame;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to open {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("no decoder for codec {codec} ({url})")]
    UnsupportedCodec { url: String, codec: String },
    #[error("failed to open decoder {decoder}: {reason}")]
    DecoderOpen { decoder: String, reason: String },
    #[error("read error on {url}: {reason}")]
    Read { url: String, reason: String },
    #[error("end of stream: {url}")]
    EndOfStream { url: String },
    #[error("decode error on {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("unsupported pixel format {format} on {url}")]
    UnsupportedFormat { url: String, format: String },
    #[error("color conversion failed on {url}: {reason}")]
    Conversion { url: String, reason: String },
    #[error("session is not open")]
    NotOpen,
}

impl SessionError {
    /// The session stays open and the next read may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, SessionError::Read { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub units_read: u64,
    /// Units of other streams
    pub units_discarded: u64,
    pub submissions_rejected: u64,
    pub transfers: u64,
    pub hardware_conversions: u64,
    pub software_conversions: u64,
    pub demotions: u64,
}

pub struct StreamDecodeSession<B: MediaBackend> {
    backend: B,
    config: SessionConfig,
    url: Option<String>,
    state: SessionState,
    path: DecodePath,
    network_ready: bool,

    // Released in declaration order by `release`
    decoder: Option<B::Decoder>,
    input: Option<B::Input>,
    device: Option<B::Device>,

    stream: Option<StreamInfo>,
    decoder_info: Option<DecoderInfo>,
    accelerator: Option<Box<dyn ColorConverter<B::Picture>>>,
    software: Option<Box<dyn ColorConverter<B::Picture>>>,
    /// Last call produced a picture; the decoder may hold more
    drain_pending: bool,
    stats: SessionStats,
}

impl<B: MediaBackend> StreamDecodeSession<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            url: None,
            state: SessionState::Unopened,
            path: DecodePath::default(),
            network_ready: false,
            decoder: None,
            input: None,
            device: None,
            stream: None,
            decoder_info: None,
            accelerator: None,
            software: None,
            drain_pending: false,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn decode_path(&self) -> DecodePath {
        self.path
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream.as_ref()
    }

    pub fn decoder_info(&self) -> Option<&DecoderInfo> {
        self.decoder_info.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Open `url` and negotiate the fastest available strategy.
    ///
    /// On an already opened or closed session the old resources are released
    /// first, so close + open and a bare reopen both reconnect.
    pub fn open(&mut self, url: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Unopened {
            self.release();
        }
        self.url = Some(url.to_string());
        self.stream = None;
        self.decoder_info = None;
        self.path = DecodePath::default();
        self.stats = SessionStats::default();
        self.drain_pending = false;

        match self.negotiate(url) {
            Ok(()) => {
                self.state = SessionState::Open;
                Ok(())
            }
            Err(e) => {
                self.release();
                self.state = SessionState::Unopened;
                Err(e)
            }
        }
    }

    fn negotiate(&mut self, url: &str) -> Result<(), SessionError> {
        let open_error = |e: BackendError| SessionError::Open {
            url: url.to_string(),
            reason: e.to_string(),
        };

        if !self.network_ready {
            self.backend.network_init().map_err(open_error)?;
            self.network_ready = true;
        }

        let input = self
            .backend
            .open_input(url, &self.config.transport)
            .map_err(open_error)?;
        let stream = input.video_stream().clone();
        self.input = Some(input);
        self.stream = Some(stream.clone());

        let mut selected = self.select_decoder(url, &stream)?;

        if selected.hardware {
            match self
                .backend
                .create_device(self.config.device, self.config.device_path.as_deref())
            {
                Ok(device) => self.device = Some(device),
                Err(e) => {
                    self.demote(
                        DecodePath::SoftwareDecodeSoftwareConvert,
                        &format!("{} device context unavailable: {}", self.config.device, e),
                    );
                    match self.backend.find_decoder_for_codec(&stream.codec) {
                        Some(generic) => selected = generic,
                        None => log::warn!(
                            "No generic {} decoder, keeping {} without a device context",
                            stream.codec,
                            selected.name
                        ),
                    }
                }
            }
        }

        let decoder = self.open_decoder(&stream, selected)?;
        self.decoder = Some(decoder);

        self.software = Some(self.backend.software_converter());
        if self.path.hardware_convert() && self.config.prefer_hardware_convert {
            self.accelerator = self.backend.accelerator();
            if self.accelerator.is_none() {
                log::info!("No hardware color converter available");
            }
        }
        if self.accelerator.is_none() {
            self.path.demote_to(DecodePath::HardwareDecodeSoftwareConvert);
        }

        let decoder_name = self.decoder_info.as_ref().map_or("?", |d| d.name.as_str());
        let converter = match (&self.accelerator, &self.software) {
            (Some(a), _) => a.name(),
            (None, Some(s)) => s.name(),
            (None, None) => "none",
        };
        log::info!(
            "Opened {}: {} {}x{}, decoder {}, converter {}, strategy: {}",
            url,
            stream.codec,
            stream.width,
            stream.height,
            decoder_name,
            converter,
            self.path
        );
        Ok(())
    }

    /// Hardware decoder by name if preferred, else the generic one
    fn select_decoder(&mut self, url: &str, stream: &StreamInfo) -> Result<DecoderInfo, SessionError> {
        if self.config.prefer_hardware_decode {
            match stream
                .codec
                .hardware_decoder_name(&self.config.hardware_decoder_suffix)
            {
                Some(name) => match self.backend.find_decoder_by_name(&name) {
                    Some(info) => return Ok(info),
                    None => log::info!("Hardware decoder {} not available", name),
                },
                None => log::info!("No hardware decoder family covers {}", stream.codec),
            }
        }

        let generic = self
            .backend
            .find_decoder_for_codec(&stream.codec)
            .ok_or_else(|| SessionError::UnsupportedCodec {
                url: url.to_string(),
                codec: stream.codec.to_string(),
            })?;
        self.path.demote_to(DecodePath::SoftwareDecodeSoftwareConvert);
        Ok(generic)
    }

    /// Open `selected`, replacing a failing hardware decoder with the generic one
    fn open_decoder(
        &mut self,
        stream: &StreamInfo,
        selected: DecoderInfo,
    ) -> Result<B::Decoder, SessionError> {
        let threads = self.config.decoder_threads;
        let input = self.input.as_ref().ok_or(SessionError::NotOpen)?;
        let first = self
            .backend
            .open_decoder(input, &selected, self.device.as_ref(), threads);

        let error = match first {
            Ok(decoder) => {
                self.decoder_info = Some(selected);
                return Ok(decoder);
            }
            Err(e) => e,
        };
        let decoder_open = |info: &DecoderInfo, e: BackendError| SessionError::DecoderOpen {
            decoder: info.name.clone(),
            reason: e.to_string(),
        };
        if !selected.hardware {
            return Err(decoder_open(&selected, error));
        }

        let generic = match self.backend.find_decoder_for_codec(&stream.codec) {
            Some(generic) if !generic.hardware => generic,
            _ => return Err(decoder_open(&selected, error)),
        };
        self.demote(
            DecodePath::SoftwareDecodeSoftwareConvert,
            &format!("hardware decoder {} failed to open: {}", selected.name, error),
        );
        self.device = None;

        let input = self.input.as_ref().ok_or(SessionError::NotOpen)?;
        let decoder = self
            .backend
            .open_decoder(input, &generic, None, threads)
            .map_err(|e| decoder_open(&generic, e))?;
        self.decoder_info = Some(generic);
        Ok(decoder)
    }

    fn demote(&mut self, target: DecodePath, reason: &str) {
        if self.path.demote_to(target) {
            self.stats.demotions += 1;
            log::warn!(
                "{}: {}; falling back to {}",
                self.url.as_deref().unwrap_or("?"),
                reason,
                self.path
            );
        }
    }

    fn url_string(&self) -> String {
        self.url.clone().unwrap_or_default()
    }

    /// Read, decode and convert until one frame is ready
    pub fn next_frame(&mut self) -> Result<BgrFrame, SessionError> {
        if self.state != SessionState::Open {
            return Err(SessionError::NotOpen);
        }

        if self.drain_pending {
            self.drain_pending = false;
            if let Some(picture) = self.receive()? {
                if let Some(frame) = self.deliver(picture)? {
                    self.drain_pending = true;
                    return Ok(frame);
                }
            }
        }

        let stream_index = self
            .stream
            .as_ref()
            .map(|s| s.index)
            .ok_or(SessionError::NotOpen)?;

        loop {
            let unit = self.read_unit()?;
            self.stats.units_read += 1;

            if unit.stream_index() != stream_index {
                self.stats.units_discarded += 1;
                log::debug!("Discarding unit on stream #{}", unit.stream_index());
                continue;
            }

            let submitted = self.decoder_mut()?.submit(&unit);
            drop(unit);
            if let Err(e) = submitted {
                self.stats.submissions_rejected += 1;
                log::debug!("Decoder rejected unit: {}", e);
                continue;
            }

            let Some(picture) = self.receive()? else {
                continue;
            };
            if let Some(frame) = self.deliver(picture)? {
                self.drain_pending = true;
                return Ok(frame);
            }
        }
    }

    fn read_unit(&mut self) -> Result<B::Unit, SessionError> {
        let input = self.input.as_mut().ok_or(SessionError::NotOpen)?;
        match input.read_unit() {
            Ok(unit) => Ok(unit),
            Err(BackendError::Transient(reason)) => Err(SessionError::Read {
                url: self.url_string(),
                reason,
            }),
            Err(BackendError::EndOfStream) => Err(SessionError::EndOfStream {
                url: self.url_string(),
            }),
            Err(e) => {
                log::debug!("Read failed, treating as end of stream: {}", e);
                Err(SessionError::EndOfStream {
                    url: self.url_string(),
                })
            }
        }
    }

    fn decoder_mut(&mut self) -> Result<&mut B::Decoder, SessionError> {
        match self.decoder.as_mut() {
            Some(decoder) => Ok(decoder),
            None => Err(SessionError::Decode {
                url: self.url.clone().unwrap_or_default(),
                reason: "no decoder".to_string(),
            }),
        }
    }

    fn receive(&mut self) -> Result<Option<B::Picture>, SessionError> {
        let received = self.decoder_mut()?.receive();
        match received {
            Ok(Received::Picture(picture)) => Ok(Some(picture)),
            Ok(Received::NeedsInput) => Ok(None),
            Err(e) => Err(SessionError::Decode {
                url: self.url_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Convert one decoded picture; `None` when the read loop has to restart
    fn deliver(&mut self, picture: B::Picture) -> Result<Option<BgrFrame>, SessionError> {
        let host = if picture.is_hardware() {
            let transferred = self.backend.transfer_to_host(&picture);
            drop(picture);
            match transferred {
                Ok(host) => {
                    self.stats.transfers += 1;
                    host
                }
                Err(e) => {
                    self.fall_back_to_software_decode(e)?;
                    return Ok(None);
                }
            }
        } else {
            picture
        };

        let frame = self.convert(&host)?;
        self.stats.frames += 1;
        Ok(Some(frame))
    }

    /// Swap the hardware decoder for the generic one after a transfer failure
    fn fall_back_to_software_decode(&mut self, cause: BackendError) -> Result<(), SessionError> {
        self.demote(
            DecodePath::SoftwareDecodeSoftwareConvert,
            &format!("hardware frame transfer failed: {}", cause),
        );
        self.accelerator = None;
        self.drain_pending = false;

        let codec = self
            .stream
            .as_ref()
            .map(|s| s.codec.clone())
            .ok_or(SessionError::NotOpen)?;
        let decode_error = |url: String, reason: String| SessionError::Decode { url, reason };
        let generic = match self.backend.find_decoder_for_codec(&codec) {
            Some(generic) if !generic.hardware => generic,
            _ => {
                return Err(decode_error(
                    self.url_string(),
                    format!("hardware transfer failed ({}) and no software {} decoder", cause, codec),
                ));
            }
        };

        let input = self.input.as_ref().ok_or(SessionError::NotOpen)?;
        let opened = self
            .backend
            .open_decoder(input, &generic, None, self.config.decoder_threads);
        match opened {
            Ok(decoder) => {
                log::info!("Switched to software decoder {}", generic.name);
                // Hardware decoder before its device
                self.decoder = Some(decoder);
                self.device = None;
                self.decoder_info = Some(generic);
                Ok(())
            }
            // Keep the hardware decoder so later calls can still transfer
            Err(e) => Err(decode_error(
                self.url_string(),
                format!("failed to open software decoder {}: {}", generic.name, e),
            )),
        }
    }

    fn convert(&mut self, picture: &B::Picture) -> Result<BgrFrame, SessionError> {
        let mut out = BgrFrame::new(picture.width(), picture.height());
        let layout = picture.layout();

        if self.path.hardware_convert() {
            let attempt = match self.accelerator.as_mut() {
                Some(accelerator) if accelerator.accepts(&layout) => {
                    Some(accelerator.convert(picture, &mut out))
                }
                _ => None,
            };
            match attempt {
                Some(Ok(())) => {
                    self.stats.hardware_conversions += 1;
                    return Ok(out);
                }
                Some(Err(e)) => {
                    self.accelerator = None;
                    self.demote(
                        DecodePath::HardwareDecodeSoftwareConvert,
                        &format!("hardware color conversion failed: {}", e),
                    );
                }
                None => {}
            }
        }

        let url = self.url_string();
        let software = self.software.as_mut().ok_or(SessionError::NotOpen)?;
        software.convert(picture, &mut out).map_err(|e| match e {
            ConvertError::UnsupportedFormat(format) => SessionError::UnsupportedFormat {
                url,
                format: format.to_string(),
            },
            ConvertError::Failed(reason) => SessionError::Conversion { url, reason },
        })?;
        self.stats.software_conversions += 1;
        Ok(out)
    }

    /// Release everything and move to `Closed`. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.release();
        self.state = SessionState::Closed;
    }

    fn release(&mut self) {
        let had_resources = self.decoder.is_some() || self.input.is_some();
        // decoder -> input -> device -> network
        drop(self.decoder.take());
        drop(self.input.take());
        drop(self.device.take());
        self.accelerator = None;
        self.software = None;
        self.drain_pending = false;
        if self.network_ready {
            self.backend.network_deinit();
            self.network_ready = false;
        }
        if had_resources {
            log::debug!("Released session resources for {}", self.url.as_deref().unwrap_or("?"));
        }
    }
}

impl<B: MediaBackend> Drop for StreamDecodeSession<B> {
    fn drop(&mut self) {
        self.release();
    }
}
