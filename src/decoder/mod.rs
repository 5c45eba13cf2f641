// Decoder module
// Capability traits for the native demux/decode stack
//
// A session talks to the native libraries only through `MediaBackend`:
// 1. open input / read compressed units (Demuxer)
// 2. find decoder by name or by codec, open it (VideoDecoder)
// 3. create hardware device context, transfer hardware pictures to host
// 4. hand out color converters (accelerator + software)

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::ColorConverter;
use crate::session::TransportOptions;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("end of stream")]
    EndOfStream,
    #[error("transient I/O fault: {0}")]
    Transient(String),
    #[error("no video stream found")]
    NoVideoStream,
    #[error("{0}")]
    Failed(String),
}

/// Compressed video formats the session knows how to map to decoder names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
    Mpeg2,
    Mpeg4,
    Mjpeg,
    Other(String),
}

impl CodecKind {
    /// Short codec name, matching the native generic decoder name
    pub fn name(&self) -> &str {
        match self {
            CodecKind::H264 => "h264",
            CodecKind::Hevc => "hevc",
            CodecKind::Vp8 => "vp8",
            CodecKind::Vp9 => "vp9",
            CodecKind::Av1 => "av1",
            CodecKind::Mpeg2 => "mpeg2video",
            CodecKind::Mpeg4 => "mpeg4",
            CodecKind::Mjpeg => "mjpeg",
            CodecKind::Other(name) => name,
        }
    }

    /// Name of the platform hardware decoder for this codec, e.g. `h264_rkmpp`.
    ///
    /// Returns `None` for formats no hardware decoder family covers.
    pub fn hardware_decoder_name(&self, suffix: &str) -> Option<String> {
        let prefix = match self {
            CodecKind::H264 => "h264",
            CodecKind::Hevc => "hevc",
            CodecKind::Vp8 => "vp8",
            CodecKind::Vp9 => "vp9",
            CodecKind::Av1 => "av1",
            CodecKind::Mpeg2 => "mpeg2",
            CodecKind::Mpeg4 => "mpeg4",
            CodecKind::Mjpeg | CodecKind::Other(_) => return None,
        };
        if suffix.is_empty() {
            return None;
        }
        Some(format!("{}_{}", prefix, suffix))
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hardware device families a decoder can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Drm,
    Vaapi,
    Cuda,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Drm => f.write_str("drm"),
            DeviceKind::Vaapi => f.write_str("vaapi"),
            DeviceKind::Cuda => f.write_str("cuda"),
        }
    }
}

/// Host-side pixel layouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelLayout {
    /// Planar 4:2:0 (Y, U, V)
    Yuv420p,
    /// Semi-planar 4:2:0 (Y, interleaved UV)
    Nv12,
    Bgr24,
    Rgb24,
    Gray8,
    /// Anything else, by native name
    Other(String),
}

impl PixelLayout {
    /// Chroma-subsampled planar layouts a 2D accelerator takes as input
    pub fn is_subsampled_yuv(&self) -> bool {
        matches!(self, PixelLayout::Yuv420p | PixelLayout::Nv12)
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelLayout::Yuv420p => f.write_str("yuv420p"),
            PixelLayout::Nv12 => f.write_str("nv12"),
            PixelLayout::Bgr24 => f.write_str("bgr24"),
            PixelLayout::Rgb24 => f.write_str("rgb24"),
            PixelLayout::Gray8 => f.write_str("gray"),
            PixelLayout::Other(name) => f.write_str(name),
        }
    }
}

/// Selected video stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub codec: CodecKind,
    pub width: u32,
    pub height: u32,
}

/// A decoder found in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderInfo {
    pub name: String,
    pub hardware: bool,
}

/// One demuxed packet
pub trait CompressedUnit {
    fn stream_index(&self) -> usize;
}

/// Decoder output, in host or device memory
pub trait Picture {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn layout(&self) -> PixelLayout;

    /// True when the picture lives in device memory and must be transferred
    fn is_hardware(&self) -> bool;

    /// Plane bytes; empty for planes the layout does not have
    fn plane(&self, index: usize) -> &[u8];

    fn stride(&self, index: usize) -> usize;
}

/// Result of asking the decoder for output
#[derive(Debug)]
pub enum Received<P> {
    Picture(P),
    NeedsInput,
}

/// Open input with one selected video stream
pub trait Demuxer {
    type Unit: CompressedUnit;

    fn video_stream(&self) -> &StreamInfo;

    /// Read the next packet; `BackendError::EndOfStream` once exhausted
    fn read_unit(&mut self) -> Result<Self::Unit, BackendError>;
}

/// Open decoder context
pub trait VideoDecoder {
    type Unit: CompressedUnit;
    type Picture: Picture;

    fn submit(&mut self, unit: &Self::Unit) -> Result<(), BackendError>;

    fn receive(&mut self) -> Result<Received<Self::Picture>, BackendError>;
}

/// The whole native stack behind one session
pub trait MediaBackend {
    type Unit: CompressedUnit;
    type Picture: Picture + 'static;
    type Input: Demuxer<Unit = Self::Unit>;
    type Decoder: VideoDecoder<Unit = Self::Unit, Picture = Self::Picture>;
    type Device;

    /// Acquire session-scoped network state
    fn network_init(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Release what `network_init` acquired
    fn network_deinit(&mut self) {}

    /// Open the URL, read stream metadata and select the first video stream
    fn open_input(
        &mut self,
        url: &str,
        transport: &TransportOptions,
    ) -> Result<Self::Input, BackendError>;

    fn find_decoder_by_name(&self, name: &str) -> Option<DecoderInfo>;

    fn find_decoder_for_codec(&self, codec: &CodecKind) -> Option<DecoderInfo>;

    fn create_device(
        &mut self,
        kind: DeviceKind,
        path: Option<&str>,
    ) -> Result<Self::Device, BackendError>;

    fn open_decoder(
        &mut self,
        input: &Self::Input,
        decoder: &DecoderInfo,
        device: Option<&Self::Device>,
        threads: Option<usize>,
    ) -> Result<Self::Decoder, BackendError>;

    fn transfer_to_host(&mut self, picture: &Self::Picture)
        -> Result<Self::Picture, BackendError>;

    /// Hardware color converter, if the platform has one
    fn accelerator(&mut self) -> Option<Box<dyn ColorConverter<Self::Picture>>>;

    fn software_converter(&mut self) -> Box<dyn ColorConverter<Self::Picture>>;
}
