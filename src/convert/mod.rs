// Color conversion module
// Decoded picture -> packed BGR24, hardware accelerator with software fallback
//
// Providers:
// 1. RGA 2D accelerator (feature "rga")
// 2. FFmpeg swscale (feature "ffmpeg")
// 3. Pure Rust BT.601 converter, for host layouts swscale rejects

pub mod cpu;

#[cfg(feature = "ffmpeg")]
pub mod swscale;

#[cfg(feature = "rga")]
pub mod rga;

pub use cpu::{CpuConverter, CpuFallback};

use thiserror::Error;

use crate::decoder::PixelLayout;
use crate::frame::BgrFrame;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(PixelLayout),
    #[error("conversion failed: {0}")]
    Failed(String),
}

/// Color converter trait
///
/// `out` is pre-allocated with the picture's dimensions; converters never scale.
pub trait ColorConverter<P: ?Sized> {
    /// Get converter info
    fn name(&self) -> &str;

    /// Whether this converter takes pictures in `layout`
    fn accepts(&self, layout: &PixelLayout) -> bool;

    fn convert(&mut self, picture: &P, out: &mut BgrFrame) -> Result<(), ConvertError>;
}
