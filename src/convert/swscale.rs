//! FFmpeg swscale converter
//!
//! Converts any host pixel format swscale understands into packed BGR24 at
//! the source size. The scaling context is cached and rebuilt only when the
//! source format or dimensions change.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};

use super::{ColorConverter, ConvertError};
use crate::decoder::PixelLayout;
use crate::decoder::ffmpeg::FfmpegPicture;
use crate::decoder::Picture;
use crate::frame::BgrFrame;

struct ScalingCache {
    src_format: Pixel,
    width: u32,
    height: u32,
    context: ScalingContext,
    output: VideoFrame,
}

#[derive(Default)]
pub struct SwsConverter {
    cache: Option<ScalingCache>,
}

impl SwsConverter {
    pub fn new() -> Self {
        Self { cache: None }
    }

    fn scaler_for(
        &mut self,
        frame: &VideoFrame,
        layout: &PixelLayout,
    ) -> Result<&mut ScalingCache, ConvertError> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        let stale = self
            .cache
            .as_ref()
            .is_none_or(|c| c.src_format != format || c.width != width || c.height != height);
        if stale {
            let context = ScalingContext::get(
                format,
                width,
                height,
                Pixel::BGR24,
                width,
                height,
                Flags::BILINEAR,
            )
            .map_err(|e| {
                log::debug!("swscale rejected {:?} {}x{}: {}", format, width, height, e);
                ConvertError::UnsupportedFormat(layout.clone())
            })?;
            self.cache = Some(ScalingCache {
                src_format: format,
                width,
                height,
                context,
                output: VideoFrame::new(Pixel::BGR24, width, height),
            });
        }
        self.cache
            .as_mut()
            .ok_or_else(|| ConvertError::Failed("scaling context missing".to_string()))
    }
}

impl ColorConverter<FfmpegPicture> for SwsConverter {
    fn name(&self) -> &str {
        "swscale (Software)"
    }

    fn accepts(&self, _layout: &PixelLayout) -> bool {
        true
    }

    fn convert(&mut self, picture: &FfmpegPicture, out: &mut BgrFrame) -> Result<(), ConvertError> {
        let layout = picture.layout();
        let cache = self.scaler_for(picture.frame(), &layout)?;
        cache
            .context
            .run(picture.frame(), &mut cache.output)
            .map_err(|e: ffmpeg::Error| ConvertError::Failed(e.to_string()))?;

        if !out.copy_from_strided(cache.output.data(0), cache.output.stride(0)) {
            return Err(ConvertError::Failed(format!(
                "swscale output {}x{} does not fit {}x{} frame",
                cache.output.width(),
                cache.output.height(),
                out.width(),
                out.height()
            )));
        }
        Ok(())
    }
}
