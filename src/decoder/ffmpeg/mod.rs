//! FFmpeg-based demux/decode backend
//!
//! Uses FFmpeg for:
//! - RTSP input and stream selection (libavformat)
//! - decoder lookup by name (`h264_rkmpp`, ...) or by codec id
//! - hardware device contexts and hardware frame transfer (libavutil)
//! - software color conversion (swscale, see `convert::swscale`)

pub mod device;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::Context;
use ffmpeg_next::codec::Id;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::media::Type as MediaType;
use ffmpeg_next::util::error::{EAGAIN, EINTR, ETIMEDOUT};
use ffmpeg_next::{Dictionary, Packet};
use once_cell::sync::OnceCell;

use crate::convert::{ColorConverter, CpuFallback};
use crate::convert::swscale::SwsConverter;
use crate::decoder::{
    BackendError, CodecKind, CompressedUnit, DecoderInfo, Demuxer, DeviceKind, MediaBackend,
    Picture, PixelLayout, Received, StreamInfo, VideoDecoder,
};
use crate::session::TransportOptions;

pub use device::HwDeviceContext;

static FFMPEG_INIT: OnceCell<()> = OnceCell::new();

/// Initialize FFmpeg (once per process)
pub fn init_ffmpeg() -> Result<(), BackendError> {
    FFMPEG_INIT
        .get_or_try_init(|| {
            ffmpeg::init()
                .map_err(|e| BackendError::Failed(format!("failed to initialize FFmpeg: {}", e)))?;
            // FFmpeg's own logging is noisy on lossy RTSP links
            if cfg!(debug_assertions) {
                ffmpeg::log::set_level(ffmpeg::log::Level::Warning);
            } else {
                ffmpeg::log::set_level(ffmpeg::log::Level::Error);
            }
            Ok::<(), BackendError>(())
        })
        .map(|_| ())
}

fn codec_kind(id: Id) -> CodecKind {
    match id {
        Id::H264 => CodecKind::H264,
        Id::HEVC => CodecKind::Hevc,
        Id::VP8 => CodecKind::Vp8,
        Id::VP9 => CodecKind::Vp9,
        Id::AV1 => CodecKind::Av1,
        Id::MPEG2VIDEO => CodecKind::Mpeg2,
        Id::MPEG4 => CodecKind::Mpeg4,
        Id::MJPEG => CodecKind::Mjpeg,
        other => CodecKind::Other(format!("{:?}", other).to_lowercase()),
    }
}

fn codec_id(kind: &CodecKind) -> Option<Id> {
    match kind {
        CodecKind::H264 => Some(Id::H264),
        CodecKind::Hevc => Some(Id::HEVC),
        CodecKind::Vp8 => Some(Id::VP8),
        CodecKind::Vp9 => Some(Id::VP9),
        CodecKind::Av1 => Some(Id::AV1),
        CodecKind::Mpeg2 => Some(Id::MPEG2VIDEO),
        CodecKind::Mpeg4 => Some(Id::MPEG4),
        CodecKind::Mjpeg => Some(Id::MJPEG),
        CodecKind::Other(_) => None,
    }
}

fn pixel_layout(format: Pixel) -> PixelLayout {
    match format {
        Pixel::YUV420P | Pixel::YUVJ420P => PixelLayout::Yuv420p,
        Pixel::NV12 => PixelLayout::Nv12,
        Pixel::BGR24 => PixelLayout::Bgr24,
        Pixel::RGB24 => PixelLayout::Rgb24,
        Pixel::GRAY8 => PixelLayout::Gray8,
        other => PixelLayout::Other(format!("{:?}", other).to_lowercase()),
    }
}

impl CompressedUnit for Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }
}

/// Decoded FFmpeg frame
pub struct FfmpegPicture(VideoFrame);

impl FfmpegPicture {
    pub fn frame(&self) -> &VideoFrame {
        &self.0
    }
}

impl Picture for FfmpegPicture {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn layout(&self) -> PixelLayout {
        pixel_layout(self.0.format())
    }

    fn is_hardware(&self) -> bool {
        device::is_hw_pixel_format(self.0.format())
    }

    fn plane(&self, index: usize) -> &[u8] {
        if self.is_hardware() || index >= self.0.planes() {
            return &[];
        }
        self.0.data(index)
    }

    fn stride(&self, index: usize) -> usize {
        if index >= self.0.planes() {
            return 0;
        }
        self.0.stride(index)
    }
}

/// Open RTSP input with the selected video stream
pub struct FfmpegInput {
    context: Input,
    stream: StreamInfo,
}

impl Demuxer for FfmpegInput {
    type Unit = Packet;

    fn video_stream(&self) -> &StreamInfo {
        &self.stream
    }

    fn read_unit(&mut self) -> Result<Packet, BackendError> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.context) {
            Ok(()) => Ok(packet),
            Err(ffmpeg::Error::Eof) => Err(BackendError::EndOfStream),
            Err(ffmpeg::Error::Other { errno }) if matches!(errno, EAGAIN | EINTR | ETIMEDOUT) => {
                Err(BackendError::Transient(ffmpeg::Error::Other { errno }.to_string()))
            }
            Err(e) => Err(BackendError::Failed(e.to_string())),
        }
    }
}

/// Open FFmpeg decoder context
pub struct FfmpegDecoder {
    decoder: ffmpeg::decoder::Video,
}

impl VideoDecoder for FfmpegDecoder {
    type Unit = Packet;
    type Picture = FfmpegPicture;

    fn submit(&mut self, unit: &Packet) -> Result<(), BackendError> {
        self.decoder
            .send_packet(unit)
            .map_err(|e| BackendError::Failed(format!("send_packet: {}", e)))
    }

    fn receive(&mut self) -> Result<Received<FfmpegPicture>, BackendError> {
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Received::Picture(FfmpegPicture(frame))),
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => Ok(Received::NeedsInput),
            Err(ffmpeg::Error::Eof) => Ok(Received::NeedsInput),
            Err(e) => Err(BackendError::Failed(format!("receive_frame: {}", e))),
        }
    }
}

/// FFmpeg backend
#[derive(Default)]
pub struct FfmpegBackend {
    network_ready: bool,
}

impl FfmpegBackend {
    pub fn new() -> Result<Self, BackendError> {
        init_ffmpeg()?;
        Ok(Self {
            network_ready: false,
        })
    }
}

impl MediaBackend for FfmpegBackend {
    type Unit = Packet;
    type Picture = FfmpegPicture;
    type Input = FfmpegInput;
    type Decoder = FfmpegDecoder;
    type Device = HwDeviceContext;

    fn network_init(&mut self) -> Result<(), BackendError> {
        if !self.network_ready {
            ffmpeg::format::network::init();
            self.network_ready = true;
        }
        Ok(())
    }

    fn network_deinit(&mut self) {
        if self.network_ready {
            ffmpeg::format::network::deinit();
            self.network_ready = false;
        }
    }

    fn open_input(
        &mut self,
        url: &str,
        transport: &TransportOptions,
    ) -> Result<FfmpegInput, BackendError> {
        let mut options = Dictionary::new();
        for (key, value) in transport.to_pairs() {
            options.set(key, &value);
        }

        // Opens the input and reads stream info
        let context = ffmpeg::format::input_with_dictionary(url, options)
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        let stream = context
            .streams()
            .find(|s| s.parameters().medium() == MediaType::Video)
            .ok_or(BackendError::NoVideoStream)?;
        let parameters = stream.parameters();
        let (width, height) = unsafe {
            let raw = parameters.as_ptr();
            ((*raw).width.max(0) as u32, (*raw).height.max(0) as u32)
        };
        let info = StreamInfo {
            index: stream.index(),
            codec: codec_kind(parameters.id()),
            width,
            height,
        };

        log::info!(
            "Opened {}: stream #{} {} {}x{}",
            url,
            info.index,
            info.codec,
            info.width,
            info.height
        );

        Ok(FfmpegInput {
            context,
            stream: info,
        })
    }

    fn find_decoder_by_name(&self, name: &str) -> Option<DecoderInfo> {
        ffmpeg::decoder::find_by_name(name).map(|codec| DecoderInfo {
            name: codec.name().to_string(),
            hardware: true,
        })
    }

    fn find_decoder_for_codec(&self, codec: &CodecKind) -> Option<DecoderInfo> {
        let found = match codec_id(codec) {
            Some(id) => ffmpeg::decoder::find(id),
            None => ffmpeg::decoder::find_by_name(codec.name()),
        };
        found.map(|c| DecoderInfo {
            name: c.name().to_string(),
            hardware: false,
        })
    }

    fn create_device(
        &mut self,
        kind: DeviceKind,
        path: Option<&str>,
    ) -> Result<HwDeviceContext, BackendError> {
        HwDeviceContext::create(kind, path)
    }

    fn open_decoder(
        &mut self,
        input: &FfmpegInput,
        decoder: &DecoderInfo,
        device: Option<&HwDeviceContext>,
        threads: Option<usize>,
    ) -> Result<FfmpegDecoder, BackendError> {
        let codec = ffmpeg::decoder::find_by_name(&decoder.name)
            .ok_or_else(|| BackendError::Failed(format!("decoder {} not found", decoder.name)))?;
        let stream = input
            .context
            .stream(input.stream.index)
            .ok_or_else(|| BackendError::Failed("video stream missing".to_string()))?;

        let mut context = Context::from_parameters(stream.parameters())
            .map_err(|e| BackendError::Failed(format!("failed to copy codec parameters: {}", e)))?;
        if let Some(count) = threads {
            context.set_threading(ffmpeg::codec::threading::Config::count(count));
        }
        if let Some(device) = device {
            // The codec context owns this reference and unrefs it on free
            unsafe {
                (*context.as_mut_ptr()).hw_device_ctx = device.new_ref();
            }
        }

        let opened = context
            .decoder()
            .open_as(codec)
            .and_then(|d| d.video())
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        log::info!(
            "FFmpeg decoder {} opened{}",
            decoder.name,
            device.map_or(String::new(), |d| format!(" with {} device", d.kind()))
        );

        Ok(FfmpegDecoder { decoder: opened })
    }

    fn transfer_to_host(&mut self, picture: &FfmpegPicture) -> Result<FfmpegPicture, BackendError> {
        device::transfer_to_host(&picture.0).map(FfmpegPicture)
    }

    fn accelerator(&mut self) -> Option<Box<dyn ColorConverter<FfmpegPicture>>> {
        #[cfg(feature = "rga")]
        {
            if let Some(rga) = crate::convert::rga::RgaConverter::new() {
                return Some(Box::new(rga));
            }
        }
        None
    }

    fn software_converter(&mut self) -> Box<dyn ColorConverter<FfmpegPicture>> {
        Box::new(CpuFallback::new(SwsConverter::new()))
    }
}

impl Drop for FfmpegBackend {
    fn drop(&mut self) {
        self.network_deinit();
    }
}
