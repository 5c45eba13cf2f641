// Scripted in-memory backend for exercising the session state machine
//
// Every resource it hands out reports its lifecycle into a shared `Counters`,
// so tests can check release order and that no unit outlives its use.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{
    BackendError, CodecKind, CompressedUnit, DecoderInfo, Demuxer, DeviceKind, MediaBackend,
    Picture, PixelLayout, Received, StreamInfo, VideoDecoder,
};
use crate::convert::{ColorConverter, ConvertError, CpuConverter};
use crate::frame::BgrFrame;
use crate::session::TransportOptions;

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;

/// What the fake stack does; ordinals are 1-based
#[derive(Debug, Clone)]
pub struct Script {
    pub open_fails: bool,
    pub no_video: bool,
    pub codec: CodecKind,
    pub width: u32,
    pub height: u32,
    pub has_hw_decoder: bool,
    pub has_sw_decoder: bool,
    pub device_fails: bool,
    pub hw_open_fails: bool,
    pub sw_open_fails: bool,
    /// Video units in the stream before end of input
    pub frames: usize,
    /// An audio unit precedes every video unit
    pub interleave_audio: bool,
    /// Pictures each accepted video unit yields
    pub pictures_per_unit: usize,
    /// Video unit ordinals the decoder refuses at submit
    pub reject_submit: Vec<usize>,
    /// Video unit ordinals that yield no picture
    pub needs_input_for: Vec<usize>,
    /// Read call ordinals that fail transiently
    pub transient_read_at: Vec<usize>,
    /// Read call ordinal from which reads fail fatally
    pub fatal_read_at: Option<usize>,
    /// Video unit ordinals whose receive fails
    pub receive_error_for: Vec<usize>,
    /// Transfer call ordinals that fail
    pub transfer_fails_at: Vec<usize>,
    /// Layout of host pictures from the hardware decoder, transferred or not
    pub hw_host_layout: PixelLayout,
    pub accel_available: bool,
    /// Accelerator call ordinals that fail
    pub accel_fails_at: Vec<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            open_fails: false,
            no_video: false,
            codec: CodecKind::H264,
            width: 8,
            height: 4,
            has_hw_decoder: true,
            has_sw_decoder: true,
            device_fails: false,
            hw_open_fails: false,
            sw_open_fails: false,
            frames: 10,
            interleave_audio: false,
            pictures_per_unit: 1,
            reject_submit: Vec::new(),
            needs_input_for: Vec::new(),
            transient_read_at: Vec::new(),
            fatal_read_at: None,
            receive_error_for: Vec::new(),
            transfer_fails_at: Vec::new(),
            hw_host_layout: PixelLayout::Nv12,
            accel_available: true,
            accel_fails_at: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub units_created: AtomicUsize,
    pub units_dropped: AtomicUsize,
    pub inputs_opened: AtomicUsize,
    pub transfers: AtomicUsize,
    pub accel_calls: AtomicUsize,
    pub sw_calls: AtomicUsize,
    pub network_init: AtomicUsize,
    pub network_deinit: AtomicUsize,
    pub decoders_opened: Mutex<Vec<String>>,
    /// Resource releases in order: "decoder", "input", "device", "network"
    pub released: Mutex<Vec<&'static str>>,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn units_alive(&self) -> usize {
        Self::get(&self.units_created) - Self::get(&self.units_dropped)
    }
}

fn bump(counter: &AtomicUsize) -> usize {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// Luma per video unit, distinct across neighbors
pub fn luma_for(seq: usize) -> u8 {
    16 + ((seq * 20) % 200) as u8
}

pub struct FakeUnit {
    stream: usize,
    seq: usize,
    counters: Arc<Counters>,
}

impl CompressedUnit for FakeUnit {
    fn stream_index(&self) -> usize {
        self.stream
    }
}

impl Drop for FakeUnit {
    fn drop(&mut self) {
        bump(&self.counters.units_dropped);
    }
}

#[derive(Debug, Clone)]
pub struct FakePicture {
    width: u32,
    height: u32,
    layout: PixelLayout,
    hardware: bool,
    planes: Vec<Vec<u8>>,
    strides: Vec<usize>,
    pub seq: usize,
}

impl FakePicture {
    pub fn i420(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        Self {
            width,
            height,
            layout: PixelLayout::Yuv420p,
            hardware: false,
            planes: vec![vec![y; w * h], vec![u; cw * ch], vec![v; cw * ch]],
            strides: vec![w, cw, cw],
            seq: 0,
        }
    }

    pub fn nv12(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let (w, h) = (width as usize, height as usize);
        let cw = w.div_ceil(2) * 2;
        let uv = [u, v].repeat(cw / 2 * h.div_ceil(2));
        Self {
            width,
            height,
            layout: PixelLayout::Nv12,
            hardware: false,
            planes: vec![vec![y; w * h], uv],
            strides: vec![w, cw],
            seq: 0,
        }
    }

    pub fn packed(layout: PixelLayout, width: u32, height: u32, stride: usize, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout,
            hardware: false,
            planes: vec![data],
            strides: vec![stride],
            seq: 0,
        }
    }

    /// Device-memory picture; no host planes
    pub fn hardware(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layout: PixelLayout::Other("drm_prime".to_string()),
            hardware: true,
            planes: Vec::new(),
            strides: Vec::new(),
            seq: 0,
        }
    }

    /// Host picture in `layout` with uniform luma and neutral chroma
    pub fn host(layout: &PixelLayout, width: u32, height: u32, y: u8) -> Self {
        let (w, h) = (width as usize, height as usize);
        match layout {
            PixelLayout::Yuv420p => Self::i420(width, height, y, 128, 128),
            PixelLayout::Bgr24 | PixelLayout::Rgb24 => {
                Self::packed(layout.clone(), width, height, w * 3, vec![y; w * h * 3])
            }
            PixelLayout::Gray8 => Self::packed(PixelLayout::Gray8, width, height, w, vec![y; w * h]),
            _ => Self::nv12(width, height, y, 128, 128),
        }
    }

    fn with_seq(mut self, seq: usize) -> Self {
        self.seq = seq;
        self
    }
}

impl Picture for FakePicture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn layout(&self) -> PixelLayout {
        self.layout.clone()
    }

    fn is_hardware(&self) -> bool {
        self.hardware
    }

    fn plane(&self, index: usize) -> &[u8] {
        self.planes.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    fn stride(&self, index: usize) -> usize {
        self.strides.get(index).copied().unwrap_or(0)
    }
}

pub struct FakeInput {
    script: Arc<Script>,
    counters: Arc<Counters>,
    stream: StreamInfo,
    reads: usize,
    next_video: usize,
    audio_due: bool,
}

impl Demuxer for FakeInput {
    type Unit = FakeUnit;

    fn video_stream(&self) -> &StreamInfo {
        &self.stream
    }

    fn read_unit(&mut self) -> Result<FakeUnit, BackendError> {
        self.reads += 1;
        if self.script.transient_read_at.contains(&self.reads) {
            return Err(BackendError::Transient("Resource temporarily unavailable".to_string()));
        }
        if self.script.fatal_read_at.is_some_and(|at| self.reads >= at) {
            return Err(BackendError::Failed("Connection reset by peer".to_string()));
        }
        if self.next_video > self.script.frames {
            return Err(BackendError::EndOfStream);
        }

        let (stream, seq) = if self.script.interleave_audio && self.audio_due {
            self.audio_due = false;
            (AUDIO_STREAM, self.next_video)
        } else {
            self.audio_due = true;
            self.next_video += 1;
            (VIDEO_STREAM, self.next_video - 1)
        };
        bump(&self.counters.units_created);
        Ok(FakeUnit {
            stream,
            seq,
            counters: self.counters.clone(),
        })
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.counters.released.lock().push("input");
    }
}

pub struct FakeDecoder {
    script: Arc<Script>,
    counters: Arc<Counters>,
    /// Emits device-memory pictures
    device_output: bool,
    hardware: bool,
    pending: Vec<FakePicture>,
    fail_next_receive: bool,
}

impl FakeDecoder {
    fn picture(&self, seq: usize) -> FakePicture {
        let (w, h) = (self.script.width, self.script.height);
        let picture = if self.device_output {
            FakePicture::hardware(w, h)
        } else if self.hardware {
            FakePicture::host(&self.script.hw_host_layout, w, h, luma_for(seq))
        } else {
            FakePicture::i420(w, h, luma_for(seq), 128, 128)
        };
        picture.with_seq(seq)
    }
}

impl VideoDecoder for FakeDecoder {
    type Unit = FakeUnit;
    type Picture = FakePicture;

    fn submit(&mut self, unit: &FakeUnit) -> Result<(), BackendError> {
        if self.script.reject_submit.contains(&unit.seq) {
            return Err(BackendError::Failed("Invalid data found when processing input".to_string()));
        }
        if self.script.receive_error_for.contains(&unit.seq) {
            self.fail_next_receive = true;
            return Ok(());
        }
        if !self.script.needs_input_for.contains(&unit.seq) {
            for _ in 0..self.script.pictures_per_unit {
                let picture = self.picture(unit.seq);
                self.pending.push(picture);
            }
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Received<FakePicture>, BackendError> {
        if self.fail_next_receive {
            self.fail_next_receive = false;
            return Err(BackendError::Failed("decoder fault".to_string()));
        }
        if self.pending.is_empty() {
            return Ok(Received::NeedsInput);
        }
        Ok(Received::Picture(self.pending.remove(0)))
    }
}

impl Drop for FakeDecoder {
    fn drop(&mut self) {
        self.counters.released.lock().push("decoder");
    }
}

pub struct FakeDevice {
    counters: Arc<Counters>,
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.counters.released.lock().push("device");
    }
}

/// CPU conversion that counts calls and fails on schedule
pub struct CountingConverter {
    inner: CpuConverter,
    counters: Arc<Counters>,
    accelerator: bool,
    fails_at: Vec<usize>,
}

impl ColorConverter<FakePicture> for CountingConverter {
    fn name(&self) -> &str {
        if self.accelerator { "fake accelerator" } else { "fake software" }
    }

    fn accepts(&self, layout: &PixelLayout) -> bool {
        if self.accelerator {
            layout.is_subsampled_yuv()
        } else {
            <CpuConverter as ColorConverter<FakePicture>>::accepts(&self.inner, layout)
        }
    }

    fn convert(&mut self, picture: &FakePicture, out: &mut BgrFrame) -> Result<(), ConvertError> {
        let counter = if self.accelerator {
            &self.counters.accel_calls
        } else {
            &self.counters.sw_calls
        };
        let call = bump(counter);
        if self.fails_at.contains(&call) {
            return Err(ConvertError::Failed(format!("scheduled failure on call {}", call)));
        }
        self.inner.convert(picture, out)
    }
}

pub struct FakeBackend {
    script: Arc<Script>,
    counters: Arc<Counters>,
    network_ready: bool,
}

impl FakeBackend {
    pub fn new(script: Script) -> Self {
        Self::with_counters(script, Arc::new(Counters::default()))
    }

    pub fn with_counters(script: Script, counters: Arc<Counters>) -> Self {
        Self {
            script: Arc::new(script),
            counters,
            network_ready: false,
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }
}

impl MediaBackend for FakeBackend {
    type Unit = FakeUnit;
    type Picture = FakePicture;
    type Input = FakeInput;
    type Decoder = FakeDecoder;
    type Device = FakeDevice;

    fn network_init(&mut self) -> Result<(), BackendError> {
        bump(&self.counters.network_init);
        self.network_ready = true;
        Ok(())
    }

    fn network_deinit(&mut self) {
        if self.network_ready {
            self.network_ready = false;
            bump(&self.counters.network_deinit);
            self.counters.released.lock().push("network");
        }
    }

    fn open_input(&mut self, url: &str, _transport: &TransportOptions) -> Result<FakeInput, BackendError> {
        if self.script.open_fails {
            return Err(BackendError::Failed(format!("Connection refused: {}", url)));
        }
        if self.script.no_video {
            return Err(BackendError::NoVideoStream);
        }
        bump(&self.counters.inputs_opened);
        Ok(FakeInput {
            script: self.script.clone(),
            counters: self.counters.clone(),
            stream: StreamInfo {
                index: VIDEO_STREAM,
                codec: self.script.codec.clone(),
                width: self.script.width,
                height: self.script.height,
            },
            reads: 0,
            next_video: 1,
            audio_due: true,
        })
    }

    fn find_decoder_by_name(&self, name: &str) -> Option<DecoderInfo> {
        self.script.has_hw_decoder.then(|| DecoderInfo {
            name: name.to_string(),
            hardware: true,
        })
    }

    fn find_decoder_for_codec(&self, codec: &CodecKind) -> Option<DecoderInfo> {
        self.script.has_sw_decoder.then(|| DecoderInfo {
            name: codec.name().to_string(),
            hardware: false,
        })
    }

    fn create_device(&mut self, kind: DeviceKind, _path: Option<&str>) -> Result<FakeDevice, BackendError> {
        if self.script.device_fails {
            return Err(BackendError::Failed(format!("no {} device", kind)));
        }
        Ok(FakeDevice {
            counters: self.counters.clone(),
        })
    }

    fn open_decoder(
        &mut self,
        _input: &FakeInput,
        decoder: &DecoderInfo,
        device: Option<&FakeDevice>,
        _threads: Option<usize>,
    ) -> Result<FakeDecoder, BackendError> {
        let fails = if decoder.hardware {
            self.script.hw_open_fails
        } else {
            self.script.sw_open_fails
        };
        if fails {
            return Err(BackendError::Failed(format!("cannot open {}", decoder.name)));
        }
        self.counters.decoders_opened.lock().push(decoder.name.clone());
        Ok(FakeDecoder {
            script: self.script.clone(),
            counters: self.counters.clone(),
            device_output: decoder.hardware && device.is_some(),
            hardware: decoder.hardware,
            pending: Vec::new(),
            fail_next_receive: false,
        })
    }

    fn transfer_to_host(&mut self, picture: &FakePicture) -> Result<FakePicture, BackendError> {
        let call = bump(&self.counters.transfers);
        if self.script.transfer_fails_at.contains(&call) {
            return Err(BackendError::Failed("transfer failed".to_string()));
        }
        let layout = &self.script.hw_host_layout;
        Ok(FakePicture::host(layout, picture.width, picture.height, luma_for(picture.seq))
            .with_seq(picture.seq))
    }

    fn accelerator(&mut self) -> Option<Box<dyn ColorConverter<FakePicture>>> {
        self.script.accel_available.then(|| {
            Box::new(CountingConverter {
                inner: CpuConverter::new(),
                counters: self.counters.clone(),
                accelerator: true,
                fails_at: self.script.accel_fails_at.clone(),
            }) as Box<dyn ColorConverter<FakePicture>>
        })
    }

    fn software_converter(&mut self) -> Box<dyn ColorConverter<FakePicture>> {
        Box::new(CountingConverter {
            inner: CpuConverter::new(),
            counters: self.counters.clone(),
            accelerator: false,
            fails_at: Vec::new(),
        })
    }
}
