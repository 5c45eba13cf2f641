// Multi-camera monitor
// One session per camera, each on its own thread, latest frame kept per slot
//
// Workers reconnect on any session error: close, wait `retry_delay`, reopen.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::decoder::MediaBackend;
use crate::frame::BgrFrame;
use crate::session::{DecodePath, SessionConfig, StreamDecodeSession};

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub session: SessionConfig,
    pub retry_delay_ms: u64,
    /// Resize each frame in the worker, as `(width, height)`
    pub resize_to: Option<(u32, u32)>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            retry_delay_ms: 100,
            resize_to: None,
        }
    }
}

impl MonitorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<Arc<BgrFrame>>,
    path: Option<DecodePath>,
    last_error: Option<String>,
}

/// Point-in-time view of one camera
#[derive(Debug, Clone)]
pub struct CameraSnapshot {
    pub index: usize,
    pub url: String,
    pub frame: Option<Arc<BgrFrame>>,
    pub path: Option<DecodePath>,
    pub last_error: Option<String>,
    pub frames: u64,
    pub reconnects: u64,
}

struct Camera {
    url: String,
    slot: Arc<Mutex<Slot>>,
    frames: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

pub struct CameraMonitor {
    running: Arc<AtomicBool>,
    cameras: Vec<Camera>,
}

impl CameraMonitor {
    /// Spawn one worker per URL.
    ///
    /// `backend_factory` runs inside each worker thread, so backends never
    /// cross threads.
    pub fn start<B, F>(urls: &[String], config: MonitorConfig, backend_factory: F) -> Self
    where
        B: MediaBackend,
        F: Fn() -> B + Send + Sync + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let factory = Arc::new(backend_factory);

        let cameras = urls
            .iter()
            .enumerate()
            .map(|(index, url)| {
                let slot = Arc::new(Mutex::new(Slot::default()));
                let frames = Arc::new(AtomicU64::new(0));
                let reconnects = Arc::new(AtomicU64::new(0));
                let worker = Worker {
                    index,
                    url: url.clone(),
                    config: config.clone(),
                    running: running.clone(),
                    slot: slot.clone(),
                    frames: frames.clone(),
                    reconnects: reconnects.clone(),
                };
                let factory = factory.clone();
                let handle = thread::Builder::new()
                    .name(format!("camera-{}", index))
                    .spawn(move || {
                        let backend = (*factory)();
                        worker.run(backend)
                    })
                    .map_err(|e| log::error!("Camera[{}] failed to spawn worker: {}", index, e))
                    .ok();
                Camera {
                    url: url.clone(),
                    slot,
                    frames,
                    reconnects,
                    handle,
                }
            })
            .collect();

        log::info!("Camera monitor started with {} cameras", urls.len());
        Self { running, cameras }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<CameraSnapshot> {
        self.cameras
            .iter()
            .enumerate()
            .map(|(index, camera)| {
                let slot = camera.slot.lock();
                CameraSnapshot {
                    index,
                    url: camera.url.clone(),
                    frame: slot.frame.clone(),
                    path: slot.path,
                    last_error: slot.last_error.clone(),
                    frames: camera.frames.load(Ordering::Relaxed),
                    reconnects: camera.reconnects.load(Ordering::Relaxed),
                }
            })
            .collect()
    }

    /// Latest frames only, in camera order
    pub fn latest_frames(&self) -> Vec<Option<Arc<BgrFrame>>> {
        self.cameras
            .iter()
            .map(|camera| camera.slot.lock().frame.clone())
            .collect()
    }

    /// Signal all workers and wait for them.
    ///
    /// A worker blocked in a read finishes once the transport timeout expires.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for (index, camera) in self.cameras.iter_mut().enumerate() {
            if let Some(handle) = camera.handle.take() {
                if handle.join().is_err() {
                    log::error!("Camera[{}] worker panicked", index);
                }
            }
        }
        log::info!("Camera monitor stopped");
    }
}

impl Drop for CameraMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    index: usize,
    url: String,
    config: MonitorConfig,
    running: Arc<AtomicBool>,
    slot: Arc<Mutex<Slot>>,
    frames: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
}

impl Worker {
    fn run<B: MediaBackend>(self, backend: B) {
        let mut session = StreamDecodeSession::new(backend, self.config.session.clone());
        let mut opened = false;

        while self.running.load(Ordering::SeqCst) {
            if !opened {
                match session.open(&self.url) {
                    Ok(()) => {
                        opened = true;
                        let mut slot = self.slot.lock();
                        slot.path = Some(session.decode_path());
                        slot.last_error = None;
                    }
                    Err(e) => {
                        self.fail(&e.to_string());
                        continue;
                    }
                }
            }

            match session.next_frame() {
                Ok(frame) => {
                    let frame = match self.config.resize_to {
                        Some((w, h)) if (w, h) != (frame.width(), frame.height()) => {
                            frame.resized(w, h)
                        }
                        _ => frame,
                    };
                    self.frames.fetch_add(1, Ordering::Relaxed);
                    let mut slot = self.slot.lock();
                    slot.frame = Some(Arc::new(frame));
                    slot.path = Some(session.decode_path());
                }
                Err(e) => {
                    session.close();
                    opened = false;
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.fail(&e.to_string());
                }
            }
        }

        session.close();
        log::debug!("Camera[{}] worker exiting", self.index);
    }

    fn fail(&self, error: &str) {
        log::warn!("Camera[{}] {}: {}", self.index, self.url, error);
        self.slot.lock().last_error = Some(error.to_string());
        thread::sleep(self.config.retry_delay());
    }
}

/// Tile frames into a `columns`-wide grid of `cell_w × cell_h` cells.
///
/// Frames are resized to the cell; missing frames leave the cell black.
pub fn compose_grid(frames: &[Option<&BgrFrame>], cell_w: u32, cell_h: u32, columns: usize) -> BgrFrame {
    let columns = columns.max(1);
    let rows = frames.len().div_ceil(columns).max(1);
    let mut grid = BgrFrame::new(cell_w * columns as u32, cell_h * rows as u32);
    let cell_row_bytes = cell_w as usize * 3;

    for (i, frame) in frames.iter().enumerate() {
        let Some(frame) = frame else {
            continue;
        };
        let scaled;
        let cell = if frame.width() == cell_w && frame.height() == cell_h {
            *frame
        } else {
            scaled = frame.resized(cell_w, cell_h);
            &scaled
        };

        let x0 = (i % columns) * cell_row_bytes;
        let y0 = (i / columns) * cell_h as usize;
        for y in 0..cell_h as usize {
            let src = &cell.as_bytes()[y * cell_row_bytes..(y + 1) * cell_row_bytes];
            grid.row_mut(y0 + y)[x0..x0 + cell_row_bytes].copy_from_slice(src);
        }
    }
    grid
}
