// FFmpeg hardware device context and hardware frame transfer

use std::ffi::CString;
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video as VideoFrame;

use crate::decoder::{BackendError, DeviceKind};

/// Owned `AVBufferRef` for an `AVHWDeviceContext`
pub struct HwDeviceContext {
    ptr: *mut ffi::AVBufferRef,
    kind: DeviceKind,
}

impl HwDeviceContext {
    pub fn create(kind: DeviceKind, path: Option<&str>) -> Result<Self, BackendError> {
        let device_type = match kind {
            DeviceKind::Drm => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_DRM,
            DeviceKind::Vaapi => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            DeviceKind::Cuda => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
        };
        let path = path
            .map(CString::new)
            .transpose()
            .map_err(|e| BackendError::Failed(format!("invalid device path: {}", e)))?;

        let mut ptr: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut ptr,
                device_type,
                path.as_ref().map_or(ptr::null(), |p| p.as_ptr()),
                ptr::null_mut(),
                0,
            )
        };
        if ret < 0 || ptr.is_null() {
            return Err(BackendError::Failed(format!(
                "failed to create {} device context: {}",
                kind,
                ffmpeg::Error::from(ret)
            )));
        }

        log::debug!("Created {} hardware device context", kind);
        Ok(Self { ptr, kind })
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// New reference for handing to a codec context, which takes ownership
    pub(super) fn new_ref(&self) -> *mut ffi::AVBufferRef {
        unsafe { ffi::av_buffer_ref(self.ptr) }
    }
}

impl Drop for HwDeviceContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::av_buffer_unref(&mut self.ptr) };
            log::debug!("Released {} hardware device context", self.kind);
        }
    }
}

/// Pixel formats whose data lives in device memory
pub fn is_hw_pixel_format(format: Pixel) -> bool {
    matches!(
        format,
        Pixel::DRM_PRIME
            | Pixel::VAAPI
            | Pixel::CUDA
            | Pixel::VDPAU
            | Pixel::QSV
            | Pixel::VIDEOTOOLBOX
    )
}

/// Copy a hardware frame into a newly allocated host frame
pub fn transfer_to_host(frame: &VideoFrame) -> Result<VideoFrame, BackendError> {
    let mut host = VideoFrame::empty();
    unsafe {
        let ret = ffi::av_hwframe_transfer_data(host.as_mut_ptr(), frame.as_ptr(), 0);
        if ret < 0 {
            return Err(BackendError::Failed(format!(
                "hardware frame transfer failed: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        // Timestamps and color properties; the pixels are usable without them
        let ret = ffi::av_frame_copy_props(host.as_mut_ptr(), frame.as_ptr());
        if ret < 0 {
            log::debug!("Failed to copy frame properties: {}", ffmpeg::Error::from(ret));
        }
    }
    Ok(host)
}
