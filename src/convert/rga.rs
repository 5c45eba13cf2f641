// Rockchip RGA color converter
// NV12 / I420 -> BGR888 through librga's im2d API
//
// RGA reads one contiguous YUV buffer whose width stride is 16-aligned, so
// the picture is staged first. The BGR destination is written in place.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::path::Path;

use super::{ColorConverter, ConvertError};
use crate::decoder::{Picture, PixelLayout};
use crate::frame::BgrFrame;

pub const RGA_DEVICE: &str = "/dev/rga";

const RK_FORMAT_BGR_888: c_int = 0x7 << 8;
const RK_FORMAT_YCBCR_420_SP: c_int = 0xa << 8;
const RK_FORMAT_YCBCR_420_P: c_int = 0xb << 8;

const IM_STATUS_SUCCESS: c_int = 1;
const IM_COLOR_SPACE_DEFAULT: c_int = 0;
const STRIDE_ALIGN: usize = 16;

#[repr(C)]
#[derive(Clone, Copy)]
struct ImColorKeyRange {
    max: c_int,
    min: c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ImNn {
    scale_r: c_int,
    scale_g: c_int,
    scale_b: c_int,
    offset_r: c_int,
    offset_g: c_int,
    offset_b: c_int,
}

/// Mirrors `rga_buffer_t` from im2d_type.h
#[repr(C)]
#[derive(Clone, Copy)]
struct RgaBuffer {
    vir_addr: *mut c_void,
    phy_addr: *mut c_void,
    fd: c_int,
    width: c_int,
    height: c_int,
    wstride: c_int,
    hstride: c_int,
    format: c_int,
    color_space_mode: c_int,
    global_alpha: c_int,
    rd_mode: c_int,
    color: c_int,
    colorkey_range: ImColorKeyRange,
    nn: ImNn,
    rop_code: c_int,
    handle: c_int,
}

#[link(name = "rga")]
unsafe extern "C" {
    fn wrapbuffer_virtualaddr_t(
        vir_addr: *mut c_void,
        width: c_int,
        height: c_int,
        wstride: c_int,
        hstride: c_int,
        format: c_int,
    ) -> RgaBuffer;

    fn imcvtcolor_t(
        src: RgaBuffer,
        dst: RgaBuffer,
        sfmt: c_int,
        dfmt: c_int,
        mode: c_int,
        sync: c_int,
    ) -> c_int;

    fn imStrError_t(status: c_int) -> *const c_char;
}

pub struct RgaConverter {
    staging: Vec<u8>,
    calls: u64,
}

impl RgaConverter {
    /// Returns `None` when the RGA device node is absent
    pub fn new() -> Option<Self> {
        if !Path::new(RGA_DEVICE).exists() {
            log::info!("RGA not available: {} missing", RGA_DEVICE);
            return None;
        }
        log::info!("RGA color converter available");
        Some(Self {
            staging: Vec::new(),
            calls: 0,
        })
    }

    fn align(value: usize) -> usize {
        value.div_ceil(STRIDE_ALIGN) * STRIDE_ALIGN
    }

    /// Copy planes into one contiguous buffer with RGA's stride rules
    fn stage<P: Picture + ?Sized>(&mut self, picture: &P, wstride: usize, hstride: usize) -> Result<c_int, ConvertError> {
        let w = picture.width() as usize;
        let h = picture.height() as usize;
        let luma = wstride * hstride;
        self.staging.clear();
        self.staging.resize(luma * 3 / 2, 128);

        copy_rows(&mut self.staging[..luma], wstride, picture.plane(0), picture.stride(0), w, h)?;
        match picture.layout() {
            PixelLayout::Nv12 => {
                copy_rows(&mut self.staging[luma..], wstride, picture.plane(1), picture.stride(1), w, h / 2)?;
                Ok(RK_FORMAT_YCBCR_420_SP)
            }
            PixelLayout::Yuv420p => {
                let chroma = luma / 4;
                let (u_dst, v_dst) = self.staging[luma..].split_at_mut(chroma);
                copy_rows(u_dst, wstride / 2, picture.plane(1), picture.stride(1), w / 2, h / 2)?;
                copy_rows(v_dst, wstride / 2, picture.plane(2), picture.stride(2), w / 2, h / 2)?;
                Ok(RK_FORMAT_YCBCR_420_P)
            }
            other => Err(ConvertError::UnsupportedFormat(other)),
        }
    }
}

fn copy_rows(
    dst: &mut [u8],
    dst_stride: usize,
    src: &[u8],
    src_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(), ConvertError> {
    for row in 0..rows {
        let s = row * src_stride;
        let d = row * dst_stride;
        let (Some(src_row), Some(dst_row)) = (src.get(s..s + row_bytes), dst.get_mut(d..d + row_bytes)) else {
            return Err(ConvertError::Failed(format!("plane too small at row {}", row)));
        };
        dst_row.copy_from_slice(src_row);
    }
    Ok(())
}

impl<P: Picture + ?Sized> ColorConverter<P> for RgaConverter {
    fn name(&self) -> &str {
        "RGA (Hardware)"
    }

    fn accepts(&self, layout: &PixelLayout) -> bool {
        layout.is_subsampled_yuv()
    }

    fn convert(&mut self, picture: &P, out: &mut BgrFrame) -> Result<(), ConvertError> {
        let w = picture.width() as usize;
        let h = picture.height() as usize;
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(ConvertError::Failed(format!("RGA needs even dimensions, got {}x{}", w, h)));
        }
        let wstride = Self::align(w);
        let hstride = h;
        let src_format = self.stage(picture, wstride, hstride)?;

        let status = unsafe {
            let src = wrapbuffer_virtualaddr_t(
                self.staging.as_mut_ptr().cast(),
                w as c_int,
                h as c_int,
                wstride as c_int,
                hstride as c_int,
                src_format,
            );
            let dst = wrapbuffer_virtualaddr_t(
                out.as_bytes_mut().as_mut_ptr().cast(),
                w as c_int,
                h as c_int,
                w as c_int,
                h as c_int,
                RK_FORMAT_BGR_888,
            );
            imcvtcolor_t(src, dst, src_format, RK_FORMAT_BGR_888, IM_COLOR_SPACE_DEFAULT, 1)
        };

        if status != IM_STATUS_SUCCESS {
            let reason = unsafe {
                let msg = imStrError_t(status);
                if msg.is_null() {
                    format!("status {}", status)
                } else {
                    CStr::from_ptr(msg).to_string_lossy().into_owned()
                }
            };
            return Err(ConvertError::Failed(format!("imcvtcolor: {}", reason)));
        }

        self.calls += 1;
        if self.calls == 1 {
            log::info!("RGA conversion active: {}x{} {} -> bgr24", w, h, picture.layout());
        }
        Ok(())
    }
}
