// Software color converter in pure Rust
// Planar / semi-planar YUV (BT.601, video range), packed RGB and gray -> BGR24

use super::{ColorConverter, ConvertError};
use crate::decoder::{Picture, PixelLayout};
use crate::frame::BgrFrame;

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuConverter;

impl CpuConverter {
    pub fn new() -> Self {
        Self
    }

    /// YUV to BGR (BT.601, video range)
    #[inline]
    fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
        let c = y as i32 - 16;
        let d = u as i32 - 128;
        let e = v as i32 - 128;

        let r = ((298 * c + 409 * e + 128) >> 8).clamp(0, 255) as u8;
        let g = ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8;
        let b = ((298 * c + 516 * d + 128) >> 8).clamp(0, 255) as u8;
        [b, g, r]
    }

    fn i420_to_bgr<P: Picture + ?Sized>(picture: &P, out: &mut BgrFrame) -> Result<(), ConvertError> {
        let w = out.width() as usize;
        let h = out.height() as usize;
        let (y_plane, y_stride) = (picture.plane(0), picture.stride(0));
        let (u_plane, u_stride) = (picture.plane(1), picture.stride(1));
        let (v_plane, v_stride) = (picture.plane(2), picture.stride(2));
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        check_plane(y_plane, y_stride, w, h, "Y")?;
        check_plane(u_plane, u_stride, cw, ch, "U")?;
        check_plane(v_plane, v_stride, cw, ch, "V")?;

        for row in 0..h {
            let y_row = &y_plane[row * y_stride..];
            let u_row = &u_plane[(row / 2) * u_stride..];
            let v_row = &v_plane[(row / 2) * v_stride..];
            let dst = out.row_mut(row);
            for col in 0..w {
                let px = Self::yuv_to_bgr(y_row[col], u_row[col / 2], v_row[col / 2]);
                dst[col * 3..col * 3 + 3].copy_from_slice(&px);
            }
        }
        Ok(())
    }

    fn nv12_to_bgr<P: Picture + ?Sized>(picture: &P, out: &mut BgrFrame) -> Result<(), ConvertError> {
        let w = out.width() as usize;
        let h = out.height() as usize;
        let (y_plane, y_stride) = (picture.plane(0), picture.stride(0));
        let (uv_plane, uv_stride) = (picture.plane(1), picture.stride(1));
        check_plane(y_plane, y_stride, w, h, "Y")?;
        check_plane(uv_plane, uv_stride, w.div_ceil(2) * 2, h.div_ceil(2), "UV")?;

        for row in 0..h {
            let y_row = &y_plane[row * y_stride..];
            let uv_row = &uv_plane[(row / 2) * uv_stride..];
            let dst = out.row_mut(row);
            for col in 0..w {
                let uv = (col / 2) * 2;
                let px = Self::yuv_to_bgr(y_row[col], uv_row[uv], uv_row[uv + 1]);
                dst[col * 3..col * 3 + 3].copy_from_slice(&px);
            }
        }
        Ok(())
    }

    fn packed_to_bgr<P: Picture + ?Sized>(
        picture: &P,
        out: &mut BgrFrame,
        swap: bool,
    ) -> Result<(), ConvertError> {
        let w = out.width() as usize;
        let h = out.height() as usize;
        let (src, stride) = (picture.plane(0), picture.stride(0));
        check_plane(src, stride, w * 3, h, "packed")?;

        for row in 0..h {
            let src_row = &src[row * stride..row * stride + w * 3];
            let dst = out.row_mut(row);
            if swap {
                for (d, s) in dst.chunks_exact_mut(3).zip(src_row.chunks_exact(3)) {
                    d.copy_from_slice(&[s[2], s[1], s[0]]);
                }
            } else {
                dst.copy_from_slice(src_row);
            }
        }
        Ok(())
    }

    fn gray_to_bgr<P: Picture + ?Sized>(picture: &P, out: &mut BgrFrame) -> Result<(), ConvertError> {
        let w = out.width() as usize;
        let h = out.height() as usize;
        let (src, stride) = (picture.plane(0), picture.stride(0));
        check_plane(src, stride, w, h, "gray")?;

        for row in 0..h {
            let src_row = &src[row * stride..row * stride + w];
            let dst = out.row_mut(row);
            for (d, &g) in dst.chunks_exact_mut(3).zip(src_row) {
                d.copy_from_slice(&[g, g, g]);
            }
        }
        Ok(())
    }
}

fn check_plane(
    plane: &[u8],
    stride: usize,
    row_bytes: usize,
    rows: usize,
    name: &str,
) -> Result<(), ConvertError> {
    if rows == 0 || row_bytes == 0 {
        return Ok(());
    }
    if stride < row_bytes || plane.len() < stride * (rows - 1) + row_bytes {
        return Err(ConvertError::Failed(format!(
            "{} plane too small: {} bytes, stride {}, need {} rows of {}",
            name,
            plane.len(),
            stride,
            rows,
            row_bytes
        )));
    }
    Ok(())
}

impl<P: Picture + ?Sized> ColorConverter<P> for CpuConverter {
    fn name(&self) -> &str {
        "cpu (Software)"
    }

    fn accepts(&self, layout: &PixelLayout) -> bool {
        !matches!(layout, PixelLayout::Other(_))
    }

    fn convert(&mut self, picture: &P, out: &mut BgrFrame) -> Result<(), ConvertError> {
        match picture.layout() {
            PixelLayout::Yuv420p => Self::i420_to_bgr(picture, out),
            PixelLayout::Nv12 => Self::nv12_to_bgr(picture, out),
            PixelLayout::Bgr24 => Self::packed_to_bgr(picture, out, false),
            PixelLayout::Rgb24 => Self::packed_to_bgr(picture, out, true),
            PixelLayout::Gray8 => Self::gray_to_bgr(picture, out),
            other => Err(ConvertError::UnsupportedFormat(other)),
        }
    }
}

/// Software converter that hands layouts `primary` rejects to `CpuConverter`
pub struct CpuFallback<C> {
    primary: C,
    cpu: CpuConverter,
}

impl<C> CpuFallback<C> {
    pub fn new(primary: C) -> Self {
        Self {
            primary,
            cpu: CpuConverter::new(),
        }
    }
}

impl<P, C> ColorConverter<P> for CpuFallback<C>
where
    P: Picture + ?Sized,
    C: ColorConverter<P>,
{
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn accepts(&self, layout: &PixelLayout) -> bool {
        self.primary.accepts(layout) || ColorConverter::<P>::accepts(&self.cpu, layout)
    }

    fn convert(&mut self, picture: &P, out: &mut BgrFrame) -> Result<(), ConvertError> {
        let layout = picture.layout();
        if self.primary.accepts(&layout) {
            match self.primary.convert(picture, out) {
                Err(ConvertError::UnsupportedFormat(_))
                    if ColorConverter::<P>::accepts(&self.cpu, &layout) => {}
                result => return result,
            }
            log::debug!("{} rejected {}, converting on the CPU", self.primary.name(), layout);
        }
        self.cpu.convert(picture, out)
    }
}
