//! Output frame: packed 8-bit BGR, `height × width × 3`, row-major.
//!
//! Every frame owns its pixels. Nothing inside a session keeps a reference
//! to a returned frame, so callers may hold frames for as long as they like.

use std::path::Path;

use image::imageops::{self, FilterType};

/// Channels per pixel (B, G, R)
pub const CHANNELS: usize = 3;

/// Layout description a host binding exports for zero-copy array views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub itemsize: usize,
    /// Struct-module format character for one sample
    pub format: &'static str,
    pub ndim: usize,
    pub shape: [usize; 3],
    /// Byte strides for (row, column, channel)
    pub strides: [usize; 3],
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BgrFrame {
    /// Allocate a black frame
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * CHANNELS],
        }
    }

    /// Wrap existing packed BGR data; `None` if the length does not match
    pub fn from_vec(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * CHANNELS {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `[height, width, 3]`
    pub fn shape(&self) -> [usize; 3] {
        [self.height as usize, self.width as usize, CHANNELS]
    }

    pub fn row_stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    pub fn strides(&self) -> [usize; 3] {
        [self.row_stride(), CHANNELS, 1]
    }

    pub fn buffer_info(&self) -> BufferInfo {
        BufferInfo {
            itemsize: 1,
            format: "B",
            ndim: 3,
            shape: self.shape(),
            strides: self.strides(),
            readonly: false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let stride = self.row_stride();
        &mut self.data[y * stride..(y + 1) * stride]
    }

    /// `[b, g, r]` at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Copy packed BGR rows from a strided source (e.g. a padded native buffer)
    pub fn copy_from_strided(&mut self, src: &[u8], src_stride: usize) -> bool {
        let row_len = self.row_stride();
        let rows = self.height as usize;
        if rows == 0 {
            return true;
        }
        if src_stride < row_len || src.len() < src_stride * rows.saturating_sub(1) + row_len {
            return false;
        }
        for y in 0..rows {
            let src_off = y * src_stride;
            self.row_mut(y)
                .copy_from_slice(&src[src_off..src_off + row_len]);
        }
        true
    }

    /// Bilinear resize into a new frame
    pub fn resized(&self, dst_width: u32, dst_height: u32) -> BgrFrame {
        if dst_width == self.width && dst_height == self.height {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 || dst_width == 0 || dst_height == 0 {
            return BgrFrame::new(dst_width, dst_height);
        }
        // Filtering is per channel, so BGR data passes through an Rgb buffer unchanged
        let Some(src) = image::RgbImage::from_raw(self.width, self.height, self.data.clone()) else {
            return BgrFrame::new(dst_width, dst_height);
        };
        let scaled = imageops::resize(&src, dst_width, dst_height, FilterType::Triangle);
        BgrFrame {
            width: dst_width,
            height: dst_height,
            data: scaled.into_raw(),
        }
    }

    /// Swap to RGB order for image export
    pub fn to_rgb_image(&self) -> image::RgbImage {
        let mut rgb = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(CHANNELS) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        // Length always matches width * height * 3
        image::RgbImage::from_raw(self.width, self.height, rgb)
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }

    /// Write the frame to disk; format follows the file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.to_rgb_image().save(path)
    }
}
