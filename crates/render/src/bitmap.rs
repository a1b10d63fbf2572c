//! Decoder output bitmaps and colour effects

use crate::geometry::Rect;
use docview_cache::BYTES_PER_PIXEL;

/// Opaque white
pub const WHITE: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Opaque black
pub const BLACK: [u8; 4] = [0x00, 0x00, 0x00, 0xFF];

/// RGBA image produced by a decoder for one slice of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RawBitmap {
    /// White bitmap of the given size
    pub fn new(width: u32, height: u32) -> Self {
        let mut pixels = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&WHITE);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Wrap existing RGBA bytes; `None` if the length does not match
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
    }

    /// One row of RGBA bytes
    pub fn row(&self, y: u32) -> &[u8] {
        let start = self.offset(0, y);
        &self.pixels[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    /// Copy `src` (clamped to this bitmap) into the top-left corner of `dst`
    ///
    /// `dst` is a row-major RGBA buffer `dst_width` pixels wide.
    pub fn copy_region(&self, src: &Rect, dst: &mut [u8], dst_width: u32) {
        let left = src.left.clamp(0, self.width as i32) as u32;
        let right = src.right.clamp(0, self.width as i32) as u32;
        let top = src.top.clamp(0, self.height as i32) as u32;
        let bottom = src.bottom.clamp(0, self.height as i32) as u32;
        if right <= left || bottom <= top {
            return;
        }

        let row_bytes = (right - left).min(dst_width) as usize * BYTES_PER_PIXEL;
        let dst_stride = dst_width as usize * BYTES_PER_PIXEL;
        for (row, y) in (top..bottom).enumerate() {
            let from = self.offset(left, y);
            let to = row * dst_stride;
            if to + row_bytes > dst.len() {
                break;
            }
            dst[to..to + row_bytes].copy_from_slice(&self.pixels[from..from + row_bytes]);
        }
    }
}

/// Perceived brightness of an RGBA pixel (0..=255)
pub fn luminance(rgba: &[u8]) -> u8 {
    let r = rgba[0] as u32;
    let g = rgba[1] as u32;
    let b = rgba[2] as u32;
    ((r * 299 + g * 587 + b * 114) / 1000) as u8
}

/// Night-mode transform: invert colour channels, keep alpha
pub fn invert_into(src: &[u8], dst: &mut [u8]) {
    for (s, d) in src
        .chunks_exact(BYTES_PER_PIXEL)
        .zip(dst.chunks_exact_mut(BYTES_PER_PIXEL))
    {
        d[0] = 0xFF - s[0];
        d[1] = 0xFF - s[1];
        d[2] = 0xFF - s[2];
        d[3] = s[3];
    }
}
