//! Drawing targets for composited pages

use crate::bitmap::RawBitmap;
use crate::geometry::{Rect, RectF};
use docview_cache::{PixelBuffer, BYTES_PER_PIXEL};

/// Something tiles can be composited onto
pub trait Surface {
    /// Size in device pixels
    fn size(&self) -> (u32, u32);

    /// Fill `rect` (device coordinates) with a solid colour
    fn fill_rect(&mut self, rect: &RectF, rgba: [u8; 4]);

    /// Draw the `src` region of `cell` scaled into `dst`
    fn draw_cell(&mut self, cell: &PixelBuffer, src: &Rect, dst: &RectF);
}

/// Software RGBA surface with nearest-neighbour scaling
#[derive(Debug, Clone)]
pub struct RgbaSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    cells_drawn: u64,
}

impl RgbaSurface {
    /// Transparent black surface
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
            cells_drawn: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Number of `draw_cell` calls that touched at least one pixel
    pub fn cells_drawn(&self) -> u64 {
        self.cells_drawn
    }

    pub fn into_bitmap(self) -> RawBitmap {
        let (width, height) = (self.width, self.height);
        match RawBitmap::from_rgba(width, height, self.pixels) {
            Some(bitmap) => bitmap,
            None => RawBitmap::new(width, height),
        }
    }

    /// Device pixel span covered by `rect`, clipped to the surface
    fn span(&self, rect: &RectF) -> Option<(u32, u32, u32, u32)> {
        let x0 = rect.left.round().max(0.0) as u32;
        let y0 = rect.top.round().max(0.0) as u32;
        let x1 = (rect.right.round().max(0.0) as u32).min(self.width);
        let y1 = (rect.bottom.round().max(0.0) as u32).min(self.height);
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }
}

impl Surface for RgbaSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fill_rect(&mut self, rect: &RectF, rgba: [u8; 4]) {
        let Some((x0, y0, x1, y1)) = self.span(rect) else {
            return;
        };
        let stride = self.width as usize * BYTES_PER_PIXEL;
        for y in y0..y1 {
            let row = y as usize * stride;
            for x in x0..x1 {
                let i = row + x as usize * BYTES_PER_PIXEL;
                self.pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&rgba);
            }
        }
    }

    fn draw_cell(&mut self, cell: &PixelBuffer, src: &Rect, dst: &RectF) {
        if src.is_empty() || dst.is_empty() {
            return;
        }
        let Some((x0, y0, x1, y1)) = self.span(dst) else {
            return;
        };

        let scale_x = src.width() as f32 / dst.width();
        let scale_y = src.height() as f32 / dst.height();
        let cell_width = cell.width() as i32;
        let cell_height = cell.height() as i32;
        let cell_stride = cell.width() as usize * BYTES_PER_PIXEL;
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let source = cell.pixels();

        for y in y0..y1 {
            let sy = src.top + ((y as f32 + 0.5 - dst.top) * scale_y) as i32;
            let sy = sy.clamp(src.top, (src.bottom - 1).min(cell_height - 1));
            for x in x0..x1 {
                let sx = src.left + ((x as f32 + 0.5 - dst.left) * scale_x) as i32;
                let sx = sx.clamp(src.left, (src.right - 1).min(cell_width - 1));
                let from = sy as usize * cell_stride + sx as usize * BYTES_PER_PIXEL;
                let to = y as usize * stride + x as usize * BYTES_PER_PIXEL;
                self.pixels[to..to + BYTES_PER_PIXEL]
                    .copy_from_slice(&source[from..from + BYTES_PER_PIXEL]);
            }
        }
        self.cells_drawn += 1;
    }
}
