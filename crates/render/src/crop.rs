//! Page margin detection
//!
//! Scans a decoded bitmap for rows and columns that carry ink and returns
//! the content box in fractional page coordinates.

use crate::bitmap::{luminance, RawBitmap};
use crate::geometry::RectF;
use docview_cache::BYTES_PER_PIXEL;
use tracing::trace;

/// Pixels darker than this count as ink
pub const INK_THRESHOLD: u8 = 0xE0;

/// A line is content once more than 1/`NOISE_DIVISOR` of its pixels are ink
const NOISE_DIVISOR: usize = 200;

/// Content bounds of `bitmap`, mapped into `slice`
///
/// `bitmap` is the rendering of `slice`; the result is a sub-rectangle of
/// `slice`. A blank bitmap yields `slice` unchanged.
pub fn crop_bounds(bitmap: &RawBitmap, slice: &RectF) -> RectF {
    let width = bitmap.width() as usize;
    let height = bitmap.height() as usize;
    if width == 0 || height == 0 {
        return *slice;
    }

    let mut column_ink = vec![0usize; width];
    let mut row_ink = vec![0usize; height];
    for y in 0..height {
        let row = bitmap.row(y as u32);
        for (x, px) in row.chunks_exact(BYTES_PER_PIXEL).enumerate() {
            if luminance(px) < INK_THRESHOLD {
                column_ink[x] += 1;
                row_ink[y] += 1;
            }
        }
    }

    let is_content_column = |count: &usize| *count > height / NOISE_DIVISOR;
    let is_content_row = |count: &usize| *count > width / NOISE_DIVISOR;

    let (Some(left), Some(right)) = (
        column_ink.iter().position(is_content_column),
        column_ink.iter().rposition(is_content_column),
    ) else {
        return *slice;
    };
    let (Some(top), Some(bottom)) = (
        row_ink.iter().position(is_content_row),
        row_ink.iter().rposition(is_content_row),
    ) else {
        return *slice;
    };

    let content = RectF::new(
        left as f32 / width as f32,
        top as f32 / height as f32,
        (right + 1) as f32 / width as f32,
        (bottom + 1) as f32 / height as f32,
    );
    trace!(left, top, right, bottom, width, height, "crop bounds detected");
    content.map_into(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::BLACK;

    fn with_box(width: u32, height: u32, left: u32, top: u32, right: u32, bottom: u32) -> RawBitmap {
        let mut bitmap = RawBitmap::new(width, height);
        for y in top..bottom {
            for x in left..right {
                bitmap.put_pixel(x, y, BLACK);
            }
        }
        bitmap
    }

    #[test]
    fn test_detects_content_box() {
        let bitmap = with_box(100, 200, 10, 20, 90, 180);
        let bounds = crop_bounds(&bitmap, &RectF::UNIT);
        assert!(bounds.approx_eq(&RectF::new(0.1, 0.1, 0.9, 0.9), 1e-6));
    }

    #[test]
    fn test_blank_page_keeps_slice() {
        let bitmap = RawBitmap::new(50, 50);
        let slice = RectF::new(0.0, 0.0, 0.5, 1.0);
        assert_eq!(crop_bounds(&bitmap, &slice), slice);
    }

    #[test]
    fn test_result_is_mapped_into_slice() {
        let bitmap = with_box(100, 100, 50, 0, 100, 100);
        let slice = RectF::new(0.5, 0.0, 1.0, 1.0);
        let bounds = crop_bounds(&bitmap, &slice);
        assert!(bounds.approx_eq(&RectF::new(0.75, 0.0, 1.0, 1.0), 1e-6));
    }

    #[test]
    fn test_light_grey_is_not_ink() {
        let mut bitmap = RawBitmap::new(40, 40);
        for x in 0..40 {
            bitmap.put_pixel(x, 0, [0xF0, 0xF0, 0xF0, 0xFF]);
        }
        bitmap.put_pixel(20, 20, BLACK);
        let bounds = crop_bounds(&bitmap, &RectF::UNIT);
        assert!(bounds.approx_eq(&RectF::new(0.5, 0.5, 0.525, 0.525), 1e-6));
    }
}
