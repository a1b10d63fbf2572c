//! Decoded tile content split into pooled cells
//!
//! A decoded bitmap for a tile node can be several thousand pixels wide, so
//! it is cut into a grid of 128x128 cells, each stored in a buffer from the
//! shared [`BufferPool`]. Cells on the right and bottom edges are only
//! partially covered; the uncovered part is cleared to black and never drawn.
//!
//! The night-mode copy is derived lazily from the day cells the first time
//! it is requested and cached until the content changes.

use crate::bitmap::{invert_into, RawBitmap, BLACK};
use crate::geometry::{Rect, RectF, Transform};
use crate::surface::Surface;
use docview_cache::{BufferPool, PixelBuffer, BYTES_PER_PIXEL};
use tracing::{debug, trace};

/// Edge length of one cell in pixels
pub const CELL_SIZE: u32 = 128;

/// Pooled cell grid holding one node's decoded content
#[derive(Debug, Default)]
pub struct BitmapHolder {
    bounds: Rect,
    columns: u32,
    rows: u32,
    day: Option<Vec<PixelBuffer>>,
    night: Option<Vec<PixelBuffer>>,
}

impl BitmapHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pixel bounds of the installed bitmap
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Grid dimensions as `(columns, rows)`
    pub fn grid(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    /// Whether no content is installed
    pub fn is_empty(&self) -> bool {
        self.day.is_none()
    }

    /// Number of pooled buffers currently held, night copy included
    pub fn buffer_count(&self) -> usize {
        self.day.as_ref().map_or(0, Vec::len) + self.night.as_ref().map_or(0, Vec::len)
    }

    fn cell_source(&self, column: u32, row: u32) -> Rect {
        let left = (column * CELL_SIZE) as i32;
        let top = (row * CELL_SIZE) as i32;
        Rect::new(
            left,
            top,
            (left + CELL_SIZE as i32).min(self.bounds.right),
            (top + CELL_SIZE as i32).min(self.bounds.bottom),
        )
    }

    /// Replace the content with `bitmap`
    ///
    /// Previous cells (day and night) go back to the pool. When the pool
    /// cannot supply every cell the holder is left empty and `false` is
    /// returned.
    pub fn set_bitmap(&mut self, bitmap: &RawBitmap, pool: &BufferPool) -> bool {
        self.recycle(pool);
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return false;
        }

        let columns = bitmap.width().div_ceil(CELL_SIZE);
        let rows = bitmap.height().div_ceil(CELL_SIZE);
        let bounds = bitmap.bounds();
        let mut cells = Vec::with_capacity((columns * rows) as usize);

        for row in 0..rows {
            for column in 0..columns {
                let Some(mut cell) = pool.acquire(CELL_SIZE, CELL_SIZE) else {
                    debug!(columns, rows, "no buffers for bitmap cells");
                    for cell in cells {
                        pool.release(cell);
                    }
                    return false;
                };

                let left = (column * CELL_SIZE) as i32;
                let top = (row * CELL_SIZE) as i32;
                let src = Rect::new(left, top, left + CELL_SIZE as i32, top + CELL_SIZE as i32);
                let partial = src.right > bounds.right || src.bottom > bounds.bottom;
                if partial {
                    cell.fill(BLACK);
                }
                bitmap.copy_region(&src, cell.pixels_mut(), CELL_SIZE);
                cells.push(cell);
            }
        }

        trace!(
            width = bitmap.width(),
            height = bitmap.height(),
            cells = cells.len(),
            "bitmap installed"
        );
        self.bounds = bounds;
        self.columns = columns;
        self.rows = rows;
        self.day = Some(cells);
        true
    }

    /// Cells to draw, deriving the night copy on first use
    ///
    /// If any cell belongs to an older pool generation the whole holder is
    /// recycled and `None` is returned.
    pub fn bitmaps(&mut self, night: bool, pool: &BufferPool) -> Option<&[PixelBuffer]> {
        let generation = pool.generation();
        let day_stale = self
            .day
            .as_ref()
            .is_some_and(|cells| cells.iter().any(|c| c.generation() != generation));
        if day_stale {
            debug!("bitmap cells are stale, discarding");
            self.recycle(pool);
            return None;
        }

        if !night {
            return self.day.as_deref();
        }

        let night_stale = self
            .night
            .as_ref()
            .is_some_and(|cells| cells.iter().any(|c| c.generation() != generation));
        if night_stale {
            if let Some(cells) = self.night.take() {
                release_all(cells, pool);
            }
        }

        if self.night.is_none() {
            let day = self.day.as_ref()?;
            let mut inverted = Vec::with_capacity(day.len());
            for cell in day {
                let Some(mut copy) = pool.acquire(cell.width(), cell.height()) else {
                    release_all(inverted, pool);
                    return None;
                };
                invert_into(cell.pixels(), copy.pixels_mut());
                inverted.push(copy);
            }
            self.night = Some(inverted);
        }
        self.night.as_deref()
    }

    /// Whether current-generation day content is installed
    ///
    /// Unlike [`bitmaps`](Self::bitmaps) this never derives the night copy
    /// or discards stale cells.
    pub fn has_day_bitmap(&self, pool: &BufferPool) -> bool {
        let generation = pool.generation();
        self.day
            .as_ref()
            .is_some_and(|cells| cells.iter().all(|c| c.generation() == generation))
    }

    /// Composite the cells into `target` (device coordinates)
    ///
    /// Returns `false` when there is nothing to draw.
    pub fn draw(
        &mut self,
        surface: &mut dyn Surface,
        night: bool,
        target: &RectF,
        pool: &BufferPool,
    ) -> bool {
        let transform = Transform::mapping(&self.bounds.to_f32(), target);
        let columns = self.columns;
        let sources: Vec<Rect> = (0..self.rows)
            .flat_map(|row| (0..columns).map(move |column| (column, row)))
            .map(|(column, row)| self.cell_source(column, row))
            .collect();

        let Some(cells) = self.bitmaps(night, pool) else {
            return false;
        };

        for (cell, src) in cells.iter().zip(&sources) {
            let local = Rect::new(0, 0, src.width(), src.height());
            let dst = transform.map_rect(&src.to_f32());
            surface.draw_cell(cell, &local, &dst);
        }
        true
    }

    /// Return every buffer to the pool, leaving the holder empty
    ///
    /// Returns the number of buffers released; a second call releases none.
    pub fn recycle(&mut self, pool: &BufferPool) -> usize {
        let mut released = 0;
        if let Some(cells) = self.day.take() {
            released += cells.len();
            release_all(cells, pool);
        }
        if let Some(cells) = self.night.take() {
            released += cells.len();
            release_all(cells, pool);
        }
        self.bounds = Rect::default();
        self.columns = 0;
        self.rows = 0;
        released
    }
}

fn release_all(cells: Vec<PixelBuffer>, pool: &BufferPool) {
    for cell in cells {
        pool.release(cell);
    }
}

/// Bytes one cell occupies
pub const CELL_BYTES: usize = (CELL_SIZE * CELL_SIZE) as usize * BYTES_PER_PIXEL;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::WHITE;
    use crate::surface::RgbaSurface;

    fn gradient(width: u32, height: u32) -> RawBitmap {
        let mut bitmap = RawBitmap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                bitmap.put_pixel(x, y, [(x % 256) as u8, (y % 256) as u8, 7, 255]);
            }
        }
        bitmap
    }

    #[test]
    fn test_grid_covers_bitmap() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        assert!(holder.set_bitmap(&gradient(300, 130), &pool));

        assert_eq!(holder.grid(), (3, 2));
        assert_eq!(holder.buffer_count(), 6);
        assert_eq!(pool.stats().outstanding, 6);
        assert_eq!(pool.stats().bytes_outstanding, 6 * CELL_BYTES);
    }

    #[test]
    fn test_edge_cells_are_cleared_to_black() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        holder.set_bitmap(&RawBitmap::new(130, 10), &pool);

        let cells = holder.bitmaps(false, &pool).unwrap();
        let edge = &cells[1];
        let stride = CELL_SIZE as usize * 4;
        assert_eq!(&edge.pixels()[0..4], &WHITE);
        assert_eq!(&edge.pixels()[8..12], &BLACK);
        assert_eq!(&edge.pixels()[20 * stride..20 * stride + 4], &BLACK);
        assert_eq!(&cells[0].pixels()[127 * 4..128 * 4], &WHITE);
    }

    #[test]
    fn test_recycle_is_idempotent() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        holder.set_bitmap(&gradient(256, 256), &pool);
        holder.bitmaps(true, &pool).unwrap();

        assert_eq!(holder.recycle(&pool), 8);
        assert_eq!(holder.recycle(&pool), 0);
        assert!(holder.is_empty());

        let stats = pool.stats();
        assert_eq!(stats.released, 8);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free_buffers, 8);
    }

    #[test]
    fn test_set_bitmap_replaces_previous_content() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        holder.set_bitmap(&gradient(256, 128), &pool);
        holder.set_bitmap(&gradient(128, 128), &pool);

        assert_eq!(holder.grid(), (1, 1));
        assert_eq!(pool.stats().outstanding, 1);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_night_copy_is_inverted_and_cached() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        holder.set_bitmap(&RawBitmap::new(64, 64), &pool);

        let night = holder.bitmaps(true, &pool).unwrap();
        assert_eq!(&night[0].pixels()[0..4], &[0, 0, 0, 255]);
        let night_id = night[0].id();

        let again = holder.bitmaps(true, &pool).unwrap();
        assert_eq!(again[0].id(), night_id);
        assert_eq!(holder.buffer_count(), 2);
    }

    #[test]
    fn test_stale_cells_discard_holder() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        holder.set_bitmap(&gradient(200, 200), &pool);
        pool.invalidate();

        assert!(holder.bitmaps(false, &pool).is_none());
        assert!(holder.is_empty());
        let stats = pool.stats();
        assert_eq!(stats.discarded, 4);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_day_bitmap_check_has_no_side_effects() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        assert!(!holder.has_day_bitmap(&pool));

        holder.set_bitmap(&gradient(200, 200), &pool);
        assert!(holder.has_day_bitmap(&pool));
        assert_eq!(holder.buffer_count(), 4);

        pool.invalidate();
        assert!(!holder.has_day_bitmap(&pool));
        assert!(!holder.is_empty());
        assert_eq!(pool.stats().discarded, 0);
    }

    #[test]
    fn test_allocation_failure_leaves_holder_empty() {
        let pool = BufferPool::with_byte_budget(CELL_BYTES * 3);
        let mut holder = BitmapHolder::new();
        assert!(!holder.set_bitmap(&gradient(256, 256), &pool));
        assert!(holder.is_empty());
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_draw_maps_cells_into_target() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        let mut bitmap = RawBitmap::new(256, 128);
        for y in 0..128 {
            for x in 128..256 {
                bitmap.put_pixel(x, y, BLACK);
            }
        }
        holder.set_bitmap(&bitmap, &pool);

        let mut surface = RgbaSurface::new(100, 50);
        let drawn = holder.draw(&mut surface, false, &RectF::new(0.0, 0.0, 100.0, 50.0), &pool);

        assert!(drawn);
        assert_eq!(surface.cells_drawn(), 2);
        assert_eq!(surface.pixel(10, 10), WHITE);
        assert_eq!(surface.pixel(90, 40), BLACK);
    }

    #[test]
    fn test_draw_night_inverts() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        holder.set_bitmap(&RawBitmap::new(10, 10), &pool);

        let mut surface = RgbaSurface::new(10, 10);
        holder.draw(&mut surface, true, &RectF::from_size(10.0, 10.0), &pool);
        assert_eq!(surface.pixel(5, 5), BLACK);
    }

    #[test]
    fn test_empty_holder_draws_nothing() {
        let pool = BufferPool::new();
        let mut holder = BitmapHolder::new();
        let mut surface = RgbaSurface::new(10, 10);
        assert!(!holder.draw(&mut surface, false, &RectF::from_size(10.0, 10.0), &pool));
    }
}
