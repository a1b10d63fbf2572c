//! Pooled pixel buffers with generation-based staleness
//!
//! Decoded tiles are stored in fixed-size RGBA buffers that are handed back
//! to the pool instead of being freed. The pool keeps one free list per exact
//! `(width, height)` and a generation counter; bumping the generation (on
//! memory pressure or document close) makes every outstanding buffer stale.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Bytes per RGBA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// A pooled RGBA pixel buffer
///
/// Buffers are move-only: handing one back through [`BufferPool::release`]
/// consumes it, so the same buffer can never be released twice.
#[derive(Debug)]
pub struct PixelBuffer {
    id: u64,
    generation: u64,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    fn allocate(id: u64, generation: u64, width: u32, height: u32) -> Option<Self> {
        let size = byte_size(width, height);
        let mut pixels = Vec::new();
        if pixels.try_reserve_exact(size).is_err() {
            return None;
        }
        pixels.resize(size, 0);
        Some(Self {
            id,
            generation,
            width,
            height,
            pixels,
        })
    }

    /// Pool-unique buffer id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pool generation this buffer was handed out under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes, row-major, `width * 4` bytes per row
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Memory held by this buffer in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Fill the whole buffer with one RGBA colour
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
    }
}

fn byte_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Statistics about pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolStats {
    /// Buffers created by fresh allocation
    pub allocated: u64,

    /// Acquisitions served from a free list
    pub reused: u64,

    /// Buffers handed back to the pool
    pub released: u64,

    /// Stale buffers dropped on release instead of recycled
    pub discarded: u64,

    /// Acquisitions refused (allocation failure or budget exhausted)
    pub refused: u64,

    /// Buffers currently handed out
    pub outstanding: usize,

    /// Buffers sitting in free lists
    pub free_buffers: usize,

    /// Bytes held by outstanding buffers
    pub bytes_outstanding: usize,

    /// Bytes held by free buffers
    pub bytes_free: usize,

    /// Optional byte budget covering outstanding and free buffers
    pub byte_budget: Option<usize>,

    /// Current pool generation
    pub generation: u64,
}

impl PoolStats {
    /// Fraction of acquisitions served without allocating (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.allocated + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }

    /// Fraction of the byte budget in use (0.0 when unbounded)
    pub fn utilization(&self) -> f64 {
        match self.byte_budget {
            Some(budget) if budget > 0 => {
                (self.bytes_outstanding + self.bytes_free) as f64 / budget as f64
            }
            _ => 0.0,
        }
    }
}

struct PoolState {
    free: HashMap<(u32, u32), Vec<PixelBuffer>>,
    generation: u64,
    next_id: u64,
    byte_budget: Option<usize>,
    stats: PoolStats,
}

impl PoolState {
    fn new(byte_budget: Option<usize>) -> Self {
        Self {
            free: HashMap::new(),
            generation: 0,
            next_id: 1,
            byte_budget,
            stats: PoolStats {
                byte_budget,
                ..Default::default()
            },
        }
    }

    fn bytes_in_use(&self) -> usize {
        self.stats.bytes_outstanding + self.stats.bytes_free
    }

    /// Drop free buffers until `required` more bytes fit the budget.
    fn make_room(&mut self, required: usize, budget: usize) -> bool {
        while self.bytes_in_use() + required > budget {
            let Some(key) = self.free.keys().next().copied() else {
                return false;
            };
            let bucket_empty = match self.free.get_mut(&key) {
                Some(bucket) => {
                    if let Some(buffer) = bucket.pop() {
                        self.stats.bytes_free -= buffer.byte_size();
                        self.stats.free_buffers -= 1;
                    }
                    bucket.is_empty()
                }
                None => true,
            };
            if bucket_empty {
                self.free.remove(&key);
            }
        }
        true
    }

    fn clear_free(&mut self) -> usize {
        let dropped = self.stats.free_buffers;
        self.free.clear();
        self.stats.free_buffers = 0;
        self.stats.bytes_free = 0;
        dropped
    }
}

/// Shared pool of fixed-size RGBA buffers
///
/// Cloning the pool yields another handle to the same buffers; the decode
/// worker and the UI thread both hold one.
///
/// # Example
///
/// ```
/// use docview_cache::BufferPool;
///
/// let pool = BufferPool::new();
/// let buffer = pool.acquire(128, 128).expect("allocation");
/// pool.release(buffer);
///
/// // Same size again: served from the free list
/// let again = pool.acquire(128, 128).expect("allocation");
/// assert_eq!(pool.stats().reused, 1);
/// pool.release(again);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    state: Arc<Mutex<PoolState>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// Create an unbounded pool
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::new(None))),
        }
    }

    /// Create a pool whose outstanding plus free buffers never exceed `bytes`
    pub fn with_byte_budget(bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::new(Some(bytes)))),
        }
    }

    /// Create a pool with a budget in megabytes
    pub fn with_mb_budget(megabytes: usize) -> Self {
        Self::with_byte_budget(megabytes * 1024 * 1024)
    }

    /// Obtain a buffer of exactly `width` x `height` pixels
    ///
    /// Served from the matching free list when possible, otherwise freshly
    /// allocated. Returns `None` when the allocation fails or the byte budget
    /// cannot accommodate it even after dropping free buffers; the caller is
    /// expected to fall back to placeholder rendering.
    pub fn acquire(&self, width: u32, height: u32) -> Option<PixelBuffer> {
        if width == 0 || height == 0 {
            return None;
        }

        let mut state = self.state.lock();
        let generation = state.generation;

        if let Some(mut buffer) = state.free.get_mut(&(width, height)).and_then(Vec::pop) {
            let size = buffer.byte_size();
            buffer.generation = generation;
            state.stats.free_buffers -= 1;
            state.stats.bytes_free -= size;
            state.stats.outstanding += 1;
            state.stats.bytes_outstanding += size;
            state.stats.reused += 1;
            trace!(buffer = buffer.id, width, height, "buffer reused");
            return Some(buffer);
        }

        let size = byte_size(width, height);
        if let Some(budget) = state.byte_budget {
            if !state.make_room(size, budget) {
                state.stats.refused += 1;
                debug!(width, height, budget, "pool budget exhausted");
                return None;
            }
        }

        let id = state.next_id;
        let Some(buffer) = PixelBuffer::allocate(id, generation, width, height) else {
            state.stats.refused += 1;
            warn!(width, height, "pixel buffer allocation failed");
            return None;
        };
        state.next_id += 1;
        state.stats.allocated += 1;
        state.stats.outstanding += 1;
        state.stats.bytes_outstanding += size;
        trace!(buffer = id, width, height, "buffer allocated");
        Some(buffer)
    }

    /// Hand a buffer back to the pool
    ///
    /// Buffers from an older generation are dropped rather than recycled.
    pub fn release(&self, buffer: PixelBuffer) {
        let mut state = self.state.lock();
        let size = buffer.byte_size();
        state.stats.outstanding = state.stats.outstanding.saturating_sub(1);
        state.stats.bytes_outstanding = state.stats.bytes_outstanding.saturating_sub(size);
        state.stats.released += 1;

        if buffer.generation != state.generation {
            state.stats.discarded += 1;
            trace!(buffer = buffer.id, "stale buffer dropped");
            return;
        }

        state.stats.free_buffers += 1;
        state.stats.bytes_free += size;
        state
            .free
            .entry((buffer.width, buffer.height))
            .or_default()
            .push(buffer);
    }

    /// Whether `buffer` belongs to the current pool generation
    pub fn is_current(&self, buffer: &PixelBuffer) -> bool {
        buffer.generation == self.state.lock().generation
    }

    /// Start a new generation
    ///
    /// Every outstanding buffer becomes stale and the free lists are dropped.
    /// Returns the new generation.
    pub fn invalidate(&self) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.stats.generation = state.generation;
        let dropped = state.clear_free();
        debug!(generation = state.generation, dropped, "pool invalidated");
        state.generation
    }

    /// Drop every free buffer, returning how many were dropped
    pub fn trim(&self) -> usize {
        let dropped = self.state.lock().clear_free();
        debug!(dropped, "pool trimmed");
        dropped
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Snapshot of pool statistics
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}
