//! Document viewer cache library
//!
//! Pooled pixel buffers for decoded tiles, the persisted page-size cache and
//! the bounded LRU used for open decoder pages.

pub mod lru_pages;
pub mod page_info;
pub mod pool;

pub use lru_pages::{EvictingLru, DEFAULT_PAGE_CAPACITY};
pub use page_info::{load_pages_info, store_pages_info, PageInfoCache, PageSize};
pub use pool::{BufferPool, PixelBuffer, PoolStats, BYTES_PER_PIXEL};
