//! Document viewer core library
//!
//! Tiled page decode-and-cache pipeline. Each page owns a quadtree of
//! tiles; tiles are decoded off the UI thread by a single-worker executor,
//! stored in pooled pixel buffers, composited on demand and evicted when
//! they leave the resident window.
//!
//! # Example
//!
//! ```
//! use docview_cache::PageSize;
//! use docview_core::{DocumentView, ViewerConfig};
//! use docview_render::{RgbaSurface, SyntheticContext, SyntheticSpec};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let context = SyntheticContext::new()
//!     .with_document("book.pdf", SyntheticSpec::uniform(3, PageSize::new(600, 800)));
//! let config = ViewerConfig::default().with_page_cache_dir(None::<&Path>);
//!
//! let mut view = DocumentView::open(&context, "book.pdf", None, config).unwrap();
//! view.set_viewport(600.0, 800.0);
//! assert!(view.wait_idle(Duration::from_secs(5)));
//!
//! let mut surface = RgbaSurface::new(600, 800);
//! assert_eq!(view.draw(&mut surface), 1);
//! ```

pub mod actions;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod layout;
pub mod model;
pub mod page;
pub mod priority;
pub mod tree;
pub mod view_state;

pub use actions::{ActionArgs, ActionDispatcher, ActionHandler, ActionId, ActionTable};
pub use config::{ViewerConfig, MIN_SLICE_LIMIT};
pub use controller::{DocumentView, RedrawSink, ViewStats};
pub use decode::{
    DecodeCompletion, DecodeKind, DecodeRequest, NodeExecutor, PageDecoder, MAX_BITMAP_PIXELS,
};
pub use error::{ConfigError, DocumentError, DocumentResult};
pub use layout::{PageLayout, VerticalLayout};
pub use model::{DocumentModel, FALLBACK_PAGE_SIZE};
pub use page::{Page, PageGeometry, PageIndex, PageType};
pub use priority::sort_candidates;
pub use tree::{
    DecodeCandidate, DecodeControl, NodeKey, NodeRef, NodeRelease, PageTree, TileNode,
    TreeContext, MAX_TREE_DEPTH, REDECODE_ZOOM_FACTOR,
};
pub use view_state::{DecodeMode, ViewState};
