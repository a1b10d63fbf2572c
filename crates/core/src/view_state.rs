//! Per-event snapshot of everything the tile decisions depend on
//!
//! A `ViewState` is taken once per scroll, zoom or resize event and passed
//! through the whole update pass, so every node of every page sees the same
//! viewport, zoom and page layout.

use crate::config::ViewerConfig;
use docview_render::RectF;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Tile subdivision policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Subdivide when tiles exceed the slice limit or zoom passes a threshold
    #[default]
    Normal,
    /// Never subdivide; one bitmap per page
    NativeResolution,
    /// Subdivide by bitmap byte size and drop parents hidden by children
    LowMemory,
}

impl FromStr for DecodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "normal" => Ok(Self::Normal),
            "native" | "native_resolution" => Ok(Self::NativeResolution),
            "low_memory" => Ok(Self::LowMemory),
            other => Err(format!("unknown decode mode: {other}")),
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::NativeResolution => "native_resolution",
            Self::LowMemory => "low_memory",
        };
        f.write_str(name)
    }
}

/// Immutable view snapshot
#[derive(Debug, Clone)]
pub struct ViewState {
    /// Visible region in layout coordinates
    pub view_rect: RectF,
    pub zoom: f32,
    /// `false` while a zoom gesture is still in progress
    pub committed: bool,
    pub decode_mode: DecodeMode,
    pub night_mode: bool,
    /// View index of the current page
    pub current_page: usize,
    pub pages_in_memory: usize,
    /// Page being animated to during a page transition
    pub focus_page: Option<usize>,
    pub slice_limit: u32,
    pub max_image_size: u64,
    pages: Arc<[RectF]>,
}

impl ViewState {
    /// Snapshot with default settings
    pub fn new(view_rect: RectF, zoom: f32, pages: impl Into<Arc<[RectF]>>) -> Self {
        let defaults = ViewerConfig::default();
        Self {
            view_rect,
            zoom,
            committed: true,
            decode_mode: defaults.decode_mode,
            night_mode: defaults.night_mode,
            current_page: 0,
            pages_in_memory: defaults.pages_in_memory,
            focus_page: None,
            slice_limit: defaults.slice_limit,
            max_image_size: defaults.max_image_size,
            pages: pages.into(),
        }
    }

    /// Take decode settings from `config`
    pub fn with_config(mut self, config: &ViewerConfig) -> Self {
        self.decode_mode = config.decode_mode;
        self.night_mode = config.night_mode;
        self.pages_in_memory = config.pages_in_memory;
        self.slice_limit = config.slice_limit;
        self.max_image_size = config.max_image_size;
        self
    }

    pub fn with_current_page(mut self, page: usize) -> Self {
        self.current_page = page;
        self
    }

    pub fn with_committed(mut self, committed: bool) -> Self {
        self.committed = committed;
        self
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    pub fn with_focus_page(mut self, page: Option<usize>) -> Self {
        self.focus_page = page;
        self
    }

    pub fn with_pages_in_memory(mut self, pages: usize) -> Self {
        self.pages_in_memory = pages;
        self
    }

    /// Layout bounds of view page `index` at the time of the snapshot
    pub fn page_bounds(&self, index: usize) -> Option<RectF> {
        self.pages.get(index).copied()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages kept on each side of the current page
    pub fn keep_window(&self) -> usize {
        self.pages_in_memory.div_ceil(2)
    }

    /// Whether page `index` lies inside the resident window
    pub fn is_page_kept_in_memory(&self, index: usize) -> bool {
        let half = self.keep_window();
        self.current_page.saturating_sub(half) <= index
            && index <= self.current_page.saturating_add(half)
    }

    /// Whether a node drawn at `target` intersects the viewport
    pub fn is_node_visible(&self, target: &RectF) -> bool {
        self.view_rect.intersects(target)
    }

    /// Nodes stay resident while their page is resident or they are visible
    pub fn is_node_kept_in_memory(&self, page: usize, target: &RectF) -> bool {
        self.is_page_kept_in_memory(page) || self.is_node_visible(target)
    }

    pub fn viewport_center(&self) -> (f32, f32) {
        self.view_rect.center()
    }

    /// Convert layout coordinates to surface coordinates
    pub fn to_surface(&self, rect: &RectF) -> RectF {
        rect.offset(-self.view_rect.left, -self.view_rect.top)
    }
}
