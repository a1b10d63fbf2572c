//! Logical pages and their placement

use crate::tree::PageTree;
use docview_cache::PageSize;
use docview_render::RectF;
use tracing::debug;

/// Relative change below which a new aspect ratio is ignored
const ASPECT_EPSILON: f32 = 1e-3;

/// Position of a page in the document and in the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageIndex {
    /// Page number in the decoder
    pub doc_index: usize,
    /// Position in the view; differs from `doc_index` once pages are split
    pub view_index: usize,
}

impl PageIndex {
    pub fn new(doc_index: usize, view_index: usize) -> Self {
        Self {
            doc_index,
            view_index,
        }
    }
}

/// Which part of a document page a view page shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PageType {
    #[default]
    Full,
    /// Left half of a split landscape page
    Left,
    /// Right half of a split landscape page
    Right,
}

impl PageType {
    /// Slice of the document page shown by this view page
    pub fn initial_rect(&self) -> RectF {
        match self {
            Self::Full => RectF::UNIT,
            Self::Left => RectF::new(0.0, 0.0, 0.5, 1.0),
            Self::Right => RectF::new(0.5, 0.0, 1.0, 1.0),
        }
    }

    /// Document page width over view page width
    pub fn width_scale(&self) -> f32 {
        match self {
            Self::Full => 1.0,
            Self::Left | Self::Right => 2.0,
        }
    }

    /// Left edge of the shown slice in document page units
    pub fn left_pos(&self) -> f32 {
        match self {
            Self::Full | Self::Left => 0.0,
            Self::Right => 0.5,
        }
    }
}

/// Where a page sits in the layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_type: PageType,
    pub bounds: RectF,
}

impl PageGeometry {
    /// Layout rectangle covered by `slice` of the document page
    pub fn target_rect(&self, slice: &RectF) -> RectF {
        let full_width = self.bounds.width() * self.page_type.width_scale();
        let left = self.bounds.left - full_width * self.page_type.left_pos();
        let height = self.bounds.height();
        RectF::new(
            left + slice.left * full_width,
            self.bounds.top + slice.top * height,
            left + slice.right * full_width,
            self.bounds.top + slice.bottom * height,
        )
    }

    /// Width the whole document page would have at zoom 1
    pub fn base_width(&self, zoom: f32) -> f32 {
        if zoom > 0.0 {
            self.bounds.width() * self.page_type.width_scale() / zoom
        } else {
            self.bounds.width() * self.page_type.width_scale()
        }
    }
}

/// One view page with its tile tree
#[derive(Debug)]
pub struct Page {
    index: PageIndex,
    page_type: PageType,
    aspect_ratio: f32,
    bounds: RectF,
    kept_in_memory: bool,
    pub(crate) tree: PageTree,
}

impl Page {
    pub fn new(index: PageIndex, page_type: PageType, size: PageSize, root_threshold: f32) -> Self {
        let mut page = Self {
            index,
            page_type,
            aspect_ratio: 1.0,
            bounds: RectF::default(),
            kept_in_memory: false,
            tree: PageTree::new(page_type.initial_rect(), root_threshold),
        };
        page.set_aspect_ratio(size.width as f32, size.height as f32);
        page
    }

    pub fn index(&self) -> PageIndex {
        self.index
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    /// View page width over height
    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    /// Layout bounds set by the active layout
    pub fn bounds(&self) -> RectF {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: RectF) {
        self.bounds = bounds;
    }

    pub fn geometry(&self) -> PageGeometry {
        PageGeometry {
            page_type: self.page_type,
            bounds: self.bounds,
        }
    }

    pub fn is_kept_in_memory(&self) -> bool {
        self.kept_in_memory
    }

    pub(crate) fn set_kept_in_memory(&mut self, kept: bool) {
        self.kept_in_memory = kept;
    }

    pub fn tree(&self) -> &PageTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut PageTree {
        &mut self.tree
    }

    /// Set the aspect ratio from document page dimensions
    ///
    /// Returns whether the ratio changed noticeably; the layout must then be
    /// recomputed.
    pub fn set_aspect_ratio(&mut self, width: f32, height: f32) -> bool {
        if !(width > 0.0 && height > 0.0) {
            return false;
        }
        let ratio = (width / self.page_type.width_scale()) / height;
        if (ratio - self.aspect_ratio).abs() <= ASPECT_EPSILON * self.aspect_ratio {
            return false;
        }
        debug!(
            page = self.index.view_index,
            from = self.aspect_ratio,
            to = ratio,
            "page aspect ratio changed"
        );
        self.aspect_ratio = ratio;
        true
    }

    /// Correct the aspect ratio from a decoded bitmap of `slice`
    pub fn update_aspect_from_bitmap(&mut self, width: u32, height: u32, slice: &RectF) -> bool {
        if slice.is_empty() {
            return false;
        }
        self.set_aspect_ratio(width as f32 / slice.width(), height as f32 / slice.height())
    }

    /// Layout height for a given layout width
    pub fn height_for_width(&self, width: f32) -> f32 {
        width / self.aspect_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_page_target_rects() {
        let bounds = RectF::new(100.0, 0.0, 500.0, 600.0);
        let left = PageGeometry {
            page_type: PageType::Left,
            bounds,
        };
        let right = PageGeometry {
            page_type: PageType::Right,
            bounds,
        };

        assert_eq!(left.target_rect(&PageType::Left.initial_rect()), bounds);
        assert_eq!(right.target_rect(&PageType::Right.initial_rect()), bounds);
        assert_eq!(
            right.target_rect(&RectF::new(0.75, 0.0, 1.0, 0.5)),
            RectF::new(300.0, 0.0, 500.0, 300.0)
        );
    }

    #[test]
    fn test_split_page_aspect_ratio() {
        let page = Page::new(
            PageIndex::new(0, 1),
            PageType::Right,
            PageSize::new(1600, 1000),
            2.0,
        );
        assert!((page.aspect_ratio() - 0.8).abs() < 1e-6);
        assert!((page.height_for_width(400.0) - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_aspect_from_partial_bitmap() {
        let mut page = Page::new(PageIndex::new(0, 0), PageType::Full, PageSize::new(100, 100), 2.0);
        // Quarter tile of a 2:1 page
        let changed = page.update_aspect_from_bitmap(100, 25, &RectF::new(0.0, 0.0, 0.5, 0.5));
        assert!(changed);
        assert!((page.aspect_ratio() - 4.0).abs() < 1e-6);

        assert!(!page.update_aspect_from_bitmap(200, 50, &RectF::UNIT));
        assert!(!page.set_aspect_ratio(0.0, 10.0));
    }

    #[test]
    fn test_base_width_undoes_zoom() {
        let geometry = PageGeometry {
            page_type: PageType::Left,
            bounds: RectF::new(0.0, 0.0, 600.0, 900.0),
        };
        assert!((geometry.base_width(2.0) - 600.0).abs() < 1e-6);
    }
}
