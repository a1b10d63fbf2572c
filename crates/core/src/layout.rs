//! Page placement

use crate::page::Page;
use docview_render::RectF;

/// Places pages in layout coordinates
pub trait PageLayout: Send {
    /// Assign bounds to every page for a viewport `viewport_width` wide at
    /// `zoom`, returning the content size
    fn layout(&self, pages: &mut [Page], viewport_width: f32, zoom: f32) -> (f32, f32);

    /// Page under the viewport centre, or the nearest one after it
    fn current_page(&self, pages: &[Page], viewport: &RectF) -> usize {
        let (_, center) = viewport.center();
        let index = pages.partition_point(|page| page.bounds().bottom < center);
        index.min(pages.len().saturating_sub(1))
    }
}

/// Continuous top-to-bottom scroll of full-width pages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalLayout {
    gap: f32,
}

impl VerticalLayout {
    pub fn new(gap: f32) -> Self {
        Self { gap: gap.max(0.0) }
    }

    pub fn gap(&self) -> f32 {
        self.gap
    }
}

impl Default for VerticalLayout {
    fn default() -> Self {
        Self::new(8.0)
    }
}

impl PageLayout for VerticalLayout {
    fn layout(&self, pages: &mut [Page], viewport_width: f32, zoom: f32) -> (f32, f32) {
        let width = (viewport_width * zoom).max(0.0);
        let mut y = 0.0;

        for page in pages.iter_mut() {
            let height = page.height_for_width(width);
            page.set_bounds(RectF::new(0.0, y, width, y + height));
            y += height + self.gap;
        }

        let height = if pages.is_empty() { 0.0 } else { y - self.gap };
        (width, height)
    }
}
