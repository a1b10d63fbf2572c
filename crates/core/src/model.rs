//! Document model: the list of view pages built from an open document

use crate::config::ViewerConfig;
use crate::error::DocumentResult;
use crate::page::{Page, PageIndex, PageType};
use docview_cache::{PageInfoCache, PageSize};
use docview_render::{CodecContext, CodecDocument};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size assumed for pages the decoder cannot measure (US Letter in points)
pub const FALLBACK_PAGE_SIZE: PageSize = PageSize {
    width: 612,
    height: 792,
};

/// Pages of an open document
#[derive(Debug)]
pub struct DocumentModel {
    path: PathBuf,
    doc_page_count: usize,
    pub(crate) pages: Vec<Page>,
}

impl DocumentModel {
    /// Open `path` and build its pages
    ///
    /// The document handle is returned separately so it can be moved to the
    /// decode thread.
    pub fn open(
        context: &dyn CodecContext,
        path: &Path,
        password: Option<&str>,
        config: &ViewerConfig,
        cache: Option<&PageInfoCache>,
    ) -> DocumentResult<(Self, Box<dyn CodecDocument>)> {
        let document = context.open_document(path, password)?;
        let sizes = page_sizes(document.as_ref(), path, cache);
        let model = Self::from_sizes(path, &sizes, config);
        debug!(
            path = %path.display(),
            doc_pages = model.doc_page_count,
            view_pages = model.pages.len(),
            "document model built"
        );
        Ok((model, document))
    }

    /// Build pages from known document page sizes
    pub fn from_sizes(path: &Path, sizes: &[Option<PageSize>], config: &ViewerConfig) -> Self {
        let fallback = sizes.iter().flatten().next().copied().unwrap_or(FALLBACK_PAGE_SIZE);
        let threshold = config.root_zoom_threshold;
        let mut pages = Vec::with_capacity(sizes.len());

        for (doc_index, size) in sizes.iter().enumerate() {
            let size = size.unwrap_or(fallback);
            if config.split_pages && size.is_landscape() {
                for page_type in [PageType::Left, PageType::Right] {
                    let index = PageIndex::new(doc_index, pages.len());
                    pages.push(Page::new(index, page_type, size, threshold));
                }
            } else {
                let index = PageIndex::new(doc_index, pages.len());
                pages.push(Page::new(index, PageType::Full, size, threshold));
            }
        }

        Self {
            path: path.to_path_buf(),
            doc_page_count: sizes.len(),
            pages,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pages in the decoder
    pub fn doc_page_count(&self) -> usize {
        self.doc_page_count
    }

    /// Pages in the view
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, view_index: usize) -> Option<&Page> {
        self.pages.get(view_index)
    }

    pub fn page_mut(&mut self, view_index: usize) -> Option<&mut Page> {
        self.pages.get_mut(view_index)
    }

    /// First view page showing document page `doc_index`
    pub fn view_index_of(&self, doc_index: usize) -> Option<usize> {
        self.pages
            .iter()
            .position(|page| page.index().doc_index == doc_index)
    }
}

/// Native page sizes, from the persisted cache when it matches the document
fn page_sizes(
    document: &dyn CodecDocument,
    path: &Path,
    cache: Option<&PageInfoCache>,
) -> Vec<Option<PageSize>> {
    let count = document.page_count();

    if let Some(cache) = cache {
        match cache.load(path) {
            Some(sizes) if sizes.len() == count => {
                debug!(pages = count, "page sizes loaded from cache");
                return sizes;
            }
            Some(sizes) => {
                debug!(
                    cached = sizes.len(),
                    pages = count,
                    "page size cache does not match document, rebuilding"
                );
            }
            None => {}
        }
    }

    let sizes: Vec<Option<PageSize>> = (0..count)
        .map(|index| document.page_info(index).or_else(|| measure_page(document, index)))
        .collect();

    if let Some(cache) = cache {
        if let Err(e) = cache.store(path, &sizes) {
            warn!(path = %path.display(), error = %e, "failed to store page sizes");
        }
    }
    sizes
}

/// Open the page to read its size when the decoder has no cheap page info
fn measure_page(document: &dyn CodecDocument, index: usize) -> Option<PageSize> {
    match document.open_page(index) {
        Ok(mut page) => {
            let size = PageSize::new(page.width(), page.height());
            page.recycle();
            Some(size)
        }
        Err(e) => {
            debug!(page = index, error = %e, "page size unavailable");
            None
        }
    }
}
