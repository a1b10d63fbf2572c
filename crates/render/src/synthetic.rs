//! Procedural decoder backend
//!
//! Produces deterministic page images without any native library: a white
//! margin around a striped content box whose shade depends on the page
//! index. The pattern is a function of page coordinates, so tiles rendered
//! at different zoom levels line up. Counters record every decoder call.

use crate::bitmap::RawBitmap;
use crate::codec::{CodecContext, CodecDocument, CodecError, CodecPage, CodecResult};
use crate::geometry::RectF;
use docview_cache::PageSize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Description of one synthetic document
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pages: Vec<PageSize>,
    password: Option<String>,
    corrupt: bool,
    failing_pages: HashSet<usize>,
    margin: f32,
    render_delay: Duration,
    report_sizes: bool,
}

impl SyntheticSpec {
    /// `count` pages of the same size
    pub fn uniform(count: usize, size: PageSize) -> Self {
        Self::with_pages(vec![size; count])
    }

    pub fn with_pages(pages: Vec<PageSize>) -> Self {
        Self {
            pages,
            password: None,
            corrupt: false,
            failing_pages: HashSet::new(),
            margin: 0.0,
            render_delay: Duration::ZERO,
            report_sizes: true,
        }
    }

    /// Require `password` to open
    pub fn protected(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Fail every open with `CorruptFile`
    pub fn corrupt(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// Make rendering of page `index` fail
    pub fn failing_page(mut self, index: usize) -> Self {
        self.failing_pages.insert(index);
        self
    }

    /// Blank border on every side, as a fraction of the page (0.0 to 0.45)
    pub fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin.clamp(0.0, 0.45);
        self
    }

    /// Sleep this long in every render call
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// Report unknown sizes from `page_info`, forcing pages to be opened
    pub fn without_page_info(mut self) -> Self {
        self.report_sizes = false;
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }
}

/// Counters shared by a context and everything it opens
#[derive(Debug, Default)]
struct Counters {
    documents_opened: AtomicU64,
    documents_recycled: AtomicU64,
    page_info_queries: AtomicU64,
    pages_opened: AtomicU64,
    pages_recycled: AtomicU64,
    renders: AtomicU64,
    failed_renders: AtomicU64,
}

/// Snapshot of decoder activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub documents_opened: u64,
    pub documents_recycled: u64,
    pub page_info_queries: u64,
    pub pages_opened: u64,
    pub pages_recycled: u64,
    pub renders: u64,
    pub failed_renders: u64,
}

/// Decoder backend serving registered synthetic documents
#[derive(Debug, Clone, Default)]
pub struct SyntheticContext {
    documents: HashMap<PathBuf, SyntheticSpec>,
    counters: Arc<Counters>,
}

impl SyntheticContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `spec` for `path`
    pub fn with_document(mut self, path: impl Into<PathBuf>, spec: SyntheticSpec) -> Self {
        self.documents.insert(path.into(), spec);
        self
    }

    pub fn stats(&self) -> SyntheticStats {
        let c = &self.counters;
        SyntheticStats {
            documents_opened: c.documents_opened.load(Ordering::Relaxed),
            documents_recycled: c.documents_recycled.load(Ordering::Relaxed),
            page_info_queries: c.page_info_queries.load(Ordering::Relaxed),
            pages_opened: c.pages_opened.load(Ordering::Relaxed),
            pages_recycled: c.pages_recycled.load(Ordering::Relaxed),
            renders: c.renders.load(Ordering::Relaxed),
            failed_renders: c.failed_renders.load(Ordering::Relaxed),
        }
    }
}

impl CodecContext for SyntheticContext {
    fn open_document(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> CodecResult<Box<dyn CodecDocument>> {
        let spec = self.documents.get(path).ok_or_else(|| {
            CodecError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such document: {}", path.display()),
            ))
        })?;

        if spec.corrupt {
            return Err(CodecError::CorruptFile(format!(
                "{} is not a document",
                path.display()
            )));
        }
        if let Some(expected) = &spec.password {
            if password != Some(expected.as_str()) {
                return Err(CodecError::PasswordRequired);
            }
        }

        self.counters.documents_opened.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path.display(), pages = spec.pages.len(), "synthetic document opened");
        Ok(Box::new(SyntheticDocument {
            spec: Arc::new(spec.clone()),
            counters: Arc::clone(&self.counters),
            recycled: false,
        }))
    }
}

struct SyntheticDocument {
    spec: Arc<SyntheticSpec>,
    counters: Arc<Counters>,
    recycled: bool,
}

impl CodecDocument for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.spec.pages.len()
    }

    fn page_info(&self, index: usize) -> Option<PageSize> {
        self.counters.page_info_queries.fetch_add(1, Ordering::Relaxed);
        if !self.spec.report_sizes {
            return None;
        }
        self.spec.pages.get(index).copied()
    }

    fn open_page(&self, index: usize) -> CodecResult<Box<dyn CodecPage>> {
        let size = *self
            .spec
            .pages
            .get(index)
            .ok_or(CodecError::InvalidPage(index))?;
        self.counters.pages_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SyntheticPage {
            index,
            size,
            spec: Arc::clone(&self.spec),
            counters: Arc::clone(&self.counters),
            recycled: false,
        }))
    }

    fn recycle(&mut self) {
        if !self.recycled {
            self.recycled = true;
            self.counters.documents_recycled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct SyntheticPage {
    index: usize,
    size: PageSize,
    spec: Arc<SyntheticSpec>,
    counters: Arc<Counters>,
    recycled: bool,
}

/// Colour of the page at fractional coordinates `(u, v)`
fn shade(index: usize, margin: f32, u: f32, v: f32) -> [u8; 4] {
    if u < margin || u >= 1.0 - margin || v < margin || v >= 1.0 - margin {
        return [0xFF, 0xFF, 0xFF, 0xFF];
    }
    let stripe = ((u * 16.0) as i32 + (v * 16.0) as i32) % 2 == 0;
    let tint = (index * 37 % 120) as u8;
    if stripe {
        [20, 40 + tint, 90, 0xFF]
    } else {
        [140, 150, 160u8.saturating_sub(tint / 4), 0xFF]
    }
}

impl CodecPage for SyntheticPage {
    fn width(&self) -> u32 {
        self.size.width
    }

    fn height(&self) -> u32 {
        self.size.height
    }

    fn render(&mut self, width: u32, height: u32, slice: &RectF) -> CodecResult<RawBitmap> {
        if !self.spec.render_delay.is_zero() {
            thread::sleep(self.spec.render_delay);
        }
        if self.spec.failing_pages.contains(&self.index) {
            self.counters.failed_renders.fetch_add(1, Ordering::Relaxed);
            return Err(CodecError::Decode(format!("page {} is damaged", self.index)));
        }
        if width == 0 || height == 0 {
            return Err(CodecError::Decode(format!(
                "empty render size {width}x{height}"
            )));
        }

        let mut bitmap = RawBitmap::new(width, height);
        for y in 0..height {
            let v = slice.top + (y as f32 + 0.5) / height as f32 * slice.height();
            for x in 0..width {
                let u = slice.left + (x as f32 + 0.5) / width as f32 * slice.width();
                bitmap.put_pixel(x, y, shade(self.index, self.spec.margin, u, v));
            }
        }

        self.counters.renders.fetch_add(1, Ordering::Relaxed);
        trace!(page = self.index, width, height, "synthetic page rendered");
        Ok(bitmap)
    }

    fn recycle(&mut self) {
        if !self.recycled {
            self.recycled = true;
            self.counters.pages_recycled.fetch_add(1, Ordering::Relaxed);
        }
    }
}
