//! PDFium decoder backend
//!
//! Binds the PDFium shared library once per context and serves PDF
//! documents through the decoder contract. Slices are rendered by
//! rasterising the page at the full-page resolution implied by the slice
//! size and copying the requested region out.

use crate::bitmap::RawBitmap;
use crate::codec::{CodecContext, CodecDocument, CodecError, CodecPage, CodecResult};
use crate::geometry::{Rect, RectF};
use docview_cache::{PageSize, BYTES_PER_PIXEL};
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

type SharedDocument = Arc<Mutex<Option<PdfDocument<'static>>>>;

/// Decoder context backed by PDFium
pub struct PdfiumContext {
    pdfium: &'static Pdfium,
}

impl PdfiumContext {
    /// Bind PDFium
    ///
    /// Search order:
    /// 1. Executable's directory
    /// 2. Current working directory
    /// 3. System library paths
    pub fn new() -> CodecResult<Self> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()));

        let bindings = exe_dir
            .and_then(|dir| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).ok()
            })
            .map(Ok)
            .unwrap_or_else(|| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library())
            })
            .map_err(|e| CodecError::Unavailable(e.to_string()))?;

        // Documents borrow the library for their whole lifetime
        let pdfium: &'static Pdfium = Box::leak(Box::new(Pdfium::new(bindings)));
        Ok(Self { pdfium })
    }
}

fn map_load_error(error: PdfiumError) -> CodecError {
    match error {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            CodecError::PasswordRequired
        }
        other => CodecError::CorruptFile(other.to_string()),
    }
}

impl CodecContext for PdfiumContext {
    fn open_document(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> CodecResult<Box<dyn CodecDocument>> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, password)
            .map_err(map_load_error)?;
        debug!(path = %path.display(), pages = document.pages().len(), "pdf opened");
        Ok(Box::new(PdfiumDocument {
            document: Arc::new(Mutex::new(Some(document))),
        }))
    }
}

struct PdfiumDocument {
    document: SharedDocument,
}

fn with_document<T>(
    document: &SharedDocument,
    f: impl FnOnce(&PdfDocument<'static>) -> CodecResult<T>,
) -> CodecResult<T> {
    let guard = document
        .lock()
        .map_err(|_| CodecError::Decode("document lock poisoned".into()))?;
    match guard.as_ref() {
        Some(document) => f(document),
        None => Err(CodecError::Decode("document is closed".into())),
    }
}

fn page_index(index: usize) -> CodecResult<u16> {
    u16::try_from(index).map_err(|_| CodecError::InvalidPage(index))
}

impl CodecDocument for PdfiumDocument {
    fn page_count(&self) -> usize {
        with_document(&self.document, |doc| Ok(doc.pages().len() as usize)).unwrap_or(0)
    }

    fn page_info(&self, index: usize) -> Option<PageSize> {
        with_document(&self.document, |doc| {
            let page = doc
                .pages()
                .get(page_index(index)?)
                .map_err(|_| CodecError::InvalidPage(index))?;
            Ok(PageSize::new(
                page.width().value.round() as u32,
                page.height().value.round() as u32,
            ))
        })
        .ok()
    }

    fn open_page(&self, index: usize) -> CodecResult<Box<dyn CodecPage>> {
        let size = self.page_info(index).ok_or(CodecError::InvalidPage(index))?;
        Ok(Box::new(PdfiumPage {
            index,
            size,
            document: Arc::clone(&self.document),
        }))
    }

    fn recycle(&mut self) {
        if let Ok(mut guard) = self.document.lock() {
            if guard.take().is_some() {
                debug!("pdf closed");
            }
        }
    }
}

struct PdfiumPage {
    index: usize,
    size: PageSize,
    document: SharedDocument,
}

impl CodecPage for PdfiumPage {
    fn width(&self) -> u32 {
        self.size.width
    }

    fn height(&self) -> u32 {
        self.size.height
    }

    fn render(&mut self, width: u32, height: u32, slice: &RectF) -> CodecResult<RawBitmap> {
        if width == 0 || height == 0 || slice.is_empty() {
            return Err(CodecError::Decode("empty render request".into()));
        }
        let full_width = (width as f32 / slice.width()).round().max(1.0) as u32;
        let full_height = (height as f32 / slice.height()).round().max(1.0) as u32;
        let index = self.index;

        let full = with_document(&self.document, |doc| {
            let page = doc
                .pages()
                .get(page_index(index)?)
                .map_err(|_| CodecError::InvalidPage(index))?;
            let config = PdfRenderConfig::new()
                .set_target_width(full_width as i32)
                .set_target_height(full_height as i32);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| CodecError::Decode(e.to_string()))?;
            Ok(bitmap.as_rgba_bytes())
        })?;

        let full = RawBitmap::from_rgba(full_width, full_height, full)
            .ok_or_else(|| CodecError::Decode("unexpected bitmap size".into()))?;
        let left = (slice.left * full_width as f32).round() as i32;
        let top = (slice.top * full_height as f32).round() as i32;
        let region = Rect::new(left, top, left + width as i32, top + height as i32);

        let mut pixels = vec![0xFFu8; width as usize * height as usize * BYTES_PER_PIXEL];
        full.copy_region(&region, &mut pixels, width);
        trace!(page = index, width, height, "pdf slice rendered");
        RawBitmap::from_rgba(width, height, pixels)
            .ok_or_else(|| CodecError::Decode("unexpected bitmap size".into()))
    }

    fn recycle(&mut self) {}
}
