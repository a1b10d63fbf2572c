//! Decoder contract
//!
//! Format-specific decoders (PDF, DjVu, XPS, comic archives...) are consumed
//! only through these traits. A context opens documents, a document opens
//! pages, and a page renders any fractional slice of itself to an RGBA
//! bitmap of a requested pixel size.

use crate::bitmap::RawBitmap;
use crate::geometry::RectF;
use docview_cache::PageSize;
use std::path::Path;
use thiserror::Error;

/// Errors reported by decoders
#[derive(Debug, Error)]
pub enum CodecError {
    /// The document is encrypted and no (or a wrong) password was given
    #[error("document requires a password")]
    PasswordRequired,

    /// The file could not be parsed as a document of this format
    #[error("corrupt document: {0}")]
    CorruptFile(String),

    /// Page index out of range
    #[error("invalid page index: {0}")]
    InvalidPage(usize),

    /// Rendering a page failed
    #[error("decode failed: {0}")]
    Decode(String),

    /// Decoder library could not be loaded
    #[error("decoder unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for decoder operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Entry point of a decoder backend
pub trait CodecContext: Send + Sync {
    /// Open the document at `path`
    ///
    /// Fails with [`CodecError::PasswordRequired`] for protected documents
    /// when `password` is missing or wrong, and [`CodecError::CorruptFile`]
    /// when the file cannot be parsed.
    fn open_document(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> CodecResult<Box<dyn CodecDocument>>;
}

/// An open document
///
/// Owned by the decode thread once the view is running.
pub trait CodecDocument: Send {
    fn page_count(&self) -> usize;

    /// Native size of page `index`, if the decoder can tell cheaply
    fn page_info(&self, index: usize) -> Option<PageSize>;

    fn open_page(&self, index: usize) -> CodecResult<Box<dyn CodecPage>>;

    /// Render `slice` of page `index` at `width` x `height` pixels
    fn decode_region(
        &self,
        index: usize,
        width: u32,
        height: u32,
        slice: &RectF,
    ) -> CodecResult<RawBitmap> {
        let mut page = self.open_page(index)?;
        let bitmap = page.render(width, height, slice);
        page.recycle();
        bitmap
    }

    /// Release native resources; the document is unusable afterwards
    fn recycle(&mut self);
}

/// An open page
pub trait CodecPage: Send {
    /// Native width
    fn width(&self) -> u32;

    /// Native height
    fn height(&self) -> u32;

    /// Render `slice` (fractional page coordinates) to `width` x `height`
    fn render(&mut self, width: u32, height: u32, slice: &RectF) -> CodecResult<RawBitmap>;

    /// Release native resources
    fn recycle(&mut self);
}
