//! Document viewer render library
//!
//! The decoder contract, decoded bitmaps and their pooled cell storage,
//! margin detection, and software compositing.

pub mod bitmap;
pub mod codec;
pub mod crop;
pub mod geometry;
pub mod holder;
#[cfg(feature = "pdfium")]
pub mod pdf;
pub mod surface;
pub mod synthetic;

pub use bitmap::{invert_into, luminance, RawBitmap, BLACK, WHITE};
pub use codec::{CodecContext, CodecDocument, CodecError, CodecPage, CodecResult};
pub use crop::crop_bounds;
pub use geometry::{Rect, RectF, Transform};
pub use holder::{BitmapHolder, CELL_BYTES, CELL_SIZE};
#[cfg(feature = "pdfium")]
pub use pdf::PdfiumContext;
pub use surface::{RgbaSurface, Surface};
pub use synthetic::{SyntheticContext, SyntheticSpec, SyntheticStats};
