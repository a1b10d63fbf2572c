//! Decode requests and the work done on the decode thread
//!
//! The UI thread turns tile decisions into [`DecodeRequest`]s and submits
//! them to the executor keyed by [`NodeRef`]. The decode thread runs
//! [`PageDecoder`], which keeps recently used decoder pages open, renders
//! the requested slice and posts a [`DecodeCompletion`] back over a channel.
//! The UI thread installs results; nothing else crosses threads except the
//! buffer pool.

use crate::tree::{DecodeControl, NodeRef};
use crossbeam_channel::Sender;
use docview_cache::EvictingLru;
use docview_render::{CodecDocument, CodecError, CodecPage, RawBitmap, RectF};
use docview_scheduler::{DecodeExecutor, DecodeRunner, DecodeTask, TaskContext, TaskId};
use tracing::{debug, trace};

/// Largest bitmap the decode thread will produce, in pixels
pub const MAX_BITMAP_PIXELS: u64 = 1 << 26;

/// Why a region is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeKind {
    /// Content to install in the tile
    Content,
    /// First root decode used only to detect page margins
    CropProbe,
}

/// Payload of a decode task
///
/// Two requests are equal when they would produce the same bitmap; the
/// executor coalesces equal requests for the same node.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub doc_page: usize,
    /// Width of the whole document page at zoom 1, in pixels
    pub target_width: u32,
    pub zoom: f32,
    /// Fractional region of the document page to render
    pub slice: RectF,
    pub kind: DecodeKind,
}

impl DecodeRequest {
    /// Pixel size of the bitmap for a page of the given native size
    pub fn bitmap_size(&self, page_width: u32, page_height: u32) -> (u32, u32) {
        if page_width == 0 {
            return (0, 0);
        }
        let scale = self.target_width as f32 / page_width as f32 * self.zoom;
        let width = (page_width as f32 * scale * self.slice.width()).round();
        let height = (page_height as f32 * scale * self.slice.height()).round();
        (width.max(0.0) as u32, height.max(0.0) as u32)
    }
}

/// Result posted from the decode thread
#[derive(Debug)]
pub struct DecodeCompletion {
    pub node: NodeRef,
    pub task: TaskId,
    pub request: DecodeRequest,
    pub result: Result<RawBitmap, CodecError>,
}

/// Executor specialised for tile decoding
pub type NodeExecutor = DecodeExecutor<NodeRef, DecodeRequest>;

impl DecodeControl for NodeExecutor {
    fn stop_decoding(&self, node: NodeRef, reason: &str) {
        self.cancel(&node, reason);
    }
}

/// Decode-thread side of the pipeline
pub struct PageDecoder {
    document: Box<dyn CodecDocument>,
    pages: EvictingLru<usize, Box<dyn CodecPage>>,
    completions: Sender<DecodeCompletion>,
}

impl PageDecoder {
    pub fn new(
        document: Box<dyn CodecDocument>,
        page_cache: usize,
        completions: Sender<DecodeCompletion>,
    ) -> Self {
        let pages = EvictingLru::new(page_cache, |index: usize, mut page: Box<dyn CodecPage>| {
            trace!(page = index, "recycling evicted decoder page");
            page.recycle();
        });
        Self {
            document,
            pages,
            completions,
        }
    }

    fn render(
        &mut self,
        task: &DecodeTask<NodeRef, DecodeRequest>,
        ctx: &TaskContext<'_, NodeRef, DecodeRequest>,
    ) -> Option<Result<RawBitmap, CodecError>> {
        let request = task.payload();
        let Self {
            document, pages, ..
        } = self;

        let page = match pages.get_or_try_insert(request.doc_page, || {
            document.open_page(request.doc_page)
        }) {
            Ok(page) => page,
            Err(e) => return Some(Err(e)),
        };
        if ctx.is_dead(task) {
            trace!(task = task.id(), "abort: task cancelled after page fetch");
            return None;
        }

        let (width, height) = request.bitmap_size(page.width(), page.height());
        if width == 0 || height == 0 {
            return Some(Err(CodecError::Decode(format!(
                "empty bitmap {width}x{height}"
            ))));
        }
        if width as u64 * height as u64 > MAX_BITMAP_PIXELS {
            return Some(Err(CodecError::Decode(format!(
                "bitmap {width}x{height} is too large"
            ))));
        }

        let result = page.render(width, height, &request.slice);
        if ctx.is_dead(task) {
            trace!(task = task.id(), "abort: task cancelled after render");
            return None;
        }
        Some(result)
    }
}

impl DecodeRunner<NodeRef, DecodeRequest> for PageDecoder {
    fn run(
        &mut self,
        task: &DecodeTask<NodeRef, DecodeRequest>,
        ctx: &TaskContext<'_, NodeRef, DecodeRequest>,
    ) {
        if ctx.is_dead(task) {
            trace!(task = task.id(), "abort: task cancelled before start");
            return;
        }

        let Some(result) = self.render(task, ctx) else {
            return;
        };
        if !ctx.complete(task) {
            trace!(task = task.id(), "abort: task superseded before publish");
            return;
        }
        if let Err(e) = &result {
            debug!(task = task.id(), page = task.payload().doc_page, error = %e, "decode failed");
        }

        let completion = DecodeCompletion {
            node: *task.node(),
            task: task.id(),
            request: task.payload().clone(),
            result,
        };
        if self.completions.send(completion).is_err() {
            trace!(task = task.id(), "view closed, completion dropped");
        }
    }

    fn shutdown(&mut self) {
        let recycled = self.pages.drain();
        self.document.recycle();
        debug!(pages = recycled, "decoder shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(zoom: f32, slice: RectF) -> DecodeRequest {
        DecodeRequest {
            doc_page: 0,
            target_width: 800,
            zoom,
            slice,
            kind: DecodeKind::Content,
        }
    }

    #[test]
    fn test_bitmap_size_scales_with_zoom_and_slice() {
        assert_eq!(request(1.0, RectF::UNIT).bitmap_size(612, 792), (800, 1035));
        assert_eq!(
            request(3.0, RectF::new(0.0, 0.0, 0.5, 0.5)).bitmap_size(612, 792),
            (1200, 1553)
        );
    }

    #[test]
    fn test_equal_requests_compare_equal() {
        let a = request(1.0, RectF::UNIT);
        let mut b = a.clone();
        assert_eq!(a, b);
        b.kind = DecodeKind::CropProbe;
        assert_ne!(a, b);
    }

    #[test]
    fn test_degenerate_page_width() {
        assert_eq!(request(1.0, RectF::UNIT).bitmap_size(0, 100), (0, 0));
    }
}
