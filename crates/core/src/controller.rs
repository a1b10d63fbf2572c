//! Document view controller
//!
//! `DocumentView` is the UI-thread owner of everything a document view
//! needs: the page model and its tile trees, the buffer pool, the decode
//! executor with its completion channel, the layout, and the current
//! viewport, zoom, night mode and decode mode.
//!
//! Every view event (resize, zoom, scroll, page jump, mode change) ends in
//! [`DocumentView::update_page_visibility`], which snapshots a [`ViewState`],
//! walks every page tree and submits the resulting decode candidates in
//! priority order. Decoded bitmaps come back as [`DecodeCompletion`]
//! messages and are installed by [`DocumentView::process_completions`].

use crate::actions::{ActionArgs, ActionDispatcher, ActionId, ActionTable};
use crate::config::ViewerConfig;
use crate::decode::{DecodeCompletion, DecodeKind, DecodeRequest, NodeExecutor, PageDecoder};
use crate::error::{DocumentError, DocumentResult};
use crate::layout::{PageLayout, VerticalLayout};
use crate::model::DocumentModel;
use crate::page::Page;
use crate::priority::sort_candidates;
use crate::tree::{DecodeCandidate, NodeRef, NodeRelease, TreeContext};
use crate::view_state::{DecodeMode, ViewState};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use docview_cache::{BufferPool, PageInfoCache, PoolStats};
use docview_render::{crop_bounds, CodecContext, RawBitmap, RectF, Surface, BLACK, WHITE};
use docview_scheduler::{ExecutorStats, TaskId};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const BACKGROUND_DAY: [u8; 4] = [0x80, 0x80, 0x80, 0xFF];
const BACKGROUND_NIGHT: [u8; 4] = [0x20, 0x20, 0x20, 0xFF];

/// Fraction of the viewport height scrolled by the scroll actions
const SCROLL_FRACTION: f32 = 0.9;

/// Callback invoked when visible content changes
pub type RedrawSink = Box<dyn Fn(&ViewState) + Send>;

/// Counters describing what the view has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewStats {
    /// Decode tasks queued or coalesced
    pub decodes_requested: u64,
    /// Bitmaps installed into tiles
    pub bitmaps_installed: u64,
    /// Completions for nodes that were gone or had a newer task
    pub stale_completions: u64,
    /// Decodes that reported an error
    pub failed_decodes: u64,
    /// Bitmaps that could not be stored in the pool
    pub allocation_failures: u64,
    /// Margin detection passes
    pub crop_passes: u64,
    pub redraws_requested: u64,
    /// Layout recomputations caused by corrected page sizes
    pub page_size_changes: u64,
}

/// UI-thread side of a document view
pub struct DocumentView {
    config: ViewerConfig,
    model: DocumentModel,
    pool: BufferPool,
    executor: NodeExecutor,
    completions: Receiver<DecodeCompletion>,
    layout: Box<dyn PageLayout>,
    viewport: RectF,
    content: (f32, f32),
    zoom: f32,
    committed: bool,
    night_mode: bool,
    decode_mode: DecodeMode,
    current_page: usize,
    focus_page: Option<usize>,
    redraw: Option<RedrawSink>,
    actions: Arc<ActionDispatcher<DocumentView>>,
    stats: ViewStats,
    recycled: bool,
}

impl DocumentView {
    /// Open `path` with `context` and start its decode thread
    ///
    /// The viewport starts empty; call [`set_viewport`](Self::set_viewport)
    /// to start decoding.
    ///
    /// # Errors
    ///
    /// [`DocumentError::PasswordRequired`] when the document is protected and
    /// `password` is missing or wrong; other codec, configuration and thread
    /// spawn failures otherwise.
    pub fn open(
        context: &dyn CodecContext,
        path: impl AsRef<Path>,
        password: Option<&str>,
        config: ViewerConfig,
    ) -> DocumentResult<Self> {
        config.validate()?;
        let path = path.as_ref();
        let cache = config.page_cache_dir.as_ref().map(PageInfoCache::new);
        let (model, document) =
            DocumentModel::open(context, path, password, &config, cache.as_ref())?;

        let (sender, completions) = crossbeam_channel::unbounded();
        let decoder = PageDecoder::new(document, config.codec_page_cache, sender);
        let executor = NodeExecutor::new(decoder).map_err(DocumentError::Worker)?;
        let pool = match config.pool_budget_bytes() {
            Some(bytes) => BufferPool::with_byte_budget(bytes),
            None => BufferPool::new(),
        };

        info!(
            path = %path.display(),
            pages = model.page_count(),
            mode = %config.decode_mode,
            "document opened"
        );

        let mut view = Self {
            layout: Box::new(VerticalLayout::new(config.page_gap)),
            zoom: 1.0_f32.clamp(config.min_zoom, config.max_zoom),
            night_mode: config.night_mode,
            decode_mode: config.decode_mode,
            config,
            model,
            pool,
            executor,
            completions,
            viewport: RectF::default(),
            content: (0.0, 0.0),
            committed: true,
            current_page: 0,
            focus_page: None,
            redraw: None,
            actions: Arc::new(default_actions()),
            stats: ViewStats::default(),
            recycled: false,
        };
        view.relayout();
        Ok(view)
    }

    /// Replace the page layout
    pub fn with_layout(mut self, layout: impl PageLayout + 'static) -> Self {
        self.layout = Box::new(layout);
        self.relayout();
        self
    }

    /// Call `sink` whenever visible content changes
    pub fn set_redraw_sink(&mut self, sink: impl Fn(&ViewState) + Send + 'static) {
        self.redraw = Some(Box::new(sink));
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn model(&self) -> &DocumentModel {
        &self.model
    }

    pub fn page_count(&self) -> usize {
        self.model.page_count()
    }

    pub fn page(&self, view_index: usize) -> Option<&Page> {
        self.model.page(view_index)
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Visible region in layout coordinates
    pub fn viewport(&self) -> RectF {
        self.viewport
    }

    /// Width and height of the laid out document
    pub fn content_size(&self) -> (f32, f32) {
        self.content
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn night_mode(&self) -> bool {
        self.night_mode
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.decode_mode
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stats(&self) -> ViewStats {
        self.stats
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Snapshot of the state every tile decision is based on
    pub fn view_state(&self) -> ViewState {
        let pages: Vec<RectF> = self.model.pages.iter().map(Page::bounds).collect();
        let mut state = ViewState::new(self.viewport, self.zoom, pages)
            .with_config(&self.config)
            .with_decode_mode(self.decode_mode)
            .with_current_page(self.current_page)
            .with_committed(self.committed)
            .with_focus_page(self.focus_page);
        state.night_mode = self.night_mode;
        state
    }

    /// Resize the viewport, keeping its top-left corner
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        let (left, top) = (self.viewport.left, self.viewport.top);
        self.viewport = RectF::new(left, top, left + width.max(0.0), top + height.max(0.0));
        self.relayout();
        self.update_page_visibility();
    }

    /// Change the zoom around the viewport centre
    ///
    /// `committed` is `false` while a zoom gesture is still running; small
    /// changes then reuse the existing bitmaps.
    pub fn set_zoom(&mut self, zoom: f32, committed: bool) {
        let zoom = zoom.clamp(self.config.min_zoom, self.config.max_zoom);
        let ratio = zoom / self.zoom;
        let (cx, cy) = self.viewport.center();
        let (width, height) = (self.viewport.width(), self.viewport.height());
        let left = cx * ratio - width / 2.0;
        let top = cy * ratio - height / 2.0;

        trace!(from = self.zoom, to = zoom, committed, "zoom changed");
        self.zoom = zoom;
        self.committed = committed;
        self.viewport = RectF::new(left, top, left + width, top + height);
        self.relayout();
        self.update_page_visibility();
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom * self.config.zoom_step, true);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom / self.config.zoom_step, true);
    }

    /// Move the viewport's top-left corner to `(x, y)`
    pub fn scroll_to(&mut self, x: f32, y: f32) {
        let (width, height) = (self.viewport.width(), self.viewport.height());
        self.viewport = RectF::new(x, y, x + width, y + height);
        self.clamp_viewport();
        self.current_page = self.layout.current_page(&self.model.pages, &self.viewport);
        self.update_page_visibility();
    }

    pub fn scroll_by(&mut self, dx: f32, dy: f32) {
        self.scroll_to(self.viewport.left + dx, self.viewport.top + dy);
    }

    /// Scroll so that view page `index` starts at the top of the viewport
    pub fn go_to_page(&mut self, index: usize) -> DocumentResult<()> {
        let count = self.model.page_count();
        let Some(page) = self.model.page(index) else {
            return Err(DocumentError::InvalidPage { page: index, count });
        };
        let top = page.bounds().top;
        self.scroll_to(self.viewport.left, top);
        Ok(())
    }

    pub fn set_night_mode(&mut self, night: bool) {
        if self.night_mode == night {
            return;
        }
        self.night_mode = night;
        debug!(night, "night mode changed");
        self.update_page_visibility();
        let view = self.view_state();
        self.request_redraw(&view);
    }

    pub fn set_decode_mode(&mut self, mode: DecodeMode) {
        if self.decode_mode == mode {
            return;
        }
        debug!(from = %self.decode_mode, to = %mode, "decode mode changed");
        self.decode_mode = mode;
        self.update_page_visibility();
    }

    /// Page being animated to during a page transition; decoded first
    pub fn set_transition_page(&mut self, page: Option<usize>) {
        self.focus_page = page;
        self.update_page_visibility();
    }

    fn relayout(&mut self) {
        self.content = self
            .layout
            .layout(&mut self.model.pages, self.viewport.width(), self.zoom);
        self.clamp_viewport();
        self.current_page = self.layout.current_page(&self.model.pages, &self.viewport);
    }

    fn clamp_viewport(&mut self) {
        let (width, height) = (self.viewport.width(), self.viewport.height());
        let max_left = (self.content.0 - width).max(0.0);
        let max_top = (self.content.1 - height).max(0.0);
        let left = self.viewport.left.clamp(0.0, max_left);
        let top = self.viewport.top.clamp(0.0, max_top);
        self.viewport = RectF::new(left, top, left + width, top + height);
    }

    /// Walk every page tree against a fresh snapshot and submit decodes
    ///
    /// Returns the number of decode tasks submitted.
    pub fn update_page_visibility(&mut self) -> usize {
        if self.recycled {
            return 0;
        }
        let view = self.view_state();
        let crop_pages = self.config.crop_pages;
        let mut candidates = Vec::new();

        for (index, page) in self.model.pages.iter_mut().enumerate() {
            page.set_kept_in_memory(view.is_page_kept_in_memory(index));
            let ctx = TreeContext {
                view: &view,
                geometry: page.geometry(),
                doc_page: page.index().doc_index,
                crop_pages,
                release: NodeRelease {
                    page: index,
                    decoder: &self.executor,
                    pool: &self.pool,
                },
            };
            let root = page.tree.root();
            page.tree.update(root, &ctx, &mut candidates);
        }

        sort_candidates(&mut candidates, &view);
        self.submit(candidates)
    }

    fn submit(&mut self, candidates: Vec<DecodeCandidate>) -> usize {
        let mut submitted = 0;
        for candidate in candidates {
            let node = candidate.node;
            let outcome = self.executor.submit(node, candidate.request);
            let Some(tile) = self
                .model
                .pages
                .get_mut(node.page)
                .and_then(|page| page.tree.node_mut(node.key))
            else {
                continue;
            };
            match outcome.task_id() {
                Some(task) => {
                    tile.set_pending_task(Some(task));
                    submitted += 1;
                }
                None => {
                    tile.set_decoding(false);
                }
            }
        }
        self.stats.decodes_requested += submitted as u64;
        submitted
    }

    /// Install every completion that has arrived
    ///
    /// Returns the number of completions handled.
    pub fn process_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.handle_completion(completion);
            handled += 1;
        }
        handled
    }

    /// Whether any tile still waits for a decode
    pub fn has_pending_decodes(&self) -> bool {
        self.model
            .pages
            .iter()
            .any(|page| page.tree.iter().any(|(_, node)| node.is_decoding()))
    }

    /// Handle completions until no tile is decoding or `timeout` passes
    ///
    /// Returns whether the view became idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_completions();
            if !self.has_pending_decodes() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.completions.recv_timeout(deadline - now) {
                Ok(completion) => self.handle_completion(completion),
                Err(RecvTimeoutError::Timeout) => return !self.has_pending_decodes(),
                Err(RecvTimeoutError::Disconnected) => return !self.has_pending_decodes(),
            }
        }
    }

    fn pending_task(&self, node: NodeRef) -> Option<TaskId> {
        self.model
            .page(node.page)
            .and_then(|page| page.tree.node(node.key))
            .and_then(|tile| tile.pending_task())
    }

    fn handle_completion(&mut self, completion: DecodeCompletion) {
        let DecodeCompletion {
            node,
            task,
            request,
            result,
        } = completion;

        if self.pending_task(node) != Some(task) {
            trace!(task, page = node.page, "stale completion discarded");
            self.stats.stale_completions += 1;
            return;
        }

        let bitmap = match result {
            Ok(bitmap) => bitmap,
            Err(e) => {
                debug!(task, page = node.page, error = %e, "decode failed, keeping placeholder");
                if let Some(tile) = self
                    .model
                    .page_mut(node.page)
                    .and_then(|page| page.tree.node_mut(node.key))
                {
                    tile.set_pending_task(None);
                    tile.set_decoding(false);
                }
                self.stats.failed_decodes += 1;
                return;
            }
        };

        match request.kind {
            DecodeKind::CropProbe => self.finish_crop_probe(node, &bitmap, &request),
            DecodeKind::Content => self.install(node, &bitmap),
        }
    }

    /// Record the detected margins and decode the cropped region once
    fn finish_crop_probe(&mut self, node: NodeRef, bitmap: &RawBitmap, request: &DecodeRequest) {
        let bounds = crop_bounds(bitmap, &request.slice);
        self.stats.crop_passes += 1;
        debug!(page = node.page, ?bounds, "page margins detected");

        let view = self.view_state();
        let crop_pages = self.config.crop_pages;
        let Some(page) = self.model.pages.get_mut(node.page) else {
            return;
        };
        if let Some(tile) = page.tree.node_mut(node.key) {
            tile.set_cropped_bounds(bounds);
            tile.set_pending_task(None);
            tile.set_decoding(false);
        }

        let ctx = TreeContext {
            view: &view,
            geometry: page.geometry(),
            doc_page: page.index().doc_index,
            crop_pages,
            release: NodeRelease {
                page: node.page,
                decoder: &self.executor,
                pool: &self.pool,
            },
        };
        let mut candidates = Vec::new();
        page.tree.request_decode(node.key, &ctx, &mut candidates);
        self.submit(candidates);
    }

    fn install(&mut self, node: NodeRef, bitmap: &RawBitmap) {
        let Some(page) = self.model.pages.get_mut(node.page) else {
            return;
        };
        if !page.tree.install(node.key, bitmap, &self.pool) {
            debug!(page = node.page, "no memory for bitmap, keeping placeholder");
            self.stats.allocation_failures += 1;
            return;
        }
        self.stats.bitmaps_installed += 1;

        let Some(tile) = page.tree.node(node.key) else {
            return;
        };
        let parent = tile.parent();
        let slice = tile.slice();
        let resized = parent.is_none()
            && page.update_aspect_from_bitmap(bitmap.width(), bitmap.height(), &slice);

        if resized {
            self.stats.page_size_changes += 1;
            self.relayout();
        }

        let view = self.view_state();
        let page = &mut self.model.pages[node.page];
        if let Some(parent) = parent {
            page.tree.on_child_loaded(parent, &view, &self.pool);
        }
        let target = page.geometry().target_rect(&slice);
        if view.is_node_visible(&target) {
            self.request_redraw(&view);
        }

        if resized {
            self.update_page_visibility();
        }
    }

    fn request_redraw(&mut self, view: &ViewState) {
        self.stats.redraws_requested += 1;
        if let Some(sink) = &self.redraw {
            sink(view);
        }
    }

    /// Composite the visible pages onto `surface`
    ///
    /// Pages without content are drawn as blank paper. Returns the number
    /// of tiles drawn.
    pub fn draw(&mut self, surface: &mut dyn Surface) -> usize {
        let view = self.view_state();
        let (background, paper) = if self.night_mode {
            (BACKGROUND_NIGHT, BLACK)
        } else {
            (BACKGROUND_DAY, WHITE)
        };
        let (width, height) = surface.size();
        surface.fill_rect(&RectF::from_size(width as f32, height as f32), background);

        let mut drawn = 0;
        for page in self.model.pages.iter_mut() {
            let bounds = page.bounds();
            if !view.is_node_visible(&bounds) {
                continue;
            }
            surface.fill_rect(&view.to_surface(&bounds), paper);
            let geometry = page.geometry();
            let root = page.tree.root();
            drawn += page.tree.draw(root, surface, &view, &geometry, &self.pool);
        }
        drawn
    }

    /// Drop free pool buffers after a memory warning
    pub fn trim_memory(&mut self) -> usize {
        self.pool.trim()
    }

    /// Run `action` through the action tables
    pub fn dispatch(&mut self, action: ActionId, args: &ActionArgs) -> bool {
        let actions = Arc::clone(&self.actions);
        actions.dispatch(self, action, args)
    }

    /// Release every tile, stop the decode thread and close the document
    ///
    /// Calling this again has no effect.
    pub fn recycle(&mut self) {
        if self.recycled {
            return;
        }
        self.recycled = true;

        let mut released = 0;
        for (index, page) in self.model.pages.iter_mut().enumerate() {
            let before = page.tree.buffer_count();
            let release = NodeRelease {
                page: index,
                decoder: &self.executor,
                pool: &self.pool,
            };
            page.tree.recycle(&release);
            released += before;
        }

        self.executor.recycle();
        self.executor.join();
        let late = self.completions.try_iter().count();
        let generation = self.pool.invalidate();
        info!(released, late, generation, "document view recycled");
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled
    }
}

impl Drop for DocumentView {
    fn drop(&mut self) {
        self.recycle();
    }
}

impl fmt::Debug for DocumentView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentView")
            .field("path", &self.model.path())
            .field("pages", &self.model.page_count())
            .field("viewport", &self.viewport)
            .field("zoom", &self.zoom)
            .field("current_page", &self.current_page)
            .field("stats", &self.stats)
            .finish()
    }
}

fn first_page(view: &mut DocumentView, _: &ActionArgs) -> bool {
    view.go_to_page(0).is_ok()
}

fn prev_page(view: &mut DocumentView, _: &ActionArgs) -> bool {
    let target = view.current_page.saturating_sub(1);
    view.go_to_page(target).is_ok()
}

fn next_page(view: &mut DocumentView, _: &ActionArgs) -> bool {
    let last = view.page_count().saturating_sub(1);
    let target = (view.current_page + 1).min(last);
    view.go_to_page(target).is_ok()
}

fn last_page(view: &mut DocumentView, _: &ActionArgs) -> bool {
    let last = view.page_count().saturating_sub(1);
    view.go_to_page(last).is_ok()
}

fn go_to_page(view: &mut DocumentView, args: &ActionArgs) -> bool {
    args.page.is_some_and(|page| view.go_to_page(page).is_ok())
}

fn zoom_in(view: &mut DocumentView, _: &ActionArgs) -> bool {
    view.zoom_in();
    true
}

fn zoom_out(view: &mut DocumentView, _: &ActionArgs) -> bool {
    view.zoom_out();
    true
}

fn reset_zoom(view: &mut DocumentView, _: &ActionArgs) -> bool {
    view.set_zoom(1.0, true);
    true
}

fn scroll_amount(view: &DocumentView, args: &ActionArgs) -> f32 {
    args.amount.unwrap_or(view.viewport.height() * SCROLL_FRACTION)
}

fn scroll_down(view: &mut DocumentView, args: &ActionArgs) -> bool {
    let amount = scroll_amount(view, args);
    view.scroll_by(0.0, amount);
    true
}

fn scroll_up(view: &mut DocumentView, args: &ActionArgs) -> bool {
    let amount = scroll_amount(view, args);
    view.scroll_by(0.0, -amount);
    true
}

fn toggle_night_mode(view: &mut DocumentView, _: &ActionArgs) -> bool {
    view.set_night_mode(!view.night_mode);
    true
}

fn set_decode_mode(view: &mut DocumentView, args: &ActionArgs) -> bool {
    match args.mode {
        Some(mode) => {
            view.set_decode_mode(mode);
            true
        }
        None => false,
    }
}

/// Document navigation first, then viewer-level actions
fn default_actions() -> ActionDispatcher<DocumentView> {
    ActionDispatcher::new()
        .with_table(
            ActionTable::new("document")
                .bind(ActionId::FirstPage, first_page)
                .bind(ActionId::PrevPage, prev_page)
                .bind(ActionId::NextPage, next_page)
                .bind(ActionId::LastPage, last_page)
                .bind(ActionId::GoToPage, go_to_page),
        )
        .with_table(
            ActionTable::new("viewer")
                .bind(ActionId::ZoomIn, zoom_in)
                .bind(ActionId::ZoomOut, zoom_out)
                .bind(ActionId::ResetZoom, reset_zoom)
                .bind(ActionId::ScrollDown, scroll_down)
                .bind(ActionId::ScrollUp, scroll_up)
                .bind(ActionId::ToggleNightMode, toggle_night_mode)
                .bind(ActionId::SetDecodeMode, set_decode_mode),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use docview_cache::PageSize;
    use docview_render::{invert_into, RgbaSurface, SyntheticContext, SyntheticSpec};
    use tempfile::TempDir;

    const IDLE: Duration = Duration::from_secs(10);

    fn config() -> ViewerConfig {
        ViewerConfig::default().with_page_cache_dir(None::<&Path>)
    }

    fn book(pages: usize) -> SyntheticSpec {
        SyntheticSpec::uniform(pages, PageSize::new(600, 800))
    }

    fn open(spec: SyntheticSpec, config: ViewerConfig) -> (SyntheticContext, DocumentView) {
        let context = SyntheticContext::new().with_document("book.pdf", spec);
        let view = DocumentView::open(&context, "book.pdf", None, config).unwrap();
        (context, view)
    }

    fn root_content(view: &DocumentView, page: usize) -> bool {
        let tree = view.page(page).unwrap().tree();
        tree.node(tree.root()).unwrap().has_content()
    }

    #[test]
    fn test_first_view_decodes_kept_pages() {
        let (context, mut view) = open(book(3), config());
        view.set_viewport(600.0, 800.0);

        assert!(view.wait_idle(IDLE));
        assert!(root_content(&view, 0));
        // Next page is off screen but inside the resident window
        assert!(root_content(&view, 1));
        assert!(!root_content(&view, 2));
        let stats = view.stats();
        assert_eq!(stats.bitmaps_installed, 2);
        assert!(stats.redraws_requested >= 1);
        assert_eq!(context.stats().renders, 2);

        let tree = view.page(0).unwrap().tree();
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.holder().bounds().width(), 600);
        assert_eq!(root.holder().bounds().height(), 800);
    }

    #[test]
    fn test_pages_outside_window_stay_empty() {
        let (_context, mut view) = open(book(5), config().with_pages_in_memory(2));
        view.set_viewport(600.0, 800.0);
        assert!(view.wait_idle(IDLE));

        let kept: Vec<bool> = (0..5)
            .map(|i| view.page(i).unwrap().is_kept_in_memory())
            .collect();
        let content: Vec<bool> = (0..5).map(|i| root_content(&view, i)).collect();
        assert_eq!(kept, vec![true, true, false, false, false]);
        assert_eq!(content, kept);

        // Scrolling one page down moves the window forward
        view.go_to_page(1).unwrap();
        assert!(view.wait_idle(IDLE));
        let content: Vec<bool> = (0..5).map(|i| root_content(&view, i)).collect();
        assert_eq!(content, vec![true, true, true, false, false]);
    }

    #[test]
    fn test_rapid_zoom_installs_latest_only() {
        let spec = book(1).with_render_delay(Duration::from_millis(50));
        let (_context, mut view) = open(spec, config());
        view.set_viewport(600.0, 800.0);
        view.set_zoom(1.5, true);

        assert!(view.wait_idle(IDLE));
        let stats = view.stats();
        assert_eq!(stats.bitmaps_installed, 1);
        assert_eq!(stats.decodes_requested, 2);

        let tree = view.page(0).unwrap().tree();
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.bitmap_zoom(), 1.5);
        assert_eq!(root.holder().bounds().width(), 900);
        assert!(view.executor_stats().cancelled >= 1);
    }

    #[test]
    fn test_far_page_released_after_jump() {
        let config = config().with_pages_in_memory(4);
        let (_context, mut view) = open(book(60), config);
        view.set_viewport(600.0, 800.0);
        view.go_to_page(50).unwrap();
        assert!(view.wait_idle(IDLE));
        assert!(root_content(&view, 50));

        view.go_to_page(10).unwrap();
        assert_eq!(view.current_page(), 10);
        assert!(view.wait_idle(IDLE));

        assert!(!root_content(&view, 50));
        assert_eq!(view.page(50).unwrap().tree().len(), 1);
        assert!(!view.page(50).unwrap().is_kept_in_memory());
        assert!(root_content(&view, 10));

        let held: usize = (0..60)
            .map(|i| view.page(i).unwrap().tree().buffer_count())
            .sum();
        assert_eq!(view.pool_stats().outstanding, held);
    }

    #[test]
    fn test_crop_pass_redecodes_once() {
        let spec = book(1).with_margin(0.1);
        let (context, mut view) = open(spec, config().with_crop_pages(true));
        view.set_viewport(600.0, 800.0);

        assert!(view.wait_idle(IDLE));
        let stats = view.stats();
        assert_eq!(stats.crop_passes, 1);
        assert_eq!(stats.decodes_requested, 2);
        assert_eq!(stats.bitmaps_installed, 1);
        assert_eq!(context.stats().renders, 2);

        let tree = view.page(0).unwrap().tree();
        let root = tree.node(tree.root()).unwrap();
        let cropped = root.cropped_bounds().unwrap();
        assert!(cropped.approx_eq(&RectF::new(0.1, 0.1, 0.9, 0.9), 0.01));
        assert!(root.has_content());

        view.set_zoom(1.1, true);
        assert!(view.wait_idle(IDLE));
        assert_eq!(view.stats().crop_passes, 1);
    }

    #[test]
    fn test_failed_decode_keeps_placeholder() {
        let spec = book(2).failing_page(0);
        let (_context, mut view) = open(spec, config());
        view.set_viewport(600.0, 800.0);

        assert!(view.wait_idle(IDLE));
        assert!(!root_content(&view, 0));
        assert_eq!(view.stats().failed_decodes, 1);

        let mut surface = RgbaSurface::new(600, 800);
        view.draw(&mut surface);
        assert_eq!(surface.pixel(300, 400), WHITE);
    }

    #[test]
    fn test_password_required() {
        let spec = book(1).protected("secret");
        let context = SyntheticContext::new().with_document("book.pdf", spec);

        let err = DocumentView::open(&context, "book.pdf", None, config()).unwrap_err();
        assert!(err.is_password_required());
        let view = DocumentView::open(&context, "book.pdf", Some("secret"), config()).unwrap();
        assert_eq!(view.page_count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_codec_error() {
        let context = SyntheticContext::new().with_document("bad.pdf", book(1).corrupt());
        let err = DocumentView::open(&context, "bad.pdf", None, config()).unwrap_err();
        assert!(matches!(err, DocumentError::Codec(_)));
    }

    #[test]
    fn test_page_sizes_reused_from_cache() {
        let dir = TempDir::new().unwrap();
        let config = ViewerConfig::default().with_page_cache_dir(Some(dir.path()));
        let context = SyntheticContext::new().with_document("book.pdf", book(8));

        DocumentView::open(&context, "book.pdf", None, config.clone()).unwrap();
        assert_eq!(context.stats().page_info_queries, 8);
        DocumentView::open(&context, "book.pdf", None, config).unwrap();
        assert_eq!(context.stats().page_info_queries, 8);
    }

    #[test]
    fn test_night_mode_draws_inverted_pixels() {
        let (_context, mut view) = open(book(1), config());
        view.set_viewport(600.0, 800.0);
        assert!(view.wait_idle(IDLE));

        let mut day = RgbaSurface::new(600, 800);
        assert_eq!(view.draw(&mut day), 1);
        view.set_night_mode(true);
        let mut night = RgbaSurface::new(600, 800);
        assert_eq!(view.draw(&mut night), 1);

        let pixel = day.pixel(300, 400);
        let mut expected = [0u8; 4];
        invert_into(&pixel, &mut expected);
        assert_eq!(night.pixel(300, 400), expected);
    }

    #[test]
    fn test_zoom_subdivides_into_tiles() {
        let (_context, mut view) = open(book(1), config());
        view.set_viewport(600.0, 800.0);
        view.set_zoom(3.0, true);
        assert!(view.wait_idle(IDLE));

        let tree = view.page(0).unwrap().tree();
        let children = tree.node(tree.root()).unwrap().children().unwrap();
        for child in children {
            let node = tree.node(child).unwrap();
            assert!(node.has_content());
            assert_eq!(node.bitmap_zoom(), 3.0);
        }
        assert!(view.stats().bitmaps_installed >= 4);
    }

    #[test]
    fn test_transition_page_decoded_first() {
        let (_context, mut view) = open(book(4), config().with_pages_in_memory(4));
        view.set_viewport(600.0, 2000.0);
        view.set_transition_page(Some(2));
        assert!(view.wait_idle(IDLE));
        assert!(root_content(&view, 2));
    }

    #[test]
    fn test_actions_navigate_and_zoom() {
        let (_context, mut view) = open(book(5), config());
        view.set_viewport(600.0, 800.0);

        assert!(view.dispatch(ActionId::NextPage, &ActionArgs::default()));
        assert_eq!(view.current_page(), 1);
        assert!(view.dispatch(ActionId::GoToPage, &ActionArgs::page(3)));
        assert_eq!(view.current_page(), 3);
        assert!(!view.dispatch(ActionId::GoToPage, &ActionArgs::page(99)));
        assert!(view.dispatch(ActionId::FirstPage, &ActionArgs::default()));
        assert_eq!(view.current_page(), 0);

        assert!(view.dispatch(ActionId::ZoomIn, &ActionArgs::default()));
        assert!((view.zoom() - 1.25).abs() < 1e-6);
        assert!(view.dispatch(ActionId::ResetZoom, &ActionArgs::default()));
        assert_eq!(view.zoom(), 1.0);

        assert!(view.dispatch(ActionId::ToggleNightMode, &ActionArgs::default()));
        assert!(view.night_mode());
        assert!(view.dispatch(
            ActionId::SetDecodeMode,
            &ActionArgs::mode(DecodeMode::LowMemory)
        ));
        assert_eq!(view.decode_mode(), DecodeMode::LowMemory);
    }

    #[test]
    fn test_recycle_releases_everything() {
        let (context, mut view) = open(book(3), config());
        view.set_viewport(600.0, 800.0);
        assert!(view.wait_idle(IDLE));
        assert!(view.pool_stats().outstanding > 0);

        view.recycle();
        view.recycle();
        assert!(view.is_recycled());
        assert_eq!(view.pool_stats().outstanding, 0);
        assert_eq!(context.stats().documents_recycled, 1);
        assert_eq!(view.update_page_visibility(), 0);
    }

    #[test]
    fn test_go_to_page_out_of_range() {
        let (_context, mut view) = open(book(2), config());
        let err = view.go_to_page(5).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidPage { page: 5, count: 2 }));
    }
}
