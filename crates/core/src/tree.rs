//! Per-page tile quadtree
//!
//! Every page owns a tree of tile nodes stored in a generational arena. The
//! root covers the page's initial slice; a node either has no children or
//! exactly four, one per quadrant of its slice. On each view event the tree
//! is walked from the root and every node decides whether to evict itself,
//! collapse its children, subdivide, or request a decode:
//!
//! 1. nodes outside the resident window that are not visible are evicted
//!    together with their descendants;
//! 2. children that are no longer required are recycled, and the node
//!    decodes itself if it is visible and has no bitmap;
//! 3. nodes that need more resolution create four children and recurse;
//! 4. visible leaves decode when they have no bitmap or the bitmap was made
//!    at a noticeably different zoom.
//!
//! Children hold their parent's key, never a reference; removing a subtree
//! removes every descendant from the arena.

use crate::decode::{DecodeKind, DecodeRequest};
use crate::page::PageGeometry;
use crate::view_state::{DecodeMode, ViewState};
use docview_cache::BufferPool;
use docview_render::{BitmapHolder, RawBitmap, RectF, Surface};
use docview_scheduler::TaskId;
use slotmap::{new_key_type, SlotMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

new_key_type! {
    /// Arena key of a tile node
    pub struct NodeKey;
}

/// Deepest level a tree may grow to
pub const MAX_TREE_DEPTH: u8 = 12;

/// Zoom ratio above which a committed-or-not bitmap is re-decoded
pub const REDECODE_ZOOM_FACTOR: f32 = 1.2;

/// Quadrants in child order: top-left, top-right, bottom-left, bottom-right
const QUADRANTS: [RectF; 4] = [
    RectF::new(0.0, 0.0, 0.5, 0.5),
    RectF::new(0.5, 0.0, 1.0, 0.5),
    RectF::new(0.0, 0.5, 0.5, 1.0),
    RectF::new(0.5, 0.5, 1.0, 1.0),
];

/// Identifies a node across pages; used as the executor key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// View index of the page
    pub page: usize,
    pub key: NodeKey,
}

/// Cancels in-flight decodes for nodes that stop needing them
pub trait DecodeControl {
    fn stop_decoding(&self, node: NodeRef, reason: &str);
}

/// What a tree pass needs to release node resources
#[derive(Clone, Copy)]
pub struct NodeRelease<'a> {
    pub page: usize,
    pub decoder: &'a dyn DecodeControl,
    pub pool: &'a BufferPool,
}

/// Inputs of one update pass over a page's tree
#[derive(Clone, Copy)]
pub struct TreeContext<'a> {
    pub view: &'a ViewState,
    pub geometry: PageGeometry,
    pub doc_page: usize,
    pub crop_pages: bool,
    pub release: NodeRelease<'a>,
}

impl TreeContext<'_> {
    fn target_rect(&self, slice: &RectF) -> RectF {
        self.geometry.target_rect(slice)
    }
}

/// A node that needs decoding, collected during an update pass
#[derive(Debug, Clone)]
pub struct DecodeCandidate {
    pub node: NodeRef,
    /// Layout rectangle of the node
    pub target: RectF,
    pub request: DecodeRequest,
}

/// One tile of a page
#[derive(Debug)]
pub struct TileNode {
    id: u64,
    depth: u8,
    parent: Option<NodeKey>,
    children: Option<[NodeKey; 4]>,
    slice: RectF,
    cropped: Option<RectF>,
    crop_checked: bool,
    zoom_threshold: f32,
    bitmap_zoom: f32,
    decoding: AtomicBool,
    pending_task: Option<TaskId>,
    holder: BitmapHolder,
}

impl TileNode {
    fn new(
        id: u64,
        depth: u8,
        parent: Option<NodeKey>,
        slice: RectF,
        cropped: Option<RectF>,
        zoom_threshold: f32,
    ) -> Self {
        Self {
            id,
            depth,
            parent,
            children: None,
            slice,
            cropped,
            crop_checked: false,
            zoom_threshold,
            bitmap_zoom: 0.0,
            decoding: AtomicBool::new(false),
            pending_task: None,
            holder: BitmapHolder::new(),
        }
    }

    /// Path id: root 0, child `parent * 4 + quadrant + 1`
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> Option<[NodeKey; 4]> {
        self.children
    }

    /// Fractional page region this node displays
    pub fn slice(&self) -> RectF {
        self.slice
    }

    /// Region rendered for this node once margins are cropped
    pub fn cropped_bounds(&self) -> Option<RectF> {
        self.cropped
    }

    /// Region passed to the decoder
    pub fn decode_slice(&self) -> RectF {
        self.cropped.unwrap_or(self.slice)
    }

    pub fn zoom_threshold(&self) -> f32 {
        self.zoom_threshold
    }

    /// Zoom the current or in-flight bitmap was requested at
    pub fn bitmap_zoom(&self) -> f32 {
        self.bitmap_zoom
    }

    pub fn is_decoding(&self) -> bool {
        self.decoding.load(Ordering::Acquire)
    }

    /// Flip the decoding flag; `false` when it already had `value`
    pub fn set_decoding(&self, value: bool) -> bool {
        self.decoding
            .compare_exchange(!value, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn pending_task(&self) -> Option<TaskId> {
        self.pending_task
    }

    pub fn set_pending_task(&mut self, task: Option<TaskId>) {
        self.pending_task = task;
    }

    pub fn holder(&self) -> &BitmapHolder {
        &self.holder
    }

    pub fn has_content(&self) -> bool {
        !self.holder.is_empty()
    }

    pub fn is_crop_checked(&self) -> bool {
        self.crop_checked
    }

    /// Record detected margins; only meaningful for the root
    pub fn set_cropped_bounds(&mut self, bounds: RectF) {
        self.cropped = Some(bounds);
        self.crop_checked = true;
    }

    fn is_redecoding_required(&self, view: &ViewState) -> bool {
        (view.committed && view.zoom != self.bitmap_zoom)
            || view.zoom > REDECODE_ZOOM_FACTOR * self.bitmap_zoom
    }
}

/// Arena-backed quadtree for one page
#[derive(Debug)]
pub struct PageTree {
    nodes: SlotMap<NodeKey, TileNode>,
    root: NodeKey,
}

impl PageTree {
    pub fn new(initial_slice: RectF, root_threshold: f32) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(TileNode::new(0, 0, None, initial_slice, None, root_threshold));
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn node(&self, key: NodeKey) -> Option<&TileNode> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut TileNode> {
        self.nodes.get_mut(key)
    }

    /// Nodes currently in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, &TileNode)> {
        self.nodes.iter()
    }

    /// Pooled buffers held by all nodes
    pub fn buffer_count(&self) -> usize {
        self.nodes.values().map(|n| n.holder.buffer_count()).sum()
    }

    /// Walk the subtree at `key` and collect decode candidates
    pub fn update(&mut self, key: NodeKey, ctx: &TreeContext<'_>, out: &mut Vec<DecodeCandidate>) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        let target = ctx.target_rect(&node.slice);
        let visible = ctx.view.is_node_visible(&target);

        if !ctx.view.is_node_kept_in_memory(ctx.release.page, &target) {
            self.evict(key, &ctx.release);
            return;
        }

        let scaled = ctx.target_rect(&node.decode_slice());
        let required = self.is_children_required(node, ctx.view, &scaled);
        let has_children = node.children.is_some();

        if has_children && !required {
            self.recycle_children(key, &ctx.release);
            if visible && !self.has_bitmap(key, ctx.release.pool) {
                self.decode(key, ctx, target, out);
            }
            return;
        }

        if required {
            let children = match self.nodes[key].children {
                Some(children) => children,
                None => self.create_children(key, ctx),
            };
            for child in children {
                self.update(child, ctx, out);
            }
            return;
        }

        // Kept leaves decode even when hidden so neighbour pages are ready
        if self.nodes[key].is_redecoding_required(ctx.view) {
            self.stop_decoding(key, &ctx.release, "zoom changed");
            self.decode(key, ctx, target, out);
        } else if !self.has_bitmap(key, ctx.release.pool) {
            self.decode(key, ctx, target, out);
        }
    }

    /// `scaled` is the node's decoded area in layout units, margins excluded
    fn is_children_required(&self, node: &TileNode, view: &ViewState, scaled: &RectF) -> bool {
        if node.depth >= MAX_TREE_DEPTH {
            return false;
        }
        match view.decode_mode {
            DecodeMode::NativeResolution => false,
            DecodeMode::Normal => {
                let limit = view.slice_limit as f32;
                view.zoom > node.zoom_threshold || scaled.width() > limit || scaled.height() > limit
            }
            DecodeMode::LowMemory => {
                let width = scaled.width().max(0.0) as u64;
                let height = scaled.height().max(0.0) as u64;
                width * height * 4 >= view.max_image_size
            }
        }
    }

    fn create_children(&mut self, key: NodeKey, ctx: &TreeContext<'_>) -> [NodeKey; 4] {
        let parent = &self.nodes[key];
        let id = parent.id;
        let depth = parent.depth + 1;
        let slice = parent.slice;
        let cropped = parent.cropped;
        let threshold = parent.zoom_threshold * parent.zoom_threshold;

        let children = std::array::from_fn(|q| {
            let quadrant = &QUADRANTS[q];
            self.nodes.insert(TileNode::new(
                id * 4 + q as u64 + 1,
                depth,
                Some(key),
                quadrant.map_into(&slice),
                cropped.map(|c| quadrant.map_into(&c)),
                threshold,
            ))
        });
        self.nodes[key].children = Some(children);
        trace!(page = ctx.release.page, node = id, "children created");

        if id != 0 || ctx.view.decode_mode == DecodeMode::LowMemory {
            self.stop_decoding(key, &ctx.release, "children created");
        }
        children
    }

    fn decode(
        &mut self,
        key: NodeKey,
        ctx: &TreeContext<'_>,
        target: RectF,
        out: &mut Vec<DecodeCandidate>,
    ) {
        let node = &mut self.nodes[key];
        if !node.set_decoding(true) {
            return;
        }
        node.bitmap_zoom = ctx.view.zoom;

        let kind = if ctx.crop_pages && node.parent.is_none() && !node.crop_checked {
            DecodeKind::CropProbe
        } else {
            DecodeKind::Content
        };
        let target_width = ctx.geometry.base_width(ctx.view.zoom).round().max(1.0) as u32;
        out.push(DecodeCandidate {
            node: NodeRef {
                page: ctx.release.page,
                key,
            },
            target,
            request: DecodeRequest {
                doc_page: ctx.doc_page,
                target_width,
                zoom: ctx.view.zoom,
                slice: node.decode_slice(),
                kind,
            },
        });
    }

    /// Request a decode for `key` outside a full pass
    ///
    /// Used to re-issue the root decode once margins are known.
    pub fn request_decode(
        &mut self,
        key: NodeKey,
        ctx: &TreeContext<'_>,
        out: &mut Vec<DecodeCandidate>,
    ) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        let target = ctx.target_rect(&node.slice);
        self.decode(key, ctx, target, out);
    }

    /// Clear the decoding flag and cancel any in-flight task
    pub fn stop_decoding(&mut self, key: NodeKey, release: &NodeRelease<'_>, reason: &str) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        node.pending_task = None;
        if node.set_decoding(false) {
            release.decoder.stop_decoding(
                NodeRef {
                    page: release.page,
                    key,
                },
                reason,
            );
        }
    }

    fn has_bitmap(&self, key: NodeKey, pool: &BufferPool) -> bool {
        self.nodes
            .get(key)
            .is_some_and(|node| node.holder.has_day_bitmap(pool))
    }

    /// Whether all four children have content
    pub fn is_hidden_by_children(&self, key: NodeKey, pool: &BufferPool) -> bool {
        let Some(children) = self.nodes.get(key).and_then(|n| n.children) else {
            return false;
        };
        children.into_iter().all(|child| self.has_bitmap(child, pool))
    }

    /// Install decoded content into `key`
    ///
    /// Clears the decoding flag. Returns whether the pool could hold it.
    pub fn install(&mut self, key: NodeKey, bitmap: &RawBitmap, pool: &BufferPool) -> bool {
        let Some(node) = self.nodes.get_mut(key) else {
            return false;
        };
        let installed = node.holder.set_bitmap(bitmap, pool);
        node.pending_task = None;
        node.set_decoding(false);
        installed
    }

    /// React to a child's bitmap arriving
    ///
    /// In low-memory mode the parent drops its own bitmap once the children
    /// cover it completely. Returns the number of buffers released.
    pub fn on_child_loaded(&mut self, parent: NodeKey, view: &ViewState, pool: &BufferPool) -> usize {
        if view.decode_mode != DecodeMode::LowMemory {
            return 0;
        }
        if !self.is_hidden_by_children(parent, pool) {
            return 0;
        }
        match self.nodes.get_mut(parent) {
            Some(node) => {
                let released = node.holder.recycle(pool);
                if released > 0 {
                    trace!(node = node.id, released, "parent bitmap hidden by children");
                }
                released
            }
            None => 0,
        }
    }

    fn evict(&mut self, key: NodeKey, release: &NodeRelease<'_>) {
        self.stop_decoding(key, release, "node evicted");
        if let Some(node) = self.nodes.get_mut(key) {
            let released = node.holder.recycle(release.pool);
            if released > 0 {
                trace!(page = release.page, node = node.id, released, "node evicted");
            }
        }
        self.recycle_children(key, release);
    }

    /// Remove all descendants of `key`, releasing their buffers
    pub fn recycle_children(&mut self, key: NodeKey, release: &NodeRelease<'_>) -> usize {
        let Some(children) = self.nodes.get_mut(key).and_then(|n| n.children.take()) else {
            return 0;
        };
        let mut removed = 0;
        for child in children {
            removed += self.remove_subtree(child, release);
        }
        removed
    }

    fn remove_subtree(&mut self, key: NodeKey, release: &NodeRelease<'_>) -> usize {
        let removed = self.recycle_children(key, release);
        self.stop_decoding(key, release, "node recycled");
        match self.nodes.remove(key) {
            Some(mut node) => {
                node.holder.recycle(release.pool);
                removed + 1
            }
            None => removed,
        }
    }

    /// Release everything: the root keeps its slot but loses its content
    pub fn recycle(&mut self, release: &NodeRelease<'_>) {
        let root = self.root;
        self.evict(root, release);
    }

    /// Composite the subtree at `key`
    ///
    /// A node is drawn unless its four children all have content; children
    /// are drawn on top. Returns the number of nodes drawn.
    pub fn draw(
        &mut self,
        key: NodeKey,
        surface: &mut dyn Surface,
        view: &ViewState,
        geometry: &PageGeometry,
        pool: &BufferPool,
    ) -> usize {
        let Some(node) = self.nodes.get(key) else {
            return 0;
        };
        let target = geometry.target_rect(&node.slice);
        if !view.is_node_visible(&target) {
            return 0;
        }
        let children = node.children;

        let mut drawn = 0;
        if !self.is_hidden_by_children(key, pool) {
            let device = view.to_surface(&target);
            if let Some(node) = self.nodes.get_mut(key) {
                if node.holder.draw(surface, view.night_mode, &device, pool) {
                    drawn += 1;
                }
            }
        }
        for child in children.into_iter().flatten() {
            drawn += self.draw(child, surface, view, geometry, pool);
        }
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageType;
    use docview_render::RgbaSurface;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingControl {
        stopped: RefCell<Vec<(NodeRef, String)>>,
    }

    impl DecodeControl for RecordingControl {
        fn stop_decoding(&self, node: NodeRef, reason: &str) {
            self.stopped.borrow_mut().push((node, reason.to_string()));
        }
    }

    fn full_page(width: f32, height: f32) -> PageGeometry {
        PageGeometry {
            page_type: PageType::Full,
            bounds: RectF::from_size(width, height),
        }
    }

    fn view(zoom: f32, viewport: RectF, pages: Vec<RectF>) -> ViewState {
        ViewState::new(viewport, zoom, pages)
    }

    struct Fixture {
        pool: BufferPool,
        control: RecordingControl,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pool: BufferPool::new(),
                control: RecordingControl::default(),
            }
        }

        fn ctx<'a>(&'a self, view: &'a ViewState, geometry: PageGeometry, page: usize) -> TreeContext<'a> {
            TreeContext {
                view,
                geometry,
                doc_page: page,
                crop_pages: false,
                release: NodeRelease {
                    page,
                    decoder: &self.control,
                    pool: &self.pool,
                },
            }
        }
    }

    fn assert_shape(tree: &PageTree) {
        let mut reachable = 0;
        let mut stack = vec![tree.root()];
        while let Some(key) = stack.pop() {
            reachable += 1;
            let node = tree.node(key).unwrap();
            if let Some(children) = node.children() {
                for child in children {
                    assert_eq!(tree.node(child).unwrap().parent(), Some(key));
                    stack.push(child);
                }
            }
        }
        assert_eq!(reachable, tree.len(), "arena holds unreachable nodes");
    }

    #[test]
    fn test_small_page_at_zoom_one_decodes_root() {
        let fx = Fixture::new();
        let geometry = full_page(1000.0, 1400.0);
        let state = view(1.0, RectF::from_size(1000.0, 800.0), vec![geometry.bounds]);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let mut out = Vec::new();

        tree.update(tree.root(), &fx.ctx(&state, geometry, 0), &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node.key, tree.root());
        assert_eq!(out[0].request.slice, RectF::UNIT);
        assert_eq!(out[0].request.target_width, 1000);
        assert_eq!(tree.len(), 1);
        assert!(tree.node(tree.root()).unwrap().is_decoding());
    }

    #[test]
    fn test_zoom_three_subdivides_before_decoding() {
        let fx = Fixture::new();
        let geometry = full_page(3000.0, 3600.0);
        let state = view(3.0, RectF::from_size(3000.0, 3600.0), vec![geometry.bounds]);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let mut out = Vec::new();

        tree.update(tree.root(), &fx.ctx(&state, geometry, 0), &mut out);

        let root = tree.node(tree.root()).unwrap();
        let children = root.children().unwrap();
        assert!(!root.is_decoding());
        assert_eq!(out.len(), 4);
        for (q, child) in children.iter().enumerate() {
            let node = tree.node(*child).unwrap();
            assert_eq!(node.id(), q as u64 + 1);
            assert_eq!(node.zoom_threshold(), 4.0);
            assert!(out.iter().any(|c| c.node.key == *child));
        }
        assert_eq!(out[0].request.target_width, 1000);
        assert_shape(&tree);
    }

    #[test]
    fn test_slice_limit_forces_subdivision() {
        let fx = Fixture::new();
        let geometry = full_page(2500.0, 3000.0);
        let state = view(1.0, RectF::from_size(2500.0, 3000.0), vec![geometry.bounds]);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let mut out = Vec::new();

        tree.update(tree.root(), &fx.ctx(&state, geometry, 0), &mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_native_resolution_never_subdivides() {
        let fx = Fixture::new();
        let geometry = full_page(5000.0, 7000.0);
        let state = view(5.0, RectF::from_size(1000.0, 800.0), vec![geometry.bounds])
            .with_decode_mode(DecodeMode::NativeResolution);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let mut out = Vec::new();

        tree.update(tree.root(), &fx.ctx(&state, geometry, 0), &mut out);
        assert_eq!(tree.len(), 1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_low_memory_subdivides_by_bytes_and_stops_root() {
        let fx = Fixture::new();
        let geometry = full_page(600.0, 800.0);
        let mut state = view(1.0, RectF::from_size(600.0, 800.0), vec![geometry.bounds])
            .with_decode_mode(DecodeMode::LowMemory);
        state.max_image_size = 600 * 800 * 4;
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.node_mut(root).unwrap().set_decoding(true);
        let mut out = Vec::new();

        tree.update(root, &fx.ctx(&state, geometry, 0), &mut out);

        assert_eq!(tree.len(), 5);
        assert_eq!(out.len(), 4);
        let stopped = fx.control.stopped.borrow();
        assert!(stopped
            .iter()
            .any(|(node, reason)| node.key == root && reason == "children created"));
    }

    #[test]
    fn test_redecode_on_committed_zoom_change() {
        let fx = Fixture::new();
        let geometry = full_page(1000.0, 1400.0);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        let mut out = Vec::new();

        let first = view(1.0, RectF::from_size(1000.0, 800.0), vec![geometry.bounds]);
        tree.update(root, &fx.ctx(&first, geometry, 0), &mut out);
        assert_eq!(out.len(), 1);

        let moved = full_page(1050.0, 1470.0);
        let second = view(1.05, RectF::from_size(1000.0, 800.0), vec![moved.bounds]);
        out.clear();
        tree.update(root, &fx.ctx(&second, moved, 0), &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].request.zoom, 1.05);
        assert_eq!(tree.node(root).unwrap().bitmap_zoom(), 1.05);
        let stopped = fx.control.stopped.borrow();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].1, "zoom changed");
    }

    #[test]
    fn test_uncommitted_small_zoom_change_keeps_bitmap() {
        let fx = Fixture::new();
        let geometry = full_page(100.0, 100.0);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.install(root, &RawBitmap::new(100, 100), &fx.pool);
        tree.node_mut(root).unwrap().bitmap_zoom = 1.0;

        let pinch = view(1.1, RectF::from_size(100.0, 100.0), vec![geometry.bounds])
            .with_committed(false);
        let mut out = Vec::new();
        tree.update(root, &fx.ctx(&pinch, geometry, 0), &mut out);
        assert!(out.is_empty());

        let mut far = pinch.clone();
        far.zoom = 1.3;
        tree.update(root, &fx.ctx(&far, geometry, 0), &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_far_page_is_evicted() {
        let fx = Fixture::new();
        let pages: Vec<RectF> = (0..60)
            .map(|i| RectF::new(0.0, i as f32 * 1000.0, 800.0, (i + 1) as f32 * 1000.0))
            .collect();
        let state = view(1.0, RectF::new(0.0, 10_000.0, 800.0, 10_600.0), pages.clone())
            .with_current_page(10)
            .with_pages_in_memory(4);
        let geometry = PageGeometry {
            page_type: PageType::Full,
            bounds: pages[50],
        };

        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.install(root, &RawBitmap::new(300, 300), &fx.pool);
        let ctx = fx.ctx(&state, geometry, 50);
        let children = tree.create_children(root, &ctx);
        for child in children {
            tree.install(child, &RawBitmap::new(150, 150), &fx.pool);
        }
        tree.node_mut(children[0]).unwrap().set_decoding(true);
        assert_eq!(fx.pool.stats().outstanding, 9 + 4 * 4);

        let mut out = Vec::new();
        tree.update(root, &ctx, &mut out);

        assert!(out.is_empty());
        assert_eq!(tree.len(), 1);
        assert!(!tree.node(root).unwrap().has_content());
        let stats = fx.pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free_buffers, 25);
        let stopped = fx.control.stopped.borrow();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].0.key, children[0]);
    }

    #[test]
    fn test_zoom_out_collapses_children() {
        let fx = Fixture::new();
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        let mut out = Vec::new();

        let zoomed = full_page(3000.0, 3000.0);
        let state = view(3.0, RectF::from_size(1000.0, 1000.0), vec![zoomed.bounds]);
        tree.update(root, &fx.ctx(&state, zoomed, 0), &mut out);
        assert_eq!(tree.len(), 5);

        out.clear();
        let normal = full_page(1000.0, 1000.0);
        let state = view(1.0, RectF::from_size(1000.0, 1000.0), vec![normal.bounds]);
        tree.update(root, &fx.ctx(&state, normal, 0), &mut out);

        assert_eq!(tree.len(), 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node.key, root);
        assert_shape(&tree);
    }

    #[test]
    fn test_hidden_kept_leaf_is_decoded() {
        let fx = Fixture::new();
        let geometry = full_page(1000.0, 1000.0);
        let pages = vec![geometry.bounds];
        let state = view(1.0, RectF::new(0.0, 2000.0, 1000.0, 2600.0), pages);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        assert!(!state.is_node_visible(&geometry.bounds));

        let mut out = Vec::new();
        tree.update(root, &fx.ctx(&state, geometry, 0), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node.key, root);
        assert!(tree.node(root).unwrap().is_decoding());

        // The in-flight decode survives further passes while still hidden
        out.clear();
        tree.update(root, &fx.ctx(&state, geometry, 0), &mut out);
        assert!(out.is_empty());
        assert!(tree.node(root).unwrap().is_decoding());
        assert!(fx.control.stopped.borrow().is_empty());
    }

    #[test]
    fn test_hidden_page_outside_window_stops_decoding() {
        let fx = Fixture::new();
        let pages: Vec<RectF> = (0..6)
            .map(|i| RectF::new(0.0, i as f32 * 1000.0, 1000.0, (i + 1) as f32 * 1000.0))
            .collect();
        let state = view(1.0, RectF::from_size(1000.0, 800.0), pages.clone())
            .with_pages_in_memory(2);
        let geometry = PageGeometry {
            page_type: PageType::Full,
            bounds: pages[5],
        };
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.node_mut(root).unwrap().set_decoding(true);

        let mut out = Vec::new();
        tree.update(root, &fx.ctx(&state, geometry, 5), &mut out);
        assert!(out.is_empty());
        assert!(!tree.node(root).unwrap().is_decoding());
        assert_eq!(fx.control.stopped.borrow()[0].1, "node evicted");
    }

    #[test]
    fn test_subdivision_uses_cropped_size() {
        let fx = Fixture::new();
        let geometry = full_page(2400.0, 2400.0);
        let state = view(1.0, RectF::from_size(2400.0, 2400.0), vec![geometry.bounds]);
        let mut out = Vec::new();

        let mut uncropped = PageTree::new(RectF::UNIT, 2.0);
        uncropped.update(uncropped.root(), &fx.ctx(&state, geometry, 0), &mut out);
        assert_eq!(uncropped.len(), 5);

        // 80% of 2400 is under the 2048 slice limit
        out.clear();
        let mut cropped = PageTree::new(RectF::UNIT, 2.0);
        let root = cropped.root();
        cropped
            .node_mut(root)
            .unwrap()
            .set_cropped_bounds(RectF::new(0.1, 0.1, 0.9, 0.9));
        cropped.update(root, &fx.ctx(&state, geometry, 0), &mut out);
        assert_eq!(cropped.len(), 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].request.slice, RectF::new(0.1, 0.1, 0.9, 0.9));
    }

    #[test]
    fn test_night_mode_pass_does_not_derive_night_copy() {
        let fx = Fixture::new();
        let geometry = full_page(600.0, 800.0);
        let mut state = view(1.0, RectF::new(0.0, 2000.0, 600.0, 2800.0), vec![geometry.bounds]);
        state.night_mode = true;
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.node_mut(root).unwrap().bitmap_zoom = 1.0;
        tree.install(root, &RawBitmap::new(600, 800), &fx.pool);
        let cells = tree.buffer_count();

        let mut out = Vec::new();
        tree.update(root, &fx.ctx(&state, geometry, 0), &mut out);
        assert!(out.is_empty());
        assert_eq!(tree.buffer_count(), cells);
    }

    #[test]
    fn test_cropped_bounds_propagate_to_children() {
        let fx = Fixture::new();
        let geometry = full_page(3000.0, 3000.0);
        let state = view(3.0, RectF::from_size(3000.0, 3000.0), vec![geometry.bounds]);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.node_mut(root)
            .unwrap()
            .set_cropped_bounds(RectF::new(0.1, 0.2, 0.9, 0.8));

        let mut out = Vec::new();
        tree.update(root, &fx.ctx(&state, geometry, 0), &mut out);

        let children = tree.node(root).unwrap().children().unwrap();
        let last = tree.node(children[3]).unwrap();
        assert!(last
            .cropped_bounds()
            .unwrap()
            .approx_eq(&RectF::new(0.5, 0.5, 0.9, 0.8), 1e-6));
        assert_eq!(last.slice(), RectF::new(0.5, 0.5, 1.0, 1.0));
        let request = out.iter().find(|c| c.node.key == children[3]).unwrap();
        assert_eq!(request.request.slice, last.decode_slice());
    }

    #[test]
    fn test_crop_probe_only_for_unchecked_root() {
        let fx = Fixture::new();
        let geometry = full_page(800.0, 1000.0);
        let state = view(1.0, RectF::from_size(800.0, 1000.0), vec![geometry.bounds]);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        let mut ctx = fx.ctx(&state, geometry, 0);
        ctx.crop_pages = true;

        let mut out = Vec::new();
        tree.update(root, &ctx, &mut out);
        assert_eq!(out[0].request.kind, DecodeKind::CropProbe);

        tree.stop_decoding(root, &ctx.release, "test");
        tree.node_mut(root).unwrap().set_cropped_bounds(RectF::UNIT);
        out.clear();
        tree.request_decode(root, &ctx, &mut out);
        assert_eq!(out[0].request.kind, DecodeKind::Content);
    }

    #[test]
    fn test_low_memory_parent_released_when_children_loaded() {
        let fx = Fixture::new();
        let geometry = full_page(400.0, 400.0);
        let state = view(1.0, RectF::from_size(400.0, 400.0), vec![geometry.bounds])
            .with_decode_mode(DecodeMode::LowMemory);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.install(root, &RawBitmap::new(256, 256), &fx.pool);
        let children = tree.create_children(root, &fx.ctx(&state, geometry, 0));

        for (i, child) in children.iter().enumerate() {
            tree.install(*child, &RawBitmap::new(128, 128), &fx.pool);
            let released = tree.on_child_loaded(root, &state, &fx.pool);
            if i < 3 {
                assert_eq!(released, 0);
            } else {
                assert_eq!(released, 4);
            }
        }
        assert!(!tree.node(root).unwrap().has_content());
    }

    #[test]
    fn test_draw_skips_parent_hidden_by_children() {
        let fx = Fixture::new();
        let geometry = full_page(256.0, 256.0);
        let state = view(1.0, RectF::from_size(256.0, 256.0), vec![geometry.bounds]);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.install(root, &RawBitmap::new(256, 256), &fx.pool);
        let children = tree.create_children(root, &fx.ctx(&state, geometry, 0));

        let mut surface = RgbaSurface::new(256, 256);
        assert_eq!(tree.draw(root, &mut surface, &state, &geometry, &fx.pool), 1);

        for child in children {
            tree.install(child, &RawBitmap::new(128, 128), &fx.pool);
        }
        let mut surface = RgbaSurface::new(256, 256);
        assert_eq!(tree.draw(root, &mut surface, &state, &geometry, &fx.pool), 4);
    }

    #[test]
    fn test_recycle_twice_releases_once() {
        let fx = Fixture::new();
        let geometry = full_page(256.0, 256.0);
        let state = view(1.0, RectF::from_size(256.0, 256.0), vec![geometry.bounds]);
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        tree.install(root, &RawBitmap::new(256, 256), &fx.pool);
        tree.create_children(root, &fx.ctx(&state, geometry, 0));
        let release = fx.ctx(&state, geometry, 0).release;

        tree.recycle(&release);
        tree.recycle(&release);
        let stats = fx.pool.stats();
        assert_eq!(stats.released, 4);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_random_passes_keep_tree_shape() {
        let fx = Fixture::new();
        let mut tree = PageTree::new(RectF::UNIT, 2.0);
        let root = tree.root();
        let zooms = [1.0, 3.0, 5.0, 1.5, 20.0, 2.5, 1.0, 17.0, 4.0, 1.0];
        let scrolls = [0.0, 500.0, 3000.0, 12000.0, 100.0];

        for (i, zoom) in zooms.iter().enumerate() {
            let geometry = full_page(800.0 * zoom, 1000.0 * zoom);
            let top = scrolls[i % scrolls.len()];
            let state = view(*zoom, RectF::new(0.0, top, 800.0, top + 600.0), vec![geometry.bounds]);
            let mut out = Vec::new();
            tree.update(root, &fx.ctx(&state, geometry, 0), &mut out);

            for candidate in &out {
                let node = tree.node(candidate.node.key).unwrap();
                assert!(node.is_decoding());
                tree.install(candidate.node.key, &RawBitmap::new(8, 8), &fx.pool);
            }
            assert_shape(&tree);
        }
    }
}
