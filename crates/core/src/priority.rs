//! Submission order for decode candidates
//!
//! Candidates of the page being animated to go first, then visible tiles
//! ahead of prefetched ones, then everything else by distance from the
//! viewport centre. Ties fall back to reading order so the order is stable
//! across runs.

use crate::tree::DecodeCandidate;
use crate::view_state::ViewState;
use std::cmp::Ordering;

fn distance_sq(candidate: &DecodeCandidate, center: (f32, f32)) -> f32 {
    let (x, y) = candidate.target.center();
    let dx = x - center.0;
    let dy = y - center.1;
    dx * dx + dy * dy
}

fn compare(a: &DecodeCandidate, b: &DecodeCandidate, view: &ViewState) -> Ordering {
    let focus = view.focus_page;
    let a_focus = focus == Some(a.node.page);
    let b_focus = focus == Some(b.node.page);
    let a_visible = view.is_node_visible(&a.target);
    let b_visible = view.is_node_visible(&b.target);
    let center = view.viewport_center();

    b_focus
        .cmp(&a_focus)
        .then_with(|| b_visible.cmp(&a_visible))
        .then_with(|| distance_sq(a, center).total_cmp(&distance_sq(b, center)))
        .then_with(|| a.target.top.total_cmp(&b.target.top))
        .then_with(|| a.target.left.total_cmp(&b.target.left))
        .then_with(|| a.node.page.cmp(&b.node.page))
}

/// Sort candidates into submission order
pub fn sort_candidates(candidates: &mut [DecodeCandidate], view: &ViewState) {
    candidates.sort_by(|a, b| compare(a, b, view));
}
