//! Confidence-adaptive overlapping leaf chunks.

use serde::{Deserialize, Serialize};

/// Overlap ratio bounds applied to the configured base ratio.
const MIN_OVERLAP: f64 = 0.05;
const MAX_OVERLAP: f64 = 0.5;

/// Windows whose mean confidence falls below this get extra overlap.
const LOW_CONFIDENCE: f64 = 0.85;

/// Minimum overlap ratio for low-confidence windows.
const LOW_CONFIDENCE_OVERLAP: f64 = 0.20;

/// A window of consecutive pages fed to the first summarization round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafChunk {
    /// Zero-based leaf index
    pub index: usize,

    /// First page in the window
    pub start_page: usize,

    /// One past the last page in the window
    pub end_page: usize,

    /// Concatenated page text
    pub text: String,

    /// Mean confidence of the window's pages
    pub mean_confidence: f64,

    /// Overlap ratio used to position the next window
    pub overlap_ratio: f64,
}

impl LeafChunk {
    /// Number of pages in the window.
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page
    }
}

/// Pages per leaf for a document of `n_pages` pages.
///
/// Larger documents get larger leaves so the leaf count, and therefore the
/// depth of the reduction tree, grows slowly.
pub fn choose_pages_per_leaf(n_pages: usize) -> usize {
    match n_pages {
        0..=100 => 4,
        101..=500 => 8,
        501..=2000 => 15,
        2001..=10_000 => 22,
        _ => 28,
    }
}

/// Overlap ratio for a window with the given mean confidence.
pub fn effective_overlap(base_ratio: f64, mean_confidence: f64) -> f64 {
    let overlap = base_ratio.clamp(MIN_OVERLAP, MAX_OVERLAP);
    if mean_confidence < LOW_CONFIDENCE {
        overlap.max(LOW_CONFIDENCE_OVERLAP)
    } else {
        overlap
    }
}

/// Slide a window of `leaf_size` pages over `pages`.
///
/// Consecutive windows share `max(1, round(leaf_size * overlap))` pages, where
/// the overlap is recomputed per window from its mean confidence. The window
/// always advances by at least one page and stops when the next window would
/// be empty, so every page lands in at least one leaf. Trailing windows that
/// sit inside the previous one are still emitted. A `leaf_size` covering the
/// whole document yields exactly one leaf.
///
/// `confidences` may be shorter than `pages` (or empty); missing entries are
/// treated as fully confident.
pub fn build_leaves<S: AsRef<str>>(
    pages: &[S],
    leaf_size: usize,
    base_overlap_ratio: f64,
    confidences: &[f64],
) -> Vec<LeafChunk> {
    let n = pages.len();
    let k = leaf_size.max(1);
    let mut leaves = Vec::new();
    let mut start = 0;

    while start < n {
        let end = (start + k).min(n);
        let window = &pages[start..end];
        if window.is_empty() {
            break;
        }

        let mean_confidence = window_mean(confidences, start, end);
        let overlap_ratio = effective_overlap(base_overlap_ratio, mean_confidence);
        let overlap_pages = ((k as f64 * overlap_ratio).round() as usize).max(1);

        leaves.push(LeafChunk {
            index: leaves.len(),
            start_page: start,
            end_page: end,
            text: window.iter().map(|p| p.as_ref()).collect(),
            mean_confidence,
            overlap_ratio,
        });

        if k >= n {
            break;
        }
        start += k.saturating_sub(overlap_pages).max(1);
    }

    leaves
}

fn window_mean(confidences: &[f64], start: usize, end: usize) -> f64 {
    let end = end.min(confidences.len());
    if start >= end {
        return 1.0;
    }
    let window = &confidences[start..end];
    window.iter().sum::<f64>() / window.len() as f64
}
