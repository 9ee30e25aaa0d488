//! Pagination and leaf chunk construction.

mod leaves;
mod paginate;

pub use leaves::{build_leaves, choose_pages_per_leaf, effective_overlap, LeafChunk};
pub use paginate::{
    non_blank_count, paginate, parse_confidence_map, parse_rows, ConfidenceMap, Page, Pagination,
    TextRow,
};
