//! Blob naming for per-document artifacts.
//!
//! Internally every artifact is addressed by a structured key; this module is
//! the only place those keys become object paths.

use crate::pipeline::{NodeKey, Position};
use object_store::path::Path;

/// Object paths for one document inside the output container.
#[derive(Debug, Clone)]
pub struct DocLayout {
    doc_id: String,
}

impl DocLayout {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self { doc_id: doc_id.into() }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    fn path(&self, rest: &str) -> Path {
        Path::from(format!("{}/{}", self.doc_id, rest))
    }

    pub fn extracted_text(&self) -> Path {
        self.path("extracted/text.jsonl")
    }

    pub fn confidence(&self) -> Path {
        self.path("extracted/confidence.json")
    }

    pub fn searchable_pdf(&self) -> Path {
        self.path("derived/searchable.pdf")
    }

    /// Logical page blob (1-based in the name).
    pub fn page(&self, index: usize) -> Path {
        self.path(&format!("pages/page_{:05}.txt", index + 1))
    }

    /// Leaf chunk blob (1-based in the name).
    pub fn leaf_chunk(&self, index: usize) -> Path {
        self.path(&format!("chunks/leaf/chunk_{:04}.txt", index + 1))
    }

    /// Summary markdown for a node.
    pub fn summary(&self, key: &NodeKey) -> Path {
        self.path(&format!(
            "summaries/level_{}/{}.md",
            key.level,
            position_part(&key.position)
        ))
    }

    /// Usage record for a node's summarization call.
    pub fn usage_metric(&self, key: &NodeKey) -> Path {
        self.path(&format!(
            "metrics/usage/{}_{}.json",
            key.level,
            position_part(&key.position)
        ))
    }

    /// Prefix under which every usage record lives.
    pub fn usage_prefix(&self) -> Path {
        self.path("metrics/usage")
    }

    pub fn top_summary(&self) -> Path {
        self.path("summaries/top.md")
    }

    pub fn rollup_json(&self) -> Path {
        self.path("metrics/rollup.json")
    }

    pub fn rollup_markdown(&self) -> Path {
        self.path("metrics/rollup.md")
    }

    /// Journal record for an orchestration step.
    pub fn journal_step(&self, step: &str) -> Path {
        self.path(&format!("journal/{}.json", step))
    }
}

fn position_part(position: &Position) -> String {
    match position {
        Position::Leaf(idx) => format!("part_{:04}", idx),
        Position::Group(id) => format!("group_{}", id),
    }
}
