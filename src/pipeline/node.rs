//! Summary tree nodes and their structured keys.

use crate::summarizer::Usage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a node sits within its level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Level 0: the index of the leaf chunk.
    Leaf(usize),
    /// Level >= 1: an opaque group identifier, unique within the level.
    Group(String),
}

/// Identifies one node of the summary tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub level: u32,
    pub position: Position,
}

impl NodeKey {
    /// Key of the level-0 node summarizing leaf `index`.
    pub fn leaf(index: usize) -> Self {
        Self {
            level: 0,
            position: Position::Leaf(index),
        }
    }

    /// Key of the `ordinal`-th group formed at `level`.
    ///
    /// Group ids depend only on the level and the group's position in
    /// formation order, so a replayed run derives the same ids.
    pub fn group(level: u32, ordinal: usize) -> Self {
        Self {
            level,
            position: Position::Group(format!("g{:04}", ordinal)),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Position::Leaf(idx) => write!(f, "L{}/leaf {}", self.level, idx),
            Position::Group(id) => write!(f, "L{}/group {}", self.level, id),
        }
    }
}

/// A persisted summary produced by one summarization call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryNode {
    pub key: NodeKey,
    pub content: String,
    #[serde(default)]
    pub usage: Usage,
}
