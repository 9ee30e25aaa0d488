//! Persisted step log for restartable orchestration.
//!
//! Every orchestration step stores its result under a deterministic key once
//! it completes. A rerun over the same output container consults the journal
//! first and only executes steps that have no record, so a restarted run
//! makes the same dispatch decisions and skips completed work.
//!
//! A record is written only after the step's own side effects (blobs) are
//! durable. A crash between the two re-executes the step, which overwrites
//! the same keyed blobs.

use crate::error::{Error, Result};
use crate::io::{ArtifactStore, DocLayout};
use crate::pipeline::NodeKey;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// An orchestration step with a recorded result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Extract,
    Paginate,
    LeafSize,
    Leaves,
    /// One summarization call.
    Node(NodeKey),
    /// Reduction settings the recorded nodes and rounds were built with.
    TreeShape,
    /// One completed reduction level (0 = leaf wave).
    Round(u32),
    TopSummary,
    Rollup,
}

impl Step {
    /// Path segment used for the step's journal record.
    pub fn segment(&self) -> String {
        match self {
            Step::Extract => "extract".to_string(),
            Step::Paginate => "paginate".to_string(),
            Step::LeafSize => "leaf_size".to_string(),
            Step::Leaves => "leaves".to_string(),
            Step::Node(key) => match &key.position {
                crate::pipeline::Position::Leaf(idx) => {
                    format!("node/level_{}/part_{:04}", key.level, idx)
                }
                crate::pipeline::Position::Group(id) => {
                    format!("node/level_{}/group_{}", key.level, id)
                }
            },
            Step::TreeShape => "tree_shape".to_string(),
            Step::Round(level) => format!("round/level_{}", level),
            Step::TopSummary => "top_summary".to_string(),
            Step::Rollup => "rollup".to_string(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segment())
    }
}

#[derive(Serialize, Deserialize)]
struct Entry<T> {
    recorded_at: DateTime<Utc>,
    value: T,
}

/// Step log for one document.
#[derive(Clone)]
pub struct Journal {
    store: ArtifactStore,
    layout: DocLayout,
}

impl Journal {
    pub fn new(store: ArtifactStore, layout: DocLayout) -> Self {
        Self { store, layout }
    }

    /// Load a step's recorded result.
    pub async fn load<T: DeserializeOwned>(&self, step: &Step) -> Result<Option<T>> {
        let path = self.layout.journal_step(&step.segment());
        let Some(raw) = self.store.try_read_text(&path).await? else {
            return Ok(None);
        };
        let entry: Entry<T> = serde_json::from_str(&raw).map_err(|source| Error::CorruptStep {
            step: step.segment(),
            source,
        })?;
        Ok(Some(entry.value))
    }

    /// Record a step's result.
    pub async fn record<T: Serialize>(&self, step: &Step, value: &T) -> Result<()> {
        let entry = Entry {
            recorded_at: Utc::now(),
            value,
        };
        let path = self.layout.journal_step(&step.segment());
        self.store.write_text(&path, serde_json::to_string(&entry)?).await
    }

    /// Return the recorded result of `step`, or run it and record the result.
    pub async fn replay_or_run<T, F, Fut>(&self, step: &Step, run: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.load(step).await? {
            tracing::debug!("Replaying recorded step {}", step);
            return Ok(value);
        }
        let value = run().await?;
        self.record(step, &value).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn make_journal() -> (Journal, ArtifactStore) {
        let store = ArtifactStore::new(Arc::new(InMemory::new()));
        (Journal::new(store.clone(), DocLayout::new("doc")), store)
    }

    #[test]
    fn test_step_segments() {
        assert_eq!(Step::Round(2).segment(), "round/level_2");
        assert_eq!(Step::TreeShape.segment(), "tree_shape");
        assert_eq!(Step::Node(NodeKey::leaf(3)).segment(), "node/level_0/part_0003");
        assert_eq!(Step::Node(NodeKey::group(1, 4)).segment(), "node/level_1/group_g0004");
    }

    #[tokio::test]
    async fn test_replay_skips_recorded_step() {
        let (journal, _) = make_journal();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: usize = journal
                .replay_or_run(&Step::LeafSize, || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(8)
                })
                .await
                .unwrap();
            assert_eq!(value, 8);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_recorded() {
        let (journal, _) = make_journal();

        let result: Result<usize> = journal
            .replay_or_run(&Step::Leaves, || async { Err(Error::fatal("x", "y")) })
            .await;
        assert!(result.is_err());
        assert!(journal.load::<usize>(&Step::Leaves).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let (journal, store) = make_journal();
        store
            .write_text(&Path::from("doc/journal/leaf_size.json"), "not json")
            .await
            .unwrap();

        let err = journal.load::<usize>(&Step::LeafSize).await.unwrap_err();
        assert!(matches!(err, Error::CorruptStep { .. }));
    }
}
