//! Hierarchical reduction of leaf chunks into a single summary.
//!
//! The engine runs `LeafWave -> (Grouping -> ParentWave)* -> Done`:
//!
//! 1. Every leaf is summarized at level 0 through the leaf-wave scheduler.
//! 2. While more than one summary remains, the current summaries are cut into
//!    consecutive groups of at most `child_cap` and every group is folded
//!    into one parent summary through the parent-wave scheduler.
//!
//! With `child_cap >= 2` every round maps `len` summaries to
//! `ceil(len / child_cap) < len`, so the loop always reaches a single summary.
//! When a [`Journal`] is attached, each finished round is recorded and a rerun
//! reuses recorded rounds without dispatching any call. The journal also pins
//! the [`TreeShape`] of the first run; resuming with a different shape fails.

use crate::chunking::LeafChunk;
use crate::config::ReduceConfig;
use crate::error::{Error, Result};
use crate::pipeline::journal::{Journal, Step};
use crate::pipeline::scheduler::WaveScheduler;
use crate::pipeline::{NodeKey, Progress, SummaryNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Separator placed between child summaries in a parent payload.
pub const GROUP_SEPARATOR: &str = "\n\n---\n\n";

/// One summarization work item.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRequest {
    /// Key of the node to produce
    pub key: NodeKey,

    /// Leaf text, or the joined child summaries
    pub payload: String,

    /// Output token budget for the call
    pub budget_tokens: u32,
}

/// Produces the summary node for a work item.
#[async_trait]
pub trait NodeSummarizer: Send + Sync {
    async fn summarize_node(&self, request: NodeRequest) -> Result<SummaryNode>;
}

/// Reduction phases, in the order the engine moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LeafWave,
    Grouping,
    ParentWave,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::LeafWave => "leaf-wave",
            Phase::Grouping => "grouping",
            Phase::ParentWave => "parent-wave",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Summaries at the end of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceState {
    /// Level of every node in `current`
    pub level: u32,

    /// Summaries in leaf order (level 0) or group formation order
    pub current: Vec<SummaryNode>,
}

impl ReduceState {
    /// Phase that follows this state.
    pub fn next_phase(&self) -> Phase {
        if self.current.len() > 1 {
            Phase::Grouping
        } else {
            Phase::Done
        }
    }
}

/// Result of a full reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOutcome {
    /// The single remaining summary
    pub top: SummaryNode,

    /// Parent rounds run after the leaf wave
    pub rounds: u32,

    /// Levels in the tree, counting the leaf level
    pub levels: u32,
}

/// Reduction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceSettings {
    pub child_cap: usize,
    pub leaf_wave: usize,
    pub parent_wave: usize,
    pub leaf_budget_tokens: u32,
    pub reduce_budget_tokens: u32,
}

impl From<&ReduceConfig> for ReduceSettings {
    fn from(config: &ReduceConfig) -> Self {
        Self {
            child_cap: config.child_cap,
            leaf_wave: config.leaf_wave,
            parent_wave: config.parent_wave,
            leaf_budget_tokens: config.leaf_budget_tokens,
            reduce_budget_tokens: config.reduce_budget_tokens,
        }
    }
}

impl ReduceSettings {
    /// Settings that determine the content of recorded nodes and rounds.
    pub fn shape(&self) -> TreeShape {
        TreeShape {
            child_cap: self.child_cap,
            leaf_budget_tokens: self.leaf_budget_tokens,
            reduce_budget_tokens: self.reduce_budget_tokens,
        }
    }
}

/// Tree-shaping settings a document's journal was recorded with.
///
/// Wave sizes are left out: they change concurrency, not results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeShape {
    pub child_cap: usize,
    pub leaf_budget_tokens: u32,
    pub reduce_budget_tokens: u32,
}

impl fmt::Display for TreeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "child_cap={}, leaf_budget_tokens={}, reduce_budget_tokens={}",
            self.child_cap, self.leaf_budget_tokens, self.reduce_budget_tokens
        )
    }
}

/// Number of nodes at each level of the tree built over `n_leaves` leaves.
///
/// The first entry is the leaf count and the last is 1. Empty for zero leaves.
pub fn level_sizes(n_leaves: usize, child_cap: usize) -> Vec<usize> {
    if n_leaves == 0 {
        return Vec::new();
    }
    let cap = child_cap.max(2);
    let mut sizes = vec![n_leaves];
    let mut len = n_leaves;
    while len > 1 {
        len = len.div_ceil(cap);
        sizes.push(len);
    }
    sizes
}

/// Fold `current` into parent work items of at most `child_cap` children.
pub fn form_groups(current: &[SummaryNode], level: u32, child_cap: usize, budget_tokens: u32) -> Vec<NodeRequest> {
    current
        .chunks(child_cap)
        .enumerate()
        .map(|(ordinal, children)| NodeRequest {
            key: NodeKey::group(level, ordinal),
            payload: children
                .iter()
                .map(|child| child.content.as_str())
                .collect::<Vec<_>>()
                .join(GROUP_SEPARATOR),
            budget_tokens,
        })
        .collect()
}

/// Drives the reduction state machine.
pub struct ReduceEngine {
    settings: ReduceSettings,
    leaf_scheduler: WaveScheduler,
    parent_scheduler: WaveScheduler,
    progress: Option<Arc<Progress>>,
    journal: Option<Journal>,
}

impl ReduceEngine {
    pub fn new(settings: ReduceSettings) -> Result<Self> {
        if settings.child_cap < 2 {
            return Err(Error::InvalidConfig(format!(
                "child_cap must be >= 2, got {}",
                settings.child_cap
            )));
        }
        Ok(Self {
            settings,
            leaf_scheduler: WaveScheduler::new(settings.leaf_wave)?,
            parent_scheduler: WaveScheduler::new(settings.parent_wave)?,
            progress: None,
            journal: None,
        })
    }

    /// Count planned calls and completed waves.
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.leaf_scheduler = self.leaf_scheduler.with_progress(progress.clone());
        self.parent_scheduler = self.parent_scheduler.with_progress(progress.clone());
        self.progress = Some(progress);
        self
    }

    /// Record each finished round and reuse recorded rounds.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn settings(&self) -> &ReduceSettings {
        &self.settings
    }

    /// Reduce `leaves` to a single summary.
    pub async fn run(
        &self,
        doc_id: &str,
        leaves: &[LeafChunk],
        summarizer: &dyn NodeSummarizer,
    ) -> Result<ReduceOutcome> {
        if leaves.is_empty() {
            return Err(Error::DegenerateInput {
                doc_id: doc_id.to_string(),
            });
        }

        self.check_shape(doc_id).await?;

        tracing::debug!("{}: {} with {} leaves", doc_id, Phase::LeafWave, leaves.len());
        let mut state = self
            .round(0, || async move {
                let requests: Vec<NodeRequest> = leaves
                    .iter()
                    .map(|leaf| NodeRequest {
                        key: NodeKey::leaf(leaf.index),
                        payload: leaf.text.clone(),
                        budget_tokens: self.settings.leaf_budget_tokens,
                    })
                    .collect();
                self.plan_calls(requests.len());
                let current = self
                    .leaf_scheduler
                    .run(requests, |_, request| summarizer.summarize_node(request))
                    .await?;
                Ok(ReduceState { level: 0, current })
            })
            .await?;

        let mut rounds = 0;
        while state.next_phase() == Phase::Grouping {
            let level = state.level + 1;
            let before = state.current.len();
            let requests = form_groups(
                &state.current,
                level,
                self.settings.child_cap,
                self.settings.reduce_budget_tokens,
            );
            tracing::debug!(
                "{}: {} level {} folds {} summaries into {} groups",
                doc_id,
                Phase::Grouping,
                level,
                before,
                requests.len()
            );

            tracing::debug!("{}: {} level {}", doc_id, Phase::ParentWave, level);
            state = self
                .round(level, || async move {
                    self.plan_calls(requests.len());
                    let current = self
                        .parent_scheduler
                        .run(requests, |_, request| summarizer.summarize_node(request))
                        .await?;
                    Ok(ReduceState { level, current })
                })
                .await?;
            rounds += 1;

            if state.current.len() >= before {
                return Err(Error::InvalidConfig(format!(
                    "round {} did not shrink the summary set ({} -> {})",
                    level,
                    before,
                    state.current.len()
                )));
            }
            tracing::info!("{}: level {} reduced to {} summaries", doc_id, level, state.current.len());
        }

        tracing::debug!("{}: {} after {} rounds", doc_id, Phase::Done, rounds);
        let top = state.current.pop().ok_or_else(|| Error::DegenerateInput {
            doc_id: doc_id.to_string(),
        })?;

        Ok(ReduceOutcome {
            top,
            rounds,
            levels: rounds + 1,
        })
    }

    /// Record the tree shape on first use; reject a run whose shape differs
    /// from the recorded one.
    async fn check_shape(&self, doc_id: &str) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let shape = self.settings.shape();
        match journal.load::<TreeShape>(&Step::TreeShape).await? {
            Some(recorded) if recorded != shape => Err(Error::InvalidConfig(format!(
                "{}: journal was recorded with {}, current settings are {}; \
                 rerun with the recorded settings or clear the document's journal",
                doc_id, recorded, shape
            ))),
            Some(_) => Ok(()),
            None => journal.record(&Step::TreeShape, &shape).await,
        }
    }

    async fn round<F, Fut>(&self, level: u32, run: F) -> Result<ReduceState>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ReduceState>>,
    {
        match &self.journal {
            Some(journal) => journal.replay_or_run(&Step::Round(level), run).await,
            None => run().await,
        }
    }

    fn plan_calls(&self, calls: usize) {
        if let Some(progress) = &self.progress {
            progress.add_planned(calls as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ArtifactStore, DocLayout};
    use crate::summarizer::Usage;
    use object_store::memory::InMemory;
    use std::sync::Mutex;

    /// Leaf summaries are `S<index>`; parents wrap their payload in brackets.
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<NodeRequest>>,
        fail_level: Option<u32>,
    }

    impl Recording {
        fn failing_at(level: u32) -> Self {
            Self {
                fail_level: Some(level),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<NodeRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeSummarizer for Recording {
        async fn summarize_node(&self, request: NodeRequest) -> Result<SummaryNode> {
            self.calls.lock().unwrap().push(request.clone());
            if self.fail_level == Some(request.key.level) {
                return Err(Error::fatal("summarize-group", "HTTP 400"));
            }
            let content = match request.key.level {
                0 => format!("S{}", request.payload),
                _ => format!("[{}]", request.payload.replace(GROUP_SEPARATOR, "|")),
            };
            Ok(SummaryNode {
                key: request.key,
                content,
                usage: Usage::new(10, 2),
            })
        }
    }

    fn leaves(n: usize) -> Vec<LeafChunk> {
        (0..n)
            .map(|i| LeafChunk {
                index: i,
                start_page: i,
                end_page: i + 1,
                text: i.to_string(),
                mean_confidence: 1.0,
                overlap_ratio: 0.15,
            })
            .collect()
    }

    fn settings(child_cap: usize) -> ReduceSettings {
        ReduceSettings {
            child_cap,
            ..ReduceSettings::from(&ReduceConfig::default())
        }
    }

    fn expected_rounds(n: usize, cap: usize) -> u32 {
        let mut rounds = 0;
        let mut reach = 1;
        while reach < n {
            reach *= cap;
            rounds += 1;
        }
        rounds
    }

    #[test]
    fn test_level_sizes() {
        assert_eq!(level_sizes(0, 28), Vec::<usize>::new());
        assert_eq!(level_sizes(1, 28), vec![1]);
        assert_eq!(level_sizes(28, 28), vec![28, 1]);
        assert_eq!(level_sizes(100, 28), vec![100, 4, 1]);
        assert_eq!(level_sizes(5, 2), vec![5, 3, 2, 1]);
    }

    #[test]
    fn test_form_groups_keeps_order() {
        let current: Vec<SummaryNode> = (0..5)
            .map(|i| SummaryNode {
                key: NodeKey::leaf(i),
                content: format!("c{}", i),
                usage: Usage::default(),
            })
            .collect();

        let groups = form_groups(&current, 1, 2, 220);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].key, NodeKey::group(1, 0));
        assert_eq!(groups[0].payload, "c0\n\n---\n\nc1");
        assert_eq!(groups[2].payload, "c4");
        assert!(groups.iter().all(|g| g.budget_tokens == 220));
    }

    #[test]
    fn test_child_cap_below_two_rejected() {
        assert!(matches!(ReduceEngine::new(settings(1)), Err(Error::InvalidConfig(_))));
        assert!(matches!(ReduceEngine::new(settings(0)), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_empty_leaves_are_degenerate() {
        let engine = ReduceEngine::new(settings(28)).unwrap();
        let summarizer = Recording::default();

        let err = engine.run("doc", &[], &summarizer).await.unwrap_err();
        assert!(matches!(err, Error::DegenerateInput { ref doc_id } if doc_id == "doc"));
        assert!(summarizer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_leaf_needs_no_round() {
        let engine = ReduceEngine::new(settings(28)).unwrap();
        let summarizer = Recording::default();

        let outcome = engine.run("doc", &leaves(1), &summarizer).await.unwrap();
        assert_eq!(outcome.rounds, 0);
        assert_eq!(outcome.levels, 1);
        assert_eq!(outcome.top.content, "S0");
        assert_eq!(outcome.top.key, NodeKey::leaf(0));
        assert_eq!(summarizer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_full_group_takes_one_round() {
        let engine = ReduceEngine::new(settings(28)).unwrap();
        let summarizer = Recording::default();

        let outcome = engine.run("doc", &leaves(28), &summarizer).await.unwrap();
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.levels, 2);
        assert_eq!(outcome.top.key, NodeKey::group(1, 0));
        assert_eq!(summarizer.calls().len(), 29);
    }

    #[tokio::test]
    async fn test_rounds_are_log_of_leaf_count() {
        for cap in [2, 3, 28] {
            for n in [2, 5, 9, 28, 29, 100] {
                let engine = ReduceEngine::new(settings(cap)).unwrap();
                let summarizer = Recording::default();
                let outcome = engine.run("doc", &leaves(n), &summarizer).await.unwrap();

                assert_eq!(outcome.rounds, expected_rounds(n, cap), "n={} cap={}", n, cap);
                let total_calls: usize = level_sizes(n, cap).iter().sum();
                assert_eq!(summarizer.calls().len(), total_calls);
            }
        }
    }

    #[tokio::test]
    async fn test_order_and_budgets() {
        let engine = ReduceEngine::new(settings(2)).unwrap();
        let summarizer = Recording::default();

        let outcome = engine.run("doc", &leaves(5), &summarizer).await.unwrap();
        assert_eq!(outcome.rounds, 3);
        assert_eq!(outcome.top.content, "[[[S0|S1]|[S2|S3]]|[[S4]]]");

        for call in summarizer.calls() {
            let expected = if call.key.level == 0 { 180 } else { 220 };
            assert_eq!(call.budget_tokens, expected);
        }
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let engine = ReduceEngine::new(settings(2)).unwrap();
        let summarizer = Recording::failing_at(1);

        let err = engine.run("doc", &leaves(4), &summarizer).await.unwrap_err();
        assert!(matches!(err, Error::FatalExternal { .. }));
        assert!(summarizer.calls().iter().all(|c| c.key.level <= 1));
    }

    #[tokio::test]
    async fn test_recorded_rounds_are_replayed() {
        let store = ArtifactStore::new(Arc::new(InMemory::new()));
        let journal = Journal::new(store, DocLayout::new("doc"));

        let first = Recording::default();
        let engine = ReduceEngine::new(settings(3)).unwrap().with_journal(journal.clone());
        let outcome = engine.run("doc", &leaves(10), &first).await.unwrap();
        assert_eq!(first.calls().len(), 10 + 4 + 2 + 1);

        let second = Recording::default();
        let engine = ReduceEngine::new(settings(3)).unwrap().with_journal(journal.clone());
        let replayed = engine.run("doc", &leaves(10), &second).await.unwrap();
        assert!(second.calls().is_empty());
        assert_eq!(replayed, outcome);
    }

    #[tokio::test]
    async fn test_failed_round_is_not_recorded() {
        let store = ArtifactStore::new(Arc::new(InMemory::new()));
        let journal = Journal::new(store, DocLayout::new("doc"));
        let engine = ReduceEngine::new(settings(2)).unwrap().with_journal(journal.clone());

        assert!(engine.run("doc", &leaves(4), &Recording::failing_at(1)).await.is_err());
        assert!(journal.load::<ReduceState>(&Step::Round(0)).await.unwrap().is_some());
        assert!(journal.load::<ReduceState>(&Step::Round(1)).await.unwrap().is_none());

        // Resuming only redoes the failed round onward
        let resumed = Recording::default();
        let outcome = engine.run("doc", &leaves(4), &resumed).await.unwrap();
        assert_eq!(outcome.rounds, 2);
        assert!(resumed.calls().iter().all(|c| c.key.level >= 1));
        assert_eq!(resumed.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_progress_counts_planned_calls() {
        let progress = Progress::new();
        let engine = ReduceEngine::new(settings(2)).unwrap().with_progress(progress.clone());

        engine.run("doc", &leaves(4), &Recording::default()).await.unwrap();
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.calls_planned, 4 + 2 + 1);
        assert_eq!(snapshot.waves_completed, 3);
    }

    #[tokio::test]
    async fn test_changed_tree_shape_is_rejected() {
        let store = ArtifactStore::new(Arc::new(InMemory::new()));
        let journal = Journal::new(store, DocLayout::new("doc"));

        let engine = ReduceEngine::new(settings(3)).unwrap().with_journal(journal.clone());
        engine.run("doc", &leaves(10), &Recording::default()).await.unwrap();
        assert_eq!(
            journal.load::<TreeShape>(&Step::TreeShape).await.unwrap(),
            Some(settings(3).shape())
        );

        let summarizer = Recording::default();
        let engine = ReduceEngine::new(settings(2)).unwrap().with_journal(journal.clone());
        let err = engine.run("doc", &leaves(10), &summarizer).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref msg) if msg.contains("child_cap=3")));
        assert!(summarizer.calls().is_empty());

        // Wave sizes do not change the recorded results
        let summarizer = Recording::default();
        let wider = ReduceSettings {
            leaf_wave: 1,
            parent_wave: 1,
            ..settings(3)
        };
        let engine = ReduceEngine::new(wider).unwrap().with_journal(journal);
        engine.run("doc", &leaves(10), &summarizer).await.unwrap();
        assert!(summarizer.calls().is_empty());
    }
}
