//! The summarize activity: one backend call per tree node, memoized.

use crate::error::Result;
use crate::io::{ArtifactStore, DocLayout};
use crate::pipeline::journal::{Journal, Step};
use crate::pipeline::metrics::UsageMetric;
use crate::pipeline::reduce::{NodeRequest, NodeSummarizer};
use crate::pipeline::{Progress, SummaryNode};
use crate::summarizer::Summarizer;
use async_trait::async_trait;
use std::sync::Arc;

/// Summarizes nodes and persists their summary and usage blobs.
///
/// A node whose result is already journaled is returned without calling the
/// backend. Blobs are written before the journal record, so a recorded node
/// always has its summary and usage on disk.
pub struct SummarizeActivity {
    summarizer: Arc<dyn Summarizer>,
    store: ArtifactStore,
    layout: DocLayout,
    journal: Journal,
    progress: Arc<Progress>,
}

impl SummarizeActivity {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        store: ArtifactStore,
        layout: DocLayout,
        progress: Arc<Progress>,
    ) -> Self {
        let journal = Journal::new(store.clone(), layout.clone());
        Self {
            summarizer,
            store,
            layout,
            journal,
            progress,
        }
    }
}

#[async_trait]
impl NodeSummarizer for SummarizeActivity {
    async fn summarize_node(&self, request: NodeRequest) -> Result<SummaryNode> {
        let step = Step::Node(request.key.clone());
        if let Some(node) = self.journal.load::<SummaryNode>(&step).await? {
            tracing::debug!("{}: reusing {}", self.layout.doc_id(), request.key);
            self.progress.add_replayed();
            return Ok(node);
        }

        let completion = if request.key.level == 0 {
            self.summarizer
                .summarize_leaf(&request.payload, request.budget_tokens)
                .await?
        } else {
            self.summarizer
                .summarize_group(&request.payload, request.budget_tokens)
                .await?
        };

        let metric = UsageMetric::new(
            &request.key,
            request.budget_tokens,
            completion.usage,
            request.payload.chars().count(),
        );
        let node = SummaryNode {
            key: request.key,
            content: completion.content,
            usage: completion.usage,
        };

        self.store
            .write_text(&self.layout.summary(&node.key), node.content.as_str())
            .await?;
        self.store
            .write_text(
                &self.layout.usage_metric(&node.key),
                serde_json::to_string_pretty(&metric)?,
            )
            .await?;
        self.journal.record(&step, &node).await?;

        self.progress.add_completed(
            node.usage.prompt_tokens.unwrap_or(0),
            node.usage.completion_tokens.unwrap_or(0),
        );
        tracing::debug!(
            "{}: summarized {} ({} chars -> {} chars)",
            self.layout.doc_id(),
            node.key,
            metric.payload_chars,
            node.content.len()
        );

        Ok(node)
    }
}
