//! End-to-end summarization of one document.
//!
//! Steps: extract, paginate, choose the leaf size, build leaves, reduce, save
//! the top summary, roll up usage. Each step goes through the document's
//! [`Journal`], so rerunning an interrupted document resumes after the last
//! recorded step and never re-summarizes a recorded node.

use crate::chunking::{
    build_leaves, choose_pages_per_leaf, non_blank_count, paginate, parse_confidence_map, parse_rows,
    ConfidenceMap, LeafChunk, Pagination,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{DocumentRef, Extraction, Extractor};
use crate::io::{ArtifactStore, DocLayout};
use crate::pipeline::activity::SummarizeActivity;
use crate::pipeline::journal::{Journal, Step};
use crate::pipeline::metrics::{Rollup, RollupReport};
use crate::pipeline::reduce::{level_sizes, ReduceEngine, ReduceOutcome, ReduceSettings};
use crate::pipeline::{Progress, ProgressReporter};
use crate::summarizer::Summarizer;
use chrono::{SecondsFormat, Utc};
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Input of a document run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationInput {
    pub doc_id: String,
    pub input_path: String,
    pub input_container: String,
}

impl OrchestrationInput {
    /// The document to extract. Fails when no document id was supplied.
    pub fn document(&self) -> Result<DocumentRef> {
        if self.doc_id.trim().is_empty() {
            return Err(Error::MissingDocId);
        }
        Ok(DocumentRef {
            doc_id: self.doc_id.clone(),
            input_container: self.input_container.clone(),
            input_path: self.input_path.clone(),
        })
    }
}

/// Result of a document run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationOutput {
    pub doc_id: String,
    pub pages: usize,
    pub leaf_size: usize,
    pub leaves: usize,
    pub rounds: u32,
    pub levels: u32,
    pub top_summary_path: String,
    pub rollup: Rollup,
}

/// Shape of the summary tree a run would build, without summarizing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPlan {
    pub doc_id: String,
    pub pages: usize,
    pub leaf_size: usize,
    /// Node count per level, leaves first
    pub level_sizes: Vec<usize>,
    pub planned_calls: usize,
}

impl fmt::Display for DocumentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Document:      {}", self.doc_id)?;
        writeln!(f, "Pages:         {}", self.pages)?;
        writeln!(f, "Pages/leaf:    {}", self.leaf_size)?;
        for (level, size) in self.level_sizes.iter().enumerate() {
            writeln!(f, "Level {:<7} {} summaries", format!("{}:", level), size)?;
        }
        write!(f, "Planned calls: {}", self.planned_calls)
    }
}

/// Runs documents through the pipeline against one output container.
pub struct Orchestrator {
    config: Arc<Config>,
    work: ArtifactStore,
    extractor: Arc<dyn Extractor>,
    summarizer: Arc<dyn Summarizer>,
    progress: Arc<Progress>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        work: ArtifactStore,
        extractor: Arc<dyn Extractor>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            config,
            work,
            extractor,
            summarizer,
            progress: Progress::new(),
        }
    }

    /// Share progress counters with other components (e.g. the retry layer).
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Summarize one document.
    pub async fn run(&self, input: &OrchestrationInput) -> Result<OrchestrationOutput> {
        let document = input.document()?;

        let reporter = if self.config.metrics.enable_progress {
            let (tx, rx) = mpsc::channel(1);
            let reporter = ProgressReporter::new(self.progress.clone(), self.config.metrics.progress_interval_secs);
            Some((tx, tokio::spawn(reporter.run(rx))))
        } else {
            None
        };

        let result = self.run_document(&document).await;

        if let Some((tx, handle)) = reporter {
            let _ = tx.send(()).await;
            let _ = handle.await;
        }

        match &result {
            Ok(output) => tracing::info!(
                "{}: done ({} pages, {} leaves, {} levels)",
                output.doc_id,
                output.pages,
                output.leaves,
                output.levels
            ),
            Err(e) => tracing::error!("{}: failed: {}", document.doc_id, e),
        }
        result
    }

    /// Extract and chunk a document, then report the tree a run would build.
    ///
    /// Extraction and chunking are recorded as usual, so a later run reuses
    /// them. No summarization call is made.
    pub async fn plan(&self, input: &OrchestrationInput) -> Result<DocumentPlan> {
        let document = input.document()?;
        let layout = DocLayout::new(document.doc_id.as_str());
        let journal = Journal::new(self.work.clone(), layout.clone());

        let (pagination, leaf_size, leaves) = self.prepare(&document, &layout, &journal).await?;
        let sizes = level_sizes(leaves.len(), self.config.reduce.child_cap);

        Ok(DocumentPlan {
            doc_id: document.doc_id,
            pages: pagination.len(),
            leaf_size,
            planned_calls: sizes.iter().sum(),
            level_sizes: sizes,
        })
    }

    /// Recompute the usage rollup of a document from its usage records.
    pub async fn rollup(&self, doc_id: &str) -> Result<Rollup> {
        if doc_id.trim().is_empty() {
            return Err(Error::MissingDocId);
        }
        self.write_rollup(&DocLayout::new(doc_id)).await
    }

    async fn run_document(&self, document: &DocumentRef) -> Result<OrchestrationOutput> {
        let doc_id = document.doc_id.as_str();
        let layout = DocLayout::new(doc_id);
        let journal = Journal::new(self.work.clone(), layout.clone());

        let (pagination, leaf_size, leaves) = self.prepare(document, &layout, &journal).await?;

        let activity = SummarizeActivity::new(
            self.summarizer.clone(),
            self.work.clone(),
            layout.clone(),
            self.progress.clone(),
        );
        let engine = ReduceEngine::new(ReduceSettings::from(&self.config.reduce))?
            .with_progress(self.progress.clone())
            .with_journal(journal.clone());
        let outcome = engine.run(doc_id, &leaves, &activity).await?;

        let top_summary_path: String = journal
            .replay_or_run(&Step::TopSummary, || self.save_top_summary(&layout, &outcome))
            .await?;

        let rollup: Rollup = journal
            .replay_or_run(&Step::Rollup, || self.write_rollup(&layout))
            .await?;

        Ok(OrchestrationOutput {
            doc_id: doc_id.to_string(),
            pages: pagination.len(),
            leaf_size,
            leaves: leaves.len(),
            rounds: outcome.rounds,
            levels: outcome.levels,
            top_summary_path,
            rollup,
        })
    }

    async fn prepare(
        &self,
        document: &DocumentRef,
        layout: &DocLayout,
        journal: &Journal,
    ) -> Result<(Pagination, usize, Vec<LeafChunk>)> {
        let extraction: Extraction = journal
            .replay_or_run(&Step::Extract, || self.extractor.extract(document))
            .await?;

        let pagination: Pagination = journal
            .replay_or_run(&Step::Paginate, || self.paginate(layout, &extraction))
            .await?;

        // Pages holding nothing but whitespace have nothing to summarize
        if pagination.pages.iter().all(|page| non_blank_count(&page.text) == 0) {
            return Err(Error::DegenerateInput {
                doc_id: layout.doc_id().to_string(),
            });
        }

        let leaf_size: usize = journal
            .replay_or_run(&Step::LeafSize, || async {
                Ok(choose_pages_per_leaf(pagination.len()))
            })
            .await?;

        let leaves: Vec<LeafChunk> = journal
            .replay_or_run(&Step::Leaves, || self.make_leaves(layout, &pagination, leaf_size))
            .await?;

        tracing::info!(
            "{}: {} pages, {} pages/leaf, {} leaves",
            layout.doc_id(),
            pagination.len(),
            leaf_size,
            leaves.len()
        );
        Ok((pagination, leaf_size, leaves))
    }

    async fn paginate(&self, layout: &DocLayout, extraction: &Extraction) -> Result<Pagination> {
        let jsonl = self
            .work
            .read_text(&Path::from(extraction.jsonl_path.as_str()))
            .await?;
        let rows = parse_rows(&jsonl);
        let confidences = self.load_confidences(layout, extraction).await;

        let pagination = paginate(&rows, self.config.chunking.page_chars, &confidences);
        for page in &pagination.pages {
            self.work
                .write_text(&layout.page(page.index), page.text.as_str())
                .await?;
        }
        Ok(pagination)
    }

    /// The confidence map is optional: a missing or unreadable file means
    /// every page is fully confident.
    async fn load_confidences(&self, layout: &DocLayout, extraction: &Extraction) -> ConfidenceMap {
        let path = Path::from(extraction.confidence_path.as_str());
        match self.work.try_read_text(&path).await {
            Ok(Some(raw)) => parse_confidence_map(&raw).unwrap_or_else(|e| {
                tracing::warn!("{}: ignoring unreadable confidence map: {}", layout.doc_id(), e);
                ConfidenceMap::new()
            }),
            Ok(None) => ConfidenceMap::new(),
            Err(e) => {
                tracing::warn!("{}: confidence map unavailable: {}", layout.doc_id(), e);
                ConfidenceMap::new()
            }
        }
    }

    async fn make_leaves(
        &self,
        layout: &DocLayout,
        pagination: &Pagination,
        leaf_size: usize,
    ) -> Result<Vec<LeafChunk>> {
        let leaves = build_leaves(
            &pagination.texts(),
            leaf_size,
            self.config.chunking.leaf_overlap_ratio,
            &pagination.confidences(),
        );
        for leaf in &leaves {
            self.work
                .write_text(&layout.leaf_chunk(leaf.index), leaf.text.as_str())
                .await?;
        }
        Ok(leaves)
    }

    async fn save_top_summary(&self, layout: &DocLayout, outcome: &ReduceOutcome) -> Result<String> {
        let path = layout.top_summary();
        let body = format!(
            "# Top Summary\n\n- Levels: {}\n- Generated: {}\n\n---\n\n{}\n",
            outcome.levels,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            outcome.top.content
        );
        self.work.write_text(&path, body).await?;
        Ok(path.to_string())
    }

    async fn write_rollup(&self, layout: &DocLayout) -> Result<Rollup> {
        let rollup = Rollup::load(&self.work, layout, self.config.metrics.cost_rate()).await?;
        let generated = Utc::now();

        let report = RollupReport {
            generated,
            rollup,
        };
        self.work
            .write_text(&layout.rollup_json(), serde_json::to_string_pretty(&report)?)
            .await?;
        self.work
            .write_text(&layout.rollup_markdown(), report.rollup.to_markdown(generated))
            .await?;

        tracing::info!(
            "{}: {} summaries, {} tokens",
            layout.doc_id(),
            report.rollup.overall.summaries,
            report.rollup.overall.total_tokens
        );
        Ok(report.rollup)
    }
}
