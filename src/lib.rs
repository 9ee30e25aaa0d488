//! Document summarization by checkpointed hierarchical map-reduce.
//!
//! Extracted document text is cut into logical pages and overlapping leaf
//! chunks, the leaves are summarized in bounded-concurrency waves, and the
//! summaries are folded level by level until a single top summary remains.
//! Every step is journaled in the output container, so an interrupted run
//! resumes where it stopped.
//!
//! # Architecture
//!
//! - **Chunking**: pagination by non-blank character budget and
//!   confidence-adaptive leaf windows
//! - **Pipeline**: wave scheduler, reduction engine, journal, usage rollup
//! - **Summarizer**: backend trait, retry with backoff, HTTP chat client
//! - **Extract / I/O**: extraction collaborator and object_store access
//!
//! # Usage
//!
//! ```no_run
//! use docsum_reduce::{run_document, Config, OrchestrationInput};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let input = OrchestrationInput {
//!         doc_id: "report".to_string(),
//!         input_path: "report.jsonl".to_string(),
//!         input_container: config.storage.input_container.clone(),
//!     };
//!     let output = run_document(config, input).await?;
//!     println!("{}", output.rollup);
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod error;
pub mod extract;
pub mod io;
pub mod pipeline;
pub mod summarizer;

pub use config::Config;
pub use error::{Error, Result};
pub use extract::{DocumentRef, Extraction, Extractor, StoreExtractor};
pub use pipeline::{OrchestrationInput, OrchestrationOutput, Orchestrator, Progress};
pub use summarizer::{ChatCompletionsClient, RetryPolicy, RetryingSummarizer, Summarizer};

use io::ArtifactStore;
use std::sync::Arc;

/// Wire the production collaborators for documents read from `input_container`.
pub fn build_orchestrator(config: Arc<Config>, input_container: &str) -> anyhow::Result<Orchestrator> {
    let input = ArtifactStore::new(io::create_container_store(&config.storage, input_container)?);
    let work = ArtifactStore::new(io::create_container_store(
        &config.storage,
        &config.storage.output_container,
    )?);

    let progress = Progress::new();
    let client = ChatCompletionsClient::new(&config.summarizer, config.request_timeout())?;
    let summarizer = RetryingSummarizer::new(client, RetryPolicy::from_config(&config.summarizer.retry))
        .with_progress(progress.clone());
    let extractor = StoreExtractor::new(input, input_container, work.clone());

    Ok(Orchestrator::new(config, work, Arc::new(extractor), Arc::new(summarizer)).with_progress(progress))
}

/// Summarize one document with the given configuration.
pub async fn run_document(config: Config, input: OrchestrationInput) -> anyhow::Result<OrchestrationOutput> {
    config.validate()?;
    config.validate_backend()?;

    tracing::info!("Summarizing {} from {}/{}", input.doc_id, input.input_container, input.input_path);
    let orchestrator = build_orchestrator(Arc::new(config), &input.input_container)?;
    Ok(orchestrator.run(&input).await?)
}

/// Build a Tokio runtime with the given worker count.
pub fn build_runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
