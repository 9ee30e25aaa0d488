//! docsum-reduce CLI
//!
//! Summarize extracted documents through a checkpointed map-reduce.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docsum_reduce::io::parse_s3_uri;
use docsum_reduce::{build_orchestrator, build_runtime, run_document, Config, OrchestrationInput};

/// Environment variable holding the summarization API key.
const API_KEY_VAR: &str = "SUMMARIZER_API_KEY";

#[derive(Parser)]
#[command(name = "docsum-reduce")]
#[command(about = "Hierarchical map-reduce summarization of extracted documents", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct DocumentArgs {
    /// Input path inside the input container, or an s3://bucket/key URI
    input: String,

    /// Document id (defaults to the input file name without extension)
    #[arg(long)]
    doc_id: Option<String>,

    /// Override the input container
    #[arg(long)]
    container: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a document (resumes an interrupted run)
    Run(DocumentArgs),

    /// Extract and chunk a document and show the summary tree without summarizing
    Plan(DocumentArgs),

    /// Recompute the usage rollup of a document
    Rollup {
        /// Document id
        doc_id: String,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_command(cli.config, args),
        Commands::Plan(args) => plan_command(cli.config, args),
        Commands::Rollup { doc_id } => rollup_command(cli.config, doc_id),
        Commands::Validate => validate_command(cli.config),
        Commands::GenerateConfig { output } => generate_config_command(output),
    }
}

fn load_config(config_path: &PathBuf) -> Result<Config> {
    let mut config = Config::from_file(config_path)?;
    if let Ok(key) = std::env::var(API_KEY_VAR) {
        config.summarizer.api_key = Some(key);
    }
    config.validate()?;
    Ok(config)
}

/// Document id derived from an input path: the file name up to its first dot.
fn derive_doc_id(input_path: &str) -> String {
    let name = input_path.rsplit('/').next().unwrap_or(input_path);
    name.split('.').next().unwrap_or_default().to_string()
}

fn orchestration_input(config: &Config, args: DocumentArgs) -> Result<OrchestrationInput> {
    let (container, path) = if args.input.starts_with("s3://") {
        let (bucket, key) = parse_s3_uri(&args.input)?;
        (bucket.to_string(), key.to_string())
    } else {
        let container = args
            .container
            .clone()
            .unwrap_or_else(|| config.storage.input_container.clone());
        (container, args.input.clone())
    };

    Ok(OrchestrationInput {
        doc_id: args.doc_id.unwrap_or_else(|| derive_doc_id(&path)),
        input_path: path,
        input_container: container,
    })
}

fn run_command(config_path: PathBuf, args: DocumentArgs) -> Result<()> {
    let config = load_config(&config_path)?;
    config.validate_backend()?;
    let input = orchestration_input(&config, args)?;

    let runtime = build_runtime(config.runtime.worker_threads)?;
    runtime.block_on(async {
        tokio::select! {
            result = run_document(config, input) => {
                let output = result?;
                println!("Top summary: {}", output.top_summary_path);
                println!(
                    "Pages: {} | Leaves: {} | Levels: {}",
                    output.pages, output.leaves, output.levels
                );
                println!("{}", output.rollup);
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted; recorded steps are kept and a rerun resumes after them");
                anyhow::bail!("interrupted")
            }
        }
    })
}

fn plan_command(config_path: PathBuf, args: DocumentArgs) -> Result<()> {
    let config = load_config(&config_path)?;
    let input = orchestration_input(&config, args)?;

    let runtime = build_runtime(config.runtime.worker_threads)?;
    runtime.block_on(async {
        let orchestrator = build_orchestrator(Arc::new(config), &input.input_container)?;
        let plan = orchestrator.plan(&input).await?;

        println!("\n=== Summary Plan ===");
        println!("{}", plan);
        println!("====================\n");
        Ok(())
    })
}

fn rollup_command(config_path: PathBuf, doc_id: String) -> Result<()> {
    let config = load_config(&config_path)?;
    let input_container = config.storage.input_container.clone();

    let runtime = build_runtime(config.runtime.worker_threads)?;
    runtime.block_on(async {
        let orchestrator = build_orchestrator(Arc::new(config), &input_container)?;
        let rollup = orchestrator.rollup(&doc_id).await?;
        println!("{}", rollup);
        Ok(())
    })
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    if let Err(e) = config.validate_backend() {
        println!("Configuration is valid for planning only: {}", e);
        return Ok(());
    }
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# docsum-reduce configuration

# === STORAGE: Where documents and artifacts live ===
storage:
  # Option 1: containers are directories under a local root
  local_root: "/tmp/docsum"

  # Option 2: containers are S3 buckets (comment out local_root)
  # endpoint_url: "http://localhost:9000"   # MinIO, LocalStack, ...

  # Container holding source documents
  input_container: "incoming"

  # Container receiving pages, chunks, summaries, metrics and the journal
  output_container: "work"

# === CHUNKING: Pages and leaves ===
chunking:
  # Non-whitespace characters per logical page
  page_chars: 1000

  # Overlap between consecutive leaves (clamped to [0.05, 0.5];
  # raised to 0.20 where page confidence is below 0.85)
  leaf_overlap_ratio: 0.15

# === REDUCE: Tree shape and concurrency ===
reduce:
  # Maximum child summaries folded into one parent (>= 2)
  child_cap: 28

  # Concurrent summarization calls per wave
  leaf_wave: 24
  parent_wave: 18

  # Output token budgets
  leaf_budget_tokens: 180
  reduce_budget_tokens: 220

# === SUMMARIZER: Chat-completions backend ===
# The API key is read from the SUMMARIZER_API_KEY environment variable.
summarizer:
  endpoint: "https://example.openai.azure.com"
  deployment: "gpt-4o-mini"
  api_version: "2024-06-01"
  temperature: 0.2
  request_timeout_secs: 120

  # Backoff for rate limits, timeouts and 5xx responses
  retry:
    max_attempts: 6
    base_delay_ms: 500
    max_delay_ms: 8000
    jitter_ratio: 0.2

# === METRICS: Usage rollup and progress ===
metrics:
  # Enables estimated cost columns
  # cost_per_1k_tokens: 0.15

  enable_progress: true
  progress_interval_secs: 10

# === RUNTIME ===
runtime:
  # Tokio worker threads (null = num CPUs)
  # worker_threads: 8
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["docsum-reduce", "run", "reports/q3.jsonl"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input, "reports/q3.jsonl");
                assert!(args.doc_id.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["docsum-reduce", "-c", "other.yaml", "validate"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["docsum-reduce"]).is_err());
    }

    #[test]
    fn test_cli_parse_rollup() {
        let cli = Cli::try_parse_from(["docsum-reduce", "rollup", "q3"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollup { ref doc_id } if doc_id == "q3"));
    }

    #[test]
    fn test_derive_doc_id() {
        assert_eq!(derive_doc_id("reports/q3.jsonl"), "q3");
        assert_eq!(derive_doc_id("scan.v2.pdf"), "scan");
        assert_eq!(derive_doc_id("plain"), "plain");
        assert_eq!(derive_doc_id(".hidden"), "");
    }

    #[test]
    fn test_s3_input_overrides_container() {
        let config = Config::default();
        let args = DocumentArgs {
            input: "s3://docs/in/report.txt".to_string(),
            doc_id: None,
            container: Some("ignored".to_string()),
        };
        let input = orchestration_input(&config, args).unwrap();
        assert_eq!(input.input_container, "docs");
        assert_eq!(input.input_path, "in/report.txt");
        assert_eq!(input.doc_id, "report");
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.validate_backend().is_ok());
        assert_eq!(config.reduce.child_cap, 28);
    }
}
