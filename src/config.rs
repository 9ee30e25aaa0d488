//! Configuration for the summarization pipeline.
//!
//! A [`Config`] is loaded once at process start and passed by reference into
//! every component. Nothing below the CLI reads environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the summarization pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Pagination and leaf construction
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Hierarchical reduction
    #[serde(default)]
    pub reduce: ReduceConfig,

    /// Summarization backend
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Usage metrics and progress reporting
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Runtime tuning
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Blob storage configuration.
///
/// Containers map to subdirectories of `local_root` when it is set, and to S3
/// buckets otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local filesystem root. If set, containers are directories under it.
    #[serde(default)]
    pub local_root: Option<String>,

    /// Container holding source documents
    #[serde(default = "default_input_container")]
    pub input_container: String,

    /// Container receiving every pipeline artifact
    #[serde(default = "default_output_container")]
    pub output_container: String,

    /// Custom S3 endpoint (MinIO, LocalStack, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_root: None,
            input_container: default_input_container(),
            output_container: default_output_container(),
            endpoint_url: None,
        }
    }
}

impl StorageConfig {
    /// Check if containers live on the local filesystem.
    pub fn is_local(&self) -> bool {
        self.local_root.is_some()
    }
}

/// Pagination and leaf construction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Non-whitespace characters per logical page
    #[serde(default = "default_page_chars")]
    pub page_chars: usize,

    /// Base overlap ratio between consecutive leaves (clamped to [0.05, 0.5])
    #[serde(default = "default_leaf_overlap_ratio")]
    pub leaf_overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            page_chars: default_page_chars(),
            leaf_overlap_ratio: default_leaf_overlap_ratio(),
        }
    }
}

/// Hierarchical reduction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceConfig {
    /// Maximum children folded into one parent summary
    #[serde(default = "default_child_cap")]
    pub child_cap: usize,

    /// Concurrent leaf summarization calls per wave
    #[serde(default = "default_leaf_wave")]
    pub leaf_wave: usize,

    /// Concurrent parent summarization calls per wave
    #[serde(default = "default_parent_wave")]
    pub parent_wave: usize,

    /// Output token budget for leaf summaries
    #[serde(default = "default_leaf_budget_tokens")]
    pub leaf_budget_tokens: u32,

    /// Output token budget for parent summaries
    #[serde(default = "default_reduce_budget_tokens")]
    pub reduce_budget_tokens: u32,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            child_cap: default_child_cap(),
            leaf_wave: default_leaf_wave(),
            parent_wave: default_parent_wave(),
            leaf_budget_tokens: default_leaf_budget_tokens(),
            reduce_budget_tokens: default_reduce_budget_tokens(),
        }
    }
}

/// Summarization backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Base URL of the chat-completions service
    #[serde(default)]
    pub endpoint: String,

    /// Model deployment name
    #[serde(default)]
    pub deployment: String,

    /// API version query parameter
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// API key. Usually injected from `SUMMARIZER_API_KEY` by the CLI.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retry configuration for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: String::new(),
            api_version: default_api_version(),
            api_key: None,
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds (doubles each retry)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of random jitter added to each delay, as a fraction of it
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// Usage metrics and progress reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Cost per 1000 tokens used for estimated cost columns
    #[serde(default)]
    pub cost_per_1k_tokens: Option<f64>,

    /// Log progress periodically while waves run
    #[serde(default = "default_true")]
    pub enable_progress: bool,

    /// Progress reporting interval in seconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cost_per_1k_tokens: None,
            enable_progress: true,
            progress_interval_secs: default_progress_interval(),
        }
    }
}

impl MetricsConfig {
    /// The configured cost rate, if it is positive.
    pub fn cost_rate(&self) -> Option<f64> {
        self.cost_per_1k_tokens.filter(|rate| *rate > 0.0)
    }
}

/// Runtime tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.input_container.is_empty() || self.storage.output_container.is_empty() {
            anyhow::bail!("Input and output containers must be named");
        }
        if self.chunking.page_chars == 0 {
            anyhow::bail!("page_chars must be > 0");
        }
        if !(0.0..=1.0).contains(&self.chunking.leaf_overlap_ratio) {
            anyhow::bail!("leaf_overlap_ratio must be within [0, 1]");
        }
        if self.reduce.child_cap < 2 {
            anyhow::bail!("child_cap must be >= 2 for the reduction to terminate");
        }
        if self.reduce.leaf_wave == 0 || self.reduce.parent_wave == 0 {
            anyhow::bail!("Wave widths must be > 0");
        }
        if self.reduce.leaf_budget_tokens == 0 || self.reduce.reduce_budget_tokens == 0 {
            anyhow::bail!("Token budgets must be > 0");
        }
        if self.summarizer.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be >= 1");
        }
        if self.summarizer.retry.max_delay_ms < self.summarizer.retry.base_delay_ms {
            anyhow::bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.summarizer.retry.jitter_ratio) {
            anyhow::bail!("retry.jitter_ratio must be within [0, 1]");
        }
        if let Some(rate) = self.metrics.cost_per_1k_tokens {
            if rate < 0.0 {
                anyhow::bail!("cost_per_1k_tokens must not be negative");
            }
        }
        Ok(())
    }

    /// Validate the parts needed to talk to the summarization backend.
    pub fn validate_backend(&self) -> anyhow::Result<()> {
        if self.summarizer.endpoint.is_empty() {
            anyhow::bail!("summarizer.endpoint is required");
        }
        if self.summarizer.deployment.is_empty() {
            anyhow::bail!("summarizer.deployment is required");
        }
        Ok(())
    }

    /// Request timeout for the summarization backend.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.summarizer.request_timeout_secs)
    }
}

// Default value functions for serde
fn default_input_container() -> String { "incoming".to_string() }
fn default_output_container() -> String { "work".to_string() }
fn default_page_chars() -> usize { 1000 }
fn default_leaf_overlap_ratio() -> f64 { 0.15 }
fn default_child_cap() -> usize { 28 }
fn default_leaf_wave() -> usize { 24 }
fn default_parent_wave() -> usize { 18 }
fn default_leaf_budget_tokens() -> u32 { 180 }
fn default_reduce_budget_tokens() -> u32 { 220 }
fn default_api_version() -> String { "2024-06-01".to_string() }
fn default_temperature() -> f32 { 0.2 }
fn default_request_timeout_secs() -> u64 { 120 }
fn default_max_attempts() -> u32 { 6 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 8000 }
fn default_jitter_ratio() -> f64 { 0.2 }
fn default_true() -> bool { true }
fn default_progress_interval() -> u64 { 10 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunking.page_chars, 1000);
        assert_eq!(config.chunking.leaf_overlap_ratio, 0.15);
        assert_eq!(config.reduce.child_cap, 28);
        assert_eq!(config.reduce.leaf_wave, 24);
        assert_eq!(config.reduce.parent_wave, 18);
        assert_eq!(config.reduce.leaf_budget_tokens, 180);
        assert_eq!(config.reduce.reduce_budget_tokens, 220);
        assert_eq!(config.summarizer.retry.max_attempts, 6);
        assert_eq!(config.summarizer.retry.base_delay_ms, 500);
        assert_eq!(config.summarizer.retry.max_delay_ms, 8000);
        assert!(config.metrics.cost_per_1k_tokens.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = Config::from_yaml(
            r#"
storage:
  local_root: /tmp/docsum
reduce:
  child_cap: 4
metrics:
  cost_per_1k_tokens: 0.5
"#,
        )
        .unwrap();

        assert!(config.storage.is_local());
        assert_eq!(config.storage.output_container, "work");
        assert_eq!(config.reduce.child_cap, 4);
        assert_eq!(config.reduce.parent_wave, 18);
        assert_eq!(config.metrics.cost_rate(), Some(0.5));
    }

    #[test]
    fn test_json_config() {
        let config = Config::from_json(r#"{"chunking": {"page_chars": 50}}"#).unwrap();
        assert_eq!(config.chunking.page_chars, 50);
        assert_eq!(config.chunking.leaf_overlap_ratio, 0.15);
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"reduce": {"leaf_wave": 3}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.reduce.leaf_wave, 3);
    }

    #[test]
    fn test_validation_rejects_child_cap_below_two() {
        let mut config = Config::default();
        config.reduce.child_cap = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_waves() {
        let mut config = Config::default();
        config.reduce.parent_wave = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cost_rate_is_absent() {
        let mut config = Config::default();
        config.metrics.cost_per_1k_tokens = Some(0.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.metrics.cost_rate(), None);
    }

    #[test]
    fn test_backend_validation() {
        let mut config = Config::default();
        assert!(config.validate_backend().is_err());
        config.summarizer.endpoint = "https://example.openai.azure.com".to_string();
        config.summarizer.deployment = "gpt-4o-mini".to_string();
        assert!(config.validate_backend().is_ok());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = Config::default();
        config.summarizer.api_key = Some("secret".to_string());
        let yaml = config.to_yaml().unwrap();
        assert!(!yaml.contains("secret"));
    }
}
