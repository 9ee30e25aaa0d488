//! Retry with exponential backoff and jitter for summarization calls.

use super::{Completion, Summarizer};
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::pipeline::Progress;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Cap on the pre-jitter delay
    pub max_delay: Duration,
    /// Jitter upper bound as a fraction of the delay
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Pre-jitter delay after the given failed attempt (1-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Add up to `jitter_ratio` of random jitter to a delay.
    fn with_jitter(&self, delay: Duration) -> Duration {
        let max_jitter_ms = (delay.as_millis() as f64 * self.jitter_ratio) as u64;
        if max_jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, call: &str, progress: Option<&Progress>, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        tracing::error!("{} failed after {} attempts: {}", call, attempt, e);
                        return Err(Error::RetriesExhausted {
                            call: call.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.with_jitter(self.backoff_for_attempt(attempt));
                    tracing::warn!(
                        "{} attempt {} failed: {}, retrying in {}ms",
                        call,
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    if let Some(progress) = progress {
                        progress.add_retry();
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Applies a [`RetryPolicy`] to every call of an inner summarizer.
pub struct RetryingSummarizer<S> {
    inner: S,
    policy: RetryPolicy,
    progress: Option<Arc<Progress>>,
}

impl<S: Summarizer> RetryingSummarizer<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            progress: None,
        }
    }

    /// Count retries in the given progress counters.
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[async_trait]
impl<S: Summarizer> Summarizer for RetryingSummarizer<S> {
    async fn summarize_leaf(&self, text: &str, budget_tokens: u32) -> Result<Completion> {
        self.policy
            .run("summarize-leaf", self.progress.as_deref(), || {
                self.inner.summarize_leaf(text, budget_tokens)
            })
            .await
    }

    async fn summarize_group(&self, joined_children: &str, budget_tokens: u32) -> Result<Completion> {
        self.policy
            .run("summarize-group", self.progress.as_deref(), || {
                self.inner.summarize_group(joined_children, budget_tokens)
            })
            .await
    }
}
