//! Summarization backend.
//!
//! The pipeline only depends on the [`Summarizer`] trait. [`RetryingSummarizer`]
//! adds the retry policy, and [`ChatCompletionsClient`] talks to an
//! OpenAI-compatible chat-completions deployment.

mod chat;
mod retry;

pub use chat::ChatCompletionsClient;
pub use retry::{RetryPolicy, RetryingSummarizer};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token usage reported for one call. Backends may omit any field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens + completion_tokens),
        }
    }

    /// Total tokens, falling back to prompt + completion when not reported.
    pub fn total_or_sum(&self) -> u64 {
        self.total_tokens
            .unwrap_or_else(|| self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0))
    }
}

/// Output of one summarization call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    #[serde(default)]
    pub usage: Usage,
}

/// A text summarization backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a leaf chunk of document text.
    async fn summarize_leaf(&self, text: &str, budget_tokens: u32) -> Result<Completion>;

    /// Merge already-joined child summaries into one parent summary.
    async fn summarize_group(&self, joined_children: &str, budget_tokens: u32) -> Result<Completion>;
}
