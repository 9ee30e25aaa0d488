//! Chat-completions client for OpenAI-compatible deployments.

use super::{Completion, Summarizer, Usage};
use crate::config::SummarizerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const LEAF_SYSTEM_PROMPT: &str =
    "You are a precise summarizer. Preserve named entities, numbers, and headings if present.";

const GROUP_SYSTEM_PROMPT: &str =
    "You summarize summaries; deduplicate, cluster, surface through-lines. Be concise.";

/// Extra completion tokens granted beyond the requested budget.
const LEAF_TOKEN_HEADROOM: u32 = 40;
const GROUP_TOKEN_HEADROOM: u32 = 60;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl From<ChatUsage> for Usage {
    fn from(u: ChatUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// HTTP client for a chat-completions deployment.
///
/// Performs exactly one request per call; wrap it in a
/// [`RetryingSummarizer`](super::RetryingSummarizer) for backoff.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    temperature: f32,
}

impl ChatCompletionsClient {
    /// Create a client from the summarizer configuration.
    pub fn new(config: &SummarizerConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: completions_url(&config.endpoint, &config.deployment, &config.api_version),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    async fn chat(&self, call: &str, system: &str, user: String, max_tokens: u32) -> Result<Completion> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens,
        };

        let mut builder = self.http.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }

        let response = builder.send().await.map_err(|e| classify_transport(call, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(call, status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::fatal(call, format!("invalid response body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage: parsed.usage.map(Usage::from).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Summarizer for ChatCompletionsClient {
    async fn summarize_leaf(&self, text: &str, budget_tokens: u32) -> Result<Completion> {
        let user = format!(
            "Summarize the following text in <= {} tokens.\n\
             Include 3-6 bullets and one 1-sentence gist.\n\nTEXT:\n{}",
            budget_tokens, text
        );
        self.chat(
            "summarize-leaf",
            LEAF_SYSTEM_PROMPT,
            user,
            budget_tokens + LEAF_TOKEN_HEADROOM,
        )
        .await
    }

    async fn summarize_group(&self, joined_children: &str, budget_tokens: u32) -> Result<Completion> {
        let user = format!(
            "Combine these child summaries into one coherent summary (<= {} tokens).\n\
             - Keep key entities & figures.\n\
             - Add a 'What matters' bullet list (3 bullets).\n\nCHILD SUMMARIES:\n{}",
            budget_tokens, joined_children
        );
        self.chat(
            "summarize-group",
            GROUP_SYSTEM_PROMPT,
            user,
            budget_tokens + GROUP_TOKEN_HEADROOM,
        )
        .await
    }
}

fn completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

/// Map an HTTP status to a transient or fatal error.
fn classify_status(call: &str, status: StatusCode, body: &str) -> Error {
    let message = format!("HTTP {}: {}", status.as_u16(), body.chars().take(500).collect::<String>());
    if is_retryable_status(status) || is_retryable_message(body) {
        Error::transient(call, message)
    } else {
        Error::fatal(call, message)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("temporarily unavailable")
}

/// Map a transport failure (no HTTP status) to a transient or fatal error.
fn classify_transport(call: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::transient(call, e.to_string())
    } else {
        Error::fatal(call, e.to_string())
    }
}
