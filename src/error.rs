//! Error taxonomy for the summarization pipeline.

/// The result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while summarizing a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A retryable failure from an external collaborator (rate limit, timeout,
    /// 5xx, connection reset). Only surfaces to callers wrapped in
    /// [`Error::RetriesExhausted`] once the retry budget is spent.
    #[error("transient failure in {call}: {message}")]
    Transient {
        /// The external call that failed.
        call: String,
        /// Description of the failure.
        message: String,
    },

    /// A non-retryable failure from an external collaborator.
    #[error("{call} failed: {message}")]
    FatalExternal {
        /// The external call that failed.
        call: String,
        /// Description of the failure.
        message: String,
    },

    /// A transient failure persisted through every allowed attempt.
    #[error("retries exhausted for {call} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// The external call that failed.
        call: String,
        /// Number of attempts made.
        attempts: u32,
        /// The final error message.
        last_error: String,
    },

    /// The document produced no leaf chunks, so no summary can be defined.
    #[error("document {doc_id} produced no leaf chunks (empty or blank input)")]
    DegenerateInput {
        /// The document identifier.
        doc_id: String,
    },

    /// The caller did not supply a document identifier.
    #[error("document identifier is required")]
    MissingDocId,

    /// A configuration value violates a pipeline precondition.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A recorded journal step could not be decoded.
    #[error("journal step {step} is corrupt: {source}")]
    CorruptStep {
        /// The step key.
        step: String,
        /// The decoding error.
        source: serde_json::Error,
    },

    /// Blob storage failure.
    #[error(transparent)]
    Store(#[from] object_store::Error),

    /// Serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Local I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a transient error for the named call.
    pub fn transient(call: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            call: call.into(),
            message: message.into(),
        }
    }

    /// Build a fatal external error for the named call.
    pub fn fatal(call: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FatalExternal {
            call: call.into(),
            message: message.into(),
        }
    }

    /// Whether a retry of the failed call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
