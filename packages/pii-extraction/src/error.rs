//! Typed errors for the PII extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

use crate::types::phase::Phase;

/// Errors that can occur while driving an extraction conversation.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The model's reply lacks a structured payload where one is mandatory
    /// (phase token, finding JSON, instruction JSON).
    #[error("protocol violation ({expected}): {reply}")]
    ProtocolViolation { expected: String, reply: String },

    /// JSON decoding failed after every fallback was tried
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// One or more verification requests failed; the round is discarded
    #[error("verification failed for {failed} of {total} findings: {source}")]
    VerificationPartialFailure {
        failed: usize,
        total: usize,
        #[source]
        source: Box<ExtractionError>,
    },

    /// A verdict references a finding id that was never proposed
    #[error("verdict references unknown finding id: {finding_id}")]
    MergeKey { finding_id: String },

    /// A phase exceeded its configured deadline
    #[error("phase {phase} timed out after {seconds}s")]
    PhaseTimeout { phase: Phase, seconds: u64 },

    /// LLM transport unavailable or failed
    #[error("AI service error: {0}")]
    AI(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Persistence backend failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Prompt cache could not be read or written
    #[error("prompt cache error at {path}: {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// PII type missing from the catalog
    #[error("unknown PII type: {0}")]
    UnknownPiiType(String),
}

impl ExtractionError {
    /// Build a protocol violation, keeping a bounded excerpt of the reply.
    pub fn protocol(expected: impl Into<String>, reply: &str) -> Self {
        const MAX_EXCERPT: usize = 500;
        let reply = match reply.char_indices().nth(MAX_EXCERPT) {
            Some((idx, _)) => format!("{}...", &reply[..idx]),
            None => reply.to_string(),
        };
        Self::ProtocolViolation {
            expected: expected.into(),
            reply,
        }
    }

    /// Whether the failure is transient, so rerunning the same unit of work
    /// is expected to help.
    ///
    /// Only transport failures and failed verification rounds qualify.
    /// Protocol violations, merge errors and phase timeouts are fatal for the
    /// conversation. A caller may still rerun the whole document after one of
    /// them, but it has to decide that itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VerificationPartialFailure { .. } | Self::AI(_))
    }
}

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;
