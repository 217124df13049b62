//! Error taxonomy shared by the synchronizer, the query engine and the
//! service adapters.
//!
//! Only [`CmdexError::TransientIo`] is retryable. Everything the retry
//! policy gives up on, and everything that can never succeed by trying
//! again, surfaces with a variant the caller can branch on.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CmdexError>;

#[derive(Error, Debug)]
pub enum CmdexError {
    /// Network failure, timeout, rate limit or 5xx from the embedding or
    /// index service.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Dimensionality mismatch, missing collection schema, rejected
    /// request. Aborts a sync run; never retried.
    #[error("permanent configuration error: {0}")]
    PermanentConfig(String),

    /// One unit's embed or upsert failed; recorded in its sync record.
    #[error("unit {unit_id} failed: {message}")]
    PartialItem { unit_id: String, message: String },

    /// The query could not be embedded.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The index could not be searched.
    #[error("index service unavailable: {0}")]
    IndexUnavailable(String),

    #[error("a sync run is already in progress")]
    SyncAlreadyRunning,

    #[error("source store error: {0}")]
    Source(String),

    #[error("sync ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CmdexError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CmdexError::TransientIo(_))
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CmdexError::TransientIo(_) => "transient_io",
            CmdexError::PermanentConfig(_) => "config_error",
            CmdexError::PartialItem { .. } => "item_failed",
            CmdexError::EmbeddingUnavailable(_) => "embedding_unavailable",
            CmdexError::IndexUnavailable(_) => "index_unavailable",
            CmdexError::SyncAlreadyRunning => "sync_already_running",
            CmdexError::Source(_) => "source_error",
            CmdexError::Ledger(_) => "ledger_error",
            CmdexError::Other(_) => "internal",
        }
    }
}

/// Classify a non-success HTTP response from an external service.
/// 429 and 5xx are transient; any other status is a permanent rejection.
pub fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> CmdexError {
    let message = format!("{} returned {}: {}", service, status, body);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CmdexError::TransientIo(message)
    } else {
        CmdexError::PermanentConfig(message)
    }
}

impl From<reqwest::Error> for CmdexError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CmdexError::PermanentConfig(format!("malformed response: {}", err))
        } else {
            CmdexError::TransientIo(err.to_string())
        }
    }
}
