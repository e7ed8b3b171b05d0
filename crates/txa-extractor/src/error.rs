//! Extractor error types
//!
//! Every variant is fatal to a run. Nothing here is retried: the job stops,
//! the watermark stays where the last committed chunk left it, and the next
//! run starts again from that point.

use thiserror::Error;
use txa_common::types::Watermark;

use crate::documents::ContentArea;

/// Result type alias for extractor operations
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Metadata source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Document '{key}' not found in {area} content area")]
    DocumentNotFound { area: ContentArea, key: String },

    #[error("Content store unavailable while reading '{key}': {reason}")]
    ContentStoreUnavailable { key: String, reason: String },

    #[error("Publish failed after {published} of {total} messages: {reason}")]
    PublishFailure {
        published: usize,
        total: usize,
        reason: String,
    },

    #[error("Checkpoint read failed: {0}")]
    CheckpointReadFailure(String),

    #[error("Checkpoint write of {watermark} failed: {reason}")]
    CheckpointWriteFailure { watermark: Watermark, reason: String },

    #[error("Watermark would move backwards from {committed} to {proposed}")]
    WatermarkRegression {
        committed: Watermark,
        proposed: Watermark,
    },

    #[error("Run interrupted by shutdown signal")]
    Interrupted,

    #[error("Run lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExtractError {
    /// Stable label for log fields and reports
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::SourceUnavailable(_) => "source_unavailable",
            ExtractError::DocumentNotFound { .. } => "document_not_found",
            ExtractError::ContentStoreUnavailable { .. } => "content_store_unavailable",
            ExtractError::PublishFailure { .. } => "publish_failure",
            ExtractError::CheckpointReadFailure(_) => "checkpoint_read_failure",
            ExtractError::CheckpointWriteFailure { .. } => "checkpoint_write_failure",
            ExtractError::WatermarkRegression { .. } => "watermark_regression",
            ExtractError::Interrupted => "interrupted",
            ExtractError::LockUnavailable(_) => "lock_unavailable",
            ExtractError::Config(_) => "config",
        }
    }

    /// Per-record failures abort the enclosing chunk; everything else is infrastructure.
    pub fn is_record_failure(&self) -> bool {
        matches!(
            self,
            ExtractError::DocumentNotFound { .. } | ExtractError::ContentStoreUnavailable { .. }
        )
    }
}

impl From<sqlx::Error> for ExtractError {
    fn from(err: sqlx::Error) -> Self {
        ExtractError::SourceUnavailable(err.to_string())
    }
}

impl From<txa_common::TxaError> for ExtractError {
    fn from(err: txa_common::TxaError) -> Self {
        ExtractError::SourceUnavailable(err.to_string())
    }
}
