//! Error types shared across the TXA crates

use thiserror::Error;

/// Result type alias for value parsing in TXA
pub type Result<T> = std::result::Result<T, TxaError>;

/// Errors raised while decoding values read from external stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxaError {
    #[error("Invalid timestamp '{value}': expected 'YYYY-MM-DD HH:MM:SS'")]
    InvalidTimestamp { value: String },

    #[error("Invalid eligibility flag '{0}': expected Y or N")]
    InvalidEligibility(String),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
}
