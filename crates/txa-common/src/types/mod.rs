//! Common types used across TXA

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TxaError};

/// Canonical text form of a watermark (`2023-03-22 11:59:59`).
pub const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header carrying the content-store key the payload was read from.
pub const HEADER_DOCUMENT_KEY: &str = "document_key";

/// Header carrying the record's `observed_at` timestamp.
pub const HEADER_OBSERVED_AT: &str = "observed_at";

/// Highest `observed_at` fully committed so far.
///
/// Stored without a time zone, matching the `timestamp` column of the
/// metadata table. Fractional seconds are preserved in the text form so a
/// persisted watermark never sorts below the record that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(NaiveDateTime);

impl Watermark {
    pub fn new(at: NaiveDateTime) -> Self {
        Self(at)
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl From<NaiveDateTime> for Watermark {
    fn from(at: NaiveDateTime) -> Self {
        Self(at)
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.nanosecond() == 0 {
            write!(f, "{}", self.0.format(WATERMARK_FORMAT))
        } else {
            write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.f"))
        }
    }
}

impl std::str::FromStr for Watermark {
    type Err = TxaError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        const NAIVE_FORMATS: [&str; 3] = [
            WATERMARK_FORMAT,
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S%.f",
        ];

        for format in NAIVE_FORMATS {
            if let Ok(at) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(Self(at));
            }
        }

        DateTime::parse_from_rfc3339(trimmed)
            .map(|at| Self(at.naive_utc()))
            .map_err(|_| TxaError::InvalidTimestamp {
                value: s.to_string(),
            })
    }
}

/// Decoded form of the metadata table's `Y`/`N` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Marked for extraction and publication
    Eligible,
    /// Intentionally skipped
    Ineligible,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

impl std::str::FromStr for Eligibility {
    type Err = TxaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "y" | "yes" | "true" | "1" => Ok(Eligibility::Eligible),
            "n" | "no" | "false" | "0" => Ok(Eligibility::Ineligible),
            _ => Err(TxaError::InvalidEligibility(s.to_string())),
        }
    }
}

/// One row of the metadata table. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: String,
    pub observed_at: Watermark,
    pub eligible: bool,
    pub document_key: String,
}

/// Broker message built from one eligible record and its document bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub key: String,
    pub payload: Bytes,
    pub headers: Vec<(String, String)>,
}

impl OutgoingMessage {
    /// Key the message by record id and tag it with where the payload came from.
    pub fn for_document(record: &MetadataRecord, payload: Bytes) -> Self {
        Self {
            key: record.id.clone(),
            payload,
            headers: vec![
                (HEADER_DOCUMENT_KEY.to_string(), record.document_key.clone()),
                (HEADER_OBSERVED_AT.to_string(), record.observed_at.to_string()),
            ],
        }
    }
}
