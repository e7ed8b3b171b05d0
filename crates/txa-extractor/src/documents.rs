//! Document content store
//!
//! Two content areas live side by side: the trusted area holds documents of
//! eligible records, the untrusted area holds everything else (and the
//! watermark object). The record's eligibility flag picks the area.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, ExtractResult};
use crate::storage::{Storage, StorageError};

/// Logical content area a document is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentArea {
    /// Primary area for eligible records
    Trusted,
    /// Secondary area
    Untrusted,
}

impl ContentArea {
    pub fn for_eligibility(eligible: bool) -> Self {
        if eligible {
            ContentArea::Trusted
        } else {
            ContentArea::Untrusted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentArea::Trusted => "trusted",
            ContentArea::Untrusted => "untrusted",
        }
    }
}

impl std::fmt::Display for ContentArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only access to document bytes
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch `document_key` from the area selected by `eligible`.
    ///
    /// Fails with [`ExtractError::DocumentNotFound`] when the key does not
    /// resolve in that area, and [`ExtractError::ContentStoreUnavailable`]
    /// for anything else.
    async fn fetch(&self, document_key: &str, eligible: bool) -> ExtractResult<Bytes>;
}

/// S3-backed document store with one bucket per content area
#[derive(Clone)]
pub struct S3DocumentStore {
    trusted: Storage,
    untrusted: Storage,
}

impl S3DocumentStore {
    pub fn new(trusted: Storage, untrusted: Storage) -> Self {
        Self { trusted, untrusted }
    }

    pub fn area(&self, area: ContentArea) -> &Storage {
        match area {
            ContentArea::Trusted => &self.trusted,
            ContentArea::Untrusted => &self.untrusted,
        }
    }
}

#[async_trait]
impl DocumentStore for S3DocumentStore {
    async fn fetch(&self, document_key: &str, eligible: bool) -> ExtractResult<Bytes> {
        let area = ContentArea::for_eligibility(eligible);

        self.area(area)
            .download(document_key)
            .await
            .map_err(|err| match err {
                StorageError::NotFound { key, .. } => ExtractError::DocumentNotFound { area, key },
                StorageError::Unavailable { key, reason, .. } => {
                    ExtractError::ContentStoreUnavailable { key, reason }
                },
            })
    }
}
