//! Record processor: one metadata record in, at most one message out

use std::sync::Arc;

use tracing::{debug, warn};
use txa_common::types::{MetadataRecord, OutgoingMessage};

use crate::documents::DocumentStore;
use crate::error::ExtractResult;

/// Outcome of processing a record that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Eligible record, document fetched
    Publish(OutgoingMessage),
    /// Ineligible record; nothing fetched, nothing produced
    Skip,
}

pub struct RecordProcessor {
    documents: Arc<dyn DocumentStore>,
}

impl RecordProcessor {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Turn `record` into a message.
    ///
    /// Ineligible records are skipped without touching the content store.
    /// Any content-store error is returned unchanged; the caller aborts the chunk.
    pub async fn process(&self, record: &MetadataRecord) -> ExtractResult<Processed> {
        if !record.eligible {
            debug!(id = %record.id, "Skipping ineligible record");
            return Ok(Processed::Skip);
        }

        match self.documents.fetch(&record.document_key, record.eligible).await {
            Ok(payload) => {
                debug!(
                    id = %record.id,
                    key = %record.document_key,
                    bytes = payload.len(),
                    "Fetched document"
                );
                Ok(Processed::Publish(OutgoingMessage::for_document(record, payload)))
            },
            Err(err) => {
                warn!(
                    id = %record.id,
                    key = %record.document_key,
                    kind = err.kind(),
                    error = %err,
                    "Record failed"
                );
                Err(err)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::documents::ContentArea;
    use crate::error::ExtractError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        fetched: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl DocumentStore for RecordingStore {
        async fn fetch(&self, document_key: &str, eligible: bool) -> ExtractResult<Bytes> {
            self.fetched
                .lock()
                .unwrap()
                .push((document_key.to_string(), eligible));

            if document_key.starts_with("NONEXISTENT") {
                return Err(ExtractError::DocumentNotFound {
                    area: ContentArea::for_eligibility(eligible),
                    key: document_key.to_string(),
                });
            }
            Ok(Bytes::from(format!("content of {document_key}")))
        }
    }

    fn record(id: &str, eligible: bool, key: &str) -> MetadataRecord {
        MetadataRecord {
            id: id.to_string(),
            observed_at: "2023-03-22 12:00:00".parse().unwrap(),
            eligible,
            document_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_eligible_record_becomes_message() {
        let store = Arc::new(RecordingStore::default());
        let processor = RecordProcessor::new(store.clone());

        let outcome = processor
            .process(&record("a1", true, "decs-file1.pdf"))
            .await
            .unwrap();

        let Processed::Publish(message) = outcome else {
            panic!("expected a message, got {outcome:?}");
        };
        assert_eq!(message.key, "a1");
        assert_eq!(message.payload.as_ref(), b"content of decs-file1.pdf");
        assert_eq!(
            *store.fetched.lock().unwrap(),
            vec![("decs-file1.pdf".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_ineligible_record_never_fetches() {
        let store = Arc::new(RecordingStore::default());
        let processor = RecordProcessor::new(store.clone());

        let outcome = processor
            .process(&record("d4", false, "decs-file4.pdf"))
            .await
            .unwrap();

        assert_eq!(outcome, Processed::Skip);
        assert!(store.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_document_error_passes_through() {
        let processor = RecordProcessor::new(Arc::new(RecordingStore::default()));

        let err = processor
            .process(&record("b2", true, "NONEXISTENT-FILE.pdf"))
            .await
            .unwrap_err();

        match err {
            ExtractError::DocumentNotFound { area, key } => {
                assert_eq!(area, ContentArea::Trusted);
                assert_eq!(key, "NONEXISTENT-FILE.pdf");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
