//! Extract-fetch-publish orchestrator
//!
//! Drives the job as an explicit state machine:
//!
//! ```text
//! Reading -> Processing -> Committing -> Reading ...
//!    |            |             |
//!    v            v             v
//!   Done        Failed        Failed
//! ```
//!
//! Cancellation seen while reading ends the job as `Stopped`; seen while a
//! chunk is being processed it fails the job with `Interrupted`.
//!
//! A chunk is the unit of atomicity. Either every eligible record in it is
//! published and its maximum `observed_at` becomes the watermark, or nothing
//! from it reaches the broker and the watermark does not move. The first
//! failing record ends the job; records after it are not looked at.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use txa_common::types::{MetadataRecord, Watermark};

use crate::checkpoint::CheckpointStore;
use crate::documents::DocumentStore;
use crate::error::{ExtractError, ExtractResult};
use crate::metadata::MetadataSource;
use crate::processor::{Processed, RecordProcessor};
use crate::publisher::Publisher;
use crate::sink::ChunkWriter;

/// Terminal job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
    /// Shutdown requested between chunks
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Stopped => "STOPPED",
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub status: JobStatus,
    /// Watermark read at job start; `None` if it could not be read
    pub watermark_start: Option<Watermark>,
    /// Last committed watermark when the job ended
    pub watermark_end: Option<Watermark>,
    pub chunks_committed: usize,
    pub records_read: usize,
    pub records_skipped: usize,
    pub messages_published: usize,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

impl JobReport {
    pub fn exit_code(&self) -> &'static str {
        self.status.as_str()
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    fn fail(&mut self, err: &ExtractError) {
        self.status = JobStatus::Failed;
        self.error_kind = Some(err.kind());
        self.error = Some(err.to_string());
    }
}

/// Bounded, ordered batch of records committed as one unit
#[derive(Debug, Clone)]
pub struct Chunk {
    pub number: usize,
    pub records: Vec<MetadataRecord>,
}

impl Chunk {
    /// Highest `observed_at` in the chunk; records are non-empty and ascending
    pub fn max_observed_at(&self) -> Option<Watermark> {
        self.records.iter().map(|record| record.observed_at).max()
    }
}

/// Orchestrator states
#[derive(Debug)]
enum PipelineState {
    Reading,
    Processing(Chunk),
    Committing(Chunk),
    Failed(ExtractError),
    Done,
    Stopped,
}

/// What to do with a page returned by the metadata source
#[derive(Debug, PartialEq, Eq)]
enum Sealed {
    Exhausted,
    Ready(Vec<MetadataRecord>),
    /// Every record up to the lookahead shares one timestamp; read again with a larger limit
    Widen,
}

/// Cut a page of up to `limit + 1` records into a chunk that never ends
/// inside a run of equal timestamps.
///
/// The row past `limit` is lookahead only. When it ties with the last kept
/// record, committing that timestamp would strand the rest of the run below
/// the watermark, so the run is left for the next chunk.
fn seal_page(mut page: Vec<MetadataRecord>, limit: usize) -> Sealed {
    if page.is_empty() {
        return Sealed::Exhausted;
    }

    if page.len() <= limit {
        return Sealed::Ready(page);
    }

    let lookahead = page[limit].observed_at;
    page.truncate(limit);
    let boundary = page[limit - 1].observed_at;

    if lookahead > boundary {
        return Sealed::Ready(page);
    }

    if page[0].observed_at == boundary {
        return Sealed::Widen;
    }

    page.retain(|record| record.observed_at < boundary);
    Sealed::Ready(page)
}

/// Reject pages that break the source contract: strictly after the
/// watermark, ascending.
fn check_page(page: &[MetadataRecord], after: Watermark) -> ExtractResult<()> {
    if let Some(stale) = page.iter().find(|record| record.observed_at <= after) {
        return Err(ExtractError::SourceUnavailable(format!(
            "record {} at {} is not after watermark {}",
            stale.id, stale.observed_at, after
        )));
    }

    if let Some(pair) = page.windows(2).find(|pair| pair[1].observed_at < pair[0].observed_at) {
        return Err(ExtractError::SourceUnavailable(format!(
            "records {} and {} are out of order",
            pair[0].id, pair[1].id
        )));
    }

    Ok(())
}

pub struct Pipeline {
    source: Arc<dyn MetadataSource>,
    processor: RecordProcessor,
    publisher: Arc<dyn Publisher>,
    checkpoints: Arc<dyn CheckpointStore>,
    chunk_size: usize,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        documents: Arc<dyn DocumentStore>,
        publisher: Arc<dyn Publisher>,
        checkpoints: Arc<dyn CheckpointStore>,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            processor: RecordProcessor::new(documents),
            publisher,
            checkpoints,
            chunk_size: chunk_size.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the job when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the job to a terminal state.
    ///
    /// The chunk writer's finalizer runs on every exit path before this returns.
    pub async fn run(self) -> JobReport {
        let mut report = JobReport {
            status: JobStatus::Completed,
            watermark_start: None,
            watermark_end: None,
            chunks_committed: 0,
            records_read: 0,
            records_skipped: 0,
            messages_published: 0,
            error_kind: None,
            error: None,
        };

        let start = match self.checkpoints.read().await {
            Ok(watermark) => watermark,
            Err(err) => {
                error!(kind = err.kind(), error = %err, "Could not read watermark");
                report.fail(&err);
                return report;
            },
        };

        info!(watermark = %start, chunk_size = self.chunk_size, "Extraction job started");
        report.watermark_start = Some(start);

        let mut writer = ChunkWriter::new(self.publisher.clone(), self.checkpoints.clone(), start);
        let mut state = PipelineState::Reading;
        let mut chunk_number = 0;

        loop {
            state = match state {
                PipelineState::Reading => {
                    if self.cancel.is_cancelled() {
                        PipelineState::Stopped
                    } else {
                        match self.read_chunk(writer.committed()).await {
                            Ok(Some(records)) => {
                                chunk_number += 1;
                                report.records_read += records.len();
                                PipelineState::Processing(Chunk {
                                    number: chunk_number,
                                    records,
                                })
                            },
                            Ok(None) => PipelineState::Done,
                            Err(ExtractError::Interrupted) => PipelineState::Stopped,
                            Err(err) => PipelineState::Failed(err),
                        }
                    }
                },
                PipelineState::Processing(chunk) => {
                    let span = info_span!("chunk", number = chunk.number, records = chunk.records.len());
                    match self
                        .process_chunk(&chunk, &mut writer)
                        .instrument(span)
                        .await
                    {
                        Ok(skipped) => {
                            report.records_skipped += skipped;
                            PipelineState::Committing(chunk)
                        },
                        Err(err) => {
                            if err.is_record_failure() {
                                warn!(number = chunk.number, "Record could not be processed, discarding chunk");
                            }
                            writer.abort_chunk();
                            PipelineState::Failed(err)
                        },
                    }
                },
                PipelineState::Committing(chunk) => match chunk.max_observed_at() {
                    Some(max) => {
                        let span = info_span!("commit", number = chunk.number, watermark = %max);
                        match writer.commit_chunk(max).instrument(span).await {
                            Ok(_) => {
                                report.chunks_committed += 1;
                                PipelineState::Reading
                            },
                            Err(err) => PipelineState::Failed(err),
                        }
                    },
                    None => PipelineState::Reading,
                },
                PipelineState::Failed(err) => {
                    error!(kind = err.kind(), error = %err, "Extraction job failed");
                    report.fail(&err);
                    break;
                },
                PipelineState::Done => {
                    report.status = JobStatus::Completed;
                    break;
                },
                PipelineState::Stopped => {
                    warn!("Shutdown requested between chunks, stopping");
                    report.status = JobStatus::Stopped;
                    break;
                },
            };
        }

        if let Err(err) = writer.flush_on_shutdown().await {
            error!(kind = err.kind(), error = %err, "Finalizer could not write pending watermark");
            if report.error.is_none() {
                report.fail(&err);
            } else {
                report.status = JobStatus::Failed;
            }
        }

        report.messages_published = writer.published();
        report.watermark_end = Some(writer.committed());

        info!(
            status = report.exit_code(),
            chunks = report.chunks_committed,
            published = report.messages_published,
            skipped = report.records_skipped,
            watermark = %writer.committed(),
            "Extraction job finished"
        );

        report
    }

    /// Read the next sealed chunk after `after`; `None` when the source is exhausted.
    ///
    /// One row more than the chunk size is requested so the boundary can be checked.
    async fn read_chunk(&self, after: Watermark) -> ExtractResult<Option<Vec<MetadataRecord>>> {
        let mut limit = self.chunk_size;

        loop {
            let page = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ExtractError::Interrupted),
                page = self.source.next_chunk(after, limit.saturating_add(1)) => page?,
            };

            check_page(&page, after)?;

            match seal_page(page, limit) {
                Sealed::Exhausted => return Ok(None),
                Sealed::Ready(records) => return Ok(Some(records)),
                Sealed::Widen => {
                    let widened = limit.saturating_mul(2);
                    debug!(limit, widened, "Full page shares one timestamp, widening");
                    limit = widened;
                },
            }
        }
    }

    /// Process every record in order, buffering messages. Returns the number skipped.
    async fn process_chunk(&self, chunk: &Chunk, writer: &mut ChunkWriter) -> ExtractResult<usize> {
        let mut skipped = 0;

        for record in &chunk.records {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(id = %record.id, "Shutdown requested mid-chunk");
                    return Err(ExtractError::Interrupted);
                },
                outcome = self.processor.process(record) => outcome?,
            };

            match outcome {
                Processed::Publish(message) => writer.append(message),
                Processed::Skip => skipped += 1,
            }
        }

        debug!(buffered = writer.buffered(), skipped, "Chunk processed");
        Ok(skipped)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(id: &str, at: &str) -> MetadataRecord {
        MetadataRecord {
            id: id.to_string(),
            observed_at: at.parse().unwrap(),
            eligible: true,
            document_key: format!("{id}.pdf"),
        }
    }

    fn ids(sealed: Sealed) -> Vec<String> {
        match sealed {
            Sealed::Ready(records) => records.into_iter().map(|r| r.id).collect(),
            other => panic!("expected a ready chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_page_is_exhausted() {
        assert_eq!(seal_page(Vec::new(), 3), Sealed::Exhausted);
    }

    #[test]
    fn test_short_page_is_kept_whole() {
        let page = vec![
            record("a1", "2023-03-22 12:00:00"),
            record("b2", "2023-03-22 12:00:00"),
        ];
        assert_eq!(ids(seal_page(page, 2)), vec!["a1", "b2"]);
    }

    #[test]
    fn test_lookahead_past_boundary_is_dropped() {
        let page = vec![
            record("a1", "2023-03-22 12:00:00"),
            record("b2", "2023-03-22 13:00:00"),
            record("c3", "2023-03-22 14:00:00"),
        ];
        assert_eq!(ids(seal_page(page, 2)), vec!["a1", "b2"]);
    }

    #[test]
    fn test_tied_lookahead_defers_trailing_run() {
        let page = vec![
            record("a1", "2023-03-22 12:00:00"),
            record("b2", "2023-03-22 13:00:00"),
            record("c3", "2023-03-22 13:00:00"),
            record("d4", "2023-03-22 13:00:00"),
        ];
        assert_eq!(ids(seal_page(page, 3)), vec!["a1"]);
    }

    #[test]
    fn test_single_timestamp_run_widens() {
        let page = vec![
            record("a1", "2023-03-22 12:00:00"),
            record("b2", "2023-03-22 12:00:00"),
            record("c3", "2023-03-22 12:00:00"),
        ];
        assert_eq!(seal_page(page, 2), Sealed::Widen);
    }

    #[test]
    fn test_check_page_rejects_stale_and_unordered() {
        let after: Watermark = "2023-03-22 12:00:00".parse().unwrap();

        let stale = vec![record("a1", "2023-03-22 12:00:00")];
        assert!(check_page(&stale, after).is_err());

        let unordered = vec![
            record("b2", "2023-03-22 14:00:00"),
            record("a1", "2023-03-22 13:00:00"),
        ];
        assert!(check_page(&unordered, after).is_err());

        let good = vec![
            record("a1", "2023-03-22 13:00:00"),
            record("b2", "2023-03-22 13:00:00"),
        ];
        assert!(check_page(&good, after).is_ok());
    }

    #[test]
    fn test_job_status_codes() {
        assert_eq!(JobStatus::Completed.as_str(), "COMPLETED");
        assert_eq!(JobStatus::Failed.as_str(), "FAILED");
        assert_eq!(JobStatus::Stopped.as_str(), "STOPPED");
    }
}
