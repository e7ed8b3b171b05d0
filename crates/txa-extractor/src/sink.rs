//! Chunk writer
//!
//! Buffers the messages of the chunk in flight and turns them into broker
//! traffic only when the whole chunk has been processed. A commit publishes
//! the buffer and then advances the watermark; an abort throws the buffer
//! away without any network effect.

use std::sync::Arc;

use tracing::{error, info, warn};
use txa_common::types::{OutgoingMessage, Watermark};

use crate::checkpoint::CheckpointStore;
use crate::error::{ExtractError, ExtractResult};
use crate::publisher::Publisher;

pub struct ChunkWriter {
    publisher: Arc<dyn Publisher>,
    checkpoints: Arc<dyn CheckpointStore>,
    buffer: Vec<OutgoingMessage>,
    committed: Watermark,
    /// Published chunk whose watermark write is not yet confirmed
    pending: Option<Watermark>,
    published: usize,
}

impl ChunkWriter {
    /// `committed` is the watermark read at job start.
    pub fn new(
        publisher: Arc<dyn Publisher>,
        checkpoints: Arc<dyn CheckpointStore>,
        committed: Watermark,
    ) -> Self {
        Self {
            publisher,
            checkpoints,
            buffer: Vec::new(),
            committed,
            pending: None,
            published: 0,
        }
    }

    pub fn committed(&self) -> Watermark {
        self.committed
    }

    pub fn pending(&self) -> Option<Watermark> {
        self.pending
    }

    /// Messages acknowledged by the broker over the writer's lifetime
    pub fn published(&self) -> usize {
        self.published
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a message. No network effect.
    pub fn append(&mut self, message: OutgoingMessage) {
        self.buffer.push(message);
    }

    /// Publish the buffer, then persist `max_observed_at` as the new watermark.
    ///
    /// The watermark is written only after the whole buffer is acknowledged.
    /// If the write itself fails the chunk stays pending and
    /// [`flush_on_shutdown`](Self::flush_on_shutdown) completes it.
    /// Returns the number of messages published.
    pub async fn commit_chunk(&mut self, max_observed_at: Watermark) -> ExtractResult<usize> {
        if let Some(pending) = self.pending {
            return Err(ExtractError::CheckpointWriteFailure {
                watermark: pending,
                reason: "previous chunk is still pending".to_string(),
            });
        }

        if max_observed_at <= self.committed {
            return Err(ExtractError::WatermarkRegression {
                committed: self.committed,
                proposed: max_observed_at,
            });
        }

        let messages = std::mem::take(&mut self.buffer);
        if !messages.is_empty() {
            if let Err(err) = self.publisher.publish(&messages).await {
                // Acknowledged messages stay on the topic even though the chunk failed
                if let ExtractError::PublishFailure { published, .. } = &err {
                    self.published += published;
                }
                return Err(err);
            }
            self.published += messages.len();
        }

        self.pending = Some(max_observed_at);
        self.checkpoints.write(max_observed_at).await?;
        self.pending = None;
        self.committed = max_observed_at;

        info!(
            published = messages.len(),
            watermark = %max_observed_at,
            "Chunk committed"
        );

        Ok(messages.len())
    }

    /// Drop the buffer without publishing. Returns how many messages were discarded.
    pub fn abort_chunk(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();

        warn!(
            discarded,
            watermark = %self.committed,
            "Chunk aborted, nothing published"
        );

        discarded
    }

    /// Finalizer; run before the writer's resources go away.
    ///
    /// Buffered messages belong to an uncommitted chunk and are discarded.
    /// A pending watermark belongs to a chunk that was already published and
    /// is written now.
    pub async fn flush_on_shutdown(&mut self) -> ExtractResult<()> {
        if !self.buffer.is_empty() {
            warn!(
                discarded = self.buffer.len(),
                "Discarding uncommitted messages at shutdown"
            );
            self.buffer.clear();
        }

        if let Some(watermark) = self.pending {
            info!(%watermark, "Writing pending watermark before shutdown");
            self.checkpoints.write(watermark).await?;
            self.pending = None;
            self.committed = watermark;
        }

        Ok(())
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Some(watermark) = self.pending {
            error!(
                %watermark,
                "Chunk writer dropped with an unwritten watermark; the next run will re-publish that chunk"
            );
        }
        if !self.buffer.is_empty() {
            error!(
                discarded = self.buffer.len(),
                "Chunk writer dropped with buffered messages"
            );
        }
    }
}
