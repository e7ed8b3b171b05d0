//! Watermark persistence
//!
//! A single durable timestamp: read once when a job starts, written at most
//! once per committed chunk. Two backends are provided; the S3 one keeps the
//! value as a text object in the untrusted bucket.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};
use txa_common::types::Watermark;

use crate::error::{ExtractError, ExtractResult};
use crate::metadata::{quote_identifier, validate_identifier};
use crate::storage::{Storage, StorageError};

/// Durable home of the watermark
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn read(&self) -> ExtractResult<Watermark>;

    async fn write(&self, watermark: Watermark) -> ExtractResult<()>;
}

fn missing_checkpoint(initial: Option<Watermark>, location: &str) -> ExtractResult<Watermark> {
    match initial {
        Some(watermark) => {
            warn!(%location, %watermark, "No stored watermark, starting from configured initial value");
            Ok(watermark)
        },
        None => Err(ExtractError::CheckpointReadFailure(format!(
            "{location} does not exist and no initial watermark is configured"
        ))),
    }
}

/// Watermark stored as `YYYY-MM-DD HH:MM:SS` text in an S3 object
#[derive(Clone)]
pub struct S3CheckpointStore {
    storage: Storage,
    key: String,
    initial: Option<Watermark>,
}

impl S3CheckpointStore {
    pub fn new(storage: Storage, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            initial: None,
        }
    }

    pub fn with_initial(mut self, initial: Option<Watermark>) -> Self {
        self.initial = initial;
        self
    }
}

#[async_trait]
impl CheckpointStore for S3CheckpointStore {
    #[instrument(skip(self), fields(key = %self.key))]
    async fn read(&self) -> ExtractResult<Watermark> {
        let raw = match self.storage.download(&self.key).await {
            Ok(raw) => raw,
            Err(StorageError::NotFound { .. }) => {
                return missing_checkpoint(self.initial, &self.storage.uri(&self.key));
            },
            Err(err) => return Err(ExtractError::CheckpointReadFailure(err.to_string())),
        };

        let text = std::str::from_utf8(&raw).map_err(|e| {
            ExtractError::CheckpointReadFailure(format!(
                "{} is not UTF-8: {e}",
                self.storage.uri(&self.key)
            ))
        })?;

        let watermark = text
            .parse::<Watermark>()
            .map_err(|e| ExtractError::CheckpointReadFailure(e.to_string()))?;

        debug!(%watermark, "Read watermark");
        Ok(watermark)
    }

    #[instrument(skip(self), fields(key = %self.key))]
    async fn write(&self, watermark: Watermark) -> ExtractResult<()> {
        self.storage
            .upload(&self.key, watermark.to_string(), "text/plain")
            .await
            .map_err(|e| ExtractError::CheckpointWriteFailure {
                watermark,
                reason: e.to_string(),
            })?;

        info!(%watermark, location = %self.storage.uri(&self.key), "Watermark written");
        Ok(())
    }
}

/// Watermark stored as a named row in a postgres table
///
/// The upsert refuses to move a stored value backwards, so two runs that
/// slip past the run lock cannot regress each other.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
    table: String,
    name: String,
    initial: Option<Watermark>,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool, table: &str, name: impl Into<String>) -> txa_common::Result<Self> {
        validate_identifier(table)?;
        Ok(Self {
            pool,
            table: quote_identifier(table),
            name: name.into(),
            initial: None,
        })
    }

    pub fn with_initial(mut self, initial: Option<Watermark>) -> Self {
        self.initial = initial;
        self
    }

    /// Create the checkpoint table if it does not exist yet
    pub async fn ensure_table(&self) -> ExtractResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                name TEXT PRIMARY KEY, \
                watermark TIMESTAMP NOT NULL, \
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\
            )",
            self.table
        );

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractError::CheckpointReadFailure(format!("Failed to create {}: {e}", self.table)))?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self), fields(name = %self.name))]
    async fn read(&self) -> ExtractResult<Watermark> {
        let query = format!("SELECT watermark FROM {} WHERE name = $1", self.table);

        let stored: Option<(NaiveDateTime,)> = sqlx::query_as(&query)
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExtractError::CheckpointReadFailure(e.to_string()))?;

        match stored {
            Some((at,)) => {
                let watermark = Watermark::new(at);
                debug!(%watermark, "Read watermark");
                Ok(watermark)
            },
            None => missing_checkpoint(self.initial, &format!("{} row '{}'", self.table, self.name)),
        }
    }

    #[instrument(skip(self), fields(name = %self.name))]
    async fn write(&self, watermark: Watermark) -> ExtractResult<()> {
        let query = format!(
            "INSERT INTO {table} (name, watermark) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE \
             SET watermark = EXCLUDED.watermark, updated_at = NOW() \
             WHERE {table}.watermark <= EXCLUDED.watermark",
            table = self.table
        );

        let result = sqlx::query(&query)
            .bind(&self.name)
            .bind(watermark.as_naive())
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractError::CheckpointWriteFailure {
                watermark,
                reason: e.to_string(),
            })?;

        if result.rows_affected() == 0 {
            return Err(ExtractError::CheckpointWriteFailure {
                watermark,
                reason: "stored watermark is newer".to_string(),
            });
        }

        info!(%watermark, table = %self.table, "Watermark written");
        Ok(())
    }
}
