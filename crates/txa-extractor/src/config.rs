//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use txa_common::types::Watermark;

use crate::metadata::{validate_identifier, MetadataColumns};
use crate::storage::config::StorageConfig;

// ============================================================================
// Extractor Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/metadata";

/// Default maximum database connections. The job is sequential; two cover
/// the cursor and the run lock.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default Kafka bootstrap servers.
pub const DEFAULT_KAFKA_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Default topic documents are published to.
pub const DEFAULT_KAFKA_INGEST_TOPIC: &str = "txa-ingest";

/// Default Kafka client id.
pub const DEFAULT_KAFKA_CLIENT_ID: &str = "txa-document-extractor";

/// Default delivery timeout for one message, in milliseconds.
pub const DEFAULT_KAFKA_MESSAGE_TIMEOUT_MS: u64 = 30_000;

/// Default largest message the producer accepts, in bytes.
pub const DEFAULT_KAFKA_MESSAGE_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Values librdkafka accepts for `message.max.bytes`.
pub const KAFKA_MESSAGE_MAX_BYTES_RANGE: std::ops::RangeInclusive<usize> = 1_000..=1_000_000_000;

/// Default number of metadata records per chunk (commit interval).
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Upper bound on records per chunk. A chunk is buffered in memory until
/// its commit.
pub const MAX_CHUNK_SIZE: usize = 100_000;

/// Default metadata table.
pub const DEFAULT_METADATA_TABLE: &str = "metadata.document_metadata";

/// Default object key of the watermark in the untrusted bucket.
pub const DEFAULT_CHECKPOINT_KEY: &str = "timestamp";

/// Default table for the postgres checkpoint backend.
pub const DEFAULT_CHECKPOINT_TABLE: &str = "metadata.extract_checkpoint";

/// Default row name for the postgres checkpoint backend.
pub const DEFAULT_CHECKPOINT_NAME: &str = "txa-document-extractor";

/// Default advisory lock key ("TXA-EXTR" as big-endian bytes).
pub const DEFAULT_RUN_LOCK_KEY: i64 = 0x5458_412d_4558_5452;

/// Extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub kafka: KafkaConfig,
    pub extract: ExtractConfig,
}

/// Metadata database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub client_id: String,
    pub message_timeout_ms: u64,
    pub message_max_bytes: usize,
}

/// Where the watermark lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// A text object in the untrusted bucket
    #[default]
    S3,
    /// A row in a postgres table next to the metadata
    Postgres,
}

impl FromStr for CheckpointBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" | "object" => Ok(CheckpointBackend::S3),
            "postgres" | "postgresql" | "database" => Ok(CheckpointBackend::Postgres),
            _ => Err(anyhow::anyhow!("Invalid checkpoint backend: {}", s)),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub chunk_size: usize,
    pub metadata_table: String,
    pub columns: MetadataColumns,
    pub checkpoint_backend: CheckpointBackend,
    pub checkpoint_key: String,
    pub checkpoint_table: String,
    pub checkpoint_name: String,
    /// Used when no watermark has been persisted yet
    pub initial_watermark: Option<Watermark>,
    pub run_lock: bool,
    pub run_lock_key: i64,
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build configuration from the current environment without reading `.env`
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let initial_watermark = match std::env::var("TXA_INITIAL_WATERMARK") {
            Ok(raw) => Some(
                raw.parse::<Watermark>()
                    .map_err(|e| anyhow::anyhow!("Invalid value for TXA_INITIAL_WATERMARK: {}", e))?,
            ),
            Err(_) => None,
        };

        let config = Config {
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
            storage: StorageConfig::from_env()?,
            kafka: KafkaConfig {
                bootstrap_servers: env_string(
                    "KAFKA_BOOTSTRAP_SERVERS",
                    DEFAULT_KAFKA_BOOTSTRAP_SERVERS,
                ),
                topic: env_string("KAFKA_INGEST_TOPIC", DEFAULT_KAFKA_INGEST_TOPIC),
                client_id: env_string("KAFKA_CLIENT_ID", DEFAULT_KAFKA_CLIENT_ID),
                message_timeout_ms: env_or(
                    "KAFKA_MESSAGE_TIMEOUT_MS",
                    DEFAULT_KAFKA_MESSAGE_TIMEOUT_MS,
                )?,
                message_max_bytes: env_or(
                    "KAFKA_MESSAGE_MAX_BYTES",
                    DEFAULT_KAFKA_MESSAGE_MAX_BYTES,
                )?,
            },
            extract: ExtractConfig {
                chunk_size: env_or("TXA_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
                metadata_table: env_string("TXA_METADATA_TABLE", DEFAULT_METADATA_TABLE),
                columns: MetadataColumns {
                    id: env_string("TXA_METADATA_ID_COLUMN", &defaults.extract.columns.id),
                    observed_at: env_string(
                        "TXA_METADATA_TIMESTAMP_COLUMN",
                        &defaults.extract.columns.observed_at,
                    ),
                    eligible: env_string(
                        "TXA_METADATA_FLAG_COLUMN",
                        &defaults.extract.columns.eligible,
                    ),
                    document_key: env_string(
                        "TXA_METADATA_KEY_COLUMN",
                        &defaults.extract.columns.document_key,
                    ),
                },
                checkpoint_backend: env_or("TXA_CHECKPOINT_BACKEND", CheckpointBackend::S3)?,
                checkpoint_key: env_string("TXA_CHECKPOINT_KEY", DEFAULT_CHECKPOINT_KEY),
                checkpoint_table: env_string("TXA_CHECKPOINT_TABLE", DEFAULT_CHECKPOINT_TABLE),
                checkpoint_name: env_string("TXA_CHECKPOINT_NAME", DEFAULT_CHECKPOINT_NAME),
                initial_watermark,
                run_lock: env_or("TXA_RUN_LOCK", true)?,
                run_lock_key: env_or("TXA_RUN_LOCK_KEY", DEFAULT_RUN_LOCK_KEY)?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.extract.run_lock && self.database.max_connections < 2 {
            anyhow::bail!(
                "Database max_connections must be at least 2 when the run lock is enabled"
            );
        }

        if self.extract.chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than 0");
        }

        if self.extract.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!(
                "Chunk size {} exceeds the maximum of {}",
                self.extract.chunk_size,
                MAX_CHUNK_SIZE
            );
        }

        if self.kafka.bootstrap_servers.trim().is_empty() {
            anyhow::bail!("Kafka bootstrap servers cannot be empty");
        }

        if self.kafka.topic.trim().is_empty() {
            anyhow::bail!("Kafka ingest topic cannot be empty");
        }

        if !KAFKA_MESSAGE_MAX_BYTES_RANGE.contains(&self.kafka.message_max_bytes) {
            anyhow::bail!(
                "Kafka message_max_bytes must be between {} and {}",
                KAFKA_MESSAGE_MAX_BYTES_RANGE.start(),
                KAFKA_MESSAGE_MAX_BYTES_RANGE.end()
            );
        }

        if self.storage.trusted_bucket.is_empty() || self.storage.untrusted_bucket.is_empty() {
            anyhow::bail!("Both trusted and untrusted buckets must be configured");
        }

        if self.storage.trusted_bucket == self.storage.untrusted_bucket {
            tracing::warn!(
                bucket = %self.storage.trusted_bucket,
                "Trusted and untrusted content areas share one bucket"
            );
        }

        validate_identifier(&self.extract.metadata_table)?;
        self.extract.columns.validate()?;

        match self.extract.checkpoint_backend {
            CheckpointBackend::S3 => {
                if self.extract.checkpoint_key.trim().is_empty() {
                    anyhow::bail!("Checkpoint object key cannot be empty");
                }
            },
            CheckpointBackend::Postgres => {
                validate_identifier(&self.extract.checkpoint_table)?;
                if self.extract.checkpoint_name.trim().is_empty() {
                    anyhow::bail!("Checkpoint name cannot be empty");
                }
            },
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            storage: StorageConfig::default(),
            kafka: KafkaConfig {
                bootstrap_servers: DEFAULT_KAFKA_BOOTSTRAP_SERVERS.to_string(),
                topic: DEFAULT_KAFKA_INGEST_TOPIC.to_string(),
                client_id: DEFAULT_KAFKA_CLIENT_ID.to_string(),
                message_timeout_ms: DEFAULT_KAFKA_MESSAGE_TIMEOUT_MS,
                message_max_bytes: DEFAULT_KAFKA_MESSAGE_MAX_BYTES,
            },
            extract: ExtractConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                metadata_table: DEFAULT_METADATA_TABLE.to_string(),
                columns: MetadataColumns::default(),
                checkpoint_backend: CheckpointBackend::default(),
                checkpoint_key: DEFAULT_CHECKPOINT_KEY.to_string(),
                checkpoint_table: DEFAULT_CHECKPOINT_TABLE.to_string(),
                checkpoint_name: DEFAULT_CHECKPOINT_NAME.to_string(),
                initial_watermark: None,
                run_lock: true,
                run_lock_key: DEFAULT_RUN_LOCK_KEY,
            },
        }
    }
}
