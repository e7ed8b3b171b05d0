//! Common test utilities for the extractor integration tests
//!
//! Two kinds of helpers live here:
//!
//! - in-memory stand-ins for the metadata source, content store, broker and
//!   checkpoint store, so pipeline behaviour can be tested without services
//! - PostgreSQL and MinIO containers for the backend tests, which are
//!   `#[ignore]`d and need Docker
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{scenario_records, Harness};
//!
//! #[tokio::test]
//! async fn test_run() {
//!     let harness = Harness::new(scenario_records(), "2023-03-22 11:59:59");
//!     let report = harness.pipeline(10).run().await;
//!     assert!(report.is_success());
//! }
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use txa_common::types::{MetadataRecord, OutgoingMessage, Watermark};

use txa_extractor::checkpoint::CheckpointStore;
use txa_extractor::documents::{ContentArea, DocumentStore};
use txa_extractor::error::{ExtractError, ExtractResult};
use txa_extractor::metadata::MetadataSource;
use txa_extractor::publisher::Publisher;
use txa_extractor::storage::{self, config::StorageConfig, Storage};
use txa_extractor::Pipeline;

pub const TRUSTED_BUCKET: &str = "trusted-bucket";
pub const UNTRUSTED_BUCKET: &str = "untrusted-bucket";
pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,txa_extractor=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn ts(text: &str) -> Watermark {
    text.parse().expect("valid test timestamp")
}

pub fn record(id: &str, at: &str, eligible: bool, key: &str) -> MetadataRecord {
    MetadataRecord {
        id: id.to_string(),
        observed_at: ts(at),
        eligible,
        document_key: key.to_string(),
    }
}

/// Six records, the second pointing at a document that does not exist
pub fn scenario_records() -> Vec<MetadataRecord> {
    vec![
        record("a1", "2023-03-22 12:00:00", true, "decs-file1.pdf"),
        record("b2", "2023-03-22 13:00:00", true, "NONEXISTENT-FILE.pdf"),
        record("c3", "2023-03-22 14:00:00", true, "decs-file3.pdf"),
        record("d4", "2023-03-22 15:00:00", false, "decs-file4.pdf"),
        record("e5", "2023-03-22 16:00:00", true, "decs-file5.pdf"),
        record("f6", "2023-03-22 17:00:00", true, "decs-file6.pdf"),
    ]
}

/// Same six records with every document present
pub fn healthy_records() -> Vec<MetadataRecord> {
    let mut records = scenario_records();
    records[1].document_key = "decs-file2.pdf".to_string();
    records
}

// ============================================================================
// In-memory metadata source
// ============================================================================

#[derive(Default)]
pub struct MemorySource {
    records: Mutex<Vec<MetadataRecord>>,
    /// (after, limit) of every query
    pub queries: Mutex<Vec<(Watermark, usize)>>,
    pub unavailable: AtomicBool,
}

impl MemorySource {
    pub fn new(records: Vec<MetadataRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn insert(&self, record: MetadataRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataSource for MemorySource {
    async fn next_chunk(&self, after: Watermark, limit: usize) -> ExtractResult<Vec<MetadataRecord>> {
        self.queries.lock().unwrap().push((after, limit));

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ExtractError::SourceUnavailable("connection refused".to_string()));
        }

        let mut page: Vec<MetadataRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.observed_at > after)
            .cloned()
            .collect();
        page.sort_by(|a, b| a.observed_at.cmp(&b.observed_at).then_with(|| a.id.cmp(&b.id)));
        page.truncate(limit);
        Ok(page)
    }
}

// ============================================================================
// In-memory content store
// ============================================================================

#[derive(Default)]
pub struct MemoryDocuments {
    areas: Mutex<HashMap<(ContentArea, String), Bytes>>,
    /// Keys fetched, in order
    pub fetches: Mutex<Vec<String>>,
    pub unavailable: AtomicBool,
    /// Cancelled right after this key is fetched
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
}

impl MemoryDocuments {
    /// Every eligible record's document, in the trusted area
    pub fn for_records(records: &[MetadataRecord]) -> Self {
        let store = Self::default();
        for record in records {
            if record.document_key.starts_with("NONEXISTENT") {
                continue;
            }
            store.put(
                ContentArea::for_eligibility(record.eligible),
                &record.document_key,
                format!("content of {}", record.document_key),
            );
        }
        store
    }

    pub fn put(&self, area: ContentArea, key: &str, body: impl Into<Bytes>) {
        self.areas
            .lock()
            .unwrap()
            .insert((area, key.to_string()), body.into());
    }

    pub fn cancel_after(&self, key: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((key.to_string(), token));
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn fetch(&self, document_key: &str, eligible: bool) -> ExtractResult<Bytes> {
        self.fetches.lock().unwrap().push(document_key.to_string());

        if let Some((key, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if key == document_key {
                token.cancel();
            }
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ExtractError::ContentStoreUnavailable {
                key: document_key.to_string(),
                reason: "connection reset".to_string(),
            });
        }

        let area = ContentArea::for_eligibility(eligible);
        self.areas
            .lock()
            .unwrap()
            .get(&(area, document_key.to_string()))
            .cloned()
            .ok_or_else(|| ExtractError::DocumentNotFound {
                area,
                key: document_key.to_string(),
            })
    }
}

// ============================================================================
// In-memory broker
// ============================================================================

#[derive(Default)]
pub struct MemoryBroker {
    pub messages: Mutex<Vec<OutgoingMessage>>,
    pub batches: AtomicUsize,
    pub fail: AtomicBool,
    /// With `fail` set, acknowledge this many messages of the batch first
    pub accept_before_failure: AtomicUsize,
    cancel_on_publish: Mutex<Option<CancellationToken>>,
}

impl MemoryBroker {
    pub fn keys(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.key.clone())
            .collect()
    }

    /// Cancel `token` once the first batch is acknowledged
    pub fn cancel_after_publish(&self, token: CancellationToken) {
        *self.cancel_on_publish.lock().unwrap() = Some(token);
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, messages: &[OutgoingMessage]) -> ExtractResult<()> {
        self.batches.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            let accepted = self
                .accept_before_failure
                .load(Ordering::SeqCst)
                .min(messages.len());
            self.messages
                .lock()
                .unwrap()
                .extend_from_slice(&messages[..accepted]);
            return Err(ExtractError::PublishFailure {
                published: accepted,
                total: messages.len(),
                reason: "broker unreachable".to_string(),
            });
        }

        self.messages.lock().unwrap().extend_from_slice(messages);

        if let Some(token) = self.cancel_on_publish.lock().unwrap().as_ref() {
            token.cancel();
        }
        Ok(())
    }
}

// ============================================================================
// In-memory checkpoint
// ============================================================================

#[derive(Default)]
pub struct MemoryCheckpoint {
    stored: Mutex<Option<Watermark>>,
    pub writes: Mutex<Vec<Watermark>>,
    pub write_failures: AtomicUsize,
}

impl MemoryCheckpoint {
    pub fn at(watermark: Watermark) -> Self {
        Self {
            stored: Mutex::new(Some(watermark)),
            ..Default::default()
        }
    }

    pub fn current(&self) -> Option<Watermark> {
        *self.stored.lock().unwrap()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn read(&self) -> ExtractResult<Watermark> {
        self.current()
            .ok_or_else(|| ExtractError::CheckpointReadFailure("no watermark stored".to_string()))
    }

    async fn write(&self, watermark: Watermark) -> ExtractResult<()> {
        if self.write_failures.load(Ordering::SeqCst) > 0 {
            self.write_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ExtractError::CheckpointWriteFailure {
                watermark,
                reason: "bucket unreachable".to_string(),
            });
        }

        self.writes.lock().unwrap().push(watermark);
        *self.stored.lock().unwrap() = Some(watermark);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// All four in-memory collaborators, shared with the pipelines built from it
pub struct Harness {
    pub source: Arc<MemorySource>,
    pub documents: Arc<MemoryDocuments>,
    pub broker: Arc<MemoryBroker>,
    pub checkpoint: Arc<MemoryCheckpoint>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(records: Vec<MetadataRecord>, watermark: &str) -> Self {
        let documents = MemoryDocuments::for_records(&records);
        Self {
            source: Arc::new(MemorySource::new(records)),
            documents: Arc::new(documents),
            broker: Arc::new(MemoryBroker::default()),
            checkpoint: Arc::new(MemoryCheckpoint::at(ts(watermark))),
            cancel: CancellationToken::new(),
        }
    }

    pub fn pipeline(&self, chunk_size: usize) -> Pipeline {
        Pipeline::new(
            self.source.clone(),
            self.documents.clone(),
            self.broker.clone(),
            self.checkpoint.clone(),
            chunk_size,
        )
        .with_cancellation(self.cancel.clone())
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    #[allow(dead_code)]
    container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { container, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create `metadata.document_metadata` and insert `records`
    pub async fn seed_metadata(&self, records: &[MetadataRecord]) -> Result<()> {
        sqlx::query("CREATE SCHEMA IF NOT EXISTS metadata")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS metadata.document_metadata (\
                uuid TEXT PRIMARY KEY, \
                timestamp TIMESTAMP NOT NULL, \
                relevant CHAR(1) NOT NULL, \
                s3_key TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        for record in records {
            sqlx::query("INSERT INTO metadata.document_metadata VALUES ($1, $2, $3, $4)")
                .bind(&record.id)
                .bind(record.observed_at.as_naive())
                .bind(if record.eligible { "Y" } else { "N" })
                .bind(&record.document_key)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}

// ============================================================================
// MinIO Test Container
// ============================================================================

pub struct TestMinio {
    #[allow(dead_code)]
    container: ContainerAsync<GenericImage>,
    config: StorageConfig,
    client: aws_sdk_s3::Client,
}

impl TestMinio {
    /// Start MinIO with the trusted and untrusted buckets created
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = GenericImage::new("minio/minio", "latest")
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("MinIO Object Storage Server"))
            .with_env_var("MINIO_ROOT_USER", MINIO_ACCESS_KEY)
            .with_env_var("MINIO_ROOT_PASSWORD", MINIO_SECRET_KEY)
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;

        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        let config = StorageConfig::for_local(endpoint);
        let client = storage::connect(&config).await;

        for bucket in [TRUSTED_BUCKET, UNTRUSTED_BUCKET] {
            client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .with_context(|| format!("Failed to create bucket {}", bucket))?;
        }

        Ok(Self {
            container,
            config,
            client,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn bucket(&self, name: &str) -> Storage {
        Storage::new(self.client.clone(), name)
    }
}
