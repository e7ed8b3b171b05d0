//! Job assembly: build every collaborator from [`Config`] and run the pipeline once

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, PgCheckpointStore, S3CheckpointStore};
use crate::config::{CheckpointBackend, Config};
use crate::documents::S3DocumentStore;
use crate::lock::RunLock;
use crate::metadata::PgMetadataSource;
use crate::pipeline::{JobReport, Pipeline};
use crate::publisher::KafkaPublisher;
use crate::storage::{self, Storage};

pub async fn create_pool(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to metadata database")?;

    info!(
        max_connections = config.database.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

async fn checkpoint_store(
    config: &Config,
    pool: &PgPool,
    untrusted: &Storage,
) -> anyhow::Result<Arc<dyn CheckpointStore>> {
    let extract = &config.extract;

    let store: Arc<dyn CheckpointStore> = match extract.checkpoint_backend {
        CheckpointBackend::S3 => Arc::new(
            S3CheckpointStore::new(untrusted.clone(), extract.checkpoint_key.clone())
                .with_initial(extract.initial_watermark),
        ),
        CheckpointBackend::Postgres => {
            let store = PgCheckpointStore::new(
                pool.clone(),
                &extract.checkpoint_table,
                extract.checkpoint_name.clone(),
            )?
            .with_initial(extract.initial_watermark);
            store.ensure_table().await?;
            Arc::new(store)
        },
    };

    Ok(store)
}

/// Run one extraction job.
///
/// Errors are reserved for setup problems; once the pipeline starts every
/// outcome is described by the returned [`JobReport`].
pub async fn run(config: &Config, cancel: CancellationToken) -> anyhow::Result<JobReport> {
    config.validate()?;
    let pool = create_pool(config).await?;

    let lock = if config.extract.run_lock {
        match RunLock::try_acquire(&pool, config.extract.run_lock_key).await? {
            Some(lock) => Some(lock),
            None => anyhow::bail!(
                "Another extraction job holds run lock {}",
                config.extract.run_lock_key
            ),
        }
    } else {
        warn!("Run lock disabled; concurrent jobs may publish duplicates");
        None
    };

    let client = storage::connect(&config.storage).await;
    let trusted = Storage::new(client.clone(), config.storage.trusted_bucket.clone());
    let untrusted = Storage::new(client, config.storage.untrusted_bucket.clone());

    let source = Arc::new(PgMetadataSource::new(
        pool.clone(),
        &config.extract.metadata_table,
        &config.extract.columns,
    )?);
    let checkpoints = checkpoint_store(config, &pool, &untrusted).await?;
    let documents = Arc::new(S3DocumentStore::new(trusted, untrusted));
    let publisher = Arc::new(KafkaPublisher::new(&config.kafka)?);

    let report = Pipeline::new(
        source,
        documents,
        publisher,
        checkpoints,
        config.extract.chunk_size,
    )
    .with_cancellation(cancel)
    .run()
    .await;

    if let Some(lock) = lock {
        if let Err(e) = lock.release().await {
            warn!(error = %e, "Failed to release run lock");
        }
    }

    pool.close().await;

    Ok(report)
}
