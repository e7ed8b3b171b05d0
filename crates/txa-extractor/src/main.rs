//! TXA Document Extractor - Main entry point

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use txa_common::logging::{init_logging, LogConfig};
use txa_common::types::Watermark;

use txa_extractor::config::{CheckpointBackend, Config};
use txa_extractor::job;

#[derive(Parser, Debug)]
#[command(name = "txa-extractor")]
#[command(about = "Publish documents referenced by the metadata table to Kafka", long_about = None)]
#[command(version)]
struct Cli {
    /// Read environment overrides from this file instead of ./.env
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Records per chunk (overrides TXA_CHUNK_SIZE)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Watermark to use when none is stored yet, e.g. "2023-03-22 11:59:59"
    #[arg(long)]
    initial_watermark: Option<Watermark>,

    /// Where the watermark is kept: s3 or postgres
    #[arg(long)]
    checkpoint_backend: Option<CheckpointBackend>,

    /// Skip the advisory lock that keeps runs exclusive
    #[arg(long)]
    no_run_lock: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.env_file {
            Some(path) => {
                dotenvy::from_path(path)?;
                Config::from_env()?
            },
            None => Config::load()?,
        };

        if let Some(chunk_size) = self.chunk_size {
            config.extract.chunk_size = chunk_size;
        }
        if let Some(watermark) = self.initial_watermark {
            config.extract.initial_watermark = Some(watermark);
        }
        if let Some(backend) = self.checkpoint_backend {
            config.extract.checkpoint_backend = backend;
        }
        if self.no_run_lock {
            config.extract.run_lock = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("txa-extractor")
        .filter_directives("txa_extractor=info,txa_common=info,sqlx=warn,rdkafka=warn")
        .build()
        .with_env()?;

    let _guard = init_logging(&log_config)?;

    info!("Starting TXA document extractor");

    let config = cli.load_config()?;
    info!(
        chunk_size = config.extract.chunk_size,
        table = %config.extract.metadata_table,
        topic = %config.kafka.topic,
        checkpoint = ?config.extract.checkpoint_backend,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let report = job::run(&config, cancel).await?;
    info!(report = %serde_json::to_string(&report)?, "Job report");

    if !report.is_success() {
        error!(
            exit_code = report.exit_code(),
            error = report.error.as_deref().unwrap_or("none"),
            "Extraction job did not complete"
        );
        anyhow::bail!("Extraction job finished with status {}", report.exit_code());
    }

    info!(exit_code = report.exit_code(), "Extraction job complete");
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current step");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping after the current step");
        },
    }

    token.cancel();
}
