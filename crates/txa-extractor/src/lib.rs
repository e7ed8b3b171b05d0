//! TXA Document Extractor Library
//!
//! Batch job that moves documents from an S3 content store onto a Kafka
//! topic, driven by a metadata table in PostgreSQL.
//!
//! # Overview
//!
//! - **Metadata source**: rows with an id, an observation timestamp, an
//!   eligibility flag and a document key, read in timestamp order
//! - **Content store**: trusted and untrusted S3 buckets holding the documents
//! - **Broker**: every eligible document is published as one Kafka message
//! - **Watermark**: the newest timestamp already handled, stored in S3 or postgres
//!
//! # Chunk semantics
//!
//! Records are handled in chunks of `TXA_CHUNK_SIZE`. Messages for a chunk
//! are buffered and only published once every record in it succeeded;
//! the watermark advances right after the publish is acknowledged. A failing
//! record aborts the chunk and the job, so nothing from that chunk reaches
//! the broker and the next run starts from the same place.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use txa_extractor::{config::Config, job};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let report = job::run(&config, CancellationToken::new()).await?;
//!     println!("{}", report.exit_code());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checkpoint;
pub mod config;
pub mod documents;
pub mod error;
pub mod job;
pub mod lock;
pub mod metadata;
pub mod pipeline;
pub mod processor;
pub mod publisher;
pub mod sink;
pub mod storage;

// Re-export commonly used types
pub use error::{ExtractError, ExtractResult};
pub use pipeline::{JobReport, JobStatus, Pipeline};
