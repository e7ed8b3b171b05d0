//! TXA Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the TXA document extractor.
//!
//! # Overview
//!
//! - **Types**: the watermark, metadata record and outgoing message shapes
//!   that flow between the metadata store, the content store and the broker
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Error Handling**: parse errors for values read from external stores
//!
//! # Example
//!
//! ```no_run
//! use txa_common::types::Watermark;
//!
//! fn resume_point(text: &str) -> txa_common::Result<Watermark> {
//!     let watermark: Watermark = text.parse()?;
//!     tracing::info!(%watermark, "Resuming extraction");
//!     Ok(watermark)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TxaError};
