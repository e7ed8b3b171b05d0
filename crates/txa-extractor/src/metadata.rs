//! Metadata source
//!
//! Forward-only, stateless cursor over the metadata table: every call asks
//! for the records strictly after a watermark, oldest first. Nothing is kept
//! client side, so asking again with the same watermark yields the same page.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, instrument};
use txa_common::{
    types::{Eligibility, MetadataRecord, Watermark},
    TxaError,
};

use crate::error::ExtractResult;

/// Column names of the metadata table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataColumns {
    pub id: String,
    pub observed_at: String,
    pub eligible: String,
    pub document_key: String,
}

impl Default for MetadataColumns {
    fn default() -> Self {
        Self {
            id: "uuid".to_string(),
            observed_at: "timestamp".to_string(),
            eligible: "relevant".to_string(),
            document_key: "s3_key".to_string(),
        }
    }
}

impl MetadataColumns {
    pub fn validate(&self) -> txa_common::Result<()> {
        for column in [&self.id, &self.observed_at, &self.eligible, &self.document_key] {
            if column.contains('.') {
                return Err(TxaError::InvalidIdentifier(column.clone()));
            }
            validate_identifier(column)?;
        }
        Ok(())
    }
}

/// Accept `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Table and column names are interpolated into SQL, so nothing else gets through.
pub fn validate_identifier(name: &str) -> txa_common::Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(TxaError::InvalidIdentifier(name.to_string()));
    }

    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    if parts.iter().all(|part| valid_part(part)) {
        Ok(())
    } else {
        Err(TxaError::InvalidIdentifier(name.to_string()))
    }
}

/// Quote an optionally schema-qualified identifier, part by part.
pub(crate) fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| pg_escape::quote_identifier(part).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Ordered, resumable read access to metadata records
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Up to `limit` records with `observed_at > after`, ascending by
    /// `observed_at`. Ties come back in a stable order.
    async fn next_chunk(&self, after: Watermark, limit: usize) -> ExtractResult<Vec<MetadataRecord>>;
}

#[derive(Debug, sqlx::FromRow)]
struct MetadataRow {
    id: String,
    observed_at: NaiveDateTime,
    eligible: String,
    document_key: String,
}

impl TryFrom<MetadataRow> for MetadataRecord {
    type Error = TxaError;

    fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
        let eligibility: Eligibility = row.eligible.parse()?;
        Ok(MetadataRecord {
            id: row.id,
            observed_at: Watermark::new(row.observed_at),
            eligible: eligibility.is_eligible(),
            document_key: row.document_key,
        })
    }
}

/// PostgreSQL metadata table reader
#[derive(Clone)]
pub struct PgMetadataSource {
    pool: PgPool,
    query: String,
}

impl PgMetadataSource {
    pub fn new(pool: PgPool, table: &str, columns: &MetadataColumns) -> txa_common::Result<Self> {
        Ok(Self {
            pool,
            query: build_page_query(table, columns)?,
        })
    }
}

fn build_page_query(table: &str, columns: &MetadataColumns) -> txa_common::Result<String> {
    validate_identifier(table)?;
    columns.validate()?;

    let id = quote_identifier(&columns.id);
    let observed_at = quote_identifier(&columns.observed_at);
    let eligible = quote_identifier(&columns.eligible);
    let document_key = quote_identifier(&columns.document_key);

    Ok(format!(
        "SELECT {id}::text AS id, {observed_at} AS observed_at, \
         {eligible}::text AS eligible, {document_key}::text AS document_key \
         FROM {table} \
         WHERE {observed_at} > $1 \
         ORDER BY {observed_at} ASC, {id} ASC \
         LIMIT $2",
        table = quote_identifier(table),
    ))
}

#[async_trait]
impl MetadataSource for PgMetadataSource {
    #[instrument(skip(self), fields(after = %after))]
    async fn next_chunk(&self, after: Watermark, limit: usize) -> ExtractResult<Vec<MetadataRecord>> {
        let rows: Vec<MetadataRow> = sqlx::query_as(&self.query)
            .bind(after.as_naive())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        debug!(rows = rows.len(), "Fetched metadata page");

        let records = rows
            .into_iter()
            .map(MetadataRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}
