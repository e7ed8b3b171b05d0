//! Single-run guard
//!
//! Two concurrent jobs would read the same watermark and publish the same
//! chunks twice. A session-level postgres advisory lock keeps runs exclusive
//! across hosts; it lives as long as the connection that took it.

use sqlx::{pool::PoolConnection, PgPool, Postgres};
use tracing::{info, warn};

use crate::error::{ExtractError, ExtractResult};

pub struct RunLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl RunLock {
    /// Try to take the lock without waiting. `Ok(None)` means another run holds it.
    pub async fn try_acquire(pool: &PgPool, key: i64) -> ExtractResult<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| ExtractError::LockUnavailable(e.to_string()))?;

        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| ExtractError::LockUnavailable(e.to_string()))?;

        if !acquired {
            warn!(key, "Run lock held by another job");
            return Ok(None);
        }

        info!(key, "Run lock acquired");
        Ok(Some(Self {
            conn: Some(conn),
            key,
        }))
    }

    /// Release the lock and return the connection to the pool
    pub async fn release(mut self) -> ExtractResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| ExtractError::LockUnavailable(e.to_string()))?;

        if !released {
            warn!(key = self.key, "Run lock was not held at release");
        }

        info!(key = self.key, "Run lock released");
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Closing the session is the only way to free a session lock without awaiting.
        if let Some(conn) = self.conn.take() {
            warn!(key = self.key, "Run lock dropped without release, closing its connection");
            drop(conn.detach());
        }
    }
}
