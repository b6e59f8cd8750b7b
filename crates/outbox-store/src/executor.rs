//! Async store facade using a dedicated SQLite thread.
//!
//! All operations are sent to a single background thread via channel, so
//! the relay's tokio tasks never block on disk I/O and queries execute in
//! FIFO order. Only SQL belongs inside `call()`; handler invocation and
//! any other slow work stays outside.

use crate::{
    migrations, queries, writer, NewOutboxMessage, OutboxCounts, OutboxMessage, StoreError,
    StoreResult, SweepOutcome,
};
use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

/// Async outbox store with a dedicated executor thread.
///
/// Cheap to clone; clones share the executor. Multiple stores (including
/// ones in other processes) may point at the same database file; claim
/// safety comes from the conditional updates in [`crate::queries`], not
/// from the executor.
#[derive(Clone)]
pub struct AsyncOutboxStore {
    conn: Connection,
    path: String,
}

impl AsyncOutboxStore {
    /// Open a store at the given path.
    ///
    /// Creates the file (and parent directories) if missing, enables WAL
    /// mode, runs pending migrations, and starts the executor thread.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        info!(path = %path_str, "Opening outbox store");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA cache_size = -64000;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        conn.call(|conn| {
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        info!(path = %path_str, "Outbox store initialized with WAL mode");

        Ok(Self { conn, path: path_str })
    }

    /// Open an in-memory store for testing.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        Ok(Self { conn, path: ":memory:".to_string() })
    }

    /// Execute a closure on the store connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked (not blocked) until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The StoreResult rides inside the tokio_rusqlite Ok variant so SQL
        // errors and domain errors come back on separate tracks.
        let outer_result = self
            .conn
            .call(move |conn| {
                let inner_result = f(conn);
                Ok(inner_result)
            })
            .await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Run a closure inside a transaction, committing on `Ok`.
    ///
    /// The async counterpart of [`crate::OutboxStore::with_transaction`]:
    /// business mutation plus [`writer::append`] in one atomic unit.
    pub async fn with_transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                match f(&tx) {
                    Ok(value) => {
                        tx.commit()?;
                        Ok(Ok(value))
                    }
                    // Dropping the transaction rolls it back
                    Err(e) => Ok(Err(e)),
                }
            })
            .await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Append a standalone outbox message in its own small transaction.
    pub async fn append_message(&self, message: NewOutboxMessage) -> StoreResult<String> {
        self.with_transaction(move |tx| writer::append(tx, &message)).await
    }

    /// Get an outbox message by id.
    pub async fn get_message(&self, id: &str) -> StoreResult<Option<OutboxMessage>> {
        let id = id.to_string();
        self.call(move |conn| queries::get_message(conn, &id)).await
    }

    /// Claim up to `max_size` pending rows for delivery.
    pub async fn claim_batch(
        &self,
        max_size: usize,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<OutboxMessage>> {
        self.call(move |conn| queries::claim_batch(conn, max_size, now)).await
    }

    /// Finalize a delivered row.
    pub async fn mark_completed(&self, id: &str, version: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::mark_completed(conn, &id, version, now)).await
    }

    /// Requeue a row after a failed delivery attempt.
    pub async fn release_for_retry(&self, id: &str, version: i64, error: String) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::release_for_retry(conn, &id, version, &error)).await
    }

    /// Finalize a row as terminally failed.
    pub async fn mark_failed(&self, id: &str, version: i64, error: String) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::mark_failed(conn, &id, version, &error)).await
    }

    /// Reclaim rows stuck `processing` since before `cutoff`.
    pub async fn sweep_stale(&self, cutoff: DateTime<Utc>, max_attempts: i32) -> StoreResult<SweepOutcome> {
        self.call(move |conn| queries::sweep_stale(conn, cutoff, max_attempts)).await
    }

    /// Operator action: requeue a failed row with a fresh budget.
    pub async fn requeue_failed(&self, id: &str) -> StoreResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::requeue_failed(conn, &id)).await
    }

    /// Row totals per status.
    pub async fn count_by_status(&self) -> StoreResult<OutboxCounts> {
        self.call(queries::count_by_status).await
    }

    /// Failed rows, oldest first.
    pub async fn list_failed(&self, limit: usize) -> StoreResult<Vec<OutboxMessage>> {
        self.call(move |conn| queries::list_failed(conn, limit)).await
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check the store is reachable with a trivial query.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.call(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(())
        })
        .await?;
        debug!("Store health check passed");
        Ok(())
    }

    /// Close the store, waiting for pending operations to finish.
    pub async fn close(self) -> StoreResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to close store: {e:?}")))?;
        info!(path = %self.path, "Outbox store closed");
        Ok(())
    }
}
