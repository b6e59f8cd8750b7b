//! Synchronous store facade.
//!
//! Wraps a single connection behind a mutex so one handle can be shared
//! (`Arc<OutboxStore>`) between the business-write path and tooling. The
//! relay loop itself uses [`crate::AsyncOutboxStore`]; both facades run the
//! same [`crate::queries`] against the same schema, and any number of
//! handles may point at one database file, and cross-process claims stay
//! safe because every mutation is a guarded conditional update.

use crate::{
    migrations, queries, writer, NewOutboxMessage, OutboxCounts, OutboxMessage, StoreError,
    StoreResult, SweepOutcome,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Outbox store over a SQLite database.
pub struct OutboxStore {
    conn: Mutex<Connection>,
}

impl OutboxStore {
    /// Open a store at the given path, running migrations if needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode and performance optimizations; busy_timeout keeps
        // concurrent relay processes from failing fast on a locked database
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

        migrations::run_migrations(&conn)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        // Note: WAL mode doesn't apply to in-memory databases
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Connection("store mutex poisoned".to_string()))
    }

    /// Run a closure against the connection.
    pub fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run a closure inside a transaction, committing on `Ok`.
    ///
    /// This is the writer-side entry point: perform the business mutation
    /// and [`writer::append`] the event against the same transaction, and
    /// the two commit or roll back together.
    pub fn with_transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            // Dropping the transaction rolls it back
            Err(e) => Err(e),
        }
    }

    /// Append a standalone outbox message in its own small transaction.
    ///
    /// Events accompanying a business mutation should go through
    /// [`with_transaction`](Self::with_transaction) instead so both share
    /// one atomic unit.
    pub fn append_message(&self, message: &NewOutboxMessage) -> StoreResult<String> {
        self.with_transaction(|tx| writer::append(tx, message))
    }

    /// Get an outbox message by id.
    pub fn get_message(&self, id: &str) -> StoreResult<Option<OutboxMessage>> {
        self.call(|conn| queries::get_message(conn, id))
    }

    /// Claim up to `max_size` pending rows for delivery.
    pub fn claim_batch(&self, max_size: usize, now: DateTime<Utc>) -> StoreResult<Vec<OutboxMessage>> {
        let batch = self.call(|conn| queries::claim_batch(conn, max_size, now))?;
        debug!(claimed = batch.len(), "Claimed outbox batch");
        Ok(batch)
    }

    /// Finalize a delivered row.
    pub fn mark_completed(&self, id: &str, version: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        self.call(|conn| queries::mark_completed(conn, id, version, now))
    }

    /// Requeue a row after a failed delivery attempt.
    pub fn release_for_retry(&self, id: &str, version: i64, error: &str) -> StoreResult<bool> {
        self.call(|conn| queries::release_for_retry(conn, id, version, error))
    }

    /// Finalize a row as terminally failed.
    pub fn mark_failed(&self, id: &str, version: i64, error: &str) -> StoreResult<bool> {
        self.call(|conn| queries::mark_failed(conn, id, version, error))
    }

    /// Reclaim rows stuck `processing` since before `cutoff`.
    pub fn sweep_stale(&self, cutoff: DateTime<Utc>, max_attempts: i32) -> StoreResult<SweepOutcome> {
        self.call(|conn| queries::sweep_stale(conn, cutoff, max_attempts))
    }

    /// Operator action: requeue a failed row with a fresh budget.
    pub fn requeue_failed(&self, id: &str) -> StoreResult<bool> {
        self.call(|conn| queries::requeue_failed(conn, id))
    }

    /// Row totals per status.
    pub fn count_by_status(&self) -> StoreResult<OutboxCounts> {
        self.call(queries::count_by_status)
    }

    /// Failed rows, oldest first.
    pub fn list_failed(&self, limit: usize) -> StoreResult<Vec<OutboxMessage>> {
        self.call(|conn| queries::list_failed(conn, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutboxStatus;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.db");

        let store = OutboxStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.count_by_status().unwrap(), OutboxCounts::default());
    }

    #[test]
    fn test_append_and_get_round_trip() {
        let store = OutboxStore::open_in_memory().unwrap();
        let id = store
            .append_message(&NewOutboxMessage::new("OrderPlaced", r#"{"order":7}"#, Utc::now()))
            .unwrap();

        let message = store.get_message(&id).unwrap().unwrap();
        assert_eq!(message.message_type, "OrderPlaced");
        assert_eq!(message.status, OutboxStatus::Pending);
    }

    #[test]
    fn test_with_transaction_commits_together() {
        let store = OutboxStore::open_in_memory().unwrap();
        store
            .call(|conn| {
                conn.execute_batch("CREATE TABLE orders (id INTEGER PRIMARY KEY)")?;
                Ok(())
            })
            .unwrap();

        let id = store
            .with_transaction(|tx| {
                tx.execute("INSERT INTO orders (id) VALUES (1)", [])?;
                writer::append(tx, &NewOutboxMessage::new("OrderPlaced", "{}", Utc::now()))
            })
            .unwrap();

        assert!(store.get_message(&id).unwrap().is_some());
        let orders: i64 = store
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(orders, 1);
    }

    #[test]
    fn test_with_transaction_rolls_back_on_error() {
        let store = OutboxStore::open_in_memory().unwrap();
        store
            .call(|conn| {
                conn.execute_batch("CREATE TABLE orders (id INTEGER PRIMARY KEY)")?;
                Ok(())
            })
            .unwrap();

        let result: StoreResult<String> = store.with_transaction(|tx| {
            tx.execute("INSERT INTO orders (id) VALUES (1)", [])?;
            let _ = writer::append(tx, &NewOutboxMessage::new("OrderPlaced", "{}", Utc::now()))?;
            Err(StoreError::Connection("forced failure".to_string()))
        });
        assert!(result.is_err());

        let orders: i64 = store
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(orders, 0);
        assert_eq!(store.count_by_status().unwrap(), OutboxCounts::default());
    }

    #[test]
    fn test_claim_and_finalize_through_facade() {
        let store = OutboxStore::open_in_memory().unwrap();
        let now = Utc::now();
        let id = store
            .append_message(&NewOutboxMessage::new("E", "{}", now))
            .unwrap();

        let batch = store.claim_batch(10, now).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        assert!(store.mark_completed(&id, batch[0].version, now).unwrap());
        let message = store.get_message(&id).unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Completed);
        assert!(message.processed_on_utc.is_some());
    }

    #[test]
    fn test_two_handles_share_one_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let now = Utc::now();

        let writer_handle = OutboxStore::open(&path).unwrap();
        let relay_handle = OutboxStore::open(&path).unwrap();

        let id = writer_handle
            .append_message(&NewOutboxMessage::new("E", "{}", now))
            .unwrap();

        let batch = relay_handle.claim_batch(10, now).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        // The writer-side handle observes the claim immediately
        let seen = writer_handle.get_message(&id).unwrap().unwrap();
        assert_eq!(seen.status, OutboxStatus::Processing);
    }
}
