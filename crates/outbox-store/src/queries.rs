//! Query functions for outbox rows.
//!
//! Free functions over a borrowed connection so they compose with both the
//! sync facade and the async executor, and join any caller-managed
//! transaction. Every status mutation in the system lives here, and every
//! UPDATE is guarded by the expected source status (plus the row `version`
//! where a claim is being finalized), so illegal lifecycle edges affect
//! zero rows instead of corrupting state.

use crate::{NewOutboxMessage, OutboxCounts, OutboxMessage, OutboxStatus, StoreError, StoreResult, SweepOutcome};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

const MESSAGE_COLUMNS: &str = "id, message_type, content, occurred_on_utc, status, attempts, \
     processing_started_at, processed_on_utc, last_error, version";

// ==========================================
// Writes
// ==========================================

/// Insert a new outbox message with the given id.
///
/// Joins whatever transaction the connection currently has open; the outbox
/// writer relies on this to make the row part of the business commit.
pub fn insert_message(conn: &Connection, id: &str, message: &NewOutboxMessage) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO outbox_messages (id, message_type, content, occurred_on_utc, status, attempts, version)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, 0)",
        params![
            id,
            message.message_type,
            message.content,
            message.occurred_on_utc.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Get an outbox message by id.
pub fn get_message(conn: &Connection, id: &str) -> StoreResult<Option<OutboxMessage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM outbox_messages WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], map_message);

    match result {
        Ok(message) => Ok(Some(message)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// Claiming
// ==========================================

/// Attempt to claim one pending row for delivery.
///
/// Compare-and-swap: succeeds only if the row is still `pending` at the
/// version the caller last observed. The winning update stamps
/// `processing_started_at`, starts an attempt, and bumps the version; a
/// concurrent claimer racing on the same row sees zero affected rows.
pub fn try_claim(conn: &Connection, id: &str, version: i64, now: DateTime<Utc>) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE outbox_messages
         SET status = 'processing',
             processing_started_at = ?2,
             attempts = attempts + 1,
             version = version + 1
         WHERE id = ?1 AND status = 'pending' AND version = ?3",
        params![id, now.to_rfc3339(), version],
    )?;
    Ok(affected > 0)
}

/// Claim up to `max_size` pending rows, oldest `occurred_on_utc` first.
///
/// Candidates are selected and then claimed one by one via [`try_claim`];
/// rows lost to a concurrent claimer are simply not part of the returned
/// batch. The batch is returned in claim order.
pub fn claim_batch(
    conn: &Connection,
    max_size: usize,
    now: DateTime<Utc>,
) -> StoreResult<Vec<OutboxMessage>> {
    let candidates = claim_candidates(conn, max_size)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut claimed_ids = Vec::with_capacity(candidates.len());
    for (id, version) in candidates {
        if try_claim(conn, &id, version, now)? {
            claimed_ids.push(id);
        }
    }

    if claimed_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = claimed_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let query = format!(
        "SELECT {MESSAGE_COLUMNS} FROM outbox_messages
         WHERE id IN ({placeholders})
         ORDER BY occurred_on_utc ASC, id ASC"
    );
    let id_params: Vec<&dyn rusqlite::ToSql> = claimed_ids
        .iter()
        .map(|id| id as &dyn rusqlite::ToSql)
        .collect();

    let mut stmt = conn.prepare(&query)?;
    let messages = stmt
        .query_map(id_params.as_slice(), map_message)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(messages)
}

fn claim_candidates(conn: &Connection, max_size: usize) -> StoreResult<Vec<(String, i64)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, version FROM outbox_messages
         WHERE status = 'pending'
         ORDER BY occurred_on_utc ASC, id ASC
         LIMIT ?1",
    )?;
    let candidates = stmt
        .query_map(params![max_size], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(candidates)
}

// ==========================================
// Finalizing
// ==========================================

/// Finalize a delivered row: `processing -> completed`.
///
/// Guarded by the claim-time version, so a worker whose lease was reclaimed
/// by the sweep (and possibly re-claimed elsewhere) cannot finalize a row it
/// no longer owns. Returns false when the guard rejects the update.
pub fn mark_completed(conn: &Connection, id: &str, version: i64, now: DateTime<Utc>) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE outbox_messages
         SET status = 'completed',
             processed_on_utc = ?2,
             processing_started_at = NULL,
             last_error = NULL,
             version = version + 1
         WHERE id = ?1 AND status = 'processing' AND version = ?3",
        params![id, now.to_rfc3339(), version],
    )?;
    Ok(affected > 0)
}

/// Requeue a failed delivery attempt: `processing -> pending`.
///
/// The row re-enters the claim pool for a later cycle; its attempt count is
/// already spent, so the budget keeps shrinking. Same version guard as
/// [`mark_completed`].
pub fn release_for_retry(conn: &Connection, id: &str, version: i64, error: &str) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE outbox_messages
         SET status = 'pending',
             processing_started_at = NULL,
             last_error = ?2,
             version = version + 1
         WHERE id = ?1 AND status = 'processing' AND version = ?3",
        params![id, error, version],
    )?;
    Ok(affected > 0)
}

/// Finalize a dead row: `processing -> failed` (terminal).
pub fn mark_failed(conn: &Connection, id: &str, version: i64, error: &str) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE outbox_messages
         SET status = 'failed',
             processing_started_at = NULL,
             last_error = ?2,
             version = version + 1
         WHERE id = ?1 AND status = 'processing' AND version = ?3",
        params![id, error, version],
    )?;
    Ok(affected > 0)
}

// ==========================================
// Recovery
// ==========================================

/// Reclaim rows stuck `processing` since before `cutoff`.
///
/// A stale row's worker crashed or hung mid-delivery. Rows with budget left
/// are released to `pending` (the claim already charged their attempt);
/// rows at or past `max_attempts` are finalized `failed` so a permanently
/// crashing handler cannot loop through reclaim forever. The two updates
/// have disjoint predicates, so each stale row is touched exactly once.
pub fn sweep_stale(
    conn: &Connection,
    cutoff: DateTime<Utc>,
    max_attempts: i32,
) -> StoreResult<SweepOutcome> {
    let cutoff = cutoff.to_rfc3339();

    let failed = conn.execute(
        "UPDATE outbox_messages
         SET status = 'failed',
             processing_started_at = NULL,
             last_error = 'processing lease expired and retry budget exhausted',
             version = version + 1
         WHERE status = 'processing' AND processing_started_at < ?1 AND attempts >= ?2",
        params![cutoff, max_attempts],
    )?;

    let released = conn.execute(
        "UPDATE outbox_messages
         SET status = 'pending',
             processing_started_at = NULL,
             version = version + 1
         WHERE status = 'processing' AND processing_started_at < ?1 AND attempts < ?2",
        params![cutoff, max_attempts],
    )?;

    Ok(SweepOutcome {
        released: released as u64,
        failed: failed as u64,
    })
}

/// Operator action: give a terminally failed row a fresh retry budget.
pub fn requeue_failed(conn: &Connection, id: &str) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE outbox_messages
         SET status = 'pending',
             attempts = 0,
             last_error = NULL,
             version = version + 1
         WHERE id = ?1 AND status = 'failed'",
        params![id],
    )?;
    Ok(affected > 0)
}

// ==========================================
// Monitoring
// ==========================================

/// Row totals per status.
pub fn count_by_status(conn: &Connection) -> StoreResult<OutboxCounts> {
    let mut stmt = conn.prepare_cached(
        "SELECT status, COUNT(*) FROM outbox_messages GROUP BY status",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = OutboxCounts::default();
    for (status, count) in rows {
        match OutboxStatus::from_str(&status) {
            Some(OutboxStatus::Pending) => counts.pending = count as u64,
            Some(OutboxStatus::Processing) => counts.processing = count as u64,
            Some(OutboxStatus::Completed) => counts.completed = count as u64,
            Some(OutboxStatus::Failed) => counts.failed = count as u64,
            None => {
                return Err(StoreError::Corrupt(format!(
                    "unknown status in outbox_messages: {status}"
                )))
            }
        }
    }
    Ok(counts)
}

/// Failed rows, oldest first, for operator tooling.
pub fn list_failed(conn: &Connection, limit: usize) -> StoreResult<Vec<OutboxMessage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM outbox_messages
         WHERE status = 'failed'
         ORDER BY occurred_on_utc ASC, id ASC
         LIMIT ?1"
    ))?;
    let messages = stmt
        .query_map(params![limit], map_message)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

// ==========================================
// Row mapping
// ==========================================

fn map_message(row: &Row) -> rusqlite::Result<OutboxMessage> {
    let status_raw: String = row.get(4)?;
    let status = OutboxStatus::from_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown outbox status: {status_raw}").into(),
        )
    })?;

    Ok(OutboxMessage {
        id: row.get(0)?,
        message_type: row.get(1)?,
        content: row.get(2)?,
        occurred_on_utc: parse_datetime(row.get::<_, String>(3)?),
        status,
        attempts: row.get(5)?,
        processing_started_at: row.get::<_, Option<String>>(6)?.map(parse_datetime),
        processed_on_utc: row.get::<_, Option<String>>(7)?.map(parse_datetime),
        last_error: row.get(8)?,
        version: row.get(9)?,
    })
}

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
