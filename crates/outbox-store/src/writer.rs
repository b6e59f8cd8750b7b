//! Outbox writer: append an event row inside the caller's transaction.
//!
//! Taking [`rusqlite::Transaction`] rather than a bare connection makes the
//! contract a compile-time property: the row commits if and only if the
//! business mutation sharing the transaction commits, so no event is ever
//! recorded for a rolled-back write and no committed write loses its event.

use crate::{queries, NewOutboxMessage, StoreResult};
use rusqlite::Transaction;
use tracing::debug;
use uuid::Uuid;

/// Append an outbox message to the open transaction. Returns the new row id.
///
/// No delivery happens here; the relay picks the row up after commit.
pub fn append(tx: &Transaction<'_>, message: &NewOutboxMessage) -> StoreResult<String> {
    let id = Uuid::new_v4().to_string();
    queries::insert_message(tx, &id, message)?;
    debug!(
        id = %id,
        message_type = %message.message_type,
        "Appended outbox message"
    );
    Ok(id)
}
