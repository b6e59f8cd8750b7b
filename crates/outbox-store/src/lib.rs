//! SQLite-backed storage for the transactional outbox.
//!
//! Producers append messages to the `outbox_messages` table inside the same
//! transaction as their business writes, so a message exists if and only if
//! the change it announces was committed. The relay later claims pending
//! rows, delivers them, and records the outcome. All state transitions go
//! through conditional updates keyed on `(status, version)`, which keeps a
//! single row from being delivered by two workers at once even when several
//! relay processes share the database file.
//!
//! Two facades wrap the same query layer:
//!
//! - [`OutboxStore`]: synchronous, `Mutex<Connection>`, for producers and
//!   CLI tooling.
//! - [`AsyncOutboxStore`]: a dedicated SQLite thread behind a channel, for
//!   the relay's async runtime.
//!
//! Appending from inside an existing transaction goes through
//! [`writer::append`], which both facades' `with_transaction` methods hand
//! the transaction to.

mod error;
mod executor;
pub mod migrations;
mod models;
pub mod queries;
mod store;
pub mod writer;

pub use error::{StoreError, StoreResult};
pub use executor::AsyncOutboxStore;
pub use migrations::run_migrations;
pub use models::{
    NewOutboxMessage, OutboxCounts, OutboxMessage, OutboxStatus, SweepOutcome,
};
pub use store::OutboxStore;
