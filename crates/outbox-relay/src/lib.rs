//! Polling relay that drains the transactional outbox.
//!
//! The relay claims pending rows from the `outbox_messages` table, invokes
//! the registered handler for each message's type, and records the outcome.
//! Producers only ever append; the relay owns every other transition.
//!
//! # Core Invariants
//!
//! 1. **Exactly-One Claimer**: a pending row is moved to `processing` by a
//!    conditional update, so concurrent relays never share a claim
//! 2. **Terminal Rows Stay Terminal**: `completed` and `failed` rows never
//!    re-enter the pool; requeueing a failed row is an explicit operator call
//! 3. **Bounded Attempts**: a message is tried at most `max_attempts` times,
//!    and attempts lost to a crash count against the budget
//! 4. **Crash-Safe**: claims abandoned by a dead relay are swept back to
//!    `pending` once they exceed the stale threshold
//!
//! # Architecture
//!
//! ```text
//! outbox_messages --claim--> OutboxProcessor --dispatch--> Handler
//!        ^                                                   |
//!        |___________ requeue / recovery sweep <_____________|
//! ```

pub mod claim;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod handler;
pub mod processor;
pub mod recovery;

#[cfg(test)]
mod tests;

pub use claim::ClaimManager;
pub use config::RelayConfig;
pub use dispatch::{Dispatcher, Disposition};
pub use error::{HandlerError, RelayError, RelayResult};
pub use forward::HttpForwarder;
pub use handler::{Handler, HandlerRegistry};
pub use processor::{CycleStats, OutboxProcessor};
pub use recovery::RecoverySweep;
