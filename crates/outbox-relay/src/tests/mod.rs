//! Integration tests for the outbox relay.
//!
//! Test organization:
//!
//! - `harness.rs`        - In-memory store fixture and scripted handlers
//! - `lifecycle.rs`      - End-to-end delivery and processor start/stop
//! - `retry.rs`          - Attempt budgets and permanent failure
//! - `crash_recovery.rs` - Stale claim recovery after a worker dies
//! - `ordering.rs`       - Oldest-first claiming and batch limits
//! - `timeout.rs`        - Handler timeout enforcement
//! - `concurrency.rs`    - Competing relays on one database
//! - `invariants.rs`     - Cross-cutting state machine invariants

mod invariants;
mod ordering;
