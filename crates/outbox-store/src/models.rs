//! Model types for outbox rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of an outbox message.
///
/// `Pending` is the initial state; `Completed` and `Failed` are terminal.
/// Rows move between states only along the edges accepted by
/// [`can_transition_to`](OutboxStatus::can_transition_to); every mutation in
/// [`crate::queries`] guards its UPDATE with the expected source state so an
/// illegal edge affects zero rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for OutboxStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored form. Unknown text is `None`, never coerced to a
    /// live state (a corrupt row must not re-enter the claim pool).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal edge of the lifecycle.
    ///
    /// Legal edges: claim (`Pending -> Processing`), finalize
    /// (`Processing -> Completed | Failed`), requeue and stale reclaim
    /// (`Processing -> Pending`), and operator requeue
    /// (`Failed -> Pending`).
    pub fn can_transition_to(self, next: OutboxStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Pending)
                | (Self::Processing, Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Terminal states are never claimed again without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One outbox row: a domain event recorded alongside the business mutation
/// that produced it, awaiting relay to its consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    /// Discriminator used to resolve a handler; immutable.
    pub message_type: String,
    /// Serialized payload; opaque to the relay, immutable.
    pub content: String,
    /// When the event was produced; claim order follows this.
    pub occurred_on_utc: DateTime<Utc>,
    pub status: OutboxStatus,
    /// Delivery attempts begun (incremented on claim).
    pub attempts: i32,
    /// Set while a worker holds the row; non-null iff `Processing`.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Set on successful delivery; non-null iff `Completed`.
    pub processed_on_utc: Option<DateTime<Utc>>,
    /// Last failure description.
    pub last_error: Option<String>,
    /// Bumped on every status transition; guards conditional updates.
    pub version: i64,
}

/// New outbox message for insertion.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub message_type: String,
    pub content: String,
    pub occurred_on_utc: DateTime<Utc>,
}

impl NewOutboxMessage {
    pub fn new(
        message_type: impl Into<String>,
        content: impl Into<String>,
        occurred_on_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            content: content.into(),
            occurred_on_utc,
        }
    }
}

/// Per-status row totals, for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// What one recovery sweep did with stale rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Stale rows released back to `Pending`.
    pub released: u64,
    /// Stale rows finalized `Failed` because their retry budget was spent.
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Completed,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_status_rejects_unknown_text() {
        assert_eq!(OutboxStatus::from_str("sent"), None);
        assert_eq!(OutboxStatus::from_str(""), None);
        assert_eq!(OutboxStatus::from_str("garbage"), None);
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(OutboxStatus::from_str("Pending"), Some(OutboxStatus::Pending));
        assert_eq!(OutboxStatus::from_str("PROCESSING"), Some(OutboxStatus::Processing));
    }

    #[test]
    fn test_transition_table() {
        use OutboxStatus::*;

        let legal = [
            (Pending, Processing),
            (Processing, Completed),
            (Processing, Pending),
            (Processing, Failed),
            (Failed, Pending),
        ];

        for from in [Pending, Processing, Completed, Failed] {
            for to in [Pending, Processing, Completed, Failed] {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn test_completed_is_terminal() {
        assert!(OutboxStatus::Completed.is_terminal());
        assert!(OutboxStatus::Failed.is_terminal());
        assert!(!OutboxStatus::Pending.is_terminal());
        assert!(!OutboxStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&OutboxStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
