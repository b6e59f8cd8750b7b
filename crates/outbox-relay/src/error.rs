//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] outbox_store::StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Processor already running
    #[error("Processor already running")]
    AlreadyRunning,
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;

/// Error returned by a message handler.
///
/// The variant decides what happens to the claimed row: `Malformed` fails
/// it permanently on the spot, `Delivery` sends it back through the retry
/// budget.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The payload cannot be understood; retrying will never help
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Delivery failed for a reason that may clear up
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Malformed(e.to_string())
    }
}

impl From<reqwest::Error> for HandlerError {
    fn from(e: reqwest::Error) -> Self {
        HandlerError::Delivery(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_malformed() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: HandlerError = json_err.into();
        assert!(matches!(err, HandlerError::Malformed(_)));
    }

    #[test]
    fn test_store_error_converts() {
        let store_err = outbox_store::StoreError::Connection("down".to_string());
        let err: RelayError = store_err.into();
        assert!(matches!(err, RelayError::Store(_)));
    }
}
