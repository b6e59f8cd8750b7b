//! HTTP forwarding handler.

use crate::{Handler, HandlerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_store::OutboxMessage;
use reqwest::Client;
use serde::Serialize;
use serde_json::value::RawValue;
use std::time::Duration;
use tracing::debug;

/// JSON body POSTed to the receiving endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForwardEnvelope<'a> {
    id: &'a str,
    message_type: &'a str,
    content: &'a RawValue,
    occurred_on_utc: DateTime<Utc>,
}

/// Handler that forwards messages to an HTTP endpoint.
///
/// Each delivery is a single POST; retry pacing belongs to the relay's
/// attempt budget, not this handler. The stored payload is embedded in the
/// request body as raw JSON rather than a quoted string.
pub struct HttpForwarder {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpForwarder {
    /// Create a forwarder for the given endpoint.
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint: endpoint.into(),
            bearer_token: None,
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// The endpoint messages are forwarded to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_envelope<'a>(message: &'a OutboxMessage) -> Result<ForwardEnvelope<'a>, HandlerError> {
        // Validates the stored payload is JSON at the same time
        let content: &RawValue = serde_json::from_str(&message.content)?;
        Ok(ForwardEnvelope {
            id: &message.id,
            message_type: &message.message_type,
            content,
            occurred_on_utc: message.occurred_on_utc,
        })
    }
}

#[async_trait]
impl Handler for HttpForwarder {
    async fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError> {
        let envelope = Self::build_envelope(message)?;

        debug!(
            endpoint = %self.endpoint,
            message_id = %message.id,
            message_type = %message.message_type,
            "Forwarding message"
        );

        let mut request = self.client.post(&self.endpoint).json(&envelope);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_client_error() {
            // The receiver rejected the message itself; a retry would only
            // be rejected again
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::Malformed(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::Delivery(format!("HTTP {status}: {body}")));
        }

        Ok(())
    }
}
