//! Handler trait and per-type registry.

use crate::HandlerError;
use async_trait::async_trait;
use outbox_store::OutboxMessage;
use std::collections::HashMap;
use std::sync::Arc;

/// A delivery destination for outbox messages.
///
/// One handler serves one message type (or several, if registered under
/// each). Handlers must be idempotent: a crash between delivery and the
/// completion record means the same message is delivered again later.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Deliver one message.
    ///
    /// Return [`HandlerError::Malformed`] when the payload itself is the
    /// problem and [`HandlerError::Delivery`] when the attempt failed for
    /// a reason that may clear up.
    async fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError>;
}

/// Maps message types to their handlers.
///
/// Built once at startup and handed to the processor; registration is not
/// supported while the relay is running.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a message type, replacing any existing one.
    pub fn register(&mut self, message_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(message_type.into(), handler);
    }

    /// Look up the handler for a message type.
    pub fn get(&self, message_type: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(message_type)
    }

    /// Whether a handler is registered for the given type.
    pub fn contains(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    /// Registered message types, sorted for stable logging.
    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry has no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
