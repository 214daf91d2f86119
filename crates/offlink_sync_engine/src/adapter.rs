//! Adapter contract for protocol implementations.

use crate::error::TransportResult;
use async_trait::async_trait;
use offlink_protocol::{ErrorCode, NormalizedError, Operation, TransportRequestMeta};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Callback invoked for every message on a subscribed channel.
pub type SubscriptionHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A protocol implementation behind the transport facade.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (REST, GraphQL, WebSocket, an in-memory mock for
/// development). Implementations must return [`NormalizedError`]s only,
/// converting their native failures with `offlink_protocol::normalize_error`.
/// Timeouts and retries belong here, not in the facade.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Performs a read.
    async fn query(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value>;

    /// Performs a write.
    async fn mutate(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value>;

    /// Subscribes to a channel. Protocols without push support keep the
    /// default, which never calls the handler.
    fn subscribe(
        &self,
        _channel: &str,
        _handler: SubscriptionHandler,
        _meta: &TransportRequestMeta,
    ) -> Subscription {
        Subscription::noop()
    }

    /// Uploads a file.
    async fn upload(
        &self,
        operation: Operation,
        _payload: UploadPayload,
        _meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        Err(NormalizedError::new(
            ErrorCode::NOT_IMPLEMENTED,
            format!("upload is not implemented for {operation}"),
        )
        .with_status(400))
    }
}

/// File upload body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
    /// File descriptor understood by the adapter (URI, base64 body, ...).
    pub file: Value,
    /// Extra form fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl UploadPayload {
    /// Creates a payload for a file.
    pub fn new(file: impl Into<Value>) -> Self {
        Self {
            file: file.into(),
            extra: Map::new(),
        }
    }

    /// Adds an extra form field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}

/// Handle returned by `subscribe`. Consuming it with
/// [`unsubscribe`](Subscription::unsubscribe) stops delivery.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps a cancellation callback.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that was never established.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Returns true if unsubscribing will do something.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Stops delivery.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Result of a write through the facade.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The adapter accepted the write and returned this response.
    Delivered(Value),
    /// The write was captured in the offline queue.
    Queued {
        /// Queue entry id.
        id: String,
    },
}

impl MutationOutcome {
    /// Returns true if the write was queued.
    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::Queued { .. })
    }

    /// Returns the adapter response, if delivered.
    pub fn response(&self) -> Option<&Value> {
        match self {
            MutationOutcome::Delivered(v) => Some(v),
            MutationOutcome::Queued { .. } => None,
        }
    }

    /// Flattens to JSON. A queued write becomes `{"offline": true, "queued": true}`.
    pub fn into_value(self) -> Value {
        match self {
            MutationOutcome::Delivered(v) => v,
            MutationOutcome::Queued { .. } => json!({"offline": true, "queued": true}),
        }
    }
}
