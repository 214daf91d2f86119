//! Offline-aware transport facade.
//!
//! The single API every feature uses. Online, calls go verbatim to the
//! active [`Adapter`]. Offline, reads fail fast with `NETWORK_OFFLINE` and
//! writes are captured in the [`OfflineQueue`] instead of failing.

use crate::adapter::{Adapter, MutationOutcome, Subscription, SubscriptionHandler, UploadPayload};
use crate::error::TransportResult;
use crate::queue::OfflineQueue;
use offlink_protocol::{NormalizedError, Operation, QueuedMutation, TransportRequestMeta};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// The transport facade.
pub struct Transport {
    adapter: RwLock<Arc<dyn Adapter>>,
    offline: AtomicBool,
    queue: Arc<OfflineQueue>,
}

impl Transport {
    /// Creates a facade over `adapter`, queueing offline writes in `queue`.
    /// Starts online.
    pub fn new(adapter: Arc<dyn Adapter>, queue: Arc<OfflineQueue>) -> Self {
        Self {
            adapter: RwLock::new(adapter),
            offline: AtomicBool::new(false),
            queue,
        }
    }

    /// Swaps the active adapter. Queued writes are untouched.
    pub fn set_transport(&self, adapter: Arc<dyn Adapter>) {
        *self.adapter.write() = adapter;
        debug!("transport adapter swapped");
    }

    /// Sets the offline gate. Driven by the network observer.
    pub fn set_offline_mode(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns the offline gate.
    pub fn is_offline_mode(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Returns the offline queue.
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    fn active(&self) -> Arc<dyn Adapter> {
        self.adapter.read().clone()
    }

    /// Performs a read. Fails with `NETWORK_OFFLINE` while offline without
    /// reaching the adapter.
    pub async fn query(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        if self.is_offline_mode() {
            debug!(operation = %operation, "query rejected while offline");
            return Err(NormalizedError::offline("query"));
        }
        self.active().query(operation, variables, meta).await
    }

    /// Performs a read and decodes the response.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<T> {
        let value = self.query(operation, variables, meta).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Performs a write. While offline the write is queued with the tags
    /// from `meta` and this resolves with [`MutationOutcome::Queued`].
    pub async fn mutate(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<MutationOutcome> {
        if self.is_offline_mode() {
            let entry = self.queue.push(operation, variables, meta.tag_list());
            return Ok(MutationOutcome::Queued { id: entry.id });
        }
        self.active()
            .mutate(operation, variables, meta)
            .await
            .map(MutationOutcome::Delivered)
    }

    /// Subscribes to a channel. While offline nothing is subscribed and the
    /// returned handle is a no-op.
    pub fn subscribe(
        &self,
        channel: &str,
        handler: SubscriptionHandler,
        meta: &TransportRequestMeta,
    ) -> Subscription {
        if self.is_offline_mode() {
            debug!(channel, "subscribe skipped while offline");
            return Subscription::noop();
        }
        self.active().subscribe(channel, handler, meta)
    }

    /// Uploads a file. Queued like [`mutate`](Self::mutate) while offline.
    pub async fn upload(
        &self,
        operation: Operation,
        payload: UploadPayload,
        meta: &TransportRequestMeta,
    ) -> TransportResult<MutationOutcome> {
        if self.is_offline_mode() {
            let variables = serde_json::to_value(&payload)?;
            let entry = self.queue.push(operation, variables, meta.tag_list());
            return Ok(MutationOutcome::Queued { id: entry.id });
        }
        self.active()
            .upload(operation, payload, meta)
            .await
            .map(MutationOutcome::Delivered)
    }

    /// Re-submits a queued write through the active adapter.
    ///
    /// Unlike `mutate`, this never re-enqueues: if the gate closed again
    /// mid-replay it fails with `NETWORK_OFFLINE` so the entry keeps its
    /// place in the queue.
    pub(crate) async fn replay(&self, entry: &QueuedMutation) -> TransportResult<Value> {
        if self.is_offline_mode() {
            return Err(NormalizedError::offline("replay"));
        }
        self.active()
            .mutate(entry.operation, entry.variables.clone(), &TransportRequestMeta::default())
            .await
    }
}
