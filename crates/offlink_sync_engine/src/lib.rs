//! # Offlink Sync Engine
//!
//! Offline-aware transport core.
//!
//! This crate provides:
//! - `Transport`, the facade features call for reads, writes, subscriptions
//!   and uploads
//! - `OfflineQueue`, the FIFO queue capturing writes made while offline
//! - `SyncEngine`, which replays the queue on reconnect
//! - Tag-based cache invalidation (`TagMap`, `invalidate_by_tags`)
//! - `RefreshCoordinator` and `AuthAdapter` for single-flight token refresh
//! - `NetworkObserver`, the only writer of the connectivity flag
//!
//! ## Architecture
//!
//! ```text
//! platform signal → NetworkObserver → Transport gate → listeners → SyncEngine
//!                                         │
//!                     features → Transport → AuthAdapter → Adapter
//!                                         └─ offline → OfflineQueue
//! ```
//!
//! ## Key Invariants
//!
//! - Offline reads fail with `NETWORK_OFFLINE`; offline writes are queued
//! - Queue replay is strictly FIFO and stops at the first failure
//! - At most one replay pass and one refresh request run at a time
//! - A replayed entry is removed only after its tags were invalidated
//! - Callers only ever see `NormalizedError`

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Library code propagates errors instead of panicking
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod adapter;
mod config;
mod credentials;
mod error;
mod invalidation;
mod lifecycle;
mod network;
mod queue;
mod refresh;
mod session;
mod state;
mod transport;

#[cfg(test)]
mod test_helpers;

pub use adapter::{Adapter, MutationOutcome, Subscription, SubscriptionHandler, UploadPayload};
pub use config::{EngineConfig, ReplayPolicy, DEFAULT_ACCESS_TOKEN_KEY, DEFAULT_REFRESH_TOKEN_KEY};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use error::{QueueError, QueueResult, TransportResult};
pub use invalidation::{invalidate_by_tags, resolve_keys, CacheClient, KeyError, KeyGetter, TagMap};
pub use lifecycle::{OfflineCore, OfflineCoreBuilder};
pub use network::{Connectivity, ListenerHandle, NetworkListener, NetworkMode, NetworkObserver};
pub use queue::{JsonlQueueStore, MemoryQueueStore, OfflineQueue, QueueStore};
pub use refresh::{AuthAdapter, Credentials, EndpointRefresh, RefreshCoordinator, SessionHook, TokenRefresh};
pub use session::Session;
pub use state::{ReplayReport, SyncEngine, SyncState, SyncStats};
pub use transport::Transport;

pub use offlink_protocol::{NormalizedError, Operation, QueuedMutation, Tag, TransportRequestMeta};
