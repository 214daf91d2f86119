//! Owned lifecycle object wiring every component together.

use crate::adapter::Adapter;
use crate::config::EngineConfig;
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::error::QueueResult;
use crate::invalidation::{CacheClient, TagMap};
use crate::network::{Connectivity, NetworkMode, NetworkObserver};
use crate::queue::{JsonlQueueStore, OfflineQueue};
use crate::refresh::{AuthAdapter, EndpointRefresh, RefreshCoordinator, SessionHook, TokenRefresh};
use crate::session::Session;
use crate::state::{ReplayReport, SyncEngine};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Builder for [`OfflineCore`].
pub struct OfflineCoreBuilder {
    adapter: Arc<dyn Adapter>,
    config: EngineConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    cache: Option<Arc<dyn CacheClient>>,
    tag_maps: Vec<TagMap>,
    logout_hook: Option<SessionHook>,
    refresher: Option<Arc<dyn TokenRefresh>>,
}

impl OfflineCoreBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the credential store. Defaults to an in-memory store.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the query cache invalidated on replay and cleared on logout.
    pub fn cache(mut self, cache: Arc<dyn CacheClient>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Adds a feature's tag map.
    pub fn tag_map(mut self, map: TagMap) -> Self {
        self.tag_maps.push(map);
        self
    }

    /// Sets the application callback run at the end of session termination.
    pub fn on_logout(mut self, hook: SessionHook) -> Self {
        self.logout_hook = Some(hook);
        self
    }

    /// Replaces the default `auth.refresh` exchange.
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresh>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Wires the core. Fails only if the persisted queue cannot be read.
    pub fn build(self) -> QueueResult<OfflineCore> {
        let queue = Arc::new(match &self.config.queue_path {
            Some(path) => OfflineQueue::open(JsonlQueueStore::open(path)?)?,
            None => OfflineQueue::in_memory(),
        });
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let connectivity = Connectivity::new();

        let mut session = Session::new(
            Arc::clone(&credentials),
            Arc::clone(&queue),
            &self.config.access_token_key,
            &self.config.refresh_token_key,
        );
        if let Some(cache) = &self.cache {
            session = session.with_cache(Arc::clone(cache));
        }
        if let Some(hook) = self.logout_hook {
            session = session.with_logout_hook(hook);
        }

        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&credentials),
            connectivity.clone(),
            self.refresher.unwrap_or_else(|| Arc::new(EndpointRefresh)),
            &self.config.access_token_key,
            &self.config.refresh_token_key,
        ));
        coordinator.set_session_hook(session.clone().into_hook());

        let authed = Arc::new(AuthAdapter::new(self.adapter, Arc::clone(&coordinator)));
        let transport = Arc::new(Transport::new(authed, Arc::clone(&queue)));
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&transport),
            self.config.replay_policy,
        ));
        if let Some(cache) = self.cache {
            sync.register_cache(cache, self.tag_maps);
        } else {
            sync.set_tag_maps(self.tag_maps);
        }
        let observer = Arc::new(NetworkObserver::new(
            connectivity,
            Arc::clone(&transport),
            Arc::clone(&sync),
        ));

        debug!(pending = queue.len(), "offline core ready");
        Ok(OfflineCore {
            config: self.config,
            queue,
            credentials,
            coordinator,
            session,
            transport,
            sync,
            observer,
        })
    }
}

/// The offline transport core.
///
/// Owns the connectivity flag, the offline queue and the refresh state.
/// Dropping it tears them all down; tests build a fresh one each.
pub struct OfflineCore {
    config: EngineConfig,
    queue: Arc<OfflineQueue>,
    credentials: Arc<dyn CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    session: Session,
    transport: Arc<Transport>,
    sync: Arc<SyncEngine>,
    observer: Arc<NetworkObserver>,
}

impl OfflineCore {
    /// Starts building a core around `adapter`.
    pub fn builder(adapter: Arc<dyn Adapter>) -> OfflineCoreBuilder {
        OfflineCoreBuilder {
            adapter,
            config: EngineConfig::default(),
            credentials: None,
            cache: None,
            tag_maps: Vec::new(),
            logout_hook: None,
            refresher: None,
        }
    }

    /// The transport facade features call.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// The replay engine.
    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// The network observer.
    pub fn observer(&self) -> &Arc<NetworkObserver> {
        &self.observer
    }

    /// The offline queue.
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// The credential store.
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// The refresh coordinator.
    pub fn refresh_coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// The session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The configuration the core was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Swaps the protocol adapter. The new adapter gets the same auth
    /// handling; queued writes are kept.
    pub fn set_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.transport
            .set_transport(Arc::new(AuthAdapter::new(adapter, Arc::clone(&self.coordinator))));
    }

    /// Applies a connectivity reading. See [`NetworkObserver::set_offline`].
    pub fn set_offline(&self, offline: bool) -> Option<JoinHandle<ReplayReport>> {
        self.observer.set_offline(offline)
    }

    /// Returns true if the device is offline.
    pub fn is_offline(&self) -> bool {
        self.observer.is_offline()
    }

    /// Fetch mode for the query cache.
    pub fn network_mode(&self) -> NetworkMode {
        self.observer.network_mode()
    }

    /// Explicit user logout. Shares a run with any refresh-triggered
    /// termination in progress.
    pub async fn logout(&self) {
        self.coordinator.terminate_session().await;
    }
}
