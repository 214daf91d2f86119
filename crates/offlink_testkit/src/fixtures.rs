//! Test fixtures.
//!
//! Feature tag maps mirroring a typical app, and [`TestCore`], a fully
//! wired core over recording doubles.

use crate::adapters::RecordingAdapter;
use crate::cache::RecordingCacheClient;
use futures::FutureExt;
use offlink_protocol::{by_id_key, list_key, CacheKey};
use offlink_sync_engine::{
    CredentialStore, EngineConfig, MemoryCredentialStore, OfflineCore, ReplayReport, TagMap,
};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Tags contributed by the user feature.
pub fn user_tag_map() -> TagMap {
    TagMap::new()
        .with_key("user:me", || by_id_key("user", "profile", "me"))
        .with_key("user:profiles", || CacheKey::new(["user", "profile"]))
        .with_key("user:list", || list_key("user", "profile", None))
}

/// Tags contributed by the auth feature. `user:me` overlaps on purpose.
pub fn auth_tag_map() -> TagMap {
    TagMap::new()
        .with_key("auth:me", || CacheKey::new(["auth", "me"]))
        .with_key("auth:session", || CacheKey::new(["auth", "session"]))
        .with_key("user:me", || by_id_key("user", "profile", "me"))
}

/// A core wired to a [`RecordingAdapter`], a [`RecordingCacheClient`] and
/// both feature tag maps.
pub struct TestCore {
    /// The core under test.
    pub core: OfflineCore,
    /// Raw adapter behind the auth layer.
    pub adapter: Arc<RecordingAdapter>,
    /// Cache the core invalidates and clears.
    pub cache: Arc<RecordingCacheClient>,
    /// Credential store.
    pub credentials: Arc<MemoryCredentialStore>,
    /// Number of times the logout hook ran.
    pub logouts: Arc<AtomicUsize>,
    _temp_dir: Option<TempDir>,
}

impl TestCore {
    /// Builds a core with an in-memory queue.
    pub fn new() -> Self {
        Self::with_adapter(Arc::new(RecordingAdapter::new()))
    }

    /// Builds a core around `adapter`.
    pub fn with_adapter(adapter: Arc<RecordingAdapter>) -> Self {
        Self::build(adapter, EngineConfig::default(), None)
    }

    /// Builds a core with `config`.
    pub fn with_config(adapter: Arc<RecordingAdapter>, config: EngineConfig) -> Self {
        Self::build(adapter, config, None)
    }

    /// Builds a core whose queue is persisted in a temporary directory.
    pub fn persistent(adapter: Arc<RecordingAdapter>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = EngineConfig::default().with_queue_path(dir.path().join("queue.jsonl"));
        Self::build(adapter, config, Some(dir))
    }

    fn build(adapter: Arc<RecordingAdapter>, config: EngineConfig, dir: Option<TempDir>) -> Self {
        let cache = Arc::new(RecordingCacheClient::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let logouts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&logouts);

        let core = OfflineCore::builder(adapter.clone())
            .config(config)
            .credentials(credentials.clone())
            .cache(cache.clone())
            .tag_map(user_tag_map())
            .tag_map(auth_tag_map())
            .on_logout(Arc::new(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            }))
            .build()
            .expect("Failed to build offline core");

        Self {
            core,
            adapter,
            cache,
            credentials,
            logouts,
            _temp_dir: dir,
        }
    }

    /// Stores a token pair as if the user had logged in.
    pub fn sign_in(&self, access_token: &str, refresh_token: &str) {
        self.core
            .session()
            .store_tokens(access_token, Some(refresh_token));
    }

    /// Current access token.
    pub fn access_token(&self) -> Option<String> {
        self.credentials.get(&self.core.config().access_token_key)
    }

    /// Number of logout hook runs.
    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Flips offline.
    pub fn go_offline(&self) {
        self.core.set_offline(true);
    }

    /// Flips online and waits for the replay it triggers.
    pub async fn go_online(&self) -> Option<ReplayReport> {
        let replay = self.core.set_offline(false)?;
        Some(replay.await.expect("replay task panicked"))
    }
}

impl Default for TestCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestCore {
    type Target = OfflineCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}
