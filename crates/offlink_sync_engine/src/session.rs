//! Session termination.

use crate::credentials::CredentialStore;
use crate::invalidation::CacheClient;
use crate::queue::OfflineQueue;
use crate::refresh::SessionHook;
use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

/// Tears down everything tied to the signed-in identity.
///
/// Used both for explicit logout and as the refresh coordinator's
/// unrecoverable-failure callback. Pending offline writes are dropped so
/// they are never replayed under another identity.
#[derive(Clone)]
pub struct Session {
    credentials: Arc<dyn CredentialStore>,
    queue: Arc<OfflineQueue>,
    cache: Option<Arc<dyn CacheClient>>,
    access_token_key: String,
    refresh_token_key: String,
    on_logout: Option<SessionHook>,
}

impl Session {
    /// Creates a session over the given stores.
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        queue: Arc<OfflineQueue>,
        access_token_key: impl Into<String>,
        refresh_token_key: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            queue,
            cache: None,
            access_token_key: access_token_key.into(),
            refresh_token_key: refresh_token_key.into(),
            on_logout: None,
        }
    }

    /// Sets the cache to cancel and clear.
    pub fn with_cache(mut self, cache: Arc<dyn CacheClient>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the application callback run last (navigation reset and such).
    pub fn with_logout_hook(mut self, hook: SessionHook) -> Self {
        self.on_logout = Some(hook);
        self
    }

    /// Stores a freshly issued token pair, e.g. after login.
    pub fn store_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
        self.credentials.set(&self.access_token_key, access_token);
        if let Some(refresh_token) = refresh_token {
            self.credentials.set(&self.refresh_token_key, refresh_token);
        }
    }

    /// Returns true if an access token is stored.
    pub fn is_signed_in(&self) -> bool {
        self.credentials.get(&self.access_token_key).is_some()
    }

    /// Deletes credentials, cancels and clears the cache, drops pending
    /// offline writes, then runs the logout hook.
    pub async fn terminate(&self) {
        self.credentials.delete(&self.access_token_key);
        self.credentials.delete(&self.refresh_token_key);

        if let Some(cache) = &self.cache {
            cache.cancel_all().await;
            cache.clear().await;
        }

        let dropped = self.queue.len();
        self.queue.clear();
        info!(dropped, "session terminated");

        if let Some(hook) = &self.on_logout {
            hook().await;
        }
    }

    /// Wraps [`terminate`](Self::terminate) as a [`SessionHook`].
    pub fn into_hook(self) -> SessionHook {
        let session = Arc::new(self);
        Arc::new(move || {
            let session = Arc::clone(&session);
            async move { session.terminate().await }.boxed()
        })
    }
}
