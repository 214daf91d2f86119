//! Single-flight credential refresh.
//!
//! [`AuthAdapter`] wraps the real adapter, attaches the stored access token
//! to every call and, when a call is rejected as unauthorized, asks the
//! [`RefreshCoordinator`] for a fresh token and retries the call once.
//! However many calls fail at the same time, at most one refresh request is
//! in flight and all of them see the same outcome.

use crate::adapter::{Adapter, Subscription, SubscriptionHandler, UploadPayload};
use crate::credentials::CredentialStore;
use crate::error::TransportResult;
use crate::network::Connectivity;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use offlink_protocol::{ErrorCode, NormalizedError, Operation, TransportRequestMeta};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// A fresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// New access token.
    pub access_token: String,
    /// Rotated refresh token, if the backend issued one.
    pub refresh_token: Option<String>,
}

impl Credentials {
    /// Reads `{"token" | "accessToken", "refreshToken"?}`.
    pub fn from_response(value: &Value) -> TransportResult<Self> {
        let access_token = value
            .get("token")
            .or_else(|| value.get("accessToken"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                NormalizedError::new(
                    ErrorCode::AUTH_REFRESH_FAILED,
                    "refresh response carried no token",
                )
                .with_raw(value.clone())
            })?;
        let refresh_token = value
            .get("refreshToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        Ok(Self {
            access_token: access_token.to_string(),
            refresh_token,
        })
    }
}

/// Exchanges a refresh token for new credentials.
#[async_trait]
pub trait TokenRefresh: Send + Sync {
    /// Performs the exchange through `adapter`, the unwrapped adapter.
    async fn refresh(&self, adapter: &dyn Adapter, refresh_token: &str) -> TransportResult<Credentials>;
}

/// Calls the `auth.refresh` operation with `{"refreshToken": ...}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointRefresh;

#[async_trait]
impl TokenRefresh for EndpointRefresh {
    async fn refresh(&self, adapter: &dyn Adapter, refresh_token: &str) -> TransportResult<Credentials> {
        let meta = TransportRequestMeta::new().skip_refresh().skip_auth();
        let response = adapter
            .mutate(
                Operation::AuthRefresh,
                json!({ "refreshToken": refresh_token }),
                &meta,
            )
            .await?;
        Credentials::from_response(&response)
    }
}

/// Zero-argument callback run when the session cannot be recovered.
pub type SessionHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

type LogoutFuture = Shared<BoxFuture<'static, ()>>;

enum RefreshOutcome {
    Refreshed(String),
    /// Offline. Nothing was attempted and the session is kept.
    Skipped,
    Failed,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<Option<String>>>,
}

/// Owns the refresh-in-flight flag and its waiters.
pub struct RefreshCoordinator {
    credentials: Arc<dyn CredentialStore>,
    connectivity: Connectivity,
    refresher: Arc<dyn TokenRefresh>,
    access_token_key: String,
    refresh_token_key: String,
    on_session_end: Mutex<Option<SessionHook>>,
    state: Mutex<RefreshState>,
    logout: Mutex<Option<LogoutFuture>>,
    refreshes: AtomicU64,
}

impl RefreshCoordinator {
    /// Creates a coordinator reading and writing tokens under the given keys.
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        connectivity: Connectivity,
        refresher: Arc<dyn TokenRefresh>,
        access_token_key: impl Into<String>,
        refresh_token_key: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            connectivity,
            refresher,
            access_token_key: access_token_key.into(),
            refresh_token_key: refresh_token_key.into(),
            on_session_end: Mutex::new(None),
            state: Mutex::new(RefreshState::default()),
            logout: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Sets the callback run once per unrecoverable auth failure.
    pub fn set_session_hook(&self, hook: SessionHook) {
        *self.on_session_end.lock() = Some(hook);
    }

    /// Number of refresh requests actually sent.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Returns true while a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().in_flight
    }

    fn authorize(&self, operation: Operation, meta: &TransportRequestMeta) -> TransportRequestMeta {
        if operation.is_auth_flow() || meta.skip_auth || meta.authorization.is_some() {
            return meta.clone();
        }
        match self.credentials.get(&self.access_token_key) {
            Some(token) => meta.clone().with_authorization(bearer(&token)),
            None => meta.clone(),
        }
    }

    /// Sends `request` with the stored token, refreshing once on a 401.
    ///
    /// A failed refresh returns the caller's original error. A second
    /// rejection after refreshing is returned as is.
    async fn execute(
        &self,
        adapter: &dyn Adapter,
        operation: Operation,
        request: Request,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        let meta = self.authorize(operation, meta);
        let error = match request.send(adapter, operation, &meta).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !error.is_auth_expired() || operation.is_auth_flow() || meta.skip_refresh {
            return Err(error);
        }

        debug!(operation = %operation, "request unauthorized, refreshing credentials");
        match self.fresh_token(adapter).await {
            Some(token) => {
                let retry = meta.with_authorization(bearer(&token)).skip_refresh();
                request.send(adapter, operation, &retry).await
            }
            None => Err(error),
        }
    }

    /// Returns a fresh access token, joining the in-flight refresh if
    /// there is one.
    async fn fresh_token(&self, adapter: &dyn Adapter) -> Option<String> {
        let waiter = {
            let mut state = self.state.lock();
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };
        if let Some(rx) = waiter {
            return rx.await.ok().flatten();
        }

        let mut flight = InFlight {
            state: &self.state,
            token: None,
        };
        let outcome = self.run_refresh(adapter).await;
        if let RefreshOutcome::Refreshed(token) = &outcome {
            flight.token = Some(token.clone());
        }
        drop(flight);

        match outcome {
            RefreshOutcome::Refreshed(token) => Some(token),
            RefreshOutcome::Skipped => None,
            RefreshOutcome::Failed => {
                self.terminate_session().await;
                None
            }
        }
    }

    async fn run_refresh(&self, adapter: &dyn Adapter) -> RefreshOutcome {
        if self.connectivity.is_offline() {
            debug!("offline, refresh skipped");
            return RefreshOutcome::Skipped;
        }
        let Some(refresh_token) = self.credentials.get(&self.refresh_token_key) else {
            info!("no refresh token stored");
            return RefreshOutcome::Failed;
        };

        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.refresher.refresh(adapter, &refresh_token).await {
            Ok(credentials) => {
                self.credentials
                    .set(&self.access_token_key, &credentials.access_token);
                if let Some(next) = &credentials.refresh_token {
                    self.credentials.set(&self.refresh_token_key, next);
                }
                info!("credentials refreshed");
                RefreshOutcome::Refreshed(credentials.access_token)
            }
            Err(e) => {
                warn!(error = %e, "credential refresh failed");
                RefreshOutcome::Failed
            }
        }
    }

    /// Runs the session hook. Concurrent callers share one run.
    pub async fn terminate_session(&self) {
        let logout = {
            let mut slot = self.logout.lock();
            match slot.as_ref() {
                Some(running) => running.clone(),
                None => {
                    let Some(hook) = self.on_session_end.lock().clone() else {
                        debug!("no session hook registered");
                        return;
                    };
                    info!("terminating session");
                    let running = hook().shared();
                    *slot = Some(running.clone());
                    running
                }
            }
        };
        logout.await;

        let mut slot = self.logout.lock();
        if slot.as_ref().is_some_and(|s| s.peek().is_some()) {
            *slot = None;
        }
    }
}

/// Clears the in-flight flag and releases every waiter on drop. Waiters
/// get `None` unless a token was set, including when the refreshing call
/// is cancelled mid-flight.
struct InFlight<'a> {
    state: &'a Mutex<RefreshState>,
    token: Option<String>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let waiters = {
            let mut state = self.state.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        debug!(waiters = waiters.len(), refreshed = self.token.is_some(), "releasing refresh waiters");
        for waiter in waiters {
            let _ = waiter.send(self.token.clone());
        }
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

enum Request {
    Query(Value),
    Mutate(Value),
    Upload(UploadPayload),
}

impl Request {
    async fn send(
        &self,
        adapter: &dyn Adapter,
        operation: Operation,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        match self {
            Request::Query(variables) => adapter.query(operation, variables.clone(), meta).await,
            Request::Mutate(variables) => adapter.mutate(operation, variables.clone(), meta).await,
            Request::Upload(payload) => adapter.upload(operation, payload.clone(), meta).await,
        }
    }
}

/// Adapter decorator adding token attachment and refresh-on-401.
pub struct AuthAdapter {
    inner: Arc<dyn Adapter>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthAdapter {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn Adapter>, coordinator: Arc<RefreshCoordinator>) -> Self {
        Self { inner, coordinator }
    }

    /// Returns the wrapped adapter.
    pub fn inner(&self) -> &Arc<dyn Adapter> {
        &self.inner
    }
}

#[async_trait]
impl Adapter for AuthAdapter {
    async fn query(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.coordinator
            .execute(self.inner.as_ref(), operation, Request::Query(variables), meta)
            .await
    }

    async fn mutate(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.coordinator
            .execute(self.inner.as_ref(), operation, Request::Mutate(variables), meta)
            .await
    }

    fn subscribe(
        &self,
        channel: &str,
        handler: SubscriptionHandler,
        meta: &TransportRequestMeta,
    ) -> Subscription {
        let meta = if meta.skip_auth || meta.authorization.is_some() {
            meta.clone()
        } else {
            match self.coordinator.credentials.get(&self.coordinator.access_token_key) {
                Some(token) => meta.clone().with_authorization(bearer(&token)),
                None => meta.clone(),
            }
        };
        self.inner.subscribe(channel, handler, &meta)
    }

    async fn upload(
        &self,
        operation: Operation,
        payload: UploadPayload,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.coordinator
            .execute(self.inner.as_ref(), operation, Request::Upload(payload), meta)
            .await
    }
}
