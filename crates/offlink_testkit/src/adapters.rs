//! Adapter doubles.
//!
//! - [`RecordingAdapter`] records every call and answers from a script
//! - [`MockBackend`] behaves like a tiny auth + user profile backend

use async_trait::async_trait;
use offlink_protocol::{NormalizedError, Operation, TransportRequestMeta};
use offlink_sync_engine::{Adapter, TransportResult, UploadPayload};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Which adapter method was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `query`
    Query,
    /// `mutate`
    Mutate,
    /// `upload`
    Upload,
}

/// One call seen by a [`RecordingAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Method called.
    pub kind: CallKind,
    /// Operation requested.
    pub operation: Operation,
    /// Variables sent. Uploads record the serialized payload.
    pub variables: Value,
    /// Credential attached by the auth layer.
    pub authorization: Option<String>,
}

/// Adapter that records calls and answers from a script.
///
/// Unscripted calls succeed with `{"ok": true}`. Refresh calls are answered
/// from [`script_refresh`](Self::script_refresh) and fail with 401 when
/// nothing is scripted.
#[derive(Default)]
pub struct RecordingAdapter {
    calls: Mutex<Vec<RecordedCall>>,
    responses: Mutex<HashMap<Operation, Value>>,
    failures: Mutex<VecDeque<NormalizedError>>,
    failing_variables: Mutex<Vec<(Value, NormalizedError)>>,
    required_authorization: Mutex<Option<String>>,
    refresh_results: Mutex<VecDeque<TransportResult<Value>>>,
    refreshes: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingAdapter {
    /// Creates an adapter that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Calls seen so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls seen for `operation`, in order.
    pub fn calls_for(&self, operation: Operation) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Variables of every `mutate` call, in order. Refresh calls excluded.
    pub fn mutated_variables(&self) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == CallKind::Mutate && c.operation != Operation::AuthRefresh)
            .map(|c| c.variables.clone())
            .collect()
    }

    /// Sets the success response for `operation`.
    pub fn respond_with(&self, operation: Operation, value: Value) {
        self.responses.lock().insert(operation, value);
    }

    /// The next non-refresh call fails with `error`.
    pub fn fail_next(&self, error: NormalizedError) {
        self.failures.lock().push_back(error);
    }

    /// Every call carrying exactly `variables` fails with `error`.
    pub fn fail_variables(&self, variables: Value, error: NormalizedError) {
        self.failing_variables.lock().push((variables, error));
    }

    /// Removes every scripted failure.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
        self.failing_variables.lock().clear();
    }

    /// Non-auth calls must carry `Bearer <token>` or fail with 401.
    pub fn require_token(&self, token: &str) {
        *self.required_authorization.lock() = Some(format!("Bearer {token}"));
    }

    /// Queues the answer for the next `auth.refresh` call.
    pub fn script_refresh(&self, result: TransportResult<Value>) {
        self.refresh_results.lock().push_back(result);
    }

    /// Number of `auth.refresh` calls received.
    pub fn refresh_calls(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(
        &self,
        kind: CallKind,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.calls.lock().push(RecordedCall {
            kind,
            operation,
            variables: variables.clone(),
            authorization: meta.authorization.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if operation == Operation::AuthRefresh {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            let scripted = self.refresh_results.lock().pop_front();
            return scripted.unwrap_or_else(|| Err(NormalizedError::unauthorized("refresh rejected")));
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let matched = self
            .failing_variables
            .lock()
            .iter()
            .find(|(v, _)| *v == variables)
            .map(|(_, e)| e.clone());
        if let Some(error) = matched {
            return Err(error);
        }
        if !operation.is_auth_flow() {
            let required = self.required_authorization.lock().clone();
            if required.is_some() && meta.authorization != required {
                return Err(NormalizedError::unauthorized("token expired"));
            }
        }
        Ok(self
            .responses
            .lock()
            .get(&operation)
            .cloned()
            .unwrap_or_else(|| json!({"ok": true})))
    }
}

#[async_trait]
impl Adapter for RecordingAdapter {
    async fn query(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.answer(CallKind::Query, operation, variables, meta).await
    }

    async fn mutate(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.answer(CallKind::Mutate, operation, variables, meta).await
    }

    async fn upload(
        &self,
        operation: Operation,
        payload: UploadPayload,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        let variables = serde_json::to_value(&payload)?;
        self.answer(CallKind::Upload, operation, variables, meta).await
    }
}

struct BackendState {
    user: Map<String, Value>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    issued: u64,
}

impl BackendState {
    fn issue(&mut self, prefix: &str) -> String {
        self.issued += 1;
        format!("mock_{prefix}_{}", self.issued)
    }
}

/// In-memory backend with login, refresh and a single user profile.
///
/// Protected operations require `Bearer <current access token>`.
pub struct MockBackend {
    state: Mutex<BackendState>,
    latency: Option<Duration>,
}

impl MockBackend {
    /// Creates a backend with the default user `u_1` and no session.
    pub fn new() -> Self {
        let mut user = Map::new();
        user.insert("id".into(), json!("u_1"));
        user.insert("name".into(), json!("Test User"));
        user.insert("email".into(), json!("test@example.com"));
        Self {
            state: Mutex::new(BackendState {
                user,
                access_token: None,
                refresh_token: None,
                issued: 0,
            }),
            latency: None,
        }
    }

    /// Every call sleeps for `latency` first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the stored user record.
    pub fn user(&self) -> Value {
        Value::Object(self.state.lock().user.clone())
    }

    /// Invalidates the current access token, as if it expired.
    pub fn expire_access_token(&self) {
        let mut state = self.state.lock();
        let stale = state.issue("expired");
        state.access_token = Some(stale);
    }

    /// Invalidates the current refresh token.
    pub fn revoke_refresh_token(&self) {
        self.state.lock().refresh_token = None;
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn require_auth(&self, meta: &TransportRequestMeta) -> TransportResult<()> {
        let state = self.state.lock();
        let expected = state.access_token.as_ref().map(|t| format!("Bearer {t}"));
        if expected.is_none() || meta.authorization != expected {
            return Err(NormalizedError::unauthorized("Unauthorized"));
        }
        Ok(())
    }

    fn login(&self, variables: &Value) -> TransportResult<Value> {
        let email = variables.get("email").and_then(Value::as_str).unwrap_or_default();
        let password = variables.get("password").and_then(Value::as_str).unwrap_or_default();
        if email.is_empty() || password.is_empty() {
            return Err(NormalizedError::new("AUTH_INVALID_PAYLOAD", "Invalid login payload").with_status(400));
        }

        let mut state = self.state.lock();
        let access = state.issue("access");
        let refresh = state.issue("refresh");
        state.access_token = Some(access.clone());
        state.refresh_token = Some(refresh.clone());
        Ok(json!({
            "accessToken": access,
            "refreshToken": refresh,
            "user": {"id": state.user["id"].clone(), "email": email},
        }))
    }

    fn refresh(&self, variables: &Value) -> TransportResult<Value> {
        let presented = variables.get("refreshToken").and_then(Value::as_str);
        let mut state = self.state.lock();
        match (presented, state.refresh_token.as_deref()) {
            (None, _) => Err(NormalizedError::new("AUTH_NO_REFRESH", "No refresh token").with_status(401)),
            (Some(p), Some(current)) if p == current => {
                let token = state.issue("access");
                state.access_token = Some(token.clone());
                Ok(json!({ "token": token }))
            }
            _ => Err(NormalizedError::new("AUTH_REFRESH_REVOKED", "Refresh token revoked").with_status(401)),
        }
    }

    fn unknown(kind: &str, operation: Operation) -> NormalizedError {
        NormalizedError::new(
            "MOCK_UNKNOWN_OPERATION",
            format!("Mock: unknown {kind} op \"{operation}\""),
        )
        .with_status(400)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MockBackend {
    async fn query(
        &self,
        operation: Operation,
        _variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.pause().await;
        match operation {
            Operation::UserMe => {
                self.require_auth(meta)?;
                Ok(self.user())
            }
            other => Err(Self::unknown("query", other)),
        }
    }

    async fn mutate(
        &self,
        operation: Operation,
        variables: Value,
        meta: &TransportRequestMeta,
    ) -> TransportResult<Value> {
        self.pause().await;
        match operation {
            Operation::AuthLogin => self.login(&variables),
            Operation::AuthRefresh => self.refresh(&variables),
            Operation::UserUpdateProfile => {
                self.require_auth(meta)?;
                let mut state = self.state.lock();
                if let Value::Object(patch) = variables {
                    state.user.extend(patch);
                }
                Ok(Value::Object(state.user.clone()))
            }
            other => Err(Self::unknown("mutate", other)),
        }
    }
}
