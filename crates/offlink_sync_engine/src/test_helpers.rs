//! Shared fakes for unit tests.

use crate::adapter::Adapter;
use crate::error::TransportResult;
use crate::invalidation::CacheClient;
use async_trait::async_trait;
use offlink_protocol::{CacheKey, NormalizedError, Operation, TransportRequestMeta};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Query,
    Mutate,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub kind: CallKind,
    pub operation: Operation,
    pub variables: Value,
}

impl Call {
    pub fn query(operation: Operation, variables: Value) -> Self {
        Self {
            kind: CallKind::Query,
            operation,
            variables,
        }
    }

    pub fn mutate(operation: Operation, variables: Value) -> Self {
        Self {
            kind: CallKind::Mutate,
            operation,
            variables,
        }
    }
}

/// Adapter that records every call and answers from a script.
#[derive(Default)]
pub(crate) struct ScriptedAdapter {
    calls: Mutex<Vec<Call>>,
    authorizations: Mutex<Vec<Option<String>>>,
    failures: Mutex<VecDeque<NormalizedError>>,
    failing_variables: Mutex<Vec<(Value, NormalizedError)>>,
    response: Mutex<Option<Value>>,
    accepted_token: Mutex<Option<String>>,
    refresh_results: Mutex<VecDeque<TransportResult<Value>>>,
    refreshes: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.authorizations.lock().clone()
    }

    /// The next call (of any kind) fails with `error`.
    pub fn fail_next(&self, error: NormalizedError) {
        self.failures.lock().push_back(error);
    }

    /// Every call carrying exactly `variables` fails with `error`.
    pub fn fail_variables(&self, variables: Value, error: NormalizedError) {
        self.failing_variables.lock().push((variables, error));
    }

    pub fn respond_with(&self, value: Value) {
        *self.response.lock() = Some(value);
    }

    /// Non-auth calls must carry `Bearer <token>` or fail with 401.
    pub fn accept_token(&self, token: &str) {
        *self.accepted_token.lock() = Some(format!("Bearer {token}"));
    }

    /// Queues the answer for the next `auth.refresh` call.
    pub fn script_refresh(&self, result: TransportResult<Value>) {
        self.refresh_results.lock().push_back(result);
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

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
        self.calls.lock().push(Call {
            kind,
            operation,
            variables: variables.clone(),
        });
        self.authorizations.lock().push(meta.authorization.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if operation == Operation::AuthRefresh {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            return self
                .refresh_results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(NormalizedError::unauthorized("no refresh scripted")));
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        if let Some((_, error)) = self
            .failing_variables
            .lock()
            .iter()
            .find(|(v, _)| *v == variables)
        {
            return Err(error.clone());
        }
        if !operation.is_auth_flow() {
            if let Some(expected) = self.accepted_token.lock().as_ref() {
                if meta.authorization.as_ref() != Some(expected) {
                    return Err(NormalizedError::unauthorized("token expired"));
                }
            }
        }
        Ok(self
            .response
            .lock()
            .clone()
            .unwrap_or_else(|| json!({"ok": true})))
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
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
}

/// Cache client that records what it was asked to do.
#[derive(Default)]
pub(crate) struct RecordingCache {
    invalidated: Mutex<Vec<CacheKey>>,
    events: Mutex<Vec<&'static str>>,
}

impl RecordingCache {
    pub fn invalidated(&self) -> Vec<CacheKey> {
        self.invalidated.lock().clone()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl CacheClient for RecordingCache {
    async fn invalidate(&self, key: &CacheKey) {
        self.invalidated.lock().push(key.clone());
        self.record("invalidate");
    }

    async fn cancel_all(&self) {
        self.record("cancel_all");
    }

    async fn clear(&self) {
        self.record("clear");
    }
}
