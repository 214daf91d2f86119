//! Cache client double.

use async_trait::async_trait;
use offlink_protocol::CacheKey;
use offlink_sync_engine::CacheClient;
use parking_lot::Mutex;

/// Something the core asked the cache to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// `invalidate(key)`
    Invalidate(CacheKey),
    /// `cancel_all()`
    CancelAll,
    /// `clear()`
    Clear,
}

/// Records every call in order.
#[derive(Debug, Default)]
pub struct RecordingCacheClient {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingCacheClient {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far.
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    /// Keys invalidated so far, in order, duplicates included.
    pub fn invalidated(&self) -> Vec<CacheKey> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CacheEvent::Invalidate(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `clear()` calls.
    pub fn clears(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| **e == CacheEvent::Clear)
            .count()
    }

    /// Forgets everything recorded.
    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl CacheClient for RecordingCacheClient {
    async fn invalidate(&self, key: &CacheKey) {
        self.events.lock().push(CacheEvent::Invalidate(key.clone()));
    }

    async fn cancel_all(&self) {
        self.events.lock().push(CacheEvent::CancelAll);
    }

    async fn clear(&self) {
        self.events.lock().push(CacheEvent::Clear);
    }
}
