//! Replay engine state machine.
//!
//! On reconnect the engine walks the offline queue in FIFO order, re-submits
//! each write through the transport, invalidates the cache keys its tags
//! cover and only then removes it from the queue.

use crate::config::ReplayPolicy;
use crate::invalidation::{invalidate_by_tags, CacheClient, TagMap};
use crate::queue::OfflineQueue;
use crate::transport::Transport;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The current state of the replay engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No replay pass is running.
    Idle,
    /// A replay pass is draining the queue.
    Replaying,
}

impl SyncState {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Replaying)
    }
}

/// Statistics about replay passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of passes that ran to completion or aborted.
    pub passes_completed: u64,
    /// Total number of queued writes delivered.
    pub mutations_replayed: u64,
    /// Total number of failed replays.
    pub failures: u64,
    /// Last replay error message.
    pub last_error: Option<String>,
    /// When the last pass finished.
    pub last_pass_time: Option<Instant>,
}

/// Result of one `replay_offline_mutations` call.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Ids delivered and removed from the queue.
    pub replayed: Vec<String>,
    /// Ids whose replay failed. They are still queued.
    pub failed: Vec<String>,
    /// Entries left in the queue afterwards.
    pub remaining: usize,
    /// True if the pass stopped at a failure.
    pub aborted: bool,
    /// True if another pass was running and this call was folded into it.
    pub coalesced: bool,
    /// Wall time spent.
    pub duration: Duration,
}

impl ReplayReport {
    fn coalesced(remaining: usize) -> Self {
        Self {
            remaining,
            coalesced: true,
            ..Self::default()
        }
    }

    /// Returns true if every attempted entry was delivered.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.aborted
    }
}

/// Drains the offline queue on reconnect.
///
/// # Invariants
///
/// - At most one pass runs at a time. A call made while a pass is running
///   schedules one more pass instead of starting a concurrent one
/// - Entries are replayed in queue order
/// - An entry leaves the queue only after its replay succeeded and its
///   tags were invalidated
pub struct SyncEngine {
    transport: Arc<Transport>,
    policy: ReplayPolicy,
    cache: RwLock<Option<Arc<dyn CacheClient>>>,
    tag_maps: RwLock<Arc<[TagMap]>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    pass_lock: tokio::sync::Mutex<()>,
    rerun: AtomicBool,
}

impl SyncEngine {
    /// Creates an engine replaying through `transport`.
    pub fn new(transport: Arc<Transport>, policy: ReplayPolicy) -> Self {
        Self {
            transport,
            policy,
            cache: RwLock::new(None),
            tag_maps: RwLock::new(Arc::from(Vec::new())),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            pass_lock: tokio::sync::Mutex::new(()),
            rerun: AtomicBool::new(false),
        }
    }

    /// Registers the cache to invalidate and the tag maps to resolve
    /// against. Without both, replay skips invalidation.
    pub fn register_cache(&self, cache: Arc<dyn CacheClient>, maps: Vec<TagMap>) {
        *self.cache.write() = Some(cache);
        *self.tag_maps.write() = Arc::from(maps);
    }

    /// Replaces the tag maps.
    pub fn set_tag_maps(&self, maps: Vec<TagMap>) {
        *self.tag_maps.write() = Arc::from(maps);
    }

    /// Returns the registered cache, if any.
    pub fn cache_client(&self) -> Option<Arc<dyn CacheClient>> {
        self.cache.read().clone()
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the replay policy.
    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    fn queue(&self) -> &OfflineQueue {
        self.transport.queue()
    }

    /// Reconnect hook. Same as [`replay_offline_mutations`](Self::replay_offline_mutations).
    pub async fn on_connected(&self) -> ReplayReport {
        self.replay_offline_mutations().await
    }

    /// Replays every queued write.
    ///
    /// If a pass is already running this returns immediately with a
    /// coalesced report, and the running pass goes round once more before
    /// it releases the engine so that entries queued in the meantime are
    /// picked up.
    pub async fn replay_offline_mutations(&self) -> ReplayReport {
        // Raised before trying the lock so that the owner either sees it on
        // its post-unlock check or starts a pass whose snapshot is newer.
        self.rerun.store(true, Ordering::SeqCst);
        let Ok(mut guard) = self.pass_lock.try_lock() else {
            debug!("replay already running, coalescing");
            return ReplayReport::coalesced(self.queue().len());
        };

        let start = Instant::now();
        let mut report = ReplayReport::default();
        loop {
            while self.rerun.swap(false, Ordering::SeqCst) {
                let pass = self.run_pass().await;
                report.replayed.extend(pass.replayed);
                report.failed.extend(pass.failed);
                report.aborted = pass.aborted;
                if pass.aborted {
                    break;
                }
            }
            drop(guard);

            // A caller that lost the lock after the last check left its
            // request behind.
            if report.aborted || !self.rerun.load(Ordering::SeqCst) {
                break;
            }
            match self.pass_lock.try_lock() {
                Ok(next) => guard = next,
                // The new owner will pick the request up.
                Err(_) => break,
            }
        }

        report.remaining = self.queue().len();
        report.duration = start.elapsed();
        info!(
            replayed = report.replayed.len(),
            failed = report.failed.len(),
            remaining = report.remaining,
            "replay finished"
        );
        report
    }

    async fn run_pass(&self) -> ReplayReport {
        let _state = StateGuard::enter(self);
        let mut report = ReplayReport::default();
        let snapshot = self.queue().get_all();
        if snapshot.is_empty() {
            self.finish_pass(&report);
            return report;
        }
        debug!(pending = snapshot.len(), "replaying offline mutations");

        let cache = self.cache_client();
        let maps = self.tag_maps.read().clone();

        for entry in snapshot {
            // Cleared by a logout since the snapshot was taken.
            if !self.queue().contains(&entry.id) {
                debug!(id = %entry.id, "skipping entry dropped from the queue");
                continue;
            }
            match self.transport.replay(&entry).await {
                Ok(_) => {
                    if let Some(cache) = cache.as_deref() {
                        invalidate_by_tags(cache, entry.tags(), &maps).await;
                    }
                    if self.queue().remove(&entry.id) {
                        report.replayed.push(entry.id);
                    } else {
                        debug!(id = %entry.id, "entry dropped from the queue while in flight");
                    }
                }
                Err(e) => {
                    warn!(id = %entry.id, operation = %entry.operation, error = %e, "replay failed");
                    {
                        let mut stats = self.stats.write();
                        stats.failures += 1;
                        stats.last_error = Some(e.to_string());
                    }
                    report.failed.push(entry.id);
                    if self.policy == ReplayPolicy::StopOnFailure {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        self.finish_pass(&report);
        report
    }

    fn finish_pass(&self, report: &ReplayReport) {
        let mut stats = self.stats.write();
        stats.passes_completed += 1;
        stats.mutations_replayed += report.replayed.len() as u64;
        stats.last_pass_time = Some(Instant::now());
    }
}

/// Holds the engine in `Replaying` and returns it to `Idle` on drop, even
/// if the pass future is cancelled.
struct StateGuard<'a> {
    state: &'a RwLock<SyncState>,
}

impl<'a> StateGuard<'a> {
    fn enter(engine: &'a SyncEngine) -> Self {
        *engine.state.write() = SyncState::Replaying;
        Self {
            state: &engine.state,
        }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.state.write() = SyncState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Call, RecordingCache, ScriptedAdapter};
    use offlink_protocol::{CacheKey, NormalizedError, Operation, Tag};
    use serde_json::json;

    fn setup(policy: ReplayPolicy) -> (Arc<ScriptedAdapter>, Arc<Transport>, Arc<SyncEngine>) {
        let adapter = Arc::new(ScriptedAdapter::new());
        let transport = Arc::new(Transport::new(
            adapter.clone(),
            Arc::new(OfflineQueue::in_memory()),
        ));
        let engine = Arc::new(SyncEngine::new(Arc::clone(&transport), policy));
        (adapter, transport, engine)
    }

    fn push(transport: &Transport, n: u32) -> String {
        transport
            .queue()
            .push(Operation::UserUpdateProfile, json!({"n": n}), None)
            .id
    }

    #[tokio::test]
    async fn replays_in_fifo_order() {
        let (adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        let ids: Vec<_> = (1..=3).map(|n| push(&transport, n)).collect();

        let report = engine.replay_offline_mutations().await;
        assert_eq!(report.replayed, ids);
        assert!(report.is_clean());
        assert_eq!(report.remaining, 0);
        assert_eq!(
            adapter.calls(),
            (1..=3)
                .map(|n| Call::mutate(Operation::UserUpdateProfile, json!({"n": n})))
                .collect::<Vec<_>>()
        );
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().mutations_replayed, 3);
    }

    #[tokio::test]
    async fn stops_on_first_failure() {
        let (adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        let a = push(&transport, 1);
        let b = push(&transport, 2);
        let c = push(&transport, 3);
        adapter.fail_variables(json!({"n": 2}), NormalizedError::new("SERVER", "boom").with_status(500));

        let report = engine.replay_offline_mutations().await;
        assert_eq!(report.replayed, vec![a]);
        assert_eq!(report.failed, vec![b.clone()]);
        assert!(report.aborted);
        assert_eq!(adapter.calls().len(), 2);

        let remaining: Vec<_> = transport.queue().get_all().into_iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![b, c]);
        assert_eq!(engine.stats().failures, 1);
        assert_eq!(engine.stats().last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn skip_failed_policy_continues() {
        let (adapter, transport, engine) = setup(ReplayPolicy::SkipFailed);
        let a = push(&transport, 1);
        let b = push(&transport, 2);
        let c = push(&transport, 3);
        adapter.fail_variables(json!({"n": 2}), NormalizedError::new("SERVER", "boom"));

        let report = engine.replay_offline_mutations().await;
        assert_eq!(report.replayed, vec![a, c]);
        assert_eq!(report.failed, vec![b.clone()]);
        assert!(!report.aborted);
        assert_eq!(transport.queue().get_all()[0].id, b);
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() {
        let (adapter, _transport, engine) = setup(ReplayPolicy::StopOnFailure);
        let report = engine.replay_offline_mutations().await;
        assert!(report.replayed.is_empty());
        assert!(adapter.calls().is_empty());
        assert_eq!(engine.stats().passes_completed, 1);
    }

    #[tokio::test]
    async fn invalidates_tags_before_removal() {
        let (_adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        let cache = Arc::new(RecordingCache::default());
        let maps = vec![TagMap::new().with_key("user:me", || CacheKey::new(["user", "me"]))];
        engine.register_cache(cache.clone(), maps);

        transport.queue().push(
            Operation::UserUpdateProfile,
            json!({}),
            Some(vec![Tag::from("user:me")]),
        );
        transport.queue().push(Operation::UserUpdateProfile, json!({}), None);

        engine.replay_offline_mutations().await;
        assert_eq!(cache.invalidated(), vec![CacheKey::new(["user", "me"])]);
        assert!(transport.queue().is_empty());
    }

    #[tokio::test]
    async fn failed_entries_are_not_invalidated() {
        let (adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        let cache = Arc::new(RecordingCache::default());
        engine.register_cache(
            cache.clone(),
            vec![TagMap::new().with_key("user:me", || CacheKey::new(["user", "me"]))],
        );
        adapter.fail_next(NormalizedError::new("SERVER", "down"));
        transport.queue().push(
            Operation::UserUpdateProfile,
            json!({}),
            Some(vec![Tag::from("user:me")]),
        );

        engine.replay_offline_mutations().await;
        assert!(cache.invalidated().is_empty());
        assert_eq!(transport.queue().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_calls_coalesce() {
        let (adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        adapter.set_delay(Duration::from_millis(20));
        push(&transport, 1);
        push(&transport, 2);

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.replay_offline_mutations().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = engine.replay_offline_mutations().await;
        assert!(second.coalesced);
        assert!(second.replayed.is_empty());

        let first = first.await.unwrap();
        assert_eq!(first.replayed.len(), 2);
        assert_eq!(adapter.calls().len(), 2);
        assert_eq!(adapter.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn coalesced_call_picks_up_late_entries() {
        let (adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        adapter.set_delay(Duration::from_millis(20));
        push(&transport, 1);

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.replay_offline_mutations().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        push(&transport, 2);
        assert!(engine.replay_offline_mutations().await.coalesced);

        let first = first.await.unwrap();
        assert_eq!(first.replayed.len(), 2);
        assert!(transport.queue().is_empty());
        assert_eq!(engine.stats().passes_completed, 2);
    }

    #[tokio::test]
    async fn entries_cleared_mid_pass_are_not_sent() {
        let (adapter, transport, engine) = setup(ReplayPolicy::SkipFailed);
        adapter.set_delay(Duration::from_millis(30));
        for n in 1..=3 {
            push(&transport, n);
        }

        let pass = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.replay_offline_mutations().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.queue().clear();

        let report = pass.await.unwrap();
        assert_eq!(
            adapter.calls(),
            vec![Call::mutate(Operation::UserUpdateProfile, json!({"n": 1}))]
        );
        assert!(report.replayed.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.remaining, 0);
        assert_eq!(engine.stats().mutations_replayed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_reconnect_request_is_served() {
        let (adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        let writers: Vec<_> = (0..32)
            .map(|n| {
                let transport = Arc::clone(&transport);
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    push(&transport, n);
                    engine.replay_offline_mutations().await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        assert!(transport.queue().is_empty());
        assert_eq!(adapter.calls().len(), 32);
        assert_eq!(adapter.max_in_flight(), 1);
        assert_eq!(engine.stats().mutations_replayed, 32);
    }

    #[tokio::test]
    async fn offline_mid_pass_keeps_entries() {
        let (adapter, transport, engine) = setup(ReplayPolicy::StopOnFailure);
        push(&transport, 1);
        transport.set_offline_mode(true);

        let report = engine.replay_offline_mutations().await;
        assert!(report.aborted);
        assert_eq!(transport.queue().len(), 1);
        assert!(adapter.calls().is_empty());
    }
}
