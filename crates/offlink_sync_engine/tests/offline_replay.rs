//! Integration tests for offline queueing and replay.

use offlink_protocol::{by_id_key, CacheKey, ErrorCode, Operation, Tag, TransportRequestMeta};
use offlink_sync_engine::{EngineConfig, NormalizedError, ReplayPolicy, SyncState};
use offlink_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn profile(n: u32) -> Value {
    json!({ "name": format!("v{n}") })
}

#[tokio::test]
async fn offline_writes_are_queued_and_replayed_in_order() {
    init_tracing();
    let t = TestCore::new();
    t.go_offline();

    let meta = TransportRequestMeta::new().with_tag("user:me");
    for n in 1..=3 {
        let outcome = t
            .transport()
            .mutate(Operation::UserUpdateProfile, profile(n), &meta)
            .await
            .unwrap();
        assert!(outcome.is_queued());
    }
    assert!(t.adapter.calls().is_empty());
    assert_eq!(t.queue().len(), 3);

    let report = t.go_online().await.unwrap();
    assert_eq!(report.replayed.len(), 3);
    assert!(report.is_clean());
    assert_eq!(
        t.adapter.mutated_variables(),
        vec![profile(1), profile(2), profile(3)]
    );
    assert!(t.queue().is_empty());
    assert_eq!(t.sync_engine().state(), SyncState::Idle);
}

#[tokio::test]
async fn offline_query_fails_without_reaching_adapter() {
    let t = TestCore::new();
    t.go_offline();

    let err = t
        .transport()
        .query(Operation::UserMe, Value::Null, &TransportRequestMeta::default())
        .await
        .unwrap_err();
    assert!(err.has_code(ErrorCode::NETWORK_OFFLINE));
    assert!(t.adapter.calls().is_empty());
}

#[tokio::test]
async fn replay_stops_at_first_failure() {
    let t = TestCore::new();
    t.adapter
        .fail_variables(profile(2), NormalizedError::new("SERVER", "unavailable").with_status(503));
    t.go_offline();
    for n in 1..=3 {
        t.transport()
            .mutate(Operation::UserUpdateProfile, profile(n), &TransportRequestMeta::default())
            .await
            .unwrap();
    }

    let report = t.go_online().await.unwrap();
    assert!(report.aborted);
    assert_eq!(report.replayed.len(), 1);
    assert_eq!(report.remaining, 2);
    assert_eq!(t.adapter.mutated_variables(), vec![profile(1), profile(2)]);

    let left: Vec<Value> = t.queue().get_all().into_iter().map(|e| e.variables).collect();
    assert_eq!(left, vec![profile(2), profile(3)]);

    // Next reconnect picks up where the last one stopped.
    t.adapter.clear_failures();
    t.go_offline();
    let report = t.go_online().await.unwrap();
    assert_eq!(report.replayed.len(), 2);
    assert_eq!(
        t.adapter.mutated_variables(),
        vec![profile(1), profile(2), profile(2), profile(3)]
    );
}

#[tokio::test]
async fn skip_failed_policy_drains_the_rest() {
    let adapter = Arc::new(RecordingAdapter::new());
    let t = TestCore::with_config(
        adapter,
        EngineConfig::default().with_replay_policy(ReplayPolicy::SkipFailed),
    );
    t.adapter.fail_variables(profile(1), NormalizedError::new("SERVER", "boom"));
    t.go_offline();
    for n in 1..=3 {
        t.transport()
            .mutate(Operation::UserUpdateProfile, profile(n), &TransportRequestMeta::default())
            .await
            .unwrap();
    }

    let report = t.go_online().await.unwrap();
    assert_eq!(report.replayed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(t.queue().get_all()[0].variables, profile(1));
}

#[tokio::test]
async fn replay_invalidates_tags_once_per_key() {
    let t = TestCore::new();
    t.go_offline();
    let meta = TransportRequestMeta::new().with_tags(["user:me", "auth:me", "unmapped:tag"]);
    t.transport()
        .mutate(Operation::UserUpdateProfile, profile(1), &meta)
        .await
        .unwrap();

    t.go_online().await.unwrap();
    assert_eq!(
        t.cache.invalidated(),
        vec![by_id_key("user", "profile", "me"), CacheKey::new(["auth", "me"])]
    );
}

#[tokio::test]
async fn untagged_writes_invalidate_nothing() {
    let t = TestCore::new();
    t.go_offline();
    t.transport()
        .mutate(Operation::UserUpdateProfile, profile(1), &TransportRequestMeta::default())
        .await
        .unwrap();

    t.go_online().await.unwrap();
    assert!(t.cache.invalidated().is_empty());
}

#[tokio::test]
async fn offline_upload_is_replayed_as_mutation() {
    let t = TestCore::new();
    t.go_offline();
    t.transport()
        .upload(
            Operation::UserUploadAvatar,
            offlink_sync_engine::UploadPayload::new("file://avatar.png"),
            &TransportRequestMeta::new().with_tag("user:me"),
        )
        .await
        .unwrap();

    t.go_online().await.unwrap();
    let calls = t.adapter.calls_for(Operation::UserUploadAvatar);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, CallKind::Mutate);
    assert_eq!(calls[0].variables["file"], "file://avatar.png");
}

#[tokio::test]
async fn rapid_reconnects_never_double_submit() {
    let adapter = Arc::new(RecordingAdapter::new().with_delay(Duration::from_millis(10)));
    let t = TestCore::with_adapter(adapter);
    t.go_offline();
    for n in 1..=3 {
        t.transport()
            .mutate(Operation::UserUpdateProfile, profile(n), &TransportRequestMeta::default())
            .await
            .unwrap();
    }

    let first = t.core.set_offline(false).unwrap();
    let second = tokio::spawn({
        let sync = Arc::clone(t.sync_engine());
        async move { sync.replay_offline_mutations().await }
    });
    let third = t.sync_engine().replay_offline_mutations().await;

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    let replayed = first.replayed.len() + second.replayed.len() + third.replayed.len();
    assert_eq!(replayed, 3);
    assert_eq!(t.adapter.mutated_variables(), vec![profile(1), profile(2), profile(3)]);
    assert_eq!(t.adapter.max_in_flight(), 1);
    assert!(t.queue().is_empty());
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EngineConfig::default().with_queue_path(dir.path().join("pending.jsonl"));

    {
        let t = TestCore::with_config(Arc::new(RecordingAdapter::new()), config.clone());
        t.go_offline();
        let meta = TransportRequestMeta::new().with_tag("user:me");
        for n in 1..=2 {
            t.transport()
                .mutate(Operation::UserUpdateProfile, profile(n), &meta)
                .await
                .unwrap();
        }
    }

    let t = TestCore::with_config(Arc::new(RecordingAdapter::new()), config);
    let pending = t.queue().get_all();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].tags(), &[Tag::from("user:me")]);

    let report = t.sync_engine().replay_offline_mutations().await;
    assert_eq!(report.replayed.len(), 2);
    assert_eq!(t.adapter.mutated_variables(), vec![profile(1), profile(2)]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn replay_preserves_submission_order(batch in mutation_batch_strategy(8)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let t = TestCore::new();
            t.go_offline();
            for (operation, variables, tags) in &batch {
                let meta = TransportRequestMeta::new().with_tags(tags.clone().unwrap_or_default());
                let outcome = t.transport().mutate(*operation, variables.clone(), &meta).await.unwrap();
                prop_assert!(outcome.is_queued());
            }

            let report = t.go_online().await.unwrap();
            prop_assert_eq!(report.replayed.len(), batch.len());

            let sent: Vec<_> = t
                .adapter
                .calls()
                .into_iter()
                .map(|c| (c.operation, c.variables))
                .collect();
            let expected: Vec<_> = batch.iter().map(|(o, v, _)| (*o, v.clone())).collect();
            prop_assert_eq!(sent, expected);
            Ok(())
        })?;
    }
}
