use std::sync::Arc;
use std::time::Duration;

use hyperdrive_common::{
    Capability, ErrorKind, ProviderHealth, ProviderId, ReadConsistency, ReplicationPolicy,
    RetryPolicy,
};
use hyperdrive_replication::{Holon, HolonManager, HolonType};
use hyperdrive_test_fixtures::{holon_manager, holon_registry, ScriptedHolonProvider};
use tokio_test::{assert_err, assert_ok};

fn fast_retry() -> ReplicationPolicy {
    ReplicationPolicy::default().with_retry(
        RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
    )
}

fn provider(id: &str) -> Arc<ScriptedHolonProvider> {
    Arc::new(ScriptedHolonProvider::new(id))
}

#[tokio::test]
async fn test_failing_provider_reported_when_floor_met() {
    let a = provider("a");
    let b = Arc::new(ScriptedHolonProvider::new("b").failing(ErrorKind::Timeout));
    // B ranks first so it is tried before A fills the floor.
    let manager = holon_manager(&[(b.clone(), 0), (a.clone(), 1)]).await;

    let outcome = assert_ok!(
        manager
            .save(Holon::new(HolonType::Avatar, "ada"), &fast_retry())
            .await
    );
    let keys: Vec<_> = outcome.holon.provider_keys().keys().cloned().collect();
    assert_eq!(keys, vec![ProviderId::from("a")]);
    assert_eq!(outcome.written_to, vec![ProviderId::from("a")]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].provider_id, ProviderId::from("b"));
    assert_eq!(outcome.failures[0].kind, ErrorKind::Timeout);
    assert_eq!(outcome.failures[0].attempts, 3);
    assert_eq!(b.save_calls(), 3);
}

#[tokio::test]
async fn test_floor_not_met_is_partial_failure() {
    let a = provider("a");
    let b = Arc::new(ScriptedHolonProvider::new("b").failing(ErrorKind::ProviderUnavailable));
    let manager = holon_manager(&[(a.clone(), 0), (b, 1)]).await;
    let holon = Holon::new(HolonType::Document, "ledger");
    let id = holon.id;

    let err = assert_err!(manager.save(holon, &fast_retry().with_min_success(2)).await);
    assert_eq!(err.kind, ErrorKind::PartialFailure);
    assert_eq!(err.failures.len(), 1);

    // The successful replica is still recorded.
    let entry = manager.directory_entry(&id).unwrap();
    assert!(entry.provider_keys.contains_key(&ProviderId::from("a")));
    assert_eq!(a.save_calls(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let a = Arc::new(ScriptedHolonProvider::new("a").failing_times(2, ErrorKind::ProviderUnavailable));
    let manager = holon_manager(&[(a.clone(), 0)]).await;

    let outcome = manager
        .save(Holon::new(HolonType::Quest, "q1"), &fast_retry())
        .await
        .unwrap();
    assert!(outcome.failures.is_empty());
    assert_eq!(a.save_calls(), 3);
}

#[tokio::test]
async fn test_validation_failure_is_not_retried() {
    let a = Arc::new(ScriptedHolonProvider::new("a").failing(ErrorKind::Validation));
    let manager = holon_manager(&[(a.clone(), 0)]).await;

    let err = manager
        .save(Holon::new(HolonType::Quest, "q1"), &fast_retry())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PartialFailure);
    assert_eq!(a.save_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out() {
    let slow = Arc::new(ScriptedHolonProvider::new("slow").with_delay(Duration::from_secs(30)));
    let fast = provider("fast");
    let manager = holon_manager(&[(slow.clone(), 0), (fast, 1)]).await;
    let policy = ReplicationPolicy::default()
        .with_retry(RetryPolicy::no_retry())
        .with_attempt_timeout(Duration::from_millis(200));

    let outcome = manager
        .save(Holon::new(HolonType::Park, "central"), &policy)
        .await
        .unwrap();
    assert_eq!(outcome.written_to, vec![ProviderId::from("fast")]);
    assert_eq!(outcome.failures[0].kind, ErrorKind::Timeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_keep_every_key() {
    let a = Arc::new(ScriptedHolonProvider::new("a").with_delay(Duration::from_millis(5)));
    let b = Arc::new(ScriptedHolonProvider::new("b").with_delay(Duration::from_millis(5)));
    let manager = Arc::new(holon_manager(&[(a, 0), (b, 1)]).await);
    let holon = Holon::new(HolonType::Zome, "shared");
    let id = holon.id;

    let writes = (0..8).map(|i| {
        let manager = Arc::clone(&manager);
        let holon = holon.clone().with_metadata("writer", i.to_string());
        // Alternate floors so writes land on different provider sets.
        let policy = fast_retry().with_min_success(1 + (i % 2));
        tokio::spawn(async move { manager.save(holon, &policy).await })
    });
    for result in futures::future::join_all(writes).await {
        result.unwrap().unwrap();
    }

    let entry = manager.directory_entry(&id).unwrap();
    assert_eq!(entry.version, 8);
    assert_eq!(entry.provider_keys.len(), 2);
}

#[tokio::test]
async fn test_repeated_failures_degrade_provider() {
    let flaky = Arc::new(ScriptedHolonProvider::new("flaky").failing(ErrorKind::ProviderUnavailable));
    let steady = provider("steady");
    let manager = holon_manager(&[(flaky.clone(), 0), (steady, 1)]).await;
    let policy = fast_retry().with_retry(RetryPolicy::no_retry());

    manager
        .save(Holon::new(HolonType::Holon, "one"), &policy)
        .await
        .unwrap();
    let health = manager.registry().get(&ProviderId::from("flaky")).await.unwrap().health;
    assert_eq!(health, ProviderHealth::Degraded);

    // Degraded providers are skipped by the router.
    let calls = flaky.save_calls();
    manager
        .save(Holon::new(HolonType::Holon, "two"), &policy)
        .await
        .unwrap();
    assert_eq!(flaky.save_calls(), calls);

    // A successful probe restores it.
    flaky.set_failure(None);
    let probed = manager.registry().probe_degraded().await;
    assert_eq!(probed, vec![(ProviderId::from("flaky"), ProviderHealth::Active)]);
}

#[tokio::test]
async fn test_load_fails_over_to_next_replica() {
    let a = provider("a");
    let b = provider("b");
    let manager = holon_manager(&[(a.clone(), 0), (b.clone(), 1)]).await;
    let saved = manager
        .save(Holon::new(HolonType::Mission, "m"), &fast_retry().with_min_success(2))
        .await
        .unwrap();

    a.set_failure(Some(ErrorKind::ProviderUnavailable));
    let loaded = manager.load(saved.holon.id, &fast_retry()).await.unwrap();
    assert_eq!(loaded.served_by, ProviderId::from("b"));
    assert_eq!(loaded.holon.name, "m");
    assert_eq!(loaded.failures.len(), 1);
}

#[tokio::test]
async fn test_highest_version_read_reports_skew() {
    let lagging = Arc::new(ScriptedHolonProvider::new("lagging").lagging());
    let fresh = provider("fresh");
    let manager = holon_manager(&[(lagging.clone(), 0), (fresh.clone(), 1)]).await;
    let both = fast_retry().with_min_success(2);

    let first = manager
        .save(Holon::new(HolonType::Document, "draft"), &both)
        .await
        .unwrap();
    let second = manager.save(first.holon, &both).await.unwrap();
    assert_eq!(second.holon.version(), 2);

    let first_success = manager.load(second.holon.id, &fast_retry()).await.unwrap();
    assert_eq!(first_success.served_by, ProviderId::from("lagging"));
    assert_eq!(first_success.holon.version(), 1);
    assert!(!first_success.is_consistent());

    let policy = fast_retry().with_read_consistency(ReadConsistency::HighestVersion);
    let newest = manager.load(second.holon.id, &policy).await.unwrap();
    assert_eq!(newest.served_by, ProviderId::from("fresh"));
    assert_eq!(newest.holon.version(), 2);
    assert_eq!(newest.skew.len(), 1);
    assert_eq!(newest.skew[0].provider_id, ProviderId::from("lagging"));
    assert_eq!(newest.skew[0].returned_version, 1);
}

#[tokio::test]
async fn test_providers_without_capability_are_skipped() {
    let registry = holon_registry(&[(provider("full"), 1)]).await;
    let read_only = provider("read-only");
    registry
        .register(read_only.clone(), [Capability::LoadHolon], 0)
        .await
        .unwrap();
    let manager = HolonManager::new(registry);

    let outcome = manager
        .save(Holon::new(HolonType::Holon, "x"), &fast_retry())
        .await
        .unwrap();
    assert_eq!(outcome.written_to, vec![ProviderId::from("full")]);
    assert_eq!(read_only.save_calls(), 0);
}

#[tokio::test]
async fn test_delete_then_purge() {
    let a = provider("a");
    let b = provider("b");
    let manager = holon_manager(&[(a.clone(), 0), (b.clone(), 1)]).await;
    let both = fast_retry().with_min_success(2);
    let saved = manager
        .save(Holon::new(HolonType::Avatar, "bye"), &both)
        .await
        .unwrap();
    let id = saved.holon.id;

    let deleted = manager.delete(id, &both).await.unwrap();
    assert!(deleted.holon.is_deleted());
    assert_eq!(assert_err!(manager.load(id, &both).await).kind, ErrorKind::Deleted);
    assert_eq!(
        assert_err!(manager.save(saved.holon.clone(), &both).await).kind,
        ErrorKind::Deleted
    );

    let purged = manager.purge(id, &both).await.unwrap();
    assert_eq!(purged.removed_from.len(), 2);
    assert!(manager.directory_entry(&id).is_none());
    assert_eq!(a.delete_calls(), 1);
    assert_eq!(b.delete_calls(), 1);
}

#[tokio::test]
async fn test_restarted_engine_reads_stored_holons() {
    let a = provider("a");
    let b = provider("b");
    let first = holon_manager(&[(a.clone(), 0), (b.clone(), 1)]).await;
    let both = fast_retry().with_min_success(2);
    let saved = first
        .save(Holon::new(HolonType::Document, "charter"), &both)
        .await
        .unwrap();
    let id = saved.holon.id;

    // Same providers, empty directory.
    let restarted = HolonManager::new(Arc::clone(first.registry()));
    let loaded = assert_ok!(restarted.load(id, &fast_retry()).await);
    assert_eq!(loaded.served_by, ProviderId::from("a"));
    assert_eq!(loaded.holon.name, "charter");
    assert_eq!(a.locate_calls(), 1);
    assert_eq!(b.locate_calls(), 1);

    let deleted = assert_ok!(restarted.delete(id, &both).await);
    assert_eq!(deleted.holon.version(), 2);
    assert_eq!(deleted.written_to.len(), 2);
    assert_eq!(
        assert_err!(first.load(id, &fast_retry()).await).kind,
        ErrorKind::Deleted
    );
}

#[tokio::test]
async fn test_unknown_id_with_unreachable_provider_is_not_reported_missing() {
    let a = Arc::new(ScriptedHolonProvider::new("a").failing(ErrorKind::ProviderUnavailable));
    let manager = holon_manager(&[(a, 0)]).await;

    let err = assert_err!(manager.load(uuid::Uuid::new_v4(), &fast_retry()).await);
    assert_eq!(err.kind, ErrorKind::NoProviderAvailable);
    assert_eq!(err.failures.len(), 1);
}
