mod common;

use std::sync::Arc;

use beacon_core::{ErrorCategory, SyncEvent, SyncStatus};
use beacon_sync::{SyncError, SyncTokens};
use common::{kinds, reviews_only, service, tokens, wait_idle, FakeApi};

#[tokio::test]
async fn one_forbidden_location_still_completes() {
    let api = Arc::new(
        FakeApi::new()
            .account("accounts/1")
            .location("accounts/1", "locations/A", 150)
            .location("accounts/1", "locations/B", 10)
            .forbid("locations/B"),
    );
    let service = service(api.clone()).await;

    let stream = service.start("owner-1", tokens(), reviews_only()).await.unwrap();
    let run_id = stream.run_id.clone();
    let events = stream.events.collect_all().await;

    let kinds = kinds(&events);
    assert_eq!(kinds.last(), Some(&"complete"));
    assert_eq!(kinds.iter().filter(|k| **k == "complete" || **k == "failed").count(), 1);
    assert!(kinds.contains(&"errors"));
    assert!(kinds.contains(&"warnings"));

    let Some(SyncEvent::Complete { progress, errors, .. }) = events.last() else {
        panic!("last event was not complete");
    };
    assert_eq!(progress.percentage, 100);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::Api);
    assert_eq!(errors[0].context_entity.as_deref(), Some("locations/B"));

    wait_idle(&service).await;
    let run = service.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, SyncStatus::Completed);
    assert_eq!(run.checkpoints.len(), 1);
    assert_eq!(run.checkpoints[0].location_ref, "locations/A");
    assert_eq!(run.checkpoints[0].records_processed, 150);

    let stats = service.statistics().await.unwrap();
    assert_eq!(stats.accounts, 1);
    assert_eq!(stats.locations, 2);
    assert_eq!(stats.reviews, 150);
}

#[tokio::test]
async fn progress_is_monotonic_and_events_serialize_with_type_tag() {
    let mut api = FakeApi::new().account("accounts/1").account("accounts/2");
    for i in 0..4 {
        api = api.location("accounts/1", &format!("locations/1-{i}"), 20);
        api = api.location("accounts/2", &format!("locations/2-{i}"), 5);
    }
    let service = service(Arc::new(api)).await;

    let stream = service.start("owner-1", tokens(), reviews_only()).await.unwrap();
    let events = stream.events.collect_all().await;

    let percentages: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Progress { progress, .. } | SyncEvent::Complete { progress, .. } => {
                Some(progress.percentage)
            }
            _ => None,
        })
        .collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
    assert_eq!(percentages.last(), Some(&100));

    for event in &events {
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert!(json["runId"].is_string());
    }
}

#[tokio::test]
async fn rerunning_a_sync_updates_in_place() {
    let api = Arc::new(
        FakeApi::new()
            .account("accounts/1")
            .location("accounts/1", "locations/A", 30),
    );
    let service = service(api).await;

    for _ in 0..2 {
        let stream = service.start("owner-1", tokens(), reviews_only()).await.unwrap();
        stream.events.collect_all().await;
        wait_idle(&service).await;
    }

    let stats = service.statistics().await.unwrap();
    assert_eq!(stats.reviews, 30);
    assert_eq!(stats.locations, 1);
}

#[tokio::test]
async fn allow_list_limits_accounts() {
    let api = Arc::new(
        FakeApi::new()
            .account("accounts/1")
            .account("accounts/2")
            .location("accounts/1", "locations/A", 3)
            .location("accounts/2", "locations/B", 3),
    );
    let service = service(api.clone()).await;

    let scoped = SyncTokens {
        access_token: "t".into(),
        allowed_account_ids: vec!["2".into()],
    };
    let stream = service.start("owner-1", scoped, reviews_only()).await.unwrap();
    stream.events.collect_all().await;
    wait_idle(&service).await;

    assert_eq!(api.fetched(), vec!["locations/B".to_string()]);
    assert_eq!(service.statistics().await.unwrap().accounts, 1);
}

#[tokio::test]
async fn rejected_credentials_fail_before_a_run_exists() {
    let service = service(Arc::new(FakeApi::new())).await;

    let err = service
        .start("owner-1", SyncTokens::default(), reviews_only())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::Api(_)));
    assert_eq!(service.registry().active_count().await, 0);
}
