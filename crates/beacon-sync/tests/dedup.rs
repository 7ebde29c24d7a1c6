mod common;

use std::sync::Arc;

use beacon_db::Database;
use beacon_sync::SyncService;
use chrono::{TimeZone, Utc};
use common::{location, reviews_only, service_with_store, tokens, wait_idle, FakeApi};

/// A synced storefront, plus an unrelated store under a second account.
fn storefront() -> FakeApi {
    let mut named = location("accounts/1", "locations/A");
    named.title = "Corner Bakery".into();
    named.store_code = Some("BAK-7".into());
    named.brand_id = Some("corner".into());

    FakeApi::new()
        .account("accounts/1")
        .account("accounts/2")
        .location_with(named, 4)
        .location("accounts/2", "locations/Z", 2)
}

/// A copy of the storefront left over from before the API assigned refs,
/// still titled with the placeholder and owning three reviews.
async fn seed_legacy_copy(db: &Database) {
    let created = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
    sqlx::query(
        r#"
        INSERT INTO locations (id, location_ref, store_code, brand_id, title, created_at, updated_at)
        VALUES ('legacy-bakery', NULL, 'BAK-7', 'corner', 'Store accounts/2', ?1, ?1)
        "#,
    )
    .bind(created)
    .execute(db.pool())
    .await
    .unwrap();

    for n in 0..3 {
        sqlx::query(
            r#"
            INSERT INTO reviews (id, location_id, store_ref, review_ref, create_time, update_time, created_at, updated_at)
            VALUES (?1, 'legacy-bakery', 'BAK-7', ?2, ?3, ?3, ?3, ?3)
            "#,
        )
        .bind(format!("legacy-review-{n}"))
        .bind(format!("legacy/reviews/{n}"))
        .bind(created)
        .execute(db.pool())
        .await
        .unwrap();
    }
}

async fn synced(api: FakeApi) -> (SyncService, Database) {
    let (service, db) = service_with_store(Arc::new(api)).await;
    let stream = service.start("owner-1", tokens(), reviews_only()).await.unwrap();
    stream.events.collect_all().await;
    wait_idle(&service).await;
    (service, db)
}

#[tokio::test]
async fn dedup_keeps_named_location_and_moves_reviews() {
    let (service, db) = synced(storefront()).await;
    seed_legacy_copy(&db).await;

    let before = service.statistics().await.unwrap();
    assert_eq!(before.locations, 3);
    assert_eq!(before.reviews, 9);

    let report = service.dedup().await.unwrap();
    assert_eq!(report.removed.get("location"), Some(&1));
    assert_eq!(report.groups, 1);

    let after = service.statistics().await.unwrap();
    assert_eq!(after.locations, 2);
    // Distinct review refs survive the merge under the winner.
    assert_eq!(after.reviews, 9);

    let (title, reviews): (String, i64) = sqlx::query_as(
        r#"
        SELECT l.title, COUNT(r.id) FROM locations l
        JOIN reviews r ON r.location_id = l.id
        WHERE l.location_ref = 'locations/A'
        GROUP BY l.id
        "#,
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(title, "Corner Bakery");
    assert_eq!(reviews, 7);
}

#[tokio::test]
async fn second_dedup_pass_removes_nothing() {
    let (service, db) = synced(storefront()).await;
    seed_legacy_copy(&db).await;

    service.dedup().await.unwrap();
    let settled = service.statistics().await.unwrap();

    let second = service.dedup().await.unwrap();
    assert_eq!(second.groups, 0);
    assert_eq!(second.total_removed(), 0);
    assert_eq!(service.statistics().await.unwrap(), settled);
}

#[tokio::test]
async fn stores_with_their_own_refs_are_never_merged() {
    let mut twin = location("accounts/2", "locations/A2");
    twin.title = "Store accounts/2".into();
    twin.store_code = Some("BAK-7".into());
    twin.brand_id = Some("corner".into());
    let (service, _db) = synced(storefront().location_with(twin, 3)).await;

    let report = service.dedup().await.unwrap();
    assert_eq!(report.total_removed(), 0);
    assert_eq!(service.statistics().await.unwrap().locations, 3);
}
