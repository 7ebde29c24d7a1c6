//! Shared fixtures for the integration tests: an in-memory API and a
//! service wired to it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_core::{
    AccountRecord, DataType, EntityPayload, LocationRecord, ReviewRecord, RunOptions, SyncEvent,
};
use beacon_db::{Database, DbConfig};
use beacon_sync::{
    ApiError, ApiResult, BusinessApiClient, ClientFactory, Page, PageRequest, SyncConfig,
    SyncService, SyncTokens,
};
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

pub const PAGE_SIZE: usize = 100;

/// Fake business API: accounts, their locations, and N reviews per location.
#[derive(Default)]
pub struct FakeApi {
    accounts: Vec<AccountRecord>,
    locations: HashMap<String, Vec<LocationRecord>>,
    review_counts: HashMap<String, usize>,
    forbidden: HashSet<String>,
    stalled: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
    stalling: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account_ref: &str) -> Self {
        self.accounts.push(AccountRecord {
            account_ref: account_ref.to_string(),
            name: format!("Account {account_ref}"),
            account_type: Some("LOCATION_GROUP".into()),
        });
        self
    }

    pub fn location(self, account_ref: &str, location_ref: &str, reviews: usize) -> Self {
        self.location_with(location(account_ref, location_ref), reviews)
    }

    pub fn location_with(mut self, location: LocationRecord, reviews: usize) -> Self {
        self.review_counts
            .insert(location.location_ref.clone(), reviews);
        self.locations
            .entry(location.account_ref.clone())
            .or_default()
            .push(location);
        self
    }

    /// Every reviews request for this location answers 403.
    pub fn forbid(mut self, location_ref: &str) -> Self {
        self.forbidden.insert(location_ref.to_string());
        self
    }

    /// Requests for this location hang until [`FakeApi::release`].
    pub fn stall(self, location_ref: &str) -> Self {
        self.stalled
            .lock()
            .unwrap()
            .insert(location_ref.to_string());
        self.stalling.store(true, Ordering::SeqCst);
        self
    }

    pub fn release(&self) {
        self.stalled.lock().unwrap().clear();
        self.stalling.store(false, Ordering::SeqCst);
    }

    /// Location refs of every data request, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl BusinessApiClient for FakeApi {
    async fn list_accounts(&self, _page_token: Option<&str>) -> ApiResult<Page<AccountRecord>> {
        Ok(Page::last(self.accounts.clone()))
    }

    async fn list_locations(
        &self,
        account_ref: &str,
        _page_token: Option<&str>,
    ) -> ApiResult<Page<LocationRecord>> {
        Ok(Page::last(
            self.locations.get(account_ref).cloned().unwrap_or_default(),
        ))
    }

    async fn fetch_page(
        &self,
        data_type: DataType,
        location_ref: &str,
        request: &PageRequest,
    ) -> ApiResult<Page<EntityPayload>> {
        self.fetched.lock().unwrap().push(location_ref.to_string());

        let stalled = self.stalling.load(Ordering::SeqCst)
            && self.stalled.lock().unwrap().contains(location_ref);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.forbidden.contains(location_ref) {
            return Err(ApiError::Status {
                status: 403,
                message: "The caller does not have permission".into(),
            });
        }
        if data_type != DataType::Reviews {
            return Ok(Page::last(Vec::new()));
        }

        let total = self.review_counts.get(location_ref).copied().unwrap_or(0);
        let start: usize = request
            .page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let end = (start + PAGE_SIZE).min(total);
        let items = (start..end).map(|n| review(location_ref, n)).collect();
        let next_page_token = (end < total).then(|| end.to_string());

        Ok(Page {
            items,
            next_page_token,
        })
    }
}

struct FakeFactory(Arc<FakeApi>);

impl ClientFactory for FakeFactory {
    fn connect(&self, access_token: &str) -> ApiResult<Arc<dyn BusinessApiClient>> {
        if access_token.is_empty() {
            return Err(ApiError::Status {
                status: 401,
                message: "missing access token".into(),
            });
        }
        Ok(self.0.clone())
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn location(account_ref: &str, location_ref: &str) -> LocationRecord {
    LocationRecord {
        location_ref: location_ref.to_string(),
        account_ref: account_ref.to_string(),
        title: format!("Store {location_ref}"),
        store_code: None,
        brand_id: None,
        address: Some("1 Main St".into()),
        phone: None,
    }
}

pub fn review(location_ref: &str, n: usize) -> EntityPayload {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    EntityPayload::Review(ReviewRecord {
        review_ref: format!("{location_ref}/reviews/{n}"),
        store_ref: location_ref.to_string(),
        reviewer_name: Some(format!("Guest {n}")),
        star_rating: Some(5),
        comment: Some("Great".into()),
        reply_comment: None,
        create_time: at,
        update_time: at,
    })
}

pub fn tokens() -> SyncTokens {
    SyncTokens {
        access_token: "test-token".into(),
        allowed_account_ids: Vec::new(),
    }
}

pub fn reviews_only() -> RunOptions {
    RunOptions {
        data_types: vec![DataType::Reviews],
        ..RunOptions::default()
    }
}

/// Service over a fresh in-memory store with millisecond backoff.
pub async fn service(api: Arc<FakeApi>) -> SyncService {
    service_with_store(api).await.0
}

/// Like [`service`], also handing back the store for direct seeding.
pub async fn service_with_store(api: Arc<FakeApi>) -> (SyncService, Database) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut config = SyncConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    let service = SyncService::new(
        db.clone(),
        Arc::new(config),
        Arc::new(FakeFactory(api)),
        CancellationToken::new(),
    );
    (service, db)
}

/// Waits for every run worker to hand its registry entry back.
pub async fn wait_idle(service: &SyncService) {
    for _ in 0..400 {
        if service.registry().active_count().await == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("sync run did not finish");
}

pub fn kinds(events: &[SyncEvent]) -> Vec<&'static str> {
    events.iter().map(SyncEvent::kind).collect()
}
