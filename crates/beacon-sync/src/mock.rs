//! Scripted in-memory `BusinessApiClient` for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_core::{AccountRecord, DataType, EntityPayload, LocationRecord, ReviewRecord};
use chrono::{TimeZone, Utc};

use crate::client::{
    ApiError, ApiResult, BusinessApiClient, ClientFactory, Page, PageRequest,
};

type UnitKey = (DataType, String);

enum Scripted {
    Always(ApiError),
    Times(ApiError, usize),
}

#[derive(Default)]
pub struct MockApiClient {
    accounts: Vec<AccountRecord>,
    account_failure: Option<ApiError>,
    locations: HashMap<String, Vec<LocationRecord>>,
    location_failures: HashMap<String, ApiError>,
    pages: HashMap<UnitKey, Vec<Vec<EntityPayload>>>,
    unit_failures: Mutex<HashMap<UnitKey, Scripted>>,
    rejected_fields: HashMap<UnitKey, String>,
    requests: Mutex<Vec<(DataType, String, PageRequest)>>,
}

impl MockApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account_ref: &str) -> Self {
        self.accounts.push(AccountRecord {
            account_ref: account_ref.to_string(),
            name: format!("Account {account_ref}"),
            account_type: None,
        });
        self
    }

    pub fn with_location(mut self, account_ref: &str, location_ref: &str) -> Self {
        self.locations
            .entry(account_ref.to_string())
            .or_default()
            .push(location(account_ref, location_ref));
        self
    }

    pub fn with_pages(
        mut self,
        data_type: DataType,
        location_ref: &str,
        pages: Vec<Vec<EntityPayload>>,
    ) -> Self {
        self.pages.insert((data_type, location_ref.to_string()), pages);
        self
    }

    /// Every call for `data_type` at this location fails with `error`.
    pub fn failing_unit(self, data_type: DataType, location_ref: &str, error: ApiError) -> Self {
        self.script(data_type, location_ref, Scripted::Always(error))
    }

    /// The next `times` calls fail, later ones succeed.
    pub fn fail_times(
        self,
        data_type: DataType,
        location_ref: &str,
        error: ApiError,
        times: usize,
    ) -> Self {
        self.script(data_type, location_ref, Scripted::Times(error, times))
    }

    fn script(self, data_type: DataType, location_ref: &str, scripted: Scripted) -> Self {
        self.unit_failures
            .lock()
            .unwrap()
            .insert((data_type, location_ref.to_string()), scripted);
        self
    }

    pub fn failing_accounts(mut self, error: ApiError) -> Self {
        self.account_failure = Some(error);
        self
    }

    pub fn failing_locations(mut self, account_ref: &str, error: ApiError) -> Self {
        self.location_failures.insert(account_ref.to_string(), error);
        self
    }

    /// 400 "unsupported field" until the request omits `field`.
    pub fn rejecting_field(mut self, data_type: DataType, location_ref: &str, field: &str) -> Self {
        self.rejected_fields
            .insert((data_type, location_ref.to_string()), field.to_string());
        self
    }

    pub fn requests(&self) -> Vec<(DataType, String, PageRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn into_factory(self) -> Arc<dyn ClientFactory> {
        factory(Arc::new(self))
    }

    fn next_failure(&self, key: &UnitKey) -> Option<ApiError> {
        let mut failures = self.unit_failures.lock().unwrap();
        match failures.get_mut(key)? {
            Scripted::Always(error) => Some(error.clone()),
            Scripted::Times(_, 0) => None,
            Scripted::Times(error, remaining) => {
                *remaining -= 1;
                Some(error.clone())
            }
        }
    }
}

fn page_index(token: Option<&str>) -> usize {
    token
        .and_then(|t| t.strip_prefix("page-"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl BusinessApiClient for MockApiClient {
    async fn list_accounts(&self, _page_token: Option<&str>) -> ApiResult<Page<AccountRecord>> {
        if let Some(error) = &self.account_failure {
            return Err(error.clone());
        }
        Ok(Page::last(self.accounts.clone()))
    }

    async fn list_locations(
        &self,
        account_ref: &str,
        _page_token: Option<&str>,
    ) -> ApiResult<Page<LocationRecord>> {
        if let Some(error) = self.location_failures.get(account_ref) {
            return Err(error.clone());
        }
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
        self.requests
            .lock()
            .unwrap()
            .push((data_type, location_ref.to_string(), request.clone()));

        let key = (data_type, location_ref.to_string());
        if let Some(error) = self.next_failure(&key) {
            return Err(error);
        }
        if let Some(field) = self.rejected_fields.get(&key) {
            if !request.omit_fields.contains(field) {
                return Err(ApiError::Status {
                    status: 400,
                    message: format!("Invalid argument: unsupported field '{field}'"),
                });
            }
        }

        let pages = self.pages.get(&key).cloned().unwrap_or_default();
        let index = page_index(request.page_token.as_deref());
        let items = pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
        Ok(Page {
            items,
            next_page_token,
        })
    }
}

struct MockFactory(Arc<MockApiClient>);

/// Factory that hands out `client` for any token, keeping it inspectable.
pub fn factory(client: Arc<MockApiClient>) -> Arc<dyn ClientFactory> {
    Arc::new(MockFactory(client))
}

impl ClientFactory for MockFactory {
    fn connect(&self, _access_token: &str) -> ApiResult<Arc<dyn BusinessApiClient>> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Record Builders
// =============================================================================

pub fn location(account_ref: &str, location_ref: &str) -> LocationRecord {
    LocationRecord {
        location_ref: location_ref.to_string(),
        account_ref: account_ref.to_string(),
        title: format!("Store {location_ref}"),
        store_code: None,
        brand_id: None,
        address: None,
        phone: None,
    }
}

pub fn review(store_ref: &str, n: usize) -> EntityPayload {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    EntityPayload::Review(ReviewRecord {
        review_ref: format!("{store_ref}/reviews/{n}"),
        store_ref: store_ref.to_string(),
        reviewer_name: Some(format!("Reviewer {n}")),
        star_rating: Some((n % 5 + 1) as i64),
        comment: None,
        reply_comment: None,
        create_time: created,
        update_time: created,
    })
}

pub fn reviews(store_ref: &str, range: std::ops::Range<usize>) -> Vec<EntityPayload> {
    range.map(|n| review(store_ref, n)).collect()
}
