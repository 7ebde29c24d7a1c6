//! # External API Client
//!
//! The paginated-fetch contract the orchestrator pulls from, and a REST
//! implementation of it over `reqwest`.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  list_accounts(token)              → Page<AccountRecord>                │
//! │  list_locations(account, token)    → Page<LocationRecord>               │
//! │  fetch_page(type, location, req)   → Page<EntityPayload>                │
//! │                                                                         │
//! │  Every page carries `next_page_token`; `None` ends the listing.         │
//! │  Failures are ApiError variants, never strings:                         │
//! │     Status { 429, .. }  → API_RATE_LIMITED (retried)                    │
//! │     Status { 400, "unsupported field 'x'" } → strip x, retry once       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{
    AccountRecord, Classify, DataType, EntityPayload, FailureKind, LocationRecord,
    PerformanceRecord, PostRecord, ReviewRecord, SearchKeywordRecord,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiSettings;

// =============================================================================
// Errors
// =============================================================================

/// Result type alias for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Failures observed at the API boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// No response within the call timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection dropped mid-request.
    #[error("request aborted: {0}")]
    Aborted(String),

    /// Remote refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Host name did not resolve.
    #[error("host lookup failed: {0}")]
    Dns(String),

    /// Remote answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Anything else the transport reported.
    #[error("{0}")]
    Other(String),
}

impl Classify for ApiError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ApiError::Timeout => FailureKind::Timeout,
            ApiError::Aborted(_) => FailureKind::Aborted,
            ApiError::ConnectionRefused(_) => FailureKind::ConnectionRefused,
            ApiError::Dns(_) => FailureKind::DnsFailure,
            ApiError::Status { status, message } => FailureKind::Http {
                status: *status,
                message: message.clone(),
            },
            ApiError::Decode(message) | ApiError::Other(message) => FailureKind::Unstructured {
                message: message.clone(),
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ApiError::Timeout;
        }
        if let Some(status) = err.status() {
            return ApiError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return ApiError::Decode(err.to_string());
        }

        let message = err.to_string();
        if err.is_connect() {
            let lower = message.to_ascii_lowercase();
            if lower.contains("dns") || lower.contains("lookup") {
                return ApiError::Dns(message);
            }
            return ApiError::ConnectionRefused(message);
        }
        if err.is_request() || err.is_body() {
            return ApiError::Aborted(message);
        }
        ApiError::Other(message)
    }
}

// =============================================================================
// Paging Types
// =============================================================================

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Page {
            items,
            next_page_token: None,
        }
    }
}

/// Parameters of a per-location page fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page_token: Option<String>,
    /// Fields the API rejected earlier in this unit.
    pub omit_fields: Vec<String>,
}

// =============================================================================
// Client Contract
// =============================================================================

/// Paginated access to the external business-data API.
#[async_trait]
pub trait BusinessApiClient: Send + Sync {
    async fn list_accounts(&self, page_token: Option<&str>) -> ApiResult<Page<AccountRecord>>;

    async fn list_locations(
        &self,
        account_ref: &str,
        page_token: Option<&str>,
    ) -> ApiResult<Page<LocationRecord>>;

    async fn fetch_page(
        &self,
        data_type: DataType,
        location_ref: &str,
        request: &PageRequest,
    ) -> ApiResult<Page<EntityPayload>>;
}

/// Builds a client bound to one caller's access token.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, access_token: &str) -> ApiResult<Arc<dyn BusinessApiClient>>;
}

// =============================================================================
// REST Implementation
// =============================================================================

/// Listing envelope; the collection key differs per endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(
        default,
        alias = "accounts",
        alias = "locations",
        alias = "reviews",
        alias = "localPosts",
        alias = "metrics",
        alias = "searchKeywordsCounts"
    )]
    items: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Record fields requested per data type (the default read mask).
fn default_fields(data_type: DataType) -> &'static [&'static str] {
    match data_type {
        DataType::Reviews => &[
            "reviewRef",
            "reviewerName",
            "starRating",
            "comment",
            "replyComment",
            "createTime",
            "updateTime",
        ],
        DataType::Posts => &["postRef", "topicType", "summary", "state", "createTime", "updateTime"],
        DataType::Performance => &["periodStart", "periodEnd", "metrics"],
        DataType::Keywords => &["keyword", "year", "month", "impressions", "threshold"],
    }
}

/// `readMask` value with omitted fields removed; `None` when nothing is omitted.
fn read_mask(data_type: DataType, omit: &[String]) -> Option<String> {
    if omit.is_empty() {
        return None;
    }
    let fields: Vec<&str> = default_fields(data_type)
        .iter()
        .copied()
        .filter(|f| !omit.iter().any(|o| o == f))
        .collect();
    Some(fields.join(","))
}

fn resource_path(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Reviews => "reviews",
        DataType::Posts => "localPosts",
        DataType::Performance => "performance",
        DataType::Keywords => "searchkeywords/impressions/monthly",
    }
}

/// Injects an owner reference the API leaves implicit in the URL.
fn with_owner(mut item: Value, key: &str, owner: &str) -> Value {
    if let Value::Object(map) = &mut item {
        map.entry(key.to_string())
            .or_insert_with(|| Value::String(owner.to_string()));
    }
    item
}

fn decode_all<T: DeserializeOwned>(items: Vec<Value>) -> ApiResult<Vec<T>> {
    items
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(|e| ApiError::Decode(e.to_string())))
        .collect()
}

fn decode_payloads(data_type: DataType, items: Vec<Value>) -> ApiResult<Vec<EntityPayload>> {
    Ok(match data_type {
        DataType::Reviews => decode_all::<ReviewRecord>(items)?
            .into_iter()
            .map(EntityPayload::Review)
            .collect(),
        DataType::Posts => decode_all::<PostRecord>(items)?
            .into_iter()
            .map(EntityPayload::Post)
            .collect(),
        DataType::Performance => decode_all::<PerformanceRecord>(items)?
            .into_iter()
            .map(EntityPayload::Performance)
            .collect(),
        DataType::Keywords => decode_all::<SearchKeywordRecord>(items)?
            .into_iter()
            .map(EntityPayload::SearchKeyword)
            .collect(),
    })
}

/// `BusinessApiClient` over HTTPS with a bearer token.
#[derive(Debug, Clone)]
pub struct RestApiClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    page_size: u32,
}

impl RestApiClient {
    pub fn new(settings: &ApiSettings, access_token: impl Into<String>) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(RestApiClient {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            page_size: settings.page_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_list(
        &self,
        path: &str,
        page_token: Option<&str>,
        read_mask: Option<String>,
    ) -> ApiResult<ListResponse> {
        let mut query: Vec<(&str, String)> = vec![("pageSize", self.page_size.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        if let Some(mask) = read_mask {
            query.push(("readMask", mask));
        }

        let url = self.url(path);
        debug!(url = %url, page_token = ?page_token, "GET");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<ListResponse>().await?)
    }
}

#[async_trait]
impl BusinessApiClient for RestApiClient {
    async fn list_accounts(&self, page_token: Option<&str>) -> ApiResult<Page<AccountRecord>> {
        let body = self.get_list("accounts", page_token, None).await?;
        Ok(Page {
            items: decode_all(body.items)?,
            next_page_token: body.next_page_token,
        })
    }

    async fn list_locations(
        &self,
        account_ref: &str,
        page_token: Option<&str>,
    ) -> ApiResult<Page<LocationRecord>> {
        let path = format!("{account_ref}/locations");
        let body = self.get_list(&path, page_token, None).await?;
        let items = body
            .items
            .into_iter()
            .map(|v| with_owner(v, "accountRef", account_ref))
            .collect();
        Ok(Page {
            items: decode_all(items)?,
            next_page_token: body.next_page_token,
        })
    }

    async fn fetch_page(
        &self,
        data_type: DataType,
        location_ref: &str,
        request: &PageRequest,
    ) -> ApiResult<Page<EntityPayload>> {
        let path = format!("{location_ref}/{}", resource_path(data_type));
        let body = self
            .get_list(
                &path,
                request.page_token.as_deref(),
                read_mask(data_type, &request.omit_fields),
            )
            .await?;
        let items = body
            .items
            .into_iter()
            .map(|v| with_owner(v, "storeRef", location_ref))
            .collect();
        Ok(Page {
            items: decode_payloads(data_type, items)?,
            next_page_token: body.next_page_token,
        })
    }
}

/// Hands out a [`RestApiClient`] per access token.
#[derive(Debug, Clone)]
pub struct RestClientFactory {
    settings: ApiSettings,
}

impl RestClientFactory {
    pub fn new(settings: ApiSettings) -> Self {
        RestClientFactory { settings }
    }
}

impl ClientFactory for RestClientFactory {
    fn connect(&self, access_token: &str) -> ApiResult<Arc<dyn BusinessApiClient>> {
        Ok(Arc::new(RestApiClient::new(&self.settings, access_token)?))
    }
}
