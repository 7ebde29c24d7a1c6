//! # Error Classifier
//!
//! Maps every failure the engine can observe onto a fixed taxonomy that the
//! retry policy and the error log understand.
//!
//! ## Flow
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  ApiError    │   │  DbError     │   │ CoreError    │
//! │ (beacon-sync)│   │ (beacon-db)  │   │ (this crate) │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │ failure_kind()   │                  │
//!        └─────────────┬────┴──────────────────┘
//!                      ▼
//!               ┌─────────────┐   classify()   ┌────────────────┐
//!               │ FailureKind │ ─────────────► │ Classification │
//!               └─────────────┘                │ code/category/ │
//!                                              │ severity/retry │
//!                                              └────────────────┘
//! ```
//!
//! Failures are structured where they are first observed. String inspection
//! only happens in [`FailureKind::from_message`], for upstream errors that
//! arrive as plain text.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Taxonomy
// =============================================================================

/// Broad origin of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Api,
    Database,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Api => "api",
            ErrorCategory::Database => "database",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "network" => ErrorCategory::Network,
            "api" => ErrorCategory::Api,
            "database" => ErrorCategory::Database,
            "validation" => ErrorCategory::Validation,
            _ => ErrorCategory::Unknown,
        }
    }
}

/// How loudly a failure should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

/// Error codes carried on [`crate::ErrorRecord::code`].
pub mod codes {
    pub const NETWORK_TIMEOUT: &str = "NETWORK_TIMEOUT";
    pub const NETWORK_ABORTED: &str = "NETWORK_ABORTED";
    pub const NETWORK_UNREACHABLE: &str = "NETWORK_UNREACHABLE";
    pub const API_BAD_REQUEST: &str = "API_BAD_REQUEST";
    pub const API_UNAUTHORIZED: &str = "API_UNAUTHORIZED";
    pub const API_FORBIDDEN: &str = "API_FORBIDDEN";
    pub const API_NOT_FOUND: &str = "API_NOT_FOUND";
    pub const API_REQUEST_TIMEOUT: &str = "API_REQUEST_TIMEOUT";
    pub const API_RATE_LIMITED: &str = "API_RATE_LIMITED";
    pub const API_SERVER_ERROR: &str = "API_SERVER_ERROR";
    pub const API_CLIENT_ERROR: &str = "API_CLIENT_ERROR";
    pub const DB_DUPLICATE_KEY: &str = "DB_DUPLICATE_KEY";
    pub const DB_ERROR: &str = "DB_ERROR";
    pub const VALIDATION_MISSING_FIELD: &str = "VALIDATION_MISSING_FIELD";
    pub const UNKNOWN: &str = "UNKNOWN";
}

/// Result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub code: &'static str,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
}

impl Classification {
    const fn of(
        code: &'static str,
        category: ErrorCategory,
        severity: Severity,
        retryable: bool,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            retryable,
        }
    }

    /// Fallback for anything unrecognised.
    pub const UNKNOWN: Classification = Classification::of(
        codes::UNKNOWN,
        ErrorCategory::Unknown,
        Severity::Medium,
        false,
    );
}

// =============================================================================
// Failure Kind
// =============================================================================

/// Structured description of a failure, produced at the boundary that saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The request did not complete in time.
    Timeout,
    /// The request was torn down before a response arrived.
    Aborted,
    /// Nothing listening at the remote end.
    ConnectionRefused,
    /// Host name did not resolve.
    DnsFailure,
    /// The remote answered with a non-success status.
    Http { status: u16, message: String },
    /// A natural-key unique index rejected a write.
    DuplicateKey { key: String },
    /// Any other database driver failure.
    Database { message: String },
    /// A record or request lacked a required field.
    MissingField { field: String },
    /// Plain-text failure from a source without structure.
    Unstructured { message: String },
}

impl FailureKind {
    /// Best-effort structuring of a plain-text error message.
    ///
    /// Returns `Unstructured` when nothing recognisable is found.
    pub fn from_message(message: &str) -> FailureKind {
        let lower = message.to_ascii_lowercase();

        if let Some(status) = http_status_in(&lower) {
            return FailureKind::Http {
                status,
                message: message.to_string(),
            };
        }
        if lower.contains("timed out") || lower.contains("timeout") || lower.contains("etimedout")
        {
            return FailureKind::Timeout;
        }
        if lower.contains("aborted") || lower.contains("econnreset") {
            return FailureKind::Aborted;
        }
        if lower.contains("econnrefused") || lower.contains("connection refused") {
            return FailureKind::ConnectionRefused;
        }
        if lower.contains("enotfound")
            || lower.contains("dns")
            || lower.contains("failed to lookup address")
        {
            return FailureKind::DnsFailure;
        }
        if lower.contains("duplicate key")
            || lower.contains("unique constraint failed")
            || lower.contains("e11000")
        {
            return FailureKind::DuplicateKey {
                key: message.to_string(),
            };
        }
        if let Some(field) = missing_field_name(message) {
            return FailureKind::MissingField { field };
        }

        FailureKind::Unstructured {
            message: message.to_string(),
        }
    }

    /// Human-readable summary for the error log.
    pub fn describe(&self) -> String {
        match self {
            FailureKind::Timeout => "request timed out".to_string(),
            FailureKind::Aborted => "request aborted".to_string(),
            FailureKind::ConnectionRefused => "connection refused".to_string(),
            FailureKind::DnsFailure => "host lookup failed".to_string(),
            FailureKind::Http { status, message } => format!("HTTP {status}: {message}"),
            FailureKind::DuplicateKey { key } => format!("duplicate natural key: {key}"),
            FailureKind::Database { message } => format!("database error: {message}"),
            FailureKind::MissingField { field } => format!("missing required field: {field}"),
            FailureKind::Unstructured { message } => message.clone(),
        }
    }
}

/// Anything that can describe itself as a [`FailureKind`].
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;

    fn classification(&self) -> Classification {
        classify(&self.failure_kind())
    }
}

impl Classify for FailureKind {
    fn failure_kind(&self) -> FailureKind {
        self.clone()
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classifies a failure. Pure and total.
///
/// ## Example
/// ```rust
/// use beacon_core::classify::{classify, ErrorCategory, FailureKind};
///
/// let c = classify(&FailureKind::Http { status: 429, message: String::new() });
/// assert_eq!(c.code, "API_RATE_LIMITED");
/// assert_eq!(c.category, ErrorCategory::Api);
/// assert!(c.retryable);
/// ```
pub fn classify(kind: &FailureKind) -> Classification {
    use codes::*;
    use ErrorCategory as C;
    use Severity as S;

    match kind {
        FailureKind::Timeout => Classification::of(NETWORK_TIMEOUT, C::Network, S::Medium, true),
        FailureKind::Aborted => Classification::of(NETWORK_ABORTED, C::Network, S::Medium, true),
        FailureKind::ConnectionRefused | FailureKind::DnsFailure => {
            Classification::of(NETWORK_UNREACHABLE, C::Network, S::High, true)
        }
        FailureKind::Http { status, .. } => match *status {
            400 => Classification::of(API_BAD_REQUEST, C::Api, S::Medium, false),
            401 => Classification::of(API_UNAUTHORIZED, C::Api, S::High, false),
            403 => Classification::of(API_FORBIDDEN, C::Api, S::Low, false),
            404 => Classification::of(API_NOT_FOUND, C::Api, S::Low, false),
            408 => Classification::of(API_REQUEST_TIMEOUT, C::Api, S::Medium, true),
            429 => Classification::of(API_RATE_LIMITED, C::Api, S::Medium, true),
            500..=599 => Classification::of(API_SERVER_ERROR, C::Api, S::High, true),
            400..=499 => Classification::of(API_CLIENT_ERROR, C::Api, S::Medium, false),
            _ => Classification::UNKNOWN,
        },
        FailureKind::DuplicateKey { .. } => {
            Classification::of(DB_DUPLICATE_KEY, C::Database, S::Low, false)
        }
        FailureKind::Database { .. } => Classification::of(DB_ERROR, C::Database, S::High, true),
        FailureKind::MissingField { .. } => {
            Classification::of(VALIDATION_MISSING_FIELD, C::Validation, S::Medium, false)
        }
        FailureKind::Unstructured { message } => match FailureKind::from_message(message) {
            FailureKind::Unstructured { .. } => Classification::UNKNOWN,
            structured => classify(&structured),
        },
    }
}

/// Extracts the field name from an "unsupported field" 400 response.
///
/// Recognises `unsupported field 'x'` and `Unknown name "x"` phrasings.
pub fn unsupported_field(kind: &FailureKind) -> Option<String> {
    let message = match kind {
        FailureKind::Http {
            status: 400,
            message,
        } => message,
        _ => return None,
    };

    let lower = message.to_ascii_lowercase();
    for marker in ["unsupported field", "unknown name"] {
        if let Some(pos) = lower.find(marker) {
            let rest = &message[pos + marker.len()..];
            if let Some(name) = quoted(rest) {
                return Some(name);
            }
        }
    }
    None
}

// =============================================================================
// Message Helpers
// =============================================================================

/// First single- or double-quoted token in `s`.
fn quoted(s: &str) -> Option<String> {
    let start = s.find(['\'', '"'])?;
    let quote = s[start..].chars().next()?;
    let body = &s[start + 1..];
    let end = body.find(quote)?;
    let name = body[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn missing_field_name(message: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    for marker in ["missing required field", "required field"] {
        if let Some(pos) = lower.find(marker) {
            let rest = message[pos + marker.len()..].trim_start_matches([':', ' ']);
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.'))
                .collect();
            return Some(if name.is_empty() {
                "unknown".to_string()
            } else {
                name
            });
        }
    }
    if let Some(pos) = lower.find(" is required") {
        let name = message[..pos]
            .split_whitespace()
            .last()
            .map(|w| w.trim_matches(['\'', '"', '`']))
            .filter(|w| !w.is_empty())
            .unwrap_or("unknown");
        return Some(name.to_string());
    }
    None
}

/// Finds "status 503" / "status code 503" / "http 503" in a lowercased message,
/// or a bare status line such as "408 request timeout".
fn http_status_in(lower: &str) -> Option<u16> {
    if let Some((head, rest)) = lower.split_once(' ') {
        if head.len() == 3 && rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
            if let Ok(code) = head.parse::<u16>() {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }
    for marker in ["status code", "status", "http"] {
        if let Some(pos) = lower.find(marker) {
            let digits: String = lower[pos + marker.len()..]
                .trim_start_matches([':', ' ', '='])
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(code) = digits.parse::<u16>() {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================
