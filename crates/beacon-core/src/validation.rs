//! # Validation Module
//!
//! Record validation for data coming back from the external API.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: API client (beacon-sync)                                     │
//! │  └── Type validation (deserialization of the response body)            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Natural-key derivation                                       │
//! │  └── THIS MODULE: key fields present, month/period sane                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── UNIQUE natural-key indexes                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A record failing here is classified `VALIDATION_MISSING_FIELD` and never
//! reaches the store.

use chrono::NaiveDate;

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Requires a non-blank value, returning it trimmed.
///
/// ## Example
/// ```rust
/// use beacon_core::validation::require;
///
/// assert_eq!(require("reviewRef", " reviews/1 ").unwrap(), "reviews/1");
/// assert!(require("reviewRef", "   ").is_err());
/// ```
pub fn require<'a>(field: &str, value: &'a str) -> ValidationResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(trimmed)
}

/// Validates a calendar month (1-12).
pub fn validate_month(month: u32) -> ValidationResult<()> {
    if !(1..=12).contains(&month) {
        return Err(ValidationError::OutOfRange {
            field: "month".to_string(),
            min: 1,
            max: 12,
        });
    }
    Ok(())
}

/// Validates that a reporting period is not reversed.
pub fn validate_period(start: NaiveDate, end: NaiveDate) -> ValidationResult<()> {
    if end < start {
        return Err(ValidationError::InvalidFormat {
            field: "periodEnd".to_string(),
            reason: format!("{end} is before {start}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_trims() {
        assert_eq!(require("x", "\tabc ").unwrap(), "abc");
        assert!(matches!(
            require("x", ""),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_validate_month() {
        assert!(validate_month(1).is_ok());
        assert!(validate_month(12).is_ok());
        assert!(validate_month(0).is_err());
        assert!(validate_month(13).is_err());
    }

    #[test]
    fn test_validate_period() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert!(validate_period(d1, d2).is_ok());
        assert!(validate_period(d1, d1).is_ok());
        assert!(validate_period(d2, d1).is_err());
    }
}
