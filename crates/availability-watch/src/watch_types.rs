use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Status marker the calendar shows for a fully booked night
pub const FULL_MARKER: &str = "☓";

/// A reservable facility listed in the source site's directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Facility {
    /// Opaque identifier scraped from the directory, stable across runs
    pub id: String,
    /// Display name, may change between directory refreshes
    pub name: String,
}

/// A user's registered interest in a facility
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    /// ID of the subscribed user
    pub user_id: String,
    /// ID of the watched facility
    pub facility_id: String,
    /// Specific night the user cares about; `None` means any date
    pub wish_date: Option<NaiveDate>,
    /// When the subscription was first created
    pub created_at: DateTime<Utc>,
    /// When the subscription was last (re-)registered
    pub updated_at: DateTime<Utc>,
}

/// Subscription joined with its facility name, as read at the start of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WishedFacility {
    /// ID of the subscribed user
    pub user_id: String,
    /// ID of the watched facility
    pub facility_id: String,
    /// Display name of the watched facility
    pub facility_name: String,
    /// Specific night the user cares about
    pub wish_date: Option<NaiveDate>,
}

/// Subscription listing entry returned to the command source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSummary {
    /// ID of the watched facility
    pub facility_id: String,
    /// Display name of the watched facility
    pub facility_name: String,
    /// Specific night the user cares about
    pub wish_date: Option<NaiveDate>,
}

/// Record marking a date as already observed bookable at a facility
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeenAvailability {
    /// ID of the facility
    pub facility_id: String,
    /// The observed night
    pub date: NaiveDate,
    /// Marker shown on the calendar when first seen bookable
    pub status: String,
}

/// Request structure for registering a subscription
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubscribeRequest {
    /// ID of the chat user
    #[validate(length(min = 1, message = "User ID is required"))]
    pub user_id: String,

    /// ID of the facility to watch
    #[validate(length(min = 1, message = "Facility ID is required"))]
    pub facility_id: String,

    /// Optional single night to watch
    pub wish_date: Option<NaiveDate>,
}

/// One calendar cell interpreted as a one-night stay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDate {
    /// The night the cell refers to
    pub date: NaiveDate,
    /// Whether the night can be booked
    pub bookable: bool,
    /// Raw status marker of the cell
    pub marker: String,
}

/// What happens to a seen record when its date is later observed full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosurePolicy {
    /// Keep the record, a re-opened date is never announced again
    #[default]
    Retain,
    /// Delete the record so a re-opened date is announced again
    ResetOnClosure,
}

impl FromStr for ClosurePolicy {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(ClosurePolicy::Retain),
            "reset" | "reset_on_closure" => Ok(ClosurePolicy::ResetOnClosure),
            other => Err(WatchError::ConfigError(format!(
                "Unknown closure policy: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ClosurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosurePolicy::Retain => write!(f, "retain"),
            ClosurePolicy::ResetOnClosure => write!(f, "reset_on_closure"),
        }
    }
}

/// Errors raised by the persistence layer
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Custom error type for watch operations
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    /// Network or HTTP failure reaching a page
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Page is missing the markup the extractor relies on
    #[error("Parse anomaly: {0}")]
    ParseAnomaly(String),

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Notification channel rejected a message
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Invalid request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Facility is not in the directory
    #[error("Facility not found: {0}")]
    FacilityNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WatchError {
    /// Short machine-readable name of the error kind, used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::FetchFailed(_) => "fetch_failed",
            WatchError::ParseAnomaly(_) => "parse_anomaly",
            WatchError::Store(_) => "store_error",
            WatchError::Dispatch(_) => "dispatch_error",
            WatchError::Validation(_) => "validation_error",
            WatchError::FacilityNotFound(_) => "facility_not_found",
            WatchError::ConfigError(_) => "configuration_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_policy_from_str() {
        assert_eq!("retain".parse::<ClosurePolicy>().unwrap(), ClosurePolicy::Retain);
        assert_eq!(
            "RESET".parse::<ClosurePolicy>().unwrap(),
            ClosurePolicy::ResetOnClosure
        );
        assert_eq!(
            "reset_on_closure".parse::<ClosurePolicy>().unwrap(),
            ClosurePolicy::ResetOnClosure
        );
        assert!("sometimes".parse::<ClosurePolicy>().is_err());
    }

    #[test]
    fn test_subscribe_request_validation() {
        let valid = SubscribeRequest {
            user_id: "U1".to_string(),
            facility_id: "F1".to_string(),
            wish_date: None,
        };
        assert!(valid.validate().is_ok());

        let missing_user = SubscribeRequest {
            user_id: String::new(),
            ..valid
        };
        assert!(missing_user.validate().is_err());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(WatchError::FetchFailed("x".into()).kind(), "fetch_failed");
        let store = WatchError::from(StoreError::Unavailable("down".into()));
        assert_eq!(store.kind(), "store_error");
    }
}
