//! # LINE Notify
//!
//! This crate delivers availability notifications through the LINE Messaging
//! API push endpoint. It implements the watcher's notification channel and
//! retries transient failures with exponential backoff.

/// Push service for the LINE Messaging API.
pub mod service;
/// Types and structures used by the push service.
pub mod types;

pub use service::{DEFAULT_API_BASE, LineNotificationService};
pub use types::{NotificationError, RetryConfig};
