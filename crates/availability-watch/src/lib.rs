//! # Availability Watch
//!
//! This crate provides the availability-watch pipeline for facility reservation
//! calendars. It fetches calendar pages, extracts one-night availability,
//! reconciles it against previously seen state, matches new availability
//! against user subscriptions and sends one aggregated notification per user.

/// Types shared across the pipeline
mod watch_types;
pub use watch_types::*;

/// Persistence capability and the in-memory store
mod store;
pub use store::*;

/// Calendar and facility directory fetching
mod calendar_client;
pub use calendar_client::*;

/// HTML extraction of availability and facility directory entries
mod extractor;
pub use extractor::*;

/// Seen-state reconciliation
mod reconciler;
pub use reconciler::*;

/// Subscription matching
mod matcher;
pub use matcher::*;

/// Per-user notification aggregation and rendering
mod aggregator;
pub use aggregator::*;

/// Notification channel capability
mod notifier;
pub use notifier::*;

/// Registration API used by the subscription command source
mod registry;
pub use registry::*;

/// Run orchestration
mod executor;
pub use executor::*;
