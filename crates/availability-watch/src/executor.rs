use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::NotificationBatch;
use crate::calendar_client::{CalendarClient, months_to_scan};
use crate::extractor::{extract, merge_months};
use crate::matcher::{SelectedFacility, SubscriptionMatcher, UserMatch};
use crate::notifier::NotificationChannel;
use crate::reconciler::{ReconcileError, Reconciler};
use crate::store::WatchStore;
use crate::watch_types::*;

/// Default facility directory page
pub const DEFAULT_DIRECTORY_URL: &str = "https://as.its-kenpo.or.jp/apply/empty_calendar?s=PT13TjJjVFBrbG1KbFZuYzAxVFp5Vkhkd0YyWWZWR2JuOTJiblpTWjFKSGQ5a0hkdzFXWg%3D%3D&join_date=&night_count=1";

/// Default calendar endpoint, queried with `s`, `join_date` and `night_count`
pub const DEFAULT_CALENDAR_URL: &str = "https://as.its-kenpo.or.jp/apply/empty_calendar";

/// Configuration of a watch run
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Page listing every facility (default: the production directory)
    pub directory_url: String,

    /// Calendar endpoint (default: the production calendar)
    pub calendar_url: String,

    /// Number of months scanned, current month included (default: 3)
    pub month_window: u32,

    /// Facilities processed in parallel (default: 4)
    pub max_concurrent_facilities: usize,

    /// Upper bound for a single page fetch (default: 30 seconds)
    pub fetch_timeout: Duration,

    /// Upper bound for a single notification send, raised to the channel's
    /// delivery budget when that is longer (default: 30 seconds)
    pub dispatch_timeout: Duration,

    /// Seen-record handling for dates that close again (default: retain)
    pub closure_policy: ClosurePolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            calendar_url: DEFAULT_CALENDAR_URL.to_string(),
            month_window: 3,
            max_concurrent_facilities: 4,
            fetch_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(30),
            closure_policy: ClosurePolicy::Retain,
        }
    }
}

/// Overall result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step was attempted; individual facilities or users may have failed
    Completed,
    /// No useful work was possible
    Failed {
        /// Why the run stopped early
        reason: String,
    },
}

/// Result of the facility directory refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DirectoryOutcome {
    /// Directory scraped and stored
    Refreshed {
        /// Number of facilities listed
        facilities: usize,
    },
    /// Directory could not be refreshed, the stored one was used
    Failed {
        /// Error kind
        kind: String,
        /// Error message
        message: String,
    },
}

/// Result of processing one facility
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FacilityStatus {
    /// Calendar scanned and reconciled
    Scanned {
        /// Dates that became bookable in this run
        newly_available: Vec<NaiveDate>,
        /// Users with at least one matched date
        matched_users: usize,
    },
    /// Facility skipped for this run
    Failed {
        /// Error kind (`fetch_failed`, `parse_anomaly`, `store_error`)
        kind: String,
        /// Error message
        message: String,
    },
}

/// Per-facility entry of a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilityOutcome {
    /// ID of the facility
    pub facility_id: String,
    /// Display name of the facility
    pub facility_name: String,
    /// What happened
    #[serde(flatten)]
    pub status: FacilityStatus,
}

/// Result of sending a user's message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Channel accepted the message
    Sent,
    /// Channel rejected the message or timed out
    Failed {
        /// Error message
        message: String,
    },
}

/// Per-user entry of a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    /// Recipient
    pub user_id: String,
    /// Facilities mentioned in the message
    pub facilities: usize,
    /// What happened
    #[serde(flatten)]
    pub status: DispatchStatus,
}

/// Everything that happened during one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique identifier of the run
    pub run_id: Uuid,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Overall status
    #[serde(flatten)]
    pub status: RunStatus,
    /// Directory refresh result
    pub directory: DirectoryOutcome,
    /// One entry per subscribed facility
    pub facilities: Vec<FacilityOutcome>,
    /// One entry per user that had something to hear about
    pub dispatches: Vec<DispatchOutcome>,
}

impl RunReport {
    /// Number of facilities that could not be processed
    pub fn failed_facilities(&self) -> usize {
        self.facilities
            .iter()
            .filter(|f| matches!(f.status, FacilityStatus::Failed { .. }))
            .count()
    }

    /// Number of messages the channel accepted
    pub fn sent_notifications(&self) -> usize {
        self.dispatches
            .iter()
            .filter(|d| d.status == DispatchStatus::Sent)
            .count()
    }

    /// Number of messages the channel rejected
    pub fn failed_notifications(&self) -> usize {
        self.dispatches.len() - self.sent_notifications()
    }

    /// Outcome for a given facility
    pub fn facility(&self, facility_id: &str) -> Option<&FacilityOutcome> {
        self.facilities.iter().find(|f| f.facility_id == facility_id)
    }
}

/// Drives one availability run from directory refresh to dispatch
pub struct WatchExecutor {
    calendar: Arc<CalendarClient>,
    store: Arc<dyn WatchStore>,
    channel: Arc<dyn NotificationChannel>,
    reconciler: Reconciler,
    config: WatchConfig,
}

impl WatchExecutor {
    /// Create an executor
    pub fn new(
        calendar: Arc<CalendarClient>,
        store: Arc<dyn WatchStore>,
        channel: Arc<dyn NotificationChannel>,
        config: Option<WatchConfig>,
    ) -> Self {
        let config = config.unwrap_or_default();
        let reconciler = Reconciler::new(store.clone(), config.closure_policy);

        Self {
            calendar,
            store,
            channel,
            reconciler,
            config,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Run one pass for the current local date
    pub async fn run_once(&self) -> RunReport {
        self.run_at(Local::now().date_naive()).await
    }

    /// Run one pass scanning the months starting at `today`
    ///
    /// Always returns a report: per-facility and per-user failures are
    /// recorded in it, and only a failed subscription read ends the run early.
    pub async fn run_at(&self, today: NaiveDate) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting availability run {}", run_id);

        let directory = self.refresh_directory().await;

        let snapshot = match self.store.list_active_subscriptions().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let reason = match &directory {
                    DirectoryOutcome::Failed { .. } => {
                        format!("directory refresh and subscription read failed: {}", e)
                    }
                    DirectoryOutcome::Refreshed { .. } => {
                        format!("subscription read failed: {}", e)
                    }
                };
                error!("Run {} aborted: {}", run_id, reason);
                return RunReport {
                    run_id,
                    started_at,
                    finished_at: Utc::now(),
                    status: RunStatus::Failed { reason },
                    directory,
                    facilities: Vec::new(),
                    dispatches: Vec::new(),
                };
            }
        };

        let matcher = SubscriptionMatcher::from_snapshot(snapshot);
        info!(
            "Run {}: {} subscriptions across {} facilities",
            run_id,
            matcher.subscription_count(),
            matcher.facilities().len()
        );

        let months = months_to_scan(today, self.config.month_window);
        let concurrency = self.config.max_concurrent_facilities.max(1);

        let results: Vec<(FacilityOutcome, Vec<UserMatch>)> =
            stream::iter(matcher.facilities().iter().cloned())
                .map(|facility| self.process_facility(facility, &months, &matcher))
                .buffered(concurrency)
                .collect()
                .await;

        let mut batch = NotificationBatch::new();
        let mut facilities = Vec::with_capacity(results.len());

        for (outcome, matches) in results {
            for user_match in &matches {
                batch.fold_in(
                    &user_match.user_id,
                    &outcome.facility_name,
                    &outcome.facility_id,
                    &user_match.dates,
                );
            }
            facilities.push(outcome);
        }

        let dispatches = self.dispatch(&batch).await;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status: RunStatus::Completed,
            directory,
            facilities,
            dispatches,
        };

        info!(
            "Run {} done: {} facilities ({} failed), {} notifications sent, {} failed",
            run_id,
            report.facilities.len(),
            report.failed_facilities(),
            report.sent_notifications(),
            report.failed_notifications()
        );

        report
    }

    /// Scrape the directory and upsert facilities; failures are only recorded
    async fn refresh_directory(&self) -> DirectoryOutcome {
        let result = async {
            let facilities = timeout(
                self.config.fetch_timeout,
                self.calendar.fetch_directory(&self.config.directory_url),
            )
            .await
            .map_err(|_| WatchError::FetchFailed("directory fetch timed out".to_string()))??;
            self.store.upsert_facilities(&facilities).await?;
            Ok::<usize, WatchError>(facilities.len())
        }
        .await;

        match result {
            Ok(count) => DirectoryOutcome::Refreshed { facilities: count },
            Err(e) => {
                warn!("Facility directory refresh failed, using stored directory: {}", e);
                DirectoryOutcome::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn process_facility(
        &self,
        facility: SelectedFacility,
        months: &[NaiveDate],
        matcher: &SubscriptionMatcher,
    ) -> (FacilityOutcome, Vec<UserMatch>) {
        let (newly_available, failure) = match self.scan_facility(&facility, months).await {
            Ok(dates) => (dates, None),
            Err(e) => (e.recorded, Some(e.source)),
        };

        // dates recorded before a failure are notified now or never
        let matches = matcher.match_facility(&facility.id, &newly_available);

        let status = match failure {
            None => {
                debug!(
                    "Facility {}: {} new dates, {} matched users",
                    facility.id,
                    newly_available.len(),
                    matches.len()
                );
                FacilityStatus::Scanned {
                    newly_available,
                    matched_users: matches.len(),
                }
            }
            Some(e) => {
                error!(
                    "Failed to process facility {} ({}): {}",
                    facility.id, facility.name, e
                );
                if !newly_available.is_empty() {
                    warn!(
                        "Facility {}: still notifying {} dates recorded before the failure",
                        facility.id,
                        newly_available.len()
                    );
                }
                FacilityStatus::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };

        let outcome = FacilityOutcome {
            facility_id: facility.id,
            facility_name: facility.name,
            status,
        };
        (outcome, matches)
    }

    /// Fetch every month, extract and reconcile
    ///
    /// Nothing is reconciled unless every month was fetched and parsed.
    async fn scan_facility(
        &self,
        facility: &SelectedFacility,
        months: &[NaiveDate],
    ) -> Result<Vec<NaiveDate>, ReconcileError> {
        let mut rows = Vec::new();

        for month in months {
            let page = timeout(
                self.config.fetch_timeout,
                self.calendar.fetch_month(&facility.id, *month),
            )
            .await
            .map_err(|_| {
                WatchError::FetchFailed(format!(
                    "calendar fetch for {} {} timed out",
                    facility.id,
                    month.format("%Y-%m")
                ))
            })??;

            rows.extend(extract(&page)?);
        }

        let merged = merge_months(rows);
        self.reconciler.reconcile(&facility.id, &merged).await
    }

    /// Upper bound for one send: the configured timeout, extended to the
    /// channel's own retry budget so its retries are never cut short
    pub fn dispatch_limit(&self) -> Duration {
        match self.channel.delivery_budget() {
            Some(budget) => self.config.dispatch_timeout.max(budget),
            None => self.config.dispatch_timeout,
        }
    }

    /// Send one message per user; a failure only affects that user
    async fn dispatch(&self, batch: &NotificationBatch) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(batch.user_count());
        let limit = self.dispatch_limit();

        for (user_id, text) in batch.render() {
            let facilities = batch.entries_for(&user_id).len();

            let result = timeout(limit, self.channel.send(&user_id, &text))
                .await
                .map_err(|_| WatchError::Dispatch("notification send timed out".to_string()))
                .and_then(|sent| sent);

            let status = match result {
                Ok(()) => {
                    info!("Sent availability notification to user {}", user_id);
                    DispatchStatus::Sent
                }
                Err(e) => {
                    error!("Failed to notify user {}: {}", user_id, e);
                    DispatchStatus::Failed {
                        message: e.to_string(),
                    }
                }
            };

            outcomes.push(DispatchOutcome {
                user_id,
                facilities,
                status,
            });
        }

        outcomes
    }
}
