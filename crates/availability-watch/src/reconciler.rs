use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::store::WatchStore;
use crate::watch_types::*;

/// Reconciliation stopped partway through a facility
///
/// `recorded` holds the dates already marked seen before the failure. They
/// will never be reported by a later run, so the caller must still notify them.
#[derive(thiserror::Error, Debug)]
#[error("{source}")]
pub struct ReconcileError {
    /// Dates recorded as seen before the failure, ascending
    pub recorded: Vec<NaiveDate>,
    /// What went wrong
    pub source: WatchError,
}

impl From<WatchError> for ReconcileError {
    fn from(source: WatchError) -> Self {
        Self {
            recorded: Vec::new(),
            source,
        }
    }
}

/// Compares extracted availability against persisted seen state
pub struct Reconciler {
    store: Arc<dyn WatchStore>,
    policy: ClosurePolicy,
}

impl Reconciler {
    /// Create a reconciler writing to `store`
    pub fn new(store: Arc<dyn WatchStore>, policy: ClosurePolicy) -> Self {
        Self { store, policy }
    }

    /// Return the dates of `facility_id` that became bookable since the last
    /// observation, recording them as seen
    ///
    /// Each check-and-record is one conditional insert, so running this
    /// twice (or concurrently) with the same rows reports every date once.
    /// On a store failure the dates recorded so far are returned in the error.
    pub async fn reconcile(
        &self,
        facility_id: &str,
        extracted: &[ExtractedDate],
    ) -> Result<Vec<NaiveDate>, ReconcileError> {
        let mut newly_available = Vec::new();

        for row in extracted {
            if let Err(e) = self.reconcile_row(facility_id, row, &mut newly_available).await {
                newly_available.sort();
                newly_available.dedup();
                warn!(
                    "Reconciliation of {} stopped at {} with {} dates already recorded: {}",
                    facility_id,
                    row.date,
                    newly_available.len(),
                    e
                );
                return Err(ReconcileError {
                    recorded: newly_available,
                    source: e,
                });
            }
        }

        newly_available.sort();
        newly_available.dedup();

        if !newly_available.is_empty() {
            info!(
                "Facility {} has {} newly available dates",
                facility_id,
                newly_available.len()
            );
        }

        Ok(newly_available)
    }

    async fn reconcile_row(
        &self,
        facility_id: &str,
        row: &ExtractedDate,
        newly_available: &mut Vec<NaiveDate>,
    ) -> Result<(), WatchError> {
        if row.bookable {
            if self
                .store
                .insert_seen_if_absent(facility_id, row.date, &row.marker)
                .await?
            {
                newly_available.push(row.date);
            } else {
                debug!("{} {} already notified", facility_id, row.date);
            }
        } else if self.policy == ClosurePolicy::ResetOnClosure
            && self.store.clear_seen(facility_id, row.date).await?
        {
            debug!("{} {} closed again, seen record cleared", facility_id, row.date);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn row(day: u32, marker: &str) -> ExtractedDate {
        ExtractedDate {
            date: NaiveDate::from_ymd_opt(2025, 8, day).unwrap(),
            bookable: marker != FULL_MARKER,
            marker: marker.to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_reconcile_reports_nothing() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), ClosurePolicy::Retain);
        let rows = vec![row(5, "○"), row(6, "☓"), row(7, "△")];

        let first = reconciler.reconcile("F1", &rows).await.unwrap();
        assert_eq!(first, vec![rows[0].date, rows[2].date]);

        let second = reconciler.reconcile("F1", &rows).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_full_dates_are_not_recorded() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), ClosurePolicy::Retain);

        reconciler.reconcile("F1", &[row(6, "☓")]).await.unwrap();
        assert!(store.seen_for("F1").await.is_empty());

        let opened = reconciler.reconcile("F1", &[row(6, "○")]).await.unwrap();
        assert_eq!(opened, vec![row(6, "○").date]);
    }

    #[tokio::test]
    async fn test_retain_policy_keeps_seen_record_on_closure() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), ClosurePolicy::Retain);

        reconciler.reconcile("F1", &[row(5, "○")]).await.unwrap();
        reconciler.reconcile("F1", &[row(5, "☓")]).await.unwrap();
        let reopened = reconciler.reconcile("F1", &[row(5, "○")]).await.unwrap();

        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn test_reset_policy_renotifies_after_closure() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), ClosurePolicy::ResetOnClosure);

        reconciler.reconcile("F1", &[row(5, "○")]).await.unwrap();
        reconciler.reconcile("F1", &[row(5, "☓")]).await.unwrap();
        let reopened = reconciler.reconcile("F1", &[row(5, "○")]).await.unwrap();

        assert_eq!(reopened, vec![row(5, "○").date]);
    }

    #[tokio::test]
    async fn test_facilities_are_tracked_separately() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), ClosurePolicy::Retain);

        reconciler.reconcile("F1", &[row(5, "○")]).await.unwrap();
        let other = reconciler.reconcile("F2", &[row(5, "○")]).await.unwrap();

        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let reconciler = Reconciler::new(store.clone(), ClosurePolicy::Retain);

        let result = reconciler.reconcile("F1", &[row(5, "○")]).await;
        match result {
            Err(e) => {
                assert!(matches!(e.source, WatchError::Store(_)));
                assert!(e.recorded.is_empty());
            }
            Ok(dates) => panic!("unexpected success {:?}", dates),
        }
    }

    #[tokio::test]
    async fn test_failure_midway_returns_recorded_dates() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store.clone(), ClosurePolicy::Retain);
        let rows = vec![row(5, "○"), row(6, "○"), row(7, "○")];
        store.fail_seen_insert_on(Some(rows[1].date)).await;

        let error = reconciler.reconcile("F1", &rows).await.unwrap_err();

        assert_eq!(error.recorded, vec![rows[0].date]);
        assert_eq!(error.source.kind(), "store_error");
        assert_eq!(store.seen_for("F1").await.len(), 1);
    }
}
