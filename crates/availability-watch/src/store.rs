use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::watch_types::*;

/// Persistence capability for facilities, users, subscriptions and seen state
///
/// `insert_seen_if_absent` must be a single atomic conditional insert so that
/// two overlapping runs can never both observe the same transition.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Insert or rename facilities, returns how many rows were written
    async fn upsert_facilities(&self, facilities: &[Facility]) -> Result<usize, StoreError>;

    /// All known facilities ordered by name
    async fn list_facilities(&self) -> Result<Vec<Facility>, StoreError>;

    /// Look up a single facility
    async fn get_facility(&self, facility_id: &str) -> Result<Option<Facility>, StoreError>;

    /// Register a user, returns `true` if the user was new
    async fn ensure_user(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Remove a user and all of its subscriptions, returns `true` if the user existed
    async fn remove_user(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Create or refresh the subscription for `(user_id, facility_id)`
    async fn upsert_subscription(
        &self,
        user_id: &str,
        facility_id: &str,
        wish_date: Option<NaiveDate>,
    ) -> Result<Subscription, StoreError>;

    /// Delete a subscription, returns `true` if one was removed
    async fn delete_subscription(&self, user_id: &str, facility_id: &str)
    -> Result<bool, StoreError>;

    /// Subscriptions of one user with facility names
    async fn list_user_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<SubscriptionSummary>, StoreError>;

    /// Every subscription joined with its facility, ordered by facility name then user
    async fn list_active_subscriptions(&self) -> Result<Vec<WishedFacility>, StoreError>;

    /// Record a bookable date, returns `true` only if no record existed before
    async fn insert_seen_if_absent(
        &self,
        facility_id: &str,
        date: NaiveDate,
        status: &str,
    ) -> Result<bool, StoreError>;

    /// Forget a seen record, returns `true` if one was removed
    async fn clear_seen(&self, facility_id: &str, date: NaiveDate) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    facilities: BTreeMap<String, Facility>,
    users: BTreeSet<String>,
    subscriptions: BTreeMap<(String, String), Subscription>,
    seen: HashMap<(String, NaiveDate), SeenAvailability>,
    failing_seen_date: Option<NaiveDate>,
}

/// Store kept entirely in process memory
///
/// Every operation holds one lock for its whole duration, which makes the
/// conditional insert atomic across concurrent runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `insert_seen_if_absent` fail for `date` until cleared with `None`
    pub async fn fail_seen_insert_on(&self, date: Option<NaiveDate>) {
        self.state.lock().await.failing_seen_date = date;
    }

    /// Seen records currently held for a facility, ordered by date
    pub async fn seen_for(&self, facility_id: &str) -> Vec<SeenAvailability> {
        let state = self.state.lock().await;
        let mut records: Vec<SeenAvailability> = state
            .seen
            .values()
            .filter(|record| record.facility_id == facility_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.date);
        records
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WatchStore for MemoryStore {
    async fn upsert_facilities(&self, facilities: &[Facility]) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        for facility in facilities {
            state
                .facilities
                .insert(facility.id.clone(), facility.clone());
        }
        Ok(facilities.len())
    }

    async fn list_facilities(&self) -> Result<Vec<Facility>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut facilities: Vec<Facility> = state.facilities.values().cloned().collect();
        facilities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(facilities)
    }

    async fn get_facility(&self, facility_id: &str) -> Result<Option<Facility>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.facilities.get(facility_id).cloned())
    }

    async fn ensure_user(&self, user_id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.users.insert(user_id.to_string()))
    }

    async fn remove_user(&self, user_id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.subscriptions.retain(|(user, _), _| user != user_id);
        Ok(state.users.remove(user_id))
    }

    async fn upsert_subscription(
        &self,
        user_id: &str,
        facility_id: &str,
        wish_date: Option<NaiveDate>,
    ) -> Result<Subscription, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let key = (user_id.to_string(), facility_id.to_string());

        let subscription = state
            .subscriptions
            .entry(key)
            .and_modify(|existing| {
                existing.wish_date = wish_date;
                existing.updated_at = now;
            })
            .or_insert_with(|| Subscription {
                user_id: user_id.to_string(),
                facility_id: facility_id.to_string(),
                wish_date,
                created_at: now,
                updated_at: now,
            })
            .clone();

        Ok(subscription)
    }

    async fn delete_subscription(
        &self,
        user_id: &str,
        facility_id: &str,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .subscriptions
            .remove(&(user_id.to_string(), facility_id.to_string()))
            .is_some())
    }

    async fn list_user_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<SubscriptionSummary>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut summaries: Vec<SubscriptionSummary> = state
            .subscriptions
            .values()
            .filter(|sub| sub.user_id == user_id)
            .filter_map(|sub| {
                state
                    .facilities
                    .get(&sub.facility_id)
                    .map(|facility| SubscriptionSummary {
                        facility_id: sub.facility_id.clone(),
                        facility_name: facility.name.clone(),
                        wish_date: sub.wish_date,
                    })
            })
            .collect();
        summaries.sort_by(|a, b| a.facility_name.cmp(&b.facility_name));
        Ok(summaries)
    }

    async fn list_active_subscriptions(&self) -> Result<Vec<WishedFacility>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut wished: Vec<WishedFacility> = state
            .subscriptions
            .values()
            .filter_map(|sub| {
                state
                    .facilities
                    .get(&sub.facility_id)
                    .map(|facility| WishedFacility {
                        user_id: sub.user_id.clone(),
                        facility_id: sub.facility_id.clone(),
                        facility_name: facility.name.clone(),
                        wish_date: sub.wish_date,
                    })
            })
            .collect();
        wished.sort_by(|a, b| {
            a.facility_name
                .cmp(&b.facility_name)
                .then_with(|| a.facility_id.cmp(&b.facility_id))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(wished)
    }

    async fn insert_seen_if_absent(
        &self,
        facility_id: &str,
        date: NaiveDate,
        status: &str,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.failing_seen_date == Some(date) {
            return Err(StoreError::Unavailable(format!(
                "seen record for {} {} rejected",
                facility_id, date
            )));
        }
        let key = (facility_id.to_string(), date);
        if state.seen.contains_key(&key) {
            return Ok(false);
        }
        state.seen.insert(
            key,
            SeenAvailability {
                facility_id: facility_id.to_string(),
                date,
                status: status.to_string(),
            },
        );
        Ok(true)
    }

    async fn clear_seen(&self, facility_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .seen
            .remove(&(facility_id.to_string(), date))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facility(id: &str, name: &str) -> Facility {
        Facility {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_facilities_renames() {
        let store = MemoryStore::new();
        store
            .upsert_facilities(&[facility("F1", "Old name")])
            .await
            .unwrap();
        store
            .upsert_facilities(&[facility("F1", "New name")])
            .await
            .unwrap();

        let facilities = store.list_facilities().await.unwrap();
        assert_eq!(facilities, vec![facility("F1", "New name")]);
    }

    #[tokio::test]
    async fn test_resubscribe_updates_instead_of_duplicating() {
        let store = MemoryStore::new();
        store.upsert_facilities(&[facility("F1", "A")]).await.unwrap();

        let first = store.upsert_subscription("U1", "F1", None).await.unwrap();
        let wish = NaiveDate::from_ymd_opt(2025, 8, 6).unwrap();
        let second = store
            .upsert_subscription("U1", "F1", Some(wish))
            .await
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.wish_date, Some(wish));
        assert_eq!(store.list_active_subscriptions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_user_cascades() {
        let store = MemoryStore::new();
        store
            .upsert_facilities(&[facility("F1", "A"), facility("F2", "B")])
            .await
            .unwrap();
        store.ensure_user("U1").await.unwrap();
        store.upsert_subscription("U1", "F1", None).await.unwrap();
        store.upsert_subscription("U1", "F2", None).await.unwrap();
        store.upsert_subscription("U2", "F1", None).await.unwrap();

        assert!(store.remove_user("U1").await.unwrap());

        let remaining = store.list_active_subscriptions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id, "U2");
    }

    #[tokio::test]
    async fn test_insert_seen_if_absent_is_conditional() {
        let store = MemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2025, 8, 5).unwrap();

        assert!(store.insert_seen_if_absent("F1", date, "○").await.unwrap());
        assert!(!store.insert_seen_if_absent("F1", date, "△").await.unwrap());
        assert_eq!(store.seen_for("F1").await[0].status, "○");

        assert!(store.clear_seen("F1", date).await.unwrap());
        assert!(store.insert_seen_if_absent("F1", date, "△").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.list_facilities().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.list_active_subscriptions().await.is_err());
    }
}
