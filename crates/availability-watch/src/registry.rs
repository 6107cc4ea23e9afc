use std::sync::Arc;

use tracing::info;
use validator::Validate;

use crate::store::WatchStore;
use crate::watch_types::*;

/// Registration API called by the subscription command source
pub struct SubscriptionRegistry {
    store: Arc<dyn WatchStore>,
}

impl SubscriptionRegistry {
    /// Creates a new registry over `store`
    pub fn new(store: Arc<dyn WatchStore>) -> Self {
        Self { store }
    }

    /// Registers a user on first contact, returns `true` if the user was new
    pub async fn register_user(&self, user_id: &str) -> Result<bool, WatchError> {
        if user_id.trim().is_empty() {
            return Err(WatchError::Validation("User ID is required".to_string()));
        }

        let created = self.store.ensure_user(user_id).await?;
        if created {
            info!("Registered user {}", user_id);
        }
        Ok(created)
    }

    /// Subscribes a user to a facility, optionally for a single night
    ///
    /// Subscribing again replaces the wish date and refreshes the timestamp.
    pub async fn subscribe(&self, request: &SubscribeRequest) -> Result<Subscription, WatchError> {
        request
            .validate()
            .map_err(|e| WatchError::Validation(format!("Validation error: {}", e)))?;

        if self.store.get_facility(&request.facility_id).await?.is_none() {
            return Err(WatchError::FacilityNotFound(request.facility_id.clone()));
        }

        self.store.ensure_user(&request.user_id).await?;

        let subscription = self
            .store
            .upsert_subscription(&request.user_id, &request.facility_id, request.wish_date)
            .await?;

        info!(
            "Subscribed user {} to facility {} (wish date: {:?})",
            subscription.user_id, subscription.facility_id, subscription.wish_date
        );

        Ok(subscription)
    }

    /// Removes one subscription, returns `true` if it existed
    pub async fn unsubscribe(&self, user_id: &str, facility_id: &str) -> Result<bool, WatchError> {
        let removed = self.store.delete_subscription(user_id, facility_id).await?;
        if removed {
            info!("Unsubscribed user {} from facility {}", user_id, facility_id);
        }
        Ok(removed)
    }

    /// Removes a user together with every subscription it holds
    pub async fn remove_user(&self, user_id: &str) -> Result<bool, WatchError> {
        let removed = self.store.remove_user(user_id).await?;
        info!("Removed user {} (existed: {})", user_id, removed);
        Ok(removed)
    }

    /// Lists every known facility ordered by name
    pub async fn list_facilities(&self) -> Result<Vec<Facility>, WatchError> {
        Ok(self.store.list_facilities().await?)
    }

    /// Lists the facilities a user is subscribed to
    pub async fn list_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<SubscriptionSummary>, WatchError> {
        Ok(self.store.list_user_subscriptions(user_id).await?)
    }
}
