use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::watch_types::WatchError;

/// Outbound channel delivering a text message to a user
///
/// Implementations own their retry policy. A returned error is recorded for
/// that user and never stops delivery to the others.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver `text` to `user_id`
    async fn send(&self, user_id: &str, text: &str) -> Result<(), WatchError>;

    /// Longest time one `send` may take with every retry exhausted
    ///
    /// Callers never time a send out before this budget has elapsed.
    fn delivery_budget(&self) -> Option<Duration> {
        None
    }
}

/// Channel that only writes messages to the log, for development and dry runs
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), WatchError> {
        info!("💬 [DRY RUN] To: {}", user_id);
        info!("💬 [DRY RUN] Message:\n{}", text);
        Ok(())
    }
}
