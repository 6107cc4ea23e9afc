use std::time::Duration;

use async_trait::async_trait;
use availability_watch::{NotificationChannel, WatchError};
use reqwest::StatusCode;
use uuid::Uuid;

use crate::types::*;

/// Production Messaging API host
pub const DEFAULT_API_BASE: &str = "https://api.line.me";

/// Header deduplicating retried pushes on the API side
pub const RETRY_KEY_HEADER: &str = "X-Line-Retry-Key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Push service sending text messages through the LINE Messaging API.
#[derive(Debug, Clone)]
pub struct LineNotificationService {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl LineNotificationService {
    /// Creates a service authenticated with a channel access token.
    pub fn new(access_token: impl Into<String>) -> Result<Self, NotificationError> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(NotificationError::MissingToken);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            access_token,
            retry: RetryConfig::default(),
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    /// Creates a service from `LINE_CHANNEL_ACCESS_TOKEN` and, if set, `LINE_API_BASE`.
    pub fn from_env() -> Result<Self, NotificationError> {
        let token =
            std::env::var("LINE_CHANNEL_ACCESS_TOKEN").map_err(|_| NotificationError::MissingToken)?;

        let service = Self::new(token)?;
        Ok(match std::env::var("LINE_API_BASE") {
            Ok(base) if !base.trim().is_empty() => service.with_api_base(base),
            _ => service,
        })
    }

    /// Overrides the API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the retry behavior.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Longest a push may take: every attempt timing out plus every backoff.
    pub fn max_push_duration(&self) -> Duration {
        self.request_timeout * (self.retry.max_retries + 1) + self.retry.max_total_delay()
    }

    /// Pushes a text message to a user, retrying transient failures.
    ///
    /// Every attempt carries the same retry key, so a retry of a push the
    /// API already accepted is not delivered twice.
    pub async fn push_text(&self, to: &str, text: &str) -> Result<(), NotificationError> {
        let request = PushRequest::text(to, text);
        let retry_key = Uuid::new_v4();
        let mut attempt = 0;

        loop {
            match self.push_once(&request, retry_key, attempt).await {
                Ok(()) => {
                    log::info!("✅ LINE message pushed to {}", to);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "⚠️ LINE push to {} failed ({}), retry {}/{} in {:?}",
                        to,
                        e,
                        attempt,
                        self.retry.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    log::error!("❌ LINE push to {} failed: {}", to, e);
                    return Err(e);
                }
            }
        }
    }

    async fn push_once(
        &self,
        request: &PushRequest<'_>,
        retry_key: Uuid,
        attempt: u32,
    ) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(format!("{}/v2/bot/message/push", self.api_base))
            .bearer_auth(&self.access_token)
            .header(RETRY_KEY_HEADER, retry_key.to_string())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // 409 on a retry: an earlier attempt with this key was accepted
        if status == StatusCode::CONFLICT && attempt > 0 {
            log::info!(
                "LINE push {} already accepted on an earlier attempt",
                retry_key
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotificationError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl NotificationChannel for LineNotificationService {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), WatchError> {
        Ok(self.push_text(user_id, text).await?)
    }

    fn delivery_budget(&self) -> Option<Duration> {
        Some(self.max_push_duration())
    }
}
