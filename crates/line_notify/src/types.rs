use std::time::Duration;

use availability_watch::WatchError;
use rand::Rng;
use serde::Serialize;

/// Errors raised while pushing a message.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Transport failure or timeout.
    #[error("LINE API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("LINE API rejected the message with status {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, as returned by the API
        body: String,
    },

    /// No channel access token configured.
    #[error("LINE channel access token is not configured")]
    MissingToken,
}

impl NotificationError {
    /// Whether another attempt may succeed
    ///
    /// Transport errors, rate limiting and server errors are retried; other
    /// client errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotificationError::Http(_) => true,
            NotificationError::Rejected { status, .. } => *status == 429 || *status >= 500,
            NotificationError::MissingToken => false,
        }
    }
}

impl From<NotificationError> for WatchError {
    fn from(error: NotificationError) -> Self {
        WatchError::Dispatch(error.to_string())
    }
}

/// Retry behavior for push requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds (default: 500)
    pub base_delay_ms: u64,

    /// Upper bound for the backoff delay in milliseconds (default: 10000)
    pub max_delay_ms: u64,

    /// Random extra delay added to each retry in milliseconds (default: 250)
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_ms: 250,
        }
    }
}

impl RetryConfig {
    /// Retry configuration without any waiting, for tests and local runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        let capped = exponential.min(self.max_delay_ms);

        let jitter = if self.jitter_ms > 0 {
            rand::rng().random_range(0..=self.jitter_ms)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }

    /// Longest total wait across every retry, jitter included.
    pub fn max_total_delay(&self) -> Duration {
        (1..=self.max_retries)
            .map(|attempt| {
                let exponential = self
                    .base_delay_ms
                    .saturating_mul(1u64 << (attempt - 1).min(16));
                Duration::from_millis(exponential.min(self.max_delay_ms) + self.jitter_ms)
            })
            .sum()
    }
}

/// Body of `POST /v2/bot/message/push`.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    /// Recipient user ID
    pub to: &'a str,
    /// Messages to deliver, in order
    pub messages: Vec<TextMessage<'a>>,
}

/// A plain text message object.
#[derive(Debug, Serialize)]
pub struct TextMessage<'a> {
    /// Always `text`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Message body
    pub text: &'a str,
}

impl<'a> PushRequest<'a> {
    /// Single text message addressed to `to`.
    pub fn text(to: &'a str, text: &'a str) -> Self {
        Self {
            to,
            messages: vec![TextMessage { kind: "text", text }],
        }
    }
}
