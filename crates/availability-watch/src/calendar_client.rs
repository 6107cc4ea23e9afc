use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::extractor::parse_directory;
use crate::watch_types::*;

/// Raw response returned by a [`PageSource`]
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

/// Capability for reading pages from the reservation site
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Issue a single GET request
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<PageResponse, WatchError>;
}

/// Page source backed by a `reqwest` client
pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    /// Create a page source whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, WatchError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36")
            .timeout(timeout)
            .build()
            .map_err(|e| WatchError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<PageResponse, WatchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| WatchError::FetchFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| WatchError::FetchFailed(format!("Failed to read body: {}", e)))?;

        Ok(PageResponse { status, body })
    }
}

/// Calendar markup for one facility and month
#[derive(Debug, Clone)]
pub struct CalendarPage {
    /// ID of the facility the page belongs to
    pub facility_id: String,
    /// First day of the month the page shows
    pub month: NaiveDate,
    /// Raw HTML
    pub body: String,
}

/// Client for the reservation site's calendar and directory pages
pub struct CalendarClient {
    source: Arc<dyn PageSource>,
    calendar_url: String,
}

impl CalendarClient {
    /// Create a client reading calendar pages from `calendar_url`
    pub fn new(source: Arc<dyn PageSource>, calendar_url: impl Into<String>) -> Self {
        Self {
            source,
            calendar_url: calendar_url.into(),
        }
    }

    /// Fetch the calendar of `facility_id` for the month starting at `month`
    ///
    /// Non-2xx responses and transport errors become
    /// [`WatchError::FetchFailed`]. No retry happens here.
    pub async fn fetch_month(
        &self,
        facility_id: &str,
        month: NaiveDate,
    ) -> Result<CalendarPage, WatchError> {
        let month = first_of_month(month);
        debug!(
            "Fetching calendar for facility {} month {}",
            facility_id,
            month.format("%Y-%m")
        );

        let params = [
            ("s", facility_id.to_string()),
            ("join_date", month.format("%Y-%m-%d").to_string()),
            ("night_count", String::new()),
        ];

        let response = self.source.get(&self.calendar_url, &params).await?;

        if !(200..300).contains(&response.status) {
            warn!(
                "Calendar request for {} {} failed with status {}",
                facility_id,
                month.format("%Y-%m"),
                response.status
            );
            return Err(WatchError::FetchFailed(format!(
                "HTTP {} for facility {} month {}",
                response.status,
                facility_id,
                month.format("%Y-%m")
            )));
        }

        Ok(CalendarPage {
            facility_id: facility_id.to_string(),
            month,
            body: response.body,
        })
    }

    /// Scrape the facility directory at `directory_url`
    pub async fn fetch_directory(&self, directory_url: &str) -> Result<Vec<Facility>, WatchError> {
        info!("Fetching facility directory: {}", directory_url);

        let response = self.source.get(directory_url, &[]).await?;

        if !(200..300).contains(&response.status) {
            return Err(WatchError::FetchFailed(format!(
                "HTTP {} for facility directory",
                response.status
            )));
        }

        let facilities = parse_directory(&response.body)?;
        info!("Directory lists {} facilities", facilities.len());
        Ok(facilities)
    }
}

/// First day of the month containing `date`
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Month starts to scan: the current month plus the following `window - 1`
pub fn months_to_scan(today: NaiveDate, window: u32) -> Vec<NaiveDate> {
    let start = first_of_month(today);
    (0..window)
        .filter_map(|offset| start.checked_add_months(Months::new(offset)))
        .collect()
}
