use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use availability_watch::{ClosurePolicy, WatchConfig, WatchError};

/// Runtime configuration of the watcher binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Settings of each run
    pub watch: WatchConfig,

    /// Time between scheduled runs in `serve` mode (default: 15 minutes)
    pub schedule_interval: Duration,

    /// Runs allowed in flight at once in `serve` mode (default: 2)
    pub max_concurrent_runs: usize,
}

impl AppConfig {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, WatchError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WatchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = WatchConfig::default();
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let watch = WatchConfig {
            directory_url: value("DIRECTORY_URL").unwrap_or(defaults.directory_url),
            calendar_url: value("CALENDAR_URL").unwrap_or(defaults.calendar_url),
            month_window: parse(&lookup, "MONTH_WINDOW", defaults.month_window)?,
            max_concurrent_facilities: parse(
                &lookup,
                "MAX_CONCURRENT_FACILITIES",
                defaults.max_concurrent_facilities,
            )?,
            fetch_timeout: Duration::from_secs(parse(
                &lookup,
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?),
            dispatch_timeout: Duration::from_secs(parse(
                &lookup,
                "DISPATCH_TIMEOUT_SECS",
                defaults.dispatch_timeout.as_secs(),
            )?),
            closure_policy: parse::<ClosurePolicy, _>(
                &lookup,
                "CLOSURE_POLICY",
                defaults.closure_policy,
            )?,
        };

        let schedule_interval =
            Duration::from_secs(parse(&lookup, "SCHEDULE_INTERVAL_SECS", 15 * 60)?);
        let max_concurrent_runs: usize = parse(&lookup, "MAX_CONCURRENT_RUNS", 2)?;

        if watch.month_window == 0 {
            return Err(WatchError::ConfigError(
                "MONTH_WINDOW must be at least 1".to_string(),
            ));
        }
        if watch.max_concurrent_facilities == 0 || max_concurrent_runs == 0 {
            return Err(WatchError::ConfigError(
                "MAX_CONCURRENT_FACILITIES and MAX_CONCURRENT_RUNS must be at least 1".to_string(),
            ));
        }
        if watch.fetch_timeout.is_zero()
            || watch.dispatch_timeout.is_zero()
            || schedule_interval.is_zero()
        {
            return Err(WatchError::ConfigError(
                "FETCH_TIMEOUT_SECS, DISPATCH_TIMEOUT_SECS and SCHEDULE_INTERVAL_SECS must be positive"
                    .to_string(),
            ));
        }

        Ok(Self {
            watch,
            schedule_interval,
            max_concurrent_runs,
        })
    }
}

fn parse<T, F>(lookup: &F, name: &str, default: T) -> Result<T, WatchError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| WatchError::ConfigError(format!("Invalid {} '{}': {}", name, raw, e))),
        _ => Ok(default),
    }
}
