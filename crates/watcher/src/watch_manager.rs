use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use availability_watch::{RunReport, RunStatus, WatchExecutor};
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Runs the watch executor on a schedule and on demand
///
/// Runs are spawned as their own tasks so a slow run never delays the
/// schedule. At most `max_concurrent_runs` are in flight; a tick or trigger
/// arriving while all slots are taken is skipped.
pub struct WatchManager {
    executor: Arc<WatchExecutor>,
    interval: Duration,
    max_concurrent_runs: usize,
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
    last_report: Arc<RwLock<Option<RunReport>>>,
    runs_completed: Arc<AtomicU64>,
    loop_handle: Option<JoinHandle<()>>,
}

impl WatchManager {
    /// Create a new watch manager allowing two runs in flight
    pub fn new(executor: Arc<WatchExecutor>, interval: Duration) -> Self {
        Self {
            executor,
            interval,
            max_concurrent_runs: 2,
            trigger: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
            last_report: Arc::new(RwLock::new(None)),
            runs_completed: Arc::new(AtomicU64::new(0)),
            loop_handle: None,
        }
    }

    /// Limit the number of runs in flight (at least one)
    pub fn with_max_concurrent_runs(mut self, max_concurrent_runs: usize) -> Self {
        self.max_concurrent_runs = max_concurrent_runs.max(1);
        self
    }

    /// Start the scheduling loop; the first run starts immediately
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Watch manager already running");
            return;
        }

        info!(
            "Starting watch manager, scheduled every {:?}, at most {} runs in flight",
            self.interval, self.max_concurrent_runs
        );

        let executor = self.executor.clone();
        let interval = self.interval;
        let max_concurrent_runs = self.max_concurrent_runs;
        let slots = Arc::new(Semaphore::new(max_concurrent_runs));
        let trigger = self.trigger.clone();
        let shutdown = self.shutdown.clone();
        let last_report = self.last_report.clone();
        let runs_completed = self.runs_completed.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = JoinSet::new();

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = ticker.tick() => info!("⏰ Scheduled availability run"),
                    _ = trigger.notified() => info!("🔔 On-demand availability run"),
                    Some(joined) = runs.join_next(), if !runs.is_empty() => {
                        if let Err(e) = joined {
                            error!("Availability run task ended abnormally: {}", e);
                        }
                        continue;
                    }
                }

                let Ok(slot) = slots.clone().try_acquire_owned() else {
                    warn!(
                        "⏭️ {} runs already in flight, skipping this one",
                        max_concurrent_runs
                    );
                    continue;
                };

                let executor = executor.clone();
                let last_report = last_report.clone();
                let runs_completed = runs_completed.clone();

                runs.spawn(async move {
                    let report = executor.run_once().await;
                    if let RunStatus::Failed { reason } = &report.status {
                        error!("Availability run {} failed: {}", report.run_id, reason);
                    }
                    runs_completed.fetch_add(1, Ordering::SeqCst);
                    *last_report.write().await = Some(report);
                    drop(slot);
                });
            }

            if !runs.is_empty() {
                info!("Waiting for {} runs in flight", runs.len());
            }
            while let Some(joined) = runs.join_next().await {
                if let Err(e) = joined {
                    error!("Availability run task ended abnormally: {}", e);
                }
            }
        });

        self.loop_handle = Some(handle);
    }

    /// Request a run now, independent of the schedule
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Report of the most recently finished run
    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().await.clone()
    }

    /// Number of runs finished since start
    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::SeqCst)
    }

    /// Whether the scheduling loop is active
    pub fn is_running(&self) -> bool {
        self.loop_handle.is_some()
    }

    /// Stop scheduling new runs and wait for the runs in flight to finish
    pub async fn stop(&mut self) {
        info!("Stopping watch manager");

        if let Some(handle) = self.loop_handle.take() {
            self.shutdown.notify_one();
            if let Err(e) = handle.await {
                error!("Watch manager loop ended abnormally: {}", e);
            }
        }

        info!("Watch manager stopped");
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use availability_watch::{
        CalendarClient, LogNotificationChannel, MemoryStore, PageResponse, PageSource, WatchConfig,
        WatchError,
    };

    /// Site serving empty pages after `delay`, tracking concurrent requests
    #[derive(Default)]
    struct EmptySite {
        delay: Duration,
        in_flight: AtomicU64,
        peak: AtomicU64,
    }

    #[async_trait]
    impl PageSource for EmptySite {
        async fn get(
            &self,
            _url: &str,
            _query: &[(&str, String)],
        ) -> Result<PageResponse, WatchError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(PageResponse {
                status: 200,
                body: "<html></html>".to_string(),
            })
        }
    }

    fn manager_for(site: Arc<EmptySite>, interval: Duration) -> WatchManager {
        let calendar = Arc::new(CalendarClient::new(site, "http://site.test"));
        let executor = WatchExecutor::new(
            calendar,
            Arc::new(MemoryStore::new()),
            Arc::new(LogNotificationChannel),
            Some(WatchConfig::default()),
        );
        WatchManager::new(Arc::new(executor), interval)
    }

    fn manager(interval: Duration) -> WatchManager {
        manager_for(Arc::new(EmptySite::default()), interval)
    }

    async fn wait_for_runs(manager: &WatchManager, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.runs_completed() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("runs did not complete in time");
    }

    #[tokio::test]
    async fn test_first_run_starts_immediately() {
        let mut manager = manager(Duration::from_secs(3600));
        assert!(manager.last_report().await.is_none());

        manager.start();
        wait_for_runs(&manager, 1).await;

        let report = manager.last_report().await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert!(report.facilities.is_empty());
        manager.stop().await;
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_trigger_now_runs_outside_schedule() {
        let mut manager = manager(Duration::from_secs(3600));
        manager.start();
        wait_for_runs(&manager, 1).await;

        manager.trigger_now();
        wait_for_runs(&manager, 2).await;

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_keeps_single_loop() {
        let mut manager = manager(Duration::from_secs(3600));
        manager.start();
        manager.start();
        assert!(manager.is_running());
        wait_for_runs(&manager, 1).await;

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_triggers_beyond_the_limit_are_skipped() {
        let site = Arc::new(EmptySite {
            delay: Duration::from_millis(300),
            ..EmptySite::default()
        });
        let mut manager =
            manager_for(site.clone(), Duration::from_secs(3600)).with_max_concurrent_runs(1);
        manager.start();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            manager.trigger_now();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(site.peak.load(Ordering::SeqCst), 1);
        assert!(manager.runs_completed() < 5);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_run_in_flight() {
        let site = Arc::new(EmptySite {
            delay: Duration::from_millis(200),
            ..EmptySite::default()
        });
        let mut manager = manager_for(site.clone(), Duration::from_secs(3600));
        manager.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            while site.in_flight.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first run never started");
        assert_eq!(manager.runs_completed(), 0);

        manager.stop().await;

        assert_eq!(manager.runs_completed(), 1);
        assert!(manager.last_report().await.is_some());
        assert!(!manager.is_running());
    }
}
