//! Entry point of the facility availability watcher.
//! Runs availability passes once or on a schedule and manages subscriptions.

use std::sync::Arc;

use anyhow::{Context, bail};
use availability_watch::*;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use line_notify::LineNotificationService;
use postgres::PgWatchStore;
use postgres::database::*;

mod config;
mod watch_manager;

use config::AppConfig;
use watch_manager::WatchManager;

#[derive(Parser)]
#[command(name = "watcher", version, about = "Watches facility calendars for new availability")]
struct Cli {
    /// Log notifications instead of pushing them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single availability pass and print its report as JSON
    RunOnce,
    /// Run availability passes on a schedule until interrupted
    Serve,
    /// List known facilities
    Facilities,
    /// Subscribe a user to a facility
    Subscribe {
        /// User to notify
        user_id: String,
        /// Facility to watch
        facility_id: String,
        /// Only watch this night (YYYY-MM-DD)
        #[arg(long)]
        wish_date: Option<NaiveDate>,
    },
    /// Remove a user's subscription to a facility
    Unsubscribe {
        /// Subscribed user
        user_id: String,
        /// Watched facility
        facility_id: String,
    },
    /// List a user's subscriptions
    Subscriptions {
        /// Subscribed user
        user_id: String,
    },
    /// Remove a user and all of their subscriptions
    RemoveUser {
        /// User to remove
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Invalid configuration")?;

    log::info!("🚀 Starting facility watcher...");

    let pool = create_connection_pool()
        .await
        .context("Failed to create database pool")?;
    log::info!("🗃️ Database pool created successfully");
    test_connection(&pool)
        .await
        .context("Database connection test failed")?;
    ensure_schema(&pool)
        .await
        .context("Failed to prepare database schema")?;

    let store: Arc<dyn WatchStore> = Arc::new(PgWatchStore::new(pool));
    let registry = SubscriptionRegistry::new(store.clone());

    match cli.command {
        Command::RunOnce => {
            let executor = build_executor(&config, store, cli.dry_run)?;
            let report = executor.run_once().await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if let RunStatus::Failed { reason } = &report.status {
                bail!("Availability run failed: {}", reason);
            }
        }
        Command::Serve => {
            let executor = Arc::new(build_executor(&config, store, cli.dry_run)?);
            serve(executor, &config).await?;
        }
        Command::Facilities => {
            for facility in registry.list_facilities().await? {
                println!("{}\t{}", facility.id, facility.name);
            }
        }
        Command::Subscribe {
            user_id,
            facility_id,
            wish_date,
        } => {
            let subscription = registry
                .subscribe(&SubscribeRequest {
                    user_id,
                    facility_id,
                    wish_date,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&subscription)?);
        }
        Command::Unsubscribe {
            user_id,
            facility_id,
        } => {
            if !registry.unsubscribe(&user_id, &facility_id).await? {
                log::warn!("No subscription of {} to {}", user_id, facility_id);
            }
        }
        Command::Subscriptions { user_id } => {
            let subscriptions = registry.list_subscriptions(&user_id).await?;
            println!("{}", serde_json::to_string_pretty(&subscriptions)?);
        }
        Command::RemoveUser { user_id } => {
            if !registry.remove_user(&user_id).await? {
                log::warn!("Unknown user {}", user_id);
            }
        }
    }

    Ok(())
}

fn build_executor(
    config: &AppConfig,
    store: Arc<dyn WatchStore>,
    dry_run: bool,
) -> anyhow::Result<WatchExecutor> {
    let source = Arc::new(HttpPageSource::new(config.watch.fetch_timeout)?);
    let calendar = Arc::new(CalendarClient::new(source, config.watch.calendar_url.clone()));

    let channel: Arc<dyn NotificationChannel> = if dry_run {
        log::info!("💬 Dry run: notifications are only logged");
        Arc::new(LogNotificationChannel)
    } else {
        let service = LineNotificationService::from_env()
            .context("LINE channel is not configured (use --dry-run to only log messages)")?;
        log::info!("📱 LINE notification channel initialized");
        Arc::new(service)
    };

    Ok(WatchExecutor::new(
        calendar,
        store,
        channel,
        Some(config.watch.clone()),
    ))
}

async fn serve(executor: Arc<WatchExecutor>, config: &AppConfig) -> anyhow::Result<()> {
    let mut manager = WatchManager::new(executor, config.schedule_interval)
        .with_max_concurrent_runs(config.max_concurrent_runs);
    manager.start();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut check_now = signal(SignalKind::user_defined1())?;
        log::info!("🔔 Send SIGUSR1 to request an immediate run");

        loop {
            tokio::select! {
                _ = check_now.recv() => manager.trigger_now(),
                result = tokio::signal::ctrl_c() => {
                    result?;
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    if let Some(report) = manager.last_report().await {
        log::info!(
            "{} runs completed; last run {} finished at {}: {} facilities, {} notifications sent",
            manager.runs_completed(),
            report.run_id,
            report.finished_at,
            report.facilities.len(),
            report.sent_notifications()
        );
    }

    manager.stop().await;
    Ok(())
}
