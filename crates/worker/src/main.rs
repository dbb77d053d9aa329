//! Keyhaven Background Worker
//!
//! Handles scheduled jobs:
//! - Subscription expiry sweep (hourly)
//! - Expired session cleanup (daily at 3:00 AM UTC)
//! - Ledger invariant checks (daily at 4:00 AM UTC)

use std::sync::Arc;

use keyhaven_api::{AppState, Config};
use keyhaven_billing::{InvariantChecker, ViolationSeverity};
use keyhaven_shared::{create_pool, Clock, SystemClock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const JOB_COUNT: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Keyhaven Worker");

    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    let checker = InvariantChecker::new(pool.clone());
    let state = AppState::new(pool, config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let scheduler = JobScheduler::new().await?;

    // Job 1: flip active subscriptions whose period ended to `expired`
    let ledger = state.billing.ledger.clone();
    scheduler
        .add(Job::new_async("0 5 * * * *", move |_uuid, _l| {
            let ledger = ledger.clone();
            Box::pin(async move {
                if let Err(e) = ledger.expire_elapsed().await {
                    error!(error = %e, "Subscription expiry sweep failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Subscription expiry sweep (hourly)");

    // Job 2: drop sessions that can no longer authenticate
    let sessions = state.sessions.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let sessions = sessions.clone();
            Box::pin(async move {
                match sessions.prune_expired().await {
                    Ok(deleted) => info!(deleted, "Expired session cleanup complete"),
                    Err(e) => error!(error = %e, "Expired session cleanup failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Expired session cleanup (daily at 3:00 AM UTC)");

    // Job 3: ledger consistency report
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let checker = checker.clone();
            let clock = clock.clone();
            Box::pin(async move {
                let summary = match checker.run_all_checks(clock.now()).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        error!(error = %e, "Invariant checks failed to run");
                        return;
                    }
                };

                for violation in &summary.violations {
                    match violation.severity {
                        ViolationSeverity::Low => info!(
                            invariant = %violation.invariant,
                            users = violation.user_ids.len(),
                            "{}",
                            violation.description
                        ),
                        _ => warn!(
                            invariant = %violation.invariant,
                            severity = %violation.severity,
                            users = violation.user_ids.len(),
                            "{}",
                            violation.description
                        ),
                    }
                }

                info!(
                    checks_run = summary.checks_run,
                    checks_failed = summary.checks_failed,
                    healthy = summary.healthy,
                    "Invariant check cycle complete"
                );
            })
        })?)
        .await?;
    info!("Scheduled: Ledger invariant checks (daily at 4:00 AM UTC)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Keyhaven Worker started with {} scheduled jobs", JOB_COUNT);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    Ok(())
}
