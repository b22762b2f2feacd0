//! TaskDeck Background Worker
//!
//! Runs the daily subscription reconciliation on a schedule:
//! - Trial expiration (daily at 2:00 UTC)
//! - Renewal-or-downgrade (daily at 2:30 UTC)
//! - Expiry reminders (daily at 9:00 UTC)
//! - Invariant sweep over billing state (daily at 3:30 UTC)
//!
//! Each job is also exposed as an authenticated endpoint on the API server,
//! so a missed tick can be replayed by hand.

use std::sync::Arc;
use std::time::Duration;

use taskdeck_billing::{BillingService, JobReport, RowAction, ViolationSeverity};
use taskdeck_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Log the summary of one batch run
fn log_report(job: &'static str, report: &JobReport) {
    info!(
        job = job,
        processed = report.processed,
        downgraded = report.count(RowAction::Downgraded),
        charged = report.count(RowAction::Charged),
        reminded = report.count(RowAction::Reminded),
        errors = report.errors.len(),
        "Batch complete"
    );

    for err in &report.errors {
        error!(job = job, error = %err, "Row failed during batch");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting TaskDeck Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let billing = Arc::new(BillingService::from_env(pool));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Trial expiration (daily at 2:00 UTC)
    let trial_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let billing = trial_billing.clone();
            Box::pin(async move {
                info!("Running scheduled trial expiration");
                match billing.trial_expiration.run().await {
                    Ok(report) => log_report("trial_expiration", &report),
                    Err(e) => error!(error = %e, "Trial expiration batch aborted"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Trial expiration (daily at 2:00 UTC)");

    // Job 2: Renewal-or-downgrade (daily at 2:30 UTC, after trial expiration)
    let renewal_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 2 * * *", move |_uuid, _l| {
            let billing = renewal_billing.clone();
            Box::pin(async move {
                info!("Running scheduled renewal batch");
                match billing.renewal.run().await {
                    Ok(report) => log_report("renewal", &report),
                    Err(e) => error!(error = %e, "Renewal batch aborted"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Renewal-or-downgrade (daily at 2:30 UTC)");

    // Job 3: Expiry reminders (daily at 9:00 UTC, daytime for most users)
    let reminder_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 9 * * *", move |_uuid, _l| {
            let billing = reminder_billing.clone();
            Box::pin(async move {
                info!("Running scheduled expiry reminders");
                match billing.expiry_reminder.run().await {
                    Ok(report) => log_report("expiry_reminder", &report),
                    Err(e) => error!(error = %e, "Expiry reminder batch aborted"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Expiry reminders (daily at 9:00 UTC)");

    // Job 4: Invariant sweep (daily at 3:30 UTC, after the morning batches)
    let invariant_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 3 * * *", move |_uuid, _l| {
            let billing = invariant_billing.clone();
            Box::pin(async move {
                info!("Running billing invariant sweep");
                match billing.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(
                            checks_run = summary.checks_run,
                            "Invariant sweep complete, all checks passed"
                        );
                    }
                    Ok(summary) => {
                        warn!(
                            checks_failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Invariant sweep found violations"
                        );
                        for violation in &summary.violations {
                            let log_line = format!(
                                "[{}] {}: {}",
                                violation.severity, violation.invariant, violation.description
                            );
                            match violation.severity {
                                ViolationSeverity::Critical | ViolationSeverity::High => {
                                    error!(detail = %log_line, "Billing invariant violated")
                                }
                                _ => warn!(detail = %log_line, "Billing invariant violated"),
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Invariant sweep (daily at 3:30 UTC)");

    // Job 5: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("TaskDeck Worker started successfully with 5 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
