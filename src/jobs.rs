//! Scheduled background work: ledger janitor and offline-device sweep

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{Database, Device};
use crate::notify::SharedNotifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JanitorReport {
    pub deleted: u64,
    pub message: String,
}

/// Delete ledger rows older than `max_age_hours` and remember the outcome in the stats row
pub async fn run_janitor(db: &Database, max_age_hours: u32, now: DateTime<Utc>) -> sqlx::Result<JanitorReport> {
    let describe = |deleted: u64| format!("Deleted {} IP(s) last checked over {} hours ago.", deleted, max_age_hours);
    let deleted = db
        .purge_older_than(Duration::hours(i64::from(max_age_hours)), now, |deleted| {
            format!("{} ({})", describe(deleted), now.format("%Y-%m-%d %H:%M:%S UTC"))
        })
        .await?;
    let message = describe(deleted);

    info!("{}", message);
    Ok(JanitorReport { deleted, message })
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub outdated: Vec<Device>,
    /// Aggregated alert, present when anything was outdated
    pub message: Option<String>,
}

/// Report devices silent for longer than `threshold` through one aggregated notification.
/// Device rows are never modified.
pub async fn run_sweep(
    db: &Database,
    notifier: &SharedNotifier,
    title: &str,
    threshold: Duration,
    now: DateTime<Utc>,
) -> sqlx::Result<SweepReport> {
    let outdated = db.outdated_devices(threshold, now).await?;

    if outdated.is_empty() {
        info!("No outdated devices found");
        return Ok(SweepReport { outdated, message: None });
    }

    for device in &outdated {
        let last_update = device
            .last_update
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "Never updated".to_string());
        info!(
            "Device ID: {}, IP: {}, Last Update: {}",
            device.id,
            device.ip.as_deref().unwrap_or("-"),
            last_update
        );
    }

    let labels: Vec<&str> = outdated
        .iter()
        .map(|d| d.ip.as_deref().unwrap_or(d.id.as_str()))
        .collect();
    let message = format!("⛔ {} devices offline : {}", outdated.len(), labels.join(", "));

    match notifier.notify(title, &message).await {
        Ok(()) => info!("Offline notification sent: {}", message),
        Err(e) => error!("Failed to send offline notification: {:#}", e),
    }

    Ok(SweepReport { outdated, message: Some(message) })
}

/// Start the janitor and sweep loops. Both stop when `shutdown` is cancelled.
pub fn start_background_tasks(
    config: &Config,
    db: Database,
    notifier: SharedNotifier,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let janitor = {
        let db = db.clone();
        let shutdown = shutdown.clone();
        let period = config.janitor_interval();
        let max_age_hours = config.janitor.max_age_hours;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Janitor started (every {:?}, max age {}h)", period, max_age_hours);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = run_janitor(&db, max_age_hours, Utc::now()).await {
                            error!("Error occurred while deleting old IPs: {}", e);
                        }
                    }
                }
            }
            info!("Janitor shutting down");
        })
    };

    let sweep = {
        let shutdown = shutdown.clone();
        let period = config.sweep_interval();
        let threshold = config.offline_after();
        let title = config.notify.title.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Device sweep started (every {:?}, offline after {}m)", period, threshold.num_minutes());

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = run_sweep(&db, &notifier, &title, threshold, Utc::now()).await {
                            warn!("Error in device sweep: {}", e);
                        }
                    }
                }
            }
            info!("Device sweep shutting down");
        })
    };

    vec![janitor, sweep]
}
