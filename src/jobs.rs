//! Scheduled jobs: the tombstone sweep and the SAS expiry check.
//!
//! Both are plain async functions the host's scheduler can call once a day;
//! [`run_daily`] drives them on a `tokio` interval for the operator daemon.

use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::TransportError;
use crate::metrics;
use crate::store::AzureUploadStore;
use crate::tombstone::SweepReport;
use crate::watchdog::{ExpiryWatchdog, NotificationSink};

/// What one run of the expiry check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryCheckOutcome {
    /// No SAS token is configured.
    NothingToCheck,
    /// The token has no `se` parameter or today is not a warning day.
    NotDue,
    /// A warning was delivered.
    Warned { days_left: i64 },
    /// The token's expiry could not be read; nothing was sent.
    Skipped { reason: String },
    /// The warning could not be delivered.
    DeliveryFailed { reason: String },
}

/// Purge tombstones older than `grace_days`.
pub async fn run_sweep(
    store: &AzureUploadStore,
    grace_days: u32,
) -> Result<SweepReport, TransportError> {
    let grace = chrono::Duration::days(i64::from(grace_days));
    let report = store.tombstones().sweep(grace, Utc::now()).await?;
    metrics::record_purged(report.purged as u64);
    Ok(report)
}

/// Warn the administrators if the configured SAS token expires on one of
/// the warning days counted from `today`.
pub async fn run_expiry_check(
    config: &Config,
    sink: &dyn NotificationSink,
    today: NaiveDate,
) -> ExpiryCheckOutcome {
    let Some(token) = config
        .azure
        .sas_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        debug!("No SAS token configured, skipping expiry check");
        return ExpiryCheckOutcome::NothingToCheck;
    };

    let watchdog = ExpiryWatchdog::from_config(&config.watchdog);
    let notification = match watchdog.check_and_warn(token, today) {
        Ok(Some(notification)) => notification,
        Ok(None) => return ExpiryCheckOutcome::NotDue,
        Err(e) => {
            warn!("Skipping SAS expiry check: {}", e);
            return ExpiryCheckOutcome::Skipped {
                reason: e.to_string(),
            };
        }
    };

    match sink.deliver(&notification).await {
        Ok(()) => {
            info!(
                "Sent SAS expiry warning: {} days left",
                notification.days_left
            );
            metrics::record_expiry_warning();
            ExpiryCheckOutcome::Warned {
                days_left: notification.days_left,
            }
        }
        Err(e) => {
            warn!("Failed to deliver SAS expiry warning: {:#}", e);
            ExpiryCheckOutcome::DeliveryFailed {
                reason: e.to_string(),
            }
        }
    }
}

/// Run both jobs every `period` until `shutdown` resolves.
///
/// The first run happens immediately.  Without a store only the expiry
/// check runs.
pub async fn run_daily<F>(
    config: &Config,
    store: Option<&AzureUploadStore>,
    sink: &dyn NotificationSink,
    period: Duration,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Scheduled jobs stopped");
                return;
            }
        }

        if let Some(store) = store {
            if let Err(e) = run_sweep(store, config.tombstone.grace_period_days).await {
                warn!("Tombstone sweep failed: {}", e);
            }
        }
        run_expiry_check(config, sink, Utc::now().date_naive()).await;
    }
}
