//! Operator CLI for the Azure upload store.
//!
//! One-shot commands run a single job and exit; `daemon` runs the daily
//! jobs until SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use azure_upload_store::config::{Config, LoggingConfig};
use azure_upload_store::jobs::{self, ExpiryCheckOutcome};
use azure_upload_store::storage::client::ClientCache;
use azure_upload_store::store::AzureUploadStore;
use azure_upload_store::watchdog::LogNotificationSink;

const DAILY: Duration = Duration::from_secs(24 * 60 * 60);

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "azure-upload-store",
    version,
    about = "Maintenance jobs for uploads stored in Azure Blob Storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "azure-upload-store.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Purge tombstones older than the grace period.
    Sweep {
        /// Override `tombstone.grace_period_days`.
        #[arg(long)]
        grace_days: Option<u32>,
    },
    /// Warn if the SAS token expires on one of the warning days.
    CheckExpiry,
    /// Install the read CORS rule on the storage account if none exists.
    EnsureCors,
    /// Run the daily jobs until interrupted.
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = azure_upload_store::config::load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let cache = ClientCache::new();

    match cli.command {
        Command::Sweep { grace_days } => {
            let store = require_store(&config, &cache)?;
            let grace_days = grace_days.unwrap_or(config.tombstone.grace_period_days);
            let report = jobs::run_sweep(&store, grace_days).await?;
            info!(
                "Purged {} of {} tombstones ({} retained, {} failed)",
                report.purged, report.examined, report.retained, report.failed
            );
        }
        Command::CheckExpiry => {
            let outcome =
                jobs::run_expiry_check(&config, &LogNotificationSink, Utc::now().date_naive())
                    .await;
            info!("SAS expiry check: {:?}", outcome);
            if let ExpiryCheckOutcome::DeliveryFailed { reason } = outcome {
                anyhow::bail!("expiry warning not delivered: {reason}");
            }
        }
        Command::EnsureCors => {
            require_store(&config, &cache)?;
            let transport = cache.get_or_build(&config.azure)?;
            if transport.ensure_cors().await? {
                info!("Added CORS rule to storage account {}", config.azure.account_name);
            } else {
                info!("Storage account {} already has CORS rules", config.azure.account_name);
            }
        }
        Command::Daemon => {
            if config.observability.metrics {
                let listen: SocketAddr = config
                    .observability
                    .metrics_listen
                    .parse()
                    .with_context(|| {
                        format!(
                            "invalid observability.metrics_listen {:?}",
                            config.observability.metrics_listen
                        )
                    })?;
                azure_upload_store::metrics::init_metrics(listen)?;
                info!("Prometheus metrics exporter listening on {}", listen);
            }

            let store = if config.azure.is_usable() {
                Some(AzureUploadStore::from_settings(&config.azure, &cache)?)
            } else {
                info!("Azure uploads not configured; only the expiry check will run");
                None
            };

            jobs::run_daily(
                &config,
                store.as_ref(),
                &LogNotificationSink,
                DAILY,
                shutdown_signal(),
            )
            .await;
        }
    }

    Ok(())
}

/// Initialize tracing from `RUST_LOG`, falling back to the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn require_store(config: &Config, cache: &ClientCache) -> anyhow::Result<AzureUploadStore> {
    if !config.azure.is_usable() {
        anyhow::bail!(
            "Azure uploads are not configured: set azure.enabled, account_name, \
             container_name and a sas_token or access_key"
        );
    }
    Ok(AzureUploadStore::from_settings(&config.azure, cache)?)
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
