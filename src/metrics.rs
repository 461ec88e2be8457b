//! Prometheus metrics for the upload store.
//!
//! Defines metric name constants and installs the global Prometheus
//! recorder with its own HTTP listener for daemon mode.  Library code only
//! records through the `metrics` macros, which are no-ops until a recorder
//! is installed.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Uploads attempted (counter). Labels: status.
pub const UPLOADS_TOTAL: &str = "azure_upload_store_uploads_total";

/// Removals attempted (counter). Labels: status.
pub const REMOVALS_TOTAL: &str = "azure_upload_store_removals_total";

/// Tombstoned blobs purged by the sweep (counter).
pub const TOMBSTONES_PURGED_TOTAL: &str = "azure_upload_store_tombstones_purged_total";

/// SAS expiry warnings sent (counter).
pub const EXPIRY_WARNINGS_TOTAL: &str = "azure_upload_store_expiry_warnings_total";

// -- Global recorder installation ---------------------------------------------

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global Prometheus recorder and exporter on `listen`.
/// Idempotent; later calls are ignored.
pub fn init_metrics(listen: SocketAddr) -> anyhow::Result<()> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;
    let _ = INSTALLED.set(());
    describe_metrics();
    Ok(())
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(UPLOADS_TOTAL, "Uploads to Azure by outcome");
    describe_counter!(REMOVALS_TOTAL, "Removals (quarantines) by outcome");
    describe_counter!(TOMBSTONES_PURGED_TOTAL, "Tombstoned blobs permanently deleted");
    describe_counter!(EXPIRY_WARNINGS_TOTAL, "SAS token expiry warnings sent");
}

pub(crate) fn record_upload(status: &'static str) {
    counter!(UPLOADS_TOTAL, "status" => status).increment(1);
}

pub(crate) fn record_removal(status: &'static str) {
    counter!(REMOVALS_TOTAL, "status" => status).increment(1);
}

pub(crate) fn record_purged(count: u64) {
    counter!(TOMBSTONES_PURGED_TOTAL).increment(count);
}

pub(crate) fn record_expiry_warning() {
    counter!(EXPIRY_WARNINGS_TOTAL).increment(1);
}
