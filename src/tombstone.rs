//! Tombstone lifecycle: `live -> quarantined -> purged`.
//!
//! Removing a blob copies it to `tombstone/{key}` with a `removed_at`
//! metadata entry and then deletes the original.  The two steps are not
//! atomic; a crash between them leaves the blob in both places, and the
//! live copy is simply orphaned.
//!
//! The sweep purges tombstones whose age is strictly greater than the grace
//! period.  Age is measured from `removed_at`; tombstones written without it
//! fall back to the blob's last-modified time, which a copy may reset.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::TransportError;
use crate::paths::{tombstone_key, TOMBSTONE_PREFIX};
use crate::storage::backend::{BlobListing, BlobTransport};

/// Metadata key holding the RFC 3339 removal time.
pub const REMOVED_AT_METADATA: &str = "removed_at";

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub purged: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Moves removed blobs into the tombstone namespace and purges them later.
#[derive(Clone)]
pub struct TombstoneManager {
    transport: Arc<dyn BlobTransport>,
}

impl TombstoneManager {
    pub fn new(transport: Arc<dyn BlobTransport>) -> Self {
        Self { transport }
    }

    /// Quarantine `key`, returning the tombstone key it now lives under.
    pub async fn quarantine(&self, key: &str, now: DateTime<Utc>) -> Result<String, TransportError> {
        let source = key.trim_start_matches('/');
        let destination = tombstone_key(source);
        let metadata = HashMap::from([(REMOVED_AT_METADATA.to_string(), now.to_rfc3339())]);

        self.transport
            .copy_object(&destination, source, &metadata)
            .await?;
        self.transport.delete_object(source).await?;

        debug!("Quarantined {} as {}", source, destination);
        Ok(destination)
    }

    /// Permanently delete tombstones older than `grace_period`.
    ///
    /// A failed delete is counted and the sweep carries on; only a failed
    /// listing aborts it.
    pub async fn sweep(
        &self,
        grace_period: Duration,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, TransportError> {
        let listing = self.transport.list_objects(TOMBSTONE_PREFIX).await?;
        let mut report = SweepReport {
            examined: listing.len(),
            ..SweepReport::default()
        };

        for blob in &listing {
            let age = now - removed_at(blob);
            if age <= grace_period {
                report.retained += 1;
                continue;
            }

            match self.transport.delete_object(&blob.key).await {
                Ok(()) => {
                    debug!("Purged {} ({} days old)", blob.key, age.num_days());
                    report.purged += 1;
                }
                Err(e) => {
                    warn!("Failed to purge {}: {}", blob.key, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Tombstone sweep: examined={} purged={} retained={} failed={}",
            report.examined, report.purged, report.retained, report.failed
        );
        Ok(report)
    }
}

/// Reference time of a tombstone.
fn removed_at(blob: &BlobListing) -> DateTime<Utc> {
    match blob.metadata.get(REMOVED_AT_METADATA) {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(
                    "Tombstone {} has unreadable removed_at {:?} ({}), using last-modified",
                    blob.key, raw, e
                );
                blob.last_modified
            }
        },
        None => blob.last_modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::BlobHeaders;
    use crate::storage::memory::{MemoryBlob, MemoryTransport};
    use bytes::Bytes;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    async fn setup() -> (Arc<MemoryTransport>, TombstoneManager) {
        let transport = Arc::new(MemoryTransport::new());
        let manager = TombstoneManager::new(transport.clone());
        (transport, manager)
    }

    async fn put(transport: &MemoryTransport, key: &str) {
        transport
            .put_object(key, Bytes::from("data"), &BlobHeaders::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quarantine_moves_blob() {
        let (transport, manager) = setup().await;
        put(&transport, "original/1X/abc.png").await;

        let tombstone = manager
            .quarantine("original/1X/abc.png", at(1))
            .await
            .unwrap();

        assert_eq!(tombstone, "tombstone/original/1X/abc.png");
        assert!(transport.blob("original/1X/abc.png").await.is_none());
        let blob = transport.blob(&tombstone).await.unwrap();
        assert_eq!(blob.data, Bytes::from("data"));
        assert_eq!(
            blob.metadata.get(REMOVED_AT_METADATA),
            Some(&at(1).to_rfc3339())
        );
    }

    #[tokio::test]
    async fn test_quarantine_missing_blob_fails() {
        let (_transport, manager) = setup().await;
        let err = manager.quarantine("original/1X/none.png", at(1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_sweep_purges_only_expired() {
        let (transport, manager) = setup().await;
        put(&transport, "old.png").await;
        put(&transport, "new.png").await;
        manager.quarantine("old.png", at(1)).await.unwrap();
        manager.quarantine("new.png", at(9)).await.unwrap();

        let report = manager.sweep(Duration::days(7), at(10)).await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                examined: 2,
                purged: 1,
                retained: 1,
                failed: 0
            }
        );
        assert!(transport.blob("tombstone/old.png").await.is_none());
        assert!(transport.blob("tombstone/new.png").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_boundary_is_strict() {
        let (transport, manager) = setup().await;
        put(&transport, "edge.png").await;
        manager.quarantine("edge.png", at(1)).await.unwrap();

        // Exactly the grace period old: kept.
        let report = manager.sweep(Duration::days(7), at(8)).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(transport.blob("tombstone/edge.png").await.is_some());

        let later = at(8) + Duration::seconds(1);
        let report = manager.sweep(Duration::days(7), later).await.unwrap();
        assert_eq!(report.purged, 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (transport, manager) = setup().await;
        put(&transport, "a.png").await;
        manager.quarantine("a.png", at(1)).await.unwrap();

        let first = manager.sweep(Duration::days(1), at(20)).await.unwrap();
        assert_eq!(first.purged, 1);

        let second = manager.sweep(Duration::days(1), at(20)).await.unwrap();
        assert_eq!(second, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_ignores_live_namespace() {
        let (transport, manager) = setup().await;
        put(&transport, "original/1X/live.png").await;

        let report = manager.sweep(Duration::zero(), at(30)).await.unwrap();
        assert_eq!(report.examined, 0);
        assert!(transport.blob("original/1X/live.png").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_falls_back_to_last_modified() {
        let (transport, manager) = setup().await;
        let legacy = |last_modified, metadata| MemoryBlob {
            data: Bytes::from("x"),
            headers: BlobHeaders::default(),
            metadata,
            last_modified,
        };
        transport
            .insert("tombstone/legacy.png", legacy(at(1), HashMap::new()))
            .await;
        transport
            .insert(
                "tombstone/garbled.png",
                legacy(
                    at(9),
                    HashMap::from([(REMOVED_AT_METADATA.to_string(), "yesterday".to_string())]),
                ),
            )
            .await;

        let report = manager.sweep(Duration::days(5), at(10)).await.unwrap();

        assert_eq!(report.purged, 1);
        assert_eq!(report.retained, 1);
        assert!(transport.blob("tombstone/legacy.png").await.is_none());
        assert!(transport.blob("tombstone/garbled.png").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_listing_failure_is_error() {
        let (transport, manager) = setup().await;
        transport.set_unavailable(true);
        assert!(manager.sweep(Duration::days(1), at(10)).await.is_err());
    }
}
