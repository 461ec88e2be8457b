//! In-memory blob transport.
//!
//! Blobs are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by blob
//! name.  Copies reset the destination's last-modified time the way the
//! Azure service does.  Used as the transport in tests.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::{BlobHeaders, BlobListing, BlobTransport, TransportFuture};
use crate::errors::TransportError;

/// A blob held in memory.
#[derive(Debug, Clone)]
pub struct MemoryBlob {
    pub data: Bytes,
    pub headers: BlobHeaders,
    pub metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

/// In-memory transport.
#[derive(Default)]
pub struct MemoryTransport {
    blobs: tokio::sync::RwLock<HashMap<String, MemoryBlob>>,
    /// When set, every call fails with a 503 status error.
    unavailable: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Read a blob directly, bypassing the transport trait.
    pub async fn blob(&self, key: &str) -> Option<MemoryBlob> {
        self.blobs.read().await.get(key).cloned()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Insert a blob as-is, e.g. a tombstone written by an older revision.
    pub async fn insert(&self, key: &str, blob: MemoryBlob) {
        self.blobs.write().await.insert(key.to_string(), blob);
    }

    fn check_available(&self, operation: &'static str) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                operation,
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl BlobTransport for MemoryTransport {
    fn put_object(
        &self,
        key: &str,
        data: Bytes,
        headers: &BlobHeaders,
    ) -> TransportFuture<'_, ()> {
        let key = key.to_string();
        let headers = headers.clone();
        Box::pin(async move {
            self.check_available("upload")?;
            let blob = MemoryBlob {
                data,
                headers,
                metadata: HashMap::new(),
                last_modified: Utc::now(),
            };
            self.blobs.write().await.insert(key, blob);
            Ok(())
        })
    }

    fn copy_object(
        &self,
        dest_key: &str,
        src_key: &str,
        metadata: &HashMap<String, String>,
    ) -> TransportFuture<'_, ()> {
        let dest_key = dest_key.to_string();
        let src_key = src_key.to_string();
        let metadata = metadata.clone();
        Box::pin(async move {
            self.check_available("copy")?;
            let mut blobs = self.blobs.write().await;
            let source = blobs
                .get(&src_key)
                .cloned()
                .ok_or(TransportError::NotFound { key: src_key })?;
            let copy = MemoryBlob {
                metadata: if metadata.is_empty() {
                    source.metadata
                } else {
                    metadata
                },
                last_modified: Utc::now(),
                ..source
            };
            blobs.insert(dest_key, copy);
            Ok(())
        })
    }

    fn delete_object(&self, key: &str) -> TransportFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.check_available("delete")?;
            self.blobs.write().await.remove(&key);
            Ok(())
        })
    }

    fn list_objects(&self, prefix: &str) -> TransportFuture<'_, Vec<BlobListing>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            self.check_available("list_blobs")?;
            let blobs = self.blobs.read().await;
            let mut listing: Vec<BlobListing> = blobs
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, blob)| BlobListing {
                    key: key.clone(),
                    last_modified: blob.last_modified,
                    metadata: blob.metadata.clone(),
                })
                .collect();
            listing.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(listing)
        })
    }
}
