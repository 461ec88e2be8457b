//! Upload store backed by Azure Blob Storage.
//!
//! [`UploadStore`] is the capability the host picks at startup; it gets an
//! [`AzureUploadStore`] from [`select_store`] when Azure is configured and
//! keeps its own default store otherwise.
//!
//! Transport failures never escape as errors.  They are logged with the key
//! and URL involved and reported through [`StoreOutcome::Failed`] or
//! [`RemoveOutcome::Failed`]; callers treat a missing URL as "upload
//! unavailable".

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{AzureSettings, Config};
use crate::errors::TransportError;
use crate::metrics;
use crate::paths::{
    download_url, local_path_for, path_for_optimized, path_for_original, BlobAddressing,
    BlobLocation, OptimizedImageRecord, UploadRecord,
};
use crate::storage::backend::{BlobHeaders, BlobTransport};
use crate::storage::client::ClientCache;
use crate::tombstone::TombstoneManager;

/// Boxed future returned by upload store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of storing a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The blob was written and is reachable at `url`.
    Stored { url: String, location: BlobLocation },
    /// The write failed; nothing is reachable at `url`.
    Failed {
        location: BlobLocation,
        url: String,
        reason: String,
    },
}

impl StoreOutcome {
    /// URL of the stored blob, if the write succeeded.
    pub fn url(&self) -> Option<&str> {
        match self {
            StoreOutcome::Stored { url, .. } => Some(url),
            StoreOutcome::Failed { .. } => None,
        }
    }
}

/// Result of removing a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The blob now lives under `tombstone_key` awaiting the sweep.
    Quarantined { tombstone_key: String },
    /// The URL does not belong to this store; nothing was touched.
    NotOwned,
    /// Copy or delete failed.
    Failed { reason: String },
}

/// Storage capability the host selects at startup.
pub trait UploadStore: Send + Sync {
    /// Store the original file of `upload`.
    fn store_upload(
        &self,
        data: Bytes,
        upload: &UploadRecord,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, StoreOutcome>;

    /// Store an optimized variant of an image.
    fn store_optimized_image(
        &self,
        data: Bytes,
        image: &OptimizedImageRecord,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, StoreOutcome>;

    /// Store `data` at `key`; `filename` drives content type and disposition.
    fn store_file(
        &self,
        data: Bytes,
        key: &str,
        filename: &str,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, StoreOutcome>;

    /// Soft-delete the blob at `key` if `url` belongs to this store.
    fn remove_file(&self, url: &str, key: &str) -> StoreFuture<'_, RemoveOutcome>;

    /// True if `url` was produced by this store.
    fn has_been_uploaded(&self, url: &str) -> bool;

    /// Schemeless base URL of the container.
    fn absolute_base_url(&self) -> String;

    /// CDN origin serving uploads, if any.
    fn cdn_url(&self) -> Option<String>;

    /// Uploads live off the host's disk.
    fn is_external(&self) -> bool {
        true
    }

    fn remove_upload(&self, url: &str, upload: &UploadRecord) -> StoreFuture<'_, RemoveOutcome> {
        self.remove_file(url, &path_for_original(upload))
    }

    fn remove_optimized_image(
        &self,
        url: &str,
        image: &OptimizedImageRecord,
    ) -> StoreFuture<'_, RemoveOutcome> {
        self.remove_file(url, &path_for_optimized(image))
    }

    /// URL to hand to browsers, optionally forcing a download.
    fn url_for(&self, url: &str, force_download: bool) -> String {
        download_url(url, force_download)
    }

    /// Local path for uploads that predate the move to Azure.
    fn path_for(&self, url: &str) -> Option<String> {
        local_path_for(url).map(String::from)
    }
}

/// [`UploadStore`] writing to one Azure container.
#[derive(Clone)]
pub struct AzureUploadStore {
    transport: Arc<dyn BlobTransport>,
    addressing: BlobAddressing,
    tombstones: TombstoneManager,
}

impl AzureUploadStore {
    pub fn new(settings: &AzureSettings, transport: Arc<dyn BlobTransport>) -> Self {
        Self {
            tombstones: TombstoneManager::new(Arc::clone(&transport)),
            addressing: BlobAddressing::new(settings),
            transport,
        }
    }

    /// Build a store on the cached Azure client for `settings`.
    pub fn from_settings(
        settings: &AzureSettings,
        cache: &ClientCache,
    ) -> Result<Self, TransportError> {
        let transport: Arc<dyn BlobTransport> = cache.get_or_build(settings)?;
        Ok(Self::new(settings, transport))
    }

    pub fn addressing(&self) -> &BlobAddressing {
        &self.addressing
    }

    pub fn tombstones(&self) -> &TombstoneManager {
        &self.tombstones
    }

    /// Rewrite a storage URL onto the CDN host.
    pub fn cdn_url_for(&self, url: &str) -> String {
        self.addressing.rewrite_to_cdn(url)
    }

    async fn write(
        &self,
        data: Bytes,
        key: String,
        filename: String,
        content_type: Option<String>,
    ) -> StoreOutcome {
        let url = self.addressing.absolute_url(&key);
        let location = self.addressing.location(&key);
        let headers = upload_headers(&data, &filename, content_type.as_deref());

        debug!(
            "Storing {} ({} bytes, {}) at {}",
            key,
            data.len(),
            headers.content_type,
            url
        );

        match self.transport.put_object(&key, data, &headers).await {
            Ok(()) => {
                metrics::record_upload("ok");
                StoreOutcome::Stored { url, location }
            }
            Err(e) => {
                warn!("Failed to upload {} to {}: {}", key, url, e);
                metrics::record_upload("failed");
                StoreOutcome::Failed {
                    location,
                    url,
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl UploadStore for AzureUploadStore {
    fn store_upload(
        &self,
        data: Bytes,
        upload: &UploadRecord,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, StoreOutcome> {
        let key = path_for_original(upload);
        let filename = upload.original_filename.clone();
        let content_type = content_type.map(String::from);
        Box::pin(self.write(data, key, filename, content_type))
    }

    fn store_optimized_image(
        &self,
        data: Bytes,
        image: &OptimizedImageRecord,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, StoreOutcome> {
        let key = path_for_optimized(image);
        let filename = key.rsplit('/').next().unwrap_or_default().to_string();
        let content_type = content_type.map(String::from);
        Box::pin(self.write(data, key, filename, content_type))
    }

    fn store_file(
        &self,
        data: Bytes,
        key: &str,
        filename: &str,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, StoreOutcome> {
        let key = key.trim_start_matches('/').to_string();
        let filename = filename.to_string();
        let content_type = content_type.map(String::from);
        Box::pin(self.write(data, key, filename, content_type))
    }

    fn remove_file(&self, url: &str, key: &str) -> StoreFuture<'_, RemoveOutcome> {
        let url = url.to_string();
        let key = key.to_string();
        Box::pin(async move {
            if !self.has_been_uploaded(&url) {
                debug!("Not removing {}: {} is not an Azure URL", key, url);
                metrics::record_removal("not_owned");
                return RemoveOutcome::NotOwned;
            }

            match self.tombstones.quarantine(&key, Utc::now()).await {
                Ok(tombstone_key) => {
                    metrics::record_removal("ok");
                    RemoveOutcome::Quarantined { tombstone_key }
                }
                Err(e) => {
                    warn!("Failed to remove {} ({}): {}", key, url, e);
                    metrics::record_removal("failed");
                    RemoveOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        })
    }

    fn has_been_uploaded(&self, url: &str) -> bool {
        self.addressing.is_owned_url(url)
    }

    fn absolute_base_url(&self) -> String {
        self.addressing.storage_base_url()
    }

    fn cdn_url(&self) -> Option<String> {
        self.addressing.cdn_base().map(String::from)
    }
}

/// Pick the upload store for `config`.
///
/// `None` means Azure is disabled or incompletely configured and the host
/// should keep its default store.
pub fn select_store(
    config: &Config,
    cache: &ClientCache,
) -> Result<Option<Arc<dyn UploadStore>>, TransportError> {
    if !config.azure.is_usable() {
        debug!("Azure uploads not configured; keeping the default store");
        return Ok(None);
    }
    let store = AzureUploadStore::from_settings(&config.azure, cache)?;
    info!(
        "Uploads go to Azure container {}",
        store.addressing().storage_base_url()
    );
    Ok(Some(Arc::new(store)))
}

// -- Headers -----------------------------------------------------------------

/// Content type for `filename` by extension, `application/octet-stream`
/// when unknown.
pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// `Content-Disposition` forcing a download, with an ASCII fallback name
/// and the exact UTF-8 name.
pub fn attachment_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

fn upload_headers(data: &[u8], filename: &str, content_type: Option<&str>) -> BlobHeaders {
    let content_type = content_type
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .map(String::from)
        .unwrap_or_else(|| content_type_for(filename));

    let content_disposition =
        (!content_type.starts_with("image/")).then(|| attachment_disposition(filename));

    let mut hasher = Md5::new();
    hasher.update(data);
    let content_md5 = BASE64_STANDARD.encode(hasher.finalize());

    BlobHeaders {
        content_type,
        content_disposition,
        content_md5: Some(content_md5),
    }
}
