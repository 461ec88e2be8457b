//! Abstract blob transport trait.
//!
//! Every object storage service the upload store can talk to implements
//! [`BlobTransport`].  All keys are relative to the single container the
//! transport was built for.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::errors::TransportError;

/// Boxed future returned by every transport call.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Headers stored alongside an uploaded blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobHeaders {
    /// MIME type served back to clients.
    pub content_type: String,
    /// `Content-Disposition` served back to clients, if any.
    pub content_disposition: Option<String>,
    /// Base64 MD5 of the payload for service-side validation.
    pub content_md5: Option<String>,
}

/// One entry of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobListing {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    /// User-defined metadata (`x-ms-meta-*`), keys lower-cased.
    pub metadata: HashMap<String, String>,
}

/// Async object storage contract.
pub trait BlobTransport: Send + Sync + 'static {
    /// Write `data` to `key`, replacing any existing blob.
    fn put_object(&self, key: &str, data: Bytes, headers: &BlobHeaders)
        -> TransportFuture<'_, ()>;

    /// Server-side copy of `src_key` to `dest_key`, attaching `metadata`
    /// to the copy.
    fn copy_object(
        &self,
        dest_key: &str,
        src_key: &str,
        metadata: &HashMap<String, String>,
    ) -> TransportFuture<'_, ()>;

    /// Delete `key`.  Deleting an absent blob succeeds.
    fn delete_object(&self, key: &str) -> TransportFuture<'_, ()>;

    /// List every blob whose key starts with `prefix`, including metadata.
    fn list_objects(&self, prefix: &str) -> TransportFuture<'_, Vec<BlobListing>>;
}
