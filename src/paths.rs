//! Blob path addressing.
//!
//! Keys follow the forum's local-storage layout so URLs written before the
//! switch to Azure keep resolving:
//!
//! ```text
//! original/{depth+1}X/{tree}{sha1}.{ext}
//! optimized/{depth+1}X/{tree}{sha1}_{version}_{w}x{h}.{ext}
//! ```
//!
//! `depth` grows with the upload id (one level per 16x beyond the first
//! thousand ids) and `tree` spreads files over the first `depth` hex
//! characters of the sha1.

use url::Url;

use crate::config::AzureSettings;

/// Prefix of the soft-delete namespace.
pub const TOMBSTONE_PREFIX: &str = "tombstone/";

/// An uploaded file as the host knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub id: u64,
    pub sha1: String,
    /// Extension without the leading dot.
    pub extension: Option<String>,
    pub original_filename: String,
}

impl UploadRecord {
    /// Extension to use in the key, falling back to the original filename.
    ///
    /// Filenames without a dot, or whose only dot leads (`.bashrc`), have
    /// no extension and their key has no suffix.
    pub fn key_extension(&self) -> Option<&str> {
        if let Some(ext) = self.extension.as_deref().filter(|e| !e.is_empty()) {
            return Some(ext);
        }
        match self.original_filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }
}

/// A resized or recompressed derivative of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedImageRecord {
    pub upload: UploadRecord,
    pub width: u32,
    pub height: u32,
    /// `None` means version 1.
    pub version: Option<u32>,
    /// Extension including the leading dot, e.g. `.png`.
    pub extension: String,
}

/// A blob's container plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobLocation {
    pub container: String,
    pub key: String,
}

/// Directory depth for an upload id.
pub fn depth_for(id: u64) -> usize {
    if id == 0 {
        return 0;
    }
    let depth = (id as f64 / 1000.0).log(16.0).ceil();
    if depth > 0.0 {
        depth as usize
    } else {
        0
    }
}

fn path_for(kind: &str, id: u64, sha1: &str, suffix: &str) -> String {
    let depth = depth_for(id);
    let tree: String = sha1.chars().take(depth).map(|c| format!("{c}/")).collect();
    format!("{kind}/{}X/{tree}{sha1}{suffix}", depth + 1)
}

/// Key of the original file of `upload`.
pub fn path_for_original(upload: &UploadRecord) -> String {
    path_for(
        "original",
        upload.id,
        &upload.sha1,
        &upload
            .key_extension()
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default(),
    )
}

/// Key of an optimized variant.
pub fn path_for_optimized(image: &OptimizedImageRecord) -> String {
    let suffix = format!(
        "_{}_{}x{}{}",
        image.version.unwrap_or(1),
        image.width,
        image.height,
        image.extension
    );
    path_for("optimized", image.upload.id, &image.upload.sha1, &suffix)
}

/// Key a live blob is moved to when it is removed.
pub fn tombstone_key(key: &str) -> String {
    format!("{TOMBSTONE_PREFIX}{}", key.trim_start_matches('/'))
}

/// Builds URLs for keys and decides which URLs belong to this store.
#[derive(Debug, Clone)]
pub struct BlobAddressing {
    container: String,
    storage_host: String,
    cdn_base: Option<String>,
    cdn_host: Option<String>,
}

impl BlobAddressing {
    pub fn new(settings: &AzureSettings) -> Self {
        let storage_host = format!(
            "{}.blob.{}",
            settings.account_name, settings.endpoint_suffix
        )
        .to_lowercase();

        let cdn_base = settings.cdn().map(|cdn| {
            let cdn = cdn.trim_end_matches('/');
            if cdn.contains("//") {
                cdn.to_string()
            } else {
                format!("//{cdn}")
            }
        });
        let cdn_host = cdn_base.as_deref().and_then(hostname);

        Self {
            container: settings.container_name.clone(),
            storage_host,
            cdn_base,
            cdn_host,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Host name of the blob endpoint, e.g. `acct.blob.core.windows.net`.
    pub fn storage_host(&self) -> &str {
        &self.storage_host
    }

    /// CDN origin with any trailing slash removed.
    pub fn cdn_base(&self) -> Option<&str> {
        self.cdn_base.as_deref()
    }

    /// Schemeless `//{account}.blob.{suffix}/{container}`.
    pub fn storage_base_url(&self) -> String {
        format!("//{}/{}", self.storage_host, self.container)
    }

    pub fn location(&self, key: &str) -> BlobLocation {
        BlobLocation {
            container: self.container.clone(),
            key: key.to_string(),
        }
    }

    /// Externally reachable URL of `key`, on the CDN when one is configured.
    pub fn absolute_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        match &self.cdn_base {
            Some(cdn) => format!("{cdn}/{}/{key}", self.container),
            None => format!("{}/{key}", self.storage_base_url()),
        }
    }

    /// Move a storage URL onto the CDN host, keeping path and query.
    ///
    /// URLs on other hosts, and every URL when no CDN is configured, come
    /// back unchanged.
    pub fn rewrite_to_cdn(&self, url: &str) -> String {
        let Some(cdn) = &self.cdn_base else {
            return url.to_string();
        };
        for scheme in ["//", "https://", "http://"] {
            let prefix = format!("{scheme}{}", self.storage_host);
            if let Some(rest) = url.strip_prefix(&prefix) {
                if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') {
                    return format!("{cdn}{rest}");
                }
            }
        }
        url.to_string()
    }

    /// True iff the URL's host is the blob endpoint or the CDN.
    pub fn is_owned_url(&self, url: &str) -> bool {
        let Some(host) = hostname(url) else {
            return false;
        };
        host == self.storage_host || self.cdn_host.as_deref() == Some(host.as_str())
    }
}

/// Host-relative upload URLs (`/uploads/...`) still live on local disk.
///
/// Returns the relative path for those and `None` for anything absolute,
/// including schemeless `//host/...` URLs.
pub fn local_path_for(url: &str) -> Option<&str> {
    let mut chars = url.chars();
    match (chars.next(), chars.next()) {
        (Some('/'), Some(c)) if c != '/' => Some(url),
        _ => None,
    }
}

/// Query parameter asking Azure to serve the blob as an attachment.
const FORCE_DOWNLOAD_PARAM: &str = "rscd=file;%20attachment";

/// URL of an upload, optionally forcing the browser to download it.
pub fn download_url(url: &str, force_download: bool) -> String {
    if !force_download {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{FORCE_DOWNLOAD_PARAM}")
}

/// Lower-cased host of an absolute or schemeless URL.
fn hostname(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let parsed = if url.starts_with("//") {
        Url::parse(&format!("https:{url}"))
    } else {
        Url::parse(url)
    };
    parsed
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}
