//! Azure Blob Storage transport.
//!
//! Talks to one Azure container through the Blob REST API using `reqwest`.
//!
//! Operations used:
//!   `put_object()`    -> Put Blob (BlockBlob)
//!   `copy_object()`   -> Copy Blob, polling Get Blob Properties while pending
//!   `delete_object()` -> Delete Blob (404 is success)
//!   `list_objects()`  -> List Blobs with `include=metadata`, following `NextMarker`
//!   `ensure_cors()`   -> Get/Set Blob Service Properties
//!
//! Authorization comes from the resolved [`CredentialSet`]:
//!   - SAS token: appended to every request URL (and to copy sources)
//!   - access key: Shared Key `Authorization` header (HMAC-SHA256)
//!   - none: requests go out anonymous and the service decides

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, StatusCode};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{BlobHeaders, BlobListing, BlobTransport, TransportFuture};
use crate::credentials::{Credential, CredentialSet};
use crate::errors::TransportError;

/// Azure REST API version used for all requests.
const AZURE_API_VERSION: &str = "2023-11-03";

/// How often a pending server-side copy is polled before giving up.
const COPY_POLL_ATTEMPTS: u32 = 20;
const COPY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Metadata header prefix for user-defined blob metadata.
const META_HEADER_PREFIX: &str = "x-ms-meta-";

/// Transport that forwards operations to an Azure Blob Storage container.
pub struct AzureBlobTransport {
    /// HTTP client for Azure Blob REST API calls.
    client: reqwest::Client,
    /// The Azure container name.
    container: String,
    /// Azure storage account name.
    account: String,
    /// The base URL for the Azure Blob service endpoint.
    base_url: String,
    /// Authentication method.
    auth: AzureAuth,
}

/// Azure authentication method.
enum AzureAuth {
    /// Shared Key authentication using the base64 storage account key.
    SharedKey { key: String },
    /// SAS token authentication (appended as query parameter).
    SasToken { token: String },
    /// No credential.
    Anonymous,
}

/// What a request addresses; decides both URL and canonicalized resource.
#[derive(Debug, Clone, Copy)]
enum Resource<'a> {
    Service,
    Container,
    Blob(&'a str),
}

impl AzureBlobTransport {
    /// Create a transport for `container` under the credential's account.
    pub fn new(
        credentials: CredentialSet,
        container: String,
        endpoint_suffix: &str,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|source| TransportError::Request {
                operation: "client",
                source,
            })?;

        let base_url = format!(
            "https://{}.blob.{}",
            credentials.account_name, endpoint_suffix
        );

        let auth = match credentials.credential {
            Credential::SasToken(token) => AzureAuth::SasToken { token },
            Credential::AccessKey(key) => AzureAuth::SharedKey { key },
            Credential::None => AzureAuth::Anonymous,
        };

        info!(
            "Azure blob transport initialized: account={} container={} auth={}",
            credentials.account_name,
            container,
            auth.label()
        );

        Ok(Self {
            client,
            container,
            account: credentials.account_name,
            base_url,
            auth,
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Build the full URL for a blob.
    fn blob_url(&self, blob_name: &str) -> String {
        let encoded_blob =
            percent_encoding::utf8_percent_encode(blob_name, &AZURE_BLOB_ENCODE_SET).to_string();
        format!("{}/{}/{}", self.base_url, self.container, encoded_blob)
    }

    fn resource_url(&self, resource: Resource<'_>) -> String {
        match resource {
            Resource::Service => format!("{}/", self.base_url),
            Resource::Container => format!("{}/{}", self.base_url, self.container),
            Resource::Blob(name) => self.blob_url(name),
        }
    }

    fn canonicalized_resource(&self, resource: Resource<'_>) -> String {
        match resource {
            Resource::Service => format!("/{}/", self.account),
            Resource::Container => format!("/{}/{}", self.account, self.container),
            // Shared Key uses the un-encoded blob name here.
            Resource::Blob(name) => format!("/{}/{}/{}", self.account, self.container, name),
        }
    }

    /// Append SAS token to a URL if using SAS auth.
    fn maybe_append_sas(&self, url: &str) -> String {
        match &self.auth {
            AzureAuth::SasToken { token } => {
                if url.contains('?') {
                    format!("{}&{}", url, token)
                } else {
                    format!("{}?{}", url, token)
                }
            }
            AzureAuth::SharedKey { .. } | AzureAuth::Anonymous => url.to_string(),
        }
    }

    /// Get the current UTC date in RFC 1123 format for Azure headers.
    fn rfc1123_date() -> String {
        httpdate::fmt_http_date(std::time::SystemTime::now())
    }

    /// Compute the Shared Key `Authorization` header value.
    fn sign_request(
        &self,
        key: &str,
        request: &SignedParts<'_>,
        resource: Resource<'_>,
    ) -> Result<String, TransportError> {
        let key_bytes = BASE64_STANDARD
            .decode(key)
            .map_err(|e| TransportError::Auth(format!("access key is not valid base64: {e}")))?;

        let string_to_sign = string_to_sign(request, &self.canonicalized_resource(resource));

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(&key_bytes)
            .map_err(|e| TransportError::Auth(format!("HMAC key error: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    /// Build an authorized request.
    ///
    /// `ms_headers` are extra `x-ms-*` headers; `x-ms-date` and
    /// `x-ms-version` are always added.
    #[allow(clippy::too_many_arguments)]
    fn request(
        &self,
        method: Method,
        resource: Resource<'_>,
        query: &[(&str, String)],
        ms_headers: Vec<(String, String)>,
        content_type: &str,
        content_md5: &str,
        body: Option<Vec<u8>>,
    ) -> Result<RequestBuilder, TransportError> {
        let date = Self::rfc1123_date();

        let mut all_ms_headers = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
        ];
        all_ms_headers.extend(
            ms_headers
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v)),
        );

        let mut url = self.resource_url(resource);
        if !query.is_empty() {
            let encoded: Vec<String> = query
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        k,
                        percent_encoding::utf8_percent_encode(v, &AZURE_BLOB_ENCODE_SET)
                    )
                })
                .collect();
            url.push('?');
            url.push_str(&encoded.join("&"));
        }

        let content_length = body.as_ref().map_or(0, Vec::len);
        let mut req = self.client.request(method.clone(), self.maybe_append_sas(&url));
        for (k, v) in &all_ms_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if !content_type.is_empty() {
            req = req.header("Content-Type", content_type);
        }
        if !content_md5.is_empty() {
            req = req.header("Content-MD5", content_md5);
        }

        if let AzureAuth::SharedKey { key } = &self.auth {
            let parts = SignedParts {
                method: method.as_str(),
                content_length,
                content_md5,
                content_type,
                ms_headers: &all_ms_headers,
                query,
            };
            req = req.header("Authorization", self.sign_request(key, &parts, resource)?);
        }

        if let Some(body) = body {
            req = req.body(body);
        }
        Ok(req)
    }

    /// Send `req`, mapping transport and status failures.
    async fn send(
        operation: &'static str,
        req: RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let resp = req
            .send()
            .await
            .map_err(|source| TransportError::Request { operation, source })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    // -- Azure Blob REST API operations ----------------------------------------

    /// Upload a blob (Put Blob) to Azure.
    async fn azure_upload(
        &self,
        blob_name: &str,
        data: Bytes,
        headers: &BlobHeaders,
    ) -> Result<(), TransportError> {
        let mut ms_headers = vec![("x-ms-blob-type".to_string(), "BlockBlob".to_string())];
        if let Some(disposition) = &headers.content_disposition {
            ms_headers.push((
                "x-ms-blob-content-disposition".to_string(),
                disposition.clone(),
            ));
        }

        let req = self.request(
            Method::PUT,
            Resource::Blob(blob_name),
            &[],
            ms_headers,
            &headers.content_type,
            headers.content_md5.as_deref().unwrap_or_default(),
            Some(data.to_vec()),
        )?;
        Self::send("upload", req).await?;
        Ok(())
    }

    /// Copy a blob using Azure server-side copy (Copy Blob).
    ///
    /// Copies within one account normally complete synchronously; a pending
    /// copy is polled until it settles so the caller can safely delete the
    /// source afterwards.
    async fn azure_copy(
        &self,
        src_blob_name: &str,
        dst_blob_name: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let src_url = self.maybe_append_sas(&self.blob_url(src_blob_name));

        let mut ms_headers = vec![("x-ms-copy-source".to_string(), src_url)];
        for (k, v) in metadata {
            ms_headers.push((format!("{META_HEADER_PREFIX}{k}"), v.clone()));
        }

        let req = self.request(
            Method::PUT,
            Resource::Blob(dst_blob_name),
            &[],
            ms_headers,
            "",
            "",
            Some(Vec::new()),
        )?;

        let resp = match Self::send("copy", req).await {
            Err(e) if e.is_not_found() => {
                return Err(TransportError::NotFound {
                    key: src_blob_name.to_string(),
                })
            }
            other => other?,
        };

        let mut status = copy_status(resp.headers());
        let mut attempts = 0;
        while status.as_deref() == Some("pending") && attempts < COPY_POLL_ATTEMPTS {
            tokio::time::sleep(COPY_POLL_INTERVAL).await;
            attempts += 1;
            let req = self.request(
                Method::HEAD,
                Resource::Blob(dst_blob_name),
                &[],
                Vec::new(),
                "",
                "",
                None,
            )?;
            status = copy_status(Self::send("copy_status", req).await?.headers());
        }

        match status.as_deref() {
            None | Some("success") => Ok(()),
            Some(other) => Err(TransportError::Status {
                operation: "copy",
                status: StatusCode::CONFLICT.as_u16(),
                body: format!("copy of {src_blob_name} ended in state {other}"),
            }),
        }
    }

    /// Delete a blob from Azure. Idempotent (ignores 404).
    async fn azure_delete(&self, blob_name: &str) -> Result<(), TransportError> {
        let req = self.request(
            Method::DELETE,
            Resource::Blob(blob_name),
            &[],
            Vec::new(),
            "",
            "",
            None,
        )?;
        match Self::send("delete", req).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    /// List blobs in the container with a given prefix.
    ///
    /// Uses the List Blobs API with pagination.
    async fn azure_list_blobs(&self, prefix: &str) -> Result<Vec<BlobListing>, TransportError> {
        let mut all: Vec<BlobListing> = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![
                ("comp", "list".to_string()),
                ("include", "metadata".to_string()),
                ("prefix", prefix.to_string()),
                ("restype", "container".to_string()),
            ];
            if let Some(ref m) = marker {
                query.push(("marker", m.clone()));
            }

            let req = self.request(
                Method::GET,
                Resource::Container,
                &query,
                Vec::new(),
                "",
                "",
                None,
            )?;
            let body = Self::send("list_blobs", req)
                .await?
                .text()
                .await
                .map_err(|source| TransportError::Request {
                    operation: "list_blobs",
                    source,
                })?;

            let (mut page, next_marker) = parse_list_blobs(&body)?;
            all.append(&mut page);

            match next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        Ok(all)
    }

    /// Install a read-only CORS rule on the storage account when none exists.
    ///
    /// Returns `true` when a rule was installed.
    pub async fn ensure_cors(&self) -> Result<bool, TransportError> {
        let query = [
            ("comp", "properties".to_string()),
            ("restype", "service".to_string()),
        ];

        let req = self.request(
            Method::GET,
            Resource::Service,
            &query,
            Vec::new(),
            "",
            "",
            None,
        )?;
        let body = Self::send("get_service_properties", req)
            .await?
            .text()
            .await
            .map_err(|source| TransportError::Request {
                operation: "get_service_properties",
                source,
            })?;

        if has_cors_rules(&body)? {
            debug!("Azure CORS rules already present on {}", self.account);
            return Ok(false);
        }

        info!("Installing CORS rule on {}", self.account);
        let xml = cors_properties_xml().into_bytes();
        let req = self.request(
            Method::PUT,
            Resource::Service,
            &query,
            Vec::new(),
            "application/xml",
            "",
            Some(xml),
        )?;
        Self::send("set_service_properties", req).await?;
        Ok(true)
    }
}

impl AzureAuth {
    fn label(&self) -> &'static str {
        match self {
            AzureAuth::SharedKey { .. } => "shared-key",
            AzureAuth::SasToken { .. } => "sas",
            AzureAuth::Anonymous => "anonymous",
        }
    }
}

/// Inputs of the Shared Key string-to-sign.
struct SignedParts<'a> {
    method: &'a str,
    content_length: usize,
    content_md5: &'a str,
    content_type: &'a str,
    ms_headers: &'a [(String, String)],
    query: &'a [(&'a str, String)],
}

/// Build the Shared Key string-to-sign.
///
/// ```text
/// VERB\n
/// Content-Encoding\n
/// Content-Language\n
/// Content-Length\n
/// Content-MD5\n
/// Content-Type\n
/// Date\n
/// If-Modified-Since\n
/// If-Match\n
/// If-None-Match\n
/// If-Unmodified-Since\n
/// Range\n
/// CanonicalizedHeaders\n
/// CanonicalizedResource
/// ```
fn string_to_sign(parts: &SignedParts<'_>, canonicalized_resource: &str) -> String {
    // Content-Length is empty for zero-length bodies.
    let content_length = match parts.content_length {
        0 => String::new(),
        len => len.to_string(),
    };

    let mut ms_headers: Vec<(String, String)> = parts
        .ms_headers
        .iter()
        .filter(|(k, _)| k.starts_with("x-ms-"))
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    ms_headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonicalized_headers = ms_headers
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut resource = canonicalized_resource.to_string();
    let mut sorted_params: Vec<(String, &str)> = parts
        .query
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();
    sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in &sorted_params {
        resource.push_str(&format!("\n{}:{}", k, v));
    }

    format!(
        "{}\n\n\n{}\n{}\n{}\n\n\n\n\n\n\n{}\n{}",
        parts.method,
        content_length,
        parts.content_md5,
        parts.content_type,
        canonicalized_headers,
        resource
    )
}

fn copy_status(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-ms-copy-status")
        .and_then(|v| v.to_str().ok())
        .map(str::to_lowercase)
}

/// Percent-encoding set for Azure blob names: encode everything except
/// unreserved characters and '/'.
const AZURE_BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Parse one page of a List Blobs response into listings and the next marker.
fn parse_list_blobs(body: &str) -> Result<(Vec<BlobListing>, Option<String>), TransportError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let malformed = |detail: String| TransportError::Xml {
        operation: "list_blobs",
        detail,
    };

    let mut reader = Reader::from_reader(body.as_bytes());
    reader.trim_text(true);

    let mut listings = Vec::new();
    let mut next_marker: Option<String> = None;
    let mut path: Vec<String> = Vec::new();
    let mut name: Option<String> = None;
    let mut last_modified: Option<DateTime<Utc>> = None;
    let mut metadata: HashMap<String, String> = HashMap::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "Blob" {
                    name = None;
                    last_modified = None;
                    metadata.clear();
                }
                path.push(tag);
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| malformed(err.to_string()))?
                    .to_string();
                let depth = path.len();
                let tag = path.last().map(String::as_str).unwrap_or_default();
                let parent = depth
                    .checked_sub(2)
                    .and_then(|i| path.get(i))
                    .map(String::as_str)
                    .unwrap_or_default();
                match (parent, tag) {
                    ("Blob", "Name") => name = Some(text),
                    ("Properties", "Last-Modified") => {
                        let parsed = httpdate::parse_http_date(&text)
                            .map_err(|err| malformed(format!("Last-Modified {text:?}: {err}")))?;
                        last_modified = Some(DateTime::<Utc>::from(parsed));
                    }
                    ("Metadata", key) => {
                        metadata.insert(key.to_lowercase(), text);
                    }
                    ("EnumerationResults", "NextMarker") if !text.is_empty() => {
                        next_marker = Some(text);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"Blob" {
                    let key = name
                        .take()
                        .ok_or_else(|| malformed("blob without Name".to_string()))?;
                    let last_modified = last_modified.take().ok_or_else(|| {
                        malformed(format!("blob {key} without Last-Modified"))
                    })?;
                    listings.push(BlobListing {
                        key,
                        last_modified,
                        metadata: std::mem::take(&mut metadata),
                    });
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(malformed(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok((listings, next_marker))
}

/// True when a service properties document already carries a CORS rule.
fn has_cors_rules(body: &str) -> Result<bool, TransportError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body.as_bytes());
    reader.trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.name().as_ref() == b"CorsRule" =>
            {
                return Ok(true)
            }
            Ok(Event::Eof) => return Ok(false),
            Err(err) => {
                return Err(TransportError::Xml {
                    operation: "get_service_properties",
                    detail: err.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Service properties installing one CORS rule: any origin, HEAD and GET,
/// the `Authorization` header, cached for 3000 seconds.
fn cors_properties_xml() -> String {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("xml decl");
    for tag in ["StorageServiceProperties", "Cors", "CorsRule"] {
        writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .expect("xml start");
    }
    for (tag, value) in [
        ("AllowedOrigins", "*"),
        ("AllowedMethods", "HEAD,GET"),
        ("AllowedHeaders", "Authorization"),
        ("ExposedHeaders", ""),
        ("MaxAgeInSeconds", "3000"),
    ] {
        writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .expect("xml start");
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .expect("xml text");
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .expect("xml end");
    }
    for tag in ["CorsRule", "Cors", "StorageServiceProperties"] {
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .expect("xml end");
    }

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

impl BlobTransport for AzureBlobTransport {
    fn put_object(
        &self,
        key: &str,
        data: Bytes,
        headers: &BlobHeaders,
    ) -> TransportFuture<'_, ()> {
        let key = key.to_string();
        let headers = headers.clone();
        Box::pin(async move {
            debug!("Azure put: container={} blob={}", self.container, key);
            self.azure_upload(&key, data, &headers).await
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
            debug!("Azure copy: src={} dst={}", src_key, dest_key);
            self.azure_copy(&src_key, &dest_key, &metadata).await
        })
    }

    fn delete_object(&self, key: &str) -> TransportFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("Azure delete: container={} blob={}", self.container, key);
            self.azure_delete(&key).await
        })
    }

    fn list_objects(&self, prefix: &str) -> TransportFuture<'_, Vec<BlobListing>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            debug!("Azure list: container={} prefix={}", self.container, prefix);
            let listing = self.azure_list_blobs(&prefix).await?;
            if listing.is_empty() {
                debug!("Azure list: no blobs under {}", prefix);
            }
            Ok(listing)
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(credential: Credential) -> AzureBlobTransport {
        AzureBlobTransport::new(
            CredentialSet {
                account_name: "acct".to_string(),
                credential,
            },
            "uploads".to_string(),
            "core.windows.net",
        )
        .unwrap()
    }

    #[test]
    fn test_azure_api_version() {
        assert_eq!(AZURE_API_VERSION, "2023-11-03");
    }

    #[test]
    fn test_blob_url_encoding() {
        let t = transport(Credential::None);
        assert_eq!(
            t.blob_url("original/1X/key with spaces.png"),
            "https://acct.blob.core.windows.net/uploads/original/1X/key%20with%20spaces.png"
        );
    }

    #[test]
    fn test_resource_urls() {
        let t = transport(Credential::None);
        assert_eq!(
            t.resource_url(Resource::Service),
            "https://acct.blob.core.windows.net/"
        );
        assert_eq!(
            t.resource_url(Resource::Container),
            "https://acct.blob.core.windows.net/uploads"
        );
        assert_eq!(
            t.canonicalized_resource(Resource::Blob("a b.png")),
            "/acct/uploads/a b.png"
        );
        assert_eq!(t.canonicalized_resource(Resource::Service), "/acct/");
    }

    #[test]
    fn test_sas_appended() {
        let t = transport(Credential::SasToken("sv=1&sig=x".to_string()));
        assert_eq!(
            t.maybe_append_sas("https://h/c/k"),
            "https://h/c/k?sv=1&sig=x"
        );
        assert_eq!(
            t.maybe_append_sas("https://h/c?comp=list"),
            "https://h/c?comp=list&sv=1&sig=x"
        );
    }

    #[test]
    fn test_shared_key_url_untouched() {
        let t = transport(Credential::AccessKey("a2V5".to_string()));
        assert_eq!(t.maybe_append_sas("https://h/c/k"), "https://h/c/k");
    }

    #[test]
    fn test_string_to_sign_put() {
        let ms_headers = vec![
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
            ("x-ms-date".to_string(), "Wed, 26 Feb 2025 10:00:00 GMT".to_string()),
            ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
        ];
        let parts = SignedParts {
            method: "PUT",
            content_length: 3,
            content_md5: "md5==",
            content_type: "image/png",
            ms_headers: &ms_headers,
            query: &[],
        };
        let sts = string_to_sign(&parts, "/acct/uploads/a.png");
        assert_eq!(
            sts,
            "PUT\n\n\n3\nmd5==\nimage/png\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Wed, 26 Feb 2025 10:00:00 GMT\n\
             x-ms-version:2023-11-03\n\
             /acct/uploads/a.png"
        );
    }

    #[test]
    fn test_string_to_sign_list_query_sorted() {
        let ms_headers = vec![("x-ms-date".to_string(), "d".to_string())];
        let query = vec![
            ("restype", "container".to_string()),
            ("comp", "list".to_string()),
            ("prefix", "tombstone/".to_string()),
        ];
        let parts = SignedParts {
            method: "GET",
            content_length: 0,
            content_md5: "",
            content_type: "",
            ms_headers: &ms_headers,
            query: &query,
        };
        let sts = string_to_sign(&parts, "/acct/uploads");
        assert!(sts.starts_with("GET\n\n\n\n\n\n"));
        assert!(sts.ends_with("x-ms-date:d\n/acct/uploads\ncomp:list\nprefix:tombstone/\nrestype:container"));
    }

    #[test]
    fn test_bad_access_key_is_auth_error() {
        let t = transport(Credential::AccessKey("not base64!".to_string()));
        let err = t
            .request(
                Method::GET,
                Resource::Container,
                &[],
                Vec::new(),
                "",
                "",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Auth(_)));
    }

    #[test]
    fn test_parse_list_blobs() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="uploads">
  <Prefix>tombstone/</Prefix>
  <Blobs>
    <Blob>
      <Name>tombstone/original/1X/a.png</Name>
      <Properties>
        <Last-Modified>Wed, 26 Feb 2025 10:00:00 GMT</Last-Modified>
        <Content-Length>3</Content-Length>
      </Properties>
      <Metadata>
        <removed_at>2025-02-20T08:00:00+00:00</removed_at>
      </Metadata>
    </Blob>
    <Blob>
      <Name>tombstone/b.txt</Name>
      <Properties><Last-Modified>Thu, 27 Feb 2025 10:00:00 GMT</Last-Modified></Properties>
      <Metadata />
    </Blob>
  </Blobs>
  <NextMarker>marker-2</NextMarker>
</EnumerationResults>"#;

        let (listings, marker) = parse_list_blobs(xml).unwrap();
        assert_eq!(marker.as_deref(), Some("marker-2"));
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].key, "tombstone/original/1X/a.png");
        assert_eq!(
            listings[0].metadata.get("removed_at").map(String::as_str),
            Some("2025-02-20T08:00:00+00:00")
        );
        assert_eq!(
            listings[0].last_modified.to_rfc3339(),
            "2025-02-26T10:00:00+00:00"
        );
        assert_eq!(listings[1].key, "tombstone/b.txt");
        assert!(listings[1].metadata.is_empty());
    }

    #[test]
    fn test_parse_list_blobs_last_page() {
        let xml = r#"<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>"#;
        let (listings, marker) = parse_list_blobs(xml).unwrap();
        assert!(listings.is_empty());
        assert_eq!(marker, None);
    }

    #[test]
    fn test_parse_list_blobs_missing_name() {
        let xml = r#"<EnumerationResults><Blobs><Blob><Properties>
            <Last-Modified>Wed, 26 Feb 2025 10:00:00 GMT</Last-Modified>
            </Properties></Blob></Blobs></EnumerationResults>"#;
        assert!(matches!(
            parse_list_blobs(xml),
            Err(TransportError::Xml { .. })
        ));
    }

    #[test]
    fn test_has_cors_rules() {
        let with = "<StorageServiceProperties><Cors><CorsRule><AllowedOrigins>*</AllowedOrigins></CorsRule></Cors></StorageServiceProperties>";
        let without = "<StorageServiceProperties><Cors /></StorageServiceProperties>";
        assert!(has_cors_rules(with).unwrap());
        assert!(!has_cors_rules(without).unwrap());
    }

    #[test]
    fn test_cors_properties_xml() {
        let xml = cors_properties_xml();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<AllowedMethods>HEAD,GET</AllowedMethods>"));
        assert!(xml.contains("<MaxAgeInSeconds>3000</MaxAgeInSeconds>"));
        assert!(has_cors_rules(&xml).unwrap());
    }
}
