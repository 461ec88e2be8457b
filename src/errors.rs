//! Error types.
//!
//! Transport errors come from the blob storage collaborator and are caught
//! at the upload store boundary.  Watchdog errors only surface from SAS
//! token parsing; the scheduled job turns them into a skipped run.

use thiserror::Error;

/// Failure talking to the object storage service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("{operation} request failed: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("Azure {operation}: HTTP {status} - {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The addressed blob does not exist.
    #[error("blob not found: {key}")]
    NotFound { key: String },

    /// Credentials are missing or unusable for signing.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A response body could not be parsed.
    #[error("malformed {operation} response: {detail}")]
    Xml {
        operation: &'static str,
        detail: String,
    },
}

impl TransportError {
    /// True when the error means the blob is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound { .. })
            || matches!(self, TransportError::Status { status: 404, .. })
    }
}

/// Failure parsing the SAS token expiry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatchdogError {
    /// The `se` parameter is present but is not a date.
    #[error("SAS token expiry {value:?} is not a valid date")]
    InvalidExpiry { value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(TransportError::NotFound {
            key: "a".to_string()
        }
        .is_not_found());
        assert!(TransportError::Status {
            operation: "copy",
            status: 404,
            body: String::new(),
        }
        .is_not_found());
        assert!(!TransportError::Status {
            operation: "copy",
            status: 403,
            body: String::new(),
        }
        .is_not_found());
    }

    #[test]
    fn test_status_message() {
        let err = TransportError::Status {
            operation: "upload",
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Azure upload: HTTP 500 - boom");
    }
}
