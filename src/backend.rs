//! Storage backend seam
//!
//! [`ObjectBackend`] is everything the operation handlers need from the object
//! store, and [`Connector`] builds one from a resolved [`ConnectionConfig`].
//! The AWS SDK implementation lives in [`crate::s3::client`], the in-memory one
//! in [`crate::s3::memory`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::s3::credentials::ConnectionConfig;
use crate::s3::types::{ObjectSummary, PutOutcome};

/// Error code the backend reports when the identity's policy denies the call
pub const ACCESS_DENIED_CODE: &str = "AccessDenied";

/// Failures reported by a storage backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The service answered with an error
    #[error("{message}")]
    Service {
        code: Option<String>,
        message: String,
        details: String,
    },

    /// Reading or writing the transferred bytes failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The response body broke off mid-transfer
    #[error("stream error: {0}")]
    Stream(String),

    /// The client could not be configured
    #[error("configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Build a service error from its parts
    pub fn service(
        code: Option<&str>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::Service {
            code: code.map(str::to_string),
            message: message.into(),
            details: details.into(),
        }
    }

    /// Backend error code, when the service supplied one
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        self.code() == Some(ACCESS_DENIED_CODE)
    }

    /// Backend-native description for diagnostics
    pub fn details(&self) -> String {
        match self {
            Self::Service { details, .. } => details.clone(),
            other => format!("{:?}", other),
        }
    }
}

/// Result type for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Bytes flowing from the local file to the backend
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// Bytes flowing from the backend to the local file
pub type ObjectStream = Pin<Box<dyn Stream<Item = BackendResult<Bytes>> + Send>>;

/// Request body for a single put
pub struct UploadBody {
    pub stream: BodyStream,
    pub content_length: u64,
}

/// Response body of a single get
pub struct ObjectDownload {
    pub stream: ObjectStream,
    pub content_length: Option<u64>,
}

/// Operations a bucket-based object store must provide
///
/// Every call is a single request: implementations must not retry.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Check that the bucket exists and is reachable with the current credentials
    async fn probe_bucket(&self, bucket: &str) -> BackendResult<()>;

    /// Store the body under `key`
    async fn put_object(&self, bucket: &str, key: &str, body: UploadBody)
        -> BackendResult<PutOutcome>;

    /// Open the object stored under `key`
    async fn get_object(&self, bucket: &str, key: &str) -> BackendResult<ObjectDownload>;

    /// Delete `key`; deleting a missing key succeeds
    async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<()>;

    /// Every object under `prefix`, in the backend's key order
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>)
        -> BackendResult<Vec<ObjectSummary>>;

    /// Time-limited GET URL, issued at `issued_at` and valid for `expires_in`
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        issued_at: SystemTime,
        expires_in: Duration,
    ) -> BackendResult<String>;

    /// Permanent URL of an object
    fn object_url(&self, bucket: &str, key: &str) -> String;
}

/// Builds authenticated backends
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> BackendResult<Arc<dyn ObjectBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_detection() {
        let err = BackendError::service(Some("AccessDenied"), "Access Denied", "raw");
        assert!(err.is_access_denied());
        assert_eq!(err.details(), "raw");

        let err = BackendError::service(Some("NoSuchKey"), "missing", "raw");
        assert!(!err.is_access_denied());
    }

    #[test]
    fn test_io_error_has_no_code() {
        let err = BackendError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.code().is_none());
        assert!(err.to_string().contains("disk"));
    }
}
