//! Caller-facing error taxonomy
//!
//! Every failed call ends in a [`ServiceError`]: a stable [`ErrorKind`], a
//! human-readable message and an optional diagnostic string. Backend failures
//! are translated by [`map_backend_error`].

use serde::Serialize;
use std::path::Path;
use thiserror::Error;

use crate::backend::BackendError;
use crate::request::Operation;

/// Guidance returned when the backend refuses to list the bucket
pub const LIST_PERMISSION_GUIDANCE: &str = "The current credentials do not have permission to list files. \
When using a Cognito identity pool, make sure the IAM role has s3:ListBucket permission for the bucket.";

/// Stable error kinds reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    MissingCredentials,
    ConnectionError,
    NotInitialized,
    BucketNotSet,
    InvalidArguments,
    SourceNotFound,
    PermissionError,
    StorageError,
    UnexpectedError,
}

impl ErrorKind {
    /// Wire code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::MissingCredentials => "MISSING_CREDENTIALS",
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::NotInitialized => "CLIENT_NOT_INITIALIZED",
            ErrorKind::BucketNotSet => "BUCKET_NOT_SET",
            ErrorKind::InvalidArguments => "INVALID_ARGUMENTS",
            ErrorKind::SourceNotFound => "FILE_NOT_FOUND",
            ErrorKind::PermissionError => "PERMISSION_ERROR",
            ErrorKind::StorageError => "S3_ERROR",
            ErrorKind::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

/// A failed call as the caller sees it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {message}", kind.code())]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details,
        }
    }

    pub fn missing_credentials() -> Self {
        Self::new(
            ErrorKind::MissingCredentials,
            "Either AWS credentials or an identity pool ID must be provided",
            None,
        )
    }

    pub fn connection(message: impl Into<String>, details: Option<String>) -> Self {
        Self::new(ErrorKind::ConnectionError, message, details)
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorKind::NotInitialized,
            "AWS S3 client is not initialized",
            None,
        )
    }

    pub fn bucket_not_set() -> Self {
        Self::new(ErrorKind::BucketNotSet, "Bucket name is not set", None)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArguments, message, None)
    }

    pub fn source_not_found(path: &Path) -> Self {
        Self::new(
            ErrorKind::SourceNotFound,
            format!("File not found: {}", path.display()),
            None,
        )
    }

    pub fn unexpected(message: impl Into<String>, details: Option<String>) -> Self {
        Self::new(
            ErrorKind::UnexpectedError,
            format!("An unexpected error occurred: {}", message.into()),
            details,
        )
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

/// Translate a backend failure raised while running `operation`
pub fn map_backend_error(operation: Operation, err: &BackendError) -> ServiceError {
    if operation == Operation::ListFiles && err.is_access_denied() {
        return ServiceError::new(
            ErrorKind::PermissionError,
            LIST_PERMISSION_GUIDANCE,
            Some(err.details()),
        );
    }

    let action = match operation {
        Operation::Initialize => "Failed to initialize",
        Operation::UploadFile => "Failed to upload to S3",
        Operation::DownloadFile => "Failed to download file",
        Operation::DeleteFile => "Failed to delete file",
        Operation::ListFiles => "S3 operation failed",
        Operation::GetSignedUrl => "Failed to generate signed URL",
        Operation::GetPlatformVersion => "Failed to read platform version",
    };

    ServiceError::new(
        ErrorKind::StorageError,
        format!("{}: {}", action, err),
        Some(err.details()),
    )
}
