//! Named operations and their typed arguments
//!
//! Calls arrive as a method name plus an untyped JSON argument map. They are
//! converted here, before any handler runs, so handlers only see typed requests.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::ServiceError;

/// Operations understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    UploadFile,
    DownloadFile,
    DeleteFile,
    ListFiles,
    GetSignedUrl,
    GetPlatformVersion,
}

impl Operation {
    /// Look up an operation by its method name (short aliases accepted)
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "initialize" => Some(Operation::Initialize),
            "uploadFile" | "upload" => Some(Operation::UploadFile),
            "downloadFile" | "download" => Some(Operation::DownloadFile),
            "deleteFile" | "delete" => Some(Operation::DeleteFile),
            "listFiles" | "list" => Some(Operation::ListFiles),
            "getSignedUrl" | "sign-url" => Some(Operation::GetSignedUrl),
            "getPlatformVersion" => Some(Operation::GetPlatformVersion),
            _ => None,
        }
    }

    /// Canonical method name
    pub fn method_name(&self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::UploadFile => "uploadFile",
            Operation::DownloadFile => "downloadFile",
            Operation::DeleteFile => "deleteFile",
            Operation::ListFiles => "listFiles",
            Operation::GetSignedUrl => "getSignedUrl",
            Operation::GetPlatformVersion => "getPlatformVersion",
        }
    }

    /// Whether a live storage session must exist before the handler runs
    pub fn requires_session(&self) -> bool {
        !matches!(self, Operation::Initialize | Operation::GetPlatformVersion)
    }
}

/// Arguments of `initialize`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitializeArgs {
    pub region: String,
    pub bucket_name: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub identity_pool_id: Option<String>,
    /// Region of the identity pool when it differs from the bucket region
    pub identity_region: Option<String>,
    /// Role assumed through STS instead of the pool's enhanced flow
    pub auth_role_arn: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadArgs {
    pub file_path: PathBuf,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadArgs {
    pub key: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteArgs {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListArgs {
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignUrlArgs {
    pub key: String,
    /// Falls back to the dispatcher's default expiry when absent
    pub expiration_secs: Option<u64>,
}

/// A validated call
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Initialize(InitializeArgs),
    Upload(UploadArgs),
    Download(DownloadArgs),
    Delete(DeleteArgs),
    List(ListArgs),
    SignUrl(SignUrlArgs),
    PlatformVersion,
}

impl Request {
    /// Validate `arguments` for `operation`
    pub fn parse(operation: Operation, arguments: &Value) -> Result<Self, ServiceError> {
        match operation {
            Operation::Initialize => {
                let raw: RawInitialize = decode(arguments)?;
                let (Some(region), Some(bucket_name)) = (present(raw.region), present(raw.bucket_name))
                else {
                    return Err(ServiceError::invalid_arguments(
                        "Region and bucket name are required",
                    ));
                };
                Ok(Request::Initialize(InitializeArgs {
                    region,
                    bucket_name,
                    access_key_id: present(raw.access_key_id),
                    secret_access_key: present(raw.secret_access_key),
                    identity_pool_id: present(raw.identity_pool_id),
                    identity_region: present(raw.identity_region),
                    auth_role_arn: present(raw.auth_role_arn),
                    endpoint_url: present(raw.endpoint_url),
                    force_path_style: raw.force_path_style,
                }))
            }
            Operation::UploadFile => {
                let raw: RawTransfer = decode(arguments)?;
                match (present(raw.file_path), present(raw.key)) {
                    (Some(file_path), Some(key)) => Ok(Request::Upload(UploadArgs {
                        file_path: PathBuf::from(file_path),
                        key,
                    })),
                    _ => Err(ServiceError::invalid_arguments(
                        "File path and key are required",
                    )),
                }
            }
            Operation::DownloadFile => {
                let raw: RawTransfer = decode(arguments)?;
                match (present(raw.key), present(raw.local_path)) {
                    (Some(key), Some(local_path)) => Ok(Request::Download(DownloadArgs {
                        key,
                        local_path: PathBuf::from(local_path),
                    })),
                    _ => Err(ServiceError::invalid_arguments(
                        "Key and local path are required",
                    )),
                }
            }
            Operation::DeleteFile => {
                let raw: RawKey = decode(arguments)?;
                let key = present(raw.key).ok_or_else(key_required)?;
                Ok(Request::Delete(DeleteArgs { key }))
            }
            Operation::ListFiles => {
                let raw: RawList = decode(arguments)?;
                Ok(Request::List(ListArgs {
                    prefix: present(raw.prefix),
                }))
            }
            Operation::GetSignedUrl => {
                let raw: RawKey = decode(arguments)?;
                let key = present(raw.key).ok_or_else(key_required)?;
                let expiration_secs = match raw.expiration_in_seconds {
                    None => None,
                    Some(secs) if secs > 0 => Some(secs as u64),
                    Some(secs) => {
                        return Err(ServiceError::invalid_arguments(format!(
                            "expirationInSeconds must be positive, got {}",
                            secs
                        )))
                    }
                };
                Ok(Request::SignUrl(SignUrlArgs {
                    key,
                    expiration_secs,
                }))
            }
            Operation::GetPlatformVersion => Ok(Request::PlatformVersion),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInitialize {
    region: Option<String>,
    bucket_name: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    identity_pool_id: Option<String>,
    identity_region: Option<String>,
    auth_role_arn: Option<String>,
    endpoint_url: Option<String>,
    force_path_style: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransfer {
    file_path: Option<String>,
    local_path: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKey {
    key: Option<String>,
    expiration_in_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawList {
    prefix: Option<String>,
}

fn decode<T: DeserializeOwned + Default>(arguments: &Value) -> Result<T, ServiceError> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    T::deserialize(arguments)
        .map_err(|e| ServiceError::invalid_arguments(format!("Malformed arguments: {}", e)))
}

/// Empty strings count as absent
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn key_required() -> ServiceError {
    ServiceError::invalid_arguments("Key is required")
}
