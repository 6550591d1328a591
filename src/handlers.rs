//! Operation handlers
//!
//! One function per operation. Each takes the session snapshot it was
//! dispatched with plus typed arguments and returns a typed result; none of
//! them retries.

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::backend::{BackendError, Connector, ObjectStream, UploadBody};
use crate::error::{map_backend_error, ServiceError};
use crate::progress::{ProgressReporter, ProgressSender, TransferDirection};
use crate::request::{
    DeleteArgs, DownloadArgs, InitializeArgs, ListArgs, Operation, SignUrlArgs, UploadArgs,
};
use crate::resolver::{self, EndpointDefaults};
use crate::s3::types::ObjectSummary;
use crate::session::{SessionStore, StorageSession};

/// Result of an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutput {
    pub url: String,
    #[serde(rename = "eTag")]
    pub e_tag: String,
    /// Empty when the bucket is not versioned
    pub version_id: String,
}

/// Result of a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutput {
    pub path: String,
    pub size: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
}

/// Resolve credentials, probe the bucket and install the new session
pub async fn initialize(
    connector: &dyn Connector,
    store: &SessionStore,
    args: InitializeArgs,
    defaults: &EndpointDefaults,
) -> Result<bool, ServiceError> {
    let config = resolver::connection_config(&args, defaults)?;
    let session = resolver::resolve(connector, config).await?;

    if let Some(previous) = store.set(session) {
        tracing::debug!(bucket = %previous.bucket(), "Replaced previous session");
    }

    Ok(true)
}

pub async fn upload(
    session: &StorageSession,
    args: UploadArgs,
    progress: Option<&ProgressSender>,
) -> Result<UploadOutput, ServiceError> {
    let fail = |e: BackendError| map_backend_error(Operation::UploadFile, &e);

    let metadata = match tokio::fs::metadata(&args.file_path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(ServiceError::source_not_found(&args.file_path)),
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            return Err(ServiceError::source_not_found(&args.file_path))
        }
        Err(e) => return Err(fail(e.into())),
    };

    let size = metadata.len();
    tracing::debug!(
        file = %args.file_path.display(),
        bucket = %session.bucket(),
        key = %args.key,
        size_bytes = size,
        "Uploading file"
    );

    let file = tokio::fs::File::open(&args.file_path)
        .await
        .map_err(|e| fail(e.into()))?;

    let reporter = ProgressReporter::new(
        TransferDirection::Upload,
        &args.key,
        Some(size),
        progress.cloned(),
    );
    let stream = ReaderStream::new(file).inspect_ok(move |chunk| {
        reporter.advance(chunk.len() as u64);
    });

    let start = Instant::now();
    let outcome = session
        .backend()
        .put_object(
            session.bucket(),
            &args.key,
            UploadBody {
                stream: Box::pin(stream),
                content_length: size,
            },
        )
        .await
        .map_err(fail)?;

    let url = session.backend().object_url(session.bucket(), &args.key);

    tracing::info!(
        bucket = %session.bucket(),
        key = %args.key,
        size_bytes = size,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "File uploaded successfully"
    );

    Ok(UploadOutput {
        url,
        e_tag: outcome.e_tag,
        version_id: outcome.version_id.unwrap_or_default(),
    })
}

pub async fn download(
    session: &StorageSession,
    args: DownloadArgs,
    progress: Option<&ProgressSender>,
) -> Result<DownloadOutput, ServiceError> {
    let fail = |e: BackendError| map_backend_error(Operation::DownloadFile, &e);

    create_parent_dirs(&args.local_path)
        .await
        .map_err(|e| fail(e.into()))?;

    let start = Instant::now();
    let download = session
        .backend()
        .get_object(session.bucket(), &args.key)
        .await
        .map_err(fail)?;

    let reporter = ProgressReporter::new(
        TransferDirection::Download,
        &args.key,
        download.content_length,
        progress.cloned(),
    );

    // Bytes land in a sibling file first so a failed transfer never clobbers `local_path`
    let partial = partial_path(&args.local_path);
    if let Err(e) = write_stream(&partial, download.stream, &reporter).await {
        if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
            tracing::debug!(path = %partial.display(), "Partial download not removed: {}", cleanup);
        }
        return Err(fail(e));
    }
    tokio::fs::rename(&partial, &args.local_path)
        .await
        .map_err(|e| fail(e.into()))?;

    let metadata = tokio::fs::metadata(&args.local_path)
        .await
        .map_err(|e| fail(e.into()))?;
    let last_modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    tracing::info!(
        bucket = %session.bucket(),
        key = %args.key,
        size_bytes = metadata.len(),
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "File downloaded successfully"
    );

    Ok(DownloadOutput {
        path: args.local_path.to_string_lossy().into_owned(),
        size: metadata.len(),
        last_modified,
    })
}

pub async fn delete(session: &StorageSession, args: DeleteArgs) -> Result<bool, ServiceError> {
    tracing::debug!(bucket = %session.bucket(), key = %args.key, "Deleting file");

    session
        .backend()
        .delete_object(session.bucket(), &args.key)
        .await
        .map_err(|e| map_backend_error(Operation::DeleteFile, &e))?;

    tracing::info!(bucket = %session.bucket(), key = %args.key, "File deleted successfully");
    Ok(true)
}

pub async fn list(session: &StorageSession, args: ListArgs) -> Result<Vec<ObjectSummary>, ServiceError> {
    tracing::debug!(
        bucket = %session.bucket(),
        prefix = ?args.prefix,
        "Listing files"
    );

    let objects = session
        .backend()
        .list_objects(session.bucket(), args.prefix.as_deref())
        .await
        .map_err(|e| map_backend_error(Operation::ListFiles, &e))?;

    tracing::debug!("Retrieved {} objects from S3", objects.len());
    Ok(objects)
}

/// Presign a GET for `args.key`; the key's existence is not checked
pub async fn sign_url(
    session: &StorageSession,
    args: SignUrlArgs,
    default_expiration_secs: u64,
) -> Result<String, ServiceError> {
    let expires_in = Duration::from_secs(args.expiration_secs.unwrap_or(default_expiration_secs));
    let issued_at = SystemTime::now();
    let expires_at = issued_at
        .checked_add(expires_in)
        .map(DateTime::<Utc>::from)
        .ok_or_else(|| ServiceError::invalid_arguments("expirationInSeconds is out of range"))?;

    tracing::debug!(
        bucket = %session.bucket(),
        key = %args.key,
        expires_at = %expires_at,
        "Generating signed URL"
    );

    session
        .backend()
        .presign_get(session.bucket(), &args.key, issued_at, expires_in)
        .await
        .map_err(|e| map_backend_error(Operation::GetSignedUrl, &e))
}

/// Host platform and bridge version
pub fn platform_version() -> String {
    format!(
        "{} s3-bridge/{}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    )
}

/// Hidden sibling of `path` that a download streams into
fn partial_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}-{}.part",
        name,
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ))
}

async fn write_stream(
    path: &Path,
    mut stream: ObjectStream,
    reporter: &ProgressReporter,
) -> Result<(), BackendError> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        reporter.advance(chunk.len() as u64);
    }
    file.flush().await?;
    Ok(())
}

async fn create_parent_dirs(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}
