//! In-memory object store
//!
//! Behaves like a single-region S3 account: buckets must be created before
//! use, keys list in lexicographic order, deletes are idempotent. Every backend
//! call is counted so tests can assert that no request reached the store.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::backend::{
    BackendError, BackendResult, Connector, ObjectBackend, ObjectDownload, UploadBody,
    ACCESS_DENIED_CODE,
};
use crate::s3::credentials::ConnectionConfig;
use crate::s3::types::{ObjectSummary, PutOutcome, S3Url};

/// Size of the chunks a download is streamed in
const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    e_tag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BucketState {
    objects: BTreeMap<String, StoredObject>,
    versioned: bool,
    deny_list: bool,
    cut_downloads: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    buckets: HashMap<String, BucketState>,
}

/// Shared in-memory object store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    calls: Arc<AtomicUsize>,
    versions: Arc<AtomicU64>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every backend call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default();
    }

    /// Turn on versioning, so puts report a version id
    pub fn enable_versioning(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default().versioned = true;
    }

    /// Deny `ListObjects` on `bucket`, as a policy without s3:ListBucket would
    pub fn deny_list(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default().deny_list = true;
    }

    /// Break every download from `bucket` off after its first chunk
    pub fn cut_downloads(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default().cut_downloads = true;
    }

    /// Stored bytes of an object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.to_vec())
    }

    /// Number of backend calls served so far
    pub fn backend_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Backend bound to this store
    pub fn backend(&self, region: &str) -> Arc<dyn ObjectBackend> {
        Arc::new(MemoryBackend {
            store: self.clone(),
            region: region.to_string(),
        })
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            store: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn no_such_bucket(bucket: &str) -> BackendError {
    BackendError::service(
        Some("NoSuchBucket"),
        "The specified bucket does not exist",
        format!("NoSuchBucket: The specified bucket does not exist (bucket: {})", bucket),
    )
}

fn no_such_key(key: &str) -> BackendError {
    BackendError::service(
        Some("NoSuchKey"),
        "The specified key does not exist.",
        format!("NoSuchKey: The specified key does not exist. (key: {})", key),
    )
}

fn e_tag(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

/// [`ObjectBackend`] over a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: MemoryStore,
    region: String,
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn probe_bucket(&self, bucket: &str) -> BackendResult<()> {
        self.store.enter().await;
        if self.store.lock().buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(no_such_bucket(bucket))
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: UploadBody) -> BackendResult<PutOutcome> {
        self.store.enter().await;

        let mut data = BytesMut::with_capacity(body.content_length as usize);
        let mut stream = body.stream;
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        let data = data.freeze();

        let mut state = self.store.lock();
        let bucket_state = state.buckets.get_mut(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        let outcome = PutOutcome {
            e_tag: e_tag(&data),
            version_id: bucket_state
                .versioned
                .then(|| self.store.versions.fetch_add(1, Ordering::SeqCst).to_string()),
        };

        bucket_state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                e_tag: outcome.e_tag.clone(),
                last_modified: Utc::now(),
            },
        );

        Ok(outcome)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> BackendResult<ObjectDownload> {
        self.store.enter().await;

        let (object, cut) = {
            let state = self.store.lock();
            let bucket_state = state.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
            let object = bucket_state.objects.get(key).cloned().ok_or_else(|| no_such_key(key))?;
            (object, bucket_state.cut_downloads)
        };

        tracing::trace!(key, e_tag = %object.e_tag, "Serving object from memory");

        let content_length = object.data.len() as u64;
        let chunks: Vec<BackendResult<Bytes>> = object
            .data
            .chunks(DOWNLOAD_CHUNK_SIZE)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let chunks: Vec<BackendResult<Bytes>> = if cut {
            chunks
                .into_iter()
                .take(1)
                .chain(std::iter::once(Err(BackendError::Stream(
                    "connection reset mid-body".to_string(),
                ))))
                .collect()
        } else {
            chunks
        };

        Ok(ObjectDownload {
            stream: Box::pin(futures::stream::iter(chunks)),
            content_length: Some(content_length),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<()> {
        self.store.enter().await;

        let mut state = self.store.lock();
        let bucket_state = state.buckets.get_mut(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        bucket_state.objects.remove(key);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> BackendResult<Vec<ObjectSummary>> {
        self.store.enter().await;

        let state = self.store.lock();
        let bucket_state = state.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;

        if bucket_state.deny_list {
            return Err(BackendError::service(
                Some(ACCESS_DENIED_CODE),
                "Access Denied",
                format!("AccessDenied: Access Denied (bucket: {})", bucket),
            ));
        }

        let prefix = prefix.unwrap_or("");
        Ok(bucket_state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        issued_at: SystemTime,
        expires_in: Duration,
    ) -> BackendResult<String> {
        self.store.enter().await;

        let issued = issued_at
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(format!(
            "{}?X-Amz-Date={}&X-Amz-Expires={}",
            self.object_url(bucket, key),
            issued.as_secs(),
            expires_in.as_secs()
        ))
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        S3Url::new(bucket, key).object_url(&self.region, None)
    }
}

/// Connects to a [`MemoryStore`]; credentials are accepted as-is
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &ConnectionConfig) -> BackendResult<Arc<dyn ObjectBackend>> {
        tracing::debug!(credentials = ?config.credentials, "Connecting to memory store");
        Ok(self.store.backend(&config.region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn body(data: &'static [u8]) -> UploadBody {
        UploadBody {
            stream: Box::pin(futures::stream::iter(vec![Ok::<_, std::io::Error>(
                Bytes::from_static(data),
            )])),
            content_length: data.len() as u64,
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryStore::new();
        store.create_bucket("b1");
        let backend = store.backend("us-east-1");

        let outcome = backend.put_object("b1", "a.txt", body(b"hello")).await.unwrap();
        assert!(outcome.version_id.is_none());
        assert!(outcome.e_tag.starts_with('"'));

        let download = backend.get_object("b1", "a.txt").await.unwrap();
        assert_eq!(download.content_length, Some(5));
        let chunks: Vec<Bytes> = download.stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello");
        assert_eq!(store.backend_calls(), 2);
    }

    #[tokio::test]
    async fn test_versioned_bucket_reports_version() {
        let store = MemoryStore::new();
        store.enable_versioning("b1");
        let backend = store.backend("us-east-1");

        let first = backend.put_object("b1", "a.txt", body(b"1")).await.unwrap();
        let second = backend.put_object("b1", "a.txt", body(b"2")).await.unwrap();
        assert!(first.version_id.is_some());
        assert_ne!(first.version_id, second.version_id);
    }

    #[tokio::test]
    async fn test_missing_key_and_bucket() {
        let store = MemoryStore::new();
        store.create_bucket("b1");
        let backend = store.backend("us-east-1");

        let err = backend.get_object("b1", "nope").await.err().unwrap();
        assert_eq!(err.code(), Some("NoSuchKey"));

        let err = backend.probe_bucket("other").await.unwrap_err();
        assert_eq!(err.code(), Some("NoSuchBucket"));
    }

    #[tokio::test]
    async fn test_list_prefix_order() {
        let store = MemoryStore::new();
        store.create_bucket("b1");
        let backend = store.backend("us-east-1");
        for key in ["docs/b.md", "docs/a.md", "src/main.rs", "docsx"] {
            backend.put_object("b1", key, body(b"x")).await.unwrap();
        }

        let keys: Vec<String> = backend
            .list_objects("b1", Some("docs/"))
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["docs/a.md", "docs/b.md"]);

        assert_eq!(backend.list_objects("b1", None).await.unwrap().len(), 4);
        assert!(backend.list_objects("b1", Some("zzz")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deny_list() {
        let store = MemoryStore::new();
        store.deny_list("b1");
        let err = store
            .backend("us-east-1")
            .list_objects("b1", None)
            .await
            .unwrap_err();
        assert!(err.is_access_denied());
    }

    #[tokio::test]
    async fn test_delete_missing_key_succeeds() {
        let store = MemoryStore::new();
        store.create_bucket("b1");
        let backend = store.backend("us-east-1");
        backend.delete_object("b1", "never-there").await.unwrap();
    }
}
