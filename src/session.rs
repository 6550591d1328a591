//! Storage session and the store that holds it

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::backend::ObjectBackend;
use crate::error::ServiceError;

/// An authenticated backend bound to one bucket
pub struct StorageSession {
    backend: Arc<dyn ObjectBackend>,
    bucket: String,
    region: String,
}

impl StorageSession {
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        bucket: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            region: region.into(),
        }
    }

    pub fn backend(&self) -> &dyn ObjectBackend {
        self.backend.as_ref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSession")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Holder of the live session
///
/// Sessions are swapped whole behind an `Arc`, so a reader racing with a
/// re-initialization sees either the old or the new session, never a mix.
/// Operations already holding the old session keep using it until they finish.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Arc<StorageSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the live session, if any
    pub fn current(&self) -> Option<Arc<StorageSession>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The live session, or why there is none usable
    pub fn get(&self) -> Result<Arc<StorageSession>, ServiceError> {
        let session = self.current().ok_or_else(ServiceError::not_initialized)?;
        if session.bucket().is_empty() {
            return Err(ServiceError::bucket_not_set());
        }
        Ok(session)
    }

    /// Install `session`, returning the one it replaced
    pub fn set(&self, session: StorageSession) -> Option<Arc<StorageSession>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.replace(Arc::new(session))
    }

    /// Drop the live session
    pub fn clear(&self) -> Option<Arc<StorageSession>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }
}
