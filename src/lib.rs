//! S3 Bridge Library
//!
//! Lets a host application run object-storage operations (initialize, upload,
//! download, delete, list, signed URLs) against an S3 bucket through a single
//! named-operation entry point, [`dispatcher::Dispatcher`], without handling
//! credentials or SDK details itself.

pub mod backend;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod progress;
pub mod request;
pub mod resolver;
pub mod s3;
pub mod session;
pub mod settings;

pub use dispatcher::{Dispatcher, DispatcherConfig, MethodResponse, PendingResult};
pub use error::{ErrorKind, ServiceError};
pub use session::{SessionStore, StorageSession};
