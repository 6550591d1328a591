//! S3 backend module
//!
//! This module provides the object-store side of the bridge:
//! - [`client::S3Client`] - AWS SDK backend, built by [`client::AwsConnector`]
//! - [`credentials`] - Static and Cognito identity pool credential sources
//! - [`memory::MemoryStore`] - In-memory backend for tests and local runs
//! - [`types`] - S3 data types (ObjectSummary, PutOutcome, S3Url)

pub mod client;
pub mod credentials;
pub mod memory;
pub mod types;

// Re-export commonly used types
pub use client::{AwsConnector, S3Client};
pub use credentials::{CognitoCredentialsProvider, ConnectionConfig, Credentials};
pub use memory::{MemoryConnector, MemoryStore};
pub use types::{ObjectSummary, PutOutcome, S3Url};
