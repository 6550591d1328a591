//! S3 data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One object returned by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
}

/// What the backend reports after a successful put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub e_tag: String,
    /// Only present when versioning is enabled on the bucket
    pub version_id: Option<String>,
}

/// Convert an SDK timestamp, falling back to the epoch when out of range
pub fn to_utc(secs: i64, nanos: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Bucket and key of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Url {
    pub bucket: String,
    pub key: String,
}

impl S3Url {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Public object URL
    ///
    /// AWS endpoints use the virtual-hosted form
    /// `https://{bucket}.s3.{region}.amazonaws.com/{key}`; custom endpoints
    /// (MinIO and other S3-compatible providers) use `{endpoint}/{bucket}/{key}`.
    pub fn object_url(&self, region: &str, endpoint_url: Option<&str>) -> String {
        let base = match endpoint_url {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, region),
        };

        match url::Url::parse(&base) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.pop_if_empty().extend(self.key.split('/'));
                }
                url.to_string()
            }
            Err(_) => format!("{}/{}", base, self.key),
        }
    }
}
