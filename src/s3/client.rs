//! AWS S3 client wrapper

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_types::body::SdkBody;
use futures::TryStreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::backend::{
    BackendError, BackendResult, Connector, ObjectBackend, ObjectDownload, UploadBody,
};
use crate::s3::credentials::ConnectionConfig;
use crate::s3::types::{to_utc, ObjectSummary, PutOutcome, S3Url};

/// S3 client wrapper with high-level operations
#[derive(Debug, Clone)]
pub struct S3Client {
    client: Client,
    region: String,
    endpoint_url: Option<String>,
}

impl S3Client {
    /// Create a client for the given connection settings
    ///
    /// Retries are disabled: every call is a single request and failures go
    /// straight back to the caller.
    pub async fn connect(config: &ConnectionConfig) -> Self {
        let provider = config.credentials.clone().into_provider().await;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(provider)
            .retry_config(RetryConfig::disabled());

        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
        }
    }
}

#[async_trait]
impl ObjectBackend for S3Client {
    async fn probe_bucket(&self, bucket: &str) -> BackendResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: UploadBody) -> BackendResult<PutOutcome> {
        let content_length = i64::try_from(body.content_length)
            .map_err(|_| BackendError::Config(format!("file too large: {} bytes", body.content_length)))?;
        let stream_body = StreamBody::new(body.stream.map_ok(Frame::data));

        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(content_length)
            .body(ByteStream::new(SdkBody::from_body_1_x(stream_body)))
            .send()
            .await
            .map_err(backend_error)?;

        Ok(PutOutcome {
            e_tag: response.e_tag().unwrap_or_default().to_string(),
            version_id: response.version_id().map(str::to_string),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> BackendResult<ObjectDownload> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(backend_error)?;

        let content_length = response.content_length().and_then(|l| u64::try_from(l).ok());
        let stream = futures::stream::try_unfold(response.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(BackendError::Stream(DisplayErrorContext(e).to_string())),
            }
        });

        Ok(ObjectDownload {
            stream: Box::pin(stream),
            content_length,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> BackendResult<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket);

            if let Some(p) = prefix {
                request = request.prefix(p);
            }

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(backend_error)?;

            for obj in response.contents() {
                objects.push(ObjectSummary {
                    key: obj.key().unwrap_or_default().to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .map(|d| to_utc(d.secs(), d.subsec_nanos()))
                        .unwrap_or_default(),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        issued_at: SystemTime,
        expires_in: Duration,
    ) -> BackendResult<String> {
        let presigning = PresigningConfig::builder()
            .start_time(issued_at)
            .expires_in(expires_in)
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(backend_error)?;

        Ok(request.uri().to_string())
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        S3Url::new(bucket, key).object_url(&self.region, self.endpoint_url.as_deref())
    }
}

/// Builds [`S3Client`] backends
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsConnector;

#[async_trait]
impl Connector for AwsConnector {
    async fn connect(&self, config: &ConnectionConfig) -> BackendResult<Arc<dyn ObjectBackend>> {
        Ok(Arc::new(S3Client::connect(config).await))
    }
}

/// Classify an SDK failure, keeping the service error code when there is one
fn backend_error<E, R>(err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let details = DisplayErrorContext(&err).to_string();
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .or_else(|| code.clone())
        .unwrap_or_else(|| details.clone());

    BackendError::Service {
        code,
        message,
        details,
    }
}
