//! Credential resolution
//!
//! Picks exactly one authentication strategy from the `initialize` arguments,
//! builds a backend with it and probes the bucket before handing back a session.

use crate::backend::Connector;
use crate::error::ServiceError;
use crate::request::InitializeArgs;
use crate::s3::credentials::{ConnectionConfig, Credentials};
use crate::session::StorageSession;

/// Endpoint settings applied when `initialize` does not carry its own
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointDefaults {
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// Choose the credential strategy
///
/// A complete static key pair wins; otherwise an identity pool id; otherwise
/// the call fails. Strategies are never chained.
pub fn select_credentials(args: &InitializeArgs) -> Result<Credentials, ServiceError> {
    if let (Some(access_key_id), Some(secret_access_key)) =
        (&args.access_key_id, &args.secret_access_key)
    {
        return Ok(Credentials::StaticKeyPair {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
        });
    }

    if let Some(identity_pool_id) = &args.identity_pool_id {
        return Ok(Credentials::FederatedIdentity {
            identity_pool_id: identity_pool_id.clone(),
            region: args
                .identity_region
                .clone()
                .unwrap_or_else(|| args.region.clone()),
            auth_role_arn: args.auth_role_arn.clone(),
        });
    }

    Err(ServiceError::missing_credentials())
}

/// Build the connection settings for `args`
pub fn connection_config(
    args: &InitializeArgs,
    defaults: &EndpointDefaults,
) -> Result<ConnectionConfig, ServiceError> {
    let credentials = select_credentials(args)?;
    let endpoint_url = args
        .endpoint_url
        .clone()
        .or_else(|| defaults.endpoint_url.clone());

    Ok(ConnectionConfig {
        region: args.region.clone(),
        bucket: args.bucket_name.clone(),
        credentials,
        endpoint_url,
        force_path_style: args.force_path_style.unwrap_or(defaults.force_path_style),
    })
}

/// Connect and verify the bucket is reachable
pub async fn resolve(
    connector: &dyn Connector,
    config: ConnectionConfig,
) -> Result<StorageSession, ServiceError> {
    tracing::debug!(
        region = %config.region,
        bucket = %config.bucket,
        "Initializing with {}",
        config.credentials.kind()
    );

    let backend = connector.connect(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build storage client");
        ServiceError::connection(format!("Failed to initialize: {}", e), Some(e.details()))
    })?;

    backend.probe_bucket(&config.bucket).await.map_err(|e| {
        tracing::error!(error = %e, bucket = %config.bucket, "Bucket probe failed");
        ServiceError::connection(
            format!("Failed to connect to bucket {}: {}", config.bucket, e),
            Some(e.details()),
        )
    })?;

    tracing::info!(bucket = %config.bucket, "Successfully connected to bucket");

    Ok(StorageSession::new(backend, config.bucket, config.region))
}
