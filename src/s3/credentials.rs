//! AWS credential sources
//!
//! Two authentication strategies are supported:
//! - Static credentials (access key id + secret access key)
//! - A Cognito identity pool, exchanged for temporary credentials either through
//!   the enhanced flow (`GetCredentialsForIdentity`) or, when an auth role ARN is
//!   given, the basic flow (`GetOpenIdToken` + STS `AssumeRoleWithWebIdentity`)
//!
//! Federated credentials are fetched lazily through [`CognitoCredentialsProvider`],
//! so the SDK identity cache caches them and refreshes them before expiry.

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{future, ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials as AwsCredentials;
use aws_sdk_s3::error::DisplayErrorContext;
use std::fmt;
use std::time::SystemTime;

const STATIC_PROVIDER_NAME: &str = "s3-bridge-static";
const COGNITO_PROVIDER_NAME: &str = "s3-bridge-cognito";
const ROLE_SESSION_NAME: &str = "s3-bridge";

/// Credential material for one session
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    StaticKeyPair {
        access_key_id: String,
        secret_access_key: String,
    },
    FederatedIdentity {
        identity_pool_id: String,
        region: String,
        auth_role_arn: Option<String>,
    },
}

impl Credentials {
    pub fn static_key_pair(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Credentials::StaticKeyPair {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn federated(identity_pool_id: impl Into<String>, region: impl Into<String>) -> Self {
        Credentials::FederatedIdentity {
            identity_pool_id: identity_pool_id.into(),
            region: region.into(),
            auth_role_arn: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::StaticKeyPair { .. } => "Static Credentials",
            Credentials::FederatedIdentity { .. } => "Cognito Identity Pool",
        }
    }

    /// Credentials provider the SDK client is built with
    pub async fn into_provider(self) -> SharedCredentialsProvider {
        match self {
            Credentials::StaticKeyPair {
                access_key_id,
                secret_access_key,
            } => SharedCredentialsProvider::new(AwsCredentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                STATIC_PROVIDER_NAME,
            )),
            Credentials::FederatedIdentity {
                identity_pool_id,
                region,
                auth_role_arn,
            } => SharedCredentialsProvider::new(
                CognitoCredentialsProvider::new(identity_pool_id, region, auth_role_arn).await,
            ),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::StaticKeyPair { access_key_id, .. } => f
                .debug_struct("StaticKeyPair")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"** redacted **")
                .finish(),
            Credentials::FederatedIdentity {
                identity_pool_id,
                region,
                auth_role_arn,
            } => f
                .debug_struct("FederatedIdentity")
                .field("identity_pool_id", identity_pool_id)
                .field("region", region)
                .field("auth_role_arn", auth_role_arn)
                .finish(),
        }
    }
}

/// Everything needed to build a storage session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub region: String,
    pub bucket: String,
    pub credentials: Credentials,
    /// Custom endpoint for S3-compatible providers (e.g. MinIO)
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// Temporary credentials vended by a Cognito identity pool
#[derive(Debug, Clone)]
pub struct CognitoCredentialsProvider {
    identity_pool_id: String,
    auth_role_arn: Option<String>,
    cognito: aws_sdk_cognitoidentity::Client,
    sts: aws_sdk_sts::Client,
}

impl CognitoCredentialsProvider {
    pub async fn new(identity_pool_id: String, region: String, auth_role_arn: Option<String>) -> Self {
        // Identity pool calls are unauthenticated
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .no_credentials()
            .load()
            .await;

        Self {
            identity_pool_id,
            auth_role_arn,
            cognito: aws_sdk_cognitoidentity::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
        }
    }

    async fn fetch(&self) -> Result<AwsCredentials, CredentialsError> {
        tracing::debug!(
            identity_pool_id = %self.identity_pool_id,
            "Requesting Cognito identity"
        );

        let identity = self
            .cognito
            .get_id()
            .identity_pool_id(&self.identity_pool_id)
            .send()
            .await
            .map_err(|e| CredentialsError::provider_error(DisplayErrorContext(e).to_string()))?;

        let identity_id = identity
            .identity_id()
            .ok_or_else(|| CredentialsError::not_loaded("identity pool returned no identity id"))?;

        match &self.auth_role_arn {
            Some(role_arn) => self.assume_role(identity_id, role_arn).await,
            None => self.credentials_for_identity(identity_id).await,
        }
    }

    async fn credentials_for_identity(&self, identity_id: &str) -> Result<AwsCredentials, CredentialsError> {
        let response = self
            .cognito
            .get_credentials_for_identity()
            .identity_id(identity_id)
            .send()
            .await
            .map_err(|e| CredentialsError::provider_error(DisplayErrorContext(e).to_string()))?;

        let credentials = response
            .credentials()
            .ok_or_else(|| CredentialsError::not_loaded("identity pool returned no credentials"))?;

        let (Some(access_key_id), Some(secret_key)) =
            (credentials.access_key_id(), credentials.secret_key())
        else {
            return Err(CredentialsError::invalid_configuration(
                "identity pool credentials are incomplete",
            ));
        };

        let expiry = credentials
            .expiration()
            .and_then(|dt| SystemTime::try_from(*dt).ok());

        tracing::info!(identity_id, "Obtained Cognito credentials");

        Ok(AwsCredentials::new(
            access_key_id,
            secret_key,
            credentials.session_token().map(str::to_string),
            expiry,
            COGNITO_PROVIDER_NAME,
        ))
    }

    async fn assume_role(&self, identity_id: &str, role_arn: &str) -> Result<AwsCredentials, CredentialsError> {
        let token = self
            .cognito
            .get_open_id_token()
            .identity_id(identity_id)
            .send()
            .await
            .map_err(|e| CredentialsError::provider_error(DisplayErrorContext(e).to_string()))?;

        let token = token
            .token()
            .ok_or_else(|| CredentialsError::not_loaded("identity pool returned no OpenID token"))?;

        let response = self
            .sts
            .assume_role_with_web_identity()
            .role_arn(role_arn)
            .role_session_name(ROLE_SESSION_NAME)
            .web_identity_token(token)
            .send()
            .await
            .map_err(|e| CredentialsError::provider_error(DisplayErrorContext(e).to_string()))?;

        let credentials = response
            .credentials()
            .ok_or_else(|| CredentialsError::not_loaded("STS returned no credentials"))?;

        tracing::info!(identity_id, role_arn, "Assumed role with Cognito token");

        Ok(AwsCredentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_string()),
            SystemTime::try_from(*credentials.expiration()).ok(),
            COGNITO_PROVIDER_NAME,
        ))
    }
}

impl ProvideCredentials for CognitoCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.fetch())
    }
}
