//! Operation dispatcher
//!
//! [`Dispatcher::dispatch`] takes a method name and an untyped argument map,
//! checks the session precondition, converts the arguments into a typed
//! [`Request`] and runs the handler on a worker task. The outcome comes back
//! through a [`PendingResult`], which resolves exactly once: success, error or
//! not-implemented. A handler that panics still completes its call, with an
//! `UNEXPECTED_ERROR`.

use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinError;

use crate::backend::Connector;
use crate::error::ServiceError;
use crate::handlers;
use crate::progress::ProgressSender;
use crate::request::{Operation, Request};
use crate::resolver::EndpointDefaults;
use crate::session::{SessionStore, StorageSession};

/// Default lifetime of a signed URL
pub const DEFAULT_EXPIRATION_SECS: u64 = 3600;

/// Dispatcher-wide defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub endpoint: EndpointDefaults,
    pub default_expiration_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointDefaults::default(),
            default_expiration_secs: DEFAULT_EXPIRATION_SECS,
        }
    }
}

/// Terminal outcome of one call
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Success(Value),
    Error(ServiceError),
    NotImplemented,
}

impl MethodResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, MethodResponse::Success(_))
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match self {
            MethodResponse::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Completion handle of a dispatched call
#[derive(Debug)]
pub struct PendingResult {
    rx: oneshot::Receiver<MethodResponse>,
}

impl PendingResult {
    fn ready(response: MethodResponse) -> Self {
        let (tx, rx) = oneshot::channel();
        // The receiver is alive right here
        let _ = tx.send(response);
        Self { rx }
    }
}

impl Future for PendingResult {
    type Output = MethodResponse;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                MethodResponse::Error(ServiceError::unexpected(
                    "operation was dropped before completing",
                    None,
                ))
            })
        })
    }
}

/// Routes named operations to their handlers
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<SessionStore>,
    connector: Arc<dyn Connector>,
    config: Arc<DispatcherConfig>,
    progress: Option<ProgressSender>,
}

impl Dispatcher {
    pub fn new(connector: Arc<dyn Connector>, config: DispatcherConfig) -> Self {
        Self {
            store: Arc::new(SessionStore::new()),
            connector,
            config: Arc::new(config),
            progress: None,
        }
    }

    /// Use an externally owned session store
    pub fn with_session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = store;
        self
    }

    /// Publish transfer progress to `sender`
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Start `method` with `arguments`
    ///
    /// The handler runs on a Tokio worker task; await the returned
    /// [`PendingResult`] on the calling task to receive the outcome.
    pub fn dispatch(&self, method: &str, arguments: Value) -> PendingResult {
        tracing::debug!(method, arguments = %redact(&arguments), "onMethodCall");

        let Some(operation) = Operation::from_method(method) else {
            tracing::debug!(method, "Method not implemented");
            return PendingResult::ready(MethodResponse::NotImplemented);
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                return PendingResult::ready(MethodResponse::Error(ServiceError::unexpected(
                    e.to_string(),
                    None,
                )))
            }
        };

        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let worker = runtime.spawn(async move { this.run(operation, arguments).await });

        runtime.spawn(async move {
            let response = match worker.await {
                Ok(Ok(value)) => MethodResponse::Success(value),
                Ok(Err(err)) => {
                    tracing::error!(
                        method = operation.method_name(),
                        code = err.code(),
                        "{}",
                        err.message
                    );
                    MethodResponse::Error(err)
                }
                Err(join_error) => {
                    let err = join_failure(operation, join_error);
                    tracing::error!(method = operation.method_name(), "{}", err.message);
                    MethodResponse::Error(err)
                }
            };
            // A dropped receiver means the caller stopped waiting
            let _ = tx.send(response);
        });

        PendingResult { rx }
    }

    /// Dispatch and wait for the outcome
    pub async fn call(&self, method: &str, arguments: Value) -> MethodResponse {
        self.dispatch(method, arguments).await
    }

    /// Tear down the live session
    pub fn shutdown(&self) {
        if let Some(session) = self.store.clear() {
            tracing::info!(bucket = %session.bucket(), "Storage session closed");
        }
    }

    async fn run(&self, operation: Operation, arguments: Value) -> Result<Value, ServiceError> {
        let session = if operation.requires_session() {
            Some(self.require_session(operation)?)
        } else {
            None
        };

        let request = Request::parse(operation, &arguments)?;

        match (request, session) {
            (Request::Initialize(args), _) => {
                let initialized = handlers::initialize(
                    self.connector.as_ref(),
                    &self.store,
                    args,
                    &self.config.endpoint,
                )
                .await?;
                to_json(initialized)
            }
            (Request::PlatformVersion, _) => to_json(handlers::platform_version()),
            (Request::Upload(args), Some(session)) => {
                to_json(handlers::upload(&session, args, self.progress.as_ref()).await?)
            }
            (Request::Download(args), Some(session)) => {
                to_json(handlers::download(&session, args, self.progress.as_ref()).await?)
            }
            (Request::Delete(args), Some(session)) => to_json(handlers::delete(&session, args).await?),
            (Request::List(args), Some(session)) => to_json(handlers::list(&session, args).await?),
            (Request::SignUrl(args), Some(session)) => to_json(
                handlers::sign_url(&session, args, self.config.default_expiration_secs).await?,
            ),
            (_, None) => Err(ServiceError::not_initialized()),
        }
    }

    /// Snapshot the session an operation will run against
    ///
    /// Listing only needs a bucket, so a missing session reads as an unset bucket.
    fn require_session(&self, operation: Operation) -> Result<Arc<StorageSession>, ServiceError> {
        match self.store.get() {
            Ok(session) => Ok(session),
            Err(err) => {
                tracing::warn!(method = operation.method_name(), "{}", err.message);
                if operation == Operation::ListFiles {
                    Err(ServiceError::bucket_not_set())
                } else {
                    Err(err)
                }
            }
        }
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::unexpected(format!("failed to encode result: {}", e), None))
}

fn join_failure(operation: Operation, err: JoinError) -> ServiceError {
    let details = format!("{} handler task failed: {:?}", operation.method_name(), err);
    match err.try_into_panic() {
        Ok(payload) => ServiceError::unexpected(panic_message(payload.as_ref()), Some(details)),
        Err(err) => ServiceError::unexpected(err.to_string(), Some(details)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Argument map with secrets blanked, for logging
fn redact(arguments: &Value) -> Value {
    match arguments {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if k == "secretAccessKey" {
                        Value::String("***".to_string())
                    } else {
                        v.clone()
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
