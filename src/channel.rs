//! Line-delimited JSON host protocol
//!
//! Requests arrive one per line:
//!
//! ```text
//! {"id": 1, "method": "uploadFile", "arguments": {"filePath": "/tmp/a.txt", "key": "a.txt"}}
//! ```
//!
//! Each request yields exactly one response line, tagged with its `id`;
//! progress events are interleaved as they happen:
//!
//! ```text
//! {"event":"progress","operation":"upload","key":"a.txt","bytesTransferred":4096,"totalBytes":5000}
//! {"id":1,"status":"success","result":{"url":"...","eTag":"...","versionId":""}}
//! {"id":2,"status":"error","code":"FILE_NOT_FOUND","message":"File not found: /tmp/b.txt","details":null}
//! {"id":3,"status":"notImplemented"}
//! ```
//!
//! [`serve`] runs the request loop over any buffered reader.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

use crate::dispatcher::{Dispatcher, MethodResponse};
use crate::error::ServiceError;
use crate::progress::TransferProgress;
use crate::request::Operation;

/// One decoded request line
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MethodCall {
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum ResponseBody {
    Success {
        result: Value,
    },
    Error {
        code: &'static str,
        message: String,
        details: Option<String>,
    },
    NotImplemented,
}

#[derive(Debug, Serialize)]
struct ResponseLine {
    id: Option<u64>,
    #[serde(flatten)]
    body: ResponseBody,
}

#[derive(Debug, Serialize)]
struct EventLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    progress: &'a TransferProgress,
}

/// Called with the arguments of every successful `initialize`
pub type InitializeHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Decode a raw request line
pub fn decode_line(line: &[u8]) -> Result<MethodCall, ServiceError> {
    let line = std::str::from_utf8(line)
        .map_err(|e| ServiceError::invalid_arguments(format!("Malformed request: {}", e)))?;
    decode_call(line)
}

/// Decode a request line
pub fn decode_call(line: &str) -> Result<MethodCall, ServiceError> {
    serde_json::from_str(line)
        .map_err(|e| ServiceError::invalid_arguments(format!("Malformed request: {}", e)))
}

/// Encode the response line for call `id`
pub fn encode_response(id: Option<u64>, response: MethodResponse) -> String {
    let body = match response {
        MethodResponse::Success(result) => ResponseBody::Success { result },
        MethodResponse::Error(err) => ResponseBody::Error {
            code: err.code(),
            message: err.message,
            details: err.details,
        },
        MethodResponse::NotImplemented => ResponseBody::NotImplemented,
    };

    encode(&ResponseLine { id, body })
}

/// Encode a progress event line
pub fn encode_progress(progress: &TransferProgress) -> String {
    encode(&EventLine {
        event: "progress",
        progress,
    })
}

/// Serve requests from `input` until it ends, writing response lines to `out`
///
/// Lines that cannot be decoded get an `id: null` error line and serving goes
/// on. A read failure ends the input, but every call already dispatched still
/// gets its response before this returns.
pub async fn serve<R>(
    dispatcher: &Dispatcher,
    mut input: R,
    out: UnboundedSender<String>,
    on_initialized: Option<InitializeHook>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut calls = JoinSet::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        match input.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to read request: {}", e);
                break;
            }
        }

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let call = match decode_line(&line) {
            Ok(call) => call,
            Err(err) => {
                tracing::warn!("{}", err);
                let _ = out.send(encode_response(None, MethodResponse::Error(err)));
                continue;
            }
        };

        let pending = dispatcher.dispatch(&call.method, call.arguments.clone());
        let out = out.clone();
        let on_initialized = on_initialized.clone();

        calls.spawn(async move {
            let response = pending.await;
            if let Some(hook) = on_initialized {
                if Operation::from_method(&call.method) == Some(Operation::Initialize)
                    && response.is_success()
                {
                    hook(&call.arguments);
                }
            }
            let _ = out.send(encode_response(call.id, response));
        });
    }

    tracing::debug!("Input closed, waiting for {} in-flight calls", calls.len());
    while let Some(joined) = calls.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Call task failed: {}", e);
        }
    }
}

fn encode<T: Serialize>(line: &T) -> String {
    // Plain structs of strings, numbers and JSON values always serialize
    serde_json::to_string(line).unwrap_or_else(|e| {
        format!(
            r#"{{"id":null,"status":"error","code":"UNEXPECTED_ERROR","message":{:?},"details":null}}"#,
            e.to_string()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::dispatcher::DispatcherConfig;
    use crate::progress::TransferDirection;
    use crate::s3::memory::MemoryStore;
    use serde_json::json;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};
    use tokio::sync::mpsc;

    /// Reader that fails on first use
    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
        }
    }

    /// Serve `input` and collect every response line by id
    async fn serve_all<R>(dispatcher: &Dispatcher, input: R, hook: Option<InitializeHook>) -> Vec<Value>
    where
        R: AsyncBufRead + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        serve(dispatcher, input, tx, hook).await;

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(parse(&line));
        }
        lines
    }

    fn by_id(lines: &[Value], id: u64) -> &Value {
        lines.iter().find(|l| l["id"] == json!(id)).unwrap()
    }

    fn memory_dispatcher() -> (MemoryStore, Dispatcher) {
        let store = MemoryStore::new();
        store.create_bucket("b1");
        let dispatcher = Dispatcher::new(Arc::new(store.connector()), DispatcherConfig::default());
        (store, dispatcher)
    }

    fn parse(line: &str) -> Value {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_decode_call() {
        let call = decode_call(r#"{"id": 7, "method": "deleteFile", "arguments": {"key": "a.txt"}}"#)
            .unwrap();
        assert_eq!(call.id, Some(7));
        assert_eq!(call.method, "deleteFile");
        assert_eq!(call.arguments, json!({ "key": "a.txt" }));
    }

    #[test]
    fn test_decode_call_without_arguments() {
        let call = decode_call(r#"{"method": "getPlatformVersion"}"#).unwrap();
        assert_eq!(call.id, None);
        assert!(call.arguments.is_null());
    }

    #[test]
    fn test_decode_malformed() {
        let err = decode_call("{not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);

        let err = decode_call(r#"{"id": 1}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);
    }

    #[test]
    fn test_encode_success() {
        let line = encode_response(Some(1), MethodResponse::Success(json!(true)));
        assert_eq!(parse(&line), json!({ "id": 1, "status": "success", "result": true }));
    }

    #[test]
    fn test_encode_error() {
        let line = encode_response(
            Some(2),
            MethodResponse::Error(ServiceError::invalid_arguments("Key is required")),
        );
        assert_eq!(
            parse(&line),
            json!({
                "id": 2,
                "status": "error",
                "code": "INVALID_ARGUMENTS",
                "message": "Key is required",
                "details": null
            })
        );
    }

    #[test]
    fn test_encode_not_implemented() {
        let line = encode_response(None, MethodResponse::NotImplemented);
        assert_eq!(parse(&line), json!({ "id": null, "status": "notImplemented" }));
    }

    #[test]
    fn test_encode_progress() {
        let line = encode_progress(&TransferProgress {
            operation: TransferDirection::Upload,
            key: "a.txt".to_string(),
            bytes_transferred: 10,
            total_bytes: Some(20),
        });
        assert_eq!(
            parse(&line),
            json!({
                "event": "progress",
                "operation": "upload",
                "key": "a.txt",
                "bytesTransferred": 10,
                "totalBytes": 20
            })
        );
    }

    #[test]
    fn test_decode_line_rejects_invalid_utf8() {
        let err = decode_line(b"\xff\xfe\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArguments);

        let call = decode_line(b"{\"method\": \"list\"}\n").unwrap();
        assert_eq!(call.method, "list");
    }

    #[tokio::test]
    async fn test_serve_survives_invalid_utf8_line() {
        let (_store, dispatcher) = memory_dispatcher();
        let input: &[u8] = b"{\"id\":1,\"method\":\"getPlatformVersion\"}\n\xff\xfe\n\n{\"id\":2,\"method\":\"deleteFile\",\"arguments\":{\"key\":\"a.txt\"}}\n";

        let lines = serve_all(&dispatcher, input, None).await;
        assert_eq!(lines.len(), 3, "{:?}", lines);

        assert_eq!(by_id(&lines, 1)["status"], "success");
        assert_eq!(by_id(&lines, 2)["code"], "CLIENT_NOT_INITIALIZED");

        let rejected = lines.iter().find(|l| l["id"].is_null()).unwrap();
        assert_eq!(rejected["code"], "INVALID_ARGUMENTS");
    }

    #[tokio::test]
    async fn test_serve_answers_dispatched_calls_after_read_error() {
        let (_store, dispatcher) = memory_dispatcher();
        let head: &[u8] = b"{\"id\":1,\"method\":\"getPlatformVersion\"}\n{\"id\":2,\"method\":\"listFiles\"}\n";
        let input = BufReader::new(head.chain(BrokenPipe));

        let lines = serve_all(&dispatcher, input, None).await;
        assert_eq!(lines.len(), 2, "{:?}", lines);
        assert_eq!(by_id(&lines, 1)["status"], "success");
        assert_eq!(by_id(&lines, 2)["code"], "BUCKET_NOT_SET");
    }

    #[tokio::test]
    async fn test_serve_reports_successful_initialize() {
        let (_store, dispatcher) = memory_dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook: InitializeHook = {
            let seen = seen.clone();
            Arc::new(move |arguments: &Value| seen.lock().unwrap().push(arguments["bucketName"].clone()))
        };

        let input: &[u8] = concat!(
            r#"{"id":1,"method":"initialize","arguments":{"region":"us-east-1","bucketName":"b1","accessKeyId":"AK","secretAccessKey":"SK"}}"#,
            "\n",
            r#"{"id":2,"method":"initialize","arguments":{"region":"us-east-1","bucketName":"gone","accessKeyId":"AK","secretAccessKey":"SK"}}"#,
            "\n"
        )
        .as_bytes();

        let lines = serve_all(&dispatcher, input, Some(hook)).await;
        assert_eq!(by_id(&lines, 1)["result"], true);
        assert_eq!(by_id(&lines, 2)["code"], "CONNECTION_ERROR");
        assert_eq!(*seen.lock().unwrap(), vec![json!("b1")]);
    }
}
