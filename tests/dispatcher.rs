//! End-to-end dispatcher tests against the in-memory object store
//!
//! Run with: cargo test --test dispatcher

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use s3_bridge::progress::{self, TransferDirection};
use s3_bridge::s3::MemoryStore;
use s3_bridge::{Dispatcher, DispatcherConfig, ErrorKind, MethodResponse};

fn dispatcher(store: &MemoryStore) -> Dispatcher {
    Dispatcher::new(Arc::new(store.connector()), DispatcherConfig::default())
}

fn static_init(bucket: &str) -> Value {
    json!({
        "region": "us-east-1",
        "bucketName": bucket,
        "accessKeyId": "AK",
        "secretAccessKey": "SK"
    })
}

fn success(response: MethodResponse) -> Value {
    match response {
        MethodResponse::Success(value) => value,
        other => panic!("expected success, got {:?}", other),
    }
}

fn error_kind(response: &MethodResponse) -> ErrorKind {
    response.error().map(|e| e.kind).expect("expected an error")
}

/// Dispatcher with a live session on bucket `b1`
async fn initialized(store: &MemoryStore) -> Dispatcher {
    store.create_bucket("b1");
    let dispatcher = dispatcher(store);
    assert_eq!(success(dispatcher.call("initialize", static_init("b1")).await), json!(true));
    dispatcher
}

fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_initialize_with_existing_bucket() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;

    let session = dispatcher.session_store().current().unwrap();
    assert_eq!(session.bucket(), "b1");
    assert_eq!(session.region(), "us-east-1");
}

#[tokio::test]
async fn test_initialize_with_missing_bucket_is_connection_error() {
    let store = MemoryStore::new();
    let dispatcher = dispatcher(&store);

    let response = dispatcher.call("initialize", static_init("nope")).await;
    assert_eq!(error_kind(&response), ErrorKind::ConnectionError);
    assert!(response.error().unwrap().details.is_some());
    assert!(!dispatcher.session_store().is_initialized());
}

#[tokio::test]
async fn test_initialize_without_credentials() {
    let store = MemoryStore::new();
    store.create_bucket("b1");

    let response = dispatcher(&store)
        .call("initialize", json!({ "region": "us-east-1", "bucketName": "b1" }))
        .await;
    assert_eq!(error_kind(&response), ErrorKind::MissingCredentials);

    // Half a key pair is no key pair
    let response = dispatcher(&store)
        .call(
            "initialize",
            json!({ "region": "us-east-1", "bucketName": "b1", "accessKeyId": "AK" }),
        )
        .await;
    assert_eq!(error_kind(&response), ErrorKind::MissingCredentials);
    assert_eq!(store.backend_calls(), 0);
}

#[tokio::test]
async fn test_initialize_with_identity_pool() {
    let store = MemoryStore::new();
    store.create_bucket("b1");

    let response = dispatcher(&store)
        .call(
            "initialize",
            json!({
                "region": "eu-west-1",
                "bucketName": "b1",
                "identityPoolId": "eu-west-1:00000000-0000-0000-0000-000000000000"
            }),
        )
        .await;
    assert_eq!(success(response), json!(true));
}

#[tokio::test]
async fn test_operations_before_initialize_never_reach_backend() {
    let store = MemoryStore::new();
    store.create_bucket("b1");
    let dispatcher = dispatcher(&store);

    let calls = [
        ("uploadFile", json!({ "filePath": "/tmp/a.txt", "key": "a.txt" })),
        ("downloadFile", json!({ "key": "a.txt", "localPath": "/tmp/a.txt" })),
        ("deleteFile", json!({ "key": "a.txt" })),
        ("getSignedUrl", json!({ "key": "a.txt" })),
    ];
    for (method, arguments) in calls {
        let response = dispatcher.call(method, arguments).await;
        assert_eq!(error_kind(&response), ErrorKind::NotInitialized, "{}", method);
    }

    let response = dispatcher.call("listFiles", json!({ "prefix": "a" })).await;
    assert_eq!(error_kind(&response), ErrorKind::BucketNotSet);

    assert_eq!(store.backend_calls(), 0);
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;
    let dir = TempDir::new().unwrap();

    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let source = write_file(&dir, "source.bin", &data);

    let uploaded = success(
        dispatcher
            .call("uploadFile", json!({ "filePath": source, "key": "data/blob.bin" }))
            .await,
    );
    assert_eq!(
        uploaded["url"],
        "https://b1.s3.us-east-1.amazonaws.com/data/blob.bin"
    );
    assert_eq!(store.object("b1", "data/blob.bin").unwrap(), data);

    let target = dir.path().join("out/nested/blob.bin");
    let downloaded = success(
        dispatcher
            .call(
                "downloadFile",
                json!({ "key": "data/blob.bin", "localPath": target.to_string_lossy() }),
            )
            .await,
    );

    assert_eq!(downloaded["size"], json!(data.len()));
    assert_eq!(downloaded["path"], json!(target.to_string_lossy()));
    assert!(downloaded["lastModified"].as_i64().unwrap() > 0);
    assert_eq!(std::fs::read(&target).unwrap(), data);
}

#[tokio::test]
async fn test_upload_reports_progress() {
    let store = MemoryStore::new();
    store.create_bucket("b1");
    let (tx, mut rx) = progress::channel();
    let dispatcher = dispatcher(&store).with_progress(tx);
    success(dispatcher.call("initialize", static_init("b1")).await);

    let dir = TempDir::new().unwrap();
    let data = vec![7u8; 20_000];
    let source = write_file(&dir, "a.bin", &data);

    success(
        dispatcher
            .call("upload", json!({ "filePath": source, "key": "a.bin" }))
            .await,
    );

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.operation, TransferDirection::Upload);
        assert_eq!(event.key, "a.bin");
        assert_eq!(event.total_bytes, Some(data.len() as u64));
        last = Some(event.bytes_transferred);
    }
    assert_eq!(last, Some(data.len() as u64));
}

#[tokio::test]
async fn test_upload_missing_source_file() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.txt");

    let response = dispatcher
        .call(
            "uploadFile",
            json!({ "filePath": missing.to_string_lossy(), "key": "missing.txt" }),
        )
        .await;
    assert_eq!(error_kind(&response), ErrorKind::SourceNotFound);
    assert!(store.object("b1", "missing.txt").is_none());
}

#[tokio::test]
async fn test_missing_arguments_are_invalid() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;

    let calls = [
        ("uploadFile", json!({ "key": "a.txt" })),
        ("uploadFile", json!({ "filePath": "", "key": "a.txt" })),
        ("downloadFile", json!({ "key": "a.txt" })),
        ("deleteFile", json!({})),
        ("getSignedUrl", json!({ "expirationInSeconds": 60 })),
    ];
    for (method, arguments) in calls {
        let response = dispatcher.call(method, arguments).await;
        assert_eq!(error_kind(&response), ErrorKind::InvalidArguments, "{}", method);
    }
}

#[tokio::test]
async fn test_download_missing_key_is_storage_error() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;
    let dir = TempDir::new().unwrap();

    let response = dispatcher
        .call(
            "downloadFile",
            json!({ "key": "ghost.txt", "localPath": dir.path().join("ghost.txt").to_string_lossy() }),
        )
        .await;
    let err = response.error().unwrap();
    assert_eq!(err.kind, ErrorKind::StorageError);
    assert!(err.details.as_deref().unwrap().contains("NoSuchKey"));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;

    for _ in 0..2 {
        let response = dispatcher.call("deleteFile", json!({ "key": "never-there.txt" })).await;
        assert_eq!(success(response), json!(true));
    }
}

#[tokio::test]
async fn test_list_non_matching_prefix_is_empty() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;

    let response = dispatcher.call("listFiles", json!({ "prefix": "zzz/" })).await;
    assert_eq!(success(response), json!([]));

    let response = dispatcher.call("listFiles", Value::Null).await;
    assert_eq!(success(response), json!([]));
}

#[tokio::test]
async fn test_list_access_denied_is_permission_error() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;
    store.deny_list("b1");

    let response = dispatcher.call("listFiles", json!({})).await;
    let err = response.error().unwrap();
    assert_eq!(err.kind, ErrorKind::PermissionError);
    assert!(err.message.contains("s3:ListBucket"));
}

#[tokio::test]
async fn test_example_scenario() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;
    let dir = TempDir::new().unwrap();
    let source = write_file(&dir, "a.txt", b"hello world");

    let uploaded = success(
        dispatcher
            .call("uploadFile", json!({ "filePath": source, "key": "a.txt" }))
            .await,
    );
    assert_eq!(uploaded["url"], "https://b1.s3.us-east-1.amazonaws.com/a.txt");
    assert!(!uploaded["eTag"].as_str().unwrap().is_empty());
    assert_eq!(uploaded["versionId"], "");

    let listed = success(dispatcher.call("listFiles", json!({ "prefix": "a" })).await);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["key"], "a.txt");
    assert_eq!(listed[0]["size"], 11);
    assert!(listed[0]["lastModified"].is_i64());

    assert_eq!(success(dispatcher.call("deleteFile", json!({ "key": "a.txt" })).await), json!(true));

    let listed = success(dispatcher.call("listFiles", json!({ "prefix": "a" })).await);
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn test_versioned_bucket_reports_version_id() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;
    store.enable_versioning("b1");
    let dir = TempDir::new().unwrap();
    let source = write_file(&dir, "v.txt", b"v1");

    let uploaded = success(
        dispatcher
            .call("uploadFile", json!({ "filePath": source, "key": "v.txt" }))
            .await,
    );
    assert!(!uploaded["versionId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_sign_url_for_missing_key() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;

    let response = dispatcher
        .call("getSignedUrl", json!({ "key": "missing.txt", "expirationInSeconds": 60 }))
        .await;
    let url = success(response);
    let url = url.as_str().unwrap();
    assert!(url.contains("/missing.txt"));
    assert!(url.contains("X-Amz-Expires=60"));
}

#[tokio::test]
async fn test_sign_url_uses_default_expiration() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;

    let url = success(dispatcher.call("sign-url", json!({ "key": "a.txt" })).await);
    assert!(url.as_str().unwrap().contains("X-Amz-Expires=3600"));
}

#[tokio::test]
async fn test_unknown_method_is_not_implemented() {
    let store = MemoryStore::new();
    let dispatcher = initialized(&store).await;

    let response = dispatcher.call("copyFile", json!({ "key": "a.txt" })).await;
    assert_eq!(response, MethodResponse::NotImplemented);
}

#[tokio::test]
async fn test_concurrent_reinitialization_keeps_sessions_consistent() {
    let store = MemoryStore::new().with_latency(Duration::from_millis(5));
    store.create_bucket("b1");
    store.create_bucket("b2");
    let dispatcher = dispatcher(&store);
    success(dispatcher.call("initialize", static_init("b1")).await);

    let dir = TempDir::new().unwrap();
    let source = write_file(&dir, "payload.txt", b"payload");

    let mut pending = Vec::new();
    for i in 0..24 {
        let key = format!("obj-{}.txt", i);
        pending.push((
            Some(key.clone()),
            dispatcher.dispatch("uploadFile", json!({ "filePath": source, "key": key })),
        ));
        if i % 4 == 0 {
            let bucket = if i % 8 == 0 { "b2" } else { "b1" };
            pending.push((None, dispatcher.dispatch("initialize", static_init(bucket))));
        }
    }

    for (key, result) in pending {
        let value = success(result.await);
        let Some(key) = key else {
            assert_eq!(value, json!(true));
            continue;
        };

        // The URL names the bucket the session carried; the object landed there
        let url = value["url"].as_str().unwrap();
        let (bucket, other) = if url == format!("https://b1.s3.us-east-1.amazonaws.com/{}", key) {
            ("b1", "b2")
        } else {
            assert_eq!(url, format!("https://b2.s3.us-east-1.amazonaws.com/{}", key));
            ("b2", "b1")
        };
        assert_eq!(store.object(bucket, &key).unwrap(), b"payload");
        assert!(store.object(other, &key).is_none());
    }
}
