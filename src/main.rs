//! S3 Bridge host
//!
//! Speaks the line-delimited JSON protocol from [`s3_bridge::channel`] on
//! stdin/stdout. Logs go to stderr.

use anyhow::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3_bridge::channel::{encode_progress, serve, InitializeHook};
use s3_bridge::progress;
use s3_bridge::s3::AwsConnector;
use s3_bridge::settings::Settings;
use s3_bridge::Dispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting S3 Bridge v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {:#}", e);
            Settings::default()
        })
        .with_env_overrides();

    let (progress_tx, mut progress_rx) = progress::channel();
    let dispatcher = Dispatcher::new(Arc::new(AwsConnector), settings.dispatcher_config())
        .with_progress(progress_tx);
    let settings = Arc::new(Mutex::new(settings));

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let events = {
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                if out_tx.send(encode_progress(&event)).is_err() {
                    break;
                }
            }
        })
    };

    let on_initialized: InitializeHook = Arc::new(move |arguments: &Value| {
        remember_location(&settings, arguments)
    });
    let stdin = BufReader::new(tokio::io::stdin());
    serve(&dispatcher, stdin, out_tx.clone(), Some(on_initialized)).await;

    dispatcher.shutdown();
    drop(dispatcher);
    events.await?;
    drop(out_tx);
    writer.await??;

    tracing::info!("S3 Bridge stopped");
    Ok(())
}

/// Persist the location of a successful initialize
fn remember_location(settings: &Mutex<Settings>, arguments: &Value) {
    let mut settings = settings.lock().unwrap_or_else(PoisonError::into_inner);
    settings.set_location(
        arguments.get("region").and_then(Value::as_str),
        arguments.get("bucketName").and_then(Value::as_str),
    );
    if let Err(e) = settings.save() {
        tracing::warn!("Failed to save settings: {:#}", e);
    }
}
