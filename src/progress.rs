//! Transfer progress side channel
//!
//! Uploads and downloads emit [`TransferProgress`] events while bytes move.
//! Events never carry the operation's result; they are informational only and
//! are dropped silently when nobody listens.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Bytes moved so far for one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub operation: TransferDirection,
    pub key: String,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<TransferProgress>;

/// Create a progress channel
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Counts the bytes of one transfer and publishes each step
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    direction: TransferDirection,
    key: Arc<str>,
    total_bytes: Option<u64>,
    transferred: Arc<AtomicU64>,
    sink: Option<ProgressSender>,
}

impl ProgressReporter {
    pub fn new(
        direction: TransferDirection,
        key: &str,
        total_bytes: Option<u64>,
        sink: Option<ProgressSender>,
    ) -> Self {
        Self {
            direction,
            key: Arc::from(key),
            total_bytes,
            transferred: Arc::new(AtomicU64::new(0)),
            sink,
        }
    }

    /// Record `bytes` more and return the running total
    pub fn advance(&self, bytes: u64) -> u64 {
        let transferred = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;

        tracing::debug!(
            key = %self.key,
            bytes_transferred = transferred,
            "{:?} progress",
            self.direction
        );

        if let Some(sink) = &self.sink {
            // A closed channel only means nobody is listening anymore
            let _ = sink.send(TransferProgress {
                operation: self.direction,
                key: self.key.to_string(),
                bytes_transferred: transferred,
                total_bytes: self.total_bytes,
            });
        }

        transferred
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }
}
