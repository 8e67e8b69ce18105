use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use super::snapshot::{SnapshotRecord, snapshot_key};
use super::store::KeyValueStore;
use crate::buffer::PixelBuffer;
use crate::error::StoreError;

enum WriterMessage {
    Write {
        page_id: u32,
        buffer: PixelBuffer,
        timestamp: i64,
    },
    Flush(Sender<()>),
    Shutdown,
}

/// Encode and store one snapshot. Shared by the worker and inline paths.
pub fn write_snapshot(
    store: &dyn KeyValueStore,
    page_id: u32,
    buffer: &PixelBuffer,
    timestamp: i64,
) -> Result<(), StoreError> {
    let record = SnapshotRecord::capture(page_id, buffer, timestamp)?;
    store.put(&snapshot_key(page_id), &record.to_bytes()?)?;
    debug!(page_id, bytes = record.byte_size, "snapshot written");
    Ok(())
}

// ============================================================================
// BACKGROUND SNAPSHOT WRITER
// ============================================================================

/// Moves snapshot encoding and store writes off the drawing thread.
/// Requests are processed in order. Failures are logged and dropped.
pub struct SnapshotWriter {
    store: Arc<dyn KeyValueStore>,
    sender: Option<Sender<WriterMessage>>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotWriter {
    pub fn spawn(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker_store = Arc::clone(&store);
        let spawned = std::thread::Builder::new()
            .name("colorbook-snapshots".into())
            .spawn(move || run(worker_store, rx));
        match spawned {
            Ok(handle) => Self {
                store,
                sender: Some(tx),
                handle: Some(handle),
            },
            Err(e) => {
                warn!("snapshot writer thread unavailable, writing inline: {}", e);
                Self {
                    store,
                    sender: None,
                    handle: None,
                }
            }
        }
    }

    /// Queue a write. Never blocks on encoding or I/O unless the worker
    /// could not be started.
    pub fn submit(&self, page_id: u32, buffer: PixelBuffer, timestamp: i64) {
        let message = WriterMessage::Write {
            page_id,
            buffer,
            timestamp,
        };
        let message = match &self.sender {
            Some(tx) => match tx.send(message) {
                Ok(()) => return,
                Err(mpsc::SendError(message)) => message,
            },
            None => message,
        };
        if let WriterMessage::Write {
            page_id,
            buffer,
            timestamp,
        } = message
            && let Err(e) = write_snapshot(self.store.as_ref(), page_id, &buffer, timestamp)
        {
            error!(page_id, stage = "snapshot-write", "snapshot write failed: {}", e);
        }
    }

    /// Block until every previously submitted write has been attempted.
    pub fn flush(&self) {
        let Some(tx) = &self.sender else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if tx.send(WriterMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(WriterMessage::Shutdown);
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("snapshot writer thread panicked");
        }
    }
}

fn run(store: Arc<dyn KeyValueStore>, rx: Receiver<WriterMessage>) {
    while let Ok(message) = rx.recv() {
        match message {
            WriterMessage::Write {
                page_id,
                buffer,
                timestamp,
            } => {
                if let Err(e) = write_snapshot(store.as_ref(), page_id, &buffer, timestamp) {
                    error!(page_id, stage = "snapshot-write", "snapshot write failed: {}", e);
                }
            }
            WriterMessage::Flush(ack) => {
                let _ = ack.send(());
            }
            WriterMessage::Shutdown => break,
        }
    }
    debug!("snapshot writer stopped");
}
