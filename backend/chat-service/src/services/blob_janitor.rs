//! Background removal of attachment blobs.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::collaborators::BlobStore;
use crate::metrics::BLOB_DELETIONS_TOTAL;

/// Handle onto the cleanup queue. Clones share one worker; the worker stops
/// once every handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct BlobJanitor {
    tx: mpsc::UnboundedSender<String>,
}

impl BlobJanitor {
    pub fn spawn(blobs: Arc<dyn BlobStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(blobs, rx));
        (Self { tx }, worker)
    }

    /// Queues `public_id` for deletion. Never blocks and never fails the caller.
    pub fn schedule(&self, public_id: impl Into<String>) {
        let public_id = public_id.into();
        if let Err(e) = self.tx.send(public_id) {
            tracing::warn!(public_id = %e.0, "blob janitor stopped; deletion dropped");
        }
    }
}

async fn run(blobs: Arc<dyn BlobStore>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(public_id) = rx.recv().await {
        match blobs.delete(&public_id).await {
            Ok(()) => {
                tracing::debug!(public_id = %public_id, "attachment blob deleted");
                BLOB_DELETIONS_TOTAL.with_label_values(&["deleted"]).inc();
            }
            Err(e) => {
                tracing::warn!(
                    public_id = %public_id,
                    error = %e,
                    "attachment blob deletion failed"
                );
                BLOB_DELETIONS_TOTAL.with_label_values(&["failed"]).inc();
            }
        }
    }
    tracing::debug!("blob janitor exiting");
}
