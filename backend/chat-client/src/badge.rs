//! App-wide unread badge.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::api::ChatApi;

pub const BADGE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Polls the unread total and publishes it on a watch channel.
///
/// Refreshes immediately, then every `interval` and on [`refresh`](Self::refresh).
/// A failed poll keeps the previous value.
pub struct UnreadBadge {
    total: watch::Receiver<u64>,
    refresh: Arc<Notify>,
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl UnreadBadge {
    pub fn spawn(api: Arc<dyn ChatApi>, interval: Duration) -> Self {
        let (total_tx, total) = watch::channel(0u64);
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let refresh = Arc::new(Notify::new());

        let handle = tokio::spawn(poll_unread(
            api,
            interval,
            total_tx,
            refresh.clone(),
            shutdown_rx,
        ));

        Self {
            total,
            refresh,
            shutdown_tx,
            handle,
        }
    }

    pub fn current(&self) -> u64 {
        *self.total.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.total.clone()
    }

    /// Requests a poll now, e.g. after a conversation was read.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        let _ = (&mut self.handle).await;
    }
}

impl Drop for UnreadBadge {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn poll_unread(
    api: Arc<dyn ChatApi>,
    interval: Duration,
    total: watch::Sender<u64>,
    refresh: Arc<Notify>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        match api.unread_total().await {
            Ok(value) => {
                total.send_if_modified(|current| {
                    let changed = *current != value;
                    *current = value;
                    changed
                });
            }
            Err(e) => tracing::warn!(error = %e, "unread total refresh failed"),
        }

        tokio::select! {
            _ = shutdown.changed() => {
                tracing::debug!("unread badge stopped");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
            _ = refresh.notified() => {}
        }
    }
}
