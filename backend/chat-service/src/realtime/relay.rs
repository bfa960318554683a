//! Cross-instance relay over Redis pub/sub.
//!
//! Every frame an instance fans out locally is also published on
//! `chat:conversation:{id}`. Each instance pattern-subscribes to all
//! conversation channels and replays frames from other origins into its own
//! hub.

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use chat_schema::ServerFrame;

use super::hub::ChannelHub;
use crate::error::AppError;

pub const CHANNEL_PATTERN: &str = "chat:conversation:*";

pub fn channel_name(conversation_id: Uuid) -> String {
    format!("chat:conversation:{conversation_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Instance that fanned the frame out first.
    pub origin: Uuid,
    pub conversation_id: Uuid,
    #[serde(default)]
    pub exclude_client: Option<Uuid>,
    pub frame: ServerFrame,
}

/// Queue in front of one publishing task, which keeps frames in order.
#[derive(Clone)]
pub struct RelayPublisher {
    origin: Uuid,
    tx: mpsc::UnboundedSender<RelayEnvelope>,
}

impl RelayPublisher {
    pub fn spawn(conn: ConnectionManager, origin: Uuid) -> (Self, JoinHandle<()>) {
        let (publisher, rx) = Self::detached(origin);
        let task = tokio::spawn(run_publisher(conn, rx));
        (publisher, task)
    }

    /// Publisher whose envelopes are handed to the caller instead of Redis.
    pub fn detached(origin: Uuid) -> (Self, mpsc::UnboundedReceiver<RelayEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { origin, tx }, rx)
    }

    pub fn publish(&self, conversation_id: Uuid, exclude_client: Option<Uuid>, frame: ServerFrame) {
        let envelope = RelayEnvelope {
            origin: self.origin,
            conversation_id,
            exclude_client,
            frame,
        };
        if self.tx.send(envelope).is_err() {
            tracing::warn!(
                conversation_id = %conversation_id,
                "relay publisher stopped; frame not relayed"
            );
        }
    }
}

async fn run_publisher(
    mut conn: ConnectionManager,
    mut rx: mpsc::UnboundedReceiver<RelayEnvelope>,
) {
    while let Some(envelope) = rx.recv().await {
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode relay envelope");
                continue;
            }
        };
        let channel = channel_name(envelope.conversation_id);
        if let Err(e) = conn.publish::<_, _, ()>(&channel, payload).await {
            tracing::error!(channel = %channel, error = %e, "relay publish failed");
        }
    }
    tracing::debug!("relay publisher exiting");
}

/// Subscribes to every conversation channel and replays foreign frames into `hub`.
pub async fn spawn_listener(
    client: redis::Client,
    origin: Uuid,
    hub: Arc<ChannelHub>,
) -> Result<JoinHandle<()>, AppError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| AppError::StartServer(format!("redis pubsub: {e}")))?;
    pubsub
        .psubscribe(CHANNEL_PATTERN)
        .await
        .map_err(|e| AppError::StartServer(format!("redis psubscribe: {e}")))?;

    tracing::info!(pattern = CHANNEL_PATTERN, origin = %origin, "realtime relay subscribed");

    Ok(tokio::spawn(async move {
        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload = match msg.get_payload::<String>() {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = ?e, "failed to read relay payload");
                    continue;
                }
            };
            match serde_json::from_str::<RelayEnvelope>(&payload) {
                Ok(envelope) => apply(&hub, origin, &envelope),
                Err(e) => tracing::warn!(error = %e, "dropping malformed relay envelope"),
            }
        }
        tracing::warn!("realtime relay subscription ended");
    }))
}

/// Replays `envelope` unless this instance produced it.
pub fn apply(hub: &ChannelHub, origin: Uuid, envelope: &RelayEnvelope) {
    if envelope.origin == origin {
        return;
    }
    hub.apply_remote(
        envelope.conversation_id,
        &envelope.frame,
        envelope.exclude_client,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_schema::ChannelEvent;

    #[test]
    fn own_envelopes_are_ignored() {
        let hub = ChannelHub::new();
        let conversation = Uuid::new_v4();
        let mut local = hub.join(conversation, Uuid::new_v4());
        let origin = Uuid::new_v4();

        let envelope = RelayEnvelope {
            origin,
            conversation_id: conversation,
            exclude_client: None,
            frame: ServerFrame::Event {
                event: ChannelEvent::MessageDeleted {
                    message_id: Uuid::new_v4(),
                },
            },
        };

        apply(&hub, origin, &envelope);
        assert!(local.frames.try_recv().is_err());

        apply(&hub, Uuid::new_v4(), &envelope);
        assert_eq!(local.frames.try_recv().unwrap(), envelope.frame);
    }

    #[test]
    fn detached_publisher_stamps_origin() {
        let origin = Uuid::new_v4();
        let (publisher, mut rx) = RelayPublisher::detached(origin);
        let conversation = Uuid::new_v4();
        let client = Uuid::new_v4();

        publisher.publish(
            conversation,
            Some(client),
            ServerFrame::PresenceSnapshot { members: vec![] },
        );
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.origin, origin);
        assert_eq!(envelope.exclude_client, Some(client));
        assert_eq!(
            channel_name(envelope.conversation_id),
            format!("chat:conversation:{conversation}")
        );
    }
}
