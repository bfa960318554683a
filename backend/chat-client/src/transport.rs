//! Realtime channel transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message as WsMessage};
use uuid::Uuid;

use chat_schema::{ClientFrame, ServerFrame};

use crate::error::{ClientError, ClientResult};

/// An attached conversation channel.
///
/// Dropping `outgoing` closes the connection; `incoming` ends when the
/// server goes away.
pub struct RealtimeConnection {
    pub outgoing: UnboundedSender<ClientFrame>,
    pub incoming: UnboundedReceiver<ServerFrame>,
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, conversation_id: Uuid, token: &str)
        -> ClientResult<RealtimeConnection>;
}

/// Connects to `{base}/ws/conversations/{id}?token=..` over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
}

impl WsConnector {
    /// `base_url` is the service root, `ws://` or `wss://`.
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Validation(format!("invalid realtime url {base_url}: {e}")))?;
        match base_url.scheme() {
            "ws" | "wss" => Ok(Self { base_url }),
            other => Err(ClientError::Validation(format!(
                "realtime url must be ws or wss, got {other}"
            ))),
        }
    }

    fn channel_url(&self, conversation_id: Uuid, token: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["ws", "conversations", &conversation_id.to_string()]);
        }
        url.query_pairs_mut().clear().append_pair("token", token);
        url
    }
}

#[async_trait]
impl RealtimeConnector for WsConnector {
    async fn connect(
        &self,
        conversation_id: Uuid,
        token: &str,
    ) -> ClientResult<RealtimeConnection> {
        let url = self.channel_url(conversation_id, token);
        let (socket, _) = connect_async(url.as_str()).await.map_err(|e| match e {
            tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                ClientError::Unauthorized
            }
            other => ClientError::Transient(format!("realtime connect: {other}")),
        })?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = unbounded_channel::<ClientFrame>();
        let (in_tx, in_rx) = unbounded_channel::<ServerFrame>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode client frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::text(text)).await {
                    tracing::debug!(error = %e, "realtime send failed");
                    return;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            error = %e,
                            "realtime receive failed"
                        );
                        break;
                    }
                };
                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(frame) => {
                        if in_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed server frame"),
                }
            }
            tracing::debug!(conversation_id = %conversation_id, "realtime connection ended");
        });

        Ok(RealtimeConnection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_url_carries_conversation_and_token() {
        let connector = WsConnector::new("wss://chat.local/").unwrap();
        let id = Uuid::nil();
        assert_eq!(
            connector.channel_url(id, "a.b.c").as_str(),
            format!("wss://chat.local/ws/conversations/{id}?token=a.b.c")
        );
    }

    #[test]
    fn http_scheme_is_rejected() {
        assert!(matches!(
            WsConnector::new("http://chat.local"),
            Err(ClientError::Validation(_))
        ));
    }
}
