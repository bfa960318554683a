use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use chat_schema::{ChannelEvent, ClientFrame, ServerFrame};

use super::Realtime;
use crate::metrics::REALTIME_SESSIONS;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One WebSocket connection on one conversation channel.
///
/// The user id comes from the channel credential; it is the only identity
/// this session will publish under.
pub struct ChannelSession {
    conversation_id: Uuid,
    user_id: Uuid,
    client_id: Option<Uuid>,
    realtime: Realtime,
    hb: Instant,
}

impl ChannelSession {
    pub fn new(conversation_id: Uuid, user_id: Uuid, realtime: Realtime) -> Self {
        Self {
            conversation_id,
            user_id,
            client_id: None,
            realtime,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(
                    conversation_id = %act.conversation_id,
                    user_id = %act.user_id,
                    "realtime heartbeat timed out, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, frame: &ServerFrame) {
        match serde_json::to_string(frame) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!(error = %e, kind = frame.kind(), "failed to encode frame"),
        }
    }

    fn handle_frame(&mut self, frame: ClientFrame, ctx: &mut ws::WebsocketContext<Self>) {
        match frame {
            ClientFrame::Publish { event } => {
                // Edits, deletes and reactions are broadcast by the server
                // after the store accepted them.
                let view = match event {
                    ChannelEvent::Message(view) => view,
                    other => {
                        tracing::warn!(
                            conversation_id = %self.conversation_id,
                            user_id = %self.user_id,
                            kind = other.kind(),
                            "dropping non-message event published by a client"
                        );
                        return;
                    }
                };
                if view.sender_id() != self.user_id
                    || view.message.conversation_id != self.conversation_id
                {
                    tracing::warn!(
                        conversation_id = %self.conversation_id,
                        user_id = %self.user_id,
                        message_id = %view.id(),
                        "dropping message not sent by this session's user on this channel"
                    );
                    return;
                }
                self.realtime.publish(
                    self.conversation_id,
                    ChannelEvent::Message(view),
                    self.client_id,
                );
            }
            ClientFrame::Typing { is_typing } => {
                let event = ChannelEvent::Typing {
                    user_id: self.user_id,
                    is_typing,
                };
                self.realtime
                    .publish(self.conversation_id, event, self.client_id);
            }
            ClientFrame::Leave => {
                ctx.close(Some(ws::CloseCode::Normal.into()));
                ctx.stop();
            }
        }
    }
}

impl Actor for ChannelSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        REALTIME_SESSIONS.inc();
        self.hb(ctx);

        let joined = self.realtime.join(self.conversation_id, self.user_id);
        self.client_id = Some(joined.member.client_id);
        tracing::info!(
            conversation_id = %self.conversation_id,
            user_id = %self.user_id,
            client_id = %joined.member.client_id,
            "realtime session started"
        );

        self.send(
            ctx,
            &ServerFrame::PresenceSnapshot {
                members: joined.snapshot,
            },
        );
        ctx.add_stream(UnboundedReceiverStream::new(joined.frames));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        REALTIME_SESSIONS.dec();
        if let Some(client_id) = self.client_id.take() {
            self.realtime.leave(self.conversation_id, client_id);
        }
        tracing::info!(
            conversation_id = %self.conversation_id,
            user_id = %self.user_id,
            "realtime session stopped"
        );
    }
}

// Frames fanned out by the hub
impl StreamHandler<ServerFrame> for ChannelSession {
    fn handle(&mut self, frame: ServerFrame, ctx: &mut Self::Context) {
        self.send(ctx, &frame);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChannelSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => self.handle_frame(frame, ctx),
                Err(e) => tracing::warn!(error = %e, "failed to parse realtime frame"),
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary realtime frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "realtime close frame received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(error = %e, "realtime protocol error");
                ctx.stop();
            }
        }
    }
}
