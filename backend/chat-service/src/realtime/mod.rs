//! Realtime Channel Layer.
//!
//! One logical channel per conversation. Sessions join through the hub,
//! frames fan out to local members, and when a relay is configured the same
//! frames are mirrored to other instances. Nothing here is persisted and
//! delivery is best-effort.

use std::sync::Arc;
use uuid::Uuid;

use chat_schema::{ChannelEvent, ServerFrame};

pub mod hub;
pub mod relay;
pub mod session;

pub use hub::{ChannelHub, Joined};
pub use relay::{RelayEnvelope, RelayPublisher};
pub use session::ChannelSession;

use crate::metrics::REALTIME_FRAMES_TOTAL;

#[derive(Clone)]
pub struct Realtime {
    hub: Arc<ChannelHub>,
    relay: Option<RelayPublisher>,
}

impl Realtime {
    /// Single-instance channel layer.
    pub fn local() -> Self {
        Self {
            hub: Arc::new(ChannelHub::new()),
            relay: None,
        }
    }

    pub fn with_relay(hub: Arc<ChannelHub>, relay: RelayPublisher) -> Self {
        Self {
            hub,
            relay: Some(relay),
        }
    }

    pub fn join(&self, conversation_id: Uuid, user_id: Uuid) -> Joined {
        let joined = self.hub.join(conversation_id, user_id);
        self.relay(
            conversation_id,
            Some(joined.member.client_id),
            ServerFrame::PresenceEnter {
                member: joined.member.clone(),
            },
        );
        joined
    }

    pub fn leave(&self, conversation_id: Uuid, client_id: Uuid) {
        if let Some(frame) = self.hub.leave(conversation_id, client_id) {
            self.relay(conversation_id, Some(client_id), frame);
        }
    }

    /// Fans `event` out to every session on the conversation except `exclude`.
    pub fn publish(&self, conversation_id: Uuid, event: ChannelEvent, exclude: Option<Uuid>) {
        let frame = ServerFrame::Event { event };
        REALTIME_FRAMES_TOTAL
            .with_label_values(&[frame.kind()])
            .inc();
        self.hub.deliver(conversation_id, &frame, exclude);
        self.relay(conversation_id, exclude, frame);
    }

    fn relay(&self, conversation_id: Uuid, exclude: Option<Uuid>, frame: ServerFrame) {
        if let Some(relay) = &self.relay {
            relay.publish(conversation_id, exclude, frame);
        }
    }
}
