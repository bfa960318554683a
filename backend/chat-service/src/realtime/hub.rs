//! Presence membership and local fan-out.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use chat_schema::{PresenceMember, ServerFrame};

/// A client in a conversation's membership table. Remote members were
/// relayed from another instance and have no local outbox.
struct Member {
    presence: PresenceMember,
    outbox: Option<UnboundedSender<ServerFrame>>,
}

/// Result of joining a channel.
pub struct Joined {
    pub member: PresenceMember,
    /// Members present at join time, the joiner included.
    pub snapshot: Vec<PresenceMember>,
    pub frames: UnboundedReceiver<ServerFrame>,
}

/// Conversation id to members. Delivery happens under the lock, so frames
/// from one publisher reach every member in publish order.
#[derive(Default)]
pub struct ChannelHub {
    channels: Mutex<HashMap<Uuid, Vec<Member>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Member>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a local client and announces it to everyone already present.
    pub fn join(&self, conversation_id: Uuid, user_id: Uuid) -> Joined {
        let (tx, rx) = unbounded_channel();
        let member = PresenceMember {
            client_id: Uuid::new_v4(),
            user_id,
            entered_at: Utc::now(),
        };

        let mut channels = self.channels();
        let members = channels.entry(conversation_id).or_default();
        fan_out(
            members,
            &ServerFrame::PresenceEnter {
                member: member.clone(),
            },
            None,
        );
        members.push(Member {
            presence: member.clone(),
            outbox: Some(tx),
        });
        let snapshot = members.iter().map(|m| m.presence.clone()).collect();

        tracing::debug!(
            conversation_id = %conversation_id,
            client_id = %member.client_id,
            members = members.len(),
            "client joined channel"
        );

        Joined {
            member,
            snapshot,
            frames: rx,
        }
    }

    /// Removes a client and announces its departure. Returns the leave frame,
    /// or `None` when the client was not a member.
    pub fn leave(&self, conversation_id: Uuid, client_id: Uuid) -> Option<ServerFrame> {
        let mut channels = self.channels();
        let members = channels.get_mut(&conversation_id)?;
        let position = members
            .iter()
            .position(|m| m.presence.client_id == client_id)?;
        let gone = members.remove(position);

        let frame = ServerFrame::PresenceLeave {
            client_id,
            user_id: gone.presence.user_id,
            left_at: Utc::now(),
        };
        fan_out(members, &frame, None);

        if members.is_empty() {
            channels.remove(&conversation_id);
        }
        tracing::debug!(
            conversation_id = %conversation_id,
            client_id = %client_id,
            "client left channel"
        );
        Some(frame)
    }

    /// Sends `frame` to every local member except `exclude`.
    pub fn deliver(&self, conversation_id: Uuid, frame: &ServerFrame, exclude: Option<Uuid>) {
        let channels = self.channels();
        if let Some(members) = channels.get(&conversation_id) {
            fan_out(members, frame, exclude);
        }
    }

    /// Applies a frame relayed from another instance: presence updates the
    /// table with a remote member, then the frame is delivered locally.
    /// Presence that leaves the table unchanged is not delivered again.
    pub fn apply_remote(&self, conversation_id: Uuid, frame: &ServerFrame, exclude: Option<Uuid>) {
        let mut channels = self.channels();
        let changed = match frame {
            ServerFrame::PresenceEnter { member } => {
                let members = channels.entry(conversation_id).or_default();
                let known = members
                    .iter()
                    .any(|m| m.presence.client_id == member.client_id);
                if !known {
                    members.push(Member {
                        presence: member.clone(),
                        outbox: None,
                    });
                }
                !known
            }
            ServerFrame::PresenceLeave { client_id, .. } => {
                let Some(members) = channels.get_mut(&conversation_id) else {
                    return;
                };
                let before = members.len();
                members.retain(|m| m.presence.client_id != *client_id);
                members.len() != before
            }
            ServerFrame::PresenceSnapshot { .. } | ServerFrame::Event { .. } => true,
        };

        if let Some(members) = channels.get(&conversation_id) {
            if changed {
                fan_out(members, frame, exclude);
            }
            if members.is_empty() {
                channels.remove(&conversation_id);
            }
        }
    }

    pub fn members(&self, conversation_id: Uuid) -> Vec<PresenceMember> {
        self.channels()
            .get(&conversation_id)
            .map(|members| members.iter().map(|m| m.presence.clone()).collect())
            .unwrap_or_default()
    }
}

fn fan_out(members: &[Member], frame: &ServerFrame, exclude: Option<Uuid>) {
    for member in members {
        if Some(member.presence.client_id) == exclude {
            continue;
        }
        if let Some(outbox) = &member.outbox {
            // A closed outbox belongs to a session that is shutting down and
            // will leave on its own.
            let _ = outbox.send(frame.clone());
        }
    }
}
