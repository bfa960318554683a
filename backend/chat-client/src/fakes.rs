//! Scriptable stand-ins for the chat service, the realtime endpoint and the
//! platform notifier.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use uuid::Uuid;

use chat_schema::api::ChannelToken;
use chat_schema::{
    ClientFrame, Conversation, ConversationSummary, Message, MessageBody, MessageView,
    ParticipantProfile, Reaction, ServerFrame, UnreadCounts,
};

use crate::api::ChatApi;
use crate::error::{ClientError, ClientResult};
use crate::notify::{Notification, Notifier, NotifyError};
use crate::transport::{RealtimeConnection, RealtimeConnector};

#[derive(Default)]
struct ApiState {
    history: HashMap<Uuid, Vec<MessageView>>,
    unread_total: u64,
    calls: Vec<&'static str>,
    fail_history: Option<ClientError>,
    fail_next_send: Option<ClientError>,
    fail_unread: bool,
    fail_channel_token: Option<ClientError>,
    hold_history: Option<oneshot::Receiver<()>>,
    hold_send: Option<oneshot::Receiver<()>>,
}

/// In-memory [`ChatApi`] acting as one signed-in user.
#[derive(Clone)]
pub struct FakeChatApi {
    me: ParticipantProfile,
    state: Arc<Mutex<ApiState>>,
}

impl FakeChatApi {
    pub fn new(me: ParticipantProfile) -> Self {
        Self {
            me,
            state: Arc::new(Mutex::new(ApiState::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ApiState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: &'static str) {
        self.state().calls.push(call);
    }

    pub fn set_history(&self, conversation_id: Uuid, messages: Vec<MessageView>) {
        self.state().history.insert(conversation_id, messages);
    }

    pub fn history(&self, conversation_id: Uuid) -> Vec<MessageView> {
        self.state()
            .history
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_unread_total(&self, total: u64) {
        self.state().unread_total = total;
    }

    pub fn fail_history(&self, error: Option<ClientError>) {
        self.state().fail_history = error;
    }

    pub fn fail_next_send(&self, error: ClientError) {
        self.state().fail_next_send = Some(error);
    }

    pub fn fail_unread(&self, failing: bool) {
        self.state().fail_unread = failing;
    }

    pub fn fail_channel_token(&self, error: Option<ClientError>) {
        self.state().fail_channel_token = error;
    }

    /// The next history fetch waits until the returned sender fires or drops.
    pub fn hold_history(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().hold_history = Some(rx);
        tx
    }

    /// The next send waits until the returned sender fires or drops.
    pub fn hold_send(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state().hold_send = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    fn find_mut<R>(
        &self,
        message_id: Uuid,
        f: impl FnOnce(&mut Vec<MessageView>, usize) -> R,
    ) -> ClientResult<R> {
        let mut state = self.state();
        for messages in state.history.values_mut() {
            if let Some(index) = messages.iter().position(|m| m.id() == message_id) {
                return Ok(f(messages, index));
            }
        }
        Err(ClientError::NotFound("message".into()))
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_conversations(&self) -> ClientResult<Vec<ConversationSummary>> {
        self.record("list_conversations");
        Ok(Vec::new())
    }

    async fn start_conversation(
        &self,
        property_id: Uuid,
        landlord_id: Uuid,
    ) -> ClientResult<Conversation> {
        self.record("start_conversation");
        let now = Utc::now();
        let participants = Conversation::sorted_pair(self.me.id, landlord_id);
        Ok(Conversation {
            id: Uuid::new_v4(),
            participants,
            property_id,
            last_message: None,
            last_message_at: None,
            unread_count: UnreadCounts::zeroed(&participants),
            created_at: now,
            updated_at: now,
        })
    }

    async fn unread_total(&self) -> ClientResult<u64> {
        let mut state = self.state();
        state.calls.push("unread_total");
        if state.fail_unread {
            return Err(ClientError::Transient("unread unavailable".into()));
        }
        Ok(state.unread_total)
    }

    async fn messages(&self, conversation_id: Uuid) -> ClientResult<Vec<MessageView>> {
        let hold = {
            let mut state = self.state();
            state.calls.push("messages");
            state.hold_history.take()
        };
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        let state = self.state();
        if let Some(error) = state.fail_history.clone() {
            return Err(error);
        }
        Ok(state
            .history
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        body: MessageBody,
        reply_to: Option<Uuid>,
    ) -> ClientResult<MessageView> {
        let hold = {
            let mut state = self.state();
            state.calls.push("send_message");
            state.hold_send.take()
        };
        if let Some(hold) = hold {
            let _ = hold.await;
        }

        let mut state = self.state();
        if let Some(error) = state.fail_next_send.take() {
            return Err(error);
        }
        body.validate().map_err(ClientError::Validation)?;
        let now = Utc::now();
        let view = MessageView {
            message: Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id: self.me.id,
                body,
                is_edited: false,
                reactions: Vec::new(),
                reply_to,
                created_at: now,
                updated_at: now,
            },
            sender: self.me.clone(),
            reply_preview: None,
        };
        state
            .history
            .entry(conversation_id)
            .or_default()
            .push(view.clone());
        Ok(view)
    }

    async fn mark_read(&self, _conversation_id: Uuid) -> ClientResult<()> {
        self.record("mark_read");
        Ok(())
    }

    async fn edit_message(&self, message_id: Uuid, content: &str) -> ClientResult<MessageView> {
        self.record("edit_message");
        let me = self.me.id;
        self.find_mut(message_id, |messages, index| {
            let view = &mut messages[index];
            if view.sender_id() != me {
                return Err(ClientError::Forbidden("not the author".into()));
            }
            if !matches!(view.message.body, MessageBody::Text { .. }) {
                return Err(ClientError::Validation("only text can be edited".into()));
            }
            view.message.body = MessageBody::text(content);
            view.message.is_edited = true;
            view.message.updated_at = Utc::now();
            Ok(view.clone())
        })?
    }

    async fn delete_message(&self, message_id: Uuid, _for_everyone: bool) -> ClientResult<()> {
        self.record("delete_message");
        self.find_mut(message_id, |messages, index| {
            messages.remove(index);
        })
    }

    async fn react(&self, message_id: Uuid, emoji: &str) -> ClientResult<Message> {
        self.record("react");
        let me = self.me.id;
        self.find_mut(message_id, |messages, index| {
            let message = &mut messages[index].message;
            message.reactions.push(Reaction {
                user_id: me,
                emoji: emoji.to_string(),
            });
            message.clone()
        })
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> ClientResult<()> {
        self.record("delete_conversation");
        self.state().history.remove(&conversation_id);
        Ok(())
    }

    async fn channel_token(&self) -> ClientResult<ChannelToken> {
        let mut state = self.state();
        state.calls.push("channel_token");
        if let Some(error) = state.fail_channel_token.clone() {
            return Err(error);
        }
        Ok(ChannelToken {
            token: format!("channel-{}", self.me.id),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

/// Server half of a fake realtime connection.
pub struct ServerEnd {
    pub conversation_id: Uuid,
    pub token: String,
    pub from_client: UnboundedReceiver<ClientFrame>,
    pub to_client: UnboundedSender<ServerFrame>,
}

#[derive(Default)]
struct ConnectorState {
    fail: Option<ClientError>,
    connects: usize,
    pending: Vec<ServerEnd>,
}

/// [`RealtimeConnector`] that hands the server half of each connection to
/// the test.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, error: Option<ClientError>) {
        self.state.lock().unwrap().fail = error;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Most recent connection not yet taken.
    pub fn take(&self) -> Option<ServerEnd> {
        self.state.lock().unwrap().pending.pop()
    }
}

#[async_trait]
impl RealtimeConnector for FakeConnector {
    async fn connect(
        &self,
        conversation_id: Uuid,
        token: &str,
    ) -> ClientResult<RealtimeConnection> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if let Some(error) = state.fail.clone() {
            return Err(error);
        }
        let (outgoing, from_client) = unbounded_channel();
        let (to_client, incoming) = unbounded_channel();
        state.pending.push(ServerEnd {
            conversation_id,
            token: token.to_string(),
            from_client,
            to_client,
        });
        Ok(RealtimeConnection { outgoing, incoming })
    }
}

#[derive(Default)]
struct NotifierState {
    shown: Vec<Notification>,
    sounds: usize,
    failing: bool,
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.state.lock().unwrap().shown.clone()
    }

    pub fn sounds(&self) -> usize {
        self.state.lock().unwrap().sounds
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(NotifyError("notifications disabled".into()));
        }
        state.shown.push(notification.clone());
        Ok(())
    }

    fn play_sound(&self) -> Result<(), NotifyError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(NotifyError("audio unavailable".into()));
        }
        state.sounds += 1;
        Ok(())
    }
}
