//! Per-conversation chat controller.
//!
//! `Closed -> Loading -> Ready`. Every `open` and `close` bumps a generation
//! counter; async work captures it before suspending and only touches state
//! if it is still current, so results landing after `close` are dropped.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

use chat_schema::{
    ChannelEvent, ClientFrame, ConversationSummary, Message, MessageBody, MessageView, ServerFrame,
};

use crate::api::ChatApi;
use crate::error::{ClientError, ClientResult};
use crate::notify::NotificationBridge;
use crate::transport::{RealtimeConnection, RealtimeConnector};
use crate::typing::{TypingDebouncer, TYPING_IDLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeState {
    Idle,
    Composing,
}

/// What we know about the other participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePresence {
    /// No live channel, so presence is unknown.
    Connecting,
    Online,
    Offline { last_seen: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub compose: ComposeState,
    pub draft: String,
    pub conversation: Option<ConversationSummary>,
    pub messages: Vec<MessageView>,
    pub remote_presence: RemotePresence,
    pub remote_typing: bool,
    pub last_error: Option<ClientError>,
}

struct Channel {
    outgoing: UnboundedSender<ClientFrame>,
    typing: TypingDebouncer,
    reader: JoinHandle<()>,
}

impl Channel {
    fn publish(&self, frame: ClientFrame) {
        if self.outgoing.send(frame).is_err() {
            tracing::debug!("realtime channel already closed, frame dropped");
        }
    }

    fn leave(self) {
        self.publish(ClientFrame::Leave);
        self.reader.abort();
    }
}

struct State {
    generation: u64,
    phase: Phase,
    conversation: Option<ConversationSummary>,
    draft: String,
    messages: Vec<MessageView>,
    remote_presence: RemotePresence,
    remote_clients: HashSet<Uuid>,
    remote_typing: bool,
    last_error: Option<ClientError>,
    channel: Option<Channel>,
}

impl State {
    fn new() -> Self {
        Self {
            generation: 0,
            phase: Phase::Closed,
            conversation: None,
            draft: String::new(),
            messages: Vec::new(),
            remote_presence: RemotePresence::Connecting,
            remote_clients: HashSet::new(),
            remote_typing: false,
            last_error: None,
            channel: None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase != Phase::Closed
    }

    fn ready(&self) -> ClientResult<(u64, Uuid)> {
        match (self.phase, &self.conversation) {
            (Phase::Ready, Some(conversation)) => Ok((self.generation, conversation.id)),
            (Phase::Loading, _) => Err(ClientError::Validation(
                "conversation is still loading".to_string(),
            )),
            _ => Err(ClientError::Closed),
        }
    }

    fn detach(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.leave();
        }
        self.remote_presence = RemotePresence::Connecting;
        self.remote_clients.clear();
        self.remote_typing = false;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            compose: if self.draft.is_empty() {
                ComposeState::Idle
            } else {
                ComposeState::Composing
            },
            draft: self.draft.clone(),
            conversation: self.conversation.clone(),
            messages: self.messages.clone(),
            remote_presence: self.remote_presence,
            remote_typing: self.remote_typing,
            last_error: self.last_error.clone(),
        }
    }

    fn other_participant(&self) -> Option<Uuid> {
        self.conversation
            .as_ref()
            .map(|conversation| conversation.other_participant.id)
    }

    /// Appends unless a message with the same id is already shown.
    fn insert_message(&mut self, view: MessageView) -> bool {
        if self.messages.iter().any(|m| m.id() == view.id()) {
            return false;
        }
        self.messages.push(view);
        true
    }

    fn replace_message(&mut self, view: MessageView) {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id() == view.id()) {
            *slot = view;
        }
    }

    fn update_record(&mut self, message: Message) {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id() == message.id) {
            slot.message = message;
        }
    }

    fn remove_message(&mut self, message_id: Uuid) {
        self.messages.retain(|m| m.id() != message_id);
    }

    fn restore_draft(&mut self, text: String) {
        self.draft = if self.draft.is_empty() {
            text
        } else {
            format!("{text} {}", self.draft)
        };
    }

    /// Returns a message that should be handed to the notification bridge.
    fn apply_frame(&mut self, self_id: Uuid, frame: ServerFrame) -> Option<MessageView> {
        let other = self.other_participant();
        match frame {
            ServerFrame::PresenceSnapshot { members } => {
                self.remote_clients = members
                    .iter()
                    .filter(|member| Some(member.user_id) == other)
                    .map(|member| member.client_id)
                    .collect();
                self.remote_presence = if self.remote_clients.is_empty() {
                    RemotePresence::Offline { last_seen: None }
                } else {
                    RemotePresence::Online
                };
            }
            ServerFrame::PresenceEnter { member } if Some(member.user_id) == other => {
                self.remote_clients.insert(member.client_id);
                self.remote_presence = RemotePresence::Online;
            }
            ServerFrame::PresenceLeave {
                client_id,
                user_id,
                left_at,
            } if Some(user_id) == other => {
                self.remote_clients.remove(&client_id);
                if self.remote_clients.is_empty() {
                    self.remote_presence = RemotePresence::Offline {
                        last_seen: Some(left_at),
                    };
                    self.remote_typing = false;
                }
            }
            ServerFrame::PresenceEnter { .. } | ServerFrame::PresenceLeave { .. } => {}
            ServerFrame::Event { event } => return self.apply_event(self_id, event),
        }
        None
    }

    fn apply_event(&mut self, self_id: Uuid, event: ChannelEvent) -> Option<MessageView> {
        match event {
            ChannelEvent::Message(view) => {
                // Our own sends are already in the list from the send path.
                if view.sender_id() == self_id {
                    return None;
                }
                let conversation_id = self.conversation.as_ref().map(|c| c.id);
                if Some(view.message.conversation_id) != conversation_id {
                    return None;
                }
                if self.insert_message(view.clone()) {
                    return Some(view);
                }
            }
            ChannelEvent::Typing { user_id, is_typing } => {
                if user_id != self_id {
                    self.remote_typing = is_typing;
                }
            }
            ChannelEvent::MessageEdited(view) => self.replace_message(view),
            ChannelEvent::MessageDeleted { message_id } => self.remove_message(message_id),
            ChannelEvent::ReactionAdded {
                message_id,
                reaction,
            } => {
                // Own reactions were applied from the REST response.
                if reaction.user_id == self_id {
                    return None;
                }
                if let Some(view) = self.messages.iter_mut().find(|m| m.id() == message_id) {
                    view.message.reactions.push(reaction);
                }
            }
        }
        None
    }
}

/// Chat Session Controller for one open conversation at a time.
///
/// Cheap to clone; clones drive the same session. Methods take `&self` so
/// `close` can run while another call is awaiting.
#[derive(Clone)]
pub struct ChatSession {
    self_id: Uuid,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn RealtimeConnector>,
    notifications: NotificationBridge,
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatSession {
    pub fn new(
        self_id: Uuid,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn RealtimeConnector>,
        notifications: NotificationBridge,
    ) -> Self {
        Self {
            self_id,
            api,
            connector,
            notifications,
            state: Arc::new(Mutex::new(State::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    pub fn self_id(&self) -> Uuid {
        self.self_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state().snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Loads history, marks the conversation read and attaches the realtime
    /// channel. A history failure is recorded and the session stays
    /// `Loading`; a channel failure leaves presence at `Connecting`.
    pub async fn open(&self, conversation: ConversationSummary) -> ClientResult<()> {
        let conversation_id = conversation.id;
        let generation = {
            let mut state = self.state();
            state.detach();
            state.generation += 1;
            state.phase = Phase::Loading;
            state.conversation = Some(conversation);
            state.messages.clear();
            state.draft.clear();
            state.last_error = None;
            state.generation
        };
        tracing::debug!(conversation_id = %conversation_id, "opening conversation");

        let history = self.api.messages(conversation_id).await;
        {
            let mut state = self.state();
            if !state.is_current(generation) {
                return Err(ClientError::Closed);
            }
            match history {
                Ok(messages) => {
                    state.messages = messages;
                    state.phase = Phase::Ready;
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "history load failed"
                    );
                    state.last_error = Some(e.clone());
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.api.mark_read(conversation_id).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "mark read failed");
        }

        self.attach(generation, conversation_id).await;
        Ok(())
    }

    async fn attach(&self, generation: u64, conversation_id: Uuid) {
        let connection = match self.api.channel_token().await {
            Ok(token) => self.connector.connect(conversation_id, &token.token).await,
            Err(e) => Err(e),
        };
        let RealtimeConnection { outgoing, incoming } = match connection {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "realtime channel unavailable"
                );
                return;
            }
        };

        let mut state = self.state();
        if !state.is_current(generation) {
            return;
        }
        let reader = tokio::spawn(read_frames(
            self.state.clone(),
            self.self_id,
            generation,
            incoming,
            self.notifications.clone(),
        ));
        state.channel = Some(Channel {
            typing: TypingDebouncer::spawn(outgoing.clone(), TYPING_IDLE),
            outgoing,
            reader,
        });
    }

    /// Leaves the channel and discards whatever is still in flight.
    pub fn close(&self) {
        let mut state = self.state();
        if state.phase == Phase::Closed {
            return;
        }
        state.generation += 1;
        state.phase = Phase::Closed;
        state.detach();
        if let Some(conversation) = &state.conversation {
            tracing::debug!(conversation_id = %conversation.id, "conversation closed");
        }
    }

    /// Updates the compose box. Non-empty text counts as a keystroke.
    pub fn set_draft(&self, text: impl Into<String>) {
        let mut state = self.state();
        state.draft = text.into();
        if let Some(channel) = &state.channel {
            if state.draft.is_empty() {
                channel.typing.stop();
            } else {
                channel.typing.keystroke();
            }
        }
    }

    /// Sends the compose box as a text message. The box is cleared while the
    /// request is in flight and restored if it fails.
    pub async fn send_draft(&self) -> ClientResult<MessageView> {
        let (generation, conversation_id, text) = {
            let mut state = self.state();
            let (generation, conversation_id) = state.ready()?;
            MessageBody::text(state.draft.as_str())
                .validate()
                .map_err(ClientError::Validation)?;
            (generation, conversation_id, std::mem::take(&mut state.draft))
        };
        let body = MessageBody::text(text.as_str());
        self.submit(generation, conversation_id, body, None, Some(text))
            .await
    }

    pub async fn send(&self, body: MessageBody) -> ClientResult<MessageView> {
        self.reply(body, None).await
    }

    pub async fn reply(
        &self,
        body: MessageBody,
        reply_to: Option<Uuid>,
    ) -> ClientResult<MessageView> {
        let (generation, conversation_id) = self.state().ready()?;
        self.submit(generation, conversation_id, body, reply_to, None)
            .await
    }

    async fn submit(
        &self,
        generation: u64,
        conversation_id: Uuid,
        body: MessageBody,
        reply_to: Option<Uuid>,
        draft: Option<String>,
    ) -> ClientResult<MessageView> {
        let result = self.api.send_message(conversation_id, body, reply_to).await;

        let mut state = self.state();
        let current = state.is_current(generation);
        match result {
            Ok(view) => {
                if current {
                    state.insert_message(view.clone());
                    if let Some(channel) = &state.channel {
                        channel.typing.stop();
                        channel.publish(ClientFrame::Publish {
                            event: ChannelEvent::Message(view.clone()),
                        });
                    }
                }
                Ok(view)
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "send failed");
                if current {
                    if let Some(text) = draft {
                        state.restore_draft(text);
                    }
                    state.last_error = Some(e.clone());
                }
                Err(e)
            }
        }
    }

    pub async fn edit(&self, message_id: Uuid, content: &str) -> ClientResult<MessageView> {
        let (generation, _) = self.state().ready()?;
        let result = self.api.edit_message(message_id, content).await;
        self.settle(generation, result, |state, view| {
            state.replace_message(view.clone())
        })
    }

    pub async fn delete(&self, message_id: Uuid, for_everyone: bool) -> ClientResult<()> {
        let (generation, _) = self.state().ready()?;
        let result = self.api.delete_message(message_id, for_everyone).await;
        self.settle(generation, result, |state, _| state.remove_message(message_id))
    }

    pub async fn react(&self, message_id: Uuid, emoji: &str) -> ClientResult<Message> {
        let (generation, _) = self.state().ready()?;
        let result = self.api.react(message_id, emoji).await;
        self.settle(generation, result, |state, message| {
            state.update_record(message.clone())
        })
    }

    fn settle<T>(
        &self,
        generation: u64,
        result: ClientResult<T>,
        apply: impl FnOnce(&mut State, &T),
    ) -> ClientResult<T> {
        let mut state = self.state();
        if state.is_current(generation) {
            match &result {
                Ok(value) => apply(&mut *state, value),
                Err(e) => state.last_error = Some(e.clone()),
            }
        }
        result
    }
}

async fn read_frames(
    state: Arc<Mutex<State>>,
    self_id: Uuid,
    generation: u64,
    mut incoming: UnboundedReceiver<ServerFrame>,
    notifications: NotificationBridge,
) {
    while let Some(frame) = incoming.recv().await {
        let received = {
            let mut state = lock(&state);
            if !state.is_current(generation) {
                return;
            }
            state.apply_frame(self_id, frame)
        };
        if let Some(view) = received {
            notifications.message_received(&view);
        }
    }

    let mut state = lock(&state);
    if state.is_current(generation) {
        tracing::info!("realtime channel lost");
        state.channel = None;
        state.remote_presence = RemotePresence::Connecting;
        state.remote_clients.clear();
        state.remote_typing = false;
    }
}
