use crypto_core::ChannelKeys;
use std::sync::Arc;

use crate::realtime::Realtime;
use crate::services::{
    BlobJanitor, ConversationDirectory, MessageService, ProfileDirectory, PropertyDirectory,
};
use crate::store::MessageStore;

#[derive(Clone)]
pub struct AppState {
    pub directory: ConversationDirectory,
    pub messages: MessageService,
    pub realtime: Realtime,
    /// Signs and validates realtime channel credentials
    pub channel_keys: Arc<ChannelKeys>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MessageStore>,
        profiles: Arc<dyn ProfileDirectory>,
        properties: Arc<dyn PropertyDirectory>,
        janitor: BlobJanitor,
        realtime: Realtime,
        channel_keys: Arc<ChannelKeys>,
    ) -> Self {
        Self {
            directory: ConversationDirectory::new(store.clone(), profiles, properties),
            messages: MessageService::new(store, janitor),
            realtime,
            channel_keys,
        }
    }
}
