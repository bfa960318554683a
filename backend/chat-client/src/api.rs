//! REST client for the chat service.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

use chat_schema::api::{
    ChannelToken, DeleteMessageRequest, EditMessageRequest, ReactRequest, SendMessageRequest,
    StartConversationRequest, UnreadTotal,
};
use chat_schema::{Conversation, ConversationSummary, Message, MessageBody, MessageView};
use error_types::ErrorResponse;

use crate::error::{ClientError, ClientResult};

/// The chat service as the client sees it. Every call is one round-trip.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> ClientResult<Vec<ConversationSummary>>;

    async fn start_conversation(
        &self,
        property_id: Uuid,
        landlord_id: Uuid,
    ) -> ClientResult<Conversation>;

    async fn unread_total(&self) -> ClientResult<u64>;

    async fn messages(&self, conversation_id: Uuid) -> ClientResult<Vec<MessageView>>;

    async fn send_message(
        &self,
        conversation_id: Uuid,
        body: MessageBody,
        reply_to: Option<Uuid>,
    ) -> ClientResult<MessageView>;

    async fn mark_read(&self, conversation_id: Uuid) -> ClientResult<()>;

    async fn edit_message(&self, message_id: Uuid, content: &str) -> ClientResult<MessageView>;

    async fn delete_message(&self, message_id: Uuid, for_everyone: bool) -> ClientResult<()>;

    async fn react(&self, message_id: Uuid, emoji: &str) -> ClientResult<Message>;

    async fn delete_conversation(&self, conversation_id: Uuid) -> ClientResult<()>;

    /// Channel credential for the realtime endpoint.
    async fn channel_token(&self) -> ClientResult<ChannelToken>;
}

/// [`ChatApi`] over `{base}/api/v1`, authenticated with an identity token.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
    access_token: String,
}

impl HttpChatApi {
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> ClientResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Validation(format!("invalid base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Validation(format!(
                "base url cannot have a path: {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transient(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }
        url
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    async fn execute(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.json::<ErrorResponse>().await.ok();
        let error = ClientError::from_status(status.as_u16(), body);
        tracing::debug!(status = status.as_u16(), error = %error, "chat request failed");
        Err(error)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        Ok(self.execute(request).await?.json::<T>().await?)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> ClientResult<Vec<ConversationSummary>> {
        self.json(self.client.get(self.url(&["conversations"])))
            .await
    }

    async fn start_conversation(
        &self,
        property_id: Uuid,
        landlord_id: Uuid,
    ) -> ClientResult<Conversation> {
        let body = StartConversationRequest {
            property_id,
            landlord_id,
        };
        self.json(self.client.post(self.url(&["conversations"])).json(&body))
            .await
    }

    async fn unread_total(&self) -> ClientResult<u64> {
        let total: UnreadTotal = self
            .json(self.client.get(self.url(&["conversations", "unread-total"])))
            .await?;
        Ok(total.total)
    }

    async fn messages(&self, conversation_id: Uuid) -> ClientResult<Vec<MessageView>> {
        let id = conversation_id.to_string();
        self.json(self.client.get(self.url(&["conversations", &id, "messages"])))
            .await
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        body: MessageBody,
        reply_to: Option<Uuid>,
    ) -> ClientResult<MessageView> {
        let id = conversation_id.to_string();
        let request = SendMessageRequest { body, reply_to };
        self.json(
            self.client
                .post(self.url(&["conversations", &id, "messages"]))
                .json(&request),
        )
        .await
    }

    async fn mark_read(&self, conversation_id: Uuid) -> ClientResult<()> {
        let id = conversation_id.to_string();
        self.execute(self.client.post(self.url(&["conversations", &id, "read"])))
            .await?;
        Ok(())
    }

    async fn edit_message(&self, message_id: Uuid, content: &str) -> ClientResult<MessageView> {
        let id = message_id.to_string();
        let body = EditMessageRequest {
            content: content.to_string(),
        };
        self.json(self.client.patch(self.url(&["messages", &id])).json(&body))
            .await
    }

    async fn delete_message(&self, message_id: Uuid, for_everyone: bool) -> ClientResult<()> {
        let id = message_id.to_string();
        let body = DeleteMessageRequest {
            delete_for_everyone: for_everyone,
        };
        self.execute(self.client.delete(self.url(&["messages", &id])).json(&body))
            .await?;
        Ok(())
    }

    async fn react(&self, message_id: Uuid, emoji: &str) -> ClientResult<Message> {
        let id = message_id.to_string();
        let body = ReactRequest {
            emoji: emoji.to_string(),
        };
        self.json(
            self.client
                .post(self.url(&["messages", &id, "react"]))
                .json(&body),
        )
        .await
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> ClientResult<()> {
        let id = conversation_id.to_string();
        self.execute(self.client.delete(self.url(&["conversations", &id])))
            .await?;
        Ok(())
    }

    async fn channel_token(&self) -> ClientResult<ChannelToken> {
        self.json(self.client.post(self.url(&["realtime", "token"])))
            .await
    }
}
