//! Contracts for the collaborators the chat core consumes, and their HTTP clients.

use async_trait::async_trait;
use chat_schema::ParticipantProfile;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// What the chat core needs to know about a listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertyInfo {
    pub title: String,
    pub owner_id: Uuid,
}

#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    /// `Ok(None)` when the property does not exist.
    async fn property(&self, property_id: Uuid) -> AppResult<Option<PropertyInfo>>;
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Batch lookup. Unknown ids are simply absent from the result.
    async fn profiles(&self, user_ids: &[Uuid]) -> AppResult<Vec<ParticipantProfile>>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn delete(&self, public_id: &str) -> AppResult<()>;
}

fn http_client(timeout: Duration) -> AppResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::StartServer(format!("http client: {e}")))
}

fn endpoint(base: &str, segments: &[&str]) -> AppResult<Url> {
    let mut url =
        Url::parse(base).map_err(|e| AppError::Config(format!("invalid base url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Config(format!("base url cannot have a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `GET {base}/properties/{id}`
#[derive(Clone)]
pub struct HttpPropertyDirectory {
    client: Client,
    base_url: String,
}

impl HttpPropertyDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PropertyDirectory for HttpPropertyDirectory {
    async fn property(&self, property_id: Uuid) -> AppResult<Option<PropertyInfo>> {
        let url = endpoint(&self.base_url, &["properties", &property_id.to_string()])?;
        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::error!(property_id = %property_id, error = %e, "property lookup failed");
            AppError::ServiceUnavailable(format!("property service: {e}"))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<PropertyInfo>().await?)),
            status => Err(AppError::ServiceUnavailable(format!(
                "property service returned {status}"
            ))),
        }
    }
}

#[derive(Serialize)]
struct BatchProfilesRequest<'a> {
    ids: &'a [Uuid],
}

/// `POST {base}/users/batch`
#[derive(Clone)]
pub struct HttpProfileDirectory {
    client: Client,
    base_url: String,
}

impl HttpProfileDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProfileDirectory for HttpProfileDirectory {
    async fn profiles(&self, user_ids: &[Uuid]) -> AppResult<Vec<ParticipantProfile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = endpoint(&self.base_url, &["users", "batch"])?;
        let response = self
            .client
            .post(url)
            .json(&BatchProfilesRequest { ids: user_ids })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(count = user_ids.len(), error = %e, "profile lookup failed");
                AppError::ServiceUnavailable(format!("profile service: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ServiceUnavailable(format!(
                "profile service returned {status}"
            )));
        }
        Ok(response.json::<Vec<ParticipantProfile>>().await?)
    }
}

/// `DELETE {base}/blobs/{public_id}`
#[derive(Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn delete(&self, public_id: &str) -> AppResult<()> {
        let url = endpoint(&self.base_url, &["blobs", public_id])?;
        let response = self.client.delete(url).send().await?;
        let status = response.status();
        // Already gone counts as deleted.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(AppError::ServiceUnavailable(format!(
                "blob service returned {status}"
            )))
        }
    }
}

/// In-process collaborators for tests and local development.
#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct InMemoryProfiles {
        profiles: Arc<Mutex<HashMap<Uuid, ParticipantProfile>>>,
        batch_calls: Arc<Mutex<usize>>,
        fail: Arc<Mutex<bool>>,
    }

    impl InMemoryProfiles {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, id: Uuid, name: &str) {
            self.profiles.lock().unwrap().insert(
                id,
                ParticipantProfile {
                    id,
                    name: name.to_string(),
                    avatar_url: Some(format!("https://cdn.example/avatars/{id}.png")),
                },
            );
        }

        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        pub fn batch_calls(&self) -> usize {
            *self.batch_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ProfileDirectory for InMemoryProfiles {
        async fn profiles(&self, user_ids: &[Uuid]) -> AppResult<Vec<ParticipantProfile>> {
            *self.batch_calls.lock().unwrap() += 1;
            if *self.fail.lock().unwrap() {
                return Err(AppError::ServiceUnavailable("profiles offline".into()));
            }
            let profiles = self.profiles.lock().unwrap();
            Ok(user_ids
                .iter()
                .filter_map(|id| profiles.get(id).cloned())
                .collect())
        }
    }

    #[derive(Clone, Default)]
    pub struct InMemoryProperties {
        properties: Arc<Mutex<HashMap<Uuid, PropertyInfo>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl InMemoryProperties {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, id: Uuid, title: &str, owner_id: Uuid) {
            self.properties.lock().unwrap().insert(
                id,
                PropertyInfo {
                    title: title.to_string(),
                    owner_id,
                },
            );
        }

        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl PropertyDirectory for InMemoryProperties {
        async fn property(&self, property_id: Uuid) -> AppResult<Option<PropertyInfo>> {
            if *self.fail.lock().unwrap() {
                return Err(AppError::ServiceUnavailable("properties offline".into()));
            }
            Ok(self.properties.lock().unwrap().get(&property_id).cloned())
        }
    }

    /// Records every deletion request.
    #[derive(Clone, Default)]
    pub struct RecordingBlobStore {
        deleted: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BlobStore for RecordingBlobStore {
        async fn delete(&self, public_id: &str) -> AppResult<()> {
            self.deleted.lock().unwrap().push(public_id.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_and_escapes_segments() {
        let url = endpoint("http://blobs:8080/api", &["blobs", "chat/voice 1"]).unwrap();
        assert_eq!(url.as_str(), "http://blobs:8080/api/blobs/chat%2Fvoice%201");

        let url = endpoint("http://property:8080", &["properties", "p1"]).unwrap();
        assert_eq!(url.as_str(), "http://property:8080/properties/p1");
    }

    #[test]
    fn endpoint_rejects_garbage_base() {
        assert!(matches!(
            endpoint("not a url", &["x"]),
            Err(AppError::Config(_))
        ));
    }
}
