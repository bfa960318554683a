#![allow(dead_code)]

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use chat_service::realtime::Realtime;
use chat_service::services::collaborators::fakes::{
    InMemoryProfiles, InMemoryProperties, RecordingBlobStore,
};
use chat_service::services::BlobJanitor;
use chat_service::state::AppState;
use chat_service::store::MemoryMessageStore;
use crypto_core::testing::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};
use crypto_core::{ChannelKeys, JwtSigner, JwtVerifier, TokenKind};

/// Service state over the in-memory store and recording collaborators.
pub struct Harness {
    pub state: AppState,
    pub verifier: Arc<JwtVerifier>,
    pub store: Arc<MemoryMessageStore>,
    pub profiles: InMemoryProfiles,
    pub properties: InMemoryProperties,
    pub blobs: RecordingBlobStore,
}

impl Harness {
    /// Must be called inside a runtime; the blob janitor is spawned here.
    pub fn new() -> Self {
        let store = Arc::new(MemoryMessageStore::new());
        let profiles = InMemoryProfiles::new();
        let properties = InMemoryProperties::new();
        let blobs = RecordingBlobStore::new();
        let (janitor, _worker) = BlobJanitor::spawn(Arc::new(blobs.clone()));
        let channel_keys = Arc::new(
            ChannelKeys::from_rsa_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY, Duration::minutes(10))
                .unwrap(),
        );

        let state = AppState::new(
            store.clone(),
            Arc::new(profiles.clone()),
            Arc::new(properties.clone()),
            janitor,
            Realtime::local(),
            channel_keys,
        );

        Self {
            state,
            verifier: Arc::new(JwtVerifier::from_rsa_pem(TEST_PUBLIC_KEY).unwrap()),
            store,
            profiles,
            properties,
            blobs,
        }
    }

    pub fn user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.profiles.insert(id, name);
        id
    }

    pub fn property(&self, owner_id: Uuid, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.properties.insert(id, title, owner_id);
        id
    }

    /// Waits for the janitor to have processed `count` deletions.
    pub async fn deleted_blobs(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            let deleted = self.blobs.deleted();
            if deleted.len() >= count {
                return deleted;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.blobs.deleted()
    }
}

pub fn access_token(user_id: Uuid, role: &str) -> String {
    JwtSigner::from_rsa_pem(TEST_PRIVATE_KEY)
        .unwrap()
        .issue(user_id, Some(role), TokenKind::Access, Duration::minutes(10))
        .unwrap()
        .token
}

pub fn bearer(user_id: Uuid, role: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", access_token(user_id, role)))
}

/// Builds the full route tree over a harness' state.
macro_rules! init_app {
    ($harness:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($harness.state.clone()))
                .configure(chat_service::routes::configure($harness.verifier.clone())),
        )
        .await
    };
}
