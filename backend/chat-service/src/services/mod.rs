pub mod blob_janitor;
pub mod collaborators;
pub mod directory;
pub mod message_service;

pub use blob_janitor::BlobJanitor;
pub use collaborators::{
    BlobStore, HttpBlobStore, HttpProfileDirectory, HttpPropertyDirectory, ProfileDirectory,
    PropertyDirectory, PropertyInfo,
};
pub use directory::ConversationDirectory;
pub use message_service::MessageService;
