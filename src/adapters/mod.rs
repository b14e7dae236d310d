//! Adapter interfaces for external systems.
//!
//! The engine talks to the outside world through these traits:
//! - [`AssetUploader`]: binary object storage for photos and audio
//! - [`RecordStore`]: durable item records, profiles and live subscriptions
//! - [`TranscriptionRequester`]: asynchronous transcription job invocation
//! - [`ConnectivityProbe`]: advisory online check before a save

pub mod assets;
pub mod connectivity;
pub mod records;
pub mod transcription;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::domain::{ItemId, ItemPatch, ItemRecord, RemoteRef, UserId, UserProfile};

pub use assets::{audio_path, photo_path, FileAssetStore};
pub use connectivity::{HttpConnectivity, StaticConnectivity};
pub use records::FileRecordStore;
pub use transcription::HttpTranscriptionRequester;

/// Progress callback, receives a fraction in `[0, 1]`
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Subscription callback, receives `None` when the record is missing or malformed
pub type RecordCallback = Box<dyn Fn(Option<ItemRecord>) + Send + Sync>;

/// Receives an owner's recent items, newest first
pub type FeedCallback = Box<dyn Fn(Vec<ItemRecord>) + Send + Sync>;

/// Receives the owners that list a helper
pub type OwnersCallback = Box<dyn Fn(Vec<UserProfile>) + Send + Sync>;

/// Receives a profile, `None` when missing or malformed
pub type ProfileCallback = Box<dyn Fn(Option<UserProfile>) + Send + Sync>;

/// A document that changed in a record store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Item(ItemId),
    Profile(UserId),
}

/// Transport failure while uploading an asset
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Local asset not readable: {path}: {source}")]
    LocalRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload to {path} was rejected: {reason}")]
    Rejected { path: String, reason: String },

    #[error("Upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure reported by the record store
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Record not found: {0}")]
    NotFound(ItemId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure invoking the transcription job
#[derive(Debug, Error)]
pub enum TranscriptionRequestError {
    #[error("You must be signed in")]
    Unauthenticated,

    #[error("Not allowed to transcribe this item")]
    PermissionDenied,

    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Audio is missing for this item")]
    MissingAudio,

    #[error("Transcription service unavailable: {0}")]
    Transport(String),

    #[error("Transcription service error: {0}")]
    Internal(String),
}

/// Synchronous acknowledgement of a transcription request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionAck {
    /// A job was started for the current audio
    Accepted,
    /// A job already ran (or is running) for the current audio
    Skipped,
}

/// Binary object storage
#[async_trait]
pub trait AssetUploader: Send + Sync {
    /// Upload `local_handle` to `path`, overwriting any existing object
    async fn upload(
        &self,
        path: &str,
        local_handle: &Path,
        content_type: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<RemoteRef, UploadError>;
}

/// Durable item records and the queries built on them
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write an empty skeleton record and return its identifier
    async fn create(&self, owner_id: &UserId, created_by_id: &UserId)
        -> Result<ItemId, RecordStoreError>;

    /// Merge fields into an existing record and stamp `updated_at`
    async fn update(&self, id: &ItemId, patch: ItemPatch) -> Result<(), RecordStoreError>;

    /// Current record; malformed records read as `None`
    async fn get(&self, id: &ItemId) -> Result<Option<ItemRecord>, RecordStoreError>;

    /// Deliver the current record now and again after every change
    fn subscribe(&self, id: &ItemId, callback: RecordCallback) -> Subscription;

    /// Most recent records for an owner, newest first
    async fn recent_by_owner(
        &self,
        owner_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ItemRecord>, RecordStoreError>;

    /// Live variant of [`RecordStore::recent_by_owner`]. Malformed records are skipped.
    fn subscribe_recent_by_owner(
        &self,
        owner_id: &UserId,
        limit: usize,
        callback: FeedCallback,
    ) -> Subscription;

    /// Owners that list `helper_id` among their helpers
    async fn owners_for_helper(&self, helper_id: &UserId)
        -> Result<Vec<UserProfile>, RecordStoreError>;

    /// Live variant of [`RecordStore::owners_for_helper`]
    fn subscribe_owners_for_helper(&self, helper_id: &UserId, callback: OwnersCallback)
        -> Subscription;

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, RecordStoreError>;

    fn subscribe_profile(&self, user_id: &UserId, callback: ProfileCallback) -> Subscription;

    async fn put_profile(&self, profile: &UserProfile) -> Result<(), RecordStoreError>;
}

/// Invokes the external transcription job
#[async_trait]
pub trait TranscriptionRequester: Send + Sync {
    /// Returns once the job is accepted or skipped, not once it finishes
    async fn request(&self, item_id: &ItemId)
        -> Result<TranscriptionAck, TranscriptionRequestError>;
}

/// Advisory network check
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Handle to a live listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Stop delivering updates
    pub fn cancel(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
