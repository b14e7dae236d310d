//! The in-progress capture held by the engine and mirrored to the cache.
//!
//! A draft is plain data. All sequencing rules (when to upload, when to
//! request transcription) live in [`crate::core::DraftEngine`].

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ids::{ItemId, UserId};
use super::item::{Outcome, Visibility};

/// Stable reference to an uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Download URL
    pub url: String,

    /// Object path inside the asset store
    pub path: String,
}

/// Whether the draft already has a durable record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RecordLink {
    /// No record exists yet; the next save creates one
    #[default]
    Unsaved,

    /// A record exists and every later save updates it
    Saved { item_id: ItemId },
}

impl RecordLink {
    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            Self::Unsaved => None,
            Self::Saved { item_id } => Some(item_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPhoto {
    /// Local file the photo was captured to
    pub local_handle: PathBuf,

    /// Upload slot, assigned once when the photo is added
    pub slot: u32,

    /// Set once the photo has been uploaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRef>,
}

impl DraftPhoto {
    pub fn is_uploaded(&self) -> bool {
        self.remote.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftAudio {
    pub local_handle: PathBuf,
    pub duration_seconds: f64,
    pub mime_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRef>,

    /// True until a transcription request has been attempted for this recording
    #[serde(default)]
    pub needs_transcription: bool,
}

impl DraftAudio {
    pub fn new(local_handle: PathBuf, duration_seconds: f64, mime_type: impl Into<String>) -> Self {
        Self {
            local_handle,
            duration_seconds,
            mime_type: mime_type.into(),
            remote: None,
            needs_transcription: true,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.remote.is_some()
    }

    /// File extension used for the uploaded object
    pub fn extension(&self) -> &'static str {
        if self.mime_type.contains("wav") {
            "wav"
        } else {
            "m4a"
        }
    }
}

/// A local, possibly unsaved capture
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Draft {
    #[serde(default)]
    pub record: RecordLink,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<UserId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_key: Option<String>,

    /// Ordered; position 0 is the cover image
    pub photos: Vec<DraftPhoto>,

    /// Next upload slot handed to an added photo
    #[serde(default)]
    pub next_photo_slot: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<DraftAudio>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    /// Set when the user edits the transcript; cleared by a fresh audio upload
    #[serde(default)]
    pub transcript_edited: bool,

    pub visibility: Visibility,

    pub allowed_user_ids: BTreeSet<UserId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl Draft {
    /// An empty draft scoped to an owner and the actor capturing it
    pub fn for_owner(owner_id: UserId, created_by_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            created_by_id: Some(created_by_id),
            ..Self::default()
        }
    }

    pub fn item_id(&self) -> Option<&ItemId> {
        self.record.item_id()
    }

    /// Both identities, or `None` if either is missing
    pub fn identities(&self) -> Option<(&UserId, &UserId)> {
        match (&self.owner_id, &self.created_by_id) {
            (Some(owner), Some(creator)) => Some((owner, creator)),
            _ => None,
        }
    }

    /// True when nothing has been captured yet
    pub fn is_blank(&self) -> bool {
        self.photos.is_empty()
            && self.audio.is_none()
            && self.title.is_none()
            && self.transcript.is_none()
            && self.outcome.is_none()
    }

    pub fn push_photo(&mut self, local_handle: PathBuf) {
        let slot = self.next_photo_slot;
        self.next_photo_slot += 1;
        self.photos.push(DraftPhoto {
            local_handle,
            slot,
            remote: None,
        });
    }

    /// Photos that still need uploading, with their list positions
    pub fn pending_photos(&self) -> impl Iterator<Item = (usize, &DraftPhoto)> {
        self.photos
            .iter()
            .enumerate()
            .filter(|(_, photo)| !photo.is_uploaded())
    }

    /// Uploaded audio path, if any
    pub fn uploaded_audio_path(&self) -> Option<&str> {
        self.audio
            .as_ref()
            .and_then(|audio| audio.remote.as_ref())
            .map(|remote| remote.path.as_str())
    }
}
