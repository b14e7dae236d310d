//! Durable item records and the partial updates applied to them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::draft::RemoteRef;
use super::ids::{ItemId, UserId};

/// Who may see a story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Family,
    /// Only the users listed in `allowed_user_ids`
    Specific,
}

/// What happens to the physical item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Keep,
    Gift,
    Donate,
    Sell,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    #[default]
    Idle,
    Processing,
    Complete,
    Error,
}

impl TranscriptionStatus {
    /// A job is running or has finished for the stamped asset
    pub fn is_settled_or_running(self) -> bool {
        matches!(self, Self::Processing | Self::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Transcription sub-record of an item
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcription {
    pub status: TranscriptionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<TranscriptSegment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Asset path the last job ran against (de-duplication key)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transcribed_asset_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAudio {
    pub url: String,
    pub path: String,
    pub duration_seconds: f64,
    pub mime_type: String,
}

/// Durable, store-held counterpart of a saved draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub owner_id: UserId,
    pub created_by_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub prompt_key: Option<String>,

    #[serde(default)]
    pub photos: Vec<RemoteRef>,

    #[serde(default)]
    pub audio: Option<RemoteAudio>,

    #[serde(default)]
    pub transcription: Transcription,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub collection_ids: Vec<String>,

    #[serde(default)]
    pub visibility: Visibility,

    #[serde(default)]
    pub allowed_user_ids: BTreeSet<UserId>,

    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl ItemRecord {
    /// Empty record written on first save
    pub fn skeleton(
        id: ItemId,
        owner_id: UserId,
        created_by_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            created_by_id,
            created_at: now,
            updated_at: now,
            title: None,
            prompt_key: None,
            photos: Vec::new(),
            audio: None,
            transcription: Transcription::default(),
            tags: Vec::new(),
            collection_ids: Vec::new(),
            visibility: Visibility::Private,
            allowed_user_ids: BTreeSet::new(),
            outcome: None,
        }
    }

    /// Merge a patch and stamp `updated_at`
    pub fn apply(&mut self, patch: ItemPatch, now: DateTime<Utc>) {
        if let Some(owner_id) = patch.owner_id {
            self.owner_id = owner_id;
        }
        if let Some(created_by_id) = patch.created_by_id {
            self.created_by_id = created_by_id;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(prompt_key) = patch.prompt_key {
            self.prompt_key = prompt_key;
        }
        if let Some(photos) = patch.photos {
            self.photos = photos;
        }
        if let Some(audio) = patch.audio {
            self.audio = audio;
        }
        if let Some(visibility) = patch.visibility {
            self.visibility = visibility;
        }
        if let Some(allowed) = patch.allowed_user_ids {
            self.allowed_user_ids = allowed;
        }
        if let Some(outcome) = patch.outcome {
            self.outcome = outcome;
        }
        if let Some(transcription) = patch.transcription {
            transcription.apply_to(&mut self.transcription);
        }
        self.updated_at = now;
    }
}

/// Field-level merge for an item. `None` leaves a field untouched;
/// `Some(None)` on an optional field clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub owner_id: Option<UserId>,
    pub created_by_id: Option<UserId>,
    pub title: Option<Option<String>>,
    pub prompt_key: Option<Option<String>>,
    pub photos: Option<Vec<RemoteRef>>,
    pub audio: Option<Option<RemoteAudio>>,
    pub visibility: Option<Visibility>,
    pub allowed_user_ids: Option<BTreeSet<UserId>>,
    pub outcome: Option<Option<Outcome>>,
    pub transcription: Option<TranscriptionPatch>,
}

impl ItemPatch {
    pub fn transcription(patch: TranscriptionPatch) -> Self {
        Self {
            transcription: Some(patch),
            ..Self::default()
        }
    }
}

/// Per-field merge into [`Transcription`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptionPatch {
    pub status: Option<TranscriptionStatus>,
    pub text: Option<Option<String>>,
    pub segments: Option<Vec<TranscriptSegment>>,
    pub language: Option<Option<String>>,
    pub provider: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<Option<String>>,
    pub last_transcribed_asset_path: Option<Option<String>>,
}

impl TranscriptionPatch {
    pub fn status(status: TranscriptionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Failure written back when a job could not be requested or run
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TranscriptionStatus::Error),
            error_message: Some(Some(message.into())),
            ..Self::default()
        }
    }

    fn apply_to(self, target: &mut Transcription) {
        if let Some(status) = self.status {
            target.status = status;
        }
        if let Some(text) = self.text {
            target.text = text;
        }
        if let Some(segments) = self.segments {
            target.segments = segments;
        }
        if let Some(language) = self.language {
            target.language = language;
        }
        if let Some(provider) = self.provider {
            target.provider = Some(provider);
        }
        if let Some(completed_at) = self.completed_at {
            target.completed_at = Some(completed_at);
        }
        if let Some(error_message) = self.error_message {
            target.error_message = error_message;
        }
        if let Some(path) = self.last_transcribed_asset_path {
            target.last_transcribed_asset_path = path;
        }
    }
}
