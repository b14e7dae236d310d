//! Error taxonomy for the capture flow.

use thiserror::Error;

use crate::adapters::{RecordStoreError, TranscriptionRequestError, UploadError};
use crate::cache::CacheError;

/// Why a save did not complete
#[derive(Debug, Error)]
pub enum SaveError {
    /// Owner or creator missing; needs user input, never retried automatically
    #[error("Missing owner or creator information")]
    Validation,

    /// No network; nothing remote was touched
    #[error("Offline")]
    Offline,

    /// An asset failed mid-upload; assets uploaded before it are kept
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    /// The record store rejected a create or update
    #[error("Record write failed: {0}")]
    RecordWrite(#[from] RecordStoreError),

    /// The record was saved but the transcription job could not be started
    #[error("Transcription request failed: {0}")]
    TranscriptionRequest(#[from] TranscriptionRequestError),
}

impl SaveError {
    /// The single message shown to the person capturing
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation => "Missing owner or creator information.",
            Self::Offline => "You're offline. We'll try again when you're back online.",
            Self::Upload(_) | Self::RecordWrite(_) => "Saving failed. Please try again.",
            Self::TranscriptionRequest(_) => {
                "Your story was saved, but transcription could not start. Please try again."
            }
        }
    }

    /// Whether retrying the same save can succeed without new input
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::Validation)
    }
}

#[derive(Debug, Error)]
pub enum RetryTranscriptionError {
    #[error("No uploaded audio available to retry transcription")]
    NoUploadedAudio,

    #[error("Transcription request failed: {0}")]
    Request(#[from] TranscriptionRequestError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Select an owner before starting a new capture")]
    NoActiveOwner,

    #[error("Session storage error: {0}")]
    Storage(#[from] CacheError),
}
