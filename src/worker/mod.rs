//! In-process transcription worker.
//!
//! Implements the job contract behind [`TranscriptionRequester`]: it checks
//! the caller, de-duplicates by audio path, marks the record `processing`,
//! acknowledges, and finishes the transcription in the background. The
//! terminal result (text or error) is written to the record, never returned.

pub mod transcriber;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::adapters::{
    FileAssetStore, RecordStore, TranscriptionAck, TranscriptionRequestError,
    TranscriptionRequester,
};
use crate::domain::{ItemId, ItemPatch, TranscriptionPatch, TranscriptionStatus, UserId};

pub use transcriber::{Transcriber, TranscriptResult, WhisperTranscriber};

pub struct LocalTranscriptionService {
    records: Arc<dyn RecordStore>,
    assets: Arc<FileAssetStore>,
    transcriber: Arc<dyn Transcriber>,
    /// Authenticated caller; `None` means unauthenticated
    caller: Option<UserId>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalTranscriptionService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        assets: Arc<FileAssetStore>,
        transcriber: Arc<dyn Transcriber>,
        caller: Option<UserId>,
    ) -> Self {
        Self {
            records,
            assets,
            transcriber,
            caller,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every background job started so far
    pub async fn wait_idle(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for job in jobs {
            if let Err(e) = job.await {
                error!(error = %e, "Transcription job panicked");
            }
        }
    }

    fn spawn_job(&self, item_id: ItemId, audio_path: String) {
        let records = self.records.clone();
        let transcriber = self.transcriber.clone();
        let in_flight = self.in_flight.clone();
        let local_path = self.assets.resolve(&audio_path);

        let handle = tokio::spawn(async move {
            run_job(
                records.as_ref(),
                transcriber.as_ref(),
                &item_id,
                &audio_path,
                local_path,
            )
            .await;
            in_flight.lock().remove(&audio_path);
        });

        let mut jobs = self.jobs.lock();
        jobs.retain(|job| !job.is_finished());
        jobs.push(handle);
    }
}

#[instrument(skip(records, transcriber, item_id, local_path), fields(item_id = %item_id))]
async fn run_job(
    records: &dyn RecordStore,
    transcriber: &dyn Transcriber,
    item_id: &ItemId,
    audio_path: &str,
    local_path: Option<PathBuf>,
) {
    let result = match local_path {
        Some(path) => transcriber.transcribe(&path).await,
        None => Err(anyhow::anyhow!("Audio path is outside the asset store: {}", audio_path)),
    };

    let patch = match result {
        Ok(transcript) => {
            info!(
                chars = transcript.text.len(),
                duration_seconds = transcript.duration_seconds,
                "Transcription completed"
            );
            TranscriptionPatch {
                status: Some(TranscriptionStatus::Complete),
                text: Some(Some(transcript.text)),
                segments: Some(transcript.segments),
                language: Some(Some(transcript.language)),
                provider: Some(transcriber.provider().to_string()),
                completed_at: Some(Utc::now()),
                error_message: Some(None),
                last_transcribed_asset_path: Some(Some(audio_path.to_string())),
            }
        }
        Err(e) => {
            error!(error = %e, "Transcription failed");
            TranscriptionPatch {
                provider: Some(transcriber.provider().to_string()),
                last_transcribed_asset_path: Some(Some(audio_path.to_string())),
                ..TranscriptionPatch::failed(e.to_string())
            }
        }
    };

    if let Err(e) = records.update(item_id, ItemPatch::transcription(patch)).await {
        error!(error = %e, "Failed to write transcription result");
    }
}

#[async_trait]
impl TranscriptionRequester for LocalTranscriptionService {
    async fn request(
        &self,
        item_id: &ItemId,
    ) -> Result<TranscriptionAck, TranscriptionRequestError> {
        let caller = self
            .caller
            .as_ref()
            .ok_or(TranscriptionRequestError::Unauthenticated)?;

        let record = self
            .records
            .get(item_id)
            .await
            .map_err(|e| TranscriptionRequestError::Internal(e.to_string()))?
            .ok_or_else(|| TranscriptionRequestError::NotFound(item_id.clone()))?;

        let audio = record
            .audio
            .as_ref()
            .ok_or(TranscriptionRequestError::MissingAudio)?;

        if caller != &record.owner_id && caller != &record.created_by_id {
            return Err(TranscriptionRequestError::PermissionDenied);
        }

        let already_done = record.transcription.last_transcribed_asset_path.as_deref()
            == Some(audio.path.as_str())
            && record.transcription.status.is_settled_or_running();
        let claimed = !already_done && self.in_flight.lock().insert(audio.path.clone());
        if !claimed {
            info!(%item_id, path = %audio.path, "Transcription skipped, already handled");
            return Ok(TranscriptionAck::Skipped);
        }

        let mark = TranscriptionPatch {
            status: Some(TranscriptionStatus::Processing),
            provider: Some(self.transcriber.provider().to_string()),
            last_transcribed_asset_path: Some(Some(audio.path.clone())),
            ..TranscriptionPatch::default()
        };
        if let Err(e) = self.records.update(item_id, ItemPatch::transcription(mark)).await {
            self.in_flight.lock().remove(&audio.path);
            return Err(TranscriptionRequestError::Internal(e.to_string()));
        }

        info!(%item_id, path = %audio.path, "Transcription accepted");
        self.spawn_job(item_id.clone(), audio.path.clone());
        Ok(TranscriptionAck::Accepted)
    }
}
