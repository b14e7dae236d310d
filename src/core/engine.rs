//! Draft synchronization engine.
//!
//! Owns the single in-progress draft, mirrors every edit to the draft cache
//! and turns a save into the ordered sequence: validate, check connectivity,
//! create the record once, upload missing assets, write the record, request
//! transcription when a new recording went up.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::error::{RetryTranscriptionError, SaveError, SessionError};
use super::session::SessionContext;
use crate::adapters::{
    audio_path, photo_path, AssetUploader, ConnectivityProbe, ProgressFn, RecordStore,
    RecordStoreError, Subscription, TranscriptionAck, TranscriptionRequester, UploadError,
};
use crate::cache::DraftCache;
use crate::domain::{
    Draft, DraftAudio, ItemId, ItemPatch, ItemRecord, Outcome, RecordLink, RemoteAudio,
    RemoteRef, TranscriptionPatch, TranscriptionStatus, UserId, Visibility,
};

const NO_OWNER_MESSAGE: &str = "Select an owner before starting a new capture.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePhase {
    /// No draft content
    Empty,
    Editing,
    Saving,
    Saved,
    /// Last save failed; see [`DraftEngine::error_message`]
    Error,
}

/// Which asset a progress report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Photo { slot: u32 },
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SaveProgress {
    pub asset: Option<AssetKind>,
    pub fraction: f64,
}

/// What the last failed save tripped on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Validation,
    Offline,
    Upload,
    RecordWrite,
    TranscriptionRequest,
}

impl FailureKind {
    fn of(error: &SaveError) -> Self {
        match error {
            SaveError::Validation => Self::Validation,
            SaveError::Offline => Self::Offline,
            SaveError::Upload(_) => Self::Upload,
            SaveError::RecordWrite(_) => Self::RecordWrite,
            SaveError::TranscriptionRequest(_) => Self::TranscriptionRequest,
        }
    }
}

struct EngineState {
    draft: Draft,
    phase: EnginePhase,
    error_message: Option<String>,
    failure: Option<FailureKind>,
    has_hydrated: bool,
}

struct UploadJob {
    kind: AssetKind,
    local_handle: PathBuf,
    path: String,
    content_type: String,
}

pub struct DraftEngine {
    state: Arc<Mutex<EngineState>>,
    cache: Arc<DraftCache>,
    uploader: Arc<dyn AssetUploader>,
    records: Arc<dyn RecordStore>,
    transcription: Arc<dyn TranscriptionRequester>,
    connectivity: Arc<dyn ConnectivityProbe>,
    progress: Arc<watch::Sender<SaveProgress>>,
}

impl DraftEngine {
    pub fn new(
        cache: DraftCache,
        uploader: Arc<dyn AssetUploader>,
        records: Arc<dyn RecordStore>,
        transcription: Arc<dyn TranscriptionRequester>,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let (progress, _) = watch::channel(SaveProgress::default());
        Self {
            state: Arc::new(Mutex::new(EngineState {
                draft: Draft::default(),
                phase: EnginePhase::Empty,
                error_message: None,
                failure: None,
                has_hydrated: false,
            })),
            cache: Arc::new(cache),
            uploader,
            records,
            transcription,
            connectivity,
            progress: Arc::new(progress),
        }
    }

    // Observers

    pub fn draft(&self) -> Draft {
        self.state.lock().draft.clone()
    }

    pub fn phase(&self) -> EnginePhase {
        self.state.lock().phase.clone()
    }

    pub fn is_saving(&self) -> bool {
        self.state.lock().phase == EnginePhase::Saving
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.lock().error_message.clone()
    }

    pub fn has_hydrated(&self) -> bool {
        self.state.lock().has_hydrated
    }

    /// Per-asset upload progress of the current save
    pub fn progress(&self) -> watch::Receiver<SaveProgress> {
        self.progress.subscribe()
    }

    /// Wait for queued cache writes
    pub async fn flush(&self) {
        self.cache.flush().await;
    }

    // Lifecycle

    /// Load the cached draft once; later calls are no-ops
    pub async fn hydrate_draft(&self) {
        if self.has_hydrated() {
            return;
        }

        let cached = self.cache.load().await;
        let mut state = self.state.lock();
        if state.has_hydrated {
            return;
        }
        let draft = cached.unwrap_or_default();
        state.phase = idle_phase(&draft);
        state.draft = draft;
        state.has_hydrated = true;
    }

    /// Replace the draft with an empty one for the resolved owner
    pub fn start_new_draft(
        &self,
        session: &SessionContext,
        owner_id: &UserId,
        created_by_id: &UserId,
    ) -> Result<(), SessionError> {
        let owner = match session.resolve_owner(owner_id) {
            Ok(owner) => owner,
            Err(e) => {
                warn!(created_by = %created_by_id, "New draft rejected, no active owner");
                self.state.lock().error_message = Some(NO_OWNER_MESSAGE.to_string());
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        state.draft = Draft::for_owner(owner.clone(), created_by_id.clone());
        state.phase = EnginePhase::Editing;
        state.error_message = None;
        state.failure = None;
        self.cache.save(&state.draft);
        info!(owner = %owner, created_by = %created_by_id, "New draft started");
        Ok(())
    }

    /// Clear both the cached and the in-memory draft
    pub fn reset_draft(&self) {
        self.cache.clear();
        let mut state = self.state.lock();
        state.draft = Draft::default();
        state.phase = EnginePhase::Empty;
        state.error_message = None;
        state.failure = None;
    }

    /// Remove the cached draft, leaving memory untouched
    pub async fn clear_draft_local(&self) {
        self.cache.clear();
        self.cache.flush().await;
    }

    // Field setters

    pub fn add_photo(&self, local_handle: impl Into<PathBuf>) {
        let local_handle = local_handle.into();
        self.edit(|draft| draft.push_photo(local_handle));
    }

    /// Returns false when `index` is out of range
    pub fn remove_photo(&self, index: usize) -> bool {
        let mut removed = false;
        self.edit(|draft| {
            if index < draft.photos.len() {
                draft.photos.remove(index);
                removed = true;
            }
        });
        removed
    }

    /// Replace the recording; the new one is uploaded and transcribed on the next save
    pub fn set_audio(
        &self,
        local_handle: impl Into<PathBuf>,
        duration_seconds: f64,
        mime_type: impl Into<String>,
    ) {
        let audio = DraftAudio::new(local_handle.into(), duration_seconds, mime_type);
        self.edit(|draft| draft.audio = Some(audio));
    }

    pub fn set_prompt_key(&self, prompt_key: Option<String>) {
        self.edit(|draft| draft.prompt_key = prompt_key);
    }

    pub fn set_title(&self, title: Option<String>) {
        self.edit(|draft| draft.title = title);
    }

    pub fn set_transcript(&self, transcript: Option<String>) {
        self.edit(|draft| {
            draft.transcript = transcript;
            draft.transcript_edited = true;
        });
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.edit(|draft| draft.visibility = visibility);
    }

    pub fn set_allowed_user_ids(&self, ids: impl IntoIterator<Item = UserId>) {
        let ids = ids.into_iter().collect();
        self.edit(|draft| draft.allowed_user_ids = ids);
    }

    pub fn set_outcome(&self, outcome: Option<Outcome>) {
        self.edit(|draft| draft.outcome = outcome);
    }

    fn edit(&self, f: impl FnOnce(&mut Draft)) {
        let mut state = self.state.lock();
        f(&mut state.draft);
        if state.phase != EnginePhase::Saving {
            state.phase = EnginePhase::Editing;
        }
        self.cache.save(&state.draft);
    }

    /// Mutate the draft without touching the phase
    fn update_draft(&self, f: impl FnOnce(&mut Draft)) {
        let mut state = self.state.lock();
        f(&mut state.draft);
        self.cache.save(&state.draft);
    }

    // Save

    /// Push the draft to the record store and asset storage.
    ///
    /// Safe to call repeatedly: the record is created once and assets that
    /// already have a remote reference are not uploaded again.
    #[instrument(skip(self))]
    pub async fn persist_draft(&self) -> Result<ItemId, SaveError> {
        let snapshot = self.draft();
        let Some((owner_id, created_by_id)) = snapshot
            .identities()
            .map(|(owner, creator)| (owner.clone(), creator.clone()))
        else {
            warn!("Save rejected, draft has no owner or creator");
            return Err(self.fail(SaveError::Validation));
        };

        self.begin_save();
        let start = Instant::now();

        match self.run_save(snapshot, &owner_id, &created_by_id).await {
            Ok(item_id) => {
                info!(
                    %item_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Draft saved"
                );
                Ok(item_id)
            }
            Err(e) => {
                error!(
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Draft save failed"
                );
                Err(self.fail(e))
            }
        }
    }

    async fn run_save(
        &self,
        snapshot: Draft,
        owner_id: &UserId,
        created_by_id: &UserId,
    ) -> Result<ItemId, SaveError> {
        if !self.connectivity.is_online().await {
            return Err(SaveError::Offline);
        }

        let item_id = match snapshot.item_id() {
            Some(item_id) => item_id.clone(),
            None => {
                let item_id = self.records.create(owner_id, created_by_id).await?;
                info!(%item_id, "Record created");
                let link = RecordLink::Saved {
                    item_id: item_id.clone(),
                };
                self.update_draft(|draft| draft.record = link);
                item_id
            }
        };

        let jobs = upload_jobs(&snapshot, owner_id, &item_id);
        self.run_uploads(jobs).await?;

        let draft = self.draft();
        let due = draft
            .audio
            .as_ref()
            .filter(|audio| audio.is_uploaded() && audio.needs_transcription);

        self.records
            .update(&item_id, record_patch(&draft, due.is_some()))
            .await?;

        if let Some(audio) = due {
            let requested = self.transcription.request(&item_id).await;
            self.mark_transcription_attempted(&audio.local_handle);

            match requested {
                Ok(ack) => info!(%item_id, ?ack, "Transcription requested"),
                Err(e) => {
                    warn!(%item_id, error = %e, "Transcription request failed");
                    let failed =
                        ItemPatch::transcription(TranscriptionPatch::failed(e.to_string()));
                    if let Err(write_err) = self.records.update(&item_id, failed).await {
                        error!(
                            %item_id,
                            error = %write_err,
                            "Failed to record transcription error"
                        );
                    }
                    return Err(SaveError::TranscriptionRequest(e));
                }
            }
        }

        let mut state = self.state.lock();
        state.phase = EnginePhase::Saved;
        state.error_message = None;
        state.failure = None;
        self.cache.save(&state.draft);
        Ok(item_id)
    }

    /// Upload every job concurrently. Successful uploads are kept on the
    /// draft even when a sibling fails; the first failure is returned.
    async fn run_uploads(&self, jobs: Vec<UploadJob>) -> Result<(), UploadError> {
        let mut set = JoinSet::new();
        for job in jobs {
            let uploader = self.uploader.clone();
            let progress = self.progress.clone();
            set.spawn(async move {
                let kind = job.kind;
                let on_progress: ProgressFn = Arc::new(move |fraction| {
                    progress.send_replace(SaveProgress {
                        asset: Some(kind),
                        fraction,
                    });
                });
                let result = uploader
                    .upload(&job.path, &job.local_handle, &job.content_type, Some(on_progress))
                    .await;
                (job, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((job, Ok(remote))) => {
                    info!(path = %remote.path, "Asset uploaded");
                    self.record_upload(&job, remote);
                }
                Ok((job, Err(e))) => {
                    error!(path = %job.path, error = %e, "Asset upload failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "Upload task failed");
                    first_error.get_or_insert(UploadError::Task(e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_upload(&self, job: &UploadJob, remote: RemoteRef) {
        self.update_draft(|draft| match job.kind {
            AssetKind::Photo { slot } => {
                if let Some(photo) = draft
                    .photos
                    .iter_mut()
                    .find(|p| p.slot == slot && p.local_handle == job.local_handle)
                {
                    photo.remote = Some(remote);
                }
            }
            AssetKind::Audio => {
                if let Some(audio) = draft
                    .audio
                    .as_mut()
                    .filter(|a| a.local_handle == job.local_handle)
                {
                    audio.remote = Some(remote);
                    draft.transcript_edited = false;
                }
            }
        });
    }

    fn mark_transcription_attempted(&self, local_handle: &Path) {
        self.update_draft(|draft| {
            if let Some(audio) = draft
                .audio
                .as_mut()
                .filter(|a| a.local_handle == local_handle)
            {
                audio.needs_transcription = false;
            }
        });
    }

    fn begin_save(&self) {
        let mut state = self.state.lock();
        state.phase = EnginePhase::Saving;
        state.error_message = None;
        state.failure = None;
        self.progress.send_replace(SaveProgress::default());
    }

    fn fail(&self, error: SaveError) -> SaveError {
        let mut state = self.state.lock();
        state.phase = EnginePhase::Error;
        state.error_message = Some(error.user_message().to_string());
        state.failure = Some(FailureKind::of(&error));
        error
    }

    // Transcription

    /// Request transcription again without re-running uploads.
    ///
    /// Clears the error state only when the last save failed at the
    /// transcription request; other failures still need a full save.
    #[instrument(skip(self))]
    pub async fn retry_transcription(&self) -> Result<TranscriptionAck, RetryTranscriptionError> {
        let item_id = {
            let state = self.state.lock();
            match (state.draft.item_id(), state.draft.uploaded_audio_path()) {
                (Some(item_id), Some(_)) => item_id.clone(),
                _ => return Err(RetryTranscriptionError::NoUploadedAudio),
            }
        };

        let ack = self.transcription.request(&item_id).await?;
        info!(%item_id, ?ack, "Transcription retry requested");

        let mut state = self.state.lock();
        if state.phase == EnginePhase::Error
            && state.failure == Some(FailureKind::TranscriptionRequest)
        {
            state.phase = EnginePhase::Saved;
            state.error_message = None;
            state.failure = None;
        }
        Ok(ack)
    }

    /// One-shot read of the saved record; applies a finished transcript.
    /// Returns true when the draft changed.
    pub async fn pull_transcript(&self) -> Result<bool, RecordStoreError> {
        let Some(item_id) = self.state.lock().draft.item_id().cloned() else {
            return Ok(false);
        };
        let Some(record) = self.records.get(&item_id).await? else {
            return Ok(false);
        };

        let mut state = self.state.lock();
        let changed = apply_transcription_result(&mut state.draft, &record);
        if changed {
            self.cache.save(&state.draft);
        }
        Ok(changed)
    }

    /// Follow the saved record and pull in finished transcripts.
    /// Returns `None` while the draft has no record.
    pub fn watch_record(&self) -> Option<Subscription> {
        let item_id = self.state.lock().draft.item_id().cloned()?;
        let state = self.state.clone();
        let cache = self.cache.clone();

        let subscription = self.records.subscribe(
            &item_id,
            Box::new(move |record| {
                let Some(record) = record else {
                    return;
                };
                let mut state = state.lock();
                if apply_transcription_result(&mut state.draft, &record) {
                    info!(item_id = %record.id, "Transcript received");
                    cache.save(&state.draft);
                }
            }),
        );
        Some(subscription)
    }
}

fn idle_phase(draft: &Draft) -> EnginePhase {
    if *draft == Draft::default() {
        EnginePhase::Empty
    } else {
        EnginePhase::Editing
    }
}

fn upload_jobs(draft: &Draft, owner_id: &UserId, item_id: &ItemId) -> Vec<UploadJob> {
    let photos = draft.pending_photos().map(|(_, photo)| UploadJob {
        kind: AssetKind::Photo { slot: photo.slot },
        local_handle: photo.local_handle.clone(),
        path: photo_path(owner_id, item_id, photo.slot),
        content_type: "image/jpeg".to_string(),
    });

    let audio = draft
        .audio
        .as_ref()
        .filter(|audio| !audio.is_uploaded())
        .map(|audio| UploadJob {
            kind: AssetKind::Audio,
            local_handle: audio.local_handle.clone(),
            path: audio_path(owner_id, item_id, audio.extension()),
            content_type: audio.mime_type.clone(),
        });

    photos.chain(audio).collect()
}

/// Field values written to the record on save
fn record_patch(draft: &Draft, transcription_due: bool) -> ItemPatch {
    let remote_audio = draft.audio.as_ref().and_then(|audio| {
        audio.remote.as_ref().map(|remote| RemoteAudio {
            url: remote.url.clone(),
            path: remote.path.clone(),
            duration_seconds: audio.duration_seconds,
            mime_type: audio.mime_type.clone(),
        })
    });

    let transcription = remote_audio.as_ref().map(|_| {
        let mut patch = TranscriptionPatch {
            text: draft.transcript.clone().map(Some),
            ..TranscriptionPatch::default()
        };
        if transcription_due {
            patch.status = Some(TranscriptionStatus::Processing);
            patch.error_message = Some(None);
            patch.last_transcribed_asset_path = Some(None);
        }
        patch
    });

    ItemPatch {
        owner_id: draft.owner_id.clone(),
        created_by_id: draft.created_by_id.clone(),
        title: Some(draft.title.clone()),
        prompt_key: Some(draft.prompt_key.clone()),
        photos: Some(draft.photos.iter().filter_map(|p| p.remote.clone()).collect()),
        audio: remote_audio.map(Some),
        visibility: Some(draft.visibility),
        allowed_user_ids: Some(draft.allowed_user_ids.clone()),
        outcome: Some(draft.outcome),
        transcription,
    }
}

/// Copy a finished transcript into the draft unless the user has edited it.
/// Returns true when the draft changed.
pub fn apply_transcription_result(draft: &mut Draft, record: &ItemRecord) -> bool {
    if draft.item_id() != Some(&record.id) || draft.transcript_edited {
        return false;
    }

    let transcription = &record.transcription;
    if transcription.status != TranscriptionStatus::Complete {
        return false;
    }
    // Only results for the recording currently in the draft
    if transcription.last_transcribed_asset_path.as_deref() != draft.uploaded_audio_path() {
        return false;
    }

    match &transcription.text {
        Some(text) if draft.transcript.as_deref() != Some(text.as_str()) => {
            draft.transcript = Some(text.clone());
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RemoteRef;
    use chrono::Utc;

    fn saved_draft_with_audio() -> Draft {
        let mut draft = Draft::for_owner(UserId::from("owner"), UserId::from("owner"));
        draft.record = RecordLink::Saved {
            item_id: ItemId::from("item-1"),
        };
        let mut audio = DraftAudio::new(PathBuf::from("/tmp/a.m4a"), 4.0, "audio/mp4");
        audio.remote = Some(RemoteRef {
            url: "file:///a".to_string(),
            path: "users/owner/items/item-1/audio/audio.m4a".to_string(),
        });
        draft.audio = Some(audio);
        draft
    }

    fn completed_record(text: &str) -> ItemRecord {
        let mut record = ItemRecord::skeleton(
            ItemId::from("item-1"),
            UserId::from("owner"),
            UserId::from("owner"),
            Utc::now(),
        );
        record.transcription.status = TranscriptionStatus::Complete;
        record.transcription.text = Some(text.to_string());
        record.transcription.last_transcribed_asset_path =
            Some("users/owner/items/item-1/audio/audio.m4a".to_string());
        record
    }

    #[test]
    fn test_transcript_applied_when_not_edited() {
        let mut draft = saved_draft_with_audio();
        assert!(apply_transcription_result(&mut draft, &completed_record("It ticks.")));
        assert_eq!(draft.transcript.as_deref(), Some("It ticks."));

        // Same text again is not a change
        assert!(!apply_transcription_result(&mut draft, &completed_record("It ticks.")));
    }

    #[test]
    fn test_local_edit_wins_over_incoming_transcript() {
        let mut draft = saved_draft_with_audio();
        draft.transcript = Some("My own words".to_string());
        draft.transcript_edited = true;

        assert!(!apply_transcription_result(&mut draft, &completed_record("It ticks.")));
        assert_eq!(draft.transcript.as_deref(), Some("My own words"));
    }

    #[test]
    fn test_result_for_other_recording_is_ignored() {
        let mut draft = saved_draft_with_audio();
        let mut record = completed_record("Old recording");
        record.transcription.last_transcribed_asset_path =
            Some("users/owner/items/item-1/audio/audio.wav".to_string());

        assert!(!apply_transcription_result(&mut draft, &record));
        assert!(draft.transcript.is_none());
    }

    #[test]
    fn test_patch_marks_processing_only_when_due() {
        let mut draft = saved_draft_with_audio();
        draft.transcript = Some("typed".to_string());

        let due = record_patch(&draft, true);
        let transcription = due.transcription.unwrap();
        assert_eq!(transcription.status, Some(TranscriptionStatus::Processing));
        assert_eq!(transcription.last_transcribed_asset_path, Some(None));
        assert_eq!(transcription.text, Some(Some("typed".to_string())));

        let not_due = record_patch(&draft, false).transcription.unwrap();
        assert!(not_due.status.is_none());
        assert!(not_due.last_transcribed_asset_path.is_none());
    }

    #[test]
    fn test_patch_without_audio_leaves_transcription_alone() {
        let draft = Draft::for_owner(UserId::from("owner"), UserId::from("owner"));
        let patch = record_patch(&draft, false);
        assert!(patch.transcription.is_none());
        assert!(patch.audio.is_none());
        assert_eq!(patch.photos, Some(Vec::new()));
    }

    #[test]
    fn test_upload_jobs_skip_uploaded_assets() {
        let mut draft = saved_draft_with_audio();
        draft.push_photo(PathBuf::from("/tmp/p0.jpg"));
        draft.push_photo(PathBuf::from("/tmp/p1.jpg"));
        draft.photos[0].remote = Some(RemoteRef {
            url: "file:///p0".to_string(),
            path: "p0".to_string(),
        });

        let jobs = upload_jobs(&draft, &UserId::from("owner"), &ItemId::from("item-1"));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, AssetKind::Photo { slot: 1 });
        assert_eq!(jobs[0].path, "users/owner/items/item-1/photos/photo-1.jpg");
    }
}
