//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

use memoiries::adapters::{
    AssetUploader, FeedCallback, OwnersCallback, ProfileCallback, ProgressFn, RecordCallback,
    RecordChange, RecordStore, RecordStoreError, StaticConnectivity, Subscription,
    TranscriptionAck, TranscriptionRequestError, TranscriptionRequester, UploadError,
};
use memoiries::cache::{DraftCache, MemoryKeyValueStore};
use memoiries::core::DraftEngine;
use memoiries::domain::{ItemId, ItemPatch, ItemRecord, RemoteRef, UserId, UserProfile};

/// Records every upload; fails uploads whose path contains a marker
#[derive(Default)]
pub struct CountingUploader {
    uploads: Mutex<Vec<String>>,
    fail_marker: Mutex<Option<String>>,
}

impl CountingUploader {
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn fail_paths_containing(&self, marker: &str) {
        *self.fail_marker.lock() = Some(marker.to_string());
    }

    pub fn stop_failing(&self) {
        *self.fail_marker.lock() = None;
    }
}

#[async_trait]
impl AssetUploader for CountingUploader {
    async fn upload(
        &self,
        path: &str,
        _local_handle: &Path,
        _content_type: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<RemoteRef, UploadError> {
        let failing = self
            .fail_marker
            .lock()
            .as_ref()
            .map(|marker| path.contains(marker.as_str()))
            .unwrap_or(false);
        if failing {
            return Err(UploadError::Transport {
                path: path.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ),
            });
        }

        if let Some(progress) = on_progress {
            progress(0.5);
            progress(1.0);
        }
        self.uploads.lock().push(path.to_string());
        Ok(RemoteRef {
            url: format!("mem://{}", path),
            path: path.to_string(),
        })
    }
}

type Records = Arc<Mutex<HashMap<ItemId, ItemRecord>>>;
type Profiles = Arc<Mutex<HashMap<UserId, UserProfile>>>;

/// Call `read` now and after every change accepted by `relevant`
fn follow<T: Send + 'static>(
    mut changes: broadcast::Receiver<RecordChange>,
    relevant: impl Fn(&RecordChange) -> bool + Send + 'static,
    read: impl Fn() -> T + Send + 'static,
    callback: Box<dyn Fn(T) + Send + Sync>,
) -> Subscription {
    let task = tokio::spawn(async move {
        callback(read());
        loop {
            match changes.recv().await {
                Ok(change) if relevant(&change) => callback(read()),
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => callback(read()),
                Err(RecvError::Closed) => break,
            }
        }
    });
    Subscription::new(task)
}

/// Record store held in memory, with call counters
pub struct MemoryRecordStore {
    records: Records,
    profiles: Profiles,
    changes: broadcast::Sender<RecordChange>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    fail_updates: AtomicBool,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            profiles: Arc::new(Mutex::new(HashMap::new())),
            changes,
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            fail_updates: AtomicBool::new(false),
        }
    }
}

impl MemoryRecordStore {
    pub fn record(&self, id: &ItemId) -> Option<ItemRecord> {
        self.records.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Apply a patch from outside the engine, as the transcription worker would
    pub fn apply_external(&self, id: &ItemId, patch: ItemPatch) {
        if let Some(record) = self.records.lock().get_mut(id) {
            record.apply(patch, Utc::now());
        }
        let _ = self.changes.send(RecordChange::Item(id.clone()));
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(
        &self,
        owner_id: &UserId,
        created_by_id: &UserId,
    ) -> Result<ItemId, RecordStoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = ItemId::generate();
        let record =
            ItemRecord::skeleton(id.clone(), owner_id.clone(), created_by_id.clone(), Utc::now());
        self.records.lock().insert(id.clone(), record);
        let _ = self.changes.send(RecordChange::Item(id.clone()));
        Ok(id)
    }

    async fn update(&self, id: &ItemId, patch: ItemPatch) -> Result<(), RecordStoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "write rejected",
            )));
        }
        {
            let mut records = self.records.lock();
            let record = records
                .get_mut(id)
                .ok_or_else(|| RecordStoreError::NotFound(id.clone()))?;
            record.apply(patch, Utc::now());
        }
        let _ = self.changes.send(RecordChange::Item(id.clone()));
        Ok(())
    }

    async fn get(&self, id: &ItemId) -> Result<Option<ItemRecord>, RecordStoreError> {
        Ok(self.record(id))
    }

    fn subscribe(&self, id: &ItemId, callback: RecordCallback) -> Subscription {
        let records = self.records.clone();
        let id = id.clone();
        let watched = id.clone();
        follow(
            self.changes.subscribe(),
            move |change| matches!(change, RecordChange::Item(changed) if *changed == watched),
            move || records.lock().get(&id).cloned(),
            callback,
        )
    }

    async fn recent_by_owner(
        &self,
        owner_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ItemRecord>, RecordStoreError> {
        Ok(recent(&self.records, owner_id, limit))
    }

    fn subscribe_recent_by_owner(
        &self,
        owner_id: &UserId,
        limit: usize,
        callback: FeedCallback,
    ) -> Subscription {
        let records = self.records.clone();
        let owner_id = owner_id.clone();
        follow(
            self.changes.subscribe(),
            |change| matches!(change, RecordChange::Item(_)),
            move || recent(&records, &owner_id, limit),
            callback,
        )
    }

    async fn owners_for_helper(
        &self,
        helper_id: &UserId,
    ) -> Result<Vec<UserProfile>, RecordStoreError> {
        Ok(owners_of(&self.profiles, helper_id))
    }

    fn subscribe_owners_for_helper(
        &self,
        helper_id: &UserId,
        callback: OwnersCallback,
    ) -> Subscription {
        let profiles = self.profiles.clone();
        let helper_id = helper_id.clone();
        follow(
            self.changes.subscribe(),
            |change| matches!(change, RecordChange::Profile(_)),
            move || owners_of(&profiles, &helper_id),
            callback,
        )
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, RecordStoreError> {
        Ok(self.profiles.lock().get(user_id).cloned())
    }

    fn subscribe_profile(&self, user_id: &UserId, callback: ProfileCallback) -> Subscription {
        let profiles = self.profiles.clone();
        let user_id = user_id.clone();
        let watched = user_id.clone();
        follow(
            self.changes.subscribe(),
            move |change| matches!(change, RecordChange::Profile(changed) if *changed == watched),
            move || profiles.lock().get(&user_id).cloned(),
            callback,
        )
    }

    async fn put_profile(&self, profile: &UserProfile) -> Result<(), RecordStoreError> {
        self.profiles
            .lock()
            .insert(profile.id.clone(), profile.clone());
        let _ = self.changes.send(RecordChange::Profile(profile.id.clone()));
        Ok(())
    }
}

fn recent(records: &Records, owner_id: &UserId, limit: usize) -> Vec<ItemRecord> {
    let mut records: Vec<ItemRecord> = records
        .lock()
        .values()
        .filter(|r| &r.owner_id == owner_id)
        .cloned()
        .collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records.truncate(limit);
    records
}

fn owners_of(profiles: &Profiles, helper_id: &UserId) -> Vec<UserProfile> {
    profiles
        .lock()
        .values()
        .filter(|p| p.lists_helper(helper_id))
        .cloned()
        .collect()
}

/// Counts requests; fails with `Internal` while `failing` is set
#[derive(Default)]
pub struct CountingRequester {
    requests: Mutex<Vec<ItemId>>,
    failing: AtomicBool,
}

impl CountingRequester {
    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ItemId> {
        self.requests.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranscriptionRequester for CountingRequester {
    async fn request(
        &self,
        item_id: &ItemId,
    ) -> Result<TranscriptionAck, TranscriptionRequestError> {
        self.requests.lock().push(item_id.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(TranscriptionRequestError::Internal(
                "transcription backend unavailable".to_string(),
            ));
        }
        Ok(TranscriptionAck::Accepted)
    }
}

/// An engine wired to in-memory fakes
pub struct Harness {
    pub engine: DraftEngine,
    pub kv: Arc<MemoryKeyValueStore>,
    pub uploader: Arc<CountingUploader>,
    pub records: Arc<MemoryRecordStore>,
    pub requester: Arc<CountingRequester>,
    pub connectivity: Arc<StaticConnectivity>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_kv(Arc::new(MemoryKeyValueStore::new()))
    }

    /// Share a cache with an earlier harness to simulate a restart
    pub fn with_kv(kv: Arc<MemoryKeyValueStore>) -> Self {
        let uploader = Arc::new(CountingUploader::default());
        let records = Arc::new(MemoryRecordStore::default());
        let requester = Arc::new(CountingRequester::default());
        let connectivity = Arc::new(StaticConnectivity::online());

        let engine = DraftEngine::new(
            DraftCache::new(kv.clone()),
            uploader.clone(),
            records.clone(),
            requester.clone(),
            connectivity.clone(),
        );

        Self {
            engine,
            kv,
            uploader,
            records,
            requester,
            connectivity,
        }
    }
}

pub fn user(id: &str) -> UserId {
    UserId::from(id)
}

/// Poll `check` until it holds or the timeout passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
