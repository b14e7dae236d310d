//! File-backed record store.
//!
//! Each item is a JSON document at `items/{id}.json` and each profile at
//! `users/{id}.json` under the store root. Read-modify-write cycles hold an
//! exclusive `fs2` lock on `.lock` so separate processes can share a root.
//!
//! Subscribers are woken through a broadcast change feed. Writes made by
//! this handle are published directly; writes from other handles or other
//! processes reach the feed through a debounced file watcher on the root,
//! started by the first subscription.

use std::fs::{self as stdfs, File as StdFile};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::{
    FeedCallback, OwnersCallback, ProfileCallback, RecordCallback, RecordChange, RecordStore,
    RecordStoreError, Subscription,
};
use crate::domain::{ItemId, ItemPatch, ItemRecord, UserId, UserProfile};

const CHANGE_FEED_CAPACITY: usize = 64;
const FILE_EVENT_DEBOUNCE: Duration = Duration::from_millis(100);

const ITEMS_DIR: &str = "items";
const USERS_DIR: &str = "users";

pub struct FileRecordStore {
    root: PathBuf,
    changes: broadcast::Sender<RecordChange>,
    file_watch: Mutex<Option<Debouncer<RecommendedWatcher>>>,
}

impl FileRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            root: root.into(),
            changes,
            file_watch: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn items_dir(&self) -> PathBuf {
        self.root.join(ITEMS_DIR)
    }

    fn users_dir(&self) -> PathBuf {
        self.root.join(USERS_DIR)
    }

    fn publish(&self, change: RecordChange) {
        // No receivers is fine
        let _ = self.changes.send(change);
    }

    /// Subscribe to the change feed, starting the file watcher if needed.
    /// The watcher is running before this returns, so no write slips past.
    fn subscribe_changes(&self) -> broadcast::Receiver<RecordChange> {
        let receiver = self.changes.subscribe();

        let mut file_watch = self.file_watch.lock();
        if file_watch.is_none() {
            match watch_root(&self.root, self.changes.clone()) {
                Ok(debouncer) => {
                    info!(root = %self.root.display(), "Watching record store for changes");
                    *file_watch = Some(debouncer);
                }
                Err(e) => {
                    warn!(
                        root = %self.root.display(),
                        error = %e,
                        "File watch unavailable, only changes from this process will be seen"
                    );
                }
            }
        }

        receiver
    }

    /// Run a blocking closure while holding the store-wide lock
    async fn locked<T, F>(&self, f: F) -> Result<T, RecordStoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, RecordStoreError> + Send + 'static,
    {
        let lock_path = self.root.join(".lock");
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = lock_path.parent() {
                stdfs::create_dir_all(parent)?;
            }
            let lock = StdFile::options()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            lock.lock_exclusive()?;
            let result = f();
            lock.unlock()?;
            result
        })
        .await?
    }
}

/// Watch the store root and forward document changes into the feed
fn watch_root(
    root: &Path,
    changes: broadcast::Sender<RecordChange>,
) -> Result<Debouncer<RecommendedWatcher>, notify::Error> {
    for dir in [ITEMS_DIR, USERS_DIR] {
        stdfs::create_dir_all(root.join(dir)).map_err(notify::Error::io)?;
    }

    let mut debouncer = new_debouncer(FILE_EVENT_DEBOUNCE, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                for event in events {
                    if let Some(change) = change_for_path(&event.path) {
                        let _ = changes.send(change);
                    }
                }
            }
            Err(e) => warn!(error = ?e, "Record store watch error"),
        }
    })?;

    debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
    Ok(debouncer)
}

/// Map a file under the store root to the document it holds
fn change_for_path(path: &Path) -> Option<RecordChange> {
    if path.extension()?.to_str()? != "json" {
        return None;
    }
    let id = path.file_stem()?.to_str()?;
    match path.parent()?.file_name()?.to_str()? {
        ITEMS_DIR => Some(RecordChange::Item(ItemId::from(id))),
        USERS_DIR => Some(RecordChange::Profile(UserId::from(id))),
        _ => None,
    }
}

/// Deliver `load()` now and again after every relevant change until the
/// subscription is dropped. A snapshot equal to the last one delivered is
/// not repeated; a `None` from `load` skips the delivery.
fn follow<T, L, Fut>(
    mut changes: broadcast::Receiver<RecordChange>,
    relevant: impl Fn(&RecordChange) -> bool + Send + 'static,
    load: L,
    callback: Box<dyn Fn(T) + Send + Sync>,
) -> Subscription
where
    T: Clone + PartialEq + Send + 'static,
    L: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut last: Option<T> = None;

        loop {
            if let Some(snapshot) = load().await {
                if last.as_ref() != Some(&snapshot) {
                    callback(snapshot.clone());
                    last = Some(snapshot);
                }
            }

            loop {
                match changes.recv().await {
                    Ok(change) if relevant(&change) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Subscriber lagged, re-reading");
                        break;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }
    });

    Subscription::new(task)
}

/// Document file for an identifier; `None` for identifiers that aren't path-safe
fn doc_path(dir: &Path, id: &str) -> Option<PathBuf> {
    let safe = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    safe.then(|| dir.join(format!("{}.json", id)))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RecordStoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"))?;
    stdfs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(value)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&json)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read and parse a document. Missing or malformed documents read as `None`.
async fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, RecordStoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&content) {
        Ok(doc) => Ok(Some(doc)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed record");
            Ok(None)
        }
    }
}

/// Parse every document in a directory, skipping unreadable ones
async fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, RecordStoreError> {
    let mut docs = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(docs),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(doc) = read_doc(&path).await? {
            docs.push(doc);
        }
    }

    Ok(docs)
}

/// A single document for a subscriber; read failures count as missing
async fn read_one<T: DeserializeOwned>(dir: &Path, id: &str) -> Option<T> {
    let path = doc_path(dir, id)?;
    match read_doc(&path).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read document for subscriber");
            None
        }
    }
}

async fn recent_items(
    items_dir: &Path,
    owner_id: &UserId,
    limit: usize,
) -> Result<Vec<ItemRecord>, RecordStoreError> {
    let mut records: Vec<ItemRecord> = read_all::<ItemRecord>(items_dir)
        .await?
        .into_iter()
        .filter(|record| &record.owner_id == owner_id)
        .collect();

    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records.truncate(limit);
    Ok(records)
}

async fn helper_owners(
    users_dir: &Path,
    helper_id: &UserId,
) -> Result<Vec<UserProfile>, RecordStoreError> {
    let mut owners: Vec<UserProfile> = read_all::<UserProfile>(users_dir)
        .await?
        .into_iter()
        .filter(|profile| profile.lists_helper(helper_id))
        .collect();

    owners.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(owners)
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn create(
        &self,
        owner_id: &UserId,
        created_by_id: &UserId,
    ) -> Result<ItemId, RecordStoreError> {
        let id = ItemId::generate();
        let record =
            ItemRecord::skeleton(id.clone(), owner_id.clone(), created_by_id.clone(), Utc::now());
        let path = doc_path(&self.items_dir(), id.as_str())
            .ok_or_else(|| RecordStoreError::NotFound(id.clone()))?;

        self.locked(move || write_json_atomic(&path, &record)).await?;

        debug!(item_id = %id, "Record created");
        self.publish(RecordChange::Item(id.clone()));
        Ok(id)
    }

    async fn update(&self, id: &ItemId, patch: ItemPatch) -> Result<(), RecordStoreError> {
        let path = doc_path(&self.items_dir(), id.as_str())
            .ok_or_else(|| RecordStoreError::NotFound(id.clone()))?;
        let missing = id.clone();

        self.locked(move || {
            let content = match stdfs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(RecordStoreError::NotFound(missing));
                }
                Err(e) => return Err(e.into()),
            };
            let mut record: ItemRecord = serde_json::from_str(&content)?;
            record.apply(patch, Utc::now());
            write_json_atomic(&path, &record)
        })
        .await?;

        debug!(item_id = %id, "Record updated");
        self.publish(RecordChange::Item(id.clone()));
        Ok(())
    }

    async fn get(&self, id: &ItemId) -> Result<Option<ItemRecord>, RecordStoreError> {
        match doc_path(&self.items_dir(), id.as_str()) {
            Some(path) => read_doc(&path).await,
            None => Ok(None),
        }
    }

    fn subscribe(&self, id: &ItemId, callback: RecordCallback) -> Subscription {
        let items_dir = self.items_dir();
        let id = id.clone();
        let watched = id.clone();

        follow(
            self.subscribe_changes(),
            move |change| matches!(change, RecordChange::Item(changed) if *changed == watched),
            move || {
                let items_dir = items_dir.clone();
                let id = id.clone();
                async move { Some(read_one::<ItemRecord>(&items_dir, id.as_str()).await) }
            },
            callback,
        )
    }

    async fn recent_by_owner(
        &self,
        owner_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ItemRecord>, RecordStoreError> {
        recent_items(&self.items_dir(), owner_id, limit).await
    }

    fn subscribe_recent_by_owner(
        &self,
        owner_id: &UserId,
        limit: usize,
        callback: FeedCallback,
    ) -> Subscription {
        let items_dir = self.items_dir();
        let owner_id = owner_id.clone();

        follow(
            self.subscribe_changes(),
            |change| matches!(change, RecordChange::Item(_)),
            move || {
                let items_dir = items_dir.clone();
                let owner_id = owner_id.clone();
                async move {
                    match recent_items(&items_dir, &owner_id, limit).await {
                        Ok(items) => Some(items),
                        Err(e) => {
                            warn!(owner = %owner_id, error = %e, "Failed to read feed");
                            None
                        }
                    }
                }
            },
            callback,
        )
    }

    async fn owners_for_helper(
        &self,
        helper_id: &UserId,
    ) -> Result<Vec<UserProfile>, RecordStoreError> {
        helper_owners(&self.users_dir(), helper_id).await
    }

    fn subscribe_owners_for_helper(
        &self,
        helper_id: &UserId,
        callback: OwnersCallback,
    ) -> Subscription {
        let users_dir = self.users_dir();
        let helper_id = helper_id.clone();

        follow(
            self.subscribe_changes(),
            |change| matches!(change, RecordChange::Profile(_)),
            move || {
                let users_dir = users_dir.clone();
                let helper_id = helper_id.clone();
                async move {
                    match helper_owners(&users_dir, &helper_id).await {
                        Ok(owners) => Some(owners),
                        Err(e) => {
                            warn!(helper = %helper_id, error = %e, "Failed to read owners");
                            None
                        }
                    }
                }
            },
            callback,
        )
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, RecordStoreError> {
        match doc_path(&self.users_dir(), user_id.as_str()) {
            Some(path) => read_doc(&path).await,
            None => Ok(None),
        }
    }

    fn subscribe_profile(&self, user_id: &UserId, callback: ProfileCallback) -> Subscription {
        let users_dir = self.users_dir();
        let user_id = user_id.clone();
        let watched = user_id.clone();

        follow(
            self.subscribe_changes(),
            move |change| matches!(change, RecordChange::Profile(changed) if *changed == watched),
            move || {
                let users_dir = users_dir.clone();
                let user_id = user_id.clone();
                async move { Some(read_one::<UserProfile>(&users_dir, user_id.as_str()).await) }
            },
            callback,
        )
    }

    async fn put_profile(&self, profile: &UserProfile) -> Result<(), RecordStoreError> {
        let path = doc_path(&self.users_dir(), profile.id.as_str()).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid user id: {}", profile.id),
            )
        })?;
        let id = profile.id.clone();
        let profile = profile.clone();
        self.locked(move || write_json_atomic(&path, &profile)).await?;

        debug!(user_id = %id, "Profile saved");
        self.publish(RecordChange::Profile(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TranscriptionPatch, TranscriptionStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    type Seen<T> = Arc<Mutex<Vec<T>>>;

    /// Callback that records every delivery
    fn collector<T: Send + 'static>() -> (Seen<T>, Box<dyn Fn(T) + Send + Sync>) {
        let seen: Seen<T> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |value| sink.lock().push(value)))
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    fn complete() -> ItemPatch {
        ItemPatch::transcription(TranscriptionPatch::status(TranscriptionStatus::Complete))
    }

    fn status_of(delivery: &Option<ItemRecord>) -> Option<TranscriptionStatus> {
        delivery.as_ref().map(|r| r.transcription.status)
    }

    fn profile(id: &str, helpers: &[&str]) -> UserProfile {
        UserProfile {
            id: UserId::from(id),
            display_name: Some(id.to_uppercase()),
            role: None,
            helper_ids: helpers.iter().map(|h| UserId::from(*h)).collect(),
        }
    }

    #[test]
    fn test_doc_path_rejects_unsafe_ids() {
        let dir = Path::new("/store/items");
        assert!(doc_path(dir, "../secrets").is_none());
        assert!(doc_path(dir, "").is_none());
        assert_eq!(
            doc_path(dir, "abc-123"),
            Some(PathBuf::from("/store/items/abc-123.json"))
        );
    }

    #[test]
    fn test_change_for_path() {
        assert_eq!(
            change_for_path(Path::new("/store/items/abc.json")),
            Some(RecordChange::Item(ItemId::from("abc")))
        );
        assert_eq!(
            change_for_path(Path::new("/store/users/grandma.json")),
            Some(RecordChange::Profile(UserId::from("grandma")))
        );
        assert_eq!(change_for_path(Path::new("/store/items/.tmpX1y2")), None);
        assert_eq!(change_for_path(Path::new("/store/.lock")), None);
        assert_eq!(change_for_path(Path::new("/store/other/abc.json")), None);
    }

    #[tokio::test]
    async fn test_create_writes_idle_skeleton() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());

        let id = store
            .create(&UserId::from("owner"), &UserId::from("helper"))
            .await
            .unwrap();
        let record = store.get(&id).await.unwrap().unwrap();

        assert_eq!(record.owner_id, UserId::from("owner"));
        assert_eq!(record.created_by_id, UserId::from("helper"));
        assert_eq!(record.transcription.status, TranscriptionStatus::Idle);
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());

        let err = store
            .update(&ItemId::from("missing"), ItemPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_record_reads_as_none() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());
        tokio::fs::create_dir_all(temp.path().join("items")).await.unwrap();
        tokio::fs::write(temp.path().join("items/broken.json"), "{\"ownerId\": 5}")
            .await
            .unwrap();

        assert!(store.get(&ItemId::from("broken")).await.unwrap().is_none());
        assert!(store
            .recent_by_owner(&UserId::from("owner"), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_transcription() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());
        let id = store
            .create(&UserId::from("o"), &UserId::from("o"))
            .await
            .unwrap();

        store
            .update(
                &id,
                ItemPatch::transcription(TranscriptionPatch {
                    text: Some(Some("draft text".to_string())),
                    ..TranscriptionPatch::default()
                }),
            )
            .await
            .unwrap();
        store
            .update(
                &id,
                ItemPatch::transcription(TranscriptionPatch::status(
                    TranscriptionStatus::Processing,
                )),
            )
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.transcription.status, TranscriptionStatus::Processing);
        assert_eq!(record.transcription.text.as_deref(), Some("draft text"));
        assert!(record.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_updates() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());
        let id = store
            .create(&UserId::from("o"), &UserId::from("o"))
            .await
            .unwrap();

        let (seen, callback) = collector();
        let _subscription = store.subscribe(&id, callback);
        assert!(wait_for(|| seen.lock().len() == 1).await);
        assert_eq!(status_of(&seen.lock()[0]), Some(TranscriptionStatus::Idle));

        store.update(&id, complete()).await.unwrap();

        assert!(wait_for(|| {
            seen.lock().last().and_then(status_of) == Some(TranscriptionStatus::Complete)
        })
        .await);
    }

    #[tokio::test]
    async fn test_subscribe_missing_and_malformed_deliver_none() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());
        tokio::fs::create_dir_all(temp.path().join("items")).await.unwrap();
        tokio::fs::write(temp.path().join("items/broken.json"), "not json")
            .await
            .unwrap();

        let (missing, callback) = collector();
        let _missing = store.subscribe(&ItemId::from("nothing-here"), callback);
        let (broken, callback) = collector();
        let _broken = store.subscribe(&ItemId::from("broken"), callback);

        assert!(wait_for(|| missing.lock().len() == 1 && broken.lock().len() == 1).await);
        assert!(missing.lock()[0].is_none());
        assert!(broken.lock()[0].is_none());
    }

    #[tokio::test]
    async fn test_subscribe_sees_writes_from_another_handle() {
        let temp = TempDir::new().unwrap();
        let reader = FileRecordStore::new(temp.path());
        let writer = FileRecordStore::new(temp.path());
        let id = writer
            .create(&UserId::from("o"), &UserId::from("o"))
            .await
            .unwrap();

        let (seen, callback) = collector();
        let _subscription = reader.subscribe(&id, callback);
        assert!(wait_for(|| seen.lock().len() == 1).await);

        writer.update(&id, complete()).await.unwrap();

        assert!(wait_for(|| {
            seen.lock().last().and_then(status_of) == Some(TranscriptionStatus::Complete)
        })
        .await);
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_and_dropped_subscriptions_stop() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());
        let id = store
            .create(&UserId::from("o"), &UserId::from("o"))
            .await
            .unwrap();

        let (cancelled, callback) = collector();
        let subscription = store.subscribe(&id, callback);
        let (dropped, callback) = collector();
        let dropped_subscription = store.subscribe(&id, callback);
        assert!(wait_for(|| cancelled.lock().len() == 1 && dropped.lock().len() == 1).await);

        subscription.cancel();
        drop(dropped_subscription);
        store.update(&id, complete()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(cancelled.lock().len(), 1);
        assert_eq!(dropped.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_feed_subscription_follows_owner_items() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());
        let owner = UserId::from("grandma");
        let first = store.create(&owner, &owner).await.unwrap();
        store
            .create(&UserId::from("someone-else"), &owner)
            .await
            .unwrap();
        tokio::fs::write(temp.path().join("items/broken.json"), "{}")
            .await
            .unwrap();

        let (seen, callback) = collector::<Vec<ItemRecord>>();
        let _subscription = store.subscribe_recent_by_owner(&owner, 10, callback);
        assert!(wait_for(|| seen.lock().len() == 1).await);
        assert_eq!(seen.lock()[0].len(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.create(&owner, &owner).await.unwrap();

        assert!(wait_for(|| seen.lock().last().map(|items| items.len()) == Some(2)).await);
        let ids: Vec<ItemId> = seen.lock().last().unwrap().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_owner_and_profile_subscriptions() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp.path());
        let other_handle = FileRecordStore::new(temp.path());
        let helper = UserId::from("helper");

        let (owners, callback) = collector::<Vec<UserProfile>>();
        let _owners = store.subscribe_owners_for_helper(&helper, callback);
        let (profiles, callback) = collector::<Option<UserProfile>>();
        let _profile = store.subscribe_profile(&UserId::from("grandma"), callback);
        assert!(wait_for(|| owners.lock().len() == 1 && profiles.lock().len() == 1).await);
        assert!(owners.lock()[0].is_empty());
        assert!(profiles.lock()[0].is_none());

        other_handle
            .put_profile(&profile("grandma", &["helper"]))
            .await
            .unwrap();

        assert!(wait_for(|| owners.lock().last().map(|o| o.len()) == Some(1)).await);
        assert!(wait_for(|| profiles.lock().last().map(|p| p.is_some()) == Some(true)).await);
        assert_eq!(
            store.get_profile(&UserId::from("grandma")).await.unwrap(),
            Some(profile("grandma", &["helper"]))
        );
    }
}
