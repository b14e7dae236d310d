//! File-backed asset store with resumable uploads.
//!
//! Objects live under a root directory at their store path. An upload
//! streams into `<path>.partial` and renames into place when complete, so
//! an interrupted upload can resume from the bytes already transferred and
//! a finished upload overwrites the previous object atomically.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info};

use super::{AssetUploader, ProgressFn, UploadError};
use crate::domain::{ItemId, RemoteRef, UserId};

/// Default streaming chunk (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Store path for a photo slot
pub fn photo_path(owner_id: &UserId, item_id: &ItemId, slot: u32) -> String {
    format!("users/{}/items/{}/photos/photo-{}.jpg", owner_id, item_id, slot)
}

/// Store path for an item's audio
pub fn audio_path(owner_id: &UserId, item_id: &ItemId, extension: &str) -> String {
    format!("users/{}/items/{}/audio/audio.{}", owner_id, item_id, extension)
}

/// Asset store rooted at a local directory
pub struct FileAssetStore {
    root: PathBuf,
    base_url: String,
    chunk_size: usize,
}

impl FileAssetStore {
    /// Create a store whose URLs are `file://` links into `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base_url = format!("file://{}", root.display());
        Self {
            root,
            base_url,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Serve download URLs from a different base (e.g. a static file server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a store path; `None` if the path escapes the root
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || path.is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }

    fn download_url(&self, path: &str, token: &str) -> String {
        format!(
            "{}/{}?token={}",
            self.base_url.trim_end_matches('/'),
            path,
            token
        )
    }

    async fn stream_into(
        &self,
        path: &str,
        local_handle: &Path,
        dest: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<u64, UploadError> {
        let local_err = |source| UploadError::LocalRead {
            path: local_handle.display().to_string(),
            source,
        };
        let transport_err = |source| UploadError::Transport {
            path: path.to_string(),
            source,
        };

        let mut source = File::open(local_handle).await.map_err(local_err)?;
        let total = source.metadata().await.map_err(local_err)?.len();

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(transport_err)?;
        }

        let partial = partial_path(dest);
        let marker = marker_path(dest);
        let fingerprint = source_fingerprint(local_handle, total);

        // Only resume bytes that came from the same local file
        let resume_from = match (fs::metadata(&partial).await, fs::read_to_string(&marker).await) {
            (Ok(meta), Ok(previous)) if previous == fingerprint && meta.len() <= total => {
                meta.len()
            }
            _ => 0,
        };
        if resume_from == 0 {
            fs::write(&marker, &fingerprint).await.map_err(transport_err)?;
        }

        let mut sink = if resume_from > 0 {
            debug!(path, resume_from, total, "Resuming partial upload");
            OpenOptions::new()
                .append(true)
                .open(&partial)
                .await
                .map_err(transport_err)?
        } else {
            File::create(&partial).await.map_err(transport_err)?
        };

        source
            .seek(SeekFrom::Start(resume_from))
            .await
            .map_err(local_err)?;

        let report = |done: u64| {
            if let Some(progress) = on_progress {
                let fraction = if total == 0 {
                    1.0
                } else {
                    (done as f64 / total as f64).min(1.0)
                };
                progress(fraction);
            }
        };

        let mut transferred = resume_from;
        report(transferred);

        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = source.read(&mut buf).await.map_err(local_err)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await.map_err(transport_err)?;
            transferred += n as u64;
            report(transferred);
        }

        sink.flush().await.map_err(transport_err)?;
        sink.sync_all().await.map_err(transport_err)?;
        drop(sink);

        fs::rename(&partial, dest).await.map_err(transport_err)?;
        if let Err(e) = fs::remove_file(&marker).await {
            debug!(path, error = %e, "Upload marker already gone");
        }
        Ok(transferred)
    }
}

#[async_trait]
impl AssetUploader for FileAssetStore {
    async fn upload(
        &self,
        path: &str,
        local_handle: &Path,
        content_type: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<RemoteRef, UploadError> {
        let start = Instant::now();
        info!(path, content_type, "Upload started");

        let dest = self.resolve(path).ok_or_else(|| UploadError::Rejected {
            path: path.to_string(),
            reason: "path must be relative and stay inside the store".to_string(),
        })?;

        let bytes = match self
            .stream_into(path, local_handle, &dest, on_progress.as_ref())
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path, error = %e, "Upload failed");
                return Err(e);
            }
        };

        let token = content_token(&dest).await.map_err(|source| UploadError::Transport {
            path: path.to_string(),
            source,
        })?;

        info!(
            path,
            bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Upload completed"
        );

        Ok(RemoteRef {
            url: self.download_url(path, &token),
            path: path.to_string(),
        })
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    with_suffix(dest, ".partial")
}

fn marker_path(dest: &Path) -> PathBuf {
    with_suffix(dest, ".partial.src")
}

fn with_suffix(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    dest.with_file_name(name)
}

fn source_fingerprint(local_handle: &Path, total: u64) -> String {
    format!("{}:{}", local_handle.display(), total)
}

/// Digest token for a stored object (SHA256, first 12 hex chars)
pub async fn content_token(path: &Path) -> Result<String, std::io::Error> {
    let content = fs::read(path).await?;
    let digest = Sha256::digest(&content);
    Ok(hex::encode(&digest[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_paths_are_deterministic() {
        let owner = UserId::from("owner-1");
        let item = ItemId::from("item-1");

        assert_eq!(
            photo_path(&owner, &item, 2),
            "users/owner-1/items/item-1/photos/photo-2.jpg"
        );
        assert_eq!(
            audio_path(&owner, &item, "m4a"),
            "users/owner-1/items/item-1/audio/audio.m4a"
        );
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let store = FileAssetStore::new("/srv/assets");
        assert!(store.resolve("../etc/passwd").is_none());
        assert!(store.resolve("/abs/path").is_none());
        assert!(store.resolve("").is_none());
        assert_eq!(
            store.resolve("users/a/items/b/audio/audio.m4a"),
            Some(PathBuf::from("/srv/assets/users/a/items/b/audio/audio.m4a"))
        );
    }

    #[tokio::test]
    async fn test_upload_copies_and_reports_progress() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("photo.jpg");
        tokio::fs::write(&local, vec![7u8; 10_000]).await.unwrap();

        let store = FileAssetStore::new(temp.path().join("assets")).with_chunk_size(1024);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p| sink.lock().push(p));

        let remote = store
            .upload("users/o/items/i/photos/photo-0.jpg", &local, "image/jpeg", Some(progress))
            .await
            .unwrap();

        assert_eq!(remote.path, "users/o/items/i/photos/photo-0.jpg");
        assert!(remote.url.contains("?token="));

        let stored = tokio::fs::read(store.resolve(&remote.path).unwrap()).await.unwrap();
        assert_eq!(stored.len(), 10_000);

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress must not go backwards");
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn test_upload_resumes_partial() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("audio.m4a");
        let content: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&local, &content).await.unwrap();

        let store = FileAssetStore::new(temp.path().join("assets"));
        let path = "users/o/items/i/audio/audio.m4a";
        let dest = store.resolve(path).unwrap();
        tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        tokio::fs::write(partial_path(&dest), &content[..1000]).await.unwrap();
        tokio::fs::write(marker_path(&dest), source_fingerprint(&local, 4096))
            .await
            .unwrap();

        store.upload(path, &local, "audio/mp4", None).await.unwrap();

        let stored = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(stored, content);
        assert!(!partial_path(&dest).exists());
        assert!(!marker_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_partial_from_other_source_is_discarded() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("audio.m4a");
        tokio::fs::write(&local, b"new recording").await.unwrap();

        let store = FileAssetStore::new(temp.path().join("assets"));
        let path = "users/o/items/i/audio/audio.m4a";
        let dest = store.resolve(path).unwrap();
        tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        tokio::fs::write(partial_path(&dest), b"old").await.unwrap();
        tokio::fs::write(marker_path(&dest), "/elsewhere/old.m4a:40").await.unwrap();

        store.upload(path, &local, "audio/mp4", None).await.unwrap();

        let stored = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(stored, b"new recording");
    }

    #[tokio::test]
    async fn test_reupload_overwrites_in_place() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("a.jpg");
        let second = temp.path().join("b.jpg");
        tokio::fs::write(&first, b"first version").await.unwrap();
        tokio::fs::write(&second, b"second").await.unwrap();

        let store = FileAssetStore::new(temp.path().join("assets"));
        let path = "users/o/items/i/photos/photo-0.jpg";
        let a = store.upload(path, &first, "image/jpeg", None).await.unwrap();
        let b = store.upload(path, &second, "image/jpeg", None).await.unwrap();

        assert_eq!(a.path, b.path);
        assert_ne!(a.url, b.url);
        let stored = tokio::fs::read(store.resolve(path).unwrap()).await.unwrap();
        assert_eq!(stored, b"second");
    }

    #[tokio::test]
    async fn test_missing_local_file_is_upload_error() {
        let temp = TempDir::new().unwrap();
        let store = FileAssetStore::new(temp.path());
        let err = store
            .upload(
                "users/o/items/i/photos/photo-0.jpg",
                &temp.path().join("nope.jpg"),
                "image/jpeg",
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::LocalRead { .. }));
    }
}
