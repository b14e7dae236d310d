//! Write-through cache for the single in-progress draft.
//!
//! Writes are fire-and-forget from the caller's side: `save` and `clear`
//! hand the latest state to a background writer and return immediately.
//! The writer only ever persists the newest submitted state, so a burst of
//! edits collapses into one write. `flush` waits for the writer to catch up.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::{CacheError, KeyValueStore};
use crate::domain::Draft;

/// Cache key holding the serialized draft
pub const DRAFT_STORAGE_KEY: &str = "memoiries:captureDraft";

/// Bumped whenever the cached shape changes incompatibly
pub const DRAFT_SCHEMA_VERSION: u32 = 1;

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// On-disk envelope for a cached draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDraft {
    pub version: u32,
    pub draft: Draft,
}

#[derive(Debug, Clone)]
enum CacheCommand {
    Write(String),
    Remove,
}

#[derive(Debug, Clone, Default)]
struct Pending {
    generation: u64,
    command: Option<CacheCommand>,
}

/// Single-key draft cache with a latest-wins background writer.
///
/// Must be constructed inside a Tokio runtime.
pub struct DraftCache {
    store: Arc<dyn KeyValueStore>,
    pending: watch::Sender<Pending>,
    written: watch::Receiver<u64>,
}

impl DraftCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (pending, pending_rx) = watch::channel(Pending::default());
        let (written_tx, written) = watch::channel(0u64);

        tokio::spawn(run_writer(store.clone(), pending_rx, written_tx));

        Self {
            store,
            pending,
            written,
        }
    }

    /// Queue the draft for persistence
    pub fn save(&self, draft: &Draft) {
        let envelope = CachedDraft {
            version: DRAFT_SCHEMA_VERSION,
            draft: draft.clone(),
        };
        match serde_json::to_string(&envelope) {
            Ok(json) => self.submit(CacheCommand::Write(json)),
            Err(e) => error!(error = %e, "Failed to serialize draft for cache"),
        }
    }

    /// Queue removal of the cached draft
    pub fn clear(&self) {
        self.submit(CacheCommand::Remove);
    }

    fn submit(&self, command: CacheCommand) {
        self.pending.send_modify(|pending| {
            pending.generation += 1;
            pending.command = Some(command);
        });
    }

    /// Wait until every queued write has landed (or been given up on)
    pub async fn flush(&self) {
        let target = self.pending.borrow().generation;
        let mut written = self.written.clone();
        if written.wait_for(|done| *done >= target).await.is_err() {
            warn!("Draft cache writer stopped before flushing");
        }
    }

    /// Load the cached draft. Missing, unreadable or schema-invalid
    /// payloads yield `None`.
    pub async fn load(&self) -> Option<Draft> {
        self.flush().await;

        let raw = match self.store.get(DRAFT_STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "Draft hydrate failed");
                return None;
            }
        };

        decode_draft(&raw)
    }
}

/// Parse a cached payload, discarding anything that doesn't match the schema
pub fn decode_draft(raw: &str) -> Option<Draft> {
    match serde_json::from_str::<CachedDraft>(raw) {
        Ok(cached) if cached.version == DRAFT_SCHEMA_VERSION => Some(cached.draft),
        Ok(cached) => {
            warn!(
                version = cached.version,
                expected = DRAFT_SCHEMA_VERSION,
                "Discarding cached draft with unknown schema version"
            );
            None
        }
        Err(e) => {
            warn!(error = %e, "Discarding invalid cached draft");
            None
        }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    mut pending: watch::Receiver<Pending>,
    written: watch::Sender<u64>,
) {
    // Exits once the cache is dropped and the last submitted command is written
    while pending.changed().await.is_ok() {
        let (generation, command) = {
            let current = pending.borrow_and_update();
            (current.generation, current.command.clone())
        };

        if let Some(command) = command {
            apply_with_retry(store.as_ref(), &command).await;
        }

        written.send_replace(generation);
    }
}

async fn apply_with_retry(store: &dyn KeyValueStore, command: &CacheCommand) {
    for attempt in 1..=WRITE_ATTEMPTS {
        let result: Result<(), CacheError> = match command {
            CacheCommand::Write(json) => store.set(DRAFT_STORAGE_KEY, json).await,
            CacheCommand::Remove => store.remove(DRAFT_STORAGE_KEY).await,
        };

        match result {
            Ok(()) => {
                debug!(attempt, "Draft cache updated");
                return;
            }
            Err(e) if attempt < WRITE_ATTEMPTS => {
                warn!(attempt, error = %e, "Draft cache write failed, retrying");
                tokio::time::sleep(WRITE_RETRY_DELAY * attempt).await;
            }
            Err(e) => {
                error!(attempt, error = %e, "Failed to persist draft");
            }
        }
    }
}
