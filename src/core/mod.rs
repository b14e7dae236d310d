//! Core capture logic.
//!
//! This module contains:
//! - DraftEngine: draft lifecycle and save sequencing
//! - SessionContext: role and active-owner delegation
//! - Error taxonomy surfaced to callers

pub mod engine;
pub mod error;
pub mod session;

// Re-export commonly used types
pub use engine::{apply_transcription_result, AssetKind, DraftEngine, EnginePhase, SaveProgress};
pub use error::{RetryTranscriptionError, SaveError, SessionError};
pub use session::{ActiveOwner, SessionContext, SESSION_STORAGE_KEY};
