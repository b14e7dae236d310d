//! Domain types for story capture.
//!
//! - Draft: the local, possibly unsaved capture
//! - ItemRecord: the durable record a saved draft maps to
//! - UserProfile: owners, helpers and delegation

pub mod draft;
pub mod ids;
pub mod item;
pub mod profile;

// Re-export commonly used types
pub use draft::{Draft, DraftAudio, DraftPhoto, RecordLink, RemoteRef};
pub use ids::{ItemId, UserId};
pub use item::{
    ItemPatch, ItemRecord, Outcome, RemoteAudio, TranscriptSegment, Transcription,
    TranscriptionPatch, TranscriptionStatus, Visibility,
};
pub use profile::{Role, UserProfile};
