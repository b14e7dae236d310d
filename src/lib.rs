//! memoiries - story capture with resumable sync
//!
//! Captures the story behind a physical object (photos, a voice recording,
//! its transcript, who may see it and what happens to the object) and
//! keeps that capture in sync with durable storage.
//!
//! # Architecture
//!
//! The system is built around a single local draft:
//! - Every edit is written through to a local cache, so a draft survives restarts
//! - Saving creates the record once, then only uploads assets that are missing
//! - A freshly uploaded recording triggers an asynchronous transcription job
//!   whose result lands on the record and flows back into the draft
//!
//! # Modules
//!
//! - `adapters`: Asset storage, record store, transcription and connectivity
//! - `cache`: Key-value storage and the draft cache
//! - `core`: DraftEngine and SessionContext
//! - `domain`: Data structures (Draft, ItemRecord, UserProfile)
//! - `worker`: In-process transcription job
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! memoiries draft start
//! memoiries draft add-photo clock.jpg
//! memoiries draft set-audio story.m4a --duration 42
//! memoiries draft save
//! ```

pub mod adapters;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod worker;

// Re-export main types at crate root for convenience
pub use crate::core::{DraftEngine, EnginePhase, SaveError, SessionContext};
pub use domain::{Draft, ItemId, ItemRecord, UserId};
