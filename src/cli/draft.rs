//! Draft CLI commands.
//!
//! Every edit is applied to the cached draft; `save` pushes it to the
//! record and asset stores.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};

use super::App;
use crate::core::{AssetKind, DraftEngine, EnginePhase, SaveError};
use crate::domain::{Outcome, RecordLink, UserId, Visibility};

/// Draft subcommands
#[derive(Subcommand, Debug)]
pub enum DraftCommands {
    /// Start a new capture, discarding any unsaved draft
    Start {
        /// Owner to capture for (ignored for helpers, who use the active owner)
        #[arg(short, long)]
        owner: Option<String>,
    },

    /// Show the current draft
    Show,

    /// Add a photo (the first photo is the cover)
    AddPhoto { path: PathBuf },

    /// Remove the photo at a list position
    RemovePhoto { index: usize },

    /// Attach a recording, replacing any previous one
    SetAudio {
        path: PathBuf,

        /// Recording length in seconds
        #[arg(short, long, default_value = "0")]
        duration: f64,

        /// MIME type (inferred from the extension if not given)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Set the title (omit to clear)
    Title { title: Option<String> },

    /// Set the prompt the story answers (omit to clear)
    Prompt { key: Option<String> },

    /// Replace the transcript with your own text
    Transcript { text: String },

    /// Who may see the story
    Visibility {
        #[arg(value_enum)]
        visibility: VisibilityArg,
    },

    /// Users allowed to see a story with `specific` visibility
    Allow { user_ids: Vec<String> },

    /// What happens to the item (omit to clear)
    Outcome {
        #[arg(value_enum)]
        outcome: Option<OutcomeArg>,
    },

    /// Save the draft
    Save,

    /// Request transcription of the saved recording again
    RetryTranscription,

    /// Follow the saved record and pull in transcripts as they finish
    Watch,

    /// Discard the draft
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VisibilityArg {
    Private,
    Family,
    Specific,
}

impl From<VisibilityArg> for Visibility {
    fn from(v: VisibilityArg) -> Self {
        match v {
            VisibilityArg::Private => Visibility::Private,
            VisibilityArg::Family => Visibility::Family,
            VisibilityArg::Specific => Visibility::Specific,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutcomeArg {
    Keep,
    Gift,
    Donate,
    Sell,
    Discard,
}

impl From<OutcomeArg> for Outcome {
    fn from(o: OutcomeArg) -> Self {
        match o {
            OutcomeArg::Keep => Outcome::Keep,
            OutcomeArg::Gift => Outcome::Gift,
            OutcomeArg::Donate => Outcome::Donate,
            OutcomeArg::Sell => Outcome::Sell,
            OutcomeArg::Discard => Outcome::Discard,
        }
    }
}

/// Execute a draft command
pub async fn execute(app: &App, command: DraftCommands) -> Result<()> {
    let engine = app.engine().await;
    let result = run(app, &engine, command).await;
    engine.flush().await;
    result
}

async fn run(app: &App, engine: &DraftEngine, command: DraftCommands) -> Result<()> {
    match command {
        DraftCommands::Start { owner } => {
            let session = app.session().await;
            let owner = owner.map(UserId::from).unwrap_or_else(|| app.user.clone());
            engine.start_new_draft(&session, &owner, &app.user)?;
            let draft = engine.draft();
            println!(
                "Started a new draft for {}",
                draft.owner_id.as_ref().map(|o| o.as_str()).unwrap_or("?")
            );
        }
        DraftCommands::Show => print_draft(engine),
        DraftCommands::AddPhoto { path } => {
            let path = local_file(&path)?;
            engine.add_photo(path.clone());
            println!("Added photo {} ({})", engine.draft().photos.len() - 1, path.display());
        }
        DraftCommands::RemovePhoto { index } => {
            if !engine.remove_photo(index) {
                anyhow::bail!("No photo at position {}", index);
            }
            println!("Removed photo {}", index);
        }
        DraftCommands::SetAudio {
            path,
            duration,
            mime,
        } => {
            let path = local_file(&path)?;
            let mime = mime.unwrap_or_else(|| mime_for(&path).to_string());
            engine.set_audio(path.clone(), duration, mime);
            println!("Attached recording {}", path.display());
        }
        DraftCommands::Title { title } => engine.set_title(title),
        DraftCommands::Prompt { key } => engine.set_prompt_key(key),
        DraftCommands::Transcript { text } => engine.set_transcript(Some(text)),
        DraftCommands::Visibility { visibility } => engine.set_visibility(visibility.into()),
        DraftCommands::Allow { user_ids } => {
            engine.set_allowed_user_ids(user_ids.into_iter().map(UserId::from))
        }
        DraftCommands::Outcome { outcome } => engine.set_outcome(outcome.map(Outcome::from)),
        DraftCommands::Save => save(app, engine).await?,
        DraftCommands::RetryTranscription => {
            let ack = engine
                .retry_transcription()
                .await
                .context("Transcription could not be restarted")?;
            println!("Transcription {:?}", ack);
            app.settle().await;
            follow_transcript(engine).await;
        }
        DraftCommands::Watch => watch(engine).await?,
        DraftCommands::Reset => {
            engine.reset_draft();
            println!("Draft discarded");
        }
    }
    Ok(())
}

async fn save(app: &App, engine: &DraftEngine) -> Result<()> {
    let mut progress = engine.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let report = *progress.borrow_and_update();
            if report.fraction < 1.0 {
                continue;
            }
            match report.asset {
                Some(AssetKind::Photo { slot }) => eprintln!("  ✓ photo {} uploaded", slot),
                Some(AssetKind::Audio) => eprintln!("  ✓ audio uploaded"),
                None => {}
            }
        }
    });

    let saved = engine.persist_draft().await;
    reporter.abort();

    match saved {
        Ok(item_id) => {
            println!("✅ Saved {}", item_id);
            app.settle().await;
            follow_transcript(engine).await;
            Ok(())
        }
        Err(e) => {
            if matches!(e, SaveError::TranscriptionRequest(_)) {
                eprintln!("Run `memoiries draft retry-transcription` to try again.");
            } else if e.is_retriable() {
                eprintln!("Your draft is kept. Run `memoiries draft save` to try again.");
            }
            let message = e.user_message();
            Err(anyhow::Error::new(e).context(message))
        }
    }
}

/// Pull a finished transcript into the draft, if one is already available
async fn follow_transcript(engine: &DraftEngine) {
    match engine.pull_transcript().await {
        Ok(_) => {
            if let Some(ref transcript) = engine.draft().transcript {
                println!("Transcript: {}", transcript);
            }
        }
        Err(e) => eprintln!("Could not read the saved record: {}", e),
    }
}

/// Follow the saved record until Ctrl+C, applying transcripts as they land
async fn watch(engine: &DraftEngine) -> Result<()> {
    let Some(subscription) = engine.watch_record() else {
        anyhow::bail!("The draft has not been saved yet");
    };

    println!("👁️  Watching for transcripts. Press Ctrl+C to stop");
    let mut last = engine.draft().transcript;
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = engine.draft().transcript;
                if current != last {
                    if let Some(ref text) = current {
                        println!("📝 {}", text);
                    }
                    last = current;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("🛑 Stopping watch...");
                break;
            }
        }
    }

    subscription.cancel();
    Ok(())
}

fn print_draft(engine: &DraftEngine) {
    let draft = engine.draft();
    let phase = engine.phase();

    if phase == EnginePhase::Empty && draft.is_blank() && draft.owner_id.is_none() {
        println!("No draft. Start one with `memoiries draft start`.");
        return;
    }

    println!("Draft");
    println!("  Phase:       {:?}", phase);
    match draft.record {
        RecordLink::Unsaved => println!("  Record:      (unsaved)"),
        RecordLink::Saved { ref item_id } => println!("  Record:      {}", item_id),
    }
    println!("  Owner:       {}", display_id(draft.owner_id.as_ref()));
    println!("  Created by:  {}", display_id(draft.created_by_id.as_ref()));
    println!("  Title:       {}", draft.title.as_deref().unwrap_or("-"));
    println!("  Prompt:      {}", draft.prompt_key.as_deref().unwrap_or("-"));
    println!("  Photos:      {}", draft.photos.len());
    for (index, photo) in draft.photos.iter().enumerate() {
        println!(
            "    [{}] {} ({})",
            index,
            photo.local_handle.display(),
            if photo.is_uploaded() { "uploaded" } else { "pending" }
        );
    }
    match draft.audio {
        Some(ref audio) => println!(
            "  Audio:       {} ({:.1}s, {}, {})",
            audio.local_handle.display(),
            audio.duration_seconds,
            audio.mime_type,
            if audio.is_uploaded() { "uploaded" } else { "pending" }
        ),
        None => println!("  Audio:       -"),
    }
    println!(
        "  Transcript:  {}{}",
        draft.transcript.as_deref().unwrap_or("-"),
        if draft.transcript_edited { " (edited)" } else { "" }
    );
    println!("  Visibility:  {:?}", draft.visibility);
    if !draft.allowed_user_ids.is_empty() {
        let allowed: Vec<&str> = draft.allowed_user_ids.iter().map(|u| u.as_str()).collect();
        println!("  Allowed:     {}", allowed.join(", "));
    }
    println!(
        "  Outcome:     {}",
        draft.outcome.map(|o| format!("{:?}", o)).unwrap_or_else(|| "-".to_string())
    );
    if let Some(message) = engine.error_message() {
        println!("  Error:       {}", message);
    }
}

fn display_id(id: Option<&UserId>) -> &str {
    id.map(|u| u.as_str()).unwrap_or("-")
}

/// Absolute path of an existing local file
fn local_file(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("File not found: {}", path.display()))
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("wav") => "audio/wav",
        _ => "audio/mp4",
    }
}
