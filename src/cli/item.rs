//! Item, feed and profile CLI commands.

use anyhow::{Context, Result};
use clap::Subcommand;

use super::session::RoleArg;
use super::App;
use crate::adapters::{RecordStore, Subscription};
use crate::config::paths;
use crate::domain::{ItemId, ItemRecord, TranscriptionStatus, UserId, UserProfile};

/// Item subcommands
#[derive(Subcommand, Debug)]
pub enum ItemCommands {
    /// Show a saved item
    Show {
        /// Item ID
        item_id: String,
    },

    /// Print an item every time it changes
    Watch {
        /// Item ID
        item_id: String,
    },
}

/// Profile subcommands
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Show a profile (defaults to yours)
    Show {
        user_id: Option<String>,

        /// Keep printing the profile as it changes (Ctrl+C to stop)
        #[arg(short, long)]
        watch: bool,
    },

    /// Create or replace your profile
    Put {
        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long, value_enum)]
        role: Option<RoleArg>,

        /// Helpers allowed to capture for you (repeatable)
        #[arg(long = "helper")]
        helpers: Vec<String>,
    },
}

/// Execute an item command
pub async fn execute(app: &App, command: ItemCommands) -> Result<()> {
    match command {
        ItemCommands::Show { item_id } => show(app, &ItemId::from(item_id)).await,
        ItemCommands::Watch { item_id } => watch(app, ItemId::from(item_id)).await,
    }
}

async fn show(app: &App, item_id: &ItemId) -> Result<()> {
    let record = app
        .records
        .get(item_id)
        .await
        .context("Failed to read item")?
        .with_context(|| format!("Item not found: {}", item_id))?;

    print_record(&record);
    println!(
        "Document:      {}",
        paths::item_document(app.records.root(), item_id.as_str()).display()
    );
    Ok(())
}

async fn watch(app: &App, item_id: ItemId) -> Result<()> {
    println!("👁️  Watching {}", item_id);
    println!("    Press Ctrl+C to stop");
    println!();

    let id = item_id.clone();
    let subscription = app.records.subscribe(
        &item_id,
        Box::new(move |record| match record {
            Some(record) => {
                println!(
                    "[{}] transcription: {}",
                    record.updated_at.format("%H:%M:%S"),
                    status_label(record.transcription.status)
                );
                if let Some(ref text) = record.transcription.text {
                    println!("    {}", text);
                }
            }
            None => println!("{} is missing or unreadable", id),
        }),
    );

    until_ctrl_c(subscription).await
}

/// Keep a subscription alive until Ctrl+C
async fn until_ctrl_c(subscription: Subscription) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!();
    println!("🛑 Stopping watch...");
    subscription.cancel();
    Ok(())
}

/// List an owner's recent items
pub async fn feed(app: &App, owner: Option<String>, limit: usize, watch: bool) -> Result<()> {
    let owner = match owner {
        Some(owner) => UserId::from(owner),
        None => {
            let session = app.session().await;
            session
                .active_owner()
                .map(|o| o.id.clone())
                .unwrap_or_else(|| app.user.clone())
        }
    };

    if watch {
        println!("👁️  Watching items for {}. Press Ctrl+C to stop", owner);
        let label = owner.clone();
        let subscription = app.records.subscribe_recent_by_owner(
            &owner,
            limit,
            Box::new(move |items| {
                println!();
                print_feed(&label, &items);
            }),
        );
        return until_ctrl_c(subscription).await;
    }

    let items = app
        .records
        .recent_by_owner(&owner, limit)
        .await
        .context("Failed to list items")?;
    print_feed(&owner, &items);
    Ok(())
}

fn print_feed(owner: &UserId, items: &[ItemRecord]) {
    if items.is_empty() {
        println!("No items found for {}", owner);
        return;
    }

    println!("{:<22} {:<30} {:<8} {:<12}", "ITEM ID", "TITLE", "PHOTOS", "TRANSCRIPT");
    println!("{}", "-".repeat(75));

    for item in items {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        let title = if title.chars().count() > 28 {
            format!("{}…", title.chars().take(27).collect::<String>())
        } else {
            title.to_string()
        };
        println!(
            "{:<22} {:<30} {:<8} {:<12}",
            item.id,
            title,
            item.photos.len(),
            status_label(item.transcription.status)
        );
    }
}

/// List owners who have added the current user as a helper
pub async fn owners(app: &App, watch: bool) -> Result<()> {
    if watch {
        println!("👁️  Watching owners for {}. Press Ctrl+C to stop", app.user);
        let helper = app.user.clone();
        let subscription = app.records.subscribe_owners_for_helper(
            &app.user,
            Box::new(move |owners| {
                println!();
                print_owners(&helper, &owners);
            }),
        );
        return until_ctrl_c(subscription).await;
    }

    let owners = app
        .records
        .owners_for_helper(&app.user)
        .await
        .context("Failed to list owners")?;
    print_owners(&app.user, &owners);
    Ok(())
}

fn print_owners(helper: &UserId, owners: &[UserProfile]) {
    if owners.is_empty() {
        println!("Nobody has added {} as a helper yet", helper);
        return;
    }

    for owner in owners {
        println!(
            "{:<22} {}",
            owner.id,
            owner.display_name.as_deref().unwrap_or("")
        );
    }
}

/// Execute a profile command
pub async fn execute_profile(app: &App, command: ProfileCommands) -> Result<()> {
    match command {
        ProfileCommands::Show { user_id, watch } => {
            let user_id = user_id.map(UserId::from).unwrap_or_else(|| app.user.clone());
            if watch {
                let id = user_id.clone();
                let subscription = app.records.subscribe_profile(
                    &user_id,
                    Box::new(move |profile| {
                        println!();
                        print_profile(&id, profile.as_ref());
                    }),
                );
                return until_ctrl_c(subscription).await;
            }

            let profile = app
                .records
                .get_profile(&user_id)
                .await
                .context("Failed to read profile")?;
            print_profile(&user_id, profile.as_ref());
            Ok(())
        }
        ProfileCommands::Put {
            name,
            role,
            helpers,
        } => {
            let profile = UserProfile {
                id: app.user.clone(),
                display_name: name,
                role: role.map(Into::into),
                helper_ids: helpers.into_iter().map(UserId::from).collect(),
            };
            app.records
                .put_profile(&profile)
                .await
                .context("Failed to save profile")?;
            println!("Saved profile for {}", profile.id);
            Ok(())
        }
    }
}

fn print_profile(user_id: &UserId, profile: Option<&UserProfile>) {
    let Some(profile) = profile else {
        println!("No profile for {}", user_id);
        return;
    };

    println!("User:     {}", profile.id);
    println!("Name:     {}", profile.display_name.as_deref().unwrap_or("-"));
    println!(
        "Role:     {}",
        profile.role.map(|r| format!("{:?}", r)).unwrap_or_else(|| "-".to_string())
    );
    let helpers: Vec<&str> = profile.helper_ids.iter().map(|h| h.as_str()).collect();
    println!(
        "Helpers:  {}",
        if helpers.is_empty() { "-".to_string() } else { helpers.join(", ") }
    );
}

fn status_label(status: TranscriptionStatus) -> &'static str {
    match status {
        TranscriptionStatus::Idle => "idle",
        TranscriptionStatus::Processing => "processing",
        TranscriptionStatus::Complete => "complete",
        TranscriptionStatus::Error => "error",
    }
}

fn print_record(record: &ItemRecord) {
    println!("Item ID:       {}", record.id);
    println!("Owner:         {}", record.owner_id);
    println!("Created by:    {}", record.created_by_id);
    println!("Created:       {}", record.created_at);
    println!("Updated:       {}", record.updated_at);
    println!("Title:         {}", record.title.as_deref().unwrap_or("-"));
    println!("Prompt:        {}", record.prompt_key.as_deref().unwrap_or("-"));
    println!("Visibility:    {:?}", record.visibility);
    if let Some(outcome) = record.outcome {
        println!("Outcome:       {:?}", outcome);
    }
    println!("Photos:        {}", record.photos.len());
    for photo in &record.photos {
        println!("  {}", photo.url);
    }
    if let Some(ref audio) = record.audio {
        println!("Audio:         {} ({:.1}s)", audio.url, audio.duration_seconds);
    }

    let transcription = &record.transcription;
    println!("Transcription: {}", status_label(transcription.status));
    if let Some(ref provider) = transcription.provider {
        println!("  Provider:    {}", provider);
    }
    if let Some(ref text) = transcription.text {
        println!("  Text:        {}", text);
    }
    if let Some(ref message) = transcription.error_message {
        println!("  Error:       {}", message);
    }
}
