//! Session CLI commands.
//!
//! - `memoiries session status` - Show role and active owner
//! - `memoiries session role <owner|helper>` - Choose how you capture
//! - `memoiries session select-owner <id>` - Capture on an owner's behalf
//! - `memoiries session clear` - Forget role and active owner

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};

use super::App;
use crate::adapters::RecordStore;
use crate::domain::{Role, UserId};

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Show role and active owner
    Status,

    /// Set your role
    Role {
        #[arg(value_enum)]
        role: RoleArg,
    },

    /// Select the owner whose stories you capture (helpers only)
    SelectOwner {
        /// Owner user ID
        owner_id: String,
    },

    /// Clear the active owner, or everything with --all
    Clear {
        #[arg(long)]
        all: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Owner,
    Helper,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Owner => Role::Owner,
            RoleArg::Helper => Role::Helper,
        }
    }
}

/// Execute a session command
pub async fn execute(app: &App, command: SessionCommands) -> Result<()> {
    match command {
        SessionCommands::Status => execute_status(app).await,
        SessionCommands::Role { role } => {
            let mut session = app.session().await;
            session.set_role(Some(role.into())).await?;
            println!("Role set to {:?}", Role::from(role));
            Ok(())
        }
        SessionCommands::SelectOwner { owner_id } => execute_select_owner(app, &owner_id).await,
        SessionCommands::Clear { all } => {
            let mut session = app.session().await;
            if all {
                session.reset().await?;
                println!("Session cleared");
            } else {
                session.clear_active_owner().await?;
                println!("Active owner cleared");
            }
            Ok(())
        }
    }
}

async fn execute_status(app: &App) -> Result<()> {
    let session = app.session().await;

    println!("User:         {}", app.user);
    println!(
        "Role:         {}",
        session
            .role()
            .map(|r| format!("{:?}", r).to_lowercase())
            .unwrap_or_else(|| "(not chosen)".to_string())
    );
    match session.active_owner() {
        Some(owner) => println!(
            "Active owner: {}{}",
            owner.id,
            owner.name.as_ref().map(|n| format!(" ({})", n)).unwrap_or_default()
        ),
        None => println!("Active owner: (none)"),
    }

    Ok(())
}

async fn execute_select_owner(app: &App, owner_id: &str) -> Result<()> {
    let owner_id = UserId::from(owner_id);
    let owners = app
        .records
        .owners_for_helper(&app.user)
        .await
        .context("Failed to load owners")?;

    let Some(owner) = owners.into_iter().find(|o| o.id == owner_id) else {
        anyhow::bail!(
            "{} has not added {} as a helper. Ask them to run `memoiries profile put --helper {}`",
            owner_id,
            app.user,
            app.user
        );
    };

    let mut session = app.session().await;
    if session.role() != Some(Role::Helper) {
        session.set_role(Some(Role::Helper)).await?;
    }
    session
        .set_active_owner(owner.id.clone(), owner.display_name.clone())
        .await?;

    println!(
        "Now capturing for {}",
        owner.display_name.as_deref().unwrap_or(owner.id.as_str())
    );
    Ok(())
}
