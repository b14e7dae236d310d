//! Command-line interface for memoiries.
//!
//! Each invocation rebuilds the engine from the cached draft, runs one
//! command and waits for cache writes (and local transcription jobs) to
//! land before exiting.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{
    ConnectivityProbe, FileAssetStore, FileRecordStore, HttpConnectivity,
    HttpTranscriptionRequester, StaticConnectivity, TranscriptionRequester,
};
use crate::cache::{DraftCache, FileKeyValueStore};
use crate::config::{self, ResolvedConfig, TranscriptionMode};
use crate::core::{DraftEngine, SessionContext};
use crate::domain::UserId;
use crate::worker::{LocalTranscriptionService, WhisperTranscriber};

pub mod draft;
pub mod item;
pub mod session;

/// memoiries - capture the stories behind family objects
#[derive(Parser, Debug)]
#[command(name = "memoiries")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Act as this user (falls back to `user` in the config file)
    #[arg(long, global = true, env = "MEMOIRIES_USER")]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Role and active owner
    Session {
        #[command(subcommand)]
        command: session::SessionCommands,
    },

    /// Edit and save the in-progress capture
    Draft {
        #[command(subcommand)]
        command: draft::DraftCommands,
    },

    /// Inspect saved items
    Item {
        #[command(subcommand)]
        command: item::ItemCommands,
    },

    /// List an owner's most recent items
    Feed {
        /// Owner to list (defaults to the active owner, then yourself)
        #[arg(short, long)]
        owner: Option<String>,

        /// Maximum number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Keep printing the feed as items change (Ctrl+C to stop)
        #[arg(short, long)]
        watch: bool,
    },

    /// List owners who have added you as a helper
    Owners {
        /// Keep printing as owners add or remove you (Ctrl+C to stop)
        #[arg(short, long)]
        watch: bool,
    },

    /// Manage your profile
    Profile {
        #[command(subcommand)]
        command: item::ProfileCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        if let Commands::Config = self.command {
            return show_config();
        }

        let app = App::open(self.user)?;
        match self.command {
            Commands::Session { command } => session::execute(&app, command).await,
            Commands::Draft { command } => draft::execute(&app, command).await,
            Commands::Item { command } => item::execute(&app, command).await,
            Commands::Feed {
                owner,
                limit,
                watch,
            } => item::feed(&app, owner, limit, watch).await,
            Commands::Owners { watch } => item::owners(&app, watch).await,
            Commands::Profile { command } => item::execute_profile(&app, command).await,
            Commands::Config => show_config(),
        }
    }
}

/// Adapters wired from the resolved configuration
pub struct App {
    pub user: UserId,
    pub kv: Arc<FileKeyValueStore>,
    pub records: Arc<FileRecordStore>,
    pub assets: Arc<FileAssetStore>,
    pub transcription: Arc<dyn TranscriptionRequester>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
    local_worker: Option<Arc<LocalTranscriptionService>>,
}

impl App {
    pub fn open(user: Option<String>) -> Result<Self> {
        let cfg = config::config()?;
        let user = user
            .map(UserId::from)
            .or_else(|| cfg.user.clone())
            .context("No user set. Pass --user or set MEMOIRIES_USER")?;
        Self::from_config(cfg, user)
    }

    pub fn from_config(cfg: &ResolvedConfig, user: UserId) -> Result<Self> {
        let kv = Arc::new(FileKeyValueStore::new(&cfg.cache_dir));
        let records = Arc::new(FileRecordStore::new(&cfg.records_dir));

        let mut assets =
            FileAssetStore::new(&cfg.assets_dir).with_chunk_size(cfg.assets.chunk_size);
        if let Some(ref base_url) = cfg.assets.base_url {
            assets = assets.with_base_url(base_url.clone());
        }
        let assets = Arc::new(assets);

        let mut local_worker = None;
        let transcription: Arc<dyn TranscriptionRequester> = match cfg.transcription.mode {
            TranscriptionMode::Http => {
                let endpoint = cfg
                    .transcription
                    .endpoint
                    .clone()
                    .context("transcription.mode is http but no endpoint is configured")?;
                Arc::new(HttpTranscriptionRequester::new(
                    endpoint,
                    Some(user.to_string()),
                    cfg.connectivity.timeout(),
                ))
            }
            TranscriptionMode::Local => {
                let settings = &cfg.transcription;
                let transcriber = match settings.whisper_path {
                    Some(ref path) => {
                        WhisperTranscriber::new(path.clone(), &settings.model, &settings.language)
                    }
                    None => WhisperTranscriber::from_env(&settings.model, &settings.language),
                };
                let worker = Arc::new(LocalTranscriptionService::new(
                    records.clone(),
                    assets.clone(),
                    Arc::new(transcriber),
                    Some(user.clone()),
                ));
                local_worker = Some(worker.clone());
                worker
            }
        };

        let connectivity: Arc<dyn ConnectivityProbe> = match cfg.connectivity.probe_url {
            Some(ref url) => {
                Arc::new(HttpConnectivity::new(url.clone(), cfg.connectivity.timeout()))
            }
            None => Arc::new(StaticConnectivity::online()),
        };

        Ok(Self {
            user,
            kv,
            records,
            assets,
            transcription,
            connectivity,
            local_worker,
        })
    }

    /// Session context loaded from the cache
    pub async fn session(&self) -> SessionContext {
        let mut session = SessionContext::new(self.kv.clone());
        session.hydrate().await;
        session
    }

    /// Engine holding the cached draft
    pub async fn engine(&self) -> DraftEngine {
        let engine = DraftEngine::new(
            DraftCache::new(self.kv.clone()),
            self.assets.clone(),
            self.records.clone(),
            self.transcription.clone(),
            self.connectivity.clone(),
        );
        engine.hydrate_draft().await;
        engine
    }

    /// Wait for in-process transcription jobs to write their result
    pub async fn settle(&self) {
        if let Some(ref worker) = self.local_worker {
            worker.wait_idle().await;
        }
    }
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("══════════════════════════════════════════════════════════════");
    println!("  memoiries configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!(
        "User:        {}",
        cfg.user.as_ref().map(|u| u.to_string()).unwrap_or_else(|| "(not set)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Cache:   {}", cfg.cache_dir.display());
    println!("  Records: {}", cfg.records_dir.display());
    println!("  Assets:  {}", cfg.assets_dir.display());
    println!();
    println!("Assets:");
    println!(
        "  Base URL:   {}",
        cfg.assets.base_url.as_deref().unwrap_or("(file://)")
    );
    println!("  Chunk size: {} bytes", cfg.assets.chunk_size);
    println!();
    println!("Connectivity:");
    println!(
        "  Probe:   {}",
        cfg.connectivity.probe_url.as_deref().unwrap_or("(always online)")
    );
    println!("  Timeout: {}s", cfg.connectivity.timeout_seconds);
    println!();
    println!("Transcription:");
    println!("  Mode:     {:?}", cfg.transcription.mode);
    if let Some(ref endpoint) = cfg.transcription.endpoint {
        println!("  Endpoint: {}", endpoint);
    }
    println!("  Model:    {}", cfg.transcription.model);
    println!("  Language: {}", cfg.transcription.language);

    Ok(())
}
