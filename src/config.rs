//! Configuration for memoiries.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MEMOIRIES_HOME, MEMOIRIES_USER, MEMOIRIES_TRANSCRIPTION_ENDPOINT)
//! 2. Config file (.memoiries/config.yaml)
//! 3. Defaults (~/.memoiries)
//!
//! Config file discovery:
//! - Searches current directory and parents for .memoiries/config.yaml
//! - `paths.home` is relative to the .memoiries/ directory; the other
//!   paths are relative to home

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::assets::DEFAULT_CHUNK_SIZE;
use crate::domain::UserId;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".memoiries";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    /// Identity used for captures and transcription requests
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub assets: Option<AssetsConfig>,
    #[serde(default)]
    pub connectivity: Option<ConnectivityConfig>,
    #[serde(default)]
    pub transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .memoiries/)
    pub home: Option<String>,
    pub cache: Option<String>,
    pub records: Option<String>,
    pub assets: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    pub base_url: Option<String>,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    pub probe_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    pub mode: Option<TranscriptionMode>,
    pub endpoint: Option<String>,
    pub whisper_path: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
}

/// Where transcription jobs run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionMode {
    /// In-process worker shelling out to whisper
    #[default]
    Local,
    /// Remote job endpoint
    Http,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to memoiries home
    pub home: PathBuf,
    /// Draft and session cache
    pub cache_dir: PathBuf,
    /// Item records and user profiles
    pub records_dir: PathBuf,
    /// Uploaded photos and audio
    pub assets_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub user: Option<UserId>,
    pub assets: AssetSettings,
    pub connectivity: ConnectivitySettings,
    pub transcription: TranscriptionSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSettings {
    /// Public URL prefix; `None` means `file://` URLs under the assets dir
    pub base_url: Option<String>,
    pub chunk_size: usize,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivitySettings {
    /// `None` means always online
    pub probe_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            probe_url: None,
            timeout_seconds: 5,
        }
    }
}

impl ConnectivitySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionSettings {
    pub mode: TranscriptionMode,
    pub endpoint: Option<String>,
    pub whisper_path: Option<String>,
    pub model: String,
    pub language: String,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            mode: TranscriptionMode::Local,
            endpoint: None,
            whisper_path: None,
            model: "base".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge config file values, environment and defaults
fn resolve_config(
    config_path: Option<&Path>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let file = config_path.map(load_config_file).transpose()?;
    let config_dir = config_path.and_then(Path::parent).unwrap_or(Path::new("."));
    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

    let home = if let Some(env_home) = env("MEMOIRIES_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = paths.home {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let under_home = |configured: &Option<String>, default: &str| match configured {
        Some(path) => resolve_path(&home, path),
        None => home.join(default),
    };
    let cache_dir = under_home(&paths.cache, "cache");
    let records_dir = under_home(&paths.records, "records");
    let assets_dir = under_home(&paths.assets, "assets");

    let user = env("MEMOIRIES_USER")
        .or_else(|| file.as_ref().and_then(|f| f.user.clone()))
        .map(UserId::from);

    let assets_file = file.as_ref().and_then(|f| f.assets.as_ref());
    let assets = AssetSettings {
        base_url: assets_file.and_then(|a| a.base_url.clone()),
        chunk_size: assets_file
            .and_then(|a| a.chunk_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_CHUNK_SIZE),
    };

    let connectivity_file = file.as_ref().and_then(|f| f.connectivity.as_ref());
    let connectivity = ConnectivitySettings {
        probe_url: connectivity_file.and_then(|c| c.probe_url.clone()),
        timeout_seconds: connectivity_file
            .and_then(|c| c.timeout_seconds)
            .unwrap_or(5),
    };

    let transcription_file = file.as_ref().and_then(|f| f.transcription.as_ref());
    let defaults = TranscriptionSettings::default();
    let endpoint = env("MEMOIRIES_TRANSCRIPTION_ENDPOINT")
        .or_else(|| transcription_file.and_then(|t| t.endpoint.clone()));
    let transcription = TranscriptionSettings {
        // An endpoint from the environment switches to remote jobs unless a mode is pinned
        mode: transcription_file
            .and_then(|t| t.mode)
            .unwrap_or(if endpoint.is_some() {
                TranscriptionMode::Http
            } else {
                TranscriptionMode::Local
            }),
        endpoint,
        whisper_path: transcription_file.and_then(|t| t.whisper_path.clone()),
        model: transcription_file
            .and_then(|t| t.model.clone())
            .unwrap_or(defaults.model),
        language: transcription_file
            .and_then(|t| t.language.clone())
            .unwrap_or(defaults.language),
    };

    Ok(ResolvedConfig {
        home,
        cache_dir,
        records_dir,
        assets_dir,
        config_file: config_path.map(Path::to_path_buf),
        user,
        assets,
        connectivity,
        transcription,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file();
    resolve_config(config_file.as_deref(), default_home, |key| {
        std::env::var(key).ok()
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
