//! Configuration loading and root folder resolution
//!
//! Resolution follows a fixed priority order for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "FSCORE_ROOT_FOLDER";

/// Environment variable overriding the TOML config path
pub const CONFIG_PATH_ENV: &str = "FSCORE_CONFIG";

/// Default number of users per scoring request
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default login attempts before giving up
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Default fixed delay between login attempts
pub const DEFAULT_LOGIN_RETRY_DELAY_SECS: u64 = 5;

/// Default criterion the scoring service is asked to rate users on
pub const DEFAULT_RUBRIC: &str =
    "how constructive and on-topic their contributions to the discussion are";

/// Bootstrap configuration loaded from TOML
///
/// Every section is optional; a missing file yields `TomlConfig::default()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding `data/` and `cookies/`
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub credentials: CredentialsConfig,
    pub pipeline: PipelineSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Scoring service connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the conversational endpoint (no default, must be configured)
    pub base_url: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Minimum spacing between two requests to the service
    pub min_request_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 60,
            min_request_interval_ms: 1000,
        }
    }
}

/// Account used to log in to the scoring service
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Batch pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub max_login_attempts: u32,
    pub login_retry_delay_secs: u64,
    /// Criterion embedded in every scoring prompt
    pub rubric: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            login_retry_delay_secs: DEFAULT_LOGIN_RETRY_DELAY_SECS,
            rubric: DEFAULT_RUBRIC.to_string(),
        }
    }
}

/// Resolve the TOML config path
///
/// CLI argument → `FSCORE_CONFIG` → platform config dir. Returns `None`
/// when no file exists at any default location.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("fscore").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fscore/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Where a new config file is written when none exists yet
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("fscore").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("fscore.toml"))
}

/// Load TOML config, falling back to defaults when `path` is `None` or absent
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        debug!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        debug!("Config file {} not found, using compiled defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    if config.pipeline.batch_size == 0 {
        return Err(Error::Config(format!(
            "{}: pipeline.batch_size must be at least 1",
            path.display()
        )));
    }
    if config.pipeline.max_login_attempts == 0 {
        return Err(Error::Config(format!(
            "{}: pipeline.max_login_attempts must be at least 1",
            path.display()
        )));
    }

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML config atomically with owner-only permissions
///
/// The file may carry the service password, hence the 0600 mode on Unix.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Serialization(format!("TOML encode failed: {}", e)))?;
    crate::fs::write_atomic(path, content.as_bytes())?;
    crate::fs::set_owner_only(path)?;
    Ok(())
}

/// Root folder resolution: CLI → `FSCORE_ROOT_FOLDER` → TOML → OS default
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        default_root_folder()
    }
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fscore"))
        .unwrap_or_else(|| PathBuf::from("./fscore_data"))
}

/// Known file locations below the root folder
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create `data/` and `cookies/` if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.cookie_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Evidence Store written by the forum harvester
    pub fn evidence_path(&self) -> PathBuf {
        self.data_dir().join("user_db.json")
    }

    /// Raw replies captured from the scoring service
    pub fn raw_log_path(&self) -> PathBuf {
        self.data_dir().join("raw_responses.jsonl")
    }

    /// Normalized user → score mapping
    pub fn scores_path(&self) -> PathBuf {
        self.data_dir().join("analyzed_db.json")
    }

    pub fn cookie_dir(&self) -> PathBuf {
        self.root.join("cookies")
    }
}
