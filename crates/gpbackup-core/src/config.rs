//! Configuration module for gpbackup.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::MediaType;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for gpbackup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub transfer: TransferConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub sweep: SweepConfig,
}

/// Which media types a backup run covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSelection {
    #[default]
    Photo,
    Video,
    All,
}

impl MediaSelection {
    /// The type filter to apply, `None` meaning every type.
    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            MediaSelection::Photo => Some(MediaType::Photo),
            MediaSelection::Video => Some(MediaType::Video),
            MediaSelection::All => None,
        }
    }
}

/// What to do with files under the backup root that no record references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Skip the sweep entirely.
    Ignore,
    /// List orphans in the run summary.
    #[default]
    Report,
    /// Delete orphans and prune the directories they leave empty.
    Delete,
}

/// Backup location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backup directory. Media go to `<dir>/photos`, the index to `<dir>/.data_store`.
    pub dir: PathBuf,
    /// Media types to back up: `photo`, `video` or `all`.
    pub media_type: MediaSelection,
}

/// Download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Upper bound on downloads (and deletions) running at once.
    pub max_concurrent_downloads: u32,
    /// Seconds before a single download is abandoned.
    pub download_timeout_secs: u64,
    /// Attempts per download, including the first one.
    pub max_attempts: u32,
    /// Items requested per page when listing the remote library.
    pub list_page_size: u32,
}

/// OAuth client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Path to the `client_secret.json` downloaded from the Google API console.
    pub client_secret: PathBuf,
    /// OAuth scopes requested at login.
    pub scopes: Vec<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

/// Orphan sweep settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub orphans: OrphanPolicy,
}

/// Read-only scope of the Google Photos Library API.
pub const PHOTOS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/photoslibrary.readonly";

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/gpbackup/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("gpbackup")
            .join("config.yaml")
    }
}

impl BackupConfig {
    /// Root under which media files are placed.
    pub fn photos_dir(&self) -> PathBuf {
        self.dir.join("photos")
    }

    /// Directory holding the index database.
    pub fn data_store_dir(&self) -> PathBuf {
        self.dir.join(".data_store")
    }

    /// SQLite file backing the index.
    pub fn index_path(&self) -> PathBuf {
        self.data_store_dir().join("index.db")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("backup"),
            media_type: MediaSelection::Photo,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            download_timeout_secs: 300,
            max_attempts: 3,
            list_page_size: 100,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secret: PathBuf::from("client_secret.json"),
            scopes: vec![PHOTOS_READONLY_SCOPE.to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"transfer.list_page_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- backup ---
        if self.backup.dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "backup.dir".into(),
                message: "must not be empty".into(),
            });
        }
        if self.backup.dir.is_file() {
            errors.push(ValidationError {
                field: "backup.dir".into(),
                message: format!("is a file, not a directory: {}", self.backup.dir.display()),
            });
        }

        // --- transfer ---
        if self.transfer.max_concurrent_downloads == 0 || self.transfer.max_concurrent_downloads > 32
        {
            errors.push(ValidationError {
                field: "transfer.max_concurrent_downloads".into(),
                message: "must be in range 1..=32".into(),
            });
        }
        if self.transfer.download_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "transfer.download_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.transfer.max_attempts == 0 {
            errors.push(ValidationError {
                field: "transfer.max_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.transfer.list_page_size == 0 || self.transfer.list_page_size > 100 {
            errors.push(ValidationError {
                field: "transfer.list_page_size".into(),
                message: "must be in range 1..=100".into(),
            });
        }

        // --- auth ---
        if self.auth.scopes.is_empty() {
            errors.push(ValidationError {
                field: "auth.scopes".into(),
                message: "at least one scope is required".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use gpbackup_core::config::{ConfigBuilder, MediaSelection};
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .backup_dir(PathBuf::from("/srv/photos-backup"))
///     .backup_media_type(MediaSelection::All)
///     .transfer_max_concurrent_downloads(8)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from disk.
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    // --- backup ---

    pub fn backup_dir(mut self, dir: PathBuf) -> Self {
        self.config.backup.dir = dir;
        self
    }

    pub fn backup_media_type(mut self, selection: MediaSelection) -> Self {
        self.config.backup.media_type = selection;
        self
    }

    // --- transfer ---

    pub fn transfer_max_concurrent_downloads(mut self, n: u32) -> Self {
        self.config.transfer.max_concurrent_downloads = n;
        self
    }

    pub fn transfer_download_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.transfer.download_timeout_secs = seconds;
        self
    }

    pub fn transfer_max_attempts(mut self, n: u32) -> Self {
        self.config.transfer.max_attempts = n;
        self
    }

    pub fn transfer_list_page_size(mut self, n: u32) -> Self {
        self.config.transfer.list_page_size = n;
        self
    }

    // --- auth ---

    pub fn auth_client_secret(mut self, path: PathBuf) -> Self {
        self.config.auth.client_secret = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- sweep ---

    pub fn sweep_orphans(mut self, policy: OrphanPolicy) -> Self {
        self.config.sweep.orphans = policy;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
