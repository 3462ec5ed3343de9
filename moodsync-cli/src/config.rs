use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use moodsync_core::{BackoffPolicy, SyncConfig};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Sync settings from the `sync:` section
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncSettings {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// API key for authentication
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Sync before reads and after writes (default: false)
    #[serde(default)]
    pub auto_sync: bool,
    pub batch_size: Option<usize>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub delay_ceiling_secs: Option<u64>,
    pub upload_workers: Option<usize>,
}

impl SyncSettings {
    /// Returns true if sync is configured (has both server_url and api_key)
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.api_key.is_some()
    }

    /// Engine tuning, with unset keys left at the engine defaults.
    pub fn engine_config(&self) -> SyncConfig {
        let mut config = SyncConfig::default();
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if self.backoff_base_ms.is_some() || self.backoff_cap_ms.is_some() {
            let base = self
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(config.backoff.base);
            let cap = self
                .backoff_cap_ms
                .map(Duration::from_millis)
                .unwrap_or(config.backoff.cap);
            config = config.with_backoff(BackoffPolicy::new(base, cap.max(base)));
        }
        if let Some(secs) = self.delay_ceiling_secs {
            config = config.with_delay_ceiling(Duration::from_secs(secs));
        }
        if let Some(workers) = self.upload_workers {
            config = config.with_upload_workers(workers);
        }
        config
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Owner stamped on new entries; must match the server's owner for the API key
    pub owner: ConfigValue<String>,
    /// Device salt for entry ids; generated and remembered in the database when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncSettings,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    owner: Option<String>,
    device_id: Option<String>,
    sync: Option<SyncSettings>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with(config_path, |name| std::env::var(name).ok())
    }

    fn load_with(
        config_path: Option<PathBuf>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("mood.db"),
            ConfigSource::Default,
        );
        let mut owner = ConfigValue::new("me".to_string(), ConfigSource::Default);
        let mut device_id = None;
        let mut config_file = None;
        let mut sync = SyncSettings::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(name) = file_config.owner {
                owner = ConfigValue::new(name, ConfigSource::File);
            }
            device_id = file_config.device_id;
            if let Some(sync_settings) = file_config.sync {
                sync = sync_settings;
            }
        }

        if let Some(db_path) = var("MOOD_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(name) = var("MOOD_OWNER") {
            owner = ConfigValue::new(name, ConfigSource::Environment);
        }
        if let Some(url) = var("MOOD_SYNC_URL") {
            sync.server_url = Some(url);
        }
        if let Some(key) = var("MOOD_SYNC_API_KEY") {
            sync.api_key = Some(key);
        }

        Ok(Self {
            database_path,
            owner,
            device_id,
            config_file,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/mood/
    /// - macOS: ~/Library/Application Support/mood/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mood")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/mood/
    /// - macOS: ~/Library/Application Support/mood/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mood")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
