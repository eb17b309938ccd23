//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/smartcompress/config.toml`
//! - Windows: `%APPDATA%/smartcompress/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smartcompress_orchestrator::OrchestratorConfig;
use smartcompress_remote::RemoteConfig;
use smartcompress_transfer::RetryPolicy;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Codec used when `--algorithm` is not given.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Level on the 1–9 scale.
    #[serde(default = "default_level")]
    pub level: u32,

    /// Upload chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Files at or above this many bytes may go to the remote service.
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub remote: RemoteSection,
}

/// `[retry]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

/// `[remote]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSection {
    /// Base URL of the assembly service; the remote route is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_algorithm() -> String {
    smartcompress_codec::DEFAULT_ALGORITHM.into()
}

fn default_level() -> u32 {
    smartcompress_orchestrator::job::DEFAULT_LEVEL
}

fn default_chunk_size() -> u64 {
    smartcompress_transfer::DEFAULT_CHUNK_SIZE
}

fn default_large_file_threshold() -> u64 {
    smartcompress_orchestrator::job::DEFAULT_LARGE_FILE_THRESHOLD
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_initial_delay_ms() -> u64 {
    RetryPolicy::default().initial_delay.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    RetryPolicy::default().max_delay.as_millis() as u64
}

fn default_backoff_factor() -> f64 {
    RetryPolicy::default().backoff_factor
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            level: default_level(),
            chunk_size: default_chunk_size(),
            large_file_threshold: default_large_file_threshold(),
            retry: RetrySection::default(),
            remote: RemoteSection::default(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads `path`, writing the defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // May hold an API token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_factor: self.retry.backoff_factor,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            chunk_size: self.chunk_size,
            large_file_threshold: self.large_file_threshold,
            retry: self.retry_policy(),
        }
    }

    /// Client settings, or `None` when no remote URL is configured.
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        let url = self.remote.url.as_deref()?;
        let mut remote = RemoteConfig::new(url);
        remote.token = self.remote.token.clone();
        remote.timeout = Duration::from_secs(self.remote.timeout_secs);
        Some(remote)
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata)
            .join("smartcompress")
            .join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("smartcompress")
            .join("config.toml"))
    }
}
