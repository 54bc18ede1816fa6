use crate::error::{Result, StowageError};
use crate::job::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level Stowage configuration stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StowageConfig {
    pub stowage: StowageSettings,
    #[serde(default)]
    pub s3: S3Settings,
    #[serde(default)]
    pub restore: RestoreSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StowageSettings {
    /// Destination, e.g. `s3://bucket/backups/` or `file:///srv/backups`.
    pub target_uri: String,
    /// Part size for multipart uploads, in MiB.
    #[serde(default = "default_upload_chunk_size_mib")]
    pub upload_chunk_size_mib: u64,
    #[serde(default = "default_max_parallel_uploads")]
    pub max_parallel_uploads: usize,
    /// Ceiling for a single retry delay, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Total retry budget per volume, in seconds.
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// S3 connection options. Credentials come from the environment or profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Settings {
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint URL for S3-compatible services (MinIO, Garage, etc.)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Use path-style addressing. Defaults to true when `endpoint_url` is set.
    #[serde(default)]
    pub path_style: Option<bool>,
    /// Storage class applied to uploaded volumes (e.g. `GLACIER`).
    #[serde(default)]
    pub storage_class: Option<String>,
}

/// How archived objects are brought back before download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreSettings {
    /// Days a restored copy stays readable.
    #[serde(default = "default_restore_days")]
    pub days: i32,
    /// Retrieval tier: `Expedited`, `Standard` or `Bulk`.
    #[serde(default = "default_restore_tier")]
    pub tier: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_interval_secs")]
    pub max_poll_interval_secs: u64,
    /// Give up waiting on a restore after this many seconds.
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,
}

impl Default for RestoreSettings {
    fn default() -> Self {
        Self {
            days: default_restore_days(),
            tier: default_restore_tier(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_interval_secs: default_max_poll_interval_secs(),
            max_poll_secs: default_max_poll_secs(),
        }
    }
}

impl RestoreSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_secs)
    }

    pub fn max_poll(&self) -> Duration {
        Duration::from_secs(self.max_poll_secs)
    }
}

fn default_upload_chunk_size_mib() -> u64 {
    10
}

fn default_max_parallel_uploads() -> usize {
    crate::job::DEFAULT_MAX_PARALLEL_UPLOADS
}

fn default_max_backoff_secs() -> u64 {
    crate::job::DEFAULT_MAX_BACKOFF.as_secs()
}

fn default_max_retry_secs() -> u64 {
    crate::job::DEFAULT_MAX_RETRY.as_secs()
}

fn default_restore_days() -> i32 {
    3
}

fn default_restore_tier() -> String {
    "Bulk".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_max_poll_interval_secs() -> u64 {
    15 * 60
}

fn default_max_poll_secs() -> u64 {
    48 * 60 * 60
}

impl StowageConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StowageError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| StowageError::TomlDe(e.to_string()))?;
        tracing::debug!(path = %path.display(), uri = %config.stowage.target_uri, "loaded config");
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StowageError::TomlSer(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config for `stowage init`: a local directory target under the base dir.
    pub fn default_config(base_dir: &Path) -> Self {
        Self {
            stowage: StowageSettings {
                target_uri: format!("file://{}", base_dir.join("storage").display()),
                upload_chunk_size_mib: default_upload_chunk_size_mib(),
                max_parallel_uploads: default_max_parallel_uploads(),
                max_backoff_secs: default_max_backoff_secs(),
                max_retry_secs: default_max_retry_secs(),
                failure_policy: FailurePolicy::default(),
            },
            s3: S3Settings::default(),
            restore: RestoreSettings::default(),
        }
    }

    /// Part size in bytes.
    pub fn upload_chunk_size(&self) -> u64 {
        self.stowage.upload_chunk_size_mib * 1024 * 1024
    }

    /// Resolve the config file path: `<base_dir>/stowage.toml`
    pub fn default_path(base_dir: &Path) -> PathBuf {
        base_dir.join("stowage.toml")
    }

    /// Resolve the default stowage home directory: `~/.stowage`
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".stowage"))
            .ok_or_else(|| StowageError::Config("Cannot determine home directory".to_string()))
    }
}
