//! Configuration for gymvault.
//!
//! Values are layered with [`figment`], later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. `config.toml` in the platform configuration directory
//! 3. An explicit file given by the caller (TOML, YAML or JSON by extension)
//! 4. Environment variables prefixed with `GYMVAULT_`, nested keys separated
//!    by a double underscore (`GYMVAULT_BACKUP__MAX_BACKUPS=10`)
//!
//! ```toml
//! database = "/srv/gym/data/gym.db"
//!
//! [backup]
//! directory = "/srv/gym/backups"
//! max_backups = 30
//! compress_after_days = 7
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use gymvault_compress::Compression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "GYMVAULT_";
const CONFIG_FILE: &str = "config.toml";
const SECONDS_PER_HOUR: u64 = 60 * 60;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "gymvault")
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the live SQLite database.
    pub database: PathBuf,
    pub backup: BackupConfig,
}

/// Settings for snapshot creation, retention and scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding snapshots and the catalog document.
    pub directory: PathBuf,
    /// File name prefix of every snapshot: `<prefix>_<YYYYMMDD_HHMMSS>.<ext>`.
    pub prefix: String,
    /// Hours between scheduled backups.
    pub auto_backup_interval_hours: u64,
    /// Number of snapshots kept; the oldest are deleted beyond this.
    pub max_backups: usize,
    /// Snapshots older than this many days are compressed.
    pub compress_after_days: u32,
    /// Check snapshot digests before restoring.
    pub verify_integrity: bool,
    /// Format used for aged snapshots; `none` disables compression.
    pub compression: Compression,
}

impl Default for Config {
    fn default() -> Self {
        let data = project_dirs().map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_else(|| PathBuf::from("data"));
        Self {
            database: data.join("gym.db"),
            backup: BackupConfig { directory: data.join("backups"), ..BackupConfig::default() },
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("backups"),
            prefix: "gym_backup".to_string(),
            auto_backup_interval_hours: 24,
            max_backups: 30,
            compress_after_days: 7,
            verify_integrity: true,
            compression: Compression::Gzip,
        }
    }
}

impl Config {
    /// Location of the default configuration file, if the platform has a
    /// configuration directory.
    pub fn default_file() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Build the layered [`Figment`] without extracting it.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(default) = Self::default_file() {
            // A missing default file is fine: Toml::file() yields nothing.
            figment = figment.merge(Toml::file(default));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            let extension = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase);
            figment = match extension.as_deref() {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration from every source.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = Self::from_figment(Self::figment(explicit)?)?;
        tracing::debug!(
            database = %config.database.display(),
            backups = %config.backup.directory.display(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Extract and validate a configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("database path must not be empty".to_string()));
        }
        self.backup.validate()
    }
}

impl BackupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("backup directory must not be empty".to_string()));
        }
        if self.prefix.is_empty()
            || !self.prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            exn::bail!(ErrorKind::Invalid(format!(
                "backup prefix `{}` must be non-empty and use only letters, digits, `_` or `-`",
                self.prefix
            )));
        }
        if self.max_backups == 0 {
            exn::bail!(ErrorKind::Invalid("max_backups must be at least 1".to_string()));
        }
        if self.auto_backup_interval_hours == 0 {
            exn::bail!(ErrorKind::Invalid("auto_backup_interval_hours must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Time between scheduled backups.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.auto_backup_interval_hours.saturating_mul(SECONDS_PER_HOUR))
    }

    /// Age after which a snapshot gets compressed.
    pub fn compress_after(&self) -> Duration {
        Duration::from_secs(u64::from(self.compress_after_days) * SECONDS_PER_DAY)
    }
}
