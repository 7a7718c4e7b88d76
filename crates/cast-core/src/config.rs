//! Agent configuration.
//!
//! # Hierarchy
//!
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/cast/config.toml`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`CAST_DATA_ROOT`, `CAST_LOG_LEVEL`)
//!
//! Each file only overrides the keys it names. Relative resource directories
//! are resolved against `data_root` after all layers are applied.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Root of everything the agent stores on disk
    pub data_root: PathBuf,
    pub bundle_dir: PathBuf,
    pub instance_dir: PathBuf,
    pub signing_request_dir: PathBuf,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobsConfig {
    /// Finished jobs kept in the job history
    pub max_retained: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/opt/cast"),
            bundle_dir: PathBuf::from("bundles"),
            instance_dir: PathBuf::from("applications"),
            signing_request_dir: PathBuf::from("ca/requests"),
            log_level: "info".to_string(),
            jobs: JobsConfig::default(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { max_retained: 1000 }
    }
}

/// A config file as written on disk: every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    data_root: Option<PathBuf>,
    bundle_dir: Option<PathBuf>,
    instance_dir: Option<PathBuf>,
    signing_request_dir: Option<PathBuf>,
    log_level: Option<String>,
    jobs: Option<PartialJobsConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialJobsConfig {
    max_retained: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy
///
/// # Errors
///
/// Returns error if:
/// - `explicit` is given but cannot be read
/// - A config file is malformed TOML or names unknown keys
/// - An environment override is invalid
/// - Config values fail validation
pub async fn load_config(explicit: Option<&Path>) -> Result<AgentConfig> {
    let global = global_config_path().ok().filter(|path| path.exists());
    load_layers(global.as_deref(), explicit).await
}

impl AgentConfig {
    /// Parse a complete or partial TOML document over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` on malformed TOML or unknown keys, or
    /// `InvalidConfig` if the result fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config = Self::default();
        config.merge(toml::from_str(content)?);
        config.validate()?;
        Ok(config)
    }

    /// Directory holding bundles
    #[must_use]
    pub fn bundle_root(&self) -> PathBuf {
        self.resolve(&self.bundle_dir)
    }

    /// Directory holding application instances
    #[must_use]
    pub fn instance_root(&self) -> PathBuf {
        self.resolve(&self.instance_dir)
    }

    /// Directory holding certificate signing requests
    #[must_use]
    pub fn signing_request_root(&self) -> PathBuf {
        self.resolve(&self.signing_request_dir)
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.data_root.join(dir)
        }
    }

    fn merge(&mut self, other: PartialConfig) {
        if let Some(data_root) = other.data_root {
            self.data_root = data_root;
        }
        if let Some(bundle_dir) = other.bundle_dir {
            self.bundle_dir = bundle_dir;
        }
        if let Some(instance_dir) = other.instance_dir {
            self.instance_dir = instance_dir;
        }
        if let Some(signing_request_dir) = other.signing_request_dir {
            self.signing_request_dir = signing_request_dir;
        }
        if let Some(log_level) = other.log_level {
            self.log_level = log_level;
        }
        if let Some(max_retained) = other.jobs.and_then(|jobs| jobs.max_retained) {
            self.jobs.max_retained = max_retained;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_vars(&mut self) -> Result<()> {
        // CAST_DATA_ROOT
        if let Ok(value) = std::env::var("CAST_DATA_ROOT") {
            if value.is_empty() {
                return Err(Error::InvalidConfig(
                    "CAST_DATA_ROOT cannot be empty".to_string(),
                ));
            }
            self.data_root = PathBuf::from(value);
        }

        // CAST_LOG_LEVEL
        if let Ok(value) = std::env::var("CAST_LOG_LEVEL") {
            self.log_level = value;
        }

        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any directory is empty, the log level is unknown or
    /// `jobs.max_retained` is zero
    pub fn validate(&self) -> Result<()> {
        let dirs = [
            ("data_root", &self.data_root),
            ("bundle_dir", &self.bundle_dir),
            ("instance_dir", &self.instance_dir),
            ("signing_request_dir", &self.signing_request_dir),
        ];
        if let Some((key, _)) = dirs.iter().find(|(_, dir)| dir.as_os_str().is_empty()) {
            return Err(Error::InvalidConfig(format!("{key} cannot be empty")));
        }

        let level = self.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            )));
        }

        if self.jobs.max_retained == 0 {
            return Err(Error::InvalidConfig(
                "jobs.max_retained must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

async fn load_layers(global: Option<&Path>, explicit: Option<&Path>) -> Result<AgentConfig> {
    // 1. Start with built-in defaults
    let mut config = AgentConfig::default();

    // 2. Global config, if present
    if let Some(path) = global {
        config.merge(load_toml_file(path).await?);
    }

    // 3. Explicit config file; must exist when given
    if let Some(path) = explicit {
        config.merge(load_toml_file(path).await?);
    }

    // 4. Environment overrides
    config.apply_env_vars()?;

    config.validate()?;
    tracing::debug!(data_root = %config.data_root.display(), "Loaded configuration");
    Ok(config)
}

/// Get path to global config file
fn global_config_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "cast")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
        .ok_or_else(|| Error::Io("Failed to determine global config directory".to_string()))
}

/// Load a TOML file into a partial config
async fn load_toml_file(path: &Path) -> Result<PartialConfig> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Io(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::ParseError(format!("Failed to parse config: {}: {e}", path.display())))
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
