pub mod profiles;

use crate::error::{IdcError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_AWS_CLI: &str = "aws";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_LOOKUP_CONCURRENCY: usize = 8;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Profile used when `--profile` is not given
    #[serde(default)]
    pub default_profile: Option<String>,

    /// Region used when `--region` is not given
    #[serde(default)]
    pub default_region: Option<String>,

    /// Path or name of the AWS CLI executable
    #[serde(default = "default_aws_cli")]
    pub aws_cli: String,

    /// Seconds between status polls of async assignment operations
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum concurrent user lookups when resolving group members
    #[serde(default = "default_lookup_concurrency")]
    pub lookup_concurrency: usize,

    #[serde(default)]
    pub log_level: String,
}

fn default_aws_cli() -> String {
    DEFAULT_AWS_CLI.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_lookup_concurrency() -> usize {
    DEFAULT_LOOKUP_CONCURRENCY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: None,
            default_region: None,
            aws_cli: default_aws_cli(),
            poll_interval_secs: default_poll_interval_secs(),
            lookup_concurrency: default_lookup_concurrency(),
            log_level: String::new(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn lookup_concurrency(&self) -> usize {
        self.lookup_concurrency.max(1)
    }
}

/// Configuration manager
#[derive(Clone, Debug)]
pub struct ConfigManager {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("com", "idc-groups", "idc-groups").ok_or_else(|| {
            IdcError::Config("Failed to determine config directory".into())
        })?;

        Ok(Self {
            config_dir: project_dirs.config_dir().to_path_buf(),
            data_dir: project_dirs.data_dir().to_path_buf(),
        })
    }

    /// Manager rooted at an explicit directory (config and data share it)
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            config_dir: dir.clone(),
            data_dir: dir,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Directory for log files, created on demand
    pub fn log_dir(&self) -> Result<PathBuf> {
        let dir = self.data_dir.join("logs");
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    /// Load main config, falling back to defaults when the file is absent
    pub fn load_config(&self) -> Result<Config> {
        let config_path = self.config_file();

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}
