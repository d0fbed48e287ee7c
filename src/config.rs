use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::threads::ThreadRules;

pub const CONFIG_ENV: &str = "REMAIL_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to determine home directory")]
    NoHome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GmailSettings {
    pub api_base: Option<String>,
    pub access_token: Option<String>,
    /// Pub/Sub topic push notifications are published to.
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub data_dir: Option<PathBuf>,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_in_flight: usize,
    pub max_retries: u32,
    pub latency_ceiling_secs: u64,
    pub listen_concurrency: usize,
    pub gmail: GmailSettings,
    pub threads: ThreadRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            batch_size: 25,
            batch_delay_ms: 1000,
            max_in_flight: 1,
            max_retries: 3,
            latency_ceiling_secs: 30,
            listen_concurrency: 8,
            gmail: GmailSettings::default(),
            threads: ThreadRules::default(),
        }
    }
}

impl Settings {
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        Ok(home.join(".remail").join("config.json"))
    }

    /// Loads settings from `path`, else `$REMAIL_CONFIG`, else the default
    /// location. Only the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let (path, required) = match explicit {
            Some(path) => (path, true),
            None => (Self::default_config_path()?, false),
        };

        if !required && !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("batch_size", self.batch_size),
            ("max_in_flight", self.max_in_flight),
            ("max_retries", self.max_retries as usize),
            ("listen_concurrency", self.listen_concurrency),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
        }

        if self.threads.max_gap_hours.is_nan() || self.threads.max_gap_hours <= 0.0 {
            return Err(ConfigError::Invalid(
                "threads.max_gap_hours must be positive".to_string(),
            ));
        }
        if let Some(floor) = self.threads.min_relevance {
            if !(0.0..=1.0).contains(&floor) {
                return Err(ConfigError::Invalid(format!(
                    "threads.min_relevance {floor} is outside [0, 1]"
                )));
            }
        }

        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".remail")),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("remail.db"))
    }

    pub fn blob_root(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("blobs"))
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn latency_ceiling(&self) -> Duration {
        Duration::from_secs(self.latency_ceiling_secs)
    }
}
