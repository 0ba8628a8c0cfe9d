use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BadRecordPolicy, KboxError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub show: ShowConfig,
    pub heartbeat: HeartbeatConfig,
}

impl AppConfig {
    /// Loads a JSON configuration file. Missing sections take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.show.reload_interval_secs == 0 {
            return Err(KboxError::Config(
                "show.reload_interval_secs must be positive".to_string(),
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(KboxError::Config(
                "heartbeat.interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the show lives on disk and how often it is rescanned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowConfig {
    pub show_path: PathBuf,
    pub default_song: String,
    pub reload_interval_secs: u64,
    pub bad_record: BadRecordPolicy,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            show_path: PathBuf::from("show/"),
            default_song: "oh_darling".to_string(),
            reload_interval_secs: 5,
            bad_record: BadRecordPolicy::Skip,
        }
    }
}

impl ShowConfig {
    pub fn songs_dir(&self) -> PathBuf {
        self.show_path.join("songs")
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

/// Configuration of the heartbeat clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
