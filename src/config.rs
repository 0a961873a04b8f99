// Configuration save/restore functionality

use crate::controller::Timing;
use crate::limit::{Rate, ShapingLimit};
use crate::session::Session;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_DIR: &str = ".config/netlimit";
const CONFIG_FILE: &str = "config.json";

/// Configuration file structure
///
/// The stored limit only seeds the UI; nothing is applied on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Download (or single) limit in Kbps
    pub download_kbps: u64,

    /// Upload limit in Kbps, used in split mode
    pub upload_kbps: u64,

    /// Shape download and upload independently
    pub split_mode: bool,

    /// Preferred shaping backend ("dummynet", "tc")
    pub preferred_backend: Option<String>,

    /// Preferred elevation mechanism ("osascript", "pkexec", "direct")
    pub preferred_elevator: Option<String>,

    /// Interface for the tc backend (auto-detected when unset)
    pub interface: Option<String>,

    pub readiness_timeout_ms: u64,
    pub readiness_poll_ms: u64,
    pub helper_poll_ms: u64,
    pub grace_period_ms: u64,

    /// Ask the helper to acknowledge every update
    pub acknowledge: bool,

    /// Directory for the session files (OS temp dir when unset)
    pub session_dir: Option<PathBuf>,

    /// Session id (one controller per id per host)
    pub session_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_kbps: 100_000,
            upload_kbps: 100_000,
            split_mode: false,
            preferred_backend: None,
            preferred_elevator: None,
            interface: None,
            readiness_timeout_ms: 2000,
            readiness_poll_ms: 100,
            helper_poll_ms: 200,
            grace_period_ms: 1000,
            acknowledge: false,
            session_dir: None,
            session_id: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        let config_dir = home.join(CONFIG_DIR);

        fs::create_dir_all(&config_dir).context(format!(
            "Failed to create config directory: {:?}",
            config_dir
        ))?;

        Ok(config_dir.join(CONFIG_FILE))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            log::debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(&path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents).context(format!("Failed to write config file: {:?}", path))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Stored limit, clamped into the valid range
    pub fn limit(&self) -> ShapingLimit {
        let download = Rate::clamped(self.download_kbps);
        if self.split_mode {
            ShapingLimit::Split {
                download,
                upload: Rate::clamped(self.upload_kbps),
            }
        } else {
            ShapingLimit::Single(download)
        }
    }

    /// Remember `limit` as the UI's starting point
    pub fn set_limit(&mut self, limit: &ShapingLimit) {
        self.split_mode = limit.is_split();
        self.download_kbps = u64::from(limit.download().kbps());
        if limit.is_split() {
            self.upload_kbps = u64::from(limit.upload().kbps());
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            readiness_timeout: Duration::from_millis(self.readiness_timeout_ms),
            readiness_poll: Duration::from_millis(self.readiness_poll_ms.max(1)),
            helper_poll: Duration::from_millis(self.helper_poll_ms.max(1)),
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }

    pub fn session(&self) -> Session {
        Session::from_overrides(self.session_dir.as_deref(), self.session_id.as_deref())
    }
}
