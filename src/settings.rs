//! Last-used farm, queue and channel, remembered between runs.
//!
//! Stored as JSON in the user's home directory. The job controller never
//! touches this; the CLI reads it before a run and writes it once the IDs
//! have passed validation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const SETTINGS_FILE: &str = ".deadline_software_viewer.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub farm_id: String,
    #[serde(default)]
    pub queue_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conda_channel: Option<String>,
}

impl Settings {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }

    pub fn farm_id(&self) -> Option<&str> {
        Self::non_empty(&self.farm_id)
    }

    pub fn queue_id(&self) -> Option<&str> {
        Self::non_empty(&self.queue_id)
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in `$HOME`, or the working directory when `HOME` is unset.
    pub fn default_location() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default();
        Self::new(home.join(SETTINGS_FILE))
    }

    /// Missing or unreadable settings are not an error; defaults are used.
    pub fn load(&self) -> Settings {
        if !self.path.exists() {
            return Settings::default();
        }

        let parsed: Result<Settings> = std::fs::read_to_string(&self.path)
            .context("Failed to read settings file")
            .and_then(|content| {
                serde_json::from_str(&content).context("Failed to parse settings file")
            });

        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %self.path.display(), error = %format!("{:#}", e), "Ignoring saved settings");
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create settings directory")?;
            }
        }

        let content =
            serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
        std::fs::write(&self.path, content).context("Failed to write settings file")?;
        Ok(())
    }
}
