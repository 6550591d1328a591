//! Host settings persistence
//!
//! Stores bridge defaults in the platform-specific app data folder:
//! - Linux: ~/.config/s3-bridge/settings.json
//! - Windows: %APPDATA%/s3-bridge/settings.json
//! - macOS: ~/Library/Application Support/s3-bridge/settings.json

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dispatcher::{DispatcherConfig, DEFAULT_EXPIRATION_SECS};
use crate::resolver::EndpointDefaults;

/// Environment variable overriding the stored endpoint
pub const ENDPOINT_ENV_VAR: &str = "S3_BRIDGE_ENDPOINT_URL";

fn default_expiration_secs() -> u64 {
    DEFAULT_EXPIRATION_SECS
}

/// Settings that persist between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Endpoint used when `initialize` does not name one (S3-compatible providers)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    /// Lifetime of signed URLs when the caller gives none
    #[serde(default = "default_expiration_secs")]
    pub default_expiration_secs: u64,

    /// Region of the last successful initialize
    #[serde(default)]
    pub last_region: Option<String>,

    /// Bucket of the last successful initialize
    #[serde(default)]
    pub last_bucket: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            force_path_style: false,
            default_expiration_secs: DEFAULT_EXPIRATION_SECS,
            last_region: None,
            last_bucket: None,
        }
    }
}

impl Settings {
    /// Load settings from disk, returning defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Settings file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;

        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {:?}", path))?;

        tracing::info!(
            "Loaded settings: endpoint={:?}, bucket={:?}, region={:?}",
            settings.endpoint_url,
            settings.last_bucket,
            settings.last_region
        );

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {:?}", path))?;

        tracing::debug!("Saved settings to {:?}", path);

        Ok(())
    }

    /// Get the path to the settings file
    fn settings_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "s3-bridge", "s3-bridge")
            .context("Failed to determine settings directory")?;

        Ok(proj_dirs.config_dir().join("settings.json"))
    }

    /// Apply the endpoint override, if set and non-empty
    pub fn with_endpoint_override(mut self, endpoint: Option<String>) -> Self {
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            self.endpoint_url = Some(endpoint);
        }
        self
    }

    /// Apply overrides from the environment
    pub fn with_env_overrides(self) -> Self {
        self.with_endpoint_override(std::env::var(ENDPOINT_ENV_VAR).ok())
    }

    /// Update the last initialized location
    pub fn set_location(&mut self, region: Option<&str>, bucket: Option<&str>) {
        self.last_region = region.map(|s| s.to_string());
        self.last_bucket = bucket.map(|s| s.to_string());
    }

    /// Defaults handed to the dispatcher
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            endpoint: EndpointDefaults {
                endpoint_url: self.endpoint_url.clone(),
                force_path_style: self.force_path_style,
            },
            default_expiration_secs: self.default_expiration_secs,
        }
    }
}
