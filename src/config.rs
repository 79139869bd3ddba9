use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const APP_DIR: &str = "gemini-chat";
pub const DEFAULT_MODEL: &str = "gemini-pro";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Model name substituted into the default endpoint.
    pub model: Option<String>,
    /// Full `generateContent` URL; takes precedence over `model`.
    pub endpoint: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_dir()?)
    }

    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join("config.json");

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save_to(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir)?;

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(dir.join("config.json"), config_content)?;
        Ok(())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("{}/{}:generateContent", API_BASE, self.model()),
        }
    }

    /// `~/.config/gemini-chat` on Linux, the platform equivalent elsewhere.
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR))
    }
}
