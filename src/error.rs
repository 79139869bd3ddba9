use reqwest::StatusCode;
use thiserror::Error;

/// Failures of a single `generate` call.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Gemini API key is not configured")]
    MissingCredential,

    #[error("Gemini API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Gemini returned no candidates")]
    EmptyResponse,

    #[error("Request to Gemini failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Reply task failed: {0}")]
    TaskFailed(String),
}

impl CompletionError {
    /// Short title used for user-facing notifications.
    pub fn title(&self) -> &'static str {
        match self {
            Self::MissingCredential => "API key required",
            Self::Api { .. } => "API error",
            Self::EmptyResponse => "Empty response",
            Self::Transport(_) => "Network error",
            Self::TaskFailed(_) => "Request failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("API key must not be empty")]
    Empty,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}
