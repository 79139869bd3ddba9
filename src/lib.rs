pub mod config;
pub mod conversation;
pub mod error;
pub mod gemini;
pub mod provider;
pub mod store;

// Re-export main types for convenience
pub use config::Config;
pub use conversation::{Author, Conversation, Message, Notification, Severity, Submission};
pub use error::{CompletionError, ConfigError, CredentialError, StoreError};
pub use gemini::GeminiClient;
pub use provider::CompletionProvider;
pub use store::{FileStore, KeyValueStore, MemoryStore};
