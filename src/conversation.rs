//! Chat turn sequencing.
//!
//! [`Conversation`] keeps the transcript and the pending flag consistent with
//! the one request that may be in flight. A turn is split into [`begin`] and
//! [`settle`] so a front-end can run the request on another task; [`submit`]
//! does both in place.
//!
//! [`begin`]: Conversation::begin
//! [`settle`]: Conversation::settle
//! [`submit`]: Conversation::submit

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::CompletionError;
use crate::provider::CompletionProvider;

pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";
pub const EMPTY_REPLY_APOLOGY: &str = "Sorry, I could not generate a response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Author {
    User,
    Assistant,
}

/// One transcript entry. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    text: String,
    author: Author,
    created_at: DateTime<Utc>,
}

impl Message {
    fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            author,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn author(&self) -> Author {
        self.author
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Transient alert for the front-end to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Blank,
    Pending,
    CredentialRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The user message was appended; send `prompt` and settle with the result.
    Started { prompt: String },
    Rejected(Rejection),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission ignored: {0:?}")]
    Rejected(Rejection),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    pending: bool,
    notifications: VecDeque<Notification>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Start a turn: validate, append the user message, and mark pending.
    pub fn begin(&mut self, text: &str, has_credential: bool) -> Submission {
        if self.pending {
            tracing::debug!("submission ignored while awaiting reply");
            return Submission::Rejected(Rejection::Pending);
        }

        let text = text.trim();
        if text.is_empty() {
            return Submission::Rejected(Rejection::Blank);
        }

        if !has_credential {
            self.notify(Notification::new(
                Severity::Warning,
                "API key required",
                "Set your Gemini API key before sending a message.",
            ));
            return Submission::Rejected(Rejection::CredentialRequired);
        }

        self.messages.push(Message::new(Author::User, text));
        self.pending = true;

        Submission::Started {
            prompt: text.to_string(),
        }
    }

    /// Finish the in-flight turn with the provider's result.
    pub fn settle(&mut self, result: Result<String, CompletionError>) {
        match result {
            Ok(reply) => self.settle_reply(reply),
            Err(err) => self.settle_failure(&err),
        }
    }

    fn settle_reply(&mut self, reply: String) {
        if !self.finish_turn() {
            return;
        }
        self.messages.push(Message::new(Author::Assistant, reply));
    }

    fn settle_failure(&mut self, err: &CompletionError) {
        if !self.finish_turn() {
            return;
        }

        tracing::error!(error = %err, "turn failed");
        let apology = match err {
            CompletionError::EmptyResponse => EMPTY_REPLY_APOLOGY,
            _ => APOLOGY,
        };
        self.messages.push(Message::new(Author::Assistant, apology));
        self.notify(Notification::new(Severity::Error, err.title(), err.to_string()));
    }

    fn finish_turn(&mut self) -> bool {
        if !self.pending {
            tracing::warn!("settle called with no turn in flight");
            return false;
        }
        self.pending = false;
        true
    }

    /// Run one whole turn against `provider`.
    pub async fn submit<P>(&mut self, provider: &P, text: &str) -> Result<String, SubmitError>
    where
        P: CompletionProvider + ?Sized,
    {
        let prompt = match self.begin(text, provider.has_credential()) {
            Submission::Started { prompt } => prompt,
            Submission::Rejected(reason) => return Err(SubmitError::Rejected(reason)),
        };

        match provider.generate(&prompt).await {
            Ok(reply) => {
                self.settle_reply(reply.clone());
                Ok(reply)
            }
            Err(err) => {
                self.settle_failure(&err);
                Err(err.into())
            }
        }
    }
}
