use std::collections::VecDeque;

use gemini_chat::conversation::Rejection;
use gemini_chat::{
    CompletionError, Conversation, CredentialError, GeminiClient, Notification, Severity,
    Submission,
};
use tokio::task::JoinHandle;

/// Ticks a notification stays on screen (ticks are 300ms).
const TOAST_TICKS: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Single-line text field with a character-indexed cursor.
#[derive(Debug, Default, Clone)]
pub struct LineInput {
    text: String,
    cursor: usize,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

impl LineInput {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.text, self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.char_count() {
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.char_count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.char_count();
    }
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub model: String,

    // Chat state
    pub input: LineInput,
    pub conversation: Conversation,
    pub reply_task: Option<JoinHandle<Result<String, CompletionError>>>,
    pub chat_scroll: u16,
    pub chat_height: u16, // inner height of the transcript pane
    pub chat_width: u16,  // inner width, for wrap estimates

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // API key popup
    pub show_api_key_input: bool,
    pub api_key_input: LineInput,

    // Toasts, front one is visible
    pub notifications: VecDeque<Notification>,
    pub toast_ticks: u8,

    pub client: GeminiClient,
}

impl App {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        // Ask for a key straight away when none is stored.
        let show_api_key_input = client.credential().is_none();

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            model: model.into(),

            input: LineInput::default(),
            conversation: Conversation::new(),
            reply_task: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            animation_frame: 0,

            show_api_key_input,
            api_key_input: LineInput::default(),

            notifications: VecDeque::new(),
            toast_ticks: TOAST_TICKS,

            client,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.conversation.is_pending()
    }

    pub fn submit_input(&mut self) {
        let has_key = self.client.credential().is_some();
        match self.conversation.begin(self.input.as_str(), has_key) {
            Submission::Started { prompt } => {
                self.input.clear();
                let client = self.client.clone();
                self.reply_task = Some(tokio::spawn(async move { client.generate(&prompt).await }));
                self.scroll_to_bottom();
            }
            Submission::Rejected(Rejection::CredentialRequired) => self.open_api_key_input(),
            Submission::Rejected(_) => {}
        }
        self.collect_notifications();
    }

    /// Settle the conversation once the reply task has finished.
    pub async fn poll_reply(&mut self) {
        let finished = self
            .reply_task
            .as_ref()
            .is_some_and(|task| task.is_finished());
        if !finished {
            return;
        }

        if let Some(task) = self.reply_task.take() {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(CompletionError::TaskFailed(e.to_string())),
            };
            self.conversation.settle(result);
            self.collect_notifications();
            self.scroll_to_bottom();
        }
    }

    pub fn open_api_key_input(&mut self) {
        self.show_api_key_input = true;
        self.api_key_input.clear();
    }

    pub fn close_api_key_input(&mut self) {
        self.show_api_key_input = false;
        self.api_key_input.clear();
    }

    pub fn save_api_key(&mut self) {
        match self.client.set_credential(self.api_key_input.as_str()) {
            Ok(()) => {
                self.push_notification(Notification::new(
                    Severity::Info,
                    "API key saved",
                    "Your key is stored locally and used for every request.",
                ));
                self.close_api_key_input();
            }
            // Blank input: leave the popup open, nothing to save.
            Err(CredentialError::Empty) => {}
            Err(CredentialError::Store(e)) => {
                tracing::error!(error = %e, "failed to persist API key");
                self.push_notification(Notification::new(
                    Severity::Error,
                    "Could not save API key",
                    e.to_string(),
                ));
                self.close_api_key_input();
            }
        }
    }

    pub fn push_notification(&mut self, notification: Notification) {
        if self.notifications.is_empty() {
            self.toast_ticks = TOAST_TICKS;
        }
        self.notifications.push_back(notification);
    }

    fn collect_notifications(&mut self) {
        for notification in self.conversation.take_notifications() {
            self.push_notification(notification);
        }
    }

    pub fn current_toast(&self) -> Option<&Notification> {
        self.notifications.front()
    }

    pub fn dismiss_toast(&mut self) {
        self.notifications.pop_front();
        self.toast_ticks = TOAST_TICKS;
    }

    /// Called by the Tick event.
    pub fn tick(&mut self) {
        if self.is_pending() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }

        if !self.notifications.is_empty() {
            self.toast_ticks = self.toast_ticks.saturating_sub(1);
            if self.toast_ticks == 0 {
                self.dismiss_toast();
            }
        }
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(self.max_scroll());
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = self.max_scroll();
    }

    /// Estimated rendered height of the transcript, including the
    /// "Thinking..." indicator while a reply is pending.
    fn transcript_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in self.conversation.messages() {
            total_lines = total_lines.saturating_add(1); // author + time line
            for line in msg.text().lines() {
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 {
                    1
                } else {
                    (char_count / wrap_width) + 1
                };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // blank line after message
        }

        if self.is_pending() {
            total_lines = total_lines.saturating_add(2);
        }

        total_lines
    }

    fn max_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.transcript_lines().saturating_sub(visible_height)
    }
}
