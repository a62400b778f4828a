//! Chat panel state machine.
//!
//! `Ready <-> Streaming`. The panel turns coordinator notifications into
//! transcript changes and reports what to redraw.

use shared::agent_api::{InstanceId, Request, Response};
use shared::events::{Notification, NotificationKind};

const STOPPED_NOTE: &str = "[Generation stopped by user]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Ready,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String, // "user" or "model"
    pub content: String,
    /// False while the model is still writing into it
    pub complete: bool,
}

impl ChatMessage {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            complete: true,
        }
    }

    fn model(content: impl Into<String>, complete: bool) -> Self {
        Self {
            role: "model".to_string(),
            content: content.into(),
            complete,
        }
    }
}

/// What changed after applying a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelUpdate {
    /// Notification was for another panel
    Ignored,
    /// A new model message is open
    Opened,
    /// Text appended to the open message
    Appended(String),
    /// Open message closed; `note` was appended to it (error/abort)
    Finalized { note: Option<String> },
    /// No message was open; a standalone note was added
    Note(String),
}

pub struct Panel {
    instance_id: InstanceId,
    state: PanelState,
    messages: Vec<ChatMessage>,
    /// Index of the model message being streamed into
    open: Option<usize>,
    last_error: Option<String>,
}

impl Panel {
    pub fn new() -> Self {
        Self::with_instance(InstanceId::new())
    }

    pub fn with_instance(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            state: PanelState::Ready,
            messages: Vec::new(),
            open: None,
            last_error: None,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn state(&self) -> PanelState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == PanelState::Streaming
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record the user's message and build the chat request.
    /// `None` for blank input or while a response is streaming.
    pub fn send(&mut self, text: &str) -> Option<Request> {
        let text = text.trim();
        if text.is_empty() || self.is_streaming() {
            return None;
        }
        self.last_error = None;
        self.messages.push(ChatMessage::user(text));
        self.state = PanelState::Streaming;
        Some(Request::ProcessChat {
            instance_id: Some(self.instance_id.clone()),
            message: text.to_string(),
        })
    }

    pub fn stop_request(&self) -> Option<Request> {
        if !self.is_streaming() {
            return None;
        }
        Some(Request::StopGeneration {
            instance_id: Some(self.instance_id.clone()),
        })
    }

    /// Apply a synchronous answer to one of our requests. An immediate
    /// failure means no generation is coming.
    pub fn handle_response(&mut self, response: &Response) {
        if response.success == Some(false) {
            if let Some(error) = &response.error {
                self.last_error = Some(error.clone());
                self.close_open();
                self.state = PanelState::Ready;
            }
        }
    }

    pub fn apply(&mut self, notification: &Notification) -> PanelUpdate {
        if !notification.is_for(&self.instance_id) {
            return PanelUpdate::Ignored;
        }

        match &notification.kind {
            NotificationKind::Started => {
                self.close_open();
                self.open_message();
                self.last_error = None;
                self.state = PanelState::Streaming;
                PanelUpdate::Opened
            }
            NotificationKind::Delta { chunk } => {
                let idx = self.ensure_open();
                self.messages[idx].content.push_str(chunk);
                PanelUpdate::Appended(chunk.clone())
            }
            NotificationKind::Ended => {
                self.ensure_open();
                self.finish(None)
            }
            NotificationKind::Error { error } => {
                self.last_error = Some(error.clone());
                self.finish(Some(format!("[Error: {}]", error)))
            }
            NotificationKind::Aborted => self.finish(Some(STOPPED_NOTE.to_string())),
        }
    }

    fn open_message(&mut self) -> usize {
        self.messages.push(ChatMessage::model("", false));
        let idx = self.messages.len() - 1;
        self.open = Some(idx);
        idx
    }

    fn ensure_open(&mut self) -> usize {
        self.state = PanelState::Streaming;
        match self.open {
            Some(idx) => idx,
            None => self.open_message(),
        }
    }

    fn close_open(&mut self) {
        if let Some(idx) = self.open.take() {
            self.messages[idx].complete = true;
        }
    }

    fn finish(&mut self, note: Option<String>) -> PanelUpdate {
        self.state = PanelState::Ready;
        match (self.open.take(), note) {
            (Some(idx), note) => {
                let message = &mut self.messages[idx];
                if let Some(note) = &note {
                    message.content.push('\n');
                    message.content.push_str(note);
                }
                message.complete = true;
                PanelUpdate::Finalized { note }
            }
            (None, Some(note)) => {
                self.messages.push(ChatMessage::model(note.clone(), true));
                PanelUpdate::Note(note)
            }
            (None, None) => PanelUpdate::Finalized { note: None },
        }
    }
}

impl Default for Panel {
    fn default() -> Self {
        Self::new()
    }
}
