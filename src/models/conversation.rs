use thiserror::Error;

use super::message::{new_message_id, Message, MessageStatus};

/// Opening assistant message seeded into a fresh widget session.
pub const GREETING: &str = "Hello, how can I help you?";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("a reply is already streaming")]
    ReplyInProgress,
    #[error("unknown message: {0}")]
    UnknownMessage(String),
    #[error("message {0} is not accepting text")]
    NotStreaming(String),
}

/// Ordered message list for one widget session, with at most one reply
/// streaming into it at a time.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    active_reply: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session as the widget opens it: a single assistant greeting.
    pub fn with_greeting() -> Self {
        let mut conversation = Self::new();
        conversation.push(Message::assistant(new_message_id(), GREETING));
        conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn is_replying(&self) -> bool {
        self.active_reply.is_some()
    }

    pub fn active_reply(&self) -> Option<&str> {
        self.active_reply.as_deref()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Removes a message by id, e.g. to roll back an optimistic add.
    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        if self.active_reply.as_deref() == Some(id) {
            self.active_reply = None;
        }
        Some(self.messages.remove(index))
    }

    pub fn set_status(&mut self, id: &str, status: MessageStatus) -> Result<(), ConversationError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ConversationError::UnknownMessage(id.to_string()))?;
        message.status = status;
        Ok(())
    }

    /// Adds an empty assistant placeholder and marks it as the streaming
    /// target. Fails while another reply is open.
    pub fn start_reply(&mut self) -> Result<String, ConversationError> {
        if self.active_reply.is_some() {
            return Err(ConversationError::ReplyInProgress);
        }
        let id = new_message_id();
        let mut message = Message::assistant(id.clone(), "");
        message.status = MessageStatus::Streaming;
        self.messages.push(message);
        self.active_reply = Some(id.clone());
        Ok(id)
    }

    /// Appends streamed text to the active reply. Only the message named by
    /// `start_reply` accepts text, and only until it is finished.
    pub fn append_text(&mut self, id: &str, text: &str) -> Result<(), ConversationError> {
        if self.active_reply.as_deref() != Some(id) {
            return Err(ConversationError::NotStreaming(id.to_string()));
        }
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ConversationError::UnknownMessage(id.to_string()))?;
        message.text.push_str(text);
        Ok(())
    }

    /// Settles the active reply into a terminal status and releases the
    /// streaming slot.
    pub fn finish_reply(&mut self, id: &str, status: MessageStatus) {
        if self.active_reply.as_deref() == Some(id) {
            self.active_reply = None;
        }
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.status = status;
        }
    }
}
