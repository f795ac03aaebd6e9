use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-side lifecycle of a message. Not part of the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStatus {
    /// Added optimistically, not yet accepted by the server.
    Pending,
    /// Settled and immutable.
    #[default]
    Committed,
    /// Receiving streamed text; append-only.
    Streaming,
    /// Stream ended cleanly.
    Complete,
    /// Stream died after partial text arrived; the partial text is kept.
    Truncated,
    /// Stream died before any text arrived.
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Committed
                | MessageStatus::Complete
                | MessageStatus::Truncated
                | MessageStatus::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub is_user_message: bool,
    #[serde(skip)]
    pub status: MessageStatus,
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_user_message: true,
            status: MessageStatus::Committed,
        }
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            is_user_message: false,
            status: MessageStatus::Committed,
        }
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
