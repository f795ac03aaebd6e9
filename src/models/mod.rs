pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationError, GREETING};
pub use message::{new_message_id, Message, MessageStatus};
