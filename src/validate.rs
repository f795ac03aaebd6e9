use serde_json::Value;
use thiserror::Error;

use crate::models::{Message, MessageStatus};

/// Why an inbound chat payload was rejected before reaching the relay.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("request body is missing the `messages` field")]
    MissingMessages,
    #[error("`messages` must be an array")]
    NotAnArray,
    #[error("messages[{index}]: expected an object")]
    EntryNotAnObject { index: usize },
    #[error("messages[{index}].{field}: expected {expected}")]
    InvalidField {
        index: usize,
        field: &'static str,
        expected: &'static str,
    },
}

/// Checks a decoded request body and extracts the conversation turns.
///
/// Unknown fields on the body or on individual entries are ignored. An
/// empty `messages` array is valid and yields no turns.
pub fn parse_message_payload(body: &Value) -> Result<Vec<Message>, ValidationError> {
    let object = body.as_object().ok_or(ValidationError::NotAnObject)?;
    let messages = object
        .get("messages")
        .ok_or(ValidationError::MissingMessages)?;
    let entries = messages.as_array().ok_or(ValidationError::NotAnArray)?;

    let mut parsed = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        parsed.push(parse_entry(index, entry)?);
    }
    Ok(parsed)
}

fn parse_entry(index: usize, entry: &Value) -> Result<Message, ValidationError> {
    let invalid = |field, expected| ValidationError::InvalidField {
        index,
        field,
        expected,
    };

    let object = entry
        .as_object()
        .ok_or(ValidationError::EntryNotAnObject { index })?;
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("id", "a string"))?;
    let text = object
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("text", "a string"))?;
    let is_user_message = object
        .get("isUserMessage")
        .and_then(Value::as_bool)
        .ok_or_else(|| invalid("isUserMessage", "a boolean"))?;

    Ok(Message {
        id: id.to_string(),
        text: text.to_string(),
        is_user_message,
        status: MessageStatus::Committed,
    })
}
