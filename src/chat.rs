use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{new_message_id, Conversation, Message, MessageStatus};

/// Submit failure raised before any reply stream opens. The optimistic
/// user message has already been rolled back when this is returned.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a reply is already streaming")]
    ReplyInProgress,
    #[error("message could not be sent: {0}")]
    Dispatch(String),
    #[error("server rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// How a reply stream settled. Faults after the stream opens end here, not
/// in `ChatError`; whatever text arrived stays in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Complete {
        message_id: String,
    },
    Truncated {
        message_id: String,
        reason: String,
    },
    /// The stream died before any text arrived.
    Failed {
        message_id: String,
        reason: String,
    },
}

/// Incremental events observed while a reply streams in.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// An empty placeholder was added as the reply target.
    ReplyStarted { message_id: String },
    /// Decoded text appended to the reply, one event per received chunk.
    Delta { message_id: String, text: String },
}

/// Reassembles UTF-8 text from bytes that arrive in arbitrary fragments.
/// An incomplete trailing sequence is carried until the bytes that finish
/// it arrive.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut decoded = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    decoded.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    decoded.push_str(std::str::from_utf8(&self.pending[..valid_up_to]).unwrap());
                    match e.error_len() {
                        // An invalid sequence, unlike a split code point,
                        // will never become decodable; skip it.
                        Some(bad) => {
                            self.pending.drain(..valid_up_to + bad);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        decoded
    }
}

/// Drives support conversations against the chat backend, maintaining the
/// optimistic message state around each submit.
pub struct ChatClient {
    http: Client,
    endpoint: String,
}

impl ChatClient {
    /// `base_url` is the chat server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            endpoint: format!("{}/api/message", base_url.trim_end_matches('/')),
        }
    }

    /// Submits `text` and streams the reply into `conversation`.
    ///
    /// The user message is added optimistically and removed again if the
    /// request cannot be dispatched or the server rejects it. Once the
    /// stream opens, an empty assistant placeholder becomes the single
    /// reply target; each received chunk is appended in arrival order and
    /// reported through `on_event`. Cancelling `cancel` closes the
    /// connection and keeps any partial text.
    pub async fn send_message<F>(
        &self,
        conversation: &mut Conversation,
        text: impl Into<String>,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<ReplyOutcome, ChatError>
    where
        F: FnMut(ChatEvent),
    {
        if conversation.is_replying() {
            return Err(ChatError::ReplyInProgress);
        }

        let user_id = new_message_id();
        let mut user_message = Message::user(user_id.clone(), text);
        user_message.status = MessageStatus::Pending;
        conversation.push(user_message);

        let payload = serde_json::json!({ "messages": conversation.messages() });
        let response = match self.http.post(&self.endpoint).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                conversation.remove(&user_id);
                return Err(ChatError::Dispatch(e.to_string()));
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            conversation.remove(&user_id);
            return Err(ChatError::Rejected { status, body });
        }

        let _ = conversation.set_status(&user_id, MessageStatus::Committed);

        let reply_id = match conversation.start_reply() {
            Ok(id) => id,
            Err(_) => {
                conversation.remove(&user_id);
                return Err(ChatError::ReplyInProgress);
            }
        };
        on_event(ChatEvent::ReplyStarted {
            message_id: reply_id.clone(),
        });

        let mut stream = response.bytes_stream();
        let mut decoder = Utf8StreamDecoder::new();
        let mut received_any = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(Self::settle(conversation, reply_id, received_any, "cancelled"));
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            let text = decoder.push(&bytes);
                            if text.is_empty() {
                                continue;
                            }
                            received_any = true;
                            let _ = conversation.append_text(&reply_id, &text);
                            on_event(ChatEvent::Delta {
                                message_id: reply_id.clone(),
                                text,
                            });
                        }
                        Some(Err(e)) => {
                            return Ok(Self::settle(conversation, reply_id, received_any, &e.to_string()));
                        }
                        None => {
                            conversation.finish_reply(&reply_id, MessageStatus::Complete);
                            return Ok(ReplyOutcome::Complete { message_id: reply_id });
                        }
                    }
                }
            }
        }
    }

    fn settle(
        conversation: &mut Conversation,
        reply_id: String,
        received_any: bool,
        reason: &str,
    ) -> ReplyOutcome {
        if received_any {
            conversation.finish_reply(&reply_id, MessageStatus::Truncated);
            ReplyOutcome::Truncated {
                message_id: reply_id,
                reason: reason.to_string(),
            }
        } else {
            conversation.finish_reply(&reply_id, MessageStatus::Failed);
            ReplyOutcome::Failed {
                message_id: reply_id,
                reason: reason.to_string(),
            }
        }
    }
}
