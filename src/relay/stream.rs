use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use super::models::CompletionChunk;

/// Mid-stream relay failure. Failures before the first byte surface as
/// `UpstreamError` instead; these arrive as items on the outbound stream
/// after delivery has begun and truncate it.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream stream failed: {0}")]
    Upstream(String),
    #[error("upstream idle for {0:?}")]
    IdleTimeout(Duration),
    #[error("downstream reader stalled for {0:?}")]
    Stalled(Duration),
}

/// Decodes an upstream completion event stream and re-emits each text
/// delta, in arrival order, as raw bytes on `tx`.
///
/// Unparsable events are skipped. Dropping the receiver stops the pump and
/// with it the upstream request. `idle_timeout` bounds the wait for the
/// next upstream read and the wait for the receiver to accept a delta; when
/// either expires the stream is cut with a terminal error item, never a
/// silent close.
pub(crate) async fn pump_deltas<S, E>(
    byte_stream: S,
    tx: mpsc::Sender<Result<Bytes, RelayError>>,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    // One slot is reserved up front so the terminal error always fits, even
    // when the delta buffer is full. Clean ends drop the permit unused.
    let Ok(reserved) = tx.clone().try_reserve_owned() else {
        return;
    };

    let mut byte_buf: Vec<u8> = Vec::new();
    let mut buffer = String::new();

    tokio::pin!(byte_stream);

    loop {
        let read = tokio::select! {
            _ = tx.closed() => return, // receiver dropped
            read = tokio::time::timeout(idle_timeout, byte_stream.next()) => read,
        };
        let next = match read {
            Ok(next) => next,
            Err(_) => {
                tracing::warn!("upstream idle for {:?}, dropping stream", idle_timeout);
                reserved.send(Err(RelayError::IdleTimeout(idle_timeout)));
                return;
            }
        };

        let Some(chunk_result) = next else {
            // Stream ended without a [DONE] signal; treated as a clean end.
            tracing::debug!("upstream stream closed without [DONE]");
            return;
        };

        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                reserved.send(Err(RelayError::Upstream(e.to_string())));
                return;
            }
        };

        byte_buf.extend_from_slice(&bytes);

        // Decode as much valid UTF-8 as possible from the byte buffer. An
        // incomplete trailing sequence is carried; an invalid one is
        // skipped, or it would wedge the buffer for the rest of the stream.
        let mut decoded = String::new();
        loop {
            match std::str::from_utf8(&byte_buf) {
                Ok(s) => {
                    decoded.push_str(s);
                    byte_buf.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    decoded.push_str(std::str::from_utf8(&byte_buf[..valid_up_to]).unwrap());
                    match e.error_len() {
                        Some(bad) => {
                            tracing::warn!("skipping {} invalid utf-8 bytes", bad);
                            byte_buf.drain(..valid_up_to + bad);
                        }
                        None => {
                            byte_buf.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        if decoded.is_empty() {
            continue;
        }

        // Normalize CRLF to LF
        let chunk = decoded.replace("\r\n", "\n");
        buffer.push_str(&chunk);

        // Process complete SSE events (delimited by double newline)
        while let Some(event_end) = buffer.find("\n\n") {
            let event_text = buffer[..event_end].to_string();
            buffer.drain(..event_end + 2);

            for line in event_text.lines() {
                let payload = if let Some(p) = line.strip_prefix("data: ") {
                    p
                } else if let Some(p) = line.strip_prefix("data:") {
                    p
                } else {
                    continue;
                };

                // The completion endpoint signals end of stream with [DONE]
                if payload.trim() == "[DONE]" {
                    return;
                }

                let delta = match serde_json::from_str::<CompletionChunk>(payload) {
                    Ok(chunk) => chunk
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone()),
                    Err(e) => {
                        tracing::warn!("skipping malformed completion event: {}", e);
                        continue;
                    }
                };

                let Some(delta) = delta else { continue };
                if delta.is_empty() {
                    continue;
                }

                match tx.send_timeout(Ok(Bytes::from(delta)), idle_timeout).await {
                    Ok(()) => {}
                    Err(SendTimeoutError::Closed(_)) => return, // receiver dropped
                    Err(SendTimeoutError::Timeout(_)) => {
                        tracing::warn!(
                            "downstream reader stalled for {:?}, dropping stream",
                            idle_timeout
                        );
                        reserved.send(Err(RelayError::Stalled(idle_timeout)));
                        return;
                    }
                }
            }
        }
    }
}
