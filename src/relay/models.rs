use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;

// --- Request types ---

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub role: String,
    pub content: String,
}

/// Chat-completion request body. Always streamed, single candidate.
#[derive(Debug, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<OutboundMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
    pub stream: bool,
    pub n: u8,
}

impl CompletionRequest {
    pub fn new(generation: &GenerationConfig, messages: Vec<OutboundMessage>) -> Self {
        Self {
            model: generation.model.clone(),
            messages,
            temperature: generation.temperature,
            top_p: generation.top_p,
            frequency_penalty: generation.frequency_penalty,
            presence_penalty: generation.presence_penalty,
            max_tokens: generation.max_tokens,
            stream: true,
            n: 1,
        }
    }
}

// --- Streaming response types ---

#[derive(Debug, Deserialize)]
pub struct CompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
pub struct ChunkDelta {
    pub content: Option<String>,
}

// --- Error types ---

#[derive(Debug, Deserialize)]
pub struct UpstreamErrorBody {
    pub error: UpstreamErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamErrorDetail {
    pub message: String,
}
