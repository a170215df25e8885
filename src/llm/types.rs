use serde::{Deserialize, Serialize};

use crate::context::{Role, Turn};
use crate::core::config::ModelConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role(),
            content: turn.content().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
}

impl From<&ModelConfig> for SamplingParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, sampling: SamplingParams) -> Self {
        Self { messages, sampling }
    }

    pub fn from_turns(turns: &[Turn], sampling: SamplingParams) -> Self {
        Self::new(turns.iter().map(ChatMessage::from).collect(), sampling)
    }
}
