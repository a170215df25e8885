use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::context::TrimBoundary;

/// Explicit runtime configuration, built once at startup and passed to
/// whichever component needs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub memory: MemoryConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub server_url: String,
    /// `tokenizer.json` matching the served model. Token counts fall back
    /// to a character estimate when unset.
    pub tokenizer_path: Option<PathBuf>,
    pub n_ctx: usize,
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            server_url: DEFAULT_SERVER_URL.to_string(),
            tokenizer_path: None,
            n_ctx: DEFAULT_N_CTX,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ModelConfig {
    /// Tokens available to the history window: the context size minus the
    /// space reserved for the reply.
    pub fn prompt_budget(&self) -> usize {
        self.n_ctx.saturating_sub(self.max_tokens)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub top_n: usize,
    pub embedding_timeout_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: DEFAULT_MEMORY_TOP_N,
            embedding_timeout_ms: DEFAULT_EMBEDDING_TIMEOUT_MS,
        }
    }
}

impl MemoryConfig {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    pub default_title: String,
    pub trim_boundary: TrimBoundary,
    pub title_max_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_title: DEFAULT_THREAD_TITLE.to_string(),
            trim_boundary: TrimBoundary::default(),
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_budget_reserves_reply_tokens() {
        let model = ModelConfig {
            n_ctx: 100,
            max_tokens: 20,
            ..Default::default()
        };
        assert_eq!(model.prompt_budget(), 80);
    }

    #[test]
    fn prompt_budget_saturates_at_zero() {
        let model = ModelConfig {
            n_ctx: 10,
            max_tokens: 20,
            ..Default::default()
        };
        assert_eq!(model.prompt_budget(), 0);
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_value(serde_json::json!({ "model": { "n_ctx": 4096 } }))
                .expect("partial config should deserialize");
        assert_eq!(config.model.n_ctx, 4096);
        assert_eq!(config.model.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.chat.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(config.memory.enabled);
    }
}
