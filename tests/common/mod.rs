#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use companion::core::config::{AppConfig, ModelConfig};
use companion::llm::{ChatRequest, Embedder, LlmProvider, TokenCounter, TokenStream};
use companion::{ChatSession, CompanionError, ConversationStore, Result};

/// One token per whitespace-separated word. Text containing `<bad>` fails.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        if text.contains("<bad>") {
            return Err(CompanionError::tokenization("unencodable input"));
        }
        Ok(text.split_whitespace().count())
    }
}

/// One dimension per keyword plus a small constant component.
pub struct KeywordEmbedder;

pub const KEYWORDS: [&str; 3] = ["sky", "food", "music"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.1);
        Ok(vector)
    }
}

/// Delegates to [`KeywordEmbedder`] and counts the texts it was asked for.
#[derive(Default)]
pub struct CountingEmbedder {
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.texts.lock().unwrap().push(text.to_string());
        KeywordEmbedder.embed(text).await
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(CompanionError::embedding("embedding server offline"))
    }
}

/// Replies with fixed chunks and records every request it receives.
pub struct ScriptedProvider {
    chunks: Vec<String>,
    fail_mid_stream: bool,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn replying(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail_mid_stream: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_after(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail_mid_stream: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> ChatRequest {
        self.requests().pop().expect("provider was never called")
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request);
        Ok(self.chunks.concat())
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream> {
        self.requests.lock().unwrap().push(request);
        let mut chunks: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        if self.fail_mid_stream {
            chunks.push(Err(CompanionError::inference("connection reset")));
        }
        Ok(TokenStream::from_chunks(chunks))
    }
}

pub fn config(n_ctx: usize, max_tokens: usize) -> AppConfig {
    AppConfig {
        model: ModelConfig {
            n_ctx,
            max_tokens,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn open_store(dir: &tempfile::TempDir) -> Arc<ConversationStore> {
    Arc::new(
        ConversationStore::open(dir.path().join("chat_history.db"))
            .await
            .expect("store should open"),
    )
}

pub fn session(
    store: Arc<ConversationStore>,
    provider: Arc<ScriptedProvider>,
    embedder: Option<Arc<dyn Embedder>>,
    config: &AppConfig,
) -> ChatSession {
    ChatSession::new(store, provider, embedder, Arc::new(WordCounter), config)
        .expect("session should build")
}
