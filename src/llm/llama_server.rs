//! Client for an OpenAI-compatible llama.cpp server.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{Map, Value};

use super::provider::{Embedder, LlmProvider, TokenStream};
use super::types::ChatRequest;
use crate::core::config::ModelConfig;
use crate::core::errors::{CompanionError, Result};

const STREAM_BUFFER: usize = 64;

#[derive(Clone)]
pub struct LlamaServerClient {
    client: Client,
    base_url: String,
    model: String,
    request_timeout: std::time::Duration,
}

impl LlamaServerClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(CompanionError::inference)?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            model: config.path.to_string_lossy().to_string(),
            request_timeout: config.request_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl LlmProvider for LlamaServerClient {
    fn name(&self) -> &str {
        "llama_server"
    }

    async fn chat(&self, request: ChatRequest) -> Result<String> {
        let body = build_chat_body(&self.model, &request, false)?;

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(CompanionError::inference)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CompanionError::Inference(format!(
                "LLM request failed: {} {}",
                status, text
            )));
        }

        let payload: Value = response.json().await.map_err(CompanionError::inference)?;
        Ok(extract_delta(&payload).unwrap_or_default())
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream> {
        let body = build_chat_body(&self.model, &request, true)?;

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .json(&body)
            .send()
            .await
            .map_err(CompanionError::inference)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CompanionError::Inference(format!(
                "LLM request failed: {} {}",
                status, text
            )));
        }

        let (tx, stream) = TokenStream::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(CompanionError::inference(err))).await;
                        return;
                    }
                };

                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Done => return,
                        SseEvent::Data(payload) => {
                            let Some(delta) = extract_delta(&payload) else {
                                continue;
                            };
                            if delta.is_empty() {
                                continue;
                            }
                            // receiver dropped: caller cancelled
                            if tx.send(Ok(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(stream)
    }
}

#[async_trait]
impl Embedder for LlamaServerClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(self.url("/v1/embeddings"))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(CompanionError::embedding)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CompanionError::Embedding(format!(
                "Embedding request failed: {} {}",
                status, text
            )));
        }

        let payload: Value = response.json().await.map_err(CompanionError::embedding)?;
        parse_embedding_response(&payload)?
            .into_iter()
            .next()
            .ok_or_else(|| CompanionError::Embedding("Embedding response was empty".to_string()))
    }
}

fn build_chat_body(model: &str, request: &ChatRequest, stream: bool) -> Result<Value> {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        serde_json::to_value(&request.messages).map_err(CompanionError::inference)?,
    );
    body.insert("stream".to_string(), Value::Bool(stream));
    body.insert(
        "max_tokens".to_string(),
        Value::Number(request.sampling.max_tokens.into()),
    );
    if let Some(num) = serde_json::Number::from_f64(request.sampling.temperature) {
        body.insert("temperature".to_string(), Value::Number(num));
    }
    if let Some(num) = serde_json::Number::from_f64(request.sampling.top_p) {
        body.insert("top_p".to_string(), Value::Number(num));
    }
    Ok(Value::Object(body))
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Data(Value),
    Done,
}

/// Reassembles `data:` lines split across network chunks. Buffers bytes so a
/// multi-byte character cut by a chunk boundary survives.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                break;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(value) => events.push(SseEvent::Data(value)),
                Err(err) => tracing::debug!("Skipping malformed SSE payload: {}", err),
            }
        }
        events
    }
}

fn parse_embedding_response(payload: &Value) -> Result<Vec<Vec<f32>>> {
    let Some(data) = payload.get("data").and_then(|v| v.as_array()) else {
        return Err(CompanionError::Embedding(
            "Embedding response missing data array".to_string(),
        ));
    };

    let mut indexed_embeddings = Vec::with_capacity(data.len());
    for (fallback_idx, item) in data.iter().enumerate() {
        let Some(values) = item.get("embedding").and_then(|v| v.as_array()) else {
            return Err(CompanionError::Embedding(
                "Embedding response item missing embedding array".to_string(),
            ));
        };

        let mut embedding = Vec::with_capacity(values.len());
        for value in values {
            let Some(float_value) = value.as_f64() else {
                return Err(CompanionError::Embedding(
                    "Embedding contains non-numeric value".to_string(),
                ));
            };
            embedding.push(float_value as f32);
        }

        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_idx);
        indexed_embeddings.push((index, embedding));
    }

    indexed_embeddings.sort_by_key(|(idx, _)| *idx);
    Ok(indexed_embeddings
        .into_iter()
        .map(|(_, embedding)| embedding)
        .collect())
}

fn extract_delta(payload: &Value) -> Option<String> {
    let choice = payload
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first());
    let delta = choice.and_then(|c| c.get("delta"));
    if let Some(content) = delta
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
    {
        return Some(content.to_string());
    }
    if let Some(content) = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
    {
        return Some(content.to_string());
    }
    choice
        .and_then(|c| c.get("text"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
