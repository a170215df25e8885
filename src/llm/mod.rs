pub mod llama_server;
pub mod provider;
pub mod tokenizer;
pub mod types;

pub use llama_server::LlamaServerClient;
pub use provider::{Embedder, LlmProvider, TokenStream};
pub use tokenizer::{counter_for, EstimatedTokenCounter, HfTokenCounter, TokenCounter};
pub use types::{ChatMessage, ChatRequest, SamplingParams};
