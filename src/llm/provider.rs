use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::Result;

/// Chat generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name for logs (e.g. "llama_server")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest) -> Result<String>;

    /// chat completion (streaming)
    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream>;
}

/// Produces the fixed-length vectors used for similarity search.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Finite sequence of generated text chunks. Dropping it cancels the
/// producer; it cannot be restarted.
pub struct TokenStream {
    rx: mpsc::Receiver<Result<String>>,
}

impl TokenStream {
    pub fn new(rx: mpsc::Receiver<Result<String>>) -> Self {
        Self { rx }
    }

    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<String>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }

    /// Stream over already-known chunks.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<String>>,
    {
        let chunks: Vec<_> = chunks.into_iter().collect();
        let (tx, stream) = Self::channel(chunks.len().max(1));
        for chunk in chunks {
            // capacity covers every chunk
            let _ = tx.try_send(chunk);
        }
        stream
    }

    pub async fn next(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Drains the stream, calling `on_chunk` for each piece, and returns the
    /// assembled text. Stops at the first error.
    pub async fn collect_with<F>(mut self, mut on_chunk: F) -> Result<String>
    where
        F: FnMut(&str),
    {
        let mut full = String::new();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            on_chunk(&chunk);
            full.push_str(&chunk);
        }
        Ok(full)
    }

    pub async fn collect_text(self) -> Result<String> {
        self.collect_with(|_| {}).await
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::CompanionError;

    #[tokio::test]
    async fn collect_with_concatenates_in_order() {
        let stream = TokenStream::from_chunks(vec![
            Ok("Hel".to_string()),
            Ok("lo".to_string()),
            Ok("!".to_string()),
        ]);
        let mut seen = Vec::new();
        let text = stream
            .collect_with(|chunk| seen.push(chunk.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "Hello!");
        assert_eq!(seen, vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn collect_stops_at_first_error() {
        let stream = TokenStream::from_chunks(vec![
            Ok("partial".to_string()),
            Err(CompanionError::inference("server went away")),
            Ok("never".to_string()),
        ]);
        assert!(matches!(
            stream.collect_text().await,
            Err(CompanionError::Inference(_))
        ));
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_text() {
        let stream = TokenStream::from_chunks(Vec::new());
        assert_eq!(stream.collect_text().await.unwrap(), "");
    }
}
