//! One user's conversation: the live window for the active thread plus the
//! store and model collaborators behind it.

use std::sync::Arc;

use crate::context::{ContextWindowManager, Role};
use crate::core::config::{AppConfig, ChatConfig, MemoryConfig};
use crate::core::errors::{CompanionError, Result};
use crate::history::{ConversationStore, RelevantMessage};
use crate::llm::{ChatRequest, Embedder, LlmProvider, SamplingParams, TokenCounter, TokenStream};

pub struct ChatSession {
    store: Arc<ConversationStore>,
    provider: Arc<dyn LlmProvider>,
    embedder: Option<Arc<dyn Embedder>>,
    window: ContextWindowManager,
    sampling: SamplingParams,
    memory: MemoryConfig,
    chat: ChatConfig,
    thread_id: Option<i64>,
}

impl ChatSession {
    pub fn new(
        store: Arc<ConversationStore>,
        provider: Arc<dyn LlmProvider>,
        embedder: Option<Arc<dyn Embedder>>,
        counter: Arc<dyn TokenCounter>,
        config: &AppConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            provider,
            embedder,
            window: ContextWindowManager::from_config(counter, config)?,
            sampling: SamplingParams::from(&config.model),
            memory: config.memory.clone(),
            chat: config.chat.clone(),
            thread_id: None,
        })
    }

    pub fn current_thread(&self) -> Option<i64> {
        self.thread_id
    }

    pub fn window(&self) -> &ContextWindowManager {
        &self.window
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Starts an empty thread titled with the default title. It is pruned on
    /// the next startup if nothing is ever said in it.
    pub async fn new_thread(&mut self) -> Result<i64> {
        let thread_id = self.store.create_thread(&self.chat.default_title).await?;
        self.window.clear();
        self.thread_id = Some(thread_id);
        tracing::info!(thread_id, "Started new thread");
        Ok(thread_id)
    }

    /// Switches to `thread_id` and rebuilds the window from its history.
    pub async fn load_thread(&mut self, thread_id: i64) -> Result<()> {
        if self.store.get_thread(thread_id).await?.is_none() {
            return Err(CompanionError::NotFound(format!("thread {}", thread_id)));
        }

        let messages = self.store.get_messages(thread_id).await?;
        let count = messages.len();
        self.window
            .load_history(messages.into_iter().map(|m| (m.role, m.content)))?;
        self.thread_id = Some(thread_id);

        tracing::info!(
            thread_id,
            messages = count,
            retained = self.window.len(),
            "Loaded thread"
        );
        Ok(())
    }

    /// Records the user's turn and starts generating the reply. The caller
    /// drains the stream and hands the assembled text to
    /// [`ChatSession::commit_response`].
    pub async fn send(&mut self, user_input: &str) -> Result<TokenStream> {
        if user_input.trim().is_empty() {
            return Err(CompanionError::InvalidInput(
                "message cannot be empty".to_string(),
            ));
        }

        let turn = self.window.price_turn(Role::User, user_input)?;
        let thread_id = self.ensure_thread().await?;

        // One vector serves both the memory query and the stored message.
        let embedding = self.embed_input(thread_id, user_input).await;
        let memories = match embedding.as_deref() {
            Some(query) => self.recall(thread_id, query).await?,
            None => None,
        };

        self.store
            .save_message_with_embedding(
                thread_id,
                Role::User,
                user_input,
                None,
                embedding.as_deref(),
            )
            .await?;
        self.window.push_turn(turn);
        self.maybe_title_thread(thread_id, user_input).await?;

        let prompt = self.window.build_prompt(memories.as_deref())?;
        let request = ChatRequest::from_turns(&prompt, self.sampling);
        tracing::debug!(
            thread_id,
            prompt_turns = prompt.len(),
            window_tokens = self.window.window_tokens(),
            provider = self.provider.name(),
            "Requesting completion"
        );
        self.provider.stream_chat(request).await
    }

    /// Records the assistant's final text for the active thread.
    pub async fn commit_response(&mut self, response: &str) -> Result<()> {
        self.commit_response_with_trace(response, None).await
    }

    pub async fn commit_response_with_trace(
        &mut self,
        response: &str,
        trace: Option<&str>,
    ) -> Result<()> {
        let thread_id = self
            .thread_id
            .ok_or_else(|| CompanionError::InvalidInput("no active thread".to_string()))?;

        let turn = self.window.price_turn(Role::Assistant, response)?;
        self.store
            .save_message(
                thread_id,
                Role::Assistant,
                response,
                trace,
                self.embedder.as_deref(),
            )
            .await?;
        self.window.push_turn(turn);
        Ok(())
    }

    /// `send`, drain the stream through `on_chunk`, then commit.
    pub async fn respond<F>(&mut self, user_input: &str, on_chunk: F) -> Result<String>
    where
        F: FnMut(&str),
    {
        let stream = self.send(user_input).await?;
        let response = stream.collect_with(on_chunk).await?;
        self.commit_response(&response).await?;
        Ok(response)
    }

    async fn ensure_thread(&mut self) -> Result<i64> {
        match self.thread_id {
            Some(thread_id) => Ok(thread_id),
            None => self.new_thread().await,
        }
    }

    /// Embedding of the user's input, or `None` when there is no embedder or
    /// it fails. Failures only cost the memories and the stored vector.
    async fn embed_input(&self, thread_id: i64, user_input: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_deref()?;
        match self.store.embed(embedder, user_input).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(thread_id, "Continuing without embedding: {}", err);
                None
            }
        }
    }

    /// Past messages relevant to `query` that are no longer in the window,
    /// formatted as prompt context.
    async fn recall(&self, thread_id: i64, query: &[f32]) -> Result<Option<String>> {
        if !self.memory.enabled {
            return Ok(None);
        }

        let retrieved = self
            .store
            .retrieve_relevant_by_embedding(query, thread_id, self.memory.top_n)
            .await?;

        let fresh: Vec<RelevantMessage> = retrieved
            .into_iter()
            .filter(|memory| {
                !self
                    .window
                    .turns()
                    .iter()
                    .any(|turn| turn.role() == memory.role && turn.content() == memory.content)
            })
            .collect();

        Ok(format_memories(&fresh))
    }

    async fn maybe_title_thread(&self, thread_id: i64, user_input: &str) -> Result<()> {
        let current = self.store.thread_title(thread_id).await?;
        if current != self.chat.default_title {
            return Ok(());
        }

        let title = title_from_message(user_input, self.chat.title_max_chars);
        if title.is_empty() {
            return Ok(());
        }
        self.store.rename_thread(thread_id, &title).await
    }
}

fn format_memories(memories: &[RelevantMessage]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }

    let mut context = String::from("Relevant earlier messages from this conversation:");
    for memory in memories {
        context.push_str("\n- ");
        context.push_str(memory.role.as_str());
        context.push_str(": ");
        context.push_str(&memory.content);
    }
    Some(context)
}

/// First line of the message, whitespace-collapsed and cut to `max_chars`.
fn title_from_message(message: &str, max_chars: usize) -> String {
    let first_line = message.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
