//! Context Window Manager.
//!
//! Keeps the live turns of one thread and truncates from the oldest end so
//! the prompt sent to the model stays within `n_ctx - max_tokens`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::turn::{format_for_count, Role, Turn};
use crate::core::config::AppConfig;
use crate::core::errors::Result;
use crate::llm::TokenCounter;

/// What happens to the turn at which the backward scan reaches the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimBoundary {
    /// Keep the boundary turn, then stop. The window may overrun the budget
    /// by at most that one turn.
    #[default]
    Include,
    /// Stop before the boundary turn, so the window stays strictly under the
    /// budget unless the newest turn alone overruns it.
    Exclude,
}

/// Index of the first retained turn when scanning `costs` (oldest first)
/// backwards against `budget`. The newest turn is always retained.
pub fn retained_start(costs: &[usize], budget: usize, boundary: TrimBoundary) -> usize {
    let Some(newest) = costs.len().checked_sub(1) else {
        return 0;
    };

    let mut total = 0usize;
    let mut start = newest;
    for i in (0..=newest).rev() {
        let next_total = total.saturating_add(costs[i]);
        match boundary {
            TrimBoundary::Include => {
                total = next_total;
                start = i;
                if total >= budget {
                    break;
                }
            }
            TrimBoundary::Exclude => {
                if i != newest && next_total >= budget {
                    break;
                }
                total = next_total;
                start = i;
            }
        }
    }
    start
}

pub struct ContextWindowManager {
    counter: Arc<dyn TokenCounter>,
    budget: usize,
    boundary: TrimBoundary,
    system_turn: Turn,
    turns: Vec<Turn>,
}

impl ContextWindowManager {
    /// `budget = n_ctx - max_tokens`, saturating at zero.
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        n_ctx: usize,
        max_tokens: usize,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        Self::with_budget(counter, n_ctx.saturating_sub(max_tokens), system_prompt)
    }

    pub fn with_budget(
        counter: Arc<dyn TokenCounter>,
        budget: usize,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        let system_turn = price(counter.as_ref(), Role::System, system_prompt.into())?;
        Ok(Self {
            counter,
            budget,
            boundary: TrimBoundary::default(),
            system_turn,
            turns: Vec::new(),
        })
    }

    pub fn from_config(counter: Arc<dyn TokenCounter>, config: &AppConfig) -> Result<Self> {
        Ok(Self::with_budget(
            counter,
            config.model.prompt_budget(),
            config.chat.system_prompt.clone(),
        )?
        .with_boundary(config.chat.trim_boundary))
    }

    pub fn with_boundary(mut self, boundary: TrimBoundary) -> Self {
        self.boundary = boundary;
        self.trim();
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn boundary(&self) -> TrimBoundary {
        self.boundary
    }

    /// The retained window, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn window_tokens(&self) -> usize {
        self.turns.iter().map(Turn::token_cost).sum()
    }

    /// Prices and appends a turn, then trims. A tokenizer failure leaves the
    /// window untouched.
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) -> Result<Turn> {
        let turn = self.price_turn(role, content)?;
        self.push_turn(turn.clone());
        Ok(turn)
    }

    /// Prices a turn without touching the window, so callers can persist it
    /// before committing it with [`ContextWindowManager::push_turn`].
    pub fn price_turn(&self, role: Role, content: impl Into<String>) -> Result<Turn> {
        price(self.counter.as_ref(), role, content.into())
    }

    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.trim();
    }

    /// System instruction, then the window, then `extra_context` as a trailing
    /// system turn when it has any content.
    pub fn build_prompt(&self, extra_context: Option<&str>) -> Result<Vec<Turn>> {
        let mut prompt = Vec::with_capacity(self.turns.len() + 2);
        prompt.push(self.system_turn.clone());
        prompt.extend(self.turns.iter().cloned());

        if let Some(context) = extra_context.filter(|c| !c.trim().is_empty()) {
            prompt.push(price(
                self.counter.as_ref(),
                Role::System,
                context.to_string(),
            )?);
        }
        Ok(prompt)
    }

    /// Replaces the window with a persisted history (oldest first). Either
    /// every message is priced or the current window is kept.
    pub fn load_history<I>(&mut self, history: I) -> Result<()>
    where
        I: IntoIterator<Item = (Role, String)>,
    {
        let turns = history
            .into_iter()
            .map(|(role, content)| price(self.counter.as_ref(), role, content))
            .collect::<Result<Vec<_>>>()?;
        self.turns = turns;
        self.trim();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn trim(&mut self) {
        let costs: Vec<usize> = self.turns.iter().map(Turn::token_cost).collect();
        let start = retained_start(&costs, self.budget, self.boundary);
        if start > 0 {
            self.turns.drain(..start);
            tracing::debug!(
                dropped = start,
                retained = self.turns.len(),
                tokens = self.window_tokens(),
                budget = self.budget,
                "Trimmed context window"
            );
        }
    }
}

fn price(counter: &dyn TokenCounter, role: Role, content: String) -> Result<Turn> {
    let cost = counter.count_tokens(&format_for_count(role, &content))?;
    Ok(Turn::new(role, content, cost))
}
