use std::path::Path;
use std::sync::Arc;

use tokenizers::Tokenizer;

use crate::core::config::ModelConfig;
use crate::core::errors::{CompanionError, Result};

/// Synchronous token counting used to price every turn.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<usize>;
}

/// Exact counts from the model's own `tokenizer.json`.
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
}

impl HfTokenCounter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            CompanionError::Tokenization(format!(
                "Failed to load tokenizer {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self { tokenizer })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(CompanionError::tokenization)?;
        Ok(encoding.get_ids().len())
    }
}

/// Roughly four bytes per token. Used when no tokenizer file is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimatedTokenCounter;

impl TokenCounter for EstimatedTokenCounter {
    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.len().div_ceil(4))
    }
}

/// Picks the exact counter when `tokenizer_path` is set.
pub fn counter_for(config: &ModelConfig) -> Result<Arc<dyn TokenCounter>> {
    match &config.tokenizer_path {
        Some(path) => {
            let counter = HfTokenCounter::from_file(path)?;
            tracing::info!("Loaded tokenizer from {}", path.display());
            Ok(Arc::new(counter))
        }
        None => {
            tracing::warn!("No tokenizer_path configured; estimating token counts");
            Ok(Arc::new(EstimatedTokenCounter))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn estimate_rounds_up() {
        let counter = EstimatedTokenCounter;
        assert_eq!(counter.count_tokens("").unwrap(), 0);
        assert_eq!(counter.count_tokens("abc").unwrap(), 1);
        assert_eq!(counter.count_tokens("abcd").unwrap(), 1);
        assert_eq!(counter.count_tokens("abcde").unwrap(), 2);
    }

    #[test]
    fn longer_text_costs_more() {
        let counter = EstimatedTokenCounter;
        assert!(
            counter.count_tokens("This is a longer sentence.").unwrap()
                > counter.count_tokens("Hi").unwrap()
        );
    }

    #[test]
    fn missing_tokenizer_file_is_a_tokenization_error() {
        let result = HfTokenCounter::from_file(&PathBuf::from("/nonexistent/tokenizer.json"));
        assert!(matches!(result, Err(CompanionError::Tokenization(_))));
    }

    #[test]
    fn counter_for_falls_back_to_estimate() {
        let counter = counter_for(&ModelConfig::default()).unwrap();
        assert_eq!(counter.count_tokens("abcdefgh").unwrap(), 2);
    }
}
