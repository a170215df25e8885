use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompanionError>;

#[derive(Debug, Error)]
pub enum CompanionError {
    /// The tokenizer could not count a turn. Fatal to the current turn.
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    /// The storage backend is unreachable or rejected a statement.
    #[error("storage error: {0}")]
    Storage(String),
    /// Embedding generation failed. Messages are still persisted.
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CompanionError {
    pub fn tokenization<E: std::fmt::Display>(err: E) -> Self {
        CompanionError::Tokenization(err.to_string())
    }

    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        CompanionError::Storage(err.to_string())
    }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self {
        CompanionError::Embedding(err.to_string())
    }

    pub fn inference<E: std::fmt::Display>(err: E) -> Self {
        CompanionError::Inference(err.to_string())
    }

    pub fn config<E: std::fmt::Display>(err: E) -> Self {
        CompanionError::Config(err.to_string())
    }

    /// Only embedding failures are swallowed (logged) by the core.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CompanionError::Embedding(_))
    }
}

impl From<sqlx::Error> for CompanionError {
    fn from(err: sqlx::Error) -> Self {
        CompanionError::storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_embedding_errors_are_recoverable() {
        assert!(CompanionError::embedding("timeout").is_recoverable());
        assert!(!CompanionError::storage("disk full").is_recoverable());
        assert!(!CompanionError::tokenization("bad utf8").is_recoverable());
    }

    #[test]
    fn display_keeps_the_raw_cause() {
        let err = CompanionError::inference("connection refused");
        assert_eq!(err.to_string(), "inference failed: connection refused");
    }
}
