//! Built-in configuration values used when `config.yml` omits a key.

pub const DEFAULT_MODEL_PATH: &str = "models/model.gguf";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_N_CTX: usize = 2048;
pub const DEFAULT_MAX_TOKENS: usize = 256;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_MEMORY_TOP_N: usize = 3;
pub const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant.";
pub const DEFAULT_THREAD_TITLE: &str = "New Chat";
pub const DEFAULT_TITLE_MAX_CHARS: usize = 40;

pub const CONFIG_FILE_NAME: &str = "config.yml";
pub const DB_FILE_NAME: &str = "chat_history.db";
