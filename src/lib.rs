pub mod context;
pub mod core;
pub mod history;
pub mod llm;
pub mod session;
pub mod vector_math;

pub use crate::context::{ContextWindowManager, Role, TrimBoundary, Turn};
pub use crate::core::config::AppConfig;
pub use crate::core::errors::{CompanionError, Result};
pub use crate::history::{ConversationStore, Message, RelevantMessage, Thread};
pub use crate::session::ChatSession;
