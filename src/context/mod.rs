//! Context management module.
//!
//! Provides token window management for LLM context.

mod turn;
mod window;

pub use turn::{format_for_count, Role, Turn};
pub use window::{retained_start, ContextWindowManager, TrimBoundary};
