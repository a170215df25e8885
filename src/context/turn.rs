use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::CompanionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CompanionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(CompanionError::InvalidInput(format!(
                "unknown role: {}",
                other
            ))),
        }
    }
}

/// One role-tagged entry of the live prompt window. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
    token_cost: usize,
}

impl Turn {
    pub(crate) fn new(role: Role, content: String, token_cost: usize) -> Self {
        Self {
            role,
            content,
            token_cost,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn token_cost(&self) -> usize {
        self.token_cost
    }
}

/// Text the tokenizer sees when pricing a turn.
pub fn format_for_count(role: Role, content: &str) -> String {
    format!("{}: {}", role, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("narrator".parse::<Role>().is_err());
    }

    #[test]
    fn count_format_prefixes_role() {
        assert_eq!(format_for_count(Role::User, "hi"), "user: hi");
    }
}
