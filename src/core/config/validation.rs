use serde_json::{Map, Value};

use super::types::AppConfig;
use crate::core::errors::CompanionError;

/// Shape and range checks on the raw YAML tree, before deserialization.
pub fn validate_config(config: &Value) -> Result<(), CompanionError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(model) = expect_optional_object(root, "model")? {
        validate_optional_string_field(model, "model.path", "path")?;
        validate_optional_string_field(model, "model.server_url", "server_url")?;
        validate_optional_string_field(model, "model.tokenizer_path", "tokenizer_path")?;
        validate_u64_field(model, "model.n_ctx", "n_ctx", 1, 10_000_000)?;
        validate_u64_field(model, "model.max_tokens", "max_tokens", 1, 10_000_000)?;
        validate_f64_field(model, "model.temperature", "temperature", 0.0, 2.0)?;
        validate_f64_field(model, "model.top_p", "top_p", f64::MIN_POSITIVE, 1.0)?;
        validate_u64_field(
            model,
            "model.request_timeout_secs",
            "request_timeout_secs",
            1,
            86_400,
        )?;
    }

    if let Some(memory) = expect_optional_object(root, "memory")? {
        validate_bool_field(memory, "memory.enabled", "enabled")?;
        validate_u64_field(memory, "memory.top_n", "top_n", 1, 1_000)?;
        validate_u64_field(
            memory,
            "memory.embedding_timeout_ms",
            "embedding_timeout_ms",
            1,
            600_000,
        )?;
    }

    if let Some(chat) = expect_optional_object(root, "chat")? {
        validate_optional_string_field(chat, "chat.system_prompt", "system_prompt")?;
        validate_optional_string_field(chat, "chat.default_title", "default_title")?;
        validate_enum_field(
            chat,
            "chat.trim_boundary",
            "trim_boundary",
            &["include", "exclude"],
        )?;
        validate_u64_field(chat, "chat.title_max_chars", "title_max_chars", 1, 1_000)?;
    }

    Ok(())
}

/// Cross-field checks that need defaults filled in.
pub fn validate_app_config(config: &AppConfig) -> Result<(), CompanionError> {
    if config.model.max_tokens >= config.model.n_ctx {
        return Err(CompanionError::Config(format!(
            "model.max_tokens ({}) must be smaller than model.n_ctx ({})",
            config.model.max_tokens, config.model.n_ctx
        )));
    }
    if config.model.server_url.trim().is_empty() {
        return Err(CompanionError::Config(
            "model.server_url cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, CompanionError> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), CompanionError> {
    match section.get(key) {
        None | Some(Value::Bool(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "boolean")),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), CompanionError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "non-negative integer"));
    };
    if number < min || number > max {
        return Err(range_error(path, min, max));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), CompanionError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(range_error(path, min, max));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), CompanionError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "string")),
    }
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), CompanionError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if !allowed.contains(&text) {
        return Err(CompanionError::Config(format!(
            "Invalid config at '{}': expected one of {}",
            path,
            allowed.join(", ")
        )));
    }
    Ok(())
}

fn range_error<T: std::fmt::Display>(path: &str, min: T, max: T) -> CompanionError {
    CompanionError::Config(format!(
        "Invalid config at '{}': must be between {} and {}",
        path, min, max
    ))
}

fn config_type_error(path: &str, expected: &str) -> CompanionError {
    CompanionError::Config(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
