use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::defaults::CONFIG_FILE_NAME;
use super::paths::AppPaths;
use super::types::AppConfig;
use super::validation::{validate_app_config, validate_config};
use crate::core::errors::CompanionError;

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Files merged in order, later ones overriding earlier keys. An explicit
    /// `COMPANION_CONFIG_PATH` replaces the layered lookup entirely.
    pub fn config_layers(&self) -> Vec<PathBuf> {
        if let Ok(path) = env::var("COMPANION_CONFIG_PATH") {
            return vec![PathBuf::from(path)];
        }

        vec![
            self.paths.project_root.join(CONFIG_FILE_NAME),
            self.paths.user_data_dir.join(CONFIG_FILE_NAME),
        ]
    }

    pub fn load_config(&self) -> Result<AppConfig, CompanionError> {
        let mut merged = Value::Object(Map::new());
        for path in self.config_layers() {
            let layer = load_yaml_file(&path)?;
            merged = deep_merge(&merged, &layer);
        }
        parse_config(merged)
    }
}

/// Validates a raw config tree and fills in defaults.
pub fn parse_config(raw: Value) -> Result<AppConfig, CompanionError> {
    validate_config(&raw)?;
    let config: AppConfig = serde_json::from_value(raw).map_err(CompanionError::config)?;
    validate_app_config(&config)?;
    Ok(config)
}

fn load_yaml_file(path: &Path) -> Result<Value, CompanionError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        CompanionError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let value = serde_yaml::from_str::<Value>(&contents).map_err(|e| {
        CompanionError::Config(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(CompanionError::Config(format!(
            "{} must contain a mapping at the top level",
            path.display()
        ))),
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::context::TrimBoundary;

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "model": { "n_ctx": 2048, "top_p": 0.9 },
            "chat": { "default_title": "New Chat" }
        });
        let override_value = json!({
            "model": { "n_ctx": 4096 },
            "memory": { "top_n": 5 }
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "model": { "n_ctx": 4096, "top_p": 0.9 },
                "chat": { "default_title": "New Chat" },
                "memory": { "top_n": 5 }
            })
        );
    }

    #[test]
    fn load_yaml_file_missing_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let value = load_yaml_file(&tmp.path().join("absent.yml")).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn load_yaml_file_rejects_malformed_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yml");
        fs::write(&path, "model: [unclosed").unwrap();
        assert!(matches!(
            load_yaml_file(&path),
            Err(CompanionError::Config(_))
        ));
    }

    #[test]
    fn user_layer_overrides_project_layer() {
        let tmp = tempfile::tempdir().unwrap();
        let project = tmp.path().join("project");
        let data = tmp.path().join("data");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(
            project.join(CONFIG_FILE_NAME),
            "model:\n  n_ctx: 4096\n  max_tokens: 512\nchat:\n  trim_boundary: exclude\n",
        )
        .unwrap();
        fs::write(data.join(CONFIG_FILE_NAME), "model:\n  max_tokens: 1024\n").unwrap();

        let service = ConfigService::new(Arc::new(AppPaths::with_data_dir(project, data)));
        let config = service.load_config().unwrap();

        assert_eq!(config.model.n_ctx, 4096);
        assert_eq!(config.model.max_tokens, 1024);
        assert_eq!(config.chat.trim_boundary, TrimBoundary::Exclude);
    }

    #[test]
    fn server_side_keys_are_ignored() {
        let raw = json!({ "model": { "n_ctx": 4096, "n_gpu_layers": 99 } });
        let config = parse_config(raw).unwrap();
        assert_eq!(config.model.n_ctx, 4096);
    }

    #[test]
    fn parse_config_rejects_reply_larger_than_context() {
        let raw = json!({ "model": { "n_ctx": 128, "max_tokens": 256 } });
        assert!(parse_config(raw).is_err());
    }
}
