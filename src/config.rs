use std::path::Path;

use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_VAR: &str = "OMNI_TENSOR_CONFIG";
pub const IMPLICIT_BACKEND_VAR: &str = "OMNI_TENSOR_IMPLICIT_BACKEND";
pub const DYNAMIC_BACKEND_VAR: &str = "OMNI_TENSOR_DYNAMIC_BACKEND";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Backend used when nothing is set and inference finds no native array.
    pub implicit_backend: String,
    /// Default `dynamic_backend` flag of newly created arrays and containers.
    /// The flag is process-wide: it is seeded once from [`from_env`](Self::from_env)
    /// and changed with [`crate::tracking::set_dynamic_backend`], so handlers
    /// built from an explicit config do not read this field.
    pub dynamic_backend: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            implicit_backend: crate::backends::NDARRAY.to_string(),
            dynamic_backend: false,
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

impl HandlerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Reads the file named by `OMNI_TENSOR_CONFIG` if set, then applies the
    /// individual variable overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Ok(name) = std::env::var(IMPLICIT_BACKEND_VAR) {
            config.implicit_backend = name;
        }
        if let Ok(flag) = std::env::var(DYNAMIC_BACKEND_VAR) {
            config.dynamic_backend = parse_flag(DYNAMIC_BACKEND_VAR, &flag)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = HandlerConfig::from_json_str(r#"{"dynamic_backend": true}"#).unwrap();
        assert_eq!(config.implicit_backend, "ndarray");
        assert!(config.dynamic_backend);
        assert!(HandlerConfig::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn test_flag_parsing() {
        assert!(parse_flag("x", "TRUE").unwrap());
        assert!(!parse_flag("x", "0").unwrap());
        assert!(matches!(parse_flag("x", "maybe"), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omni.json");
        std::fs::write(&path, r#"{"implicit_backend": "traced"}"#).unwrap();
        let config = HandlerConfig::from_file(&path).unwrap();
        assert_eq!(config.implicit_backend, "traced");
        assert!(!config.dynamic_backend);
    }
}
