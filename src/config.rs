//! Service configuration read from the environment.

use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
const DEFAULT_API_KEY: &str = "change-me";
const DEFAULT_MODEL_PATH: &str = "models/tomato_disease_model";
const CLASS_LIST_FILE: &str = "class_list.txt";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub backend_url: String,
    pub backend_api_key: String,
    pub send_to_backend: bool,
    pub model_path: PathBuf,
    pub class_list_path: PathBuf,
    /// Where to fetch the model from when `model_path` does not exist.
    pub model_url: Option<String>,
    pub debug: bool,
    pub port: u16,
    pub body_limit_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|value| value.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };

        let model_path = PathBuf::from(
            lookup("MODEL_PATH").unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
        );
        let class_list_path = lookup("CLASS_LIST_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_class_list_path(&model_path));

        let body_limit_bytes = {
            let mb = lookup("BODY_LIMIT_MB")
                .unwrap_or_else(|| "32".into())
                .parse::<usize>()
                .map_err(|_| Error::Config("BODY_LIMIT_MB must be a valid integer".into()))?;
            mb * 1024 * 1024
        };

        let port = lookup("PORT")
            .unwrap_or_else(|| "5001".into())
            .parse::<u16>()
            .map_err(|_| {
                Error::Config("PORT must be a valid number between 0 and 65535".into())
            })?;

        Ok(ServiceConfig {
            backend_url: lookup("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.into()),
            backend_api_key: lookup("BACKEND_API_KEY").unwrap_or_else(|| DEFAULT_API_KEY.into()),
            send_to_backend: flag("SEND_TO_BACKEND", true),
            model_path,
            class_list_path,
            model_url: lookup("MODEL_URL").filter(|url| !url.is_empty()),
            debug: flag("DEBUG", false),
            port,
            body_limit_bytes,
        })
    }

    /// First characters of the API key, for the startup banner.
    pub fn masked_api_key(&self) -> String {
        if self.backend_api_key.chars().count() > 10 {
            let prefix: String = self.backend_api_key.chars().take(10).collect();
            format!("{}...", prefix)
        } else {
            "not configured".to_string()
        }
    }
}

/// `class_list.txt` inside a SavedModel directory, or beside a frozen graph.
pub fn default_class_list_path(model_path: &std::path::Path) -> PathBuf {
    if model_path.extension().is_some() {
        model_path.with_file_name(CLASS_LIST_FILE)
    } else {
        model_path.join(CLASS_LIST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.backend_url, "http://localhost:5000");
        assert!(config.send_to_backend);
        assert!(!config.debug);
        assert_eq!(config.port, 5001);
        assert_eq!(config.body_limit_bytes, 32 * 1024 * 1024);
        assert_eq!(
            config.class_list_path,
            PathBuf::from("models/tomato_disease_model/class_list.txt")
        );
        assert!(config.model_url.is_none());
    }

    #[test]
    fn flags_are_case_insensitive() {
        let config = config_from(&[("SEND_TO_BACKEND", "FALSE"), ("DEBUG", "True")]).unwrap();
        assert!(!config.send_to_backend);
        assert!(config.debug);
    }

    #[test]
    fn frozen_graph_looks_for_labels_beside_it() {
        let config = config_from(&[("MODEL_PATH", "model/frozen_graph.pb")]).unwrap();
        assert_eq!(config.class_list_path, PathBuf::from("model/class_list.txt"));
    }

    #[test]
    fn bad_port_is_a_config_error() {
        let err = config_from(&[("PORT", "70000")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn api_key_is_masked() {
        let config = config_from(&[("BACKEND_API_KEY", "abcdefghijklmnop")]).unwrap();
        assert_eq!(config.masked_api_key(), "abcdefghij...");
    }
}
