//! Environment-derived configuration.
//!
//! The core only checks whether values are present; it never talks to the
//! services the credentials belong to. [`InferaConfig::from_lookup`] takes a
//! lookup function so tests can build configurations without touching the
//! process environment.

use std::fmt;
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::paths::{DATA_DIR_ENV, data_root};

/// Default first port handed to server processes.
pub const DEFAULT_PORT_BASE: u16 = 8100;

/// Default last port (inclusive) handed to server processes.
pub const DEFAULT_PORT_MAX: u16 = 8199;

/// Default launch command; the model path and flags are appended.
pub const DEFAULT_SERVER_COMMAND: &str = "vllm serve";

/// Default repository fetch tool.
pub const DEFAULT_FETCH_COMMAND: &str = "huggingface-cli";

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Object-store credential pair.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for ObjectStoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Configuration consumed by the supervisors and the composition root.
#[derive(Debug, Clone)]
pub struct InferaConfig {
    pub port_base: u16,
    pub port_max: u16,
    /// Host every server process binds to.
    pub host: String,
    /// Executable followed by its leading arguments.
    pub server_command: Vec<String>,
    /// Artifact storage root.
    pub models_dir: PathBuf,
    /// File holding the persisted process records.
    pub state_file: PathBuf,
    /// Repository fetch tool executable.
    pub fetch_command: String,
    pub object_store_credentials: Option<ObjectStoreCredentials>,
    pub repository_token: Option<String>,
}

impl InferaConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port_base = parse_port(get("INFERA_PORT_BASE"), "INFERA_PORT_BASE", DEFAULT_PORT_BASE)?;
        let port_max = parse_port(get("INFERA_PORT_MAX"), "INFERA_PORT_MAX", DEFAULT_PORT_MAX)?;
        if port_max < port_base {
            return Err(ValidationError::new(
                "INFERA_PORT_MAX",
                format!("{port_max} is below INFERA_PORT_BASE {port_base}"),
            ));
        }

        let server_command: Vec<String> = get("INFERA_SERVER_CMD")
            .unwrap_or_else(|| DEFAULT_SERVER_COMMAND.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if server_command.is_empty() {
            return Err(ValidationError::new("INFERA_SERVER_CMD", "must not be empty"));
        }

        let root = data_root(get(DATA_DIR_ENV).as_deref())
            .map_err(|e| ValidationError::new(DATA_DIR_ENV, e.to_string()))?;
        let models_dir = get("INFERA_MODELS_DIR").map_or_else(|| root.join("models"), PathBuf::from);
        let state_file =
            get("INFERA_STATE_FILE").map_or_else(|| root.join("processes.json"), PathBuf::from);

        let object_store_credentials = match (get("AWS_ACCESS_KEY_ID"), get("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(ObjectStoreCredentials {
                access_key_id,
                secret_access_key,
            }),
            _ => None,
        };

        Ok(Self {
            port_base,
            port_max,
            host: get("INFERA_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            server_command,
            models_dir,
            state_file,
            fetch_command: get("INFERA_FETCH_CMD").unwrap_or_else(|| DEFAULT_FETCH_COMMAND.to_string()),
            object_store_credentials,
            repository_token: get("HF_TOKEN"),
        })
    }
}

fn parse_port(value: Option<String>, key: &str, default: u16) -> Result<u16, ValidationError> {
    value.map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p >= 1024)
            .ok_or_else(|| ValidationError::new(key, format!("'{raw}' is not a port >= 1024")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<InferaConfig, ValidationError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        InferaConfig::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("INFERA_DATA_DIR", "/data")]).unwrap();
        assert_eq!(cfg.port_base, DEFAULT_PORT_BASE);
        assert_eq!(cfg.port_max, DEFAULT_PORT_MAX);
        assert_eq!(cfg.server_command, vec!["vllm", "serve"]);
        assert_eq!(cfg.models_dir, PathBuf::from("/data/models"));
        assert_eq!(cfg.state_file, PathBuf::from("/data/processes.json"));
        assert!(cfg.object_store_credentials.is_none());
    }

    #[test]
    fn test_credentials_require_both_values() {
        let cfg = config(&[("INFERA_DATA_DIR", "/d"), ("AWS_ACCESS_KEY_ID", "AK")]).unwrap();
        assert!(cfg.object_store_credentials.is_none());

        let cfg = config(&[
            ("INFERA_DATA_DIR", "/d"),
            ("AWS_ACCESS_KEY_ID", "AK"),
            ("AWS_SECRET_ACCESS_KEY", "SK"),
        ])
        .unwrap();
        let creds = cfg.object_store_credentials.unwrap();
        assert_eq!(creds.access_key_id, "AK");
        assert!(!format!("{creds:?}").contains("SK"));
    }

    #[test]
    fn test_port_range_validation() {
        let err = config(&[
            ("INFERA_DATA_DIR", "/d"),
            ("INFERA_PORT_BASE", "9000"),
            ("INFERA_PORT_MAX", "8000"),
        ])
        .unwrap_err();
        assert_eq!(err.field, "INFERA_PORT_MAX");

        assert!(config(&[("INFERA_DATA_DIR", "/d"), ("INFERA_PORT_BASE", "80")]).is_err());
    }

    #[test]
    fn test_custom_server_command() {
        let cfg = config(&[
            ("INFERA_DATA_DIR", "/d"),
            ("INFERA_SERVER_CMD", "python -m vllm.entrypoints.openai.api_server --model"),
        ])
        .unwrap();
        assert_eq!(cfg.server_command[0], "python");
        assert_eq!(cfg.server_command.len(), 5);
    }
}
