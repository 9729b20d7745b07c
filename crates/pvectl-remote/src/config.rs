use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection settings for the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://pve1.example.com:8006`.
    pub endpoint: String,
    /// API token id, `user@realm!tokenname`.
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub token_secret: Option<String>,
    /// Skip TLS certificate verification (self-signed cluster certificates).
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound for waiting on a single remote task.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_task_timeout_secs() -> u64 {
    600
}

impl ApiConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            token_id: None,
            token_secret: None,
            insecure: false,
            timeout_secs: default_timeout_secs(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token_id: &str, secret: &str) -> Self {
        self.token_id = Some(token_id.to_owned());
        self.token_secret = Some(secret.to_owned());
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_owned();
        self
    }

    /// `Authorization` header value, if a token is configured.
    pub fn authorization(&self) -> Option<String> {
        match (&self.token_id, &self.token_secret) {
            (Some(id), Some(secret)) => Some(format!("PVEAPIToken={id}={secret}")),
            _ => None,
        }
    }

    /// Load config from `~/.config/pvectl/api.json`.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid api config: {e}")))?;
        config.endpoint = config.endpoint.trim_end_matches('/').to_owned();
        if config.token_id.is_some() != config.token_secret.is_some() {
            return Err(RemoteError::Config(
                "token_id and token_secret must be set together".to_owned(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/pvectl/api.json"))
}
