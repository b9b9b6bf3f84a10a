use crate::{ManagerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LspConfig {
    pub enabled: bool,
    /// Seconds allowed for a server to start and answer `initialize`.
    pub timeout: u64,
    /// User server definitions by name. These win over the built-in registry.
    pub servers: BTreeMap<String, ServerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Passed through as `initializationOptions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_options: Option<Value>,
}

fn default_enabled() -> bool {
    true
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_TIMEOUT_SECS,
            servers: BTreeMap::new(),
        }
    }
}

impl LspConfig {
    /// Load from JSON, or TOML when the file ends in `.toml`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_error = |reason: String| ManagerError::Config {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| config_error(e.to_string()))?,
            _ => serde_json::from_str(&content).map_err(|e| config_error(e.to_string()))?,
        };
        config.validate().map_err(config_error)?;

        info!(
            "loaded LSP config from {} ({} server definition(s))",
            path.display(),
            config.servers.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.enabled && !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout) {
            return Err(format!(
                "timeout must be between 1 and {} seconds, got {}",
                MAX_TIMEOUT_SECS, self.timeout
            ));
        }

        for (name, server) in &self.servers {
            if server.command.trim().is_empty() {
                return Err(format!("server '{}' has an empty command", name));
            }
            if server.languages.is_empty() {
                return Err(format!("server '{}' lists no languages", name));
            }
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        match self.timeout {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }
}

impl ServerDefinition {
    pub fn new(command: &str, args: &[&str], languages: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            languages: languages.iter().map(|s| s.to_string()).collect(),
            enabled: true,
            init_options: None,
        }
    }

    pub fn handles(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }
}
