use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NodeflowError, Result};
use crate::types::AccessToken;

/// Top-level nodeflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub bridge: Option<BridgeConfig>,
    #[serde(default)]
    pub gcp: Option<GcpConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model used by nodes that don't name their own.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "gemini".to_string() }
fn default_model_id() -> String { "gemini-2.5-flash".to_string() }
fn default_temperature() -> f32 { 0.7 }

/// Caller-side retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// What the traversal controller does when a node is reached again.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RevisitPolicy {
    /// Already-executed nodes are skipped silently.
    #[default]
    Skip,
    /// Nodes may run again; cycles end at the iteration limit.
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on worklist pops per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub revisit_policy: RevisitPolicy,
    /// Yield to the runtime between node activations.
    #[serde(default = "default_yield_between_steps")]
    pub yield_between_steps: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            revisit_policy: RevisitPolicy::default(),
            yield_between_steps: default_yield_between_steps(),
        }
    }
}

fn default_max_iterations() -> usize { 100 }
fn default_yield_between_steps() -> bool { true }

/// Conversation memory backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite", "memory", or "none".
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    /// SQLite database path. Default: <workspace>/memory.db
    #[serde(default)]
    pub path: Option<String>,
    /// Prefix prepended to every memory key in the store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_memory_backend() -> String { "sqlite".to_string() }
fn default_key_prefix() -> String { "nodeflow_memory_".to_string() }

/// Remote automation bridge endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub url: String,
    pub token: String,
    #[serde(default = "default_bridge_timeout")]
    pub timeout_secs: u64,
}

fn default_bridge_timeout() -> u64 { 60 }

/// Delegated Google credential for GCP-backed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Billing project for BigQuery jobs.
    #[serde(default)]
    pub project_id: Option<String>,
}

impl GcpConfig {
    pub fn to_token(&self) -> Option<AccessToken> {
        self.access_token.as_ref().map(|token| AccessToken {
            token: token.clone(),
            scopes: self.scopes.clone(),
            expires_at: self.expires_at,
        })
    }
}

/// JSONL run archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for run logs. Default: <workspace>/runs
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

fn default_log_enabled() -> bool { true }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| NodeflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| NodeflowError::Config(e.to_string()))
    }

    /// Build a config from environment variables alone.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.model.api_key = std::env::var("GEMINI_API_KEY").ok();
        if let (Ok(url), Ok(token)) = (
            std::env::var("NODEFLOW_BRIDGE_URL"),
            std::env::var("NODEFLOW_BRIDGE_TOKEN"),
        ) {
            config.bridge = Some(BridgeConfig {
                url,
                token,
                timeout_secs: default_bridge_timeout(),
            });
        }
        if let Ok(token) = std::env::var("GOOGLE_ACCESS_TOKEN") {
            config.gcp = Some(GcpConfig {
                access_token: Some(token),
                scopes: vec!["https://www.googleapis.com/auth/cloud-platform".to_string()],
                expires_at: None,
                project_id: std::env::var("GOOGLE_CLOUD_PROJECT").ok(),
            });
        }
        config
    }

    /// Resolve the workspace directory (~/.nodeflow).
    pub fn workspace_dir(&self) -> PathBuf {
        dirs_home()
            .map(|h| h.join(".nodeflow"))
            .unwrap_or_else(|| PathBuf::from(".nodeflow"))
    }

    pub fn memory_db_path(&self) -> PathBuf {
        match self.memory.path {
            Some(ref p) => expand_home(p),
            None => self.workspace_dir().join("memory.db"),
        }
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref()?;
        if !log.enabled {
            return None;
        }
        Some(match log.log_dir {
            Some(ref dir) => expand_home(dir),
            None => self.workspace_dir().join("runs"),
        })
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_NODEFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_NODEFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_NODEFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_NODEFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_NODEFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.model.provider, "gemini");
        assert_eq!(config.engine.max_iterations, 100);
        assert_eq!(config.engine.revisit_policy, RevisitPolicy::Skip);
        assert!(config.engine.yield_between_steps);
        assert_eq!(config.memory.backend, "sqlite");
        assert!(config.bridge.is_none());
        assert!(config.gcp.is_none());
    }

    #[test]
    fn test_bridge_and_gcp_sections() {
        let toml_str = r#"
[engine]
max_iterations = 20
revisit_policy = "allow"

[bridge]
url = "https://script.google.com/macros/s/abc/exec"
token = "shared-secret"

[gcp]
access_token = "ya29.token"
scopes = ["https://www.googleapis.com/auth/bigquery"]
project_id = "my-project"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_iterations, 20);
        assert_eq!(config.engine.revisit_policy, RevisitPolicy::Allow);

        let bridge = config.bridge.unwrap();
        assert_eq!(bridge.timeout_secs, 60);
        assert_eq!(bridge.token, "shared-secret");

        let token = config.gcp.unwrap().to_token().unwrap();
        assert!(token.is_valid_for("https://www.googleapis.com/auth/bigquery"));
    }

    #[test]
    fn test_log_dir_disabled() {
        let config: AppConfig = toml::from_str("[log]\nenabled = false\n").unwrap();
        assert!(config.log_dir().is_none());
    }
}
