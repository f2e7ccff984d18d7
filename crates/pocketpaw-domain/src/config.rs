use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

impl Config {
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw).map_err(|e| crate::error::Error::Config(e.to_string()))?;
        Ok(cfg)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server / bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind")]
    pub bind: String,
    #[serde(default = "d_inbound_capacity")]
    pub inbound_capacity: usize,
    #[serde(default = "d_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: d_bind(),
            inbound_capacity: d_inbound_capacity(),
            outbound_capacity: d_outbound_capacity(),
        }
    }
}

fn d_bind() -> String {
    "127.0.0.1:8700".into()
}
fn d_inbound_capacity() -> usize {
    256
}
fn d_outbound_capacity() -> usize {
    1024
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory / compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_memory_dir")]
    pub dir: PathBuf,
    #[serde(default = "d_max_turns")]
    pub max_turns: usize,
    #[serde(default = "d_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: d_memory_dir(),
            max_turns: d_max_turns(),
            flush_interval_ms: d_flush_interval_ms(),
        }
    }
}

fn d_memory_dir() -> PathBuf {
    PathBuf::from("./data/sessions")
}
fn d_max_turns() -> usize {
    40
}
fn d_flush_interval_ms() -> u64 {
    5_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context builder caps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub identity: String,
    #[serde(default = "d_facts_max_chars")]
    pub facts_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            identity: "PocketPaw, a personal AI assistant.".into(),
            facts_max_chars: d_facts_max_chars(),
        }
    }
}

fn d_facts_max_chars() -> usize {
    4_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent / routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_backend")]
    pub agent_backend: String,
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_conversations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_backend: d_backend(),
            max_concurrent_conversations: d_max_concurrent(),
        }
    }
}

fn d_backend() -> String {
    "ai-fast-api".into()
}
fn d_max_concurrent() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Subprocess,
    HttpCompat,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugins
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "d_plugins_dir")]
    pub dir: PathBuf,
    #[serde(default = "d_install_timeout_s")]
    pub install_timeout_s: u64,
    #[serde(default = "d_stop_hook_timeout_s")]
    pub stop_hook_timeout_s: u64,
    #[serde(default = "d_graceful_exit_timeout_s")]
    pub graceful_exit_timeout_s: u64,
    #[serde(default = "d_proxy_timeout_s")]
    pub proxy_timeout_s: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: d_plugins_dir(),
            install_timeout_s: d_install_timeout_s(),
            stop_hook_timeout_s: d_stop_hook_timeout_s(),
            graceful_exit_timeout_s: d_graceful_exit_timeout_s(),
            proxy_timeout_s: d_proxy_timeout_s(),
        }
    }
}

fn d_plugins_dir() -> PathBuf {
    PathBuf::from("./data/plugins")
}
fn d_install_timeout_s() -> u64 {
    300
}
fn d_stop_hook_timeout_s() -> u64 {
    10
}
fn d_graceful_exit_timeout_s() -> u64 {
    5
}
fn d_proxy_timeout_s() -> u64 {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OAuth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "d_oauth_ttl_min")]
    pub session_ttl_min: i64,
    #[serde(default = "d_oauth_url_timeout_s")]
    pub url_capture_timeout_s: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_min: d_oauth_ttl_min(),
            url_capture_timeout_s: d_oauth_url_timeout_s(),
        }
    }
}

fn d_oauth_ttl_min() -> i64 {
    15
}
fn d_oauth_url_timeout_s() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).unwrap();
        let parsed: Config = toml::from_str(&s).unwrap();
        assert_eq!(parsed.agent.max_concurrent_conversations, cfg.agent.max_concurrent_conversations);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load_or_default(std::path::Path::new("/nonexistent/pocketpaw.toml")).unwrap();
        assert_eq!(cfg.plugins.install_timeout_s, 300);
    }
}
