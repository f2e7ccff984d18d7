use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// On-disk plugin manifest (`pocketpaw.json`). Unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub start_cmd: String,
    #[serde(default)]
    pub install_cmd: Option<String>,
    #[serde(default)]
    pub stop_cmd: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub openapi_path: Option<String>,
    #[serde(default)]
    pub web_view: bool,
    #[serde(default)]
    pub web_view_path: Option<String>,
}

impl PluginManifest {
    /// `id` matches directory name, `start_cmd` non-empty, port (if set) in range.
    pub fn validate(&self, dir_name: &str) -> Result<(), String> {
        if self.id != dir_name {
            return Err(format!(
                "manifest id '{}' does not match directory '{}'",
                self.id, dir_name
            ));
        }
        if self.start_cmd.trim().is_empty() {
            return Err("start_cmd must be non-empty".into());
        }
        if let Some(port) = self.port {
            if port == 0 {
                return Err("port must be in [1, 65535]".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Running,
    Stopped,
    Ambiguous,
}

/// In-memory runtime record for a launched plugin. Created when `launch`
/// succeeds, destroyed when `stop` completes or `remove` is invoked. At
/// most one per plugin id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRuntime {
    pub plugin_id: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
    pub last_status: PluginStatus,
    #[serde(default)]
    pub config_overlay: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    Codex,
    Qwen,
    Gemini,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Codex => "codex",
            OAuthProvider::Qwen => "qwen",
            OAuthProvider::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthState {
    Pending,
    Completed,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSession {
    pub session_id: String,
    pub provider: OAuthProvider,
    pub verification_uri: String,
    #[serde(default)]
    pub user_code: Option<String>,
    pub state: OAuthState,
    pub started_at: DateTime<Utc>,
    pub last_polled_at: DateTime<Utc>,
}
