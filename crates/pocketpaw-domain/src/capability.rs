use serde::{Deserialize, Serialize};

/// Per-backend-class capability bitset. Constructed once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub tools: bool,
    pub streaming: bool,
    pub json_mode: bool,
}

/// Static metadata describing one backend class (subprocess or HTTP/SDK).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    pub capabilities: LlmCapabilities,
    pub builtin_tools: Vec<String>,
    pub required_keys: Vec<String>,
    pub supported_providers: Vec<String>,
}

impl BackendInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: LlmCapabilities::default(),
            builtin_tools: Vec::new(),
            required_keys: Vec::new(),
            supported_providers: Vec::new(),
        }
    }
}
