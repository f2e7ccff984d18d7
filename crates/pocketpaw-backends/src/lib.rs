pub mod backend;
pub mod event;
pub mod http_adapter;
pub mod ndjson;
pub mod sse;
pub mod subprocess;

pub use backend::Backend;
pub use event::{AgentEvent, AgentEventStream};
pub use http_adapter::{HttpBackend, HttpBackendConfig};
pub use ndjson::{codex_translator, gemini_translator, qwen_translator, NdjsonTranslator};
pub use subprocess::{SubprocessBackend, SubprocessBackendConfig};

use pocketpaw_domain::capability::LlmCapabilities;
use pocketpaw_domain::BackendInfo;

/// Static [`BackendInfo`] for the three subprocess-driven CLI backends and
/// the generic HTTP-compatible one, grounded in the teacher's per-provider
/// `capabilities()` constants.
pub fn codex_backend_info() -> BackendInfo {
    let mut info = BackendInfo::new("codex");
    info.capabilities = LlmCapabilities { tools: true, streaming: true, json_mode: false };
    info.builtin_tools = vec!["shell".into(), "file_edit".into()];
    info.required_keys = vec!["OPENAI_API_KEY".into()];
    info
}

pub fn gemini_backend_info() -> BackendInfo {
    let mut info = BackendInfo::new("gemini");
    info.capabilities = LlmCapabilities { tools: true, streaming: true, json_mode: true };
    info.builtin_tools = vec!["shell".into()];
    info.required_keys = vec!["GEMINI_API_KEY".into()];
    info
}

pub fn qwen_backend_info() -> BackendInfo {
    let mut info = BackendInfo::new("qwen");
    info.capabilities = LlmCapabilities { tools: true, streaming: true, json_mode: false };
    info.builtin_tools = vec!["shell".into()];
    info.required_keys = vec!["QWEN_API_KEY".into()];
    info
}

pub fn http_compat_backend_info(name: &str) -> BackendInfo {
    let mut info = BackendInfo::new(name);
    info.capabilities = LlmCapabilities { tools: true, streaming: true, json_mode: true };
    info.supported_providers = vec!["openai-compat".into(), "g4f".into()];
    info
}
