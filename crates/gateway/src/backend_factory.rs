//! Builds the single active [`Backend`] the Router holds, from the
//! `[backends.*]` tables in config keyed by the `agent_backend` setting.
//! Grounded in `sa_providers::registry::ProviderRegistry::from_config`'s
//! per-entry dispatch on `ProviderKind`, reduced to PocketPaw's two
//! adapter families (spec §4.E).

use std::collections::HashMap;
use std::sync::Arc;

use pocketpaw_backends::{
    codex_backend_info, gemini_backend_info, http_compat_backend_info, qwen_backend_info, Backend,
    HttpBackend, HttpBackendConfig, SubprocessBackend, SubprocessBackendConfig,
};
use pocketpaw_backends::{codex_translator, gemini_translator, qwen_translator};
use pocketpaw_domain::config::{BackendConfig, BackendKind};
use pocketpaw_domain::{Error, Result};
use pocketpaw_router::BackendFactory;

fn build_backend(name: &str, cfg: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match cfg.kind {
        BackendKind::Subprocess => {
            let program = cfg
                .program
                .clone()
                .ok_or_else(|| Error::Config(format!("backend '{name}': subprocess kind requires `program`")))?;
            let mut sub_cfg = SubprocessBackendConfig::new(program);
            sub_cfg.args = cfg.args.clone();
            sub_cfg.model = cfg.model.clone();

            let (translator, info) = match name {
                "codex" => (codex_translator(), codex_backend_info()),
                "qwen" => (qwen_translator(), qwen_backend_info()),
                "gemini" => (gemini_translator(), gemini_backend_info()),
                other => {
                    return Err(Error::Config(format!(
                        "no NDJSON translator registered for subprocess backend '{other}' -- only codex/qwen/gemini are wired"
                    )))
                }
            };
            Ok(Arc::new(SubprocessBackend::new(sub_cfg, info, translator)) as Arc<dyn Backend>)
        }
        BackendKind::HttpCompat => {
            let base_url = cfg
                .base_url
                .clone()
                .ok_or_else(|| Error::Config(format!("backend '{name}': http_compat kind requires `base_url`")))?;
            let model = cfg.model.clone().unwrap_or_else(|| "default".into());
            let http_cfg = HttpBackendConfig { base_url, api_key: cfg.api_key.clone(), model };
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .map_err(|e| Error::Config(format!("building HTTP client for backend '{name}': {e}")))?;
            Ok(Arc::new(HttpBackend::new(client, http_cfg, http_compat_backend_info(name))) as Arc<dyn Backend>)
        }
    }
}

/// Returns a [`BackendFactory`] the [`pocketpaw_router::AgentRouter`]
/// calls lazily -- re-reads `backends` each time so a `reset_router` after
/// a config reload picks up the new entry without rebuilding the factory
/// itself.
pub fn backend_factory(agent_backend: String, backends: HashMap<String, BackendConfig>) -> BackendFactory {
    Box::new(move || {
        let cfg = backends.get(&agent_backend).ok_or_else(|| {
            Error::Config(format!("agent_backend '{agent_backend}' has no matching [backends.{agent_backend}] entry"))
        })?;
        build_backend(&agent_backend, cfg)
    })
}

/// Static [`pocketpaw_domain::BackendInfo`] for the configured
/// `agent_backend`, used by the Context Builder's capability section
/// (spec §4.C) without needing to construct the backend itself.
pub fn backend_info(agent_backend: &str, backends: &HashMap<String, BackendConfig>) -> Option<pocketpaw_domain::BackendInfo> {
    let cfg = backends.get(agent_backend)?;
    match cfg.kind {
        BackendKind::Subprocess => match agent_backend {
            "codex" => Some(codex_backend_info()),
            "qwen" => Some(qwen_backend_info()),
            "gemini" => Some(gemini_backend_info()),
            _ => None,
        },
        BackendKind::HttpCompat => Some(http_compat_backend_info(agent_backend)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subprocess_cfg(program: &str) -> BackendConfig {
        BackendConfig { kind: BackendKind::Subprocess, program: Some(program.into()), args: Vec::new(), base_url: None, api_key: None, model: None }
    }

    fn http_cfg(base_url: &str) -> BackendConfig {
        BackendConfig { kind: BackendKind::HttpCompat, program: None, args: Vec::new(), base_url: Some(base_url.into()), api_key: None, model: None }
    }

    #[test]
    fn subprocess_backend_requires_program() {
        let mut cfg = subprocess_cfg("codex");
        cfg.program = None;
        let err = build_backend("codex", &cfg).unwrap_err();
        assert!(err.to_string().contains("requires `program`"));
    }

    #[test]
    fn subprocess_backend_rejects_unknown_names() {
        let err = build_backend("carrier-pigeon", &subprocess_cfg("carrier-pigeon")).unwrap_err();
        assert!(err.to_string().contains("no NDJSON translator registered"));
    }

    #[test]
    fn subprocess_backend_builds_for_known_names() {
        assert!(build_backend("codex", &subprocess_cfg("codex")).is_ok());
        assert!(build_backend("qwen", &subprocess_cfg("qwen")).is_ok());
        assert!(build_backend("gemini", &subprocess_cfg("gemini")).is_ok());
    }

    #[test]
    fn http_compat_backend_requires_base_url() {
        let mut cfg = http_cfg("http://localhost:11434/v1");
        cfg.base_url = None;
        let err = build_backend("ollama", &cfg).unwrap_err();
        assert!(err.to_string().contains("requires `base_url`"));
    }

    #[test]
    fn http_compat_backend_builds_with_base_url() {
        assert!(build_backend("ollama", &http_cfg("http://localhost:11434/v1")).is_ok());
    }

    #[test]
    fn backend_info_is_none_for_unconfigured_backend() {
        assert!(backend_info("codex", &HashMap::new()).is_none());
    }

    #[test]
    fn backend_info_resolves_known_subprocess_backend() {
        let mut backends = HashMap::new();
        backends.insert("codex".to_string(), subprocess_cfg("codex"));
        assert!(backend_info("codex", &backends).is_some());
    }

    #[test]
    fn backend_factory_errors_when_agent_backend_has_no_entry() {
        let factory = backend_factory("codex".to_string(), HashMap::new());
        assert!(factory().is_err());
    }
}
