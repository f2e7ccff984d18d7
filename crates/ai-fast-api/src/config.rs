//! Runtime settings for the rotator HTTP service, read from the process
//! environment the Plugin Supervisor sets up (manifest `env` map plus
//! `PORT`, spec §4.I `launch`). Grounded in the teacher's layered config
//! loading, reduced to env-only since this binary has no config file of
//! its own -- the Supervisor is the one place PocketPaw-side settings for
//! a plugin live.

use std::collections::HashMap;
use std::num::NonZeroU32;

use pocketpaw_rotator::{BackendChain, BackendKind};

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub backend_chain: BackendChain,
    pub max_rotate_retry: NonZeroU32,
    pub default_models: HashMap<BackendKind, String>,
    pub g4f_base_url: String,
    pub ollama_base_url: String,
}

fn parse_backend_kind(token: &str) -> Option<BackendKind> {
    match token.trim().to_ascii_lowercase().as_str() {
        "g4f" => Some(BackendKind::G4f),
        "ollama" => Some(BackendKind::Ollama),
        "codex" => Some(BackendKind::Codex),
        "qwen" => Some(BackendKind::Qwen),
        "gemini" => Some(BackendKind::Gemini),
        _ => None,
    }
}

impl Settings {
    /// `PP_BACKEND_CHAIN` is a comma-separated ordered list, e.g.
    /// `"g4f,ollama,codex"`. Unknown tokens are skipped with a warning
    /// rather than failing startup -- a typo in one entry shouldn't take
    /// down the whole rotator.
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8787);

        let backend_chain: BackendChain = std::env::var("PP_BACKEND_CHAIN")
            .unwrap_or_else(|_| "g4f,ollama,codex,qwen,gemini".into())
            .split(',')
            .filter_map(|tok| {
                let kind = parse_backend_kind(tok);
                if kind.is_none() && !tok.trim().is_empty() {
                    tracing::warn!(token = tok, "unknown backend in PP_BACKEND_CHAIN, skipping");
                }
                kind
            })
            .collect();

        let max_rotate_retry = std::env::var("PP_MAX_ROTATE_RETRY")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .and_then(NonZeroU32::new)
            .unwrap_or_else(|| NonZeroU32::new(backend_chain.len().max(1) as u32).unwrap());

        let mut default_models = HashMap::new();
        for (kind, env_key, fallback) in [
            (BackendKind::G4f, "PP_MODEL_G4F", "gpt-4o-mini"),
            (BackendKind::Ollama, "PP_MODEL_OLLAMA", "llama3"),
            (BackendKind::Codex, "PP_MODEL_CODEX", "gpt-5-codex"),
            (BackendKind::Qwen, "PP_MODEL_QWEN", "qwen3-coder"),
            (BackendKind::Gemini, "PP_MODEL_GEMINI", "gemini-2.5-pro"),
        ] {
            let model = std::env::var(env_key).unwrap_or_else(|_| fallback.to_string());
            default_models.insert(kind, model);
        }

        Self {
            port,
            backend_chain,
            max_rotate_retry,
            default_models,
            g4f_base_url: std::env::var("PP_G4F_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:1337/v1".into()),
            ollama_base_url: std::env::var("PP_OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434/v1".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backend_kind_accepts_known_tokens_case_insensitively() {
        assert_eq!(parse_backend_kind("G4F"), Some(BackendKind::G4f));
        assert_eq!(parse_backend_kind(" codex "), Some(BackendKind::Codex));
        assert_eq!(parse_backend_kind("carrier-pigeon"), None);
    }
}
