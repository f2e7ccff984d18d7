//! The Auto-Rotate Router's async shell (spec §4.K). Wraps the pure
//! decision logic in `pocketpaw-rotator` with the actual HTTP/subprocess
//! dispatch to each sub-backend, grounded in `sa_providers::router::LlmRouter`'s
//! "pick a provider, delegate, on failure try the next" retry loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use pocketpaw_rotator::{active_chain, pick_for_attempt, BackendChain, BackendKind, ProviderStatus, RotatorConfig};

use crate::config::Settings;
use crate::sub_backend::{ModelEntry, SubBackend};

pub struct RotatorService {
    config: RotatorConfig,
    configured_chain: BackendChain,
    backends: HashMap<BackendKind, Arc<dyn SubBackend>>,
    round_robin_seed: AtomicU64,
}

impl RotatorService {
    /// Instantiates every backend named in `settings.backend_chain`.
    /// Construction failures drop that backend from the chain rather than
    /// aborting startup (spec §4.K `initialize`) -- there is currently no
    /// sub-backend whose construction can fail (all are plain structs), so
    /// this is a `Vec` filter rather than a fallible loop, but the shape
    /// is kept so a future fallible backend slots in without restructuring.
    pub fn new(settings: &Settings, backends: HashMap<BackendKind, Arc<dyn SubBackend>>) -> Self {
        let configured_chain: BackendChain =
            settings.backend_chain.iter().copied().filter(|k| backends.contains_key(k)).collect();

        Self {
            config: RotatorConfig {
                chain: settings.backend_chain.clone(),
                max_rotate_retry: settings.max_rotate_retry,
                default_models: settings.default_models.clone(),
            },
            configured_chain,
            backends,
            round_robin_seed: AtomicU64::new(0),
        }
    }

    async fn provider_statuses(&self) -> HashMap<BackendKind, ProviderStatus> {
        let mut statuses = HashMap::with_capacity(self.backends.len());
        for (kind, backend) in &self.backends {
            statuses.insert(*kind, backend.status().await);
        }
        statuses
    }

    /// The currently-active (rotated, eligibility-filtered) chain, exposed
    /// for `/v1/providers`'s synthetic `AutoRotate` entry. Does not
    /// consume a round-robin tick -- only `create_chat_completion` does.
    pub async fn active_chain_preview(&self) -> BackendChain {
        let statuses = self.provider_statuses().await;
        active_chain(&self.configured_chain, self.round_robin_seed.load(Ordering::SeqCst), &statuses)
    }

    pub fn configured_chain(&self) -> &BackendChain {
        &self.configured_chain
    }

    pub async fn models(&self) -> Vec<ModelEntry> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for backend in self.backends.values() {
            for model in backend.models().await {
                if seen.insert(model.id.clone()) {
                    out.push(model);
                }
            }
        }
        out
    }

    pub async fn providers(&self) -> Vec<Value> {
        let statuses = self.provider_statuses().await;
        let mut out: Vec<Value> = Vec::new();
        for kind in &self.configured_chain {
            let status = statuses.get(kind).copied().unwrap_or_default();
            let models = match self.backends.get(kind) {
                Some(backend) => backend.models().await.into_iter().map(|m| m.id).collect::<Vec<_>>(),
                None => Vec::new(),
            };
            out.push(json!({
                "id": backend_kind_name(*kind),
                "url": null,
                "models": models,
                "params": {
                    "oauth": status.oauth,
                    "logged_in": status.logged_in,
                    "no_auth": !status.oauth,
                    "supports_stream": true,
                },
            }));
        }

        let active = self.active_chain_preview().await;
        out.push(json!({
            "id": "AutoRotate",
            "url": null,
            "models": [],
            "params": {
                "rotator": true,
                "backend_chain": self.configured_chain.iter().map(|k| backend_kind_name(*k)).collect::<Vec<_>>(),
                "active_chain": active.iter().map(|k| backend_kind_name(*k)).collect::<Vec<_>>(),
            },
        }));

        out
    }

    pub fn supports_images(&self) -> bool {
        self.backends.get(&BackendKind::G4f).map(|b| b.supports_images()).unwrap_or(false)
    }

    /// Spec §4.K steps 1-3: rotate the active chain by the round-robin
    /// seed (incrementing it for next time), then retry across
    /// `max_rotate_retry` attempts, each against the next active backend,
    /// collecting errors as it goes.
    pub async fn create_chat_completion(&self, request: Value) -> anyhow::Result<Value> {
        let statuses = self.provider_statuses().await;
        let seed = self.round_robin_seed.fetch_add(1, Ordering::SeqCst);
        let active = active_chain(&self.configured_chain, seed, &statuses);

        if active.is_empty() {
            anyhow::bail!("no active backends");
        }

        let mut errors = Vec::new();
        for attempt in 0..self.config.max_rotate_retry.get() {
            let kind = pick_for_attempt(&active, attempt);
            let backend = self
                .backends
                .get(&kind)
                .expect("active_chain only returns kinds present in `backends`");
            let per_backend_request = build_per_backend_request(&request, kind, &self.config);

            match backend.chat(&per_backend_request).await {
                Ok(response) => return Ok(response),
                Err(e) => errors.push(format!("{}: {e}", backend_kind_name(kind))),
            }
        }

        anyhow::bail!("all backends failed after {} attempt(s): {}", self.config.max_rotate_retry.get(), errors.join("; "))
    }
}

/// Overrides `model` with the backend's configured default and strips the
/// g4f-specific `provider` hint for every other backend (spec §4.K step 2).
fn build_per_backend_request(request: &Value, kind: BackendKind, config: &RotatorConfig) -> Value {
    let mut out = request.clone();
    if let Some(obj) = out.as_object_mut() {
        if let Some(model) = config.default_models.get(&kind) {
            obj.insert("model".into(), json!(model));
        }
        if kind != BackendKind::G4f {
            obj.remove("provider");
        }
    }
    out
}

pub fn backend_kind_name(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::G4f => "g4f",
        BackendKind::Ollama => "ollama",
        BackendKind::Codex => "codex",
        BackendKind::Qwen => "qwen",
        BackendKind::Gemini => "gemini",
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use async_trait::async_trait;

    use super::*;

    struct FakeBackend {
        kind: BackendKind,
        status: ProviderStatus,
        fail_times: AtomicUsize,
    }

    impl FakeBackend {
        fn new(kind: BackendKind, status: ProviderStatus, fail_times: usize) -> Self {
            Self { kind, status, fail_times: AtomicUsize::new(fail_times) }
        }
    }

    #[async_trait]
    impl SubBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn status(&self) -> ProviderStatus {
            self.status
        }

        async fn models(&self) -> Vec<ModelEntry> {
            vec![ModelEntry { id: format!("{:?}-model", self.kind), owned_by: "fake".into(), created: 0 }]
        }

        async fn chat(&self, request: &Value) -> anyhow::Result<Value> {
            let remaining = self.fail_times.load(AtomicOrdering::SeqCst);
            if remaining > 0 {
                self.fail_times.store(remaining - 1, AtomicOrdering::SeqCst);
                anyhow::bail!("{:?} is down", self.kind);
            }
            Ok(json!({"backend": backend_kind_name(self.kind), "model": request.get("model")}))
        }
    }

    fn settings(chain: Vec<BackendKind>) -> Settings {
        Settings {
            port: 0,
            backend_chain: chain,
            max_rotate_retry: NonZeroU32::new(4).unwrap(),
            default_models: HashMap::new(),
            g4f_base_url: String::new(),
            ollama_base_url: String::new(),
        }
    }

    fn eligible() -> ProviderStatus {
        ProviderStatus { oauth: false, logged_in: true }
    }

    #[tokio::test]
    async fn drops_unconfigured_backends_from_the_chain() {
        let mut backends: HashMap<BackendKind, Arc<dyn SubBackend>> = HashMap::new();
        backends.insert(BackendKind::G4f, Arc::new(FakeBackend::new(BackendKind::G4f, eligible(), 0)));
        let service = RotatorService::new(&settings(vec![BackendKind::G4f, BackendKind::Codex]), backends);
        assert_eq!(service.configured_chain(), &vec![BackendKind::G4f]);
    }

    #[tokio::test]
    async fn retries_the_next_backend_on_failure() {
        let mut backends: HashMap<BackendKind, Arc<dyn SubBackend>> = HashMap::new();
        backends.insert(BackendKind::G4f, Arc::new(FakeBackend::new(BackendKind::G4f, eligible(), 1)));
        backends.insert(BackendKind::Ollama, Arc::new(FakeBackend::new(BackendKind::Ollama, eligible(), 0)));
        let service = RotatorService::new(&settings(vec![BackendKind::G4f, BackendKind::Ollama]), backends);

        let response = service.create_chat_completion(json!({"messages": []})).await.unwrap();
        assert_eq!(response["backend"], "ollama");
    }

    #[tokio::test]
    async fn all_backends_failing_returns_joined_error() {
        let mut backends: HashMap<BackendKind, Arc<dyn SubBackend>> = HashMap::new();
        backends.insert(BackendKind::G4f, Arc::new(FakeBackend::new(BackendKind::G4f, eligible(), 10)));
        let service = RotatorService::new(&settings(vec![BackendKind::G4f]), backends);

        let err = service.create_chat_completion(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("g4f is down"));
    }

    #[tokio::test]
    async fn no_eligible_backends_bails_before_attempting_any_call() {
        let mut backends: HashMap<BackendKind, Arc<dyn SubBackend>> = HashMap::new();
        backends.insert(
            BackendKind::Codex,
            Arc::new(FakeBackend::new(BackendKind::Codex, ProviderStatus { oauth: true, logged_in: false }, 0)),
        );
        let service = RotatorService::new(&settings(vec![BackendKind::Codex]), backends);

        let err = service.create_chat_completion(json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "no active backends");
    }

    #[test]
    fn build_per_backend_request_overrides_model_and_strips_provider_for_non_g4f() {
        let mut default_models = HashMap::new();
        default_models.insert(BackendKind::Codex, "gpt-5-codex".to_string());
        let config = RotatorConfig { chain: vec![BackendKind::Codex], max_rotate_retry: NonZeroU32::new(1).unwrap(), default_models };

        let request = json!({"model": "whatever", "provider": "g4f-hint", "messages": []});
        let out = build_per_backend_request(&request, BackendKind::Codex, &config);
        assert_eq!(out["model"], "gpt-5-codex");
        assert!(out.get("provider").is_none());
    }
}
