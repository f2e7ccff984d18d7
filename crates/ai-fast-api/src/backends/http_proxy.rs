//! The `g4f` (public-proxy) and `ollama` (local) sub-backends. Both speak
//! the OpenAI-compatible chat-completions wire format directly, so they
//! share one implementation parameterized by base URL -- grounded in
//! `OpenAiCompatProvider` (`sa_providers::openai_compat`), trimmed to the
//! one non-streaming call the rotator needs.

use async_trait::async_trait;
use pocketpaw_rotator::{BackendKind, ProviderStatus};
use serde_json::Value;

use crate::sub_backend::{ModelEntry, SubBackend};

pub struct HttpProxyBackend {
    kind: BackendKind,
    base_url: String,
    client: reqwest::Client,
}

impl HttpProxyBackend {
    pub fn new(kind: BackendKind, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("reqwest client"),
        }
    }
}

#[async_trait]
impl SubBackend for HttpProxyBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    /// `g4f` and `ollama` are both `no_auth` backends (spec §4.K step 1) --
    /// there's no login state to gate on, they're eligible whenever the
    /// chain includes them.
    async fn status(&self) -> ProviderStatus {
        ProviderStatus { oauth: false, logged_in: true }
    }

    async fn models(&self) -> Vec<ModelEntry> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let Ok(resp) = self.client.get(&url).send().await else { return Vec::new() };
        let Ok(body) = resp.json::<Value>().await else { return Vec::new() };
        body.get("data")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| {
                        let id = e.get("id")?.as_str()?.to_string();
                        Some(ModelEntry {
                            id,
                            owned_by: e
                                .get("owned_by")
                                .and_then(Value::as_str)
                                .unwrap_or(self.kind_name())
                                .to_string(),
                            created: e.get("created").and_then(Value::as_i64).unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn chat(&self, request: &Value) -> anyhow::Result<Value> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self.client.post(&url).json(request).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {status}: {text}", self.kind_name());
        }
        Ok(resp.json::<Value>().await?)
    }

    fn supports_images(&self) -> bool {
        self.kind == BackendKind::G4f
    }
}

impl HttpProxyBackend {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            BackendKind::G4f => "g4f",
            BackendKind::Ollama => "ollama",
            _ => "http-proxy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_g4f_supports_images() {
        assert!(HttpProxyBackend::new(BackendKind::G4f, "http://example.invalid").supports_images());
        assert!(!HttpProxyBackend::new(BackendKind::Ollama, "http://example.invalid").supports_images());
    }

    #[tokio::test]
    async fn no_auth_backends_report_logged_in_with_no_oauth() {
        let backend = HttpProxyBackend::new(BackendKind::G4f, "http://example.invalid");
        let status = backend.status().await;
        assert!(!status.oauth);
        assert!(status.logged_in);
    }
}
