use std::collections::HashMap;
use std::sync::Arc;

use ai_fast_api::backends::{HttpProxyBackend, OAuthCliBackend};
use ai_fast_api::sub_backend::SubBackend;
use ai_fast_api::{api, RotatorService, Settings};
use pocketpaw_rotator::BackendKind;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    tracing::info!(
        port = settings.port,
        chain = ?settings.backend_chain,
        max_rotate_retry = settings.max_rotate_retry.get(),
        "ai-fast-api starting"
    );

    let mut backends: HashMap<BackendKind, Arc<dyn SubBackend>> = HashMap::new();
    for kind in &settings.backend_chain {
        let backend: Arc<dyn SubBackend> = match kind {
            BackendKind::G4f => Arc::new(HttpProxyBackend::new(BackendKind::G4f, settings.g4f_base_url.clone())),
            BackendKind::Ollama => Arc::new(HttpProxyBackend::new(BackendKind::Ollama, settings.ollama_base_url.clone())),
            BackendKind::Codex => Arc::new(OAuthCliBackend::new(
                BackendKind::Codex,
                "codex",
                settings.default_models.get(&BackendKind::Codex).cloned().unwrap_or_default(),
            )),
            BackendKind::Qwen => Arc::new(OAuthCliBackend::new(
                BackendKind::Qwen,
                "qwen",
                settings.default_models.get(&BackendKind::Qwen).cloned().unwrap_or_default(),
            )),
            BackendKind::Gemini => Arc::new(OAuthCliBackend::new(
                BackendKind::Gemini,
                "gemini",
                settings.default_models.get(&BackendKind::Gemini).cloned().unwrap_or_default(),
            )),
        };
        backends.insert(*kind, backend);
    }

    let service = Arc::new(RotatorService::new(&settings, backends));
    let app = api::router(service);

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "ai-fast-api listening");

    axum::serve(listener, app).await?;
    Ok(())
}
