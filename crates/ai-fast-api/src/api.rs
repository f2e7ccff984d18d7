//! The OpenAI-compatible HTTP surface the Plugin Supervisor treats as a
//! black box (spec §6): `/health`, `/v1/models`, `/v1/providers`,
//! `/v1/chat/completions`, `/v1/images/generations`. Grounded in the
//! teacher's `crates/gateway/src/api/openai_compat.rs` route shape.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{self, Stream};
use serde_json::{json, Value};

use crate::rotator_service::RotatorService;

pub fn router(service: Arc<RotatorService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(models))
        .route("/v1/providers", get(providers))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/images/generations", post(images_generations))
        .with_state(service)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn models(State(service): State<Arc<RotatorService>>) -> impl IntoResponse {
    let data: Vec<Value> = service
        .models()
        .await
        .into_iter()
        .map(|m| json!({"id": m.id, "object": "model", "owned_by": m.owned_by, "created": m.created}))
        .collect();
    Json(json!({"data": data}))
}

async fn providers(State(service): State<Arc<RotatorService>>) -> impl IntoResponse {
    Json(json!({"data": service.providers().await}))
}

async fn chat_completions(State(service): State<Arc<RotatorService>>, Json(body): Json<Value>) -> impl IntoResponse {
    let wants_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    match service.create_chat_completion(body).await {
        Ok(response) if wants_stream => streaming_response(response).into_response(),
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            let status = if e.to_string().contains("no active backends") {
                axum::http::StatusCode::SERVICE_UNAVAILABLE
            } else {
                axum::http::StatusCode::BAD_GATEWAY
            };
            (status, Json(json!({"error": {"message": e.to_string(), "type": "rotator_error"}}))).into_response()
        }
    }
}

async fn images_generations(State(service): State<Arc<RotatorService>>, Json(_body): Json<Value>) -> impl IntoResponse {
    if !service.supports_images() {
        return (
            axum::http::StatusCode::NOT_IMPLEMENTED,
            Json(json!({"error": {"message": "image generation requires g4f in backend_chain", "type": "not_implemented"}})),
        )
            .into_response();
    }
    // g4f's image-generation wire format is out of this spec's scope
    // (spec §1 Non-goals: "specific AI-backend wire formats appear only
    // where the router must parse them into the common event stream" --
    // images never enter that stream). The eligibility gate above is the
    // behavior spec §4.K actually specifies.
    (
        axum::http::StatusCode::NOT_IMPLEMENTED,
        Json(json!({"error": {"message": "image generation proxy not implemented", "type": "not_implemented"}})),
    )
        .into_response()
}

/// Wraps a completed (non-streaming) chat-completion response into the
/// two-chunk SSE stream spec §4.K mandates: one `delta` chunk carrying
/// `role` + the full `content`, then a `finish_reason: stop` chunk, then
/// the `[DONE]` sentinel.
fn streaming_response(response: Value) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = response.get("id").and_then(Value::as_str).unwrap_or("chatcmpl-0").to_string();
    let created = response.get("created").and_then(Value::as_i64).unwrap_or(0);
    let model = response.get("model").and_then(Value::as_str).unwrap_or("").to_string();
    let content = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let content_chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{"index": 0, "delta": {"role": "assistant", "content": content}, "finish_reason": Value::Null}],
    });
    let finish_chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
    });

    let events = vec![
        Ok(Event::default().data(content_chunk.to_string())),
        Ok(Event::default().data(finish_chunk.to_string())),
        Ok(Event::default().data("[DONE]")),
    ];

    Sse::new(stream::iter(events)).keep_alive(KeepAlive::default())
}
