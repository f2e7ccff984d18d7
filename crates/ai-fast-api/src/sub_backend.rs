//! The `SubBackend` seam each chain member implements (spec §4.K). A
//! backend reports its own auth posture (`status`) and performs one
//! non-streaming chat completion (`chat`); the rotator never reaches into
//! a backend's internals beyond these two calls, mirroring the teacher's
//! `LlmProvider` trait boundary in `sa_providers::traits`.

use async_trait::async_trait;
use pocketpaw_rotator::{BackendKind, ProviderStatus};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: String,
    pub owned_by: String,
    pub created: i64,
}

#[async_trait]
pub trait SubBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// `oauth`/`logged_in`/`no_auth` as the rotator needs them for
    /// eligibility filtering (spec §4.K step 1).
    async fn status(&self) -> ProviderStatus;

    /// Models this backend currently advertises, for `/v1/models` and
    /// `/v1/providers` union. Empty (not an error) if the backend can't be
    /// reached right now.
    async fn models(&self) -> Vec<ModelEntry>;

    /// One non-streaming OpenAI-compatible chat completion. `request` is
    /// the per-backend request the rotator already built (model
    /// overridden, provider hint stripped for non-g4f backends).
    async fn chat(&self, request: &Value) -> anyhow::Result<Value>;

    /// Whether this backend can service `/v1/images/generations` --
    /// spec §4.K: only `g4f` can.
    fn supports_images(&self) -> bool {
        false
    }
}
