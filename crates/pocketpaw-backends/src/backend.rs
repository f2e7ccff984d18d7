//! The `Backend` trait every agent adapter implements (spec §4.E),
//! grounded in `sa_providers::traits::LlmProvider`: one method to start a
//! turn and get a stream back, one to cancel it, one to describe the
//! adapter statically.

use crate::event::AgentEventStream;
use async_trait::async_trait;
use pocketpaw_domain::{BackendInfo, Result, SessionKey, Turn};

#[async_trait]
pub trait Backend: Send + Sync {
    /// Starts a turn and returns a stream of [`crate::event::AgentEvent`]s.
    /// `history` is the already-compacted turn log the Context Builder
    /// assembled the `system_prompt` from; adapters that need raw message
    /// arrays (HTTP chat completions) replay it, subprocess adapters that
    /// keep their own session state may ignore it after the first turn.
    async fn run(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[Turn],
        session_key: Option<&SessionKey>,
    ) -> Result<AgentEventStream>;

    /// Requests cancellation of any in-flight turn. Safe to call when no
    /// turn is running and safe to call concurrently with `run`.
    fn stop(&self);

    fn info(&self) -> &BackendInfo;
}
