//! Auto-Rotate Router decision logic (spec §4.K), grounded in
//! `sa_providers::smart_router`'s framing: "pure, synchronous functions,
//! no HTTP, no async — just deterministic decision logic." The async
//! shell that actually dials out to each backend lives in `ai-fast-api`;
//! everything in this crate is testable without a runtime.

use std::collections::HashMap;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    G4f,
    Ollama,
    Codex,
    Qwen,
    Gemini,
}

pub type BackendChain = Vec<BackendKind>;

#[derive(Debug, Clone)]
pub struct RotatorConfig {
    pub chain: BackendChain,
    pub max_rotate_retry: NonZeroU32,
    pub default_models: HashMap<BackendKind, String>,
}

/// Per-backend liveness as the caller knows it: whether this backend kind
/// needs an OAuth login, and whether that login is currently present.
/// Backends with `oauth: false` (e.g. `g4f`, a locally-run `ollama`) are
/// always eligible regardless of `logged_in`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderStatus {
    pub oauth: bool,
    pub logged_in: bool,
}

impl ProviderStatus {
    fn eligible(&self) -> bool {
        !self.oauth || self.logged_in
    }
}

/// Rotates `chain` by `round_robin_seed % chain.len()` then drops any
/// backend whose status isn't eligible. An empty `chain` or an empty
/// result both mean "no active backends" — the caller raises that error,
/// this function just reports the (possibly empty) list.
pub fn active_chain(
    chain: &BackendChain,
    round_robin_seed: u64,
    provider_status: &HashMap<BackendKind, ProviderStatus>,
) -> BackendChain {
    if chain.is_empty() {
        return Vec::new();
    }

    let offset = (round_robin_seed % chain.len() as u64) as usize;
    let rotated = chain[offset..].iter().chain(chain[..offset].iter());

    rotated
        .copied()
        .filter(|kind| {
            provider_status
                .get(kind)
                .map(ProviderStatus::eligible)
                .unwrap_or(true)
        })
        .collect()
}

/// Picks the backend for retry attempt `attempt` (0-indexed) out of an
/// already-rotated, already-filtered `active` chain. `active` must be
/// non-empty; callers check `active_chain`'s result first.
pub fn pick_for_attempt(active: &BackendChain, attempt: u32) -> BackendKind {
    active[(attempt as usize) % active.len()]
}
