//! OAuth Session Manager (spec §4.J): device-authorization sessions for
//! the three supported coding-CLI backends. Grounded in the teacher's
//! `sa_providers::oauth` device-code flow, adapted from "call an HTTP
//! endpoint and poll a token endpoint" to "spawn the provider's own CLI in
//! device-flow mode and scan its stdout/credentials file", since spec §6
//! makes the CLI itself the OAuth client -- PocketPaw only supervises it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use pocketpaw_domain::plugin::{OAuthProvider, OAuthSession, OAuthState};
use pocketpaw_domain::{Error, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

/// How long to wait for the CLI to print a verification URL before giving
/// up on the session.
const URL_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuthSession TTL (spec §4.J line 54 / line 198): 15 minutes from
/// `started_at`, independent of `URL_CAPTURE_TIMEOUT`.
const SESSION_TTL: Duration = Duration::from_secs(15 * 60);

fn login_command(provider: OAuthProvider) -> (&'static str, &'static [&'static str]) {
    match provider {
        OAuthProvider::Codex => ("codex", &["login"]),
        OAuthProvider::Qwen => ("qwen", &["auth", "login", "--device"]),
        OAuthProvider::Gemini => ("gemini", &["auth", "login"]),
    }
}

fn credentials_path(provider: OAuthProvider) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(match provider {
        OAuthProvider::Codex => home.join(".codex").join("auth.json"),
        OAuthProvider::Qwen => home.join(".qwen").join("oauth_creds.json"),
        OAuthProvider::Gemini => home.join(".gemini").join("oauth_creds.json"),
    })
}

/// Matches the first http(s) URL in a line of CLI output, used to spot the
/// device-flow verification link regardless of each CLI's exact phrasing.
fn verification_url_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").unwrap())
}

/// Matches a standalone user code, e.g. `ABCD-1234`, printed alongside the
/// verification URL by most device-flow CLIs.
fn user_code_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z0-9]{4}-[A-Z0-9]{4})\b").unwrap())
}

/// A non-empty `access_token` whose `expiry_date` (ms), if present, is in
/// the future (spec §4.J line 161). Mirrors
/// `ai-fast-api::backends::oauth_cli`'s `status()` check exactly so both
/// readers of the same credentials file agree on what "logged in" means.
fn credentials_are_valid(value: &serde_json::Value) -> bool {
    let has_token = value
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(|s| !s.is_empty())
        .unwrap_or(false);
    let not_expired = match value.get("expiry_date").and_then(|v| v.as_i64()) {
        Some(ms) => ms > Utc::now().timestamp_millis(),
        None => true,
    };
    has_token && not_expired
}

pub struct OAuthSessionManager {
    sessions: RwLock<HashMap<String, OAuthSession>>,
}

impl Default for OAuthSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthSessionManager {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Spawns the provider's CLI in device-flow mode and returns as soon as
    /// a verification URL has been scraped from its stdout -- never blocks
    /// for the CLI's full completion. A background task keeps draining the
    /// child's output and watching the provider's credentials file for
    /// completion.
    pub async fn start_device_auth(self: &Arc<Self>, provider: OAuthProvider) -> Result<OAuthSession> {
        let session_id = Uuid::new_v4().to_string();
        let (bin, args) = login_command(provider);

        let mut child = Command::new(bin)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::Other(format!("failed to launch {bin} for device auth: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| Error::Other("no stdout pipe".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| Error::Other("no stderr pipe".into()))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let now = Utc::now();
        let pending = OAuthSession {
            session_id: session_id.clone(),
            provider,
            verification_uri: String::new(),
            user_code: None,
            state: OAuthState::Pending,
            started_at: now,
            last_polled_at: now,
        };
        self.sessions.write().insert(session_id.clone(), pending);

        let captured = tokio::time::timeout(URL_CAPTURE_TIMEOUT, async {
            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        match line {
                            Ok(Some(text)) => {
                                if let Some(m) = verification_url_re().find(&text) {
                                    let code = user_code_re().find(&text).map(|m| m.as_str().to_string());
                                    return Some((m.as_str().to_string(), code));
                                }
                            }
                            _ => return None,
                        }
                    }
                    line = stderr_lines.next_line() => {
                        if let Ok(Some(_)) = line {
                            continue;
                        }
                    }
                }
            }
        })
        .await;

        let manager = self.clone();
        let drain_session_id = session_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        if matches!(line, Ok(None) | Err(_)) {
                            break;
                        }
                    }
                    line = stderr_lines.next_line() => {
                        if matches!(line, Ok(None) | Err(_)) {
                            break;
                        }
                    }
                }
            }
            let _ = child.wait().await;
            manager.watch_credentials(&drain_session_id, provider).await;
        });

        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&session_id).expect("session was just inserted");
        match captured {
            Ok(Some((url, code))) => {
                session.verification_uri = url;
                session.user_code = code;
            }
            Ok(None) | Err(_) => {
                session.state = OAuthState::Failed;
            }
        }
        Ok(session.clone())
    }

    /// Polls the provider's on-disk credentials file once for a non-empty
    /// `access_token` and a future expiry, marking the session `Completed`
    /// if found. PocketPaw never writes these files -- the CLI does -- so
    /// this is read-only, grounded in the teacher's expiry-window check in
    /// `resolve_oauth_token` but adapted to a single terminal read instead
    /// of a proactive refresh loop.
    async fn watch_credentials(&self, session_id: &str, provider: OAuthProvider) {
        let Some(path) = credentials_path(provider) else { return };
        for _ in 0..10 {
            if let Ok(raw) = tokio::fs::read_to_string(&path).await {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                    if credentials_are_valid(&value) {
                        if let Some(mut session) = self.sessions.write().get_mut(session_id).cloned() {
                            session.state = OAuthState::Completed;
                            session.last_polled_at = Utc::now();
                            self.sessions.write().insert(session_id.to_string(), session);
                        }
                        return;
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Idempotent read that also performs the lazy pending → completed /
    /// expired transition: an already-`Pending` session whose provider
    /// credentials file now holds a token is reported `Completed` without
    /// requiring a second explicit poll call.
    pub async fn get_device_auth_status(&self, session_id: &str) -> Result<OAuthSession> {
        let mut session = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::Other(format!("unknown oauth session '{session_id}'")))?;

        if session.state == OAuthState::Pending {
            if let Some(path) = credentials_path(session.provider) {
                if let Ok(raw) = tokio::fs::read_to_string(&path).await {
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                        if credentials_are_valid(&value) {
                            session.state = OAuthState::Completed;
                        }
                    }
                }
            }
            if session.state == OAuthState::Pending
                && Utc::now().signed_duration_since(session.started_at).num_seconds() > SESSION_TTL.as_secs() as i64
            {
                session.state = OAuthState::Expired;
            }
            session.last_polled_at = Utc::now();
            self.sessions.write().insert(session_id.to_string(), session.clone());
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_url_matches_bare_url_in_cli_output() {
        let line = "Please visit https://auth.openai.com/device?user_code=ABCD-1234 to continue";
        let found = verification_url_re().find(line).unwrap();
        assert_eq!(found.as_str(), "https://auth.openai.com/device?user_code=ABCD-1234");
    }

    #[test]
    fn user_code_matches_dash_separated_code() {
        let line = "Enter code ABCD-1234 at the link above";
        let found = user_code_re().find(line).unwrap();
        assert_eq!(found.as_str(), "ABCD-1234");
    }

    #[test]
    fn login_command_maps_each_provider() {
        assert_eq!(login_command(OAuthProvider::Codex).0, "codex");
        assert_eq!(login_command(OAuthProvider::Qwen).0, "qwen");
        assert_eq!(login_command(OAuthProvider::Gemini).0, "gemini");
    }

    #[tokio::test]
    async fn unknown_session_status_is_an_error() {
        let manager = OAuthSessionManager::new();
        let err = manager.get_device_auth_status("nope").await;
        assert!(err.is_err());
    }

    #[test]
    fn credentials_with_future_expiry_are_valid() {
        let future_ms = (Utc::now().timestamp_millis()) + 60_000;
        let value = serde_json::json!({ "access_token": "tok", "expiry_date": future_ms });
        assert!(credentials_are_valid(&value));
    }

    #[test]
    fn credentials_with_past_expiry_are_not_valid() {
        let past_ms = Utc::now().timestamp_millis() - 60_000;
        let value = serde_json::json!({ "access_token": "tok", "expiry_date": past_ms });
        assert!(!credentials_are_valid(&value));
    }

    #[test]
    fn credentials_with_no_expiry_date_are_treated_as_unexpired() {
        let value = serde_json::json!({ "access_token": "tok" });
        assert!(credentials_are_valid(&value));
    }

    #[test]
    fn credentials_with_empty_token_are_not_valid() {
        let value = serde_json::json!({ "access_token": "", "expiry_date": Utc::now().timestamp_millis() + 60_000 });
        assert!(!credentials_are_valid(&value));
    }
}
