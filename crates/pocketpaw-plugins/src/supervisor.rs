//! Plugin Supervisor (spec §4.I): install, launch, health/status, stop,
//! remove, chat-history passthrough, and the HTTP-facing proxy endpoints a
//! launched plugin exposes. Grounded in `sa_tools::manager::ProcessManager`
//! restyled around long-running services instead of one-shot exec sessions,
//! plus `cli::pid::write_pid_file` downgraded to a plain write-once PID
//! record since plugins each own their own file rather than sharing one
//! daemon-wide lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use pocketpaw_domain::plugin::{PluginRuntime, PluginStatus};
use pocketpaw_domain::{Error, Result};
use tokio::process::Command;

use crate::install_source::{unpack, InstallSource};
use crate::registry::PluginRegistry;

const PID_FILE: &str = ".pocketpaw.pid";
const LOG_FILE: &str = ".pocketpaw.log";
const CHAT_HISTORY_FILE: &str = "chat_history.json";

/// In-memory handle for a process this Supervisor launched itself (as
/// opposed to one discovered alive via its PID file after a restart).
struct ProcessHandle {
    pid: u32,
    /// Set by the reaper task once `child.wait()` resolves; `None` while
    /// the process is still believed to be running.
    exit_code: Arc<AtomicI32>,
    exited: Arc<AtomicBool>,
}

/// Outcome of a `stop` call -- never an `Err` for the "nothing to do" or
/// "can't safely act" cases, per spec §7 (`PluginRunning`/`Ambiguous` never
/// throw).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Stopped,
    NotRunning,
    Ambiguous { message: String },
}

pub struct PluginSupervisor {
    registry: PluginRegistry,
    running: RwLock<HashMap<String, ProcessHandle>>,
    http: reqwest::Client,
    install_timeout: Duration,
    stop_hook_timeout: Duration,
    graceful_exit_timeout: Duration,
    proxy_timeout: Duration,
}

impl PluginSupervisor {
    pub fn new(
        registry: PluginRegistry,
        install_timeout: Duration,
        stop_hook_timeout: Duration,
        graceful_exit_timeout: Duration,
        proxy_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            running: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            install_timeout,
            stop_hook_timeout,
            graceful_exit_timeout,
            proxy_timeout,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    // ── install ──────────────────────────────────────────────────────

    /// Unpacks `source` to `<plugins_dir>/<id>`, makes `*.sh` entry points
    /// executable (unix), then runs `install_cmd` (if any) with a hard
    /// timeout. On any failure, the destination is removed -- install is
    /// atomic from the caller's point of view (spec §7 `PluginInstallFailed`).
    pub async fn install(&self, id: &str, source: InstallSource) -> Result<()> {
        validate_plugin_id(id)?;
        let dest = self.registry.plugin_dir(id);

        if dest.exists() {
            tokio::fs::remove_dir_all(&dest).await.ok();
        }

        if let Err(e) = unpack(&source, &dest).await {
            tokio::fs::remove_dir_all(&dest).await.ok();
            return Err(e);
        }

        if let Err(e) = self.chmod_scripts(&dest).await {
            tokio::fs::remove_dir_all(&dest).await.ok();
            return Err(e);
        }

        let entry = match self.registry.get_plugin(id) {
            Some(e) => e,
            None => {
                tokio::fs::remove_dir_all(&dest).await.ok();
                return Err(Error::PluginInstallFailed(format!(
                    "no valid pocketpaw.json produced for '{id}'"
                )));
            }
        };

        if let Some(install_cmd) = &entry.manifest.install_cmd {
            if let Err(e) = self.run_install_cmd(&dest, install_cmd, &entry.manifest.env).await {
                tokio::fs::remove_dir_all(&dest).await.ok();
                return Err(e);
            }
        }

        Ok(())
    }

    #[cfg(unix)]
    async fn chmod_scripts(&self, dir: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("sh") {
                let mut perms = entry.metadata().await?.permissions();
                perms.set_mode(perms.mode() | 0o111);
                tokio::fs::set_permissions(&path, perms).await?;
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn chmod_scripts(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn run_install_cmd(&self, dir: &Path, install_cmd: &str, env: &HashMap<String, String>) -> Result<()> {
        let mut cmd = shell_command(install_cmd);
        cmd.current_dir(dir);
        apply_env_overlay(&mut cmd, dir, env);

        let run = async {
            let status = cmd
                .status()
                .await
                .map_err(|e| Error::PluginInstallFailed(format!("install_cmd failed to spawn: {e}")))?;
            if !status.success() {
                return Err(Error::PluginInstallFailed(format!("install_cmd exited with {status}")));
            }
            Ok(())
        };

        match tokio::time::timeout(self.install_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::PluginInstallFailed(format!(
                "install_cmd exceeded {}s timeout",
                self.install_timeout.as_secs()
            ))),
        }
    }

    // ── launch ───────────────────────────────────────────────────────

    /// Spawns `start_cmd` as the leader of a new process group (unix) and
    /// returns immediately -- does not block on readiness, per spec.
    pub async fn launch(&self, id: &str) -> Result<()> {
        validate_plugin_id(id)?;
        if self.is_plugin_running(id).await {
            return Err(Error::Other(format!("plugin '{id}' is already running")));
        }

        let entry = self
            .registry
            .get_plugin(id)
            .ok_or_else(|| Error::PluginNotFound(id.to_string()))?;
        if entry.manifest.start_cmd.trim().is_empty() {
            return Err(Error::Config(format!("plugin '{id}' has no start_cmd")));
        }

        let dir = entry.dir.clone();
        let mut cmd = shell_command(&entry.manifest.start_cmd);
        cmd.current_dir(&dir);
        apply_env_overlay(&mut cmd, &dir, &entry.manifest.env);
        if let Some(port) = entry.manifest.port {
            cmd.env("PORT", port.to_string());
        }

        let log_path = dir.join(LOG_FILE);
        let log_file = std::fs::File::create(&log_path)?;
        let log_file_err = log_file.try_clone()?;
        cmd.stdout(std::process::Stdio::from(log_file));
        cmd.stderr(std::process::Stdio::from(log_file_err));
        cmd.stdin(std::process::Stdio::null());

        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Other(format!("failed to launch plugin '{id}': {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Other(format!("plugin '{id}' exited before pid could be read")))?;

        write_pid_file(&dir.join(PID_FILE), pid)?;

        let exit_code = Arc::new(AtomicI32::new(0));
        let exited = Arc::new(AtomicBool::new(false));
        let exit_code_writer = exit_code.clone();
        let exited_writer = exited.clone();
        tokio::spawn(async move {
            if let Ok(status) = child.wait().await {
                exit_code_writer.store(status.code().unwrap_or(-1), Ordering::SeqCst);
            }
            exited_writer.store(true, Ordering::SeqCst);
        });

        self.running
            .write()
            .insert(id.to_string(), ProcessHandle { pid, exit_code, exited });

        Ok(())
    }

    // ── status ───────────────────────────────────────────────────────

    /// The three-step decision tree from spec §4.I / §9: in-memory handle
    /// with no exit code wins; else a live PID-file process; else a
    /// TCP-probed port that is uniquely claimed by this plugin's manifest.
    /// Shared ports are never attributed to a plugin, even if something is
    /// genuinely listening there.
    pub async fn is_plugin_running(&self, id: &str) -> bool {
        if let Some(handle) = self.running.read().get(id) {
            if !handle.exited.load(Ordering::SeqCst) {
                return true;
            }
        }

        let Some(entry) = self.registry.get_plugin(id) else {
            return false;
        };

        if let Some(pid) = read_pid_file(&entry.dir.join(PID_FILE)) {
            if process_alive(pid) {
                return true;
            }
        }

        let Some(port) = entry.manifest.port else {
            return false;
        };

        let port_is_shared = self
            .registry
            .ports_by_plugin()
            .into_iter()
            .any(|(other_id, other_port)| other_id != id && other_port == port);
        if port_is_shared {
            return false;
        }

        port_is_listening(port).await
    }

    pub async fn status(&self, id: &str) -> PluginStatus {
        if self.ambiguous_port(id).is_some() {
            return PluginStatus::Ambiguous;
        }
        if self.is_plugin_running(id).await {
            PluginStatus::Running
        } else {
            PluginStatus::Stopped
        }
    }

    pub fn runtime_snapshot(&self, id: &str) -> Option<PluginRuntime> {
        let running = self.running.read();
        let handle = running.get(id)?;
        Some(PluginRuntime {
            plugin_id: id.to_string(),
            pid: Some(handle.pid),
            launched_at: Some(Utc::now()),
            last_status: if handle.exited.load(Ordering::SeqCst) {
                PluginStatus::Stopped
            } else {
                PluginStatus::Running
            },
            config_overlay: Default::default(),
        })
    }

    /// Two manifests sharing a port, neither with a live PID -- the
    /// ambiguous case `stop` must refuse to act on.
    fn ambiguous_port(&self, id: &str) -> Option<String> {
        let entry = self.registry.get_plugin(id)?;
        let port = entry.manifest.port?;

        let sharers: Vec<String> = self
            .registry
            .ports_by_plugin()
            .into_iter()
            .filter(|(_, p)| *p == port)
            .map(|(other_id, _)| other_id)
            .collect();
        if sharers.len() < 2 {
            return None;
        }

        let any_has_live_pid = sharers.iter().any(|other_id| {
            self.registry
                .get_plugin(other_id)
                .and_then(|e| read_pid_file(&e.dir.join(PID_FILE)))
                .map(process_alive)
                .unwrap_or(false)
        });
        if any_has_live_pid {
            return None;
        }

        Some(format!("plugin '{id}' shares port {port} with {} other installed plugin(s)", sharers.len() - 1))
    }

    // ── stop ─────────────────────────────────────────────────────────

    /// Idempotent: stopping an already-stopped plugin returns `NotRunning`
    /// without error. Ambiguous-port plugins are never acted on.
    pub async fn stop(&self, id: &str) -> Result<SupervisorOutcome> {
        if let Some(message) = self.ambiguous_port(id) {
            return Ok(SupervisorOutcome::Ambiguous { message });
        }
        if !self.is_plugin_running(id).await {
            return Ok(SupervisorOutcome::NotRunning);
        }

        let entry = self.registry.get_plugin(id).ok_or_else(|| Error::PluginNotFound(id.to_string()))?;

        if let Some(stop_cmd) = &entry.manifest.stop_cmd {
            let mut cmd = shell_command(stop_cmd);
            cmd.current_dir(&entry.dir);
            let _ = tokio::time::timeout(self.stop_hook_timeout, cmd.status()).await;
        }

        let pid = self
            .running
            .read()
            .get(id)
            .map(|h| h.pid)
            .or_else(|| read_pid_file(&entry.dir.join(PID_FILE)));

        if let Some(pid) = pid {
            send_signal(pid, TermSignal::Terminate);
            let deadline = tokio::time::Instant::now() + self.graceful_exit_timeout;
            loop {
                if !process_alive(pid) {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    send_signal(pid, TermSignal::Kill);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        self.running.write().remove(id);
        let pid_path = entry.dir.join(PID_FILE);
        tokio::fs::remove_file(&pid_path).await.ok();

        Ok(SupervisorOutcome::Stopped)
    }

    // ── remove ───────────────────────────────────────────────────────

    pub async fn remove(&self, id: &str) -> Result<()> {
        validate_plugin_id(id)?;
        let dir = self.registry.plugin_dir(id);
        if !dir.exists() {
            return Err(Error::PluginNotFound(id.to_string()));
        }
        self.stop(id).await?;
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    // ── per-plugin chat history ─────────────────────────────────────

    pub async fn get_chat_history(&self, id: &str) -> Result<serde_json::Value> {
        let path = self.registry.plugin_dir(id).join(CHAT_HISTORY_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(_) => Ok(serde_json::json!([])),
        }
    }

    pub async fn save_chat_history(&self, id: &str, messages: &serde_json::Value) -> Result<()> {
        let path = self.registry.plugin_dir(id).join(CHAT_HISTORY_FILE);
        tokio::fs::write(&path, serde_json::to_vec_pretty(messages)?).await?;
        Ok(())
    }

    // ── HTTP-facing proxy ────────────────────────────────────────────

    fn base_url(&self, id: &str) -> Option<String> {
        let entry = self.registry.get_plugin(id)?;
        let port = entry.manifest.port?;
        Some(format!("http://127.0.0.1:{port}"))
    }

    /// Returns an empty list rather than erroring when the plugin isn't
    /// running, per spec.
    pub async fn fetch_models(&self, id: &str) -> serde_json::Value {
        self.fetch_list(id, "/v1/models").await
    }

    pub async fn fetch_providers(&self, id: &str) -> serde_json::Value {
        self.fetch_list(id, "/v1/providers").await
    }

    async fn fetch_list(&self, id: &str, path: &str) -> serde_json::Value {
        let Some(base) = self.base_url(id) else {
            return serde_json::json!({ "data": [] });
        };
        match self.http.get(format!("{base}{path}")).send().await {
            Ok(resp) if resp.status().is_success() => {
                resp.json().await.unwrap_or_else(|_| serde_json::json!({ "data": [] }))
            }
            _ => serde_json::json!({ "data": [] }),
        }
    }

    pub async fn test_plugin_connection(&self, id: &str) -> Result<serde_json::Value> {
        let Some(base) = self.base_url(id) else {
            return Err(Error::PluginNotFound(id.to_string()));
        };

        let health = self
            .http
            .get(format!("{base}/health"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !health.status().is_success() {
            return Err(Error::Http(format!("health check returned {}", health.status())));
        }

        let providers = self.fetch_providers(id).await;
        let has_rotator = providers
            .get("data")
            .and_then(|d| d.as_array())
            .map(|list| list.iter().any(|p| p.get("params").and_then(|p| p.get("rotator")).and_then(|v| v.as_bool()).unwrap_or(false)))
            .unwrap_or(false);

        if !has_rotator {
            return Ok(serde_json::json!({ "status": "ok" }));
        }

        let probe = serde_json::json!({
            "model": "auto",
            "messages": [{ "role": "user", "content": "ping" }],
        });
        let response = self
            .http
            .post(format!("{base}/v1/chat/completions"))
            .json(&probe)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        Ok(serde_json::json!({
            "status": "ok",
            "selected_backend": body.get("selected_backend"),
            "selected_provider": body.get("selected_provider"),
            "selected_model": body.get("selected_model"),
        }))
    }

    pub async fn chat_completion_proxy(&self, id: &str, messages: serde_json::Value) -> Result<serde_json::Value> {
        let base = self.base_url(id).ok_or_else(|| Error::PluginNotFound(id.to_string()))?;
        let request = self.http.post(format!("{base}/v1/chat/completions")).json(&messages).send();
        let response = tokio::time::timeout(self.proxy_timeout, request)
            .await
            .map_err(|_| Error::Timeout(format!("plugin '{id}' chat completion proxy")))?
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("plugin '{id}' returned {status}")));
        }
        Ok(response.json().await.map_err(|e| Error::Http(e.to_string()))?)
    }
}

// ── shared helpers ──────────────────────────────────────────────────

fn validate_plugin_id(id: &str) -> Result<()> {
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(Error::UserInput(format!("invalid plugin id: {id}")));
    }
    Ok(())
}

fn shell_command(script: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(script);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }
}

/// System env ∪ manifest env ∪ plugin venv/bin on `PATH`.
fn apply_env_overlay(cmd: &mut Command, plugin_dir: &Path, manifest_env: &HashMap<String, String>) {
    for (k, v) in manifest_env {
        cmd.env(k, v);
    }
    if let Ok(path) = std::env::var("PATH") {
        let venv_bin = plugin_dir.join(".venv").join("bin");
        cmd.env("PATH", format!("{}:{}", venv_bin.display(), path));
    }
}

fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    std::fs::write(path, pid.to_string())?;
    Ok(())
}

fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

enum TermSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: TermSignal) {
    let sig = match signal {
        TermSignal::Terminate => libc::SIGTERM,
        TermSignal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::killpg(pid as libc::pid_t, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: TermSignal) {}

async fn port_is_listening(port: u16) -> bool {
    tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocketpaw_domain::plugin::PluginManifest;

    fn write_manifest(dir: &Path, id: &str, start_cmd: &str, port: Option<u16>) {
        std::fs::create_dir_all(dir).unwrap();
        let manifest = PluginManifest {
            id: id.to_string(),
            name: id.to_string(),
            start_cmd: start_cmd.to_string(),
            install_cmd: None,
            stop_cmd: None,
            port,
            env: Default::default(),
            requires: Vec::new(),
            openapi_path: None,
            web_view: false,
            web_view_path: None,
        };
        std::fs::write(dir.join("pocketpaw.json"), serde_json::to_vec(&manifest).unwrap()).unwrap();
    }

    fn supervisor(dir: &Path) -> PluginSupervisor {
        PluginSupervisor::new(
            PluginRegistry::new(dir),
            Duration::from_secs(5),
            Duration::from_secs(1),
            Duration::from_millis(200),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn not_running_without_handle_pid_or_port() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "demo", "./start.sh", Some(19999));
        let sup = supervisor(dir.path());
        assert!(!sup.is_plugin_running("demo").await);
    }

    #[tokio::test]
    async fn stop_on_never_launched_plugin_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "demo", "./start.sh", None);
        let sup = supervisor(dir.path());
        let outcome = sup.stop("demo").await.unwrap();
        assert_eq!(outcome, SupervisorOutcome::NotRunning);
    }

    #[tokio::test]
    async fn shared_port_with_no_live_pid_is_ambiguous_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("a"), "a", "./start.sh", Some(8000));
        write_manifest(&dir.path().join("b"), "b", "./start.sh", Some(8000));
        let sup = supervisor(dir.path());

        let outcome = sup.stop("a").await.unwrap();
        match outcome {
            SupervisorOutcome::Ambiguous { message } => assert!(message.contains("shares port 8000")),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_rejects_path_traversal_ids() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let err = sup.remove("../escape").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn remove_unknown_plugin_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let err = sup.remove("nope").await;
        assert!(matches!(err, Err(Error::PluginNotFound(_))));
    }

    #[tokio::test]
    async fn chat_history_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "demo", "./start.sh", None);
        let sup = supervisor(dir.path());
        let messages = serde_json::json!([{"role": "user", "content": "hi"}]);
        sup.save_chat_history("demo", &messages).await.unwrap();
        let loaded = sup.get_chat_history("demo").await.unwrap();
        assert_eq!(loaded, messages);
    }

    #[tokio::test]
    async fn fetch_models_on_not_running_plugin_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "demo", "./start.sh", Some(1));
        let sup = supervisor(dir.path());
        let result = sup.fetch_models("demo").await;
        assert_eq!(result["data"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn launch_runs_start_cmd_and_writes_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "demo", "sleep 5", None);
        let sup = supervisor(dir.path());
        sup.launch("demo").await.unwrap();
        assert!(dir.path().join("demo").join(PID_FILE).exists());
        assert!(sup.is_plugin_running("demo").await);
        sup.stop("demo").await.unwrap();
        assert!(!sup.is_plugin_running("demo").await);
    }

    #[tokio::test]
    async fn launch_twice_fails_while_already_running() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "demo", "sleep 5", None);
        let sup = supervisor(dir.path());
        sup.launch("demo").await.unwrap();
        let err = sup.launch("demo").await;
        assert!(err.is_err());
        sup.stop("demo").await.unwrap();
    }
}
