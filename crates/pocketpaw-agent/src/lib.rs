//! The Agent Loop (spec §4.G): the single top-level consumer of the
//! Message Bus's inbound channel, grounded in `runtime::turn::run_turn`
//! and `cli::run::run`'s event-draining loop.

pub mod cancel;
pub mod intents;
pub mod session_lock;
pub mod slash;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::{FutureExt, StreamExt};
use regex::Regex;
use tracing::warn;

use pocketpaw_backends::event::AgentEvent;
use pocketpaw_bus::Bus;
use pocketpaw_context::{build_system_prompt, Fact};
use pocketpaw_domain::model::{InboundMessage, OutboundMessage, Role, SystemEvent, SystemEventType, Turn};
use pocketpaw_domain::{BackendInfo, SessionKey};
use pocketpaw_memory::MemoryStore;
use pocketpaw_plugins::{find_builtin, InstallSource, PluginSupervisor, SupervisorOutcome};
use pocketpaw_router::AgentRouter;

use cancel::CancelMap;
use intents::{match_intent, Intent};
use session_lock::SessionLockMap;
use slash::{parse_slash, SlashCommand, HELP_TEXT};

/// Static assembly inputs the Agent Loop needs but doesn't own the source
/// of -- the gateway crate is responsible for fetching facts and the
/// active backend's capability description (spec §4.C Design Notes).
pub struct AgentLoopConfig {
    pub identity: String,
    pub facts_max_chars: usize,
    pub memory_max_turns: usize,
    pub max_concurrent_conversations: usize,
    pub backend_info: Option<BackendInfo>,
    pub facts: Vec<Fact>,
}

pub struct AgentLoop {
    bus: Arc<Bus>,
    memory: Arc<MemoryStore>,
    router: Arc<AgentRouter>,
    plugins: Arc<PluginSupervisor>,
    cancel: CancelMap,
    session_locks: SessionLockMap,
    turn_semaphore: tokio::sync::Semaphore,
    config: AgentLoopConfig,
    in_flight: AtomicUsize,
}

impl AgentLoop {
    pub fn new(
        bus: Arc<Bus>,
        memory: Arc<MemoryStore>,
        router: Arc<AgentRouter>,
        plugins: Arc<PluginSupervisor>,
        config: AgentLoopConfig,
    ) -> Self {
        let turn_semaphore = tokio::sync::Semaphore::new(config.max_concurrent_conversations.max(1));
        Self {
            bus,
            memory,
            router,
            plugins,
            cancel: CancelMap::new(),
            session_locks: SessionLockMap::new(),
            turn_semaphore,
            config,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Consumes the Bus's single inbound receiver and spawns one task per
    /// message. Different SessionKeys run in parallel; a second arrival for
    /// a key already in flight queues behind the session lock rather than
    /// running concurrently with it.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.bus.consume_inbound().await;
        while let Some(msg) = rx.recv().await {
            let this = self.clone();
            tokio::spawn(async move {
                this.process_message(msg).await;
            });
        }
    }

    async fn process_message(self: Arc<Self>, msg: InboundMessage) {
        let permit = match self.turn_semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let lock = self.session_locks.lock_for(&msg.session_key);
        let _guard = lock.lock().await;
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = std::panic::AssertUnwindSafe(self.handle_turn(&msg))
            .catch_unwind()
            .await
        {
            warn!(session_key = %msg.session_key, error = ?e, "agent loop turn panicked");
            self.bus.publish_system(SystemEvent {
                session_key: msg.session_key.clone(),
                event_type: SystemEventType::Error,
                payload: serde_json::json!({ "message": "internal error processing turn" }),
            });
            self.bus.publish_outbound(OutboundMessage::stream_end(msg.session_key.clone()));
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.cancel.clear(&msg.session_key);
        drop(permit);
    }

    async fn handle_turn(&self, msg: &InboundMessage) {
        let key = &msg.session_key;

        if let Some(cmd) = parse_slash(&msg.content) {
            self.handle_slash(key, cmd).await;
            return;
        }

        if let Some(intent) = match_intent(&msg.content) {
            self.handle_intent(key, intent).await;
            return;
        }

        self.run_backend_turn(msg).await;
    }

    // ── slash commands ───────────────────────────────────────────────

    async fn handle_slash(&self, key: &SessionKey, cmd: SlashCommand) {
        match cmd {
            SlashCommand::Stop => {
                self.cancel.cancel(key);
                self.router.stop();
                self.publish_final(key, "Stopped the in-flight reply.");
            }
            SlashCommand::Reset => {
                if let Err(e) = self.memory.flush() {
                    warn!(error = %e, "memory flush failed during /reset");
                }
                self.publish_final(key, "Conversation memory has been reset for this session.");
            }
            SlashCommand::Help => {
                self.publish_final(key, HELP_TEXT);
            }
        }
    }

    // ── local intents ────────────────────────────────────────────────

    async fn handle_intent(&self, key: &SessionKey, intent: Intent) {
        match intent {
            Intent::ListPlugins => {
                let body = self.render_plugins_overview().await;
                self.publish_final(key, &body);
            }
            Intent::Start(id) | Intent::Launch(id) => {
                let body = self.install_and_launch(&id).await;
                self.publish_final(key, &body);
            }
            Intent::Stop(id) => {
                let body = match self.plugins.stop(&id).await {
                    Ok(SupervisorOutcome::Stopped) => format!("Stopped `{id}`."),
                    Ok(SupervisorOutcome::NotRunning) => format!("`{id}` is not running."),
                    Ok(SupervisorOutcome::Ambiguous { message }) => message,
                    Err(e) => format!("Failed to stop `{id}`: {e}"),
                };
                self.publish_final(key, &body);
            }
        }
    }

    async fn render_plugins_overview(&self) -> String {
        let installed = self.plugins.registry().list_plugins();
        let mut out = String::from("AI UI plugins overview:\n\nInstalled:\n");
        if installed.is_empty() {
            out.push_str("- (none)\n");
        }
        for entry in &installed {
            let status = self.plugins.status(&entry.manifest.id).await;
            let detail = match (status, entry.manifest.port) {
                (pocketpaw_domain::plugin::PluginStatus::Running, Some(port)) => format!("(running, port {port})"),
                (pocketpaw_domain::plugin::PluginStatus::Running, None) => "(running)".to_string(),
                (pocketpaw_domain::plugin::PluginStatus::Ambiguous, _) => "(ambiguous)".to_string(),
                (pocketpaw_domain::plugin::PluginStatus::Stopped, _) => "(stopped)".to_string(),
            };
            out.push_str(&format!("- {} {}\n", entry.manifest.id, detail));
        }

        let installed_ids: Vec<&str> = installed.iter().map(|e| e.manifest.id.as_str()).collect();
        out.push_str("\nDiscover:\n");
        let gallery = pocketpaw_plugins::builtin_gallery();
        let uninstalled: Vec<_> = gallery.iter().filter(|p| !installed_ids.contains(&p.id)).collect();
        if uninstalled.is_empty() {
            out.push_str("- (nothing new)\n");
        }
        for plugin in uninstalled {
            out.push_str(&format!("- {} — {}\n", plugin.id, plugin.description));
        }

        out
    }

    /// `start <id>` / `launch plugin <id>` (spec §4.G step 2): launches an
    /// already-installed plugin directly, or installs a gallery entry
    /// first (tagged `builtin:<id>` in the confirmation text, matching the
    /// install source it actually used) before launching.
    async fn install_and_launch(&self, id: &str) -> String {
        let mut lines = Vec::new();

        if !self.plugins.registry().is_installed(id) {
            let Some(builtin) = find_builtin(id) else {
                return format!("`{id}` is not installed and isn't in the plugin gallery.");
            };
            lines.push(format!("Installing builtin:{id}..."));
            let source: InstallSource = builtin.install_source();
            if let Err(e) = self.plugins.install(id, source).await {
                lines.push(format!("Install failed: {e}"));
                return lines.join("\n");
            }
            lines.push(format!("Installed builtin:{id}."));
        }

        if self.plugins.is_plugin_running(id).await {
            lines.push(format!("`{id}` is already running."));
            return lines.join("\n");
        }

        if let Err(e) = self.plugins.launch(id).await {
            lines.push(format!("Launch failed: {e}"));
            return lines.join("\n");
        }

        let port = self.plugins.registry().get_plugin(id).and_then(|e| e.manifest.port);
        match port {
            Some(port) => lines.push(format!("Launched {id} at http://localhost:{port}/")),
            None => lines.push(format!("Launched {id}.")),
        }
        lines.join("\n")
    }

    fn publish_final(&self, key: &SessionKey, content: &str) {
        self.bus.publish_outbound(OutboundMessage::chunk(key.clone(), content.to_string()));
        self.bus.publish_outbound(OutboundMessage::stream_end(key.clone()));
    }

    // ── backend-routed turns ─────────────────────────────────────────

    async fn run_backend_turn(&self, msg: &InboundMessage) {
        let key = &msg.session_key;
        let now = Utc::now();

        if let Err(e) = self.memory.add_to_session(key, Turn::new(Role::User, msg.content.clone(), now)) {
            warn!(session_key = %key, error = %e, "failed to record user turn");
        }

        let history = self.memory.get_compacted_history(key, self.config.memory_max_turns);
        let system_prompt = build_system_prompt(
            &self.config.identity,
            self.config.backend_info.as_ref(),
            &self.config.facts,
            self.config.facts_max_chars,
            now,
        );

        let cancelled = self.cancel.register(key);
        let mut stream = self.router.run(&msg.content, Some(&system_prompt), &history, Some(key)).await;

        let mut assistant_content = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled.notified() => {
                    self.router.stop();
                    break;
                }
                ev = stream.next() => ev,
            };
            let Some(event) = next else { break };

            match event {
                AgentEvent::Message { content, .. } => {
                    assistant_content.push_str(&content);
                    self.bus.publish_outbound(OutboundMessage::chunk(key.clone(), content));
                }
                AgentEvent::Thinking { content, metadata } => {
                    self.publish_system(key, SystemEventType::Thinking, &content, metadata);
                }
                AgentEvent::ToolUse { content, metadata } => {
                    self.publish_system(key, SystemEventType::ToolStart, &content, metadata);
                }
                AgentEvent::ToolResult { content, metadata } => {
                    if let Some(first_line) = search_attribution_header(&content) {
                        self.bus.publish_outbound(OutboundMessage::chunk(key.clone(), first_line.to_string()));
                    }
                    self.publish_system(key, SystemEventType::ToolResult, &content, metadata);
                }
                AgentEvent::TokenUsage { content, metadata } => {
                    self.publish_system(key, SystemEventType::TokenUsage, &content, metadata);
                }
                AgentEvent::Error { content, metadata } => {
                    self.publish_system(key, SystemEventType::Error, &content, metadata);
                }
                AgentEvent::Done { .. } => break,
            }
        }

        self.bus.publish_outbound(OutboundMessage::stream_end(key.clone()));

        if let Err(e) = self.memory.add_to_session(key, Turn::new(Role::Assistant, assistant_content, Utc::now())) {
            warn!(session_key = %key, error = %e, "failed to record assistant turn");
        }
    }

    fn publish_system(&self, key: &SessionKey, event_type: SystemEventType, content: &str, metadata: serde_json::Map<String, serde_json::Value>) {
        let mut payload = serde_json::Value::Object(metadata);
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("content".to_string(), serde_json::Value::String(content.to_string()));
        }
        self.bus.publish_system(SystemEvent {
            session_key: key.clone(),
            event_type,
            payload,
        });
    }
}

/// Matches the `"PocketPaw - Search {provider} - {date}"` attribution
/// header a web-search tool result's first line carries, per spec §4.G
/// step 5's search-attribution passthrough.
fn search_attribution_header(content: &str) -> Option<&str> {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^PocketPaw - Search .+ - .+$").unwrap());
    let first_line = content.lines().next()?;
    re.is_match(first_line).then_some(first_line)
}
