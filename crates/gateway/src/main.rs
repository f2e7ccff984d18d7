//! `pocketpawd`: wires the Message Bus, Memory Store, Context Builder,
//! Agent Router, Agent Loop, and Plugin Supervisor into one running
//! process. Grounded in the teacher's `crates/gateway/src/main.rs`
//! construction order (config → stores → registries → app state →
//! background tasks → serve), reduced to PocketPaw's core subsystems --
//! channel adapters beyond a bare stdin/stdout CLI bridge are out of
//! scope (spec §1 Non-goals).

mod backend_factory;
mod cli;
mod facts;

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use pocketpaw_agent::{AgentLoop, AgentLoopConfig};
use pocketpaw_bus::Bus;
use pocketpaw_domain::config::Config;
use pocketpaw_domain::model::InboundMessage;
use pocketpaw_domain::plugin::OAuthProvider;
use pocketpaw_domain::SessionKey;
use pocketpaw_memory::MemoryStore;
use pocketpaw_plugins::{OAuthSessionManager, PluginRegistry, PluginSupervisor};
use pocketpaw_router::AgentRouter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_serve(config).await
        }
        Command::Doctor => {
            let config = load_config(&cli.config)?;
            println!("config loaded OK");
            println!("  memory dir:  {}", config.memory.dir.display());
            println!("  plugins dir: {}", config.plugins.dir.display());
            println!("  agent_backend: {}", config.agent.agent_backend);
            if !config.backends.contains_key(&config.agent.agent_backend) {
                println!(
                    "warning: no [backends.{}] entry -- turns will fail until one is configured",
                    config.agent.agent_backend
                );
            }
            Ok(())
        }
        Command::Login { provider } => {
            let provider = parse_oauth_provider(&provider)?;
            run_login(provider).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pocketpaw=debug")))
        .init();
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    Config::load_or_default(path).context("loading pocketpaw.toml")
}

fn parse_oauth_provider(raw: &str) -> anyhow::Result<OAuthProvider> {
    match raw.to_ascii_lowercase().as_str() {
        "codex" => Ok(OAuthProvider::Codex),
        "qwen" => Ok(OAuthProvider::Qwen),
        "gemini" => Ok(OAuthProvider::Gemini),
        other => anyhow::bail!("unknown OAuth provider '{other}' -- expected codex, qwen, or gemini"),
    }
}

async fn run_login(provider: OAuthProvider) -> anyhow::Result<()> {
    let manager = Arc::new(OAuthSessionManager::new());
    let session = manager.start_device_auth(provider).await?;
    if session.verification_uri.is_empty() {
        anyhow::bail!("{} did not print a verification URL within the capture window", provider.as_str());
    }
    println!("Visit: {}", session.verification_uri);
    if let Some(code) = &session.user_code {
        println!("Code:  {code}");
    }
    println!("Waiting for login to complete (Ctrl-C to stop watching; the CLI keeps running in the background)...");

    loop {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = manager.get_device_auth_status(&session.session_id).await?;
        match status.state {
            pocketpaw_domain::plugin::OAuthState::Completed => {
                println!("Login completed.");
                return Ok(());
            }
            pocketpaw_domain::plugin::OAuthState::Failed | pocketpaw_domain::plugin::OAuthState::Expired => {
                anyhow::bail!("login {:?}", status.state);
            }
            pocketpaw_domain::plugin::OAuthState::Pending => continue,
        }
    }
}

/// Starts the core subsystems and bridges a plain stdin/stdout CLI
/// channel to the Message Bus -- every other channel adapter (Telegram,
/// Discord, Slack, the web socket dashboard) implements the same
/// publish-inbound/subscribe-outbound contract but is out of scope here
/// (spec §1 Non-goals).
async fn run_serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("PocketPaw starting");

    let bus = Arc::new(Bus::new(config.server.inbound_capacity, config.server.outbound_capacity));

    let memory = Arc::new(MemoryStore::new(&config.memory.dir).context("opening memory store")?);
    memory.clone().spawn_flush_task(Duration::from_millis(config.memory.flush_interval_ms));

    let registry = PluginRegistry::new(&config.plugins.dir);
    let plugins = Arc::new(PluginSupervisor::new(
        registry,
        Duration::from_secs(config.plugins.install_timeout_s),
        Duration::from_secs(config.plugins.stop_hook_timeout_s),
        Duration::from_secs(config.plugins.graceful_exit_timeout_s),
        Duration::from_secs(config.plugins.proxy_timeout_s),
    ));

    let facts_path = config.memory.dir.join("facts.json");
    let loop_config = AgentLoopConfig {
        identity: config.context.identity.clone(),
        facts_max_chars: config.context.facts_max_chars,
        memory_max_turns: config.memory.max_turns,
        max_concurrent_conversations: config.agent.max_concurrent_conversations,
        backend_info: backend_factory::backend_info(&config.agent.agent_backend, &config.backends),
        facts: facts::load_facts(&facts_path),
    };

    let router = Arc::new(AgentRouter::new(backend_factory::backend_factory(
        config.agent.agent_backend.clone(),
        config.backends.clone(),
    )));

    let agent_loop = Arc::new(AgentLoop::new(bus.clone(), memory.clone(), router.clone(), plugins.clone(), loop_config));

    tokio::spawn(agent_loop.clone().run());

    let session_key = SessionKey::new("cli", "local");
    let mut outbound_rx = bus.subscribe_outbound();
    tokio::spawn({
        let session_key = session_key.clone();
        async move {
            while let Ok(msg) = outbound_rx.recv().await {
                if msg.session_key != session_key {
                    continue;
                }
                if msg.is_stream_chunk {
                    print!("{}", msg.content);
                    let _ = std::io::stdout().flush();
                }
                if msg.is_stream_end {
                    println!();
                }
            }
        }
    });

    tracing::info!("ready -- type a message and press enter (Ctrl-D to exit)");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        bus.publish_inbound(InboundMessage {
            session_key: session_key.clone(),
            sender_id: "local".into(),
            content: line,
            trace_id: uuid::Uuid::new_v4().to_string(),
            received_at: Utc::now(),
        })
        .await;
    }

    memory.flush().ok();
    Ok(())
}
