//! Command-line surface, grounded in the teacher's `sa_gateway::cli::Cli`
//! (`clap` derive, `Option<Command>` with `serve` as the implicit
//! default). Trimmed to the three things this binary actually needs to
//! expose: run the host, sanity-check the config, and drive an OAuth
//! device-flow login from a terminal.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pocketpawd", version, about = "PocketPaw agent host")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the TOML config file. Defaults to `./pocketpaw.toml`;
    /// missing is not an error, the built-in defaults apply.
    #[arg(long, global = true, default_value = "pocketpaw.toml")]
    pub config: std::path::PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the Agent Loop, Router, and Plugin Supervisor, bridging a
    /// stdin/stdout CLI channel to the Message Bus.
    Serve,
    /// Load and validate the config file without starting anything.
    Doctor,
    /// Start a device-flow login for a CLI-backed OAuth provider
    /// (`codex`, `qwen`, `gemini`) and print the verification URL.
    Login {
        provider: String,
    },
}
