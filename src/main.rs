//! authgate: a small bearer-token authentication service.
//!
//! Registers users, verifies login credentials, and issues opaque bearer
//! access tokens over a minimal HTTP API. Persistence is SQLite; password
//! and token hashing happen in-process.

mod auth;
mod config;
mod gateway;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "authgate", version, about = "Bearer-token authentication service")]
struct Cli {
    /// Path to the TOML config file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (default when no subcommand is given).
    Serve {
        /// Bind host (overrides config).
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,authgate=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let (host_override, port_override) = match cli.command {
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "authgate", &mut std::io::stdout());
            return Ok(());
        }
        Some(Command::Serve { host, port }) => (host, port),
        None => (None, None),
    };

    let config = config::Config::load(cli.config.as_deref())?;
    let host = host_override.unwrap_or_else(|| config.gateway.host.clone());
    let port = port_override.unwrap_or(config.gateway.port);

    gateway::run_gateway(&host, port, &config).await
}
