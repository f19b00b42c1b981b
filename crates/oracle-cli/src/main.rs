//! Command-line entry point for Oracle.
//!
//! This binary provides the `oracle` command:
//!
//! - `oracle serve` runs the WebSocket server.
//! - `oracle chat` connects to a running server from the terminal.
//! - `oracle tools` lists the configured tools and their credential status.

mod chat;
mod helpers;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oracle_web::WebServer;
use tracing::info;

use crate::helpers::{LoadedConfig, init_tracing, load_config};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Oracle: ask several models at once and stream one combined answer.
#[derive(Parser)]
#[command(
    name = "oracle",
    version,
    about = "Fan a question out to several LLMs and stream a synthesized answer",
    long_about = "Oracle sends each question to every configured model concurrently, \
                  then streams a single answer synthesized from their replies over a \
                  WebSocket."
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket server.
    Serve {
        /// Config file (defaults to ./oracle.toml when present).
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Address to bind, overriding the config file.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on, overriding the config file.
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with a running server from the terminal.
    Chat {
        /// WebSocket URL of the server's chat endpoint.
        #[arg(long, default_value = "ws://127.0.0.1:8000/chat")]
        url: String,
    },

    /// List the configured tools.
    Tools {
        /// Config file (defaults to ./oracle.toml when present).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keys may live in a .env file next to the config.
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { config, bind, port } => {
            init_tracing("info", cli.log_json);
            cmd_serve(config, bind, port).await
        }
        Commands::Chat { url } => {
            init_tracing("warn", cli.log_json);
            chat::run_chat(&url).await
        }
        Commands::Tools { config } => {
            init_tracing("warn", cli.log_json);
            cmd_tools(config)
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config: Option<PathBuf>, bind: Option<String>, port: Option<u16>) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let LoadedConfig {
        mut oracle,
        mut server,
        ..
    } = load_config(config.as_deref(), &cwd)?;

    apply_overrides(&mut server, bind, port);
    oracle.resolve_credentials_from_env();

    let orchestrator = oracle
        .build_orchestrator()
        .context("failed to build orchestrator")?;

    info!(
        tools = orchestrator.tools().len(),
        synthesis_model = %orchestrator.synthesis_model(),
        "orchestrator ready"
    );

    WebServer::new(server, Arc::new(orchestrator))
        .start()
        .await
        .context("web server failed")
}

fn apply_overrides(server: &mut oracle_web::WebConfig, bind: Option<String>, port: Option<u16>) {
    if let Some(bind) = bind {
        server.bind_addr = bind;
    }
    if let Some(port) = port {
        server.port = port;
    }
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

fn cmd_tools(config: Option<PathBuf>) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let LoadedConfig {
        mut oracle, source, ..
    } = load_config(config.as_deref(), &cwd)?;
    oracle.resolve_credentials_from_env();

    match &source {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: built-in defaults"),
    }
    println!();

    for p in &oracle.providers {
        let key = if p.api_key.is_some() { "set" } else { "missing" };
        println!(
            "  {:<16} {}/{}  ({} {key})",
            p.name,
            p.kind.as_str(),
            p.model,
            p.api_key_env()
        );
        if !p.description.is_empty() {
            println!("  {:<16} {}", "", p.description);
        }
    }

    let s = &oracle.synthesis;
    let key = if s.api_key.is_some() { "set" } else { "missing" };
    println!();
    println!(
        "  {:<16} {}/{}  ({} {key})",
        "synthesis",
        s.kind.as_str(),
        s.model,
        s.api_key_env()
    );
    Ok(())
}
