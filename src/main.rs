#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # panel-console
//!
//! Live console for servers hosted behind a game-server panel. Fetches a
//! single-use connection token from the panel, opens the daemon's console
//! WebSocket, and streams output lines to stdout. Reconnects on its own.
//!
//! ## Subcommands
//!
//! - `panel-console attach <server>` — stream the console; stdin lines are
//!   sent as commands, `:clear` clears the view
//! - `panel-console token <server>` — issue one connection token and print it
//! - `panel-console instances` — list configured panels
//!
//! Connectivity and server status go to stderr, console lines to stdout, so
//! `attach` can be piped.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use panel_console::config::Config;
use panel_console::scrollback::ConsoleLog;
use panel_console::{
    ConsoleEvent, ConsoleSession, CredentialSource, SessionOptions, TokenProvisioner, WsConnector,
};

/// Live console client for game-server panels.
#[derive(Parser)]
#[command(name = "panel-console", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Panel instance to use (defaults to `default_instance`).
    #[arg(long, global = true)]
    instance: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a server's console; stdin lines are sent as commands.
    Attach {
        /// Server identifier (short id or UUID).
        server: String,
    },
    /// Issue one connection token and print it as JSON.
    Token {
        server: String,
        /// Print the token instead of redacting it.
        #[arg(long)]
        show_token: bool,
    },
    /// List configured panel instances.
    Instances,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("panel-console: configuration error: {e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let instance = cli.instance.as_deref();
    let result = match cli.command {
        Commands::Attach { server } => attach(&config, instance, &server).await,
        Commands::Token { server, show_token } => {
            issue_token(&config, instance, &server, show_token).await
        }
        Commands::Instances => {
            list_instances(&config);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("panel-console: {e}");
        std::process::exit(1);
    }
}

async fn attach(config: &Config, instance: Option<&str>, server: &str) -> Result<(), Box<dyn Error>> {
    let instance = config.instance(instance)?;
    let provisioner = TokenProvisioner::from_instance(&instance, &config.console)?;
    // Daemons only accept upgrades whose Origin is the panel itself
    let connector = WsConnector::new(Some(instance.url.clone()), config.console.connect_timeout());

    let (session, mut events) = ConsoleSession::spawn(
        Arc::new(provisioner),
        Arc::new(connector),
        SessionOptions::from(&config.console),
    );
    info!(instance = %instance.name, server, "attaching to console");
    session.start(server);

    let mut log = ConsoleLog::new(config.console.scrollback_lines);
    let mut drawn = 0;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                drawn = render(&mut log, drawn, &event);
            }
            line = stdin.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim() == ":clear" => session.clear(),
                    Ok(Some(line)) => session.send_command(&line),
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        break;
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("Received SIGINT");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Print whatever `event` changed. Returns the new last-drawn sequence number.
fn render(log: &mut ConsoleLog, drawn: u64, event: &ConsoleEvent) -> u64 {
    match event {
        ConsoleEvent::Connection(true) => eprintln!("-- connected --"),
        ConsoleEvent::Connection(false) => eprintln!("-- disconnected, reconnecting --"),
        ConsoleEvent::Status(status) => eprintln!("-- server {status} --"),
        ConsoleEvent::Stats(s) => debug!(
            memory = s.memory_bytes,
            cpu = s.cpu_absolute,
            state = %s.state,
            "resource stats"
        ),
        ConsoleEvent::Cleared => eprintln!("-- console cleared --"),
        ConsoleEvent::Lines(_) => {}
    }

    if !log.apply(event) {
        return drawn;
    }
    let (lines, dropped) = log.read_since(drawn);
    if dropped > 0 {
        eprintln!("-- {dropped} line(s) skipped --");
    }
    for line in lines.iter().filter(|l| !l.is_blank()) {
        println!("{}", line.text);
    }
    log.last_seq()
}

async fn issue_token(
    config: &Config,
    instance: Option<&str>,
    server: &str,
    show_token: bool,
) -> Result<(), Box<dyn Error>> {
    let instance = config.instance(instance)?;
    let provisioner = TokenProvisioner::from_instance(&instance, &config.console)?;
    let credential = provisioner.issue(server).await?;

    let token = if show_token {
        credential.auth_token.as_str()
    } else {
        "<redacted>"
    };
    let out = json!({
        "instance": instance.name,
        "server": credential.issued_for_server,
        "server_uuid": credential.server_identity,
        "endpoint": credential.endpoint_url,
        "token": token,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn list_instances(config: &Config) {
    if config.instances.is_empty() {
        eprintln!("No panel instances configured");
        return;
    }
    let default = config.default_instance_name();
    for (name, entry) in &config.instances {
        let marker = if default == Some(name.as_str()) { "*" } else { " " };
        println!("{marker} {name}\t{}", entry.url);
    }
}
