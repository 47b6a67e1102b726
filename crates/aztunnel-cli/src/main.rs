//! aztunnel: local port forwarding through an Azure Bastion host.
//!
//! Fetches the SSH key from Key Vault, opens a bastion tunnel to the jump
//! VM, and forwards a local port to a destination reachable from that VM.
//! Optionally points a kubeconfig cluster at the forwarded port.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// aztunnel: forward a local port through Azure Bastion
#[derive(Parser)]
#[command(name = "aztunnel", version, about = "Forward a local port through Azure Bastion over SSH")]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long = "log-level", global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open the tunnel and forward until Ctrl-C (default)
    Up,

    /// Validate the config file and print a summary
    Check,

    /// List clusters in the kubeconfig
    Clusters,
}

fn init_tracing(verbose: bool, log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("aztunnel=debug,aztunnel_cli=debug,aztunnel_client=debug,aztunnel_core=debug")
        } else {
            EnvFilter::new(format!(
                "aztunnel={log_level},aztunnel_cli={log_level},aztunnel_client={log_level},aztunnel_core={log_level}"
            ))
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, &cli.log_level);

    let result = match cli.command.unwrap_or(Command::Up) {
        Command::Up => match cli.config.as_deref() {
            Some(path) => commands::up::run(path).await,
            None => Err(anyhow::anyhow!("--config is required")),
        },
        Command::Check => match cli.config.as_deref() {
            Some(path) => commands::check::run(path),
            None => Err(anyhow::anyhow!("--config is required")),
        },
        Command::Clusters => commands::clusters::run(),
    };

    if let Err(e) = result {
        eprintln!("aztunnel: {e:#}");
        std::process::exit(1);
    }
}
