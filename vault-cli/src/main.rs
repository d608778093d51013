//! Vault Command Line Interface
//!
//! Usage:
//!   vault start             - Start the API server and expiration sweeper
//!   vault sweep             - Run one expiration sweep against the store
//!   vault redrive <id>      - Re-apply a failed billing event
//!   vault status            - Show server health
//!   vault config            - Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vault_db::VaultConfig;

mod commands;

#[derive(Parser)]
#[command(name = "vault")]
#[command(about = "Vault access ledger CLI")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VAULT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Start {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Disable permissive CORS headers
        #[arg(long)]
        no_cors: bool,
    },

    /// Expire overdue pending attempts once
    Sweep,

    /// Re-apply a failed billing event
    Redrive {
        /// Provider event id
        event_id: String,
        /// Send the request to a running server instead of opening the store
        #[arg(short, long)]
        api_url: Option<String>,
    },

    /// Show server status
    Status {
        /// API server URL
        #[arg(short, long, default_value = "http://localhost:3000")]
        api_url: String,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(config: Option<&VaultConfig>) {
    let default_level = config.map(|c| c.logging.level).unwrap_or_default();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match VaultConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(None);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(Some(&config));

    if let Err(e) = run_command(cli.command, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_command(command: Commands, config: VaultConfig) -> commands::CmdResult {
    match command {
        Commands::Start { host, port, no_cors } => {
            commands::handle_start_command(config, host, port, !no_cors).await
        }
        Commands::Sweep => commands::handle_sweep_command(config).await,
        Commands::Redrive { event_id, api_url } => {
            commands::handle_redrive_command(config, event_id, api_url).await
        }
        Commands::Status { api_url } => commands::handle_status_command(&api_url).await,
        Commands::Config => {
            print!("{}", config.to_redacted_toml()?);
            Ok(())
        }
    }
}
