use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use topomap::config::AppConfig;
use topomap::job::JobKind;

mod cmd;

#[derive(Parser)]
#[command(name = "topomap")]
#[command(version, about = "Topographic map rendering service")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to topomap.toml (defaults to ./topomap.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind (overrides [server] host)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides [server] port)
        #[arg(long)]
        port: Option<u16>,
        /// Maximum number of concurrent worker processes
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Enable permissive CORS for local frontend development
        #[arg(long)]
        dev: bool,
    },
    /// Run a single job locally and stream its progress as JSON lines
    Run {
        /// Job kind: create_map, map_preview or map_reambulation
        kind: JobKind,
        /// Path to the JSON request body
        request: PathBuf,
    },
    /// View and manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default topomap.toml file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref(), cli.verbose)?;

    // Config commands print to stdout and don't need a subscriber.
    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&config, command.clone());
    }

    let _log_guard = topomap::logging::init(&config.toml.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve {
            host,
            port,
            max_concurrent,
            dev,
        } => {
            if let Some(host) = host {
                config.toml.server.host = host.clone();
            }
            if let Some(port) = port {
                config.toml.server.port = *port;
            }
            if let Some(n) = max_concurrent {
                config.toml.worker.max_concurrent = *n;
            }
            if *dev {
                config.toml.server.dev_mode = true;
            }
            cmd::cmd_serve(&config).await?;
        }
        Commands::Run { kind, request } => {
            cmd::cmd_run(&config, *kind, request).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
