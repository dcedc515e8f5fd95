//! lxdspawn - LXD container spawner CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use lxdspawn_cli::commands::{self, StartRequest};
use lxdspawn_config::GlobalConfig;
use lxdspawn_core::{SessionStore, Spawner};
use lxdspawn_provider::create_provider;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "lxdspawn")]
#[command(author, version, about = "Per-user LXD container spawner", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or reuse a user's container, start the service and wait until it is ready
    Start {
        /// User the container belongs to
        #[arg(short, long)]
        user: String,
        /// Environment variable for the service (repeatable)
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = commands::parse_key_val)]
        env: Vec<(String, String)>,
        /// CPU limit in cores (fractions allowed)
        #[arg(long)]
        cpu: Option<f64>,
        /// Memory limit (e.g. 2GB)
        #[arg(long)]
        memory: Option<String>,
        /// Seconds to wait for the service to become ready
        #[arg(long)]
        timeout: Option<u32>,
        /// Command to run in the container
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Stop a user's container
    Stop {
        #[arg(short, long)]
        user: String,
    },

    /// Check whether a user's service is running
    Poll {
        #[arg(short, long)]
        user: String,
    },

    /// Show the live state of a user's container
    Status {
        #[arg(short, long)]
        user: String,
    },

    /// Show or clear the saved state for a user
    State {
        #[arg(short, long)]
        user: String,
        /// Forget the saved state
        #[arg(long)]
        clear: bool,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match &cli.config {
        Some(path) => GlobalConfig::load_from(path)?,
        None => GlobalConfig::load()?,
    };

    let sessions = SessionStore::default_path()?;

    // Commands that don't talk to LXD
    match &cli.command {
        Commands::Config => return commands::config(&config, cli.config.as_deref()),
        Commands::State { user, clear } => return commands::state(&sessions, user, *clear),
        _ => {}
    }

    let provider = create_provider(&config.lxd).await?;
    let spawner = Spawner::from_config(provider, &config);

    match cli.command {
        Commands::Start {
            user,
            env,
            cpu,
            memory,
            timeout,
            cmd,
        } => {
            let request = StartRequest {
                username: user,
                command: cmd,
                env,
                cpu,
                memory,
                timeout,
            };
            commands::start(&spawner, &config, &sessions, request)
                .await
                .context("start failed")?;
        }
        Commands::Stop { user } => commands::stop(&spawner, &sessions, &user).await?,
        Commands::Poll { user } => commands::poll(&spawner, &sessions, &user).await?,
        Commands::Status { user } => commands::status(&spawner, &sessions, &user).await?,
        Commands::State { .. } | Commands::Config => unreachable!(), // handled above
    }

    Ok(())
}
