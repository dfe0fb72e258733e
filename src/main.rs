use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod db;
mod lock;

use commands::{ConfigCommand, ConflictsCommand, ItemCommand, SessionsCommand, SyncCommand};
use config::Config;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(version)]
#[command(about = "Bidirectional sync between item stores", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Provider to operate on (defaults to local_provider)
    #[arg(long, short, global = true)]
    provider: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage items of a provider
    Item(ItemCommand),

    /// Synchronize providers
    Sync(SyncCommand),

    /// Show conflict records of a provider
    Conflicts(ConflictsCommand),

    /// Show sync sessions of a provider
    Sessions(SessionsCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=info,tandem_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;
    let provider = cli.provider.as_deref();

    match cli.command {
        Some(Commands::Item(cmd)) => {
            let store = commands::open_store(&config, provider).await?;
            cmd.run(&store).await?;
        }
        Some(Commands::Sync(cmd)) => {
            cmd.run(&config).await?;
        }
        Some(Commands::Conflicts(cmd)) => {
            let store = commands::open_store(&config, provider).await?;
            cmd.run(&store).await?;
        }
        Some(Commands::Sessions(cmd)) => {
            let store = commands::open_store(&config, provider).await?;
            cmd.run(&store).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
