//! LEXIS State CLI

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lexis_core::StoreConfig;
use lexis_state::{open_sled_storage, StateManager, StateManagerBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "lexis-state")]
#[command(about = "Inspect and edit the persisted LEXIS client state")]
#[command(version)]
struct Cli {
    /// Storage directory
    #[arg(long, global = true, default_value = "./lexis-data")]
    data_dir: PathBuf,

    /// Store configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage key, overrides the configuration
    #[arg(long, global = true)]
    key: Option<String>,

    /// Work on an in-memory store only
    #[arg(long, global = true)]
    no_persistence: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value at a path
    Get {
        /// Dot-separated path, empty for the whole tree
        #[arg(default_value = "")]
        path: String,
    },

    /// Write a value at a path
    Set {
        /// Dot-separated path
        path: String,

        /// JSON value; anything that does not parse is stored as a string
        value: String,

        /// Shallow-merge into an existing object
        #[arg(long)]
        merge: bool,
    },

    /// Remove the value at a path
    Unset {
        /// Dot-separated path
        path: String,
    },

    /// Print the whole tree
    Dump {
        /// Include history, subscriptions and persistence status
        #[arg(long)]
        info: bool,
    },

    /// Write a snapshot of the tree and history to a file
    Snapshot {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace the tree and history with a snapshot file
    RestoreSnapshot {
        /// Snapshot file path
        input: PathBuf,
    },

    /// Delete the persisted state
    Clear,
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(key) = &cli.key {
        config.persistence_key = key.clone();
    }
    if cli.no_persistence {
        config.enable_persistence = false;
    }
    Ok(config)
}

fn open_store(cli: &Cli, config: StoreConfig) -> anyhow::Result<Arc<StateManager>> {
    let persistent = config.enable_persistence;
    let mut builder = StateManagerBuilder::new().config(config);

    if persistent {
        std::fs::create_dir_all(&cli.data_dir)
            .with_context(|| format!("Failed to create {}", cli.data_dir.display()))?;
        builder = builder.storage(open_sled_storage(&cli.data_dir)?);
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = open_store(&cli, config)?;

    // Nothing to load when the stored state is about to be dropped
    if !matches!(cli.command, Commands::Clear) {
        let outcome = store.init();
        debug!("Startup restore: {:?}", outcome);
    }

    let result = match &cli.command {
        Commands::Get { path } => commands::get(&store, path),
        Commands::Set { path, value, merge } => commands::set(&store, path, value, *merge),
        Commands::Unset { path } => commands::unset(&store, path),
        Commands::Dump { info } => commands::dump(&store, *info),
        Commands::Snapshot { output } => commands::snapshot(&store, output),
        Commands::RestoreSnapshot { input } => commands::restore_snapshot(&store, input),
        Commands::Clear => commands::clear(&store),
    };

    store.destroy();

    println!("{}", result?);
    Ok(())
}
