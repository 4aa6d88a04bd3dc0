//! `concord-node`: the standalone process running one replica of the
//! total-order replication engine.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use concord_config::{NodeConfig, Paths};

/// A `concord` replica process.
#[derive(Parser)]
#[command(name = "concord-node")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new node directory with a fresh identity and defaults.
    Init {
        /// Directory to initialize. Created if missing.
        path: PathBuf,

        /// Address this node will bind to.
        #[arg(long, default_value = "127.0.0.1:7700")]
        bind_address: String,
    },

    /// Start the node, loading configuration from `path`.
    Start {
        /// Directory holding `concord.toml` (and `concord.local.toml`, if
        /// any).
        path: PathBuf,
    },

    /// Print this node's identity and membership, without starting it.
    Show {
        /// Directory holding `concord.toml`.
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, bind_address } => init(&path, &bind_address),
        Commands::Start { path } => start(&path),
        Commands::Show { path } => show(&path),
    }
}

fn init(path: &PathBuf, bind_address: &str) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("creating node directory {}", path.display()))?;

    let mut config = NodeConfig::default();
    config.identity.key = concord_node::new_random_key_hex();
    config.network.bind_address = bind_address.to_string();

    let rendered = toml::to_string_pretty(&config).context("rendering default configuration")?;
    let config_path = Paths::node_config_file(path);
    fs::write(&config_path, rendered)
        .with_context(|| format!("writing {}", config_path.display()))?;

    println!("initialized node at {}", path.display());
    println!("identity: {}", config.identity.key);
    println!("edit {} to add peers under [cluster.peers]", config_path.display());
    Ok(())
}

fn start(path: &PathBuf) -> Result<()> {
    let config = NodeConfig::load_from_dir(path).context("loading node configuration")?;
    concord_node::run::run(config).context("node event loop exited")?;
    Ok(())
}

fn show(path: &PathBuf) -> Result<()> {
    let config = NodeConfig::load_from_dir(path).context("loading node configuration")?;
    println!("identity:      {}", config.identity.key);
    println!("bind address:  {}", config.network.bind_address);
    println!("health address:{}", config.network.health_address);
    println!("peers:");
    for (key, addr) in &config.cluster.peers {
        println!("  {key} -> {addr}");
    }
    Ok(())
}
