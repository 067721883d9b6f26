//! `steward`: inspect and edit sessions in a configured Steward store.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use steward_core::{SessionConfig, SessionState};
use steward_store::{SessionStore, SessionStoreFactory};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "steward", about = "Steward tiered session store")]
struct Cli {
    /// Path to config file. Falls back to the environment when missing.
    #[arg(short, long, default_value = "steward.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and connect to every tier
    CheckConfig,
    /// Print a session's state as JSON
    Get { session_id: String },
    /// Store a JSON state under a session id
    Set {
        session_id: String,
        /// State as a JSON document
        state: String,
        /// Expiry for memory and cache tiers, in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Remove a session from every tier
    Delete { session_id: String },
}

async fn load_config(path: &Path) -> anyhow::Result<SessionConfig> {
    if path.exists() {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        info!(path = %path.display(), "Loaded config file");
        Ok(SessionConfig::from_toml_str(&raw)?)
    } else {
        info!(path = %path.display(), "Config file not found, reading environment");
        Ok(SessionConfig::from_env()?)
    }
}

async fn run(store: &Arc<dyn SessionStore>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::CheckConfig => {
            println!("Configuration OK");
        }
        Commands::Get { session_id } => match store.get(&session_id).await? {
            Some(state) => println!("{}", serde_json::to_string_pretty(state.as_value())?),
            None => {
                println!("Session '{session_id}' not found");
            }
        },
        Commands::Set {
            session_id,
            state,
            ttl,
        } => {
            let value: serde_json::Value = serde_json::from_str(&state)
                .map_err(|e| anyhow::anyhow!("State is not valid JSON: {e}"))?;
            store
                .set(
                    &session_id,
                    &SessionState::new(value),
                    ttl.map(Duration::from_secs),
                )
                .await?;
            println!("Stored session '{session_id}'");
        }
        Commands::Delete { session_id } => {
            store.delete(&session_id).await?;
            println!("Deleted session '{session_id}'");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    info!(store_kind = ?config.store_kind, "Building session store");
    let store = SessionStoreFactory::build(&config).await?;

    let result = run(&store, cli.command).await;

    // Release connections even when the command failed.
    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close session store");
    }
    result
}
