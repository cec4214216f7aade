//! Parley chat server binary.

use std::path::PathBuf;

use clap::Parser;
use parley::prelude::*;
use tracing_subscriber::EnvFilter;

/// Connection-oriented text chat server.
#[derive(Parser, Debug)]
#[command(name = "parley-server", version, about)]
struct Cli {
    /// Configuration file (TOML). Missing file means defaults.
    #[arg(short, long, default_value = "parley.toml")]
    config: PathBuf,

    /// Address to listen on; overrides `[server] bind`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory for the file store; overrides `[store] data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep accounts and messages in memory only.
    #[arg(long)]
    memory: bool,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut config = ServerConfig::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    if cli.memory {
        config.store.kind = StoreKind::Memory;
    }

    match config.store.kind {
        StoreKind::Memory => serve(&config, MemoryStore::new()).await?,
        StoreKind::File => serve(&config, FileStore::open_dir(&config.store.data_dir)?).await?,
    }
    Ok(())
}

async fn serve<S: PersistenceGateway>(config: &ServerConfig, store: S) -> Result<(), ParleyError> {
    let server = config.builder().build(store).await?;
    tracing::info!(store = ?config.store.kind, "store ready");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
