use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use empre_server::settings::{load_settings, validate};
use empre_store::Database;
use tokio_util::sync::CancellationToken;

/// Real-time chat server for businesses and their customers.
#[derive(Debug, Parser)]
#[command(name = "empre", version)]
struct Cli {
    /// Settings file (defaults to ~/.empre/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host.
    #[arg(long)]
    host: Option<String>,

    /// Bind port.
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path, or `:memory:`.
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref()).context("loading settings")?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db) = cli.db {
        settings.database.path = db;
    }
    validate(&settings).context("validating settings")?;

    empre_telemetry::init_telemetry(&settings.logging).context("initializing telemetry")?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting empre chat server");

    let db = if settings.database.path == ":memory:" {
        Database::in_memory()
    } else {
        Database::open(Path::new(&settings.database.path))
    }
    .context("opening database")?;

    let handle = empre_server::start(settings.server, db, CancellationToken::new())
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, "chat server ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
