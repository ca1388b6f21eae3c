use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod chat;
mod http;
mod ws;

#[derive(Parser, Debug)]
#[command(name = "chatbox-gateway")]
#[command(about = "Streaming chat relay gateway")]
#[command(version)]
struct Cli {
    /// Config file path (default ~/.chatbox/chatbox.toml)
    #[arg(long, env = "CHATBOX_CONFIG")]
    config: Option<String>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatbox_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = chatbox_core::config::ChatboxConfig::load(cli.config.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            chatbox_core::config::ChatboxConfig::default()
        });
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // initialize SQLite database
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    chatbox_settings::db::init_db(&db)?;
    info!("database migration complete");

    let settings = chatbox_settings::SettingsStore::new(db);

    // The blocking HTTP client must be constructed off the async runtime.
    let timeout_secs = config.upstream.timeout_secs;
    let read_chunk_bytes = config.upstream.read_chunk_bytes;
    let upstream = tokio::task::spawn_blocking(move || {
        chatbox_relay::UpstreamClient::new(timeout_secs, read_chunk_bytes)
    })
    .await??;

    let state = Arc::new(app::AppState::new(config, settings, upstream));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Chatbox gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
