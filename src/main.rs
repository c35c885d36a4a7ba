use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use redstore::config::{
    Config, DEFAULT_AOF_PATH, DEFAULT_BUFFER_SIZE, DEFAULT_EXPIRY_INTERVAL_SECONDS, DEFAULT_HOST,
    DEFAULT_PORT,
};

/// An in-memory RESP key/value server with per-key expiry and an
/// append-only command log.
#[derive(Parser)]
#[command(name = "redstore", version, about)]
struct Cli {
    /// Address to listen on.
    #[arg(short = 'a', long, default_value = DEFAULT_HOST)]
    address: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bytes read from a socket at a time.
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Seconds between background expiry sampling cycles.
    #[arg(short, long, default_value_t = DEFAULT_EXPIRY_INTERVAL_SECONDS)]
    expiry_interval: u64,

    /// Path of the append-only command log.
    #[arg(short = 'f', long, default_value = DEFAULT_AOF_PATH)]
    aof_path: PathBuf,

    /// Replay the append-only log on startup.
    #[arg(short, long)]
    load: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config {
        host: cli.address,
        port: cli.port,
        buffer_size: cli.buffer_size,
        expiry_interval: Duration::from_secs(cli.expiry_interval),
        aof_path: cli.aof_path,
        load_on_start: cli.load,
    };

    // One reactor thread drives everything; the store is never shared
    // across threads, so all tasks live in a LocalSet.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
        info!(host = %config.host, port = config.port, "listening");
        redstore::server::run(listener, config, signal::ctrl_c()).await
    })
}
