//! SnackDB server
//!
//! ```bash
//! # Defaults: 127.0.0.1:7878, one worker per core
//! snackdb
//!
//! # JSON config file, with the bind address overridden
//! snackdb --config snackdb.json --bind 0.0.0.0:7878
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use snackdb::core::config::Config;
use snackdb::core::registry::Registry;
use snackdb::server::tcp::SnackServer;
use snackdb::storage::table::TableOptions;

#[derive(Parser, Debug)]
#[command(name = "snackdb")]
#[command(about = "In-memory networked row store")]
#[command(version)]
struct Args {
    /// JSON config file; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Worker threads, overrides the config file
    #[arg(short, long)]
    workers: Option<usize>,

    /// Substitute a match-nothing filter for undecodable filters
    #[arg(long)]
    lenient_decode: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    config.lenient_decode |= args.lenient_decode;

    info!(version = env!("CARGO_PKG_VERSION"), ?config, "starting snackdb");

    let registry = Arc::new(Registry::new(TableOptions::from(&config)));
    let server = SnackServer::bind(&config, registry).await?;

    let stop = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                stop.shutdown();
            }
            Err(e) => error!(error = %e, "cannot listen for interrupt"),
        }
    });

    server.run().await?;
    info!("stopped");
    Ok(())
}
