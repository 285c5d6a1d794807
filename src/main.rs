//! gocache - GOCACHEPROG build cache helper
//!
//! Started by the Go toolchain with stdin/stdout wired to the protocol.
//! Diagnostics go to stderr only.

use clap::Parser;
use console::style;
use gocache::cli::Cli;
use gocache::config::ConfigManager;
use gocache::error::CacheResult;
use gocache::protocol::Engine;
use gocache::storage::{Backend, Storage};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CacheResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG takes precedence
    let default_filter = match cli.verbose {
        0 => "gocache=warn",
        1 => "gocache=info",
        _ => "gocache=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    debug!("Using config file {}", config_manager.path().display());
    let config = config_manager.load_with_overrides(&cli).await?;

    let backend = Backend::open(&config).await?;
    info!("Serving {} cache", backend.kind());

    let engine = Arc::new(Engine::new(backend));
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            interrupt.cancel();
        }
    });

    let result = Arc::clone(&engine)
        .run(std::io::stdin(), tokio::io::stdout(), cancel)
        .await;

    if cli.verbose > 0 {
        for line in engine.store().summary().lines().filter(|l| !l.is_empty()) {
            info!("{}", line);
        }
    }

    result
}
