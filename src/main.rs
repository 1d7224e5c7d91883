//! Entry point. Single executable, no subcommands (§6 "CLI"); exits 0 on
//! clean completion, non-zero on fatal error. Grounded on
//! `continuum-core-server`'s `main.rs`: init tracing first, then validate
//! required environment before doing any work, exiting via
//! `std::process::exit` with a diagnostic on the stderr path.

use share_engine::config::Config;
use share_engine::engine::{Engine, RunOutcome};
use share_engine::events::{EventEmitter, StdoutSink};
use share_engine::lifecycle::install_shutdown_signal;
use share_engine::remote_client::{Credentials, HttpRemoteClient};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let credentials = match Credentials::load(&config.credentials_path) {
        Ok(c) => c,
        Err(e) => {
            error!(
                "failed to load credentials from {}: {}",
                config.credentials_path, e
            );
            std::process::exit(1);
        }
    };

    info!(
        "starting share-engine: document={} sheet={} workers={}",
        config.document_id, config.sheet_title, config.worker_count
    );

    let client = Arc::new(HttpRemoteClient::new(credentials));
    let emitter = Arc::new(EventEmitter::new(StdoutSink));
    let shutdown = install_shutdown_signal();

    let engine = Engine::new(config, client, emitter);

    match engine.run(shutdown).await {
        Ok(RunOutcome::Completed) => {
            info!("run completed cleanly");
            std::process::exit(0);
        }
        Ok(RunOutcome::Interrupted) => {
            info!("run interrupted, history saved for resume");
            std::process::exit(130);
        }
        Ok(RunOutcome::FlushFailed(e)) => {
            error!("batch cell flush failed, history retained for next run: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            error!("fatal input error: {e}");
            std::process::exit(1);
        }
    }
}
