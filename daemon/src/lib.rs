//! The `clai` daemon: owns the database, serves the suggestion IPC surface
//! on a unix socket, and runs the background workflow miner. Exactly one
//! instance runs per user, enforced by a file lock in the run directory.

mod lifecycle;
mod logging;
mod miner_task;
mod processor;
mod server;

pub use lifecycle::DaemonPaths;
pub use lifecycle::LifecycleError;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clai_core::cache::L1Cache;
use clai_core::config::Config;
use clai_core::discovery::DiscoveryEngine;
use clai_core::ingest::EventIngester;
use clai_core::miner::Miner;
use clai_core::ranker::Ranker;
use clai_core::sessions::SessionRegistry;
use clai_core::storage::Database;
use clai_core::suggest::SuggestDispatcher;
use clai_core::text_to_command::TextToCommand;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use crate::processor::ServerState;

/// Run the daemon until SIGTERM/SIGINT. Returns an error (and a non-zero
/// process exit) only for startup failures; a signal is a clean shutdown.
pub async fn run() -> anyhow::Result<()> {
    let paths = DaemonPaths::resolve();
    std::fs::create_dir_all(&paths.clai_home)
        .with_context(|| format!("creating {}", paths.clai_home.display()))?;
    let _log_guard = logging::init(&paths.clai_home).context("initializing logging")?;

    let config = Config::load(&paths.clai_home).context("loading configuration")?;
    // Schema-newer-than-known surfaces here as a fatal startup error.
    let db = Database::open(&paths.db_path, config.slot.clone())
        .with_context(|| format!("opening database at {}", paths.db_path.display()))?;

    let registry = Arc::new(SessionRegistry::new());
    let cache = Arc::new(L1Cache::new(&config.suggest.l1));
    let discovery = Arc::new(DiscoveryEngine::new(config.discovery.clone()));
    let ranker = Arc::new(Ranker::new(
        db.clone(),
        Arc::clone(&registry),
        discovery,
        config.clone(),
        paths.clai_home.clone(),
    ));
    let ingester = Arc::new(
        EventIngester::new(db.clone())
            .with_registry(Arc::clone(&registry))
            .with_cache(Arc::clone(&cache)),
    );
    let miner = Arc::new(Miner::new(db.clone(), config.workflow.clone()));
    let state = Arc::new(ServerState {
        dispatcher: Arc::new(SuggestDispatcher::new(ranker, cache)),
        text_to_command: Arc::new(TextToCommand::new(config.ai.clone())),
        ingester,
        registry,
        miner: Arc::clone(&miner),
        db,
        config,
        started_at: Instant::now(),
    });

    let (guard, listener) = lifecycle::startup(&paths)?;
    info!(version = env!("CARGO_PKG_VERSION"), "clai daemon started");

    let shutdown = CancellationToken::new();
    let miner_handle = miner_task::spawn(miner, shutdown.clone());
    let server_handle = tokio::spawn(server::run(
        listener,
        Arc::clone(&state),
        shutdown.clone(),
    ));

    wait_for_signal().await;
    info!("shutdown signal received");
    shutdown.cancel();

    // Let in-flight writes drain before removing the runtime files.
    let _ = server_handle.await;
    let _ = miner_handle.await;
    guard.shutdown();
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to wait for ctrl-c");
            }
        }
    }
}
