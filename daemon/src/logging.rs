//! Daemon logging: `tracing` to `<clai_home>/logs/daemon.log` through a
//! non-blocking appender. `RUST_LOG` controls the filter; the default keeps
//! info-level service events without per-request noise.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub fn init(clai_home: &Path) -> std::io::Result<WorkerGuard> {
    let log_dir = clai_core::paths::log_dir(clai_home);
    std::fs::create_dir_all(&log_dir)?;
    let appender =
        tracing_appender::rolling::never(&log_dir, clai_core::paths::LOG_FILENAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .init();
    Ok(guard)
}
