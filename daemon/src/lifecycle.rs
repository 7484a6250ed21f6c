//! Daemon lifecycle: the single-instance file lock, pid file, socket
//! creation and teardown.
//!
//! The lock is taken before anything else touches the filesystem so two
//! daemons racing at startup cannot both win; the socket is bound last, once
//! the rest of startup can no longer fail. Cleanup on a failed startup never
//! runs when the lock was the thing that failed — those files belong to the
//! daemon that holds it.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clai_core::paths;
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::info;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub clai_home: PathBuf,
    pub run_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
    pub lock_path: PathBuf,
    pub db_path: PathBuf,
}

impl DaemonPaths {
    pub fn resolve() -> Self {
        let clai_home = paths::clai_home();
        let run_dir = paths::run_dir(&clai_home);
        Self {
            socket_path: paths::socket_path(&run_dir),
            pid_path: paths::pid_path(&run_dir),
            lock_path: paths::lock_path(&run_dir),
            db_path: paths::db_path(&clai_home),
            clai_home,
            run_dir,
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another daemon holds the lock at {0}")]
    LockHeld(PathBuf),

    #[error("failed to bind socket at {0}: {1}")]
    Bind(PathBuf, std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Holds the exclusive lock for the lifetime of the daemon. Dropping it
/// releases the lock; [`DaemonGuard::shutdown`] also removes the socket and
/// pid files.
#[derive(Debug)]
pub struct DaemonGuard {
    paths: DaemonPaths,
    // Held for the advisory lock; released on drop.
    _lock_file: File,
}

/// Acquire the single-instance lock and bind the listening socket.
pub fn startup(paths: &DaemonPaths) -> Result<(DaemonGuard, UnixListener), LifecycleError> {
    match startup_inner(paths) {
        Ok(out) => Ok(out),
        Err(e) => {
            if !matches!(e, LifecycleError::LockHeld(_)) {
                cleanup_on_failure(paths);
            }
            Err(e)
        }
    }
}

fn startup_inner(paths: &DaemonPaths) -> Result<(DaemonGuard, UnixListener), LifecycleError> {
    std::fs::create_dir_all(&paths.run_dir)?;

    // Lock first. Open without truncating: until we hold the lock the file's
    // contents belong to whichever daemon does.
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::LockHeld(paths.lock_path.clone()))?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::write(&paths.pid_path, format!("{}\n", std::process::id()))?;

    // A socket left behind by a crashed daemon is ours to replace now that
    // we hold the lock.
    if paths.socket_path.exists() {
        std::fs::remove_file(&paths.socket_path)?;
    }
    let listener = UnixListener::bind(&paths.socket_path)
        .map_err(|e| LifecycleError::Bind(paths.socket_path.clone(), e))?;

    info!(socket = %paths.socket_path.display(), "daemon listening");
    Ok((
        DaemonGuard {
            paths: paths.clone(),
            _lock_file: lock_file,
        },
        listener,
    ))
}

impl DaemonGuard {
    /// Graceful teardown: remove the socket and pid files. The lock itself
    /// releases when the guard drops.
    pub fn shutdown(&self) {
        for path in [&self.paths.socket_path, &self.paths.pid_path] {
            if path.exists()
                && let Err(e) = std::fs::remove_file(path)
            {
                warn!(path = %path.display(), error = %e, "failed to remove runtime file");
            }
        }
        info!("daemon shutdown complete");
    }
}

fn cleanup_on_failure(paths: &DaemonPaths) {
    for path in [&paths.socket_path, &paths.pid_path] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_in(dir: &std::path::Path) -> DaemonPaths {
        DaemonPaths {
            clai_home: dir.to_path_buf(),
            run_dir: dir.join("run"),
            socket_path: dir.join("run/clai.sock"),
            pid_path: dir.join("run/clai.pid"),
            lock_path: dir.join("run/clai.lock"),
            db_path: dir.join("clai.db"),
        }
    }

    #[tokio::test]
    async fn second_instance_is_refused_while_lock_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        let (_guard, _listener) = startup(&paths).expect("first instance");
        let err = startup(&paths).expect_err("second instance must fail");
        assert!(matches!(err, LifecycleError::LockHeld(_)));
        // The losing instance must not have deleted the winner's socket.
        assert!(paths.socket_path.exists());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced_on_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = paths_in(dir.path());
        std::fs::create_dir_all(&paths.run_dir).expect("run dir");
        std::fs::write(&paths.socket_path, b"stale").expect("stale socket");
        let (guard, _listener) = startup(&paths).expect("startup");
        assert!(paths.pid_path.exists());
        guard.shutdown();
        assert!(!paths.socket_path.exists());
        assert!(!paths.pid_path.exists());
    }
}
