//! Connection establishment and daemon autospawn.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use clai_core::paths;
use fs2::FileExt;
use tokio::net::UnixStream;
use tracing::debug;

use crate::ClientError;

const DIAL_RETRIES: u32 = 3;
const DIAL_BACKOFF: Duration = Duration::from_millis(50);
/// How long to wait for a lock-holding daemon to publish its socket.
const LOCK_GRACE: Duration = Duration::from_millis(150);
/// SIGTERM-to-SIGKILL escalation window for an orphaned daemon.
const TERM_GRACE: Duration = Duration::from_millis(500);
const READINESS_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub run_dir: PathBuf,
    /// Total budget for spawn + readiness.
    pub spawn_timeout: Duration,
    /// When false, never spawn; only talk to an already-running daemon.
    pub autospawn: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        let home = paths::clai_home();
        Self {
            run_dir: paths::run_dir(&home),
            spawn_timeout: Duration::from_secs(3),
            autospawn: true,
        }
    }
}

/// Dial the daemon socket without any recovery.
pub async fn connect(run_dir: &Path) -> Result<UnixStream, ClientError> {
    let socket_path = paths::socket_path(run_dir);
    UnixStream::connect(&socket_path)
        .await
        .map_err(|source| ClientError::Unreachable {
            path: socket_path,
            source,
        })
}

/// Full client connect algorithm: dial, recover a structurally stale socket,
/// wait out a starting daemon, terminate an orphan, spawn, poll readiness.
pub async fn connect_or_spawn(options: &ConnectOptions) -> Result<UnixStream, ClientError> {
    let socket_path = paths::socket_path(&options.run_dir);

    if socket_path.exists() {
        let mut last_err: Option<std::io::Error> = None;
        for attempt in 0..DIAL_RETRIES {
            match UnixStream::connect(&socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(attempt, error = %e, "dial failed");
                    last_err = Some(e);
                }
            }
            tokio::time::sleep(DIAL_BACKOFF).await;
        }
        let err = last_err.unwrap_or_else(|| std::io::Error::other("dial failed"));
        let structurally_stale = matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
        );
        if !(structurally_stale && !lock_is_held(&options.run_dir)) {
            // A live (or unknown-state) daemon owns this socket; report
            // without touching it.
            return Err(ClientError::Unreachable {
                path: socket_path,
                source: err,
            });
        }
        debug!(socket = %socket_path.display(), "removing structurally stale socket");
        let _ = std::fs::remove_file(&socket_path);
    } else if lock_is_held(&options.run_dir) {
        // A daemon is starting up; give it a moment to publish the socket.
        let deadline = tokio::time::Instant::now() + LOCK_GRACE;
        while tokio::time::Instant::now() < deadline {
            if socket_path.exists()
                && let Ok(stream) = UnixStream::connect(&socket_path).await
            {
                return Ok(stream);
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
        // Still no socket: the lock holder is wedged. Take it down.
        terminate_orphan(&options.run_dir).await;
    }

    if !options.autospawn {
        return Err(ClientError::Unreachable {
            path: socket_path,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "daemon not running"),
        });
    }

    spawn_daemon(&options.run_dir)?;
    await_readiness(&socket_path, options.spawn_timeout).await
}

/// True when some process holds the daemon lock.
fn lock_is_held(run_dir: &Path) -> bool {
    let lock_path = paths::lock_path(run_dir);
    let Ok(file) = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
    else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = fs2::FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

/// SIGTERM the pid-file process, escalate to SIGKILL after the grace window.
async fn terminate_orphan(run_dir: &Path) {
    let pid_path = paths::pid_path(run_dir);
    let Some(pid) = std::fs::read_to_string(&pid_path)
        .ok()
        .and_then(|text| text.trim().parse::<i32>().ok())
        .filter(|&pid| pid > 1)
    else {
        return;
    };
    debug!(pid, "terminating orphaned daemon");
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let deadline = tokio::time::Instant::now() + TERM_GRACE;
    while tokio::time::Instant::now() < deadline {
        if unsafe { libc::kill(pid, 0) } != 0 {
            return; // gone
        }
        tokio::time::sleep(READINESS_POLL).await;
    }
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
}

/// Locate the daemon binary: env override, alongside the client executable,
/// PATH, then common install locations.
fn find_daemon_binary() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(paths::CLAI_DAEMON_BIN_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
    }
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join("clai-daemon");
        if sibling.is_file() {
            return Some(sibling);
        }
    }
    if let Ok(path) = which::which("clai-daemon") {
        return Some(path);
    }
    let mut candidates = vec![
        PathBuf::from("/usr/local/bin/clai-daemon"),
        PathBuf::from("/opt/homebrew/bin/clai-daemon"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".local/bin/clai-daemon"));
    }
    candidates.into_iter().find(|p| p.is_file())
}

/// Start the daemon detached in its own process group and record its pid.
/// Never waits on the child.
fn spawn_daemon(run_dir: &Path) -> Result<(), ClientError> {
    use std::os::unix::process::CommandExt;

    let binary = find_daemon_binary().ok_or(ClientError::DaemonBinaryNotFound)?;
    let mut command = std::process::Command::new(&binary);
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    unsafe {
        command.pre_exec(|| {
            // New session so the daemon survives the shell that spawned it.
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = command.spawn().map_err(ClientError::Spawn)?;
    debug!(pid = child.id(), binary = %binary.display(), "spawned daemon");
    let _ = std::fs::create_dir_all(run_dir);
    let _ = std::fs::write(paths::pid_path(run_dir), format!("{}\n", child.id()));
    Ok(())
}

async fn await_readiness(
    socket_path: &Path,
    timeout: Duration,
) -> Result<UnixStream, ClientError> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(stream) = UnixStream::connect(socket_path).await {
            return Ok(stream);
        }
        tokio::time::sleep(READINESS_POLL).await;
    }
    Err(ClientError::ReadinessTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_socket_with_free_lock_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().to_path_buf();
        std::fs::create_dir_all(&run_dir).expect("run dir");
        // A filesystem entry nothing listens on: dials get ECONNREFUSED.
        let socket_path = paths::socket_path(&run_dir);
        let _listener = std::os::unix::net::UnixListener::bind(&socket_path).expect("bind");
        drop(_listener);

        let options = ConnectOptions {
            run_dir: run_dir.clone(),
            spawn_timeout: Duration::from_millis(100),
            autospawn: false,
        };
        let err = connect_or_spawn(&options).await.expect_err("no daemon");
        // With autospawn off the cleanup still ran before the final error.
        assert!(!socket_path.exists(), "stale socket should be deleted");
        assert!(matches!(err, ClientError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn held_lock_prevents_socket_deletion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().to_path_buf();
        std::fs::create_dir_all(&run_dir).expect("run dir");
        let socket_path = paths::socket_path(&run_dir);
        let listener = std::os::unix::net::UnixListener::bind(&socket_path).expect("bind");
        drop(listener);

        // Hold the daemon lock like a live daemon would.
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(paths::lock_path(&run_dir))
            .expect("lock file");
        lock_file.try_lock_exclusive().expect("hold lock");

        let options = ConnectOptions {
            run_dir,
            spawn_timeout: Duration::from_millis(100),
            autospawn: false,
        };
        let err = connect_or_spawn(&options).await.expect_err("unreachable");
        assert!(matches!(err, ClientError::Unreachable { .. }));
        assert!(socket_path.exists(), "socket must not be touched");
    }

    #[tokio::test]
    async fn live_listener_is_used_directly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().to_path_buf();
        let socket_path = paths::socket_path(&run_dir);
        let _listener = tokio::net::UnixListener::bind(&socket_path).expect("bind");

        let options = ConnectOptions {
            run_dir,
            spawn_timeout: Duration::from_millis(100),
            autospawn: false,
        };
        connect_or_spawn(&options).await.expect("connect");
    }
}
