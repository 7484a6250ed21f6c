//! Well-known file locations. Everything lives under `<home>/.clai` unless
//! overridden through the environment, which tests rely on to stay hermetic.

use std::path::Path;
use std::path::PathBuf;

pub const CLAI_HOME_ENV: &str = "CLAI_HOME";
pub const CLAI_RUN_DIR_ENV: &str = "CLAI_RUN_DIR";
pub const CLAI_DAEMON_BIN_ENV: &str = "CLAI_DAEMON_BIN";

pub const SOCKET_FILENAME: &str = "clai.sock";
pub const PID_FILENAME: &str = "clai.pid";
pub const LOCK_FILENAME: &str = "clai.lock";
pub const DB_FILENAME: &str = "clai.db";
pub const CONFIG_FILENAME: &str = "config.yaml";
pub const LOG_FILENAME: &str = "daemon.log";

/// Resolve the clai state directory: `$CLAI_HOME`, else `~/.clai`.
pub fn clai_home() -> PathBuf {
    if let Some(home) = std::env::var_os(CLAI_HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clai")
}

/// Runtime directory holding the socket, pid and lock files:
/// `$CLAI_RUN_DIR`, else `<clai_home>/run`.
pub fn run_dir(clai_home: &Path) -> PathBuf {
    if let Some(dir) = std::env::var_os(CLAI_RUN_DIR_ENV) {
        return PathBuf::from(dir);
    }
    clai_home.join("run")
}

pub fn socket_path(run_dir: &Path) -> PathBuf {
    run_dir.join(SOCKET_FILENAME)
}

pub fn pid_path(run_dir: &Path) -> PathBuf {
    run_dir.join(PID_FILENAME)
}

pub fn lock_path(run_dir: &Path) -> PathBuf {
    run_dir.join(LOCK_FILENAME)
}

pub fn db_path(clai_home: &Path) -> PathBuf {
    clai_home.join(DB_FILENAME)
}

pub fn config_path(clai_home: &Path) -> PathBuf {
    clai_home.join(CONFIG_FILENAME)
}

pub fn log_dir(clai_home: &Path) -> PathBuf {
    clai_home.join("logs")
}

/// Project-local playbook, searched before the user-level workflows dir.
pub const PROJECT_PLAYBOOK_RELATIVE: &str = ".clai/tasks.yaml";

pub fn user_playbook_dir(clai_home: &Path) -> PathBuf {
    clai_home.join("workflows")
}
