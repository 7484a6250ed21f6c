//! Client side of the daemon socket: dialing with stale-socket recovery,
//! autospawn of a missing daemon, and the typed request surface.
//!
//! The recovery rules are deliberately conservative: the socket file is only
//! ever deleted when the dial failure is structurally stale (connection
//! refused / no such file) *and* the daemon lock is free. Any other failure
//! is reported without touching state that may belong to a live daemon.

mod connect;
mod ops;

pub use connect::ConnectOptions;
pub use connect::connect;
pub use connect::connect_or_spawn;
pub use ops::ClaiClient;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon unreachable at {path}: {source}")]
    Unreachable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not locate a daemon binary to spawn")]
    DaemonBinaryNotFound,

    #[error("failed to spawn daemon: {0}")]
    Spawn(std::io::Error),

    #[error("daemon did not become ready in time")]
    ReadinessTimeout,

    #[error("request timed out")]
    Timeout,

    #[error("server error: {0}")]
    Server(clai_protocol::WireError),

    #[error("unexpected response body")]
    UnexpectedResponse,

    #[error(transparent)]
    Frame(#[from] clai_protocol::FrameError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
