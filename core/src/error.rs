use std::io;

use thiserror::Error;

use crate::playbook::PlaybookError;

pub type Result<T> = std::result::Result<T, ClaiErr>;

#[derive(Error, Debug)]
pub enum ClaiErr {
    /// The on-disk schema was produced by a newer daemon. Refusing to touch
    /// it is the only safe move; surfaced as a distinct startup failure.
    #[error("database schema version {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("playbook error: {0}")]
    Playbook(#[from] PlaybookError),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("remote text-to-command request failed: {0}")]
    Remote(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ClaiErr {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ClaiErr::Malformed(msg.into())
    }
}
