//! Typed error kinds. The CLI turns the user-facing ones into a single
//! stderr line and exit code 1; everything else propagates with a trace.

use std::path::PathBuf;
use std::time::Duration;

use crate::status::SyncStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file lock could not be acquired before its deadline.
    #[error(
        "could not acquire {kind} lock within {timeout:?}; another repoyard \
         operation may be in progress. If you believe the lock is stale, \
         remove the file at {lock_path}"
    )]
    LockHeld {
        kind: String,
        lock_path: PathBuf,
        timeout: Duration,
    },

    /// The transfer tool returned non-zero.
    #[error("sync failed. rclone output:\n{stdout}\n{stderr}")]
    SyncFailed { stdout: String, stderr: String },

    /// The requested direction is incompatible with the observed condition
    /// under the careful setting.
    #[error(
        "sync is unsafe. Info:\n    Local exists: {}\n    Remote exists: {}\n    \
         Local sync record: {:?}\n    Remote sync record: {:?}\n    Sync condition: {}",
        .0.local_exists, .0.remote_exists, .0.local_record, .0.remote_record, .0.condition
    )]
    SyncUnsafe(Box<SyncStatus>),

    /// Empty remote paths are disqualified outright; they defeat the safety
    /// checks around record placement.
    #[error("remote path cannot be empty")]
    InvalidRemotePath,

    /// Observed on-disk sync state is inconsistent (missing records,
    /// mismatched file/directory kinds, diverged incomplete sessions).
    #[error("{0}")]
    SyncState(String),

    /// A lifecycle operation was refused: already included, tombstoned,
    /// not found, name conflict, parent cycle, and the like.
    #[error("{0}")]
    Lifecycle(String),

    /// Bad command-line or function arguments.
    #[error("{0}")]
    Usage(String),

    /// A soft interrupt was requested; the operation stopped cleanly at a
    /// part boundary.
    #[error("interrupted")]
    Interrupted,

    /// A bulk-scheduled operation exceeded its per-task deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("config error: {0}")]
    Config(String),

    /// A spawned task failed outside its own error path.
    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Whether this error should be reported as a one-line user error
    /// (exit 1) rather than an unexpected failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::LockHeld { .. }
                | Error::SyncFailed { .. }
                | Error::SyncUnsafe(_)
                | Error::InvalidRemotePath
                | Error::SyncState(_)
                | Error::Lifecycle(_)
                | Error::Usage(_)
                | Error::Interrupted
                | Error::Timeout(_)
                | Error::Config(_)
        )
    }
}
