//! The sync-state evaluator: combines local/remote existence, the most
//! recent local mtime, and the two sync records into a `SyncCondition`.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::rclone;
use crate::record::SyncRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCondition {
    Synced,
    /// A push was interrupted; the remote carries an incomplete record.
    SyncToRemoteIncomplete,
    /// A pull was interrupted; the local side carries an incomplete record.
    SyncFromRemoteIncomplete,
    Conflict,
    NeedsPush,
    NeedsPull,
    Excluded,
    Error,
    /// The repo was deleted on the remote by another machine.
    Tombstoned,
}

impl std::fmt::Display for SyncCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncCondition::Synced => "synced",
            SyncCondition::SyncToRemoteIncomplete => "sync_to_remote_incomplete",
            SyncCondition::SyncFromRemoteIncomplete => "sync_from_remote_incomplete",
            SyncCondition::Conflict => "conflict",
            SyncCondition::NeedsPush => "needs_push",
            SyncCondition::NeedsPull => "needs_pull",
            SyncCondition::Excluded => "excluded",
            SyncCondition::Error => "error",
            SyncCondition::Tombstoned => "tombstoned",
        };
        f.write_str(s)
    }
}

/// Everything the evaluator observed, plus its verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub condition: SyncCondition,
    pub local_exists: bool,
    pub remote_exists: bool,
    pub local_record: Option<SyncRecord>,
    pub remote_record: Option<SyncRecord>,
    pub is_dir: bool,
    pub error_message: Option<String>,
}

impl SyncStatus {
    /// A bare status for conditions decided before any observation happens
    /// (tombstones, local-alias storage).
    pub fn bare(condition: SyncCondition) -> SyncStatus {
        SyncStatus {
            condition,
            local_exists: false,
            remote_exists: false,
            local_record: None,
            remote_record: None,
            is_dir: false,
            error_message: None,
        }
    }
}

/// Raw observations fed to [`evaluate`]. Collected by [`get_sync_status`];
/// built directly in tests.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub local_exists: bool,
    pub local_is_dir: bool,
    pub local_is_empty: bool,
    pub remote_exists: bool,
    pub remote_is_dir: bool,
    pub local_mtime: Option<DateTime<Utc>>,
    pub local_record: Option<SyncRecord>,
    pub remote_record: Option<SyncRecord>,
}

/// The decision procedure. Pure: no filesystem or subprocess access.
///
/// Returns `Err` only for the file/directory kind mismatch, which is a hard
/// error rather than a condition; every other inconsistency is reported as
/// `SyncCondition::Error` with a message, so callers can decide whether a
/// FORCE setting overrides it.
pub fn evaluate(obs: Observation) -> Result<SyncStatus> {
    if obs.local_exists && obs.remote_exists && obs.local_is_dir != obs.remote_is_dir {
        let kind = |is_dir: bool| if is_dir { "directory" } else { "file" };
        return Err(Error::SyncState(format!(
            "local and remote paths are not both files or both directories; \
             local is a {} and remote is a {}",
            kind(obs.local_is_dir),
            kind(obs.remote_is_dir)
        )));
    }

    let is_dir = obs.local_is_dir || obs.remote_is_dir;
    let mut status = SyncStatus {
        condition: SyncCondition::Error,
        local_exists: obs.local_exists,
        remote_exists: obs.remote_exists,
        local_record: obs.local_record.clone(),
        remote_record: obs.remote_record.clone(),
        is_dir,
        error_message: None,
    };

    // A repo part on the remote implies a remote sync record for it.
    if obs.remote_exists && obs.remote_record.is_none() {
        status.error_message =
            Some("remote path exists, but the remote sync record does not".into());
        return Ok(status);
    }

    // A non-empty local presence that yields no mtime cannot be compared
    // against the record timestamp.
    if obs.local_mtime.is_none()
        && obs.local_exists
        && (!obs.local_is_dir || !obs.local_is_empty)
    {
        status.error_message = Some(
            "local path exists and is not empty, but its last modification \
             time cannot be determined"
                .into(),
        );
        return Ok(status);
    }

    let local_incomplete = obs
        .local_record
        .as_ref()
        .map_or(false, |r| !r.sync_complete);
    let remote_incomplete = obs
        .remote_record
        .as_ref()
        .map_or(false, |r| !r.sync_complete);
    let records_match = match (&obs.local_record, &obs.remote_record) {
        (Some(l), Some(r)) => l.ulid == r.ulid,
        _ => false,
    };

    let local_modified_since_record = || match (&obs.local_mtime, &obs.local_record) {
        (Some(mtime), Some(record)) => *mtime > record.timestamp,
        _ => false,
    };

    status.condition = if local_incomplete && remote_incomplete {
        if records_match {
            // Same session on both sides: an interrupted push originated
            // here (force-push stamps both sides before transferring).
            SyncCondition::SyncToRemoteIncomplete
        } else {
            status.error_message = Some(format!(
                "inconsistent incomplete records (different ULIDs); local {}, remote {}",
                obs.local_record.as_ref().map(|r| r.ulid.to_string()).unwrap_or_default(),
                obs.remote_record.as_ref().map(|r| r.ulid.to_string()).unwrap_or_default(),
            ));
            return Ok(status);
        }
    } else if remote_incomplete {
        // Push interrupted, possibly by another machine.
        SyncCondition::SyncToRemoteIncomplete
    } else if local_incomplete {
        // Pull interrupted on this machine.
        SyncCondition::SyncFromRemoteIncomplete
    } else if records_match {
        if local_modified_since_record() {
            SyncCondition::NeedsPush
        } else {
            SyncCondition::Synced
        }
    } else if obs.local_exists {
        if obs.remote_exists {
            let Some(local_record) = &obs.local_record else {
                status.error_message = Some(
                    "local sync record does not exist, but both the local and \
                     remote paths exist"
                        .into(),
                );
                return Ok(status);
            };
            // remote_record is present here: its absence was ruled out above.
            let remote_newer = obs
                .remote_record
                .as_ref()
                .map_or(false, |r| r.timestamp > local_record.timestamp);
            if remote_newer {
                if local_modified_since_record() {
                    SyncCondition::Conflict
                } else {
                    SyncCondition::NeedsPull
                }
            } else {
                SyncCondition::Conflict
            }
        } else {
            if obs.local_record.is_some() {
                status.error_message = Some(
                    "local sync record exists, but the remote path does not".into(),
                );
                return Ok(status);
            }
            if obs.local_is_dir && obs.local_is_empty {
                // An empty never-synced directory carries nothing to push.
                SyncCondition::Synced
            } else {
                SyncCondition::NeedsPush
            }
        }
    } else if obs.remote_exists {
        SyncCondition::Excluded
    } else {
        // Neither side exists; trivially synced. Common for CONF.
        SyncCondition::Synced
    };

    Ok(status)
}

/// Observe both sides of one repo part and evaluate. Local observations use
/// the filesystem directly; remote ones go through rclone.
pub async fn get_sync_status(
    rclone_config: &Path,
    local_path: &Path,
    local_record_path: &Path,
    remote: &str,
    remote_path: &Path,
    remote_record_path: &Path,
) -> Result<SyncStatus> {
    let local_meta = std::fs::metadata(local_path).ok();
    let local_exists = local_meta.is_some();
    let local_is_dir = local_meta.map_or(false, |m| m.is_dir());
    let local_is_empty = !local_exists || !local_is_dir || fsutil::dir_is_empty(local_path);

    let (remote_exists, remote_is_dir) =
        rclone::path_exists(rclone_config, remote, remote_path).await?;

    let local_record = SyncRecord::read_local(local_record_path)?;
    let remote_record =
        SyncRecord::read_remote(rclone_config, remote, remote_record_path).await?;

    evaluate(Observation {
        local_exists,
        local_is_dir,
        local_is_empty,
        remote_exists,
        remote_is_dir,
        local_mtime: fsutil::last_modified(local_path),
        local_record,
        remote_record,
    })
}
