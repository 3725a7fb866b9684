//! The per-part sync executor: evaluates the sync state, decides PUSH or
//! PULL, stamps incomplete records, drives the transfer with a backup
//! directory, and finalises complete records.
//!
//! Session shape for a PUSH: incomplete record on the remote, transfer with
//! the remote backup dir, then a fresh complete record on both sides and the
//! backup purged. A PULL is symmetric with the incomplete record and backup
//! on the local side, except that on success the remote record is copied
//! down verbatim so the ULIDs match.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::interrupt;
use crate::rclone::{self, TransferOpts};
use crate::record::SyncRecord;
use crate::status::{get_sync_status, SyncCondition, SyncStatus};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SyncSetting {
    /// Refuse any condition that is not explicitly safe.
    #[default]
    Careful,
    /// Bypass the safety checks but still maintain sync records.
    Replace,
    /// Additionally ignore an ERROR condition from the evaluator.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// local -> remote
    Push,
    /// remote -> local
    Pull,
}

/// Everything the executor needs to sync one repo part.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub direction: Option<SyncDirection>,
    pub setting: SyncSetting,
    pub local_path: PathBuf,
    pub local_record_path: PathBuf,
    pub remote: String,
    pub remote_path: PathBuf,
    pub remote_record_path: PathBuf,
    pub local_backups_path: PathBuf,
    pub remote_backups_path: PathBuf,
    pub include_file: Option<PathBuf>,
    pub exclude_file: Option<PathBuf>,
    pub filters_file: Option<PathBuf>,
    pub delete_backup: bool,
}

impl SyncRequest {
    pub fn new(
        direction: Option<SyncDirection>,
        setting: SyncSetting,
        local_path: PathBuf,
        local_record_path: PathBuf,
        remote: String,
        remote_path: PathBuf,
        remote_record_path: PathBuf,
        local_backups_path: PathBuf,
        remote_backups_path: PathBuf,
    ) -> SyncRequest {
        SyncRequest {
            direction,
            setting,
            local_path,
            local_record_path,
            remote,
            remote_path,
            remote_record_path,
            local_backups_path,
            remote_backups_path,
            include_file: None,
            exclude_file: None,
            filters_file: None,
            delete_backup: true,
        }
    }
}

fn unsafe_err(status: SyncStatus) -> Error {
    Error::SyncUnsafe(Box::new(status))
}

/// Decide the effective direction for the observed condition, or fail.
/// Pure; unit-tested against the decision table.
fn resolve_direction(
    requested: Option<SyncDirection>,
    setting: SyncSetting,
    status: &SyncStatus,
) -> Result<Option<SyncDirection>> {
    let direction = match requested {
        None => match status.condition {
            SyncCondition::NeedsPush => SyncDirection::Push,
            SyncCondition::NeedsPull => SyncDirection::Pull,
            SyncCondition::Excluded => return Ok(None),
            _ => return Err(unsafe_err(status.clone())),
        },
        Some(direction) => direction,
    };

    if setting == SyncSetting::Careful {
        let allowed = match direction {
            SyncDirection::Push => matches!(
                status.condition,
                SyncCondition::NeedsPush | SyncCondition::Synced
            ),
            SyncDirection::Pull => matches!(
                status.condition,
                SyncCondition::NeedsPull | SyncCondition::Synced
            ),
        };
        if !allowed {
            return Err(unsafe_err(status.clone()));
        }
    }
    Ok(Some(direction))
}

/// Sync one repo part. Returns the pre-sync status and whether a transfer
/// actually took place.
pub async fn sync_part(
    rclone_config: &Path,
    req: &SyncRequest,
) -> Result<(SyncStatus, bool)> {
    if req.remote_path.as_os_str().is_empty() {
        return Err(Error::InvalidRemotePath);
    }
    if req.direction.is_none() && req.setting != SyncSetting::Careful {
        return Err(Error::Usage(
            "auto sync direction can only be used with the careful sync setting".into(),
        ));
    }

    let status = get_sync_status(
        rclone_config,
        &req.local_path,
        &req.local_record_path,
        &req.remote,
        &req.remote_path,
        &req.remote_record_path,
    )
    .await?;

    if status.condition == SyncCondition::Error && req.setting != SyncSetting::Force {
        return Err(Error::SyncState(
            status
                .error_message
                .clone()
                .unwrap_or_else(|| "inconsistent sync state".into()),
        ));
    }

    if req.setting != SyncSetting::Force && status.condition == SyncCondition::Synced {
        log::debug!("sync not needed for {}", req.local_path.display());
        return Ok((status, false));
    }

    let Some(direction) = resolve_direction(req.direction, req.setting, &status)? else {
        log::debug!("sync not needed; repo part is excluded here");
        return Ok((status, false));
    };

    if interrupt::check_interrupted() {
        return Err(Error::Interrupted);
    }

    let incomplete = SyncRecord::new(false, None);
    let backup_name = incomplete.ulid.to_string();

    match direction {
        SyncDirection::Pull => {
            // Mark the ongoing pull on the local side only.
            incomplete.save_local(&req.local_record_path)?;

            let backup_path = req.local_backups_path.join(&backup_name);
            std::fs::create_dir_all(&backup_path)?;
            run_transfer(
                rclone_config,
                &status,
                &req.remote,
                &req.remote_path,
                "",
                &req.local_path,
                backup_path.display().to_string(),
                req,
            )
            .await?;

            // Adopt the remote record so both sides share the session ULID.
            let remote_record =
                SyncRecord::read_remote(rclone_config, &req.remote, &req.remote_record_path)
                    .await?
                    .ok_or_else(|| {
                        Error::SyncState(
                            "remote sync record disappeared during the pull".into(),
                        )
                    })?;
            remote_record.save_local(&req.local_record_path)?;

            if req.delete_backup {
                std::fs::remove_dir_all(&backup_path).ok();
            }
        }
        SyncDirection::Push => {
            // Mark the ongoing push on the remote side only.
            incomplete
                .save_remote(rclone_config, &req.remote, &req.remote_record_path)
                .await?;

            let backup_path = req.remote_backups_path.join(&backup_name);
            rclone::mkdir(rclone_config, &req.remote, &backup_path).await?;
            run_transfer(
                rclone_config,
                &status,
                "",
                &req.local_path,
                &req.remote,
                &req.remote_path,
                rclone::spec(&req.remote, &backup_path),
                req,
            )
            .await?;

            // Fresh complete record, shared by both sides.
            let complete = SyncRecord::new(true, None);
            complete.save_local(&req.local_record_path)?;
            complete
                .save_remote(rclone_config, &req.remote, &req.remote_record_path)
                .await?;

            if req.delete_backup {
                rclone::purge(rclone_config, &req.remote, &backup_path).await?;
            }
        }
    }

    Ok((status, true))
}

#[allow(clippy::too_many_arguments)]
async fn run_transfer(
    rclone_config: &Path,
    status: &SyncStatus,
    source: &str,
    source_path: &Path,
    dest: &str,
    dest_path: &Path,
    backup_dir: String,
    req: &SyncRequest,
) -> Result<()> {
    // rclone sync delivers file sources into a directory, so a single-file
    // part (META) targets its parent.
    let dest_path = if status.is_dir {
        dest_path.to_path_buf()
    } else {
        dest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    };

    log::info!(
        "syncing {} to {} (backup: {})",
        rclone::spec(source, source_path),
        rclone::spec(dest, &dest_path),
        backup_dir,
    );

    let opts = TransferOpts {
        include_file: req.include_file.clone(),
        exclude_file: req.exclude_file.clone(),
        filters_file: req.filters_file.clone(),
        backup_dir: Some(backup_dir),
        ..Default::default()
    };
    rclone::sync(rclone_config, source, source_path, dest, &dest_path, &opts).await
}
