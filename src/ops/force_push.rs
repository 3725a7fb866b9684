//! Force-push: overwrite a repo's remote DATA with an arbitrary local
//! source directory, bypassing the normal executor but not its record
//! discipline.

use std::path::Path;

use crate::config::Config;
use crate::consts;
use crate::error::{Error, Result};
use crate::interrupt;
use crate::lock::LockManager;
use crate::meta::{self, RepoPart, YardMeta};
use crate::rclone::{self, TransferOpts};
use crate::record::SyncRecord;
use crate::remote_index;

/// Push `source_path` over the repo's remote DATA. Destructive; refuses
/// without `force`.
///
/// The incomplete record is written to *both* sides before the transfer:
/// the shared ULID establishes a session this machine owns, so an
/// interrupted run is diagnosed as SYNC_TO_REMOTE_INCOMPLETE rather than an
/// inconsistency.
pub async fn force_push_to_remote(
    config: &Config,
    index_name: &str,
    source_path: &Path,
    force: bool,
) -> Result<()> {
    if !force {
        return Err(Error::Lifecycle(
            "this is a destructive operation that will overwrite the remote \
             DATA; pass --force to confirm"
                .into(),
        ));
    }

    let source_path = source_path
        .canonicalize()
        .map_err(|e| Error::Usage(format!("source path is not usable: {e}")))?;
    if !source_path.is_dir() {
        return Err(Error::Usage(format!(
            "source path '{}' is not a directory",
            source_path.display()
        )));
    }

    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;
    let repo_id = repo.repo_id();
    let storage_location = repo.storage_location.clone();

    let remote_index_name =
        remote_index::find_remote_repo_by_id(config, &storage_location, &repo_id)
            .await?
            .ok_or_else(|| {
                Error::Lifecycle(format!(
                    "repo '{index_name}' not found on remote storage '{storage_location}'; \
                     it may have been deleted or the remote is not accessible"
                ))
            })?;

    let sl = repo.storage_config(config)?.clone();
    let rclone_config = config.rclone_config_path();
    let remote_data_path = meta::remote_part_path(&sl, &remote_index_name, RepoPart::Data);
    let local_record_path = repo.local_record_path(config, RepoPart::Data);
    let remote_record_path = meta::remote_record_path(&sl, &remote_index_name, RepoPart::Data);

    let lock_manager = LockManager::new(&config.repoyard_data_path);
    let _guard = lock_manager.repo_sync_lock_async(index_name).await?;

    interrupt::bail_if_interrupted()?;

    log::info!(
        "force pushing {} to {}",
        source_path.display(),
        rclone::spec(&storage_location, &remote_data_path)
    );

    let incomplete = SyncRecord::new(false, None);
    log::debug!("opening force-push session {}", incomplete.ulid);
    incomplete
        .save_remote(&rclone_config, &storage_location, &remote_record_path)
        .await?;
    incomplete.save_local(&local_record_path)?;

    let backup_path = sl
        .store_path
        .join(consts::SYNC_BACKUPS_DIR)
        .join(&remote_index_name)
        .join(RepoPart::Data.as_str())
        .join(incomplete.ulid.to_string());
    rclone::mkdir(&rclone_config, &storage_location, &backup_path).await?;

    let opts = TransferOpts {
        backup_dir: Some(rclone::spec(&storage_location, &backup_path)),
        ..Default::default()
    };
    rclone::sync(
        &rclone_config,
        "",
        &source_path,
        &storage_location,
        &remote_data_path,
        &opts,
    )
    .await?;

    let complete = SyncRecord::new(true, None);
    complete.save_local(&local_record_path)?;
    complete
        .save_remote(&rclone_config, &storage_location, &remote_record_path)
        .await?;

    rclone::purge(&rclone_config, &storage_location, &backup_path).await?;
    log::info!("force push complete");
    Ok(())
}
