//! Delete a repo everywhere, leaving a tombstone so other machines refuse
//! to resurrect it.

use std::fs;

use crate::config::{Config, StorageType};
use crate::error::Result;
use crate::lock::LockManager;
use crate::meta::{self, RepoPart, YardMeta};
use crate::rclone;
use crate::remote_index;
use crate::tombstone;

/// Delete a repo. For non-local storage the tombstone is written *before*
/// any purge: a partially failed delete still blocks further syncs, which
/// is the safe half to be left with.
pub async fn delete_repo(config: &Config, index_name: &str) -> Result<()> {
    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;

    let lock_manager = LockManager::new(&config.repoyard_data_path);
    let _guard = lock_manager.repo_sync_lock_async(index_name).await?;

    let repo_id = repo.repo_id();
    let storage_location = repo.storage_location.clone();
    let is_remote = repo.storage_config(config)?.storage_type != StorageType::Local;

    if is_remote {
        tombstone::create_tombstone(config, &storage_location, &repo_id, &repo.name).await?;
    }

    // Local DATA lives outside the local store; remove both trees.
    let data_path = repo.local_part_path(config, RepoPart::Data);
    if data_path.exists() {
        fs::remove_dir_all(&data_path)?;
    }
    let local_path = repo.local_path(config);
    if local_path.exists() {
        fs::remove_dir_all(&local_path)?;
    }
    let records_path = config.local_sync_records_path().join(index_name);
    if records_path.exists() {
        fs::remove_dir_all(&records_path)?;
    }

    if is_remote {
        let rclone_config = config.rclone_config_path();
        let remote_index_name =
            remote_index::find_remote_repo_by_id(config, &storage_location, &repo_id)
                .await?
                .unwrap_or_else(|| index_name.to_string());
        let sl = repo.storage_config(config)?;
        if !rclone::purge(
            &rclone_config,
            &storage_location,
            &meta::remote_repo_path(sl, &remote_index_name),
        )
        .await?
        {
            // The tombstone is authoritative; a failed purge only leaves
            // unreachable bytes behind.
            log::warn!("failed to purge remote repo directory for '{index_name}'");
        }
        let remote_records = sl
            .store_path
            .join(crate::consts::SYNC_RECORDS_DIR)
            .join(&remote_index_name);
        rclone::purge(&rclone_config, &storage_location, &remote_records).await?;
    }

    remote_index::remove_cache_entry(config, &storage_location, &repo_id)?;
    meta::refresh_yard_meta_async(config).await?;
    Ok(())
}
