//! Exclude a repo from this machine: drop local DATA, keep everything else.

use std::fs;

use crate::config::{Config, StorageType};
use crate::error::{Error, Result};
use crate::executor::SyncSetting;
use crate::lock::LockManager;
use crate::meta::{RepoPart, YardMeta};
use crate::ops::sync::{sync_repo, SyncOptions};

/// Exclude a repo: careful-sync every part so local edits survive, then
/// delete the local DATA tree and its sync record. META, CONF, and the
/// remote stay untouched.
pub async fn exclude_repo(config: &Config, index_name: &str, skip_sync: bool) -> Result<()> {
    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;

    if !repo.check_included(config) {
        return Err(Error::Lifecycle(format!(
            "repo '{index_name}' is already excluded"
        )));
    }
    if repo.storage_config(config)?.storage_type == StorageType::Local {
        return Err(Error::Lifecycle(format!(
            "repo '{index_name}' in local storage location '{}' cannot be excluded",
            repo.storage_location
        )));
    }

    let lock_manager = LockManager::new(&config.repoyard_data_path);
    let _guard = lock_manager.repo_sync_lock_async(index_name).await?;

    if !skip_sync {
        sync_repo(
            config,
            index_name,
            &SyncOptions {
                setting: SyncSetting::Careful,
                skip_lock: true,
                ..Default::default()
            },
        )
        .await?;
    }

    fs::remove_dir_all(repo.local_part_path(config, RepoPart::Data))?;
    let record_path = repo.local_record_path(config, RepoPart::Data);
    if record_path.exists() {
        fs::remove_file(record_path)?;
    }
    Ok(())
}
