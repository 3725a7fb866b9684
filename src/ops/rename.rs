//! Renames. The repo id never changes; only the `<name>` half of the index
//! name does, on one side or both. Sync records and backups are keyed by
//! index name and move alongside, so no session state is invalidated.

use std::fs;

use crate::config::{Config, StorageType};
use crate::consts;
use crate::error::{Error, Result};
use crate::lock::LockManager;
use crate::meta::{self, YardMeta};
use crate::rclone;
use crate::remote_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RenameScope {
    Local,
    Remote,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncNameDirection {
    /// Rename the local side to match the remote's name.
    ToLocal,
    /// Rename the remote side to match the local's name.
    ToRemote,
}

/// Rename a repo. Returns the resulting local index name (unchanged for a
/// REMOTE-only rename).
pub async fn rename_repo(
    config: &Config,
    index_name: &str,
    new_name: &str,
    scope: RenameScope,
) -> Result<String> {
    if new_name.is_empty() || new_name.contains("__") || new_name.contains('/') {
        return Err(Error::Usage(format!(
            "invalid repo name '{new_name}'; names must be non-empty and \
             contain neither '__' nor '/'"
        )));
    }

    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;
    let repo_id = repo.repo_id();
    let storage_location = repo.storage_location.clone();
    let new_index_name = format!("{repo_id}__{new_name}");

    let lock_manager = LockManager::new(&config.repoyard_data_path);
    let _guard = lock_manager.repo_sync_lock_async(index_name).await?;

    let is_remote_storage = repo.storage_config(config)?.storage_type != StorageType::Local;

    let mut result_index = index_name.to_string();

    if matches!(scope, RenameScope::Local | RenameScope::Both) {
        log::info!("renaming local '{index_name}' to '{new_index_name}'");
        rename_dir_if_exists(
            &config.local_store_path().join(&storage_location).join(index_name),
            &config
                .local_store_path()
                .join(&storage_location)
                .join(&new_index_name),
        )?;
        rename_dir_if_exists(
            &config.user_repos_path.join(index_name),
            &config.user_repos_path.join(&new_index_name),
        )?;
        rename_dir_if_exists(
            &config.local_sync_records_path().join(index_name),
            &config.local_sync_records_path().join(&new_index_name),
        )?;
        rename_dir_if_exists(
            &config.local_sync_backups_path().join(index_name),
            &config.local_sync_backups_path().join(&new_index_name),
        )?;
        result_index = new_index_name.clone();
        meta::refresh_yard_meta_async(config).await?;
    }

    if matches!(scope, RenameScope::Remote | RenameScope::Both) {
        if !is_remote_storage {
            return Err(Error::Lifecycle(
                "cannot rename the remote side of a local storage location".into(),
            ));
        }
        let remote_index_name =
            remote_index::find_remote_repo_by_id(config, &storage_location, &repo_id)
                .await?
                .ok_or_else(|| {
                    Error::Lifecycle(format!(
                        "remote repo not found for id '{repo_id}'; cannot rename remote"
                    ))
                })?;
        if remote_index_name != new_index_name {
            log::info!("renaming remote '{remote_index_name}' to '{new_index_name}'");
            let sl = repo.storage_config(config)?;
            let rclone_config = config.rclone_config_path();
            let pairs = [
                (
                    sl.store_path.join(consts::REMOTE_REPOS_DIR).join(&remote_index_name),
                    sl.store_path.join(consts::REMOTE_REPOS_DIR).join(&new_index_name),
                ),
                (
                    sl.store_path.join(consts::SYNC_RECORDS_DIR).join(&remote_index_name),
                    sl.store_path.join(consts::SYNC_RECORDS_DIR).join(&new_index_name),
                ),
                (
                    sl.store_path.join(consts::SYNC_BACKUPS_DIR).join(&remote_index_name),
                    sl.store_path.join(consts::SYNC_BACKUPS_DIR).join(&new_index_name),
                ),
            ];
            for (old, new) in pairs {
                let (exists, _) =
                    rclone::path_exists(&rclone_config, &storage_location, &old).await?;
                if exists {
                    rclone::moveto(&rclone_config, &storage_location, &old, &storage_location, &new)
                        .await?;
                }
            }
        }
        remote_index::update_cache_entry(config, &storage_location, &repo_id, &new_index_name)?;
    }

    Ok(result_index)
}

/// Make one side's name match the other's. Returns the resulting local
/// index name.
pub async fn sync_name(
    config: &Config,
    index_name: &str,
    direction: SyncNameDirection,
) -> Result<String> {
    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;

    if repo.storage_config(config)?.storage_type == StorageType::Local {
        return Err(Error::Lifecycle(
            "cannot sync names for local storage locations".into(),
        ));
    }

    let repo_id = repo.repo_id();
    let remote_index_name =
        remote_index::find_remote_repo_by_id(config, &repo.storage_location, &repo_id)
            .await?
            .ok_or_else(|| {
                Error::Lifecycle(format!(
                    "remote repo not found for id '{repo_id}'; cannot sync name"
                ))
            })?;
    let (_, remote_name) = meta::parse_index_name(&remote_index_name)?;

    match direction {
        SyncNameDirection::ToLocal => {
            if remote_name == repo.name {
                log::info!("names already match: '{remote_name}'");
                return Ok(index_name.to_string());
            }
            rename_repo(config, index_name, &remote_name, RenameScope::Local).await
        }
        SyncNameDirection::ToRemote => {
            if remote_name == repo.name {
                log::info!("names already match: '{}'", repo.name);
                return Ok(index_name.to_string());
            }
            rename_repo(config, index_name, &repo.name.clone(), RenameScope::Remote).await
        }
    }
}

fn rename_dir_if_exists(old: &std::path::Path, new: &std::path::Path) -> Result<()> {
    if old.exists() {
        if let Some(parent) = new.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(old, new)?;
    }
    Ok(())
}
