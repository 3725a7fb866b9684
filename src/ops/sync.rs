//! The per-repo sync orchestrator: resolves the remote name by id, checks
//! the tombstone, takes the per-repo lock, and drives the executor for
//! META, CONF, and DATA in that order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{Config, StorageType};
use crate::consts;
use crate::error::Result;
use crate::executor::{sync_part, SyncDirection, SyncRequest, SyncSetting};
use crate::interrupt;
use crate::lock::LockManager;
use crate::meta::{self, RepoPart, YardMeta};
use crate::remote_index;
use crate::status::{SyncCondition, SyncStatus};
use crate::tombstone;

/// What happened to one part during a repo sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartOutcome {
    pub status: SyncStatus,
    /// Whether a transfer actually took place (as opposed to a no-op).
    pub synced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub direction: Option<SyncDirection>,
    pub setting: SyncSetting,
    /// Parts to sync; all three when `None`.
    pub parts: Option<Vec<RepoPart>>,
    /// Skip the per-repo lock; for callers that already hold it.
    pub skip_lock: bool,
}

/// Sync one repo with its remote. Returns per-part outcomes; empty for
/// repos on local-alias storage, where no sync is needed.
pub async fn sync_repo(
    config: &Config,
    index_name: &str,
    opts: &SyncOptions,
) -> Result<BTreeMap<RepoPart, PartOutcome>> {
    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;

    if repo.storage_config(config)?.storage_type == StorageType::Local {
        return Ok(BTreeMap::new());
    }

    let parts: Vec<RepoPart> = match &opts.parts {
        Some(parts) => RepoPart::ORDERED
            .into_iter()
            .filter(|p| parts.contains(p))
            .collect(),
        None => RepoPart::ORDERED.to_vec(),
    };

    let repo_id = repo.repo_id();
    let storage_location = repo.storage_location.clone();

    // A tombstone on the remote means the repo was deleted elsewhere; no
    // part gets near the transfer tool.
    if tombstone::is_tombstoned(config, &storage_location, &repo_id).await? {
        let mut message = format!("repo '{index_name}' was deleted");
        if let Some(ts) = tombstone::get_tombstone(config, &storage_location, &repo_id).await? {
            message = format!(
                "{message} by {} at {}",
                ts.deleted_by_hostname, ts.deleted_at_utc
            );
        }
        log::warn!("{message}; skipping sync");
        return Ok(parts
            .into_iter()
            .map(|part| {
                (
                    part,
                    PartOutcome {
                        status: SyncStatus::bare(SyncCondition::Tombstoned),
                        synced: false,
                    },
                )
            })
            .collect());
    }

    // Local and remote index names may diverge after a one-sided rename;
    // the repo id is the join key. An unresolved id is the new-repo case.
    let remote_index_name =
        remote_index::find_remote_repo_by_id(config, &storage_location, &repo_id)
            .await?
            .unwrap_or_else(|| index_name.to_string());

    let lock_manager = LockManager::new(&config.repoyard_data_path);
    let _guard = if opts.skip_lock {
        None
    } else {
        Some(lock_manager.repo_sync_lock_async(index_name).await?)
    };

    log::info!("syncing repo {index_name} at {storage_location}");

    let sl = repo.storage_config(config)?.clone();
    let rclone_config = config.rclone_config_path();
    let mut outcomes = BTreeMap::new();

    for part in parts.iter().copied() {
        interrupt::bail_if_interrupted()?;
        log::info!("syncing {part}");

        let mut request = SyncRequest::new(
            opts.direction,
            opts.setting,
            repo.local_part_path(config, part),
            repo.local_record_path(config, part),
            storage_location.clone(),
            meta::remote_part_path(&sl, &remote_index_name, part),
            meta::remote_record_path(&sl, &remote_index_name, part),
            config
                .local_sync_backups_path()
                .join(index_name)
                .join(part.as_str()),
            sl.store_path
                .join(consts::SYNC_BACKUPS_DIR)
                .join(&remote_index_name)
                .join(part.as_str()),
        );

        if part == RepoPart::Data {
            // CONF is synced by now; its filter files steer the DATA
            // transfer. The config-level default exclude fills in when the
            // repo carries none of its own.
            let conf = repo.local_part_path(config, RepoPart::Conf);
            request.include_file = existing(conf.join(consts::RCLONE_INCLUDE_FILE));
            request.exclude_file = existing(conf.join(consts::RCLONE_EXCLUDE_FILE))
                .or_else(|| existing(config.default_rclone_exclude_path()));
            request.filters_file = existing(conf.join(consts::RCLONE_FILTERS_FILE));
        }

        let (status, synced) = sync_part(&rclone_config, &request).await?;
        outcomes.insert(part, PartOutcome { status, synced });
    }

    remote_index::update_cache_entry(config, &storage_location, &repo_id, &remote_index_name)?;

    if parts.contains(&RepoPart::Meta) {
        let _global = lock_manager.global_lock_async().await?;
        YardMeta::refresh_unlocked(config)?;
    }

    Ok(outcomes)
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}
