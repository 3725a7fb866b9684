//! Read-only status: evaluate the sync condition of one repo's parts, or of
//! every repo across selected storage locations.

use std::collections::BTreeMap;

use crate::config::{Config, StorageType};
use crate::error::{Error, Result};
use crate::meta::{self, RepoPart, YardMeta};
use crate::remote_index;
use crate::status::{get_sync_status, SyncCondition, SyncStatus};
use crate::throttle;
use crate::tombstone;

/// Evaluate every part of one repo without taking locks or mutating
/// anything. Evaluator-level inconsistencies come back as ERROR statuses
/// rather than failures, so status output stays best-effort.
pub async fn repo_status(
    config: &Config,
    index_name: &str,
) -> Result<BTreeMap<RepoPart, SyncStatus>> {
    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;

    if repo.storage_config(config)?.storage_type == StorageType::Local {
        return Ok(RepoPart::ORDERED
            .into_iter()
            .map(|part| (part, SyncStatus::bare(SyncCondition::Synced)))
            .collect());
    }

    let repo_id = repo.repo_id();
    let storage_location = repo.storage_location.clone();

    if tombstone::is_tombstoned(config, &storage_location, &repo_id).await? {
        return Ok(RepoPart::ORDERED
            .into_iter()
            .map(|part| (part, SyncStatus::bare(SyncCondition::Tombstoned)))
            .collect());
    }

    let remote_index_name =
        remote_index::find_remote_repo_by_id(config, &storage_location, &repo_id)
            .await?
            .unwrap_or_else(|| index_name.to_string());

    let sl = repo.storage_config(config)?;
    let rclone_config = config.rclone_config_path();
    let mut statuses = BTreeMap::new();
    for part in RepoPart::ORDERED {
        let status = get_sync_status(
            &rclone_config,
            &repo.local_part_path(config, part),
            &repo.local_record_path(config, part),
            &storage_location,
            &meta::remote_part_path(sl, &remote_index_name, part),
            &meta::remote_record_path(sl, &remote_index_name, part),
        )
        .await;
        let status = match status {
            Ok(status) => status,
            Err(Error::SyncState(message)) => {
                let mut status = SyncStatus::bare(SyncCondition::Error);
                status.error_message = Some(message);
                status
            }
            Err(e) => return Err(e),
        };
        statuses.insert(part, status);
    }
    Ok(statuses)
}

/// Evaluate every repo of the selected storage locations, bounded by the
/// rclone-op semaphore. Returns rows of (index name, per-part status).
pub async fn yard_status(
    config: &Config,
    storage_locations: Option<Vec<String>>,
    max_concurrent: Option<usize>,
) -> Result<Vec<(String, BTreeMap<RepoPart, SyncStatus>)>> {
    if let Some(locations) = &storage_locations {
        for location in locations {
            config.storage_location(location)?;
        }
    }

    let yard = YardMeta::load(config)?;
    let selected: Vec<String> = yard
        .repos
        .iter()
        .filter(|m| {
            storage_locations
                .as_ref()
                .map_or(true, |locations| locations.contains(&m.storage_location))
        })
        .map(|m| m.index_name())
        .collect();

    let tasks: Vec<_> = selected
        .into_iter()
        .map(|index_name| {
            let config = config.clone();
            async move {
                let statuses = repo_status(&config, &index_name).await?;
                Ok((index_name, statuses))
            }
        })
        .collect();

    throttle::run_throttled_all_ok(
        tasks,
        max_concurrent.unwrap_or(config.max_concurrent_rclone_ops),
    )
    .await
}
