//! Bulk sync: one task per repo, bounded by the rclone-op semaphore.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::interrupt;
use crate::meta::{RepoPart, YardMeta};
use crate::ops::sync::{sync_repo, PartOutcome, SyncOptions};
use crate::throttle;

/// Result row for one repo of a multi-sync.
#[derive(Debug)]
pub enum RepoResult {
    Synced(BTreeMap<RepoPart, PartOutcome>),
    Interrupted,
    Failed(Error),
}

/// Sync many repos concurrently. Repos may be selected by index name or by
/// storage location; with neither, everything is synced. Per-repo failures
/// are collected and the first is re-raised after all tasks settle.
pub async fn multi_sync(
    config: &Config,
    repo_index_names: Option<Vec<String>>,
    storage_locations: Option<Vec<String>>,
    sync_opts: &SyncOptions,
    max_concurrent: Option<usize>,
    task_timeout: Option<std::time::Duration>,
) -> Result<Vec<(String, RepoResult)>> {
    if repo_index_names.is_some() && storage_locations.is_some() {
        return Err(Error::Usage(
            "repos and storage locations cannot both be given".into(),
        ));
    }

    let yard = YardMeta::load(config)?;
    let selected: Vec<String> = match (&repo_index_names, &storage_locations) {
        (Some(names), _) => {
            let known = yard.by_index_name();
            for name in names {
                if !known.contains_key(name) {
                    return Err(Error::Lifecycle(format!("repo '{name}' not found")));
                }
            }
            names.clone()
        }
        (None, Some(locations)) => {
            for location in locations {
                config.storage_location(location)?;
            }
            yard.repos
                .iter()
                .filter(|m| locations.contains(&m.storage_location))
                .map(|m| m.index_name())
                .collect()
        }
        (None, None) => yard.repos.iter().map(|m| m.index_name()).collect(),
    };

    let max_concurrency = max_concurrent.unwrap_or(config.max_concurrent_rclone_ops);
    let total = selected.len();

    let tasks: Vec<_> = selected
        .iter()
        .cloned()
        .map(|index_name| {
            let config = config.clone();
            let opts = sync_opts.clone();
            async move {
                let result = match sync_repo(&config, &index_name, &opts).await {
                    Ok(outcomes) => RepoResult::Synced(outcomes),
                    Err(Error::Interrupted) => RepoResult::Interrupted,
                    Err(e) => RepoResult::Failed(e),
                };
                Ok::<_, Error>((index_name, result))
            }
        })
        .collect();

    let settled = throttle::run_throttled(tasks, max_concurrency, task_timeout).await;

    let mut rows = Vec::with_capacity(total);
    let mut first_error = None;
    for result in settled {
        match result {
            Ok((index_name, RepoResult::Failed(e))) => {
                log::warn!("({}/{total}) {index_name}: {e}", rows.len() + 1);
                if first_error.is_none() {
                    first_error = Some(Error::Lifecycle(format!("sync of '{index_name}' failed: {e}")));
                }
                rows.push((index_name, RepoResult::Failed(e)));
            }
            Ok((index_name, result)) => {
                match &result {
                    RepoResult::Synced(outcomes) => {
                        let summary: Vec<String> = outcomes
                            .iter()
                            .map(|(part, outcome)| {
                                format!(
                                    "{part}: {}",
                                    if outcome.synced { "synced" } else { "skipped" }
                                )
                            })
                            .collect();
                        log::info!(
                            "({}/{total}) {index_name}: {}",
                            rows.len() + 1,
                            if summary.is_empty() {
                                "local, nothing to do".to_string()
                            } else {
                                summary.join(", ")
                            }
                        );
                    }
                    RepoResult::Interrupted => {
                        log::warn!("({}/{total}) {index_name}: interrupted", rows.len() + 1)
                    }
                    RepoResult::Failed(_) => unreachable!(),
                }
                rows.push((index_name, result));
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    interrupt::bail_if_interrupted()?;
    match first_error {
        Some(e) => Err(e),
        None => Ok(rows),
    }
}
