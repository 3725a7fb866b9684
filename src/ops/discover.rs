//! Discovery of repos created on other machines: fetch remote METAs that
//! have no local counterpart, so `include` can pull them later.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::config::{Config, StorageType};
use crate::consts;
use crate::error::Result;
use crate::interrupt;
use crate::meta::{self, RepoMeta, RepoPart};
use crate::rclone::{self, LsOpts, TransferOpts};
use crate::record::SyncRecord;
use crate::remote_index;
use crate::throttle;

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Restrict to these repos (index names). Mutually exclusive with
    /// `storage_locations` at the CLI layer.
    pub repo_index_names: Option<Vec<String>>,
    /// Restrict to these storage locations.
    pub storage_locations: Option<Vec<String>>,
    pub max_concurrent_rclone_ops: Option<usize>,
}

/// Fetch METAs present on a remote but missing locally. Returns the index
/// names that were discovered. The repos end up known but not included.
pub async fn sync_missing_metas(
    config: &Config,
    opts: &DiscoverOptions,
) -> Result<Vec<String>> {
    let max_concurrency = opts
        .max_concurrent_rclone_ops
        .unwrap_or(config.max_concurrent_rclone_ops);
    let rclone_config = config.rclone_config_path();
    let mut discovered = Vec::new();

    for (sl_name, sl) in &config.storage_locations {
        if sl.storage_type == StorageType::Local {
            continue;
        }
        if let Some(filter) = &opts.storage_locations {
            if !filter.contains(sl_name) {
                continue;
            }
        }
        interrupt::bail_if_interrupted()?;

        let repos_path = sl.store_path.join(consts::REMOTE_REPOS_DIR);
        let remote_metas = rclone::lsjson(
            &rclone_config,
            sl_name,
            &repos_path,
            &LsOpts {
                files_only: true,
                recursive: true,
                max_depth: Some(2),
                filter: vec![
                    format!("+ /*/{}", consts::REPO_META_FILE),
                    "- **".to_string(),
                ],
                ..Default::default()
            },
        )
        .await?;
        let remote_metas: HashSet<String> = remote_metas
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.path)
            .collect();

        let local_metas = local_meta_paths(config, sl_name)?;
        let mut missing: Vec<String> = remote_metas
            .difference(&local_metas)
            .cloned()
            .collect();
        missing.sort();

        if let Some(wanted) = &opts.repo_index_names {
            missing.retain(|p| index_name_of(p).map_or(false, |idx| wanted.contains(&idx)));
        }
        if missing.is_empty() {
            log::info!("no missing repo metas in '{sl_name}'");
            continue;
        }

        log::info!("syncing {} missing repo metas from '{sl_name}'", missing.len());
        for path in &missing {
            log::info!("  - {path}");
        }

        interrupt::bail_if_interrupted()?;

        // One filtered transfer for all the missing META files.
        let mut filter: Vec<String> = missing.iter().map(|p| format!("+ /{p}")).collect();
        filter.push("- **".to_string());
        rclone::sync(
            &rclone_config,
            sl_name,
            &repos_path,
            "",
            &config.local_store_path().join(sl_name),
            &TransferOpts {
                filter,
                ..Default::default()
            },
        )
        .await?;

        // Mirror each repo's remote META record down so the next sync sees
        // a matched session instead of a fresh divergence.
        let missing_index_names: Vec<String> =
            missing.iter().filter_map(|p| index_name_of(p)).collect();
        let tasks: Vec<_> = missing_index_names
            .iter()
            .map(|index_name| {
                let config = config.clone();
                let sl_name = sl_name.clone();
                let index_name = index_name.clone();
                async move {
                    let repo = RepoMeta::load(&config, &sl_name, &index_name)?;
                    let record = SyncRecord::read_remote(
                        &config.rclone_config_path(),
                        &sl_name,
                        &repo.remote_record_path(&config, RepoPart::Meta)?,
                    )
                    .await?;
                    if let Some(record) = record {
                        record.save_local(&repo.local_record_path(&config, RepoPart::Meta))?;
                    }
                    Ok(())
                }
            })
            .collect();
        throttle::run_throttled_all_ok(tasks, max_concurrency).await?;

        // The listing just proved what the remote holds; refresh the whole
        // id-to-name cache for this location while it is cheap.
        remote_index::rebuild_cache(config, sl_name).await?;

        discovered.extend(missing_index_names);
    }

    meta::refresh_yard_meta_async(config).await?;
    Ok(discovered)
}

/// Paths of `*/repometa.toml` under the local store for one storage
/// location, relative to the store root — matching the remote listing.
fn local_meta_paths(config: &Config, sl_name: &str) -> Result<HashSet<String>> {
    let root = config.local_store_path().join(sl_name);
    let mut paths = HashSet::new();
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if entry.path().join(consts::REPO_META_FILE).exists() {
            paths.insert(format!(
                "{}/{}",
                entry.file_name().to_string_lossy(),
                consts::REPO_META_FILE
            ));
        }
    }
    Ok(paths)
}

fn index_name_of(meta_rel_path: &str) -> Option<String> {
    PathBuf::from(meta_rel_path)
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_name_extraction() {
        assert_eq!(
            index_name_of("20240101_abcde__alpha/repometa.toml").as_deref(),
            Some("20240101_abcde__alpha")
        );
        assert_eq!(index_name_of(""), None);
    }
}
