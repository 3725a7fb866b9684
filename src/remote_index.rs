//! The remote-index cache: a per-storage-location map from repo id to the
//! repo's current remote index name.
//!
//! The cache is advisory. A hit is verified with one remote stat and a
//! stale entry is evicted; a miss falls back to scanning the remote repos
//! directory. Correctness never depends on the cache being right.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::config::Config;
use crate::consts;
use crate::error::Result;
use crate::fsutil;
use crate::meta;
use crate::rclone::{self, LsOpts};

pub type RemoteIndexCache = BTreeMap<String, String>;

pub fn cache_path(config: &Config, storage_location: &str) -> PathBuf {
    config
        .remote_indexes_path()
        .join(format!("{storage_location}.json"))
}

/// Load the cache; unreadable or unparsable files count as empty.
pub fn load_cache(config: &Config, storage_location: &str) -> RemoteIndexCache {
    let path = cache_path(config, storage_location);
    fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

/// Replace the cache file wholesale. Races between writers resolve to the
/// last one; the next scan reconciles.
pub fn save_cache(
    config: &Config,
    storage_location: &str,
    cache: &RemoteIndexCache,
) -> Result<()> {
    fsutil::write_atomic(
        &cache_path(config, storage_location),
        &serde_json::to_string_pretty(cache)?,
    )
}

pub fn update_cache_entry(
    config: &Config,
    storage_location: &str,
    repo_id: &str,
    index_name: &str,
) -> Result<()> {
    let mut cache = load_cache(config, storage_location);
    cache.insert(repo_id.to_string(), index_name.to_string());
    save_cache(config, storage_location, &cache)
}

pub fn remove_cache_entry(
    config: &Config,
    storage_location: &str,
    repo_id: &str,
) -> Result<()> {
    let mut cache = load_cache(config, storage_location);
    if cache.remove(repo_id).is_some() {
        save_cache(config, storage_location, &cache)?;
    }
    Ok(())
}

/// Resolve the remote index name for a repo id: verified cache hit first,
/// then a full scan of the remote repos directory. `None` when the repo does
/// not exist remotely (the usual new-repo case).
pub async fn find_remote_repo_by_id(
    config: &Config,
    storage_location: &str,
    repo_id: &str,
) -> Result<Option<String>> {
    let sl = config.storage_location(storage_location)?;
    let repos_path = sl.store_path.join(consts::REMOTE_REPOS_DIR);
    let rclone_config = config.rclone_config_path();

    let mut cache = load_cache(config, storage_location);
    if let Some(cached) = cache.get(repo_id).cloned() {
        let (exists, _) =
            rclone::path_exists(&rclone_config, storage_location, &repos_path.join(&cached))
                .await?;
        if exists {
            return Ok(Some(cached));
        }
        log::debug!("remote index cache stale for {repo_id}; rescanning");
        cache.remove(repo_id);
        save_cache(config, storage_location, &cache)?;
    }

    let prefix = format!("{repo_id}__");
    let entries =
        rclone::lsjson(&rclone_config, storage_location, &repos_path, &LsOpts::default()).await?;
    if let Some(entries) = entries {
        for entry in entries {
            if entry.is_dir && entry.name.starts_with(&prefix) {
                cache.insert(repo_id.to_string(), entry.name.clone());
                save_cache(config, storage_location, &cache)?;
                return Ok(Some(entry.name));
            }
        }
    }

    if cache.remove(repo_id).is_some() {
        save_cache(config, storage_location, &cache)?;
    }
    Ok(None)
}

/// Rebuild the whole cache for a storage location from a remote listing.
pub async fn rebuild_cache(
    config: &Config,
    storage_location: &str,
) -> Result<RemoteIndexCache> {
    let sl = config.storage_location(storage_location)?;
    let repos_path = sl.store_path.join(consts::REMOTE_REPOS_DIR);
    let entries = rclone::lsjson(
        &config.rclone_config_path(),
        storage_location,
        &repos_path,
        &LsOpts::default(),
    )
    .await?;

    let mut cache = RemoteIndexCache::new();
    if let Some(entries) = entries {
        for entry in entries {
            if !entry.is_dir {
                continue;
            }
            // Entries that do not parse as index names are not repos.
            if let Ok(repo_id) = meta::extract_repo_id(&entry.name) {
                cache.insert(repo_id, entry.name);
            }
        }
    }
    save_cache(config, storage_location, &cache)?;
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        let body = format!(
            r#"
default_storage_location = "r1"
repoyard_data_path = "{data}/.repoyard"
repo_timestamp_format = "date_and_time"
user_repos_path = "{data}/repos"
user_repo_groups_path = "{data}/repo-groups"
repo_subid_character_set = "abc"
repo_subid_length = 3
max_concurrent_rclone_ops = 3

[storage_locations.r1]
storage_type = "rclone"
store_path = "repoyard"
"#,
            data = dir.display()
        );
        let path = dir.join("config.toml");
        fs::write(&path, body).unwrap();
        Config::load(Some(&path)).unwrap()
    }

    #[test]
    fn missing_cache_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        assert!(load_cache(&config, "r1").is_empty());
    }

    #[test]
    fn corrupt_cache_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let path = cache_path(&config, "r1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json {").unwrap();
        assert!(load_cache(&config, "r1").is_empty());
    }

    #[test]
    fn update_and_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        update_cache_entry(&config, "r1", "20240101_aaa", "20240101_aaa__alpha").unwrap();
        update_cache_entry(&config, "r1", "20240101_bbb", "20240101_bbb__beta").unwrap();
        let cache = load_cache(&config, "r1");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache["20240101_aaa"], "20240101_aaa__alpha");

        remove_cache_entry(&config, "r1", "20240101_aaa").unwrap();
        let cache = load_cache(&config, "r1");
        assert!(!cache.contains_key("20240101_aaa"));
        assert!(cache.contains_key("20240101_bbb"));
    }
}
