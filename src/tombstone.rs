//! Tombstones: deletion markers on the remote.
//!
//! A tombstone's presence means "this repo_id was deleted elsewhere; refuse
//! to resurrect it by syncing". Creation is idempotent (whole-file write,
//! last writer wins); removal is a deliberate resurrection and never happens
//! automatically.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::consts;
use crate::error::{Error, Result};
use crate::rclone::{self, LsOpts};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub repo_id: String,
    pub deleted_at_utc: DateTime<Utc>,
    pub deleted_by_hostname: String,
    pub last_known_name: String,
}

/// Tombstone file path under a storage location's store path.
fn tombstone_path(config: &Config, storage_location: &str, repo_id: &str) -> Result<PathBuf> {
    let sl = config.storage_location(storage_location)?;
    Ok(sl
        .store_path
        .join(consts::TOMBSTONES_DIR)
        .join(format!("{repo_id}.json")))
}

/// Write a tombstone for a deleted repo. Overwrites any existing one.
pub async fn create_tombstone(
    config: &Config,
    storage_location: &str,
    repo_id: &str,
    last_known_name: &str,
) -> Result<Tombstone> {
    let tombstone = Tombstone {
        repo_id: repo_id.to_string(),
        deleted_at_utc: Utc::now(),
        deleted_by_hostname: crate::hostname(),
        last_known_name: last_known_name.to_string(),
    };
    let path = tombstone_path(config, storage_location, repo_id)?;
    rclone::write(
        &config.rclone_config_path(),
        storage_location,
        &path,
        &serde_json::to_string_pretty(&tombstone)?,
    )
    .await?;
    Ok(tombstone)
}

pub async fn is_tombstoned(
    config: &Config,
    storage_location: &str,
    repo_id: &str,
) -> Result<bool> {
    let path = tombstone_path(config, storage_location, repo_id)?;
    let (exists, _) =
        rclone::path_exists(&config.rclone_config_path(), storage_location, &path).await?;
    Ok(exists)
}

/// Read a tombstone. `None` if the repo is not tombstoned.
pub async fn get_tombstone(
    config: &Config,
    storage_location: &str,
    repo_id: &str,
) -> Result<Option<Tombstone>> {
    let path = tombstone_path(config, storage_location, repo_id)?;
    match rclone::cat(&config.rclone_config_path(), storage_location, &path).await? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// List every tombstone on a storage location.
pub async fn list_tombstones(config: &Config, storage_location: &str) -> Result<Vec<Tombstone>> {
    let sl = config.storage_location(storage_location)?;
    let dir = sl.store_path.join(consts::TOMBSTONES_DIR);
    let rclone_config = config.rclone_config_path();
    let Some(entries) = rclone::lsjson(&rclone_config, storage_location, &dir, &LsOpts::default())
        .await?
    else {
        return Ok(Vec::new());
    };
    let mut tombstones = Vec::new();
    for entry in entries {
        if entry.is_dir || !entry.name.ends_with(".json") {
            continue;
        }
        let path = dir.join(&entry.name);
        if let Some(text) = rclone::cat(&rclone_config, storage_location, &path).await? {
            tombstones.push(serde_json::from_str(&text)?);
        }
    }
    Ok(tombstones)
}

/// Remove a tombstone so the repo id may be used again. Fails if none
/// exists.
pub async fn remove_tombstone(
    config: &Config,
    storage_location: &str,
    repo_id: &str,
) -> Result<()> {
    let path = tombstone_path(config, storage_location, repo_id)?;
    let rclone_config = config.rclone_config_path();
    let (exists, _) = rclone::path_exists(&rclone_config, storage_location, &path).await?;
    if !exists {
        return Err(Error::Lifecycle(format!(
            "no tombstone found for repo id '{repo_id}'"
        )));
    }
    rclone::delete_file(&rclone_config, storage_location, &path).await
}
