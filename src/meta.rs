//! Repo metadata: identity, index names, part paths, the metadata file, and
//! the global index built by scanning the local store.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{Config, StorageConfig, TimestampFormat};
use crate::consts;
use crate::error::{Error, Result};
use crate::fsutil;

/// The three independently synced parts of every repo.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RepoPart {
    Data,
    Meta,
    Conf,
}

impl RepoPart {
    /// Sync order: META carries the schema, CONF feeds DATA's filters.
    pub const ORDERED: [RepoPart; 3] = [RepoPart::Meta, RepoPart::Conf, RepoPart::Data];

    pub fn as_str(&self) -> &'static str {
        match self {
            RepoPart::Data => "data",
            RepoPart::Meta => "meta",
            RepoPart::Conf => "conf",
        }
    }
}

impl std::fmt::Display for RepoPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full in-memory metadata for one repo. Only `storage_location`,
/// `creator_hostname`, `groups`, and `parents` are persisted in
/// `repometa.toml`; the identity fields are reconstructed from the enclosing
/// directory name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMeta {
    pub creation_timestamp_utc: String,
    pub repo_subid: String,
    pub name: String,
    pub storage_location: String,
    pub creator_hostname: String,
    pub groups: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

/// The persisted subset of [`RepoMeta`].
#[derive(Debug, Serialize, Deserialize)]
struct RepoMetaFile {
    storage_location: String,
    creator_hostname: String,
    groups: Vec<String>,
    #[serde(default)]
    parents: Vec<String>,
}

impl RepoMeta {
    pub fn repo_id(&self) -> String {
        format!("{}_{}", self.creation_timestamp_utc, self.repo_subid)
    }

    pub fn index_name(&self) -> String {
        format!("{}__{}", self.repo_id(), self.name)
    }

    pub fn creation_datetime(&self) -> Result<NaiveDateTime> {
        parse_creation_timestamp(&self.creation_timestamp_utc)
    }

    pub fn storage_config<'a>(&self, config: &'a Config) -> Result<&'a StorageConfig> {
        config.storage_location(&self.storage_location)
    }

    /// Local directory holding META and CONF for this repo.
    pub fn local_path(&self, config: &Config) -> PathBuf {
        config
            .local_store_path()
            .join(&self.storage_location)
            .join(self.index_name())
    }

    /// Remote directory holding all three parts.
    pub fn remote_path(&self, config: &Config) -> Result<PathBuf> {
        Ok(remote_repo_path(
            self.storage_config(config)?,
            &self.index_name(),
        ))
    }

    pub fn local_part_path(&self, config: &Config, part: RepoPart) -> PathBuf {
        match part {
            RepoPart::Data => config.user_repos_path.join(self.index_name()),
            RepoPart::Meta => self.local_path(config).join(consts::REPO_META_FILE),
            RepoPart::Conf => self.local_path(config).join(consts::REPO_CONF_DIR),
        }
    }

    pub fn remote_part_path(&self, config: &Config, part: RepoPart) -> Result<PathBuf> {
        Ok(remote_part_path(
            self.storage_config(config)?,
            &self.index_name(),
            part,
        ))
    }

    pub fn local_record_path(&self, config: &Config, part: RepoPart) -> PathBuf {
        local_record_path(config, &self.index_name(), part)
    }

    pub fn remote_record_path(&self, config: &Config, part: RepoPart) -> Result<PathBuf> {
        Ok(remote_record_path(
            self.storage_config(config)?,
            &self.index_name(),
            part,
        ))
    }

    /// A repo is included on this machine iff its DATA directory exists.
    pub fn check_included(&self, config: &Config) -> bool {
        self.local_part_path(config, RepoPart::Data).is_dir()
    }

    /// Persist `repometa.toml` atomically under the local store.
    pub fn save(&self, config: &Config) -> Result<()> {
        self.validate()?;
        let file = RepoMetaFile {
            storage_location: self.storage_location.clone(),
            creator_hostname: self.creator_hostname.clone(),
            groups: self.groups.clone(),
            parents: self.parents.clone(),
        };
        let path = self.local_part_path(config, RepoPart::Meta);
        fsutil::write_atomic(&path, &toml::to_string(&file)?)
    }

    /// Load a repo's metadata given its storage location and index name.
    pub fn load(config: &Config, storage_location: &str, index_name: &str) -> Result<RepoMeta> {
        let (repo_id, name) = parse_index_name(index_name)?;
        let (creation_timestamp, repo_subid) = split_repo_id(&repo_id)?;

        let meta_path = config
            .local_store_path()
            .join(storage_location)
            .join(index_name)
            .join(consts::REPO_META_FILE);
        let text = fs::read_to_string(&meta_path).map_err(|e| {
            Error::Lifecycle(format!(
                "repo meta file '{}' cannot be read: {e}",
                meta_path.display()
            ))
        })?;
        let file: RepoMetaFile = toml::from_str(&text)?;

        let meta = RepoMeta {
            creation_timestamp_utc: creation_timestamp,
            repo_subid,
            name,
            storage_location: storage_location.to_string(),
            creator_hostname: file.creator_hostname,
            groups: file.groups,
            parents: file.parents,
        };
        meta.validate()?;
        Ok(meta)
    }

    pub fn validate(&self) -> Result<()> {
        let unique: HashSet<&String> = self.groups.iter().collect();
        if unique.len() != self.groups.len() {
            return Err(Error::Lifecycle("groups must be unique".into()));
        }
        for group in &self.groups {
            validate_group_name(group)?;
        }
        self.creation_datetime()?;
        Ok(())
    }
}

/// Remote repo directory for an arbitrary index name (which may differ from
/// the local one after a one-sided rename).
pub fn remote_repo_path(sl: &StorageConfig, index_name: &str) -> PathBuf {
    sl.store_path.join(consts::REMOTE_REPOS_DIR).join(index_name)
}

pub fn remote_part_path(sl: &StorageConfig, index_name: &str, part: RepoPart) -> PathBuf {
    let base = remote_repo_path(sl, index_name);
    match part {
        RepoPart::Data => base.join(consts::REPO_DATA_DIR),
        RepoPart::Meta => base.join(consts::REPO_META_FILE),
        RepoPart::Conf => base.join(consts::REPO_CONF_DIR),
    }
}

pub fn remote_record_path(sl: &StorageConfig, index_name: &str, part: RepoPart) -> PathBuf {
    sl.store_path
        .join(consts::SYNC_RECORDS_DIR)
        .join(index_name)
        .join(format!("{}.rec", part.as_str()))
}

pub fn local_record_path(config: &Config, index_name: &str, part: RepoPart) -> PathBuf {
    config
        .local_sync_records_path()
        .join(index_name)
        .join(format!("{}.rec", part.as_str()))
}

/// Split `<repo_id>__<name>` on the first `__`.
pub fn parse_index_name(index_name: &str) -> Result<(String, String)> {
    match index_name.split_once("__") {
        Some((id, name)) if !id.is_empty() && !name.is_empty() => {
            Ok((id.to_string(), name.to_string()))
        }
        _ => Err(Error::Lifecycle(format!(
            "invalid index name format: '{index_name}'"
        ))),
    }
}

pub fn extract_repo_id(index_name: &str) -> Result<String> {
    Ok(parse_index_name(index_name)?.0)
}

/// Split a repo id into (creation timestamp, subid). The id has two parts
/// (date, subid) or three (date, time, subid); the last is always the subid.
pub fn split_repo_id(repo_id: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = repo_id.split('_').collect();
    match parts.len() {
        3 => Ok((format!("{}_{}", parts[0], parts[1]), parts[2].to_string())),
        2 => Ok((parts[0].to_string(), parts[1].to_string())),
        _ => Err(Error::Lifecycle(format!("invalid repo id: '{repo_id}'"))),
    }
}

fn parse_creation_timestamp(timestamp: &str) -> Result<NaiveDateTime> {
    let parsed = if timestamp.contains('_') {
        NaiveDateTime::parse_from_str(timestamp, consts::REPO_TIMESTAMP_FORMAT)
    } else {
        chrono::NaiveDate::parse_from_str(timestamp, consts::REPO_TIMESTAMP_FORMAT_DATE_ONLY)
            .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight is valid"))
    };
    parsed.map_err(|_| Error::Lifecycle(format!("invalid creation timestamp: '{timestamp}'")))
}

/// Group names: alphanumeric plus `_`, `-`, `/`.
pub fn validate_group_name(group: &str) -> Result<()> {
    let ok = !group.is_empty()
        && group
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/');
    if ok {
        Ok(())
    } else {
        Err(Error::Lifecycle(format!(
            "invalid group name '{group}'; allowed characters: alphanumeric, '_', '-', '/'"
        )))
    }
}

fn format_creation_timestamp(config: &Config) -> String {
    let now = chrono::Utc::now();
    match config.repo_timestamp_format {
        TimestampFormat::DateAndTime => now.format(consts::REPO_TIMESTAMP_FORMAT).to_string(),
        TimestampFormat::DateOnly => now
            .format(consts::REPO_TIMESTAMP_FORMAT_DATE_ONLY)
            .to_string(),
    }
}

fn random_subid(character_set: &str, length: usize) -> String {
    let chars: Vec<char> = character_set.chars().collect();
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}

/// Generate a `(creation_timestamp, subid)` pair whose combined id does not
/// collide with `existing_ids`, retrying up to the attempt cap.
pub fn generate_unique_repo_id(
    config: &Config,
    existing_ids: &HashSet<String>,
) -> Result<(String, String)> {
    for _ in 0..consts::REPO_ID_MAX_ATTEMPTS {
        let timestamp = format_creation_timestamp(config);
        let subid = random_subid(&config.repo_subid_character_set, config.repo_subid_length);
        let repo_id = format!("{timestamp}_{subid}");
        if !existing_ids.contains(&repo_id) {
            return Ok((timestamp, subid));
        }
    }
    Err(Error::Lifecycle(format!(
        "failed to generate a unique repo id after {} attempts",
        consts::REPO_ID_MAX_ATTEMPTS
    )))
}

/// The global metadata index: every repo known to this machine's local
/// store, across all storage locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YardMeta {
    pub repos: Vec<RepoMeta>,
}

impl YardMeta {
    pub fn by_index_name(&self) -> HashMap<String, &RepoMeta> {
        self.repos.iter().map(|m| (m.index_name(), m)).collect()
    }

    pub fn by_id(&self) -> HashMap<String, &RepoMeta> {
        self.repos.iter().map(|m| (m.repo_id(), m)).collect()
    }

    pub fn find_index_name(&self, index_name: &str) -> Result<RepoMeta> {
        self.repos
            .iter()
            .find(|m| m.index_name() == index_name)
            .cloned()
            .ok_or_else(|| Error::Lifecycle(format!("repo '{index_name}' not found")))
    }

    /// Scan the local store and build the index from every repo directory.
    pub fn scan(config: &Config) -> Result<YardMeta> {
        let mut repos = Vec::new();
        for sl_name in config.storage_locations.keys() {
            let sl_path = config.local_store_path().join(sl_name);
            let entries = match fs::read_dir(&sl_path) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let index_name = entry.file_name().to_string_lossy().into_owned();
                repos.push(RepoMeta::load(config, sl_name, &index_name)?);
            }
        }
        repos.sort_by_key(|m| m.index_name());
        Ok(YardMeta { repos })
    }

    /// Rebuild the index file from a fresh scan. The caller must hold the
    /// global lock; see [`refresh_yard_meta`].
    pub fn refresh_unlocked(config: &Config) -> Result<YardMeta> {
        let meta = YardMeta::scan(config)?;
        fsutil::write_atomic(&config.yard_meta_path(), &serde_json::to_string(&meta)?)?;
        Ok(meta)
    }

    /// Load the index file, building it first if absent. Readers tolerate
    /// brief staleness and take no lock.
    pub fn load(config: &Config) -> Result<YardMeta> {
        let path = config.yard_meta_path();
        if !path.exists() {
            return refresh_yard_meta(config);
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }
}

/// Rebuild the index file under the global lock, blocking on acquisition.
pub fn refresh_yard_meta(config: &Config) -> Result<YardMeta> {
    let lock_manager = crate::lock::LockManager::new(&config.repoyard_data_path);
    let _guard = lock_manager.global_lock()?;
    YardMeta::refresh_unlocked(config)
}

/// Rebuild the index file under the global lock, polling asynchronously.
pub async fn refresh_yard_meta_async(config: &Config) -> Result<YardMeta> {
    let lock_manager = crate::lock::LockManager::new(&config.repoyard_data_path);
    let _guard = lock_manager.global_lock_async().await?;
    YardMeta::refresh_unlocked(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_name_round_trip() {
        let (id, name) = parse_index_name("20240615_103000_ab3x9__my_repo").unwrap();
        assert_eq!(id, "20240615_103000_ab3x9");
        assert_eq!(name, "my_repo");
        let (ts, subid) = split_repo_id(&id).unwrap();
        assert_eq!(ts, "20240615_103000");
        assert_eq!(subid, "ab3x9");
    }

    #[test]
    fn index_name_with_date_only_id() {
        let (id, name) = parse_index_name("20240615_ab3x9__notes").unwrap();
        let (ts, subid) = split_repo_id(&id).unwrap();
        assert_eq!(ts, "20240615");
        assert_eq!(subid, "ab3x9");
        assert_eq!(name, "notes");
    }

    #[test]
    fn name_containing_double_underscore_splits_on_first() {
        let (id, name) = parse_index_name("20240615_ab3x9__a__b").unwrap();
        assert_eq!(id, "20240615_ab3x9");
        assert_eq!(name, "a__b");
    }

    #[test]
    fn rejects_malformed_index_names() {
        assert!(parse_index_name("no_separator").is_err());
        assert!(parse_index_name("__name_only").is_err());
        assert!(split_repo_id("justone").is_err());
        assert!(split_repo_id("a_b_c_d").is_err());
    }

    #[test]
    fn group_name_rules() {
        assert!(validate_group_name("ctx/linux").is_ok());
        assert!(validate_group_name("a-b_c").is_ok());
        assert!(validate_group_name("bad name").is_err());
        assert!(validate_group_name("").is_err());
    }

    fn test_config(dir: &Path) -> Config {
        let body = format!(
            r#"
default_storage_location = "r1"
repoyard_data_path = "{data}/.repoyard"
repo_timestamp_format = "date_and_time"
user_repos_path = "{data}/repos"
user_repo_groups_path = "{data}/repo-groups"
repo_subid_character_set = "abcdefghijklmnopqrstuvwxyz0123456789"
repo_subid_length = 5
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
    fn unique_id_generation_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut existing = HashSet::new();
        for _ in 0..50 {
            let (ts, subid) = generate_unique_repo_id(&config, &existing).unwrap();
            let id = format!("{ts}_{subid}");
            assert!(existing.insert(id));
        }
    }

    #[test]
    fn unique_id_generation_gives_up_when_space_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.repo_subid_character_set = "a".into();
        config.repo_subid_length = 1;
        let (ts, subid) = generate_unique_repo_id(&config, &HashSet::new()).unwrap();
        let mut existing = HashSet::new();
        existing.insert(format!("{ts}_{subid}"));
        // With a one-element id space and that id taken, generation fails.
        // (The timestamp could roll over a second mid-test; tolerate either
        // outcome but require an error when the id really is taken.)
        match generate_unique_repo_id(&config, &existing) {
            Ok((ts2, _)) => assert_ne!(ts2, ts),
            Err(e) => assert!(matches!(e, Error::Lifecycle(_))),
        }
    }

    #[test]
    fn save_and_load_round_trip_through_store_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let meta = RepoMeta {
            creation_timestamp_utc: "20240615_103000".into(),
            repo_subid: "ab3x9".into(),
            name: "my_repo".into(),
            storage_location: "r1".into(),
            creator_hostname: "hostA".into(),
            groups: vec!["work".into()],
            parents: vec![],
        };
        meta.save(&config).unwrap();
        let loaded = RepoMeta::load(&config, "r1", &meta.index_name()).unwrap();
        assert_eq!(meta, loaded);
        // Identity fields come from the directory name, not the file.
        let text = fs::read_to_string(meta.local_part_path(&config, RepoPart::Meta)).unwrap();
        assert!(!text.contains("my_repo"));
        assert!(!text.contains("ab3x9"));
    }

    #[test]
    fn scan_builds_index_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        for name in ["alpha", "beta"] {
            let meta = RepoMeta {
                creation_timestamp_utc: "20240615_103000".into(),
                repo_subid: format!("{}1234", &name[..1]),
                name: name.into(),
                storage_location: "r1".into(),
                creator_hostname: "hostA".into(),
                groups: vec![],
                parents: vec![],
            };
            meta.save(&config).unwrap();
        }
        let yard = YardMeta::scan(&config).unwrap();
        assert_eq!(yard.repos.len(), 2);
        assert!(yard.by_id().contains_key("20240615_103000_a1234"));
    }

    #[test]
    fn meta_validation_rejects_duplicate_groups() {
        let meta = RepoMeta {
            creation_timestamp_utc: "20240615".into(),
            repo_subid: "aaaaa".into(),
            name: "x".into(),
            storage_location: "r1".into(),
            creator_hostname: "h".into(),
            groups: vec!["g".into(), "g".into()],
            parents: vec![],
        };
        assert!(meta.validate().is_err());
    }
}
