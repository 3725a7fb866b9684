//! Configuration file loading and validation.
//!
//! `config.toml` names one or more storage locations (rclone remotes or
//! local aliases) and the paths this machine keeps its mirrors under.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Rclone,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub storage_type: StorageType,
    pub store_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoTitleMode {
    #[default]
    IndexName,
    DatetimeAndName,
    Name,
}

/// Per-group presentation settings for the symlink views.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoGroupConfig {
    #[serde(default)]
    pub symlink_name: Option<String>,
    #[serde(default)]
    pub repo_title_mode: RepoTitleMode,
    #[serde(default)]
    pub unique_repo_names: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    DateAndTime,
    DateOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where this config was loaded from; never written back out.
    #[serde(skip)]
    pub config_path: PathBuf,

    pub default_storage_location: String,
    pub repoyard_data_path: PathBuf,
    pub repo_timestamp_format: TimestampFormat,
    pub user_repos_path: PathBuf,
    pub user_repo_groups_path: PathBuf,
    pub storage_locations: BTreeMap<String, StorageConfig>,
    #[serde(default)]
    pub repo_groups: BTreeMap<String, RepoGroupConfig>,
    #[serde(default)]
    pub default_repo_groups: Vec<String>,
    pub repo_subid_character_set: String,
    pub repo_subid_length: usize,
    pub max_concurrent_rclone_ops: usize,

    /// Each repo may have at most one parent. Enforced at modification time.
    #[serde(default)]
    pub single_parent: bool,
    /// Sync metadata from the storage location before creating a new repo,
    /// so id generation can see remotely-created ids.
    #[serde(default)]
    pub sync_before_new_repo: bool,
}

impl Config {
    /// Load the config from `path`, falling back to `REPOYARD_CONFIG_PATH`
    /// and then the default location.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = resolve_config_path(path);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read config file '{}': {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&text)?;
        config.config_path = path;
        config.merge_env_default_groups()?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Additively merge `REPOYARD_DEFAULT_GROUPS` (a TOML list literal, e.g.
    /// `["ctx/mac", "ctx/linux"]`) into `default_repo_groups`.
    fn merge_env_default_groups(&mut self) -> Result<()> {
        let Ok(raw) = env::var(consts::ENV_DEFAULT_GROUPS) else {
            return Ok(());
        };
        if raw.trim().is_empty() {
            return Ok(());
        }
        #[derive(Deserialize)]
        struct Wrapper {
            v: Vec<String>,
        }
        let wrapper: Wrapper = toml::from_str(&format!("v = {raw}")).map_err(|e| {
            Error::Config(format!(
                "invalid {}: expected a TOML list of strings: {e}",
                consts::ENV_DEFAULT_GROUPS
            ))
        })?;
        for group in wrapper.v {
            if !self.default_repo_groups.contains(&group) {
                self.default_repo_groups.push(group);
            }
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        self.repoyard_data_path = expand(&self.repoyard_data_path);
        self.user_repos_path = expand(&self.user_repos_path);
        self.user_repo_groups_path = expand(&self.user_repo_groups_path);
        for sl in self.storage_locations.values_mut() {
            sl.store_path = expand(&sl.store_path);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.storage_locations.is_empty() {
            return Err(Error::Config("no storage locations defined".into()));
        }
        for name in self.storage_locations.keys() {
            if !is_valid_storage_name(name) {
                return Err(Error::Config(format!(
                    "storage location name '{name}' is invalid; only alphanumeric \
                     characters, underscore and dash are allowed"
                )));
            }
        }
        if !self
            .storage_locations
            .contains_key(&self.default_storage_location)
        {
            return Err(Error::Config(format!(
                "default_storage_location '{}' not found in storage_locations",
                self.default_storage_location
            )));
        }
        for group in self.repo_groups.keys() {
            crate::meta::validate_group_name(group)
                .map_err(|e| Error::Config(e.to_string()))?;
        }
        if self.repo_subid_character_set.is_empty() || self.repo_subid_length == 0 {
            return Err(Error::Config(
                "repo_subid_character_set and repo_subid_length must be non-empty".into(),
            ));
        }
        Ok(())
    }

    pub fn storage_location(&self, name: &str) -> Result<&StorageConfig> {
        self.storage_locations
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown storage location '{name}'")))
    }

    // Derived local paths.

    pub fn local_store_path(&self) -> PathBuf {
        self.repoyard_data_path.join(consts::LOCAL_STORE_DIR)
    }

    pub fn local_sync_records_path(&self) -> PathBuf {
        self.repoyard_data_path.join(consts::SYNC_RECORDS_DIR)
    }

    pub fn local_sync_backups_path(&self) -> PathBuf {
        self.repoyard_data_path.join(consts::SYNC_BACKUPS_DIR)
    }

    pub fn remote_indexes_path(&self) -> PathBuf {
        self.repoyard_data_path.join(consts::REMOTE_INDEXES_DIR)
    }

    pub fn locks_path(&self) -> PathBuf {
        self.repoyard_data_path.join(consts::LOCKS_DIR)
    }

    pub fn yard_meta_path(&self) -> PathBuf {
        self.repoyard_data_path.join(consts::YARD_META_FILE)
    }

    /// The rclone config used for every invocation; lives next to
    /// `config.toml` so remotes travel with the repoyard config.
    pub fn rclone_config_path(&self) -> PathBuf {
        self.config_dir().join("repoyard_rclone.conf")
    }

    pub fn default_rclone_exclude_path(&self) -> PathBuf {
        self.config_dir().join("default.rclone_exclude")
    }

    fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Resolve the config path from the explicit argument, the environment, or
/// the default location, expanding `~`.
pub fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) => expand(p),
        None => match env::var(consts::ENV_CONFIG_PATH) {
            Ok(p) if !p.trim().is_empty() => expand(Path::new(&p)),
            _ => expand(Path::new(consts::DEFAULT_CONFIG_PATH)),
        },
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn is_valid_storage_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.toml");
        fs::write(&path, body).unwrap();
        path
    }

    fn minimal_config(dir: &Path) -> String {
        format!(
            r#"
default_storage_location = "fake"
repoyard_data_path = "{data}"
repo_timestamp_format = "date_and_time"
user_repos_path = "{data}/user_repos"
user_repo_groups_path = "{data}/repo-groups"
default_repo_groups = []
repo_subid_character_set = "abc123"
repo_subid_length = 5
max_concurrent_rclone_ops = 3

[storage_locations.fake]
storage_type = "local"
store_path = "{data}/fake_store"
"#,
            data = dir.display()
        )
    }

    #[test]
    fn loads_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &minimal_config(dir.path()));
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.default_storage_location, "fake");
        assert_eq!(
            config.storage_location("fake").unwrap().storage_type,
            StorageType::Local
        );
        assert!(config.local_store_path().ends_with("local_store"));
        assert_eq!(
            config.rclone_config_path(),
            dir.path().join("repoyard_rclone.conf")
        );
    }

    #[test]
    fn rejects_unknown_default_location() {
        let dir = tempfile::tempdir().unwrap();
        let body = minimal_config(dir.path())
            .replace("default_storage_location = \"fake\"", "default_storage_location = \"gone\"");
        let path = write_config(dir.path(), &body);
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_bad_storage_name() {
        let dir = tempfile::tempdir().unwrap();
        let body = minimal_config(dir.path()).replace("storage_locations.fake", "storage_locations.\"bad name\"");
        let body = body.replace("default_storage_location = \"fake\"", "default_storage_location = \"bad name\"");
        let path = write_config(dir.path(), &body);
        assert!(Config::load(Some(&path)).is_err());
    }
}
