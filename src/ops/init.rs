//! First-time setup: default config file, data directory skeleton, rclone
//! config stub.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{resolve_config_path, Config};
use crate::consts;
use crate::error::{Error, Result};
use crate::fsutil;

/// Create a fresh repoyard installation. Refuses to overwrite an existing
/// config file. Returns the config path written.
pub fn init_yard(config_path: Option<&Path>, data_path: Option<&Path>) -> Result<PathBuf> {
    let config_path = resolve_config_path(config_path);
    if config_path.exists() {
        return Err(Error::Lifecycle(format!(
            "config file '{}' already exists",
            config_path.display()
        )));
    }

    let data_path = match data_path {
        Some(path) => PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned()),
        None => PathBuf::from(shellexpand::tilde(consts::DEFAULT_DATA_PATH).into_owned()),
    };
    let user_repos_path =
        PathBuf::from(shellexpand::tilde(consts::DEFAULT_USER_REPOS_PATH).into_owned());
    let user_repo_groups_path =
        PathBuf::from(shellexpand::tilde(consts::DEFAULT_USER_REPO_GROUPS_PATH).into_owned());

    let body = default_config_toml(
        &data_path,
        &user_repos_path,
        &user_repo_groups_path,
    );
    fsutil::write_atomic(&config_path, &body)?;

    // Data skeleton.
    for dir in [
        data_path.join(consts::LOCAL_STORE_DIR),
        data_path.join(consts::SYNC_RECORDS_DIR),
        data_path.join(consts::SYNC_BACKUPS_DIR),
        data_path.join(consts::REMOTE_INDEXES_DIR),
        data_path.join(consts::LOCKS_DIR),
        data_path.join(consts::DEFAULT_FAKE_STORE_DIR),
    ] {
        fs::create_dir_all(dir)?;
    }
    fs::create_dir_all(&user_repos_path)?;
    fs::create_dir_all(&user_repo_groups_path)?;

    // Siblings of the config file: the rclone config stub and the default
    // exclude list applied when a repo carries none of its own.
    let config = Config::load(Some(&config_path))?;
    if !config.rclone_config_path().exists() {
        fs::write(config.rclone_config_path(), "")?;
    }
    fs::write(
        config.default_rclone_exclude_path(),
        consts::DEFAULT_RCLONE_EXCLUDE,
    )?;

    log::info!("initialised repoyard at {}", config_path.display());
    Ok(config_path)
}

fn default_config_toml(
    data_path: &Path,
    user_repos_path: &Path,
    user_repo_groups_path: &Path,
) -> String {
    format!(
        r#"default_storage_location = "fake"
repoyard_data_path = "{data}"
repo_timestamp_format = "date_and_time"
user_repos_path = "{repos}"
user_repo_groups_path = "{groups}"
default_repo_groups = []
repo_subid_character_set = "{charset}"
repo_subid_length = {subid_len}
max_concurrent_rclone_ops = {max_ops}
single_parent = false
sync_before_new_repo = false

[storage_locations.fake]
storage_type = "local"
store_path = "{data}/{fake_store}"
"#,
        data = data_path.display(),
        repos = user_repos_path.display(),
        groups = user_repo_groups_path.display(),
        charset = consts::DEFAULT_SUBID_CHARACTER_SET,
        subid_len = consts::DEFAULT_SUBID_LENGTH,
        max_ops = consts::DEFAULT_MAX_CONCURRENT_RCLONE_OPS,
        fake_store = consts::DEFAULT_FAKE_STORE_DIR,
    )
}
