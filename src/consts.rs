//! On-disk layout names, formats, and tunables shared across the crate.

use std::time::Duration;

/// Relative path of the sync-record tree, on both sides.
pub const SYNC_RECORDS_DIR: &str = "sync_records";
/// Relative path of the repos tree under a storage location's store path.
pub const REMOTE_REPOS_DIR: &str = "repos";
/// Relative path of displaced-file backups, on both sides.
pub const SYNC_BACKUPS_DIR: &str = "sync_backups";
/// Relative path of deletion markers under a storage location's store path.
pub const TOMBSTONES_DIR: &str = "tombstones";

/// DATA part directory name inside a remote repo directory.
pub const REPO_DATA_DIR: &str = "data";
/// META part file name.
pub const REPO_META_FILE: &str = "repometa.toml";
/// CONF part directory name.
pub const REPO_CONF_DIR: &str = "conf";

/// Local mirror of remote repo directories (META + CONF), under the data path.
pub const LOCAL_STORE_DIR: &str = "local_store";
/// Cached id-to-remote-index-name lookups, under the data path.
pub const REMOTE_INDEXES_DIR: &str = "remote_indexes";
/// Lock files, under the data path.
pub const LOCKS_DIR: &str = "locks";
/// The global metadata index file, under the data path.
pub const YARD_META_FILE: &str = "repoyard_meta.json";

/// Filter files read from a repo's CONF directory before a DATA transfer.
pub const RCLONE_INCLUDE_FILE: &str = ".rclone_include";
pub const RCLONE_EXCLUDE_FILE: &str = ".rclone_exclude";
pub const RCLONE_FILTERS_FILE: &str = ".rclone_filters";

pub const REPO_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const REPO_TIMESTAMP_FORMAT_DATE_ONLY: &str = "%Y%m%d";

pub const DEFAULT_SUBID_CHARACTER_SET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
pub const DEFAULT_SUBID_LENGTH: usize = 5;
/// Attempts before unique-id generation gives up on a pathological id set.
pub const REPO_ID_MAX_ATTEMPTS: usize = 100;

pub const DEFAULT_MAX_CONCURRENT_RCLONE_OPS: usize = 3;

/// The Nth SIGINT/SIGTERM/SIGHUP exits immediately; earlier ones request a
/// stop at the next part boundary.
pub const SOFT_INTERRUPT_LIMIT: usize = 3;

pub const GLOBAL_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const REPO_SYNC_LOCK_TIMEOUT: Duration = Duration::from_secs(600);
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const ENV_CONFIG_PATH: &str = "REPOYARD_CONFIG_PATH";
pub const ENV_DEFAULT_GROUPS: &str = "REPOYARD_DEFAULT_GROUPS";

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/repoyard/config.toml";
pub const DEFAULT_DATA_PATH: &str = "~/.repoyard";
pub const DEFAULT_USER_REPOS_PATH: &str = "~/repos";
pub const DEFAULT_USER_REPO_GROUPS_PATH: &str = "~/repo-groups";
/// Store path of the local storage location created by `init`.
pub const DEFAULT_FAKE_STORE_DIR: &str = "fake_store";

/// Exclusions applied to DATA transfers when a repo carries no exclude file.
pub const DEFAULT_RCLONE_EXCLUDE: &str = "\
.venv/
.pixi/
.trunk/
node_modules/
__pycache__/

.DS_Store
";
