//! Command-line surface and repo-argument resolution.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{SyncDirection, SyncSetting};
use crate::meta::{RepoMeta, RepoPart, YardMeta};
use crate::ops::{RenameScope, SyncNameDirection};

#[derive(Parser, Debug)]
#[command(name = "repoyard")]
#[command(about = "Synchronize repository mirrors across machines through rclone remotes")]
pub struct Cli {
    /// Path to the repoyard config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increases verbosity, up to twice
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Do not print any output, overrides --verbose
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// How `--repo-name` is matched against repo names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NameMatchMode {
    #[default]
    Exact,
    Contains,
    Subsequence,
}

/// The ways a command can point at one repo. Falls back to the current
/// working directory when no flag is given.
#[derive(Args, Debug, Clone, Default)]
pub struct RepoTarget {
    /// The repo's index name (<repo_id>__<name>)
    #[arg(long = "repo")]
    pub index_name: Option<String>,

    /// The repo's id
    #[arg(long)]
    pub repo_id: Option<String>,

    /// The repo's name
    #[arg(long)]
    pub repo_name: Option<String>,

    /// How --repo-name is matched
    #[arg(long, value_enum, default_value = "exact")]
    pub match_mode: NameMatchMode,

    /// Match --repo-name case-sensitively
    #[arg(long)]
    pub match_case: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialise a fresh repoyard installation
    Init {
        /// Where to put the data directory
        #[arg(long)]
        data_path: Option<PathBuf>,
    },

    /// Create a new repo
    New {
        #[arg(long, short = 's')]
        storage_location: Option<String>,
        #[arg(long, short = 'n')]
        repo_name: Option<String>,
        /// Seed DATA from this directory (moved unless --copy-from-path)
        #[arg(long)]
        from_path: Option<PathBuf>,
        #[arg(long)]
        copy_from_path: bool,
        /// Seed DATA by cloning this git URL
        #[arg(long)]
        git_clone_url: Option<String>,
        #[arg(long)]
        creator_hostname: Option<String>,
        /// Groups for the new repo, in addition to the configured defaults
        #[arg(long, short = 'g')]
        group: Vec<String>,
        /// Skip `git init` in the new DATA directory
        #[arg(long)]
        no_git_init: bool,
    },

    /// Sync one repo with its remote
    Sync {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long, value_enum)]
        sync_direction: Option<SyncDirection>,
        #[arg(long, value_enum, default_value = "careful")]
        sync_setting: SyncSetting,
        /// Parts to sync; all three when omitted
        #[arg(long = "sync-choice", short = 'c', value_enum)]
        sync_choices: Vec<RepoPart>,
        #[arg(long)]
        no_soft_interrupt: bool,
        /// Skip refreshing the group symlink views afterwards
        #[arg(long)]
        no_refresh_symlinks: bool,
    },

    /// Fetch metadata of repos that exist remotely but are unknown here
    SyncMissingMeta {
        #[arg(long = "repo")]
        repo_index_names: Vec<String>,
        #[arg(long = "storage-location", short = 's')]
        storage_locations: Vec<String>,
        #[arg(long, short = 'm')]
        max_concurrent: Option<usize>,
        #[arg(long)]
        no_soft_interrupt: bool,
    },

    /// Add a repo to a group
    AddToGroup {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long, short = 'g')]
        group_name: String,
        /// Careful-sync META afterwards
        #[arg(long)]
        sync_after: bool,
    },

    /// Remove a repo from a group
    RemoveFromGroup {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long, short = 'g')]
        group_name: String,
        #[arg(long)]
        sync_after: bool,
    },

    /// Pull a known repo's DATA down to this machine
    Include {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long)]
        no_soft_interrupt: bool,
    },

    /// Drop a repo's local DATA, leaving the remote untouched
    Exclude {
        #[command(flatten)]
        target: RepoTarget,
        /// Skip the safety sync before removing local data
        #[arg(long)]
        skip_sync: bool,
        #[arg(long)]
        no_soft_interrupt: bool,
    },

    /// Delete a repo locally and remotely, leaving a tombstone
    Delete {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long)]
        no_soft_interrupt: bool,
    },

    /// Rename a repo locally, remotely, or both
    Rename {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long)]
        new_name: String,
        #[arg(long, value_enum, default_value = "both")]
        scope: RenameScope,
    },

    /// Make one side's repo name match the other's
    SyncName {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long, value_enum)]
        direction: SyncNameDirection,
    },

    /// Copy a repo's remote DATA to an arbitrary destination, untracked
    Copy {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long)]
        dest: PathBuf,
        #[arg(long)]
        copy_meta: bool,
        #[arg(long)]
        copy_conf: bool,
        #[arg(long)]
        overwrite: bool,
    },

    /// Overwrite a repo's remote DATA with an arbitrary source directory
    ForcePush {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long)]
        source: PathBuf,
        /// Required confirmation for this destructive operation
        #[arg(long)]
        force: bool,
        #[arg(long)]
        no_soft_interrupt: bool,
    },

    /// Print a repo's local DATA path
    Path {
        #[command(flatten)]
        target: RepoTarget,
    },

    /// Print the repo containing the current working directory
    Which,

    /// Show the sync condition of one repo's parts
    RepoStatus {
        #[command(flatten)]
        target: RepoTarget,
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Show the sync condition of every repo
    YardStatus {
        #[arg(long = "storage-location", short = 's')]
        storage_locations: Vec<String>,
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormat,
        #[arg(long, short = 'm')]
        max_concurrent: Option<usize>,
    },

    /// List repos
    List {
        #[arg(long = "storage-location", short = 's')]
        storage_locations: Vec<String>,
        /// Only repos included on this machine
        #[arg(long)]
        included_only: bool,
        /// Only repos in this group (repeatable)
        #[arg(long = "group", short = 'g')]
        groups: Vec<String>,
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// List a repo's groups
    ListGroups {
        #[command(flatten)]
        target: RepoTarget,
    },

    /// Sync many repos concurrently
    MultiSync {
        #[arg(long = "repo", short = 'r')]
        repo_index_names: Vec<String>,
        #[arg(long = "storage-location", short = 's')]
        storage_locations: Vec<String>,
        #[arg(long, short = 'm')]
        max_concurrent: Option<usize>,
        #[arg(long, value_enum)]
        sync_direction: Option<SyncDirection>,
        #[arg(long, value_enum, default_value = "careful")]
        sync_setting: SyncSetting,
        #[arg(long = "sync-choice", short = 'c', value_enum)]
        sync_choices: Vec<RepoPart>,
        /// Per-repo timeout in seconds
        #[arg(long)]
        task_timeout: Option<u64>,
        #[arg(long)]
        no_soft_interrupt: bool,
        #[arg(long)]
        no_refresh_symlinks: bool,
    },

    /// Rebuild the group symlink views
    CreateUserSymlinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Resolve a repo target to an index name. Ambiguity is an error; there is
/// no interactive picker.
pub fn resolve_repo(config: &Config, yard: &YardMeta, target: &RepoTarget) -> Result<String> {
    if let Some(index_name) = &target.index_name {
        yard.find_index_name(index_name)?;
        return Ok(index_name.clone());
    }
    if let Some(repo_id) = &target.repo_id {
        return match yard.by_id().get(repo_id) {
            Some(repo) => Ok(repo.index_name()),
            None => Err(Error::Lifecycle(format!(
                "no repo with id '{repo_id}' found"
            ))),
        };
    }
    if let Some(repo_name) = &target.repo_name {
        let matches: Vec<&RepoMeta> = yard
            .repos
            .iter()
            .filter(|m| name_matches(&m.name, repo_name, target.match_mode, target.match_case))
            .collect();
        return match matches.as_slice() {
            [] => Err(Error::Lifecycle(format!(
                "no repo matching name '{repo_name}' found"
            ))),
            [only] => Ok(only.index_name()),
            many => Err(Error::Usage(format!(
                "name '{repo_name}' is ambiguous; candidates: {}",
                many.iter()
                    .map(|m| m.index_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        };
    }
    // Fall back to the working directory.
    let cwd = std::env::current_dir()?;
    match repo_from_path(config, &cwd) {
        Some(index_name) => {
            yard.find_index_name(&index_name)?;
            Ok(index_name)
        }
        None => Err(Error::Usage(
            "no repo given and the current directory is not inside a tracked repo".into(),
        )),
    }
}

/// Index name of the repo containing `path`, if it lies under the
/// user-repos tree.
pub fn repo_from_path(config: &Config, path: &std::path::Path) -> Option<String> {
    let resolved = path.canonicalize().ok()?;
    let root = config
        .user_repos_path
        .canonicalize()
        .unwrap_or_else(|_| config.user_repos_path.clone());
    let rel = resolved.strip_prefix(&root).ok()?;
    rel.components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}

fn name_matches(name: &str, pattern: &str, mode: NameMatchMode, case_sensitive: bool) -> bool {
    let (name, pattern) = if case_sensitive {
        (name.to_string(), pattern.to_string())
    } else {
        (name.to_lowercase(), pattern.to_lowercase())
    };
    match mode {
        NameMatchMode::Exact => name == pattern,
        NameMatchMode::Contains => name.contains(&pattern),
        NameMatchMode::Subsequence => is_subsequence(&pattern, &name),
    }
}

/// Whether every char of `needle` appears in `haystack` in order.
fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = haystack.chars();
    needle.chars().all(|c| chars.any(|h| h == c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yard_with(names: &[&str]) -> YardMeta {
        let repos = names
            .iter()
            .enumerate()
            .map(|(i, name)| RepoMeta {
                creation_timestamp_utc: "20240101_000000".into(),
                repo_subid: format!("id{i:03}"),
                name: name.to_string(),
                storage_location: "r1".into(),
                creator_hostname: "h".into(),
                groups: vec![],
                parents: vec![],
            })
            .collect();
        YardMeta { repos }
    }

    #[test]
    fn subsequence_matching() {
        assert!(is_subsequence("nts", "notes"));
        assert!(is_subsequence("", "anything"));
        assert!(!is_subsequence("tsn", "notes"));
    }

    #[test]
    fn name_match_modes() {
        assert!(name_matches("MyNotes", "mynotes", NameMatchMode::Exact, false));
        assert!(!name_matches("MyNotes", "mynotes", NameMatchMode::Exact, true));
        assert!(name_matches("MyNotes", "note", NameMatchMode::Contains, false));
        assert!(name_matches("MyNotes", "mns", NameMatchMode::Subsequence, false));
    }

    #[test]
    fn ambiguous_name_is_a_usage_error() {
        let yard = yard_with(&["notes", "notes-archive"]);
        let config_dir = tempfile::tempdir().unwrap();
        let config = crate::config::Config {
            config_path: config_dir.path().join("config.toml"),
            default_storage_location: "r1".into(),
            repoyard_data_path: config_dir.path().to_path_buf(),
            repo_timestamp_format: crate::config::TimestampFormat::DateAndTime,
            user_repos_path: config_dir.path().join("repos"),
            user_repo_groups_path: config_dir.path().join("groups"),
            storage_locations: Default::default(),
            repo_groups: Default::default(),
            default_repo_groups: vec![],
            repo_subid_character_set: "abc".into(),
            repo_subid_length: 3,
            max_concurrent_rclone_ops: 3,
            single_parent: false,
            sync_before_new_repo: false,
        };
        let target = RepoTarget {
            repo_name: Some("notes".into()),
            match_mode: NameMatchMode::Contains,
            ..Default::default()
        };
        let err = resolve_repo(&config, &yard, &target).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));

        let target = RepoTarget {
            repo_name: Some("notes".into()),
            match_mode: NameMatchMode::Exact,
            ..Default::default()
        };
        let resolved = resolve_repo(&config, &yard, &target).unwrap();
        assert!(resolved.ends_with("__notes"));
    }

    #[test]
    fn cli_parses_a_full_sync_invocation() {
        let cli = Cli::try_parse_from([
            "repoyard",
            "--config",
            "/tmp/config.toml",
            "-v",
            "sync",
            "--repo",
            "20240101_abcde__alpha",
            "--sync-setting",
            "replace",
            "--sync-direction",
            "push",
            "-c",
            "data",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Sync {
                target,
                sync_setting,
                sync_direction,
                sync_choices,
                ..
            } => {
                assert_eq!(target.index_name.as_deref(), Some("20240101_abcde__alpha"));
                assert_eq!(sync_setting, SyncSetting::Replace);
                assert_eq!(sync_direction, Some(SyncDirection::Push));
                assert_eq!(sync_choices, vec![RepoPart::Data]);
            }
            other => panic!("parsed the wrong command: {other:?}"),
        }
    }
}
