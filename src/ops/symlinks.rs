//! Symlink views: one directory per group under the user repo-groups path,
//! with a link per included member repo.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, RepoGroupConfig, RepoTitleMode};
use crate::error::{Error, Result};
use crate::meta::{RepoMeta, RepoPart, YardMeta};

/// Rebuild the group symlink tree: create missing links, retarget moved
/// ones, remove stale ones, and prune empty non-group directories. Regular
/// files found inside the tree are a hard error; this path belongs to
/// repoyard alone.
pub fn create_user_symlinks(config: &Config) -> Result<()> {
    let yard = YardMeta::load(config)?;
    let mut repos: Vec<&RepoMeta> = yard
        .repos
        .iter()
        .filter(|m| m.check_included(config))
        .collect();
    repos.sort_by_key(|m| {
        (
            m.creation_datetime().ok(),
            m.index_name(),
        )
    });

    // Groups come from the config plus any group named in a repo's META.
    let mut groups: BTreeMap<String, RepoGroupConfig> = config.repo_groups.clone();
    for repo in &repos {
        for group in &repo.groups {
            groups.entry(group.clone()).or_default();
        }
    }

    // Plan all links before touching the tree.
    let mut links: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (group_name, group_config) in &groups {
        let dir_name = group_config
            .symlink_name
            .clone()
            .unwrap_or_else(|| group_name.clone());
        let mut used_titles: HashMap<String, usize> = HashMap::new();
        for repo in &repos {
            if !repo.groups.iter().any(|g| g == group_name) {
                continue;
            }
            let mut title = link_title(repo, group_config.repo_title_mode);
            let seen = used_titles.entry(title.clone()).or_insert(0);
            *seen += 1;
            if *seen > 1 {
                title = format!("{title} ({seen})");
            }
            links.push((
                repo.local_part_path(config, RepoPart::Data),
                config.user_repo_groups_path.join(&dir_name).join(title),
            ));
        }
    }
    let planned: HashSet<&PathBuf> = links.iter().map(|(_, link)| link).collect();

    // Remove symlinks that are no longer planned, and refuse to proceed if
    // anything that is not a symlink lives in the tree.
    if config.user_repo_groups_path.exists() {
        sweep(&config.user_repo_groups_path, &planned)?;
    }

    for (target, link) in &links {
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        // symlink_metadata also catches broken links, which exists() misses.
        if fs::symlink_metadata(link).is_ok() {
            let current = fs::read_link(link)?;
            if &current == target {
                continue;
            }
            fs::remove_file(link)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, link)?;
    }

    prune_empty_non_group_dirs(
        &config.user_repo_groups_path,
        &config.user_repo_groups_path,
        &groups,
    )?;
    Ok(())
}

fn link_title(repo: &RepoMeta, mode: RepoTitleMode) -> String {
    match mode {
        RepoTitleMode::IndexName => repo.index_name(),
        RepoTitleMode::DatetimeAndName => {
            format!("{}__{}", repo.creation_timestamp_utc, repo.name)
        }
        RepoTitleMode::Name => repo.name.clone(),
    }
}

/// Remove unplanned symlinks; error on any regular file.
fn sweep(dir: &Path, planned: &HashSet<&PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            if !planned.contains(&path) {
                fs::remove_file(&path)?;
            }
        } else if file_type.is_dir() {
            sweep(&path, planned)?;
        } else {
            return Err(Error::Lifecycle(format!(
                "'{}' is inside the user repo-groups path but is not a symlink",
                path.display()
            )));
        }
    }
    Ok(())
}

fn prune_empty_non_group_dirs(
    root: &Path,
    dir: &Path,
    groups: &BTreeMap<String, RepoGroupConfig>,
) -> Result<()> {
    if !dir.exists() || fs::symlink_metadata(dir)?.is_symlink() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            prune_empty_non_group_dirs(root, &entry.path(), groups)?;
        }
    }
    if dir == root {
        return Ok(());
    }
    let rel = dir
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let is_group_dir = groups
        .iter()
        .any(|(name, gc)| gc.symlink_name.as_deref().unwrap_or(name) == rel);
    if !is_group_dir && fs::read_dir(dir)?.next().is_none() {
        fs::remove_dir(dir)?;
    }
    Ok(())
}
