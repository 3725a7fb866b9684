//! Metadata modifications: group membership and parent linkages.

use std::collections::HashSet;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::SyncSetting;
use crate::meta::{self, RepoMeta, RepoPart, YardMeta};
use crate::ops::sync::{sync_repo, SyncOptions};

/// Add a repo to a group, optionally careful-syncing META afterwards.
pub async fn add_to_group(
    config: &Config,
    index_name: &str,
    group_name: &str,
    sync_after: bool,
) -> Result<()> {
    meta::validate_group_name(group_name)?;
    let yard = YardMeta::load(config)?;
    let mut repo = yard.find_index_name(index_name)?;

    if repo.groups.iter().any(|g| g == group_name) {
        return Err(Error::Lifecycle(format!(
            "repo '{index_name}' is already in group '{group_name}'"
        )));
    }

    // Groups configured with unique names refuse a second member with the
    // same repo name.
    if let Some(group_config) = config.repo_groups.get(group_name) {
        if group_config.unique_repo_names {
            let clash = yard.repos.iter().any(|other| {
                other.index_name() != index_name
                    && other.groups.iter().any(|g| g == group_name)
                    && other.name == repo.name
            });
            if clash {
                return Err(Error::Lifecycle(format!(
                    "group '{group_name}' requires unique repo names and already \
                     has a repo named '{}'",
                    repo.name
                )));
            }
        }
    }

    repo.groups.push(group_name.to_string());
    save_and_maybe_sync(config, &repo, sync_after).await
}

/// Remove a repo from a group, optionally careful-syncing META afterwards.
pub async fn remove_from_group(
    config: &Config,
    index_name: &str,
    group_name: &str,
    sync_after: bool,
) -> Result<()> {
    let yard = YardMeta::load(config)?;
    let mut repo = yard.find_index_name(index_name)?;

    let before = repo.groups.len();
    repo.groups.retain(|g| g != group_name);
    if repo.groups.len() == before {
        return Err(Error::Lifecycle(format!(
            "repo '{index_name}' is not in group '{group_name}'"
        )));
    }
    save_and_maybe_sync(config, &repo, sync_after).await
}

/// Replace a repo's parent set. Parents are repo ids; cycles are refused,
/// as is more than one parent when `single_parent` is configured.
pub async fn set_parents(
    config: &Config,
    index_name: &str,
    parents: Vec<String>,
    sync_after: bool,
) -> Result<()> {
    let yard = YardMeta::load(config)?;
    let mut repo = yard.find_index_name(index_name)?;

    let unique: HashSet<&String> = parents.iter().collect();
    if unique.len() != parents.len() {
        return Err(Error::Lifecycle("parents must be unique".into()));
    }
    if config.single_parent && parents.len() > 1 {
        return Err(Error::Lifecycle(
            "single_parent is enabled; a repo can have at most one parent".into(),
        ));
    }

    let child_id = repo.repo_id();
    for parent_id in &parents {
        if *parent_id == child_id {
            return Err(Error::Lifecycle("a repo cannot be its own parent".into()));
        }
        if !yard.by_id().contains_key(parent_id) {
            return Err(Error::Lifecycle(format!(
                "parent repo id '{parent_id}' not found"
            )));
        }
        if reaches(&yard, parent_id, &child_id) {
            return Err(Error::Lifecycle(format!(
                "adding parent '{parent_id}' would create a cycle"
            )));
        }
    }

    repo.parents = parents;
    save_and_maybe_sync(config, &repo, sync_after).await
}

/// DFS from `start` along parent edges; true if `target` is reachable.
/// Used to check that the would-be parent does not already descend from the
/// child.
fn reaches(yard: &YardMeta, start: &str, target: &str) -> bool {
    let by_id = yard.by_id();
    let mut stack = vec![start.to_string()];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(repo) = by_id.get(&id) {
            stack.extend(repo.parents.iter().cloned());
        }
    }
    false
}

async fn save_and_maybe_sync(config: &Config, repo: &RepoMeta, sync_after: bool) -> Result<()> {
    repo.save(config)?;
    meta::refresh_yard_meta_async(config).await?;
    if sync_after {
        sync_repo(
            config,
            &repo.index_name(),
            &SyncOptions {
                setting: SyncSetting::Careful,
                parts: Some(vec![RepoPart::Meta]),
                ..Default::default()
            },
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id_suffix: &str, name: &str, parents: Vec<String>) -> RepoMeta {
        RepoMeta {
            creation_timestamp_utc: "20240101_000000".into(),
            repo_subid: id_suffix.into(),
            name: name.into(),
            storage_location: "r1".into(),
            creator_hostname: "h".into(),
            groups: vec![],
            parents,
        }
    }

    #[test]
    fn cycle_detection_follows_parent_chains() {
        // c -> b -> a (edges point at parents)
        let a = repo("aaaaa", "a", vec![]);
        let b = repo("bbbbb", "b", vec![a.repo_id()]);
        let c = repo("ccccc", "c", vec![b.repo_id()]);
        let yard = YardMeta {
            repos: vec![a.clone(), b.clone(), c.clone()],
        };
        // Making a a child of c's chain is fine; making a a parent of
        // itself's ancestor line is the cycle.
        assert!(reaches(&yard, &c.repo_id(), &a.repo_id()));
        assert!(!reaches(&yard, &a.repo_id(), &c.repo_id()));
    }

    #[test]
    fn self_loops_terminate() {
        let mut a = repo("aaaaa", "a", vec![]);
        a.parents = vec![a.repo_id()];
        let yard = YardMeta { repos: vec![a.clone()] };
        assert!(reaches(&yard, &a.repo_id(), &a.repo_id()));
        assert!(!reaches(&yard, &a.repo_id(), "nope"));
    }
}
