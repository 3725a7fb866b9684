//! Repo creation: id generation, DATA materialisation, META layout.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;

use crate::config::Config;
use crate::consts;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::meta::{self, RepoMeta, RepoPart, YardMeta};

#[derive(Debug, Clone, Default)]
pub struct NewRepoOptions {
    pub storage_location: Option<String>,
    pub repo_name: Option<String>,
    /// Seed DATA from this directory instead of starting empty.
    pub from_path: Option<PathBuf>,
    /// Copy rather than move the `from_path` contents.
    pub copy_from_path: bool,
    /// Seed DATA by cloning this git URL.
    pub git_clone_url: Option<String>,
    pub creator_hostname: Option<String>,
    pub groups: Option<Vec<String>>,
    pub initialise_git: bool,
}

/// Create a new repo and return its index name.
pub async fn new_repo(config: &Config, opts: NewRepoOptions) -> Result<String> {
    let storage_location = opts
        .storage_location
        .clone()
        .unwrap_or_else(|| config.default_storage_location.clone());
    config.storage_location(&storage_location)?;

    let from_path = match &opts.from_path {
        Some(path) => Some(path.canonicalize().map_err(|e| {
            Error::Usage(format!("from-path '{}' is not usable: {e}", path.display()))
        })?),
        None => None,
    };
    if from_path.is_none() && opts.copy_from_path {
        return Err(Error::Usage(
            "--copy-from-path requires --from-path".into(),
        ));
    }
    if from_path.is_some() && opts.git_clone_url.is_some() {
        return Err(Error::Usage(
            "--from-path and --git-clone-url are mutually exclusive".into(),
        ));
    }

    // The name defaults from the source directory or the clone URL.
    let name = match (&opts.repo_name, &from_path, &opts.git_clone_url) {
        (Some(name), _, _) => name.clone(),
        (None, Some(path), _) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Usage("cannot derive a repo name from from-path".into()))?,
        (None, None, Some(url)) => git_url_basename(url)
            .ok_or_else(|| Error::Usage("cannot derive a repo name from the clone URL".into()))?,
        (None, None, None) => {
            return Err(Error::Usage(
                "a repo name, a from-path, or a git clone URL is required".into(),
            ))
        }
    };

    // Optionally pull metadata first so id generation sees repos created on
    // other machines since the last sync.
    if config.sync_before_new_repo {
        crate::ops::discover::sync_missing_metas(
            config,
            &crate::ops::discover::DiscoverOptions {
                storage_locations: Some(vec![storage_location.clone()]),
                ..Default::default()
            },
        )
        .await?;
    }

    let yard = YardMeta::load(config)?;
    let existing_ids: HashSet<String> = yard.repos.iter().map(|m| m.repo_id()).collect();
    let (creation_timestamp, repo_subid) = meta::generate_unique_repo_id(config, &existing_ids)?;

    let mut groups = config.default_repo_groups.clone();
    for group in opts.groups.unwrap_or_default() {
        if !groups.contains(&group) {
            groups.push(group);
        }
    }

    let repo = RepoMeta {
        creation_timestamp_utc: creation_timestamp,
        repo_subid,
        name,
        storage_location,
        creator_hostname: opts
            .creator_hostname
            .clone()
            .unwrap_or_else(crate::hostname),
        groups,
        parents: Vec::new(),
    };
    repo.save(config)?;

    let data_path = repo.local_part_path(config, RepoPart::Data);
    let conf_path = repo.local_part_path(config, RepoPart::Conf);
    fs::create_dir_all(&conf_path)?;

    match (&from_path, &opts.git_clone_url) {
        (Some(source), _) => {
            if opts.copy_from_path {
                fsutil::copy_dir_all(source, &data_path)?;
            } else {
                if let Some(parent) = data_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(source, &data_path)?;
            }
        }
        (None, Some(url)) => {
            git_clone(url, &data_path).await?;
        }
        (None, None) => {
            fs::create_dir_all(&data_path)?;
        }
    }

    // Per-repo exclude file so the usual build debris never syncs.
    fs::write(
        conf_path.join(consts::RCLONE_EXCLUDE_FILE),
        consts::DEFAULT_RCLONE_EXCLUDE,
    )?;

    if opts.initialise_git && !data_path.join(".git").exists() {
        log::info!("initialising git repository in {}", data_path.display());
        let status = tokio::process::Command::new("git")
            .arg("init")
            .current_dir(&data_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {}
            _ => log::warn!("failed to initialise git repository"),
        }
    }

    meta::refresh_yard_meta_async(config).await?;
    Ok(repo.index_name())
}

async fn git_clone(url: &str, dest: &std::path::Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let output = tokio::process::Command::new("git")
        .args(["clone", url])
        .arg(dest)
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::Lifecycle(format!(
            "git clone of '{url}' failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn git_url_basename(url: &str) -> Option<String> {
    let tail = url.trim_end_matches('/').rsplit(['/', ':']).next()?;
    let name = tail.strip_suffix(".git").unwrap_or(tail);
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_url_basenames() {
        assert_eq!(
            git_url_basename("https://example.com/org/proj.git").as_deref(),
            Some("proj")
        );
        assert_eq!(
            git_url_basename("git@example.com:org/other").as_deref(),
            Some("other")
        );
        assert_eq!(git_url_basename("").as_deref(), None);
    }
}
