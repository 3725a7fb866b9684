//! Copy a repo's remote contents to an arbitrary destination with no
//! tracking, records, or inclusion.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::consts;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::meta::{self, RepoPart, YardMeta};
use crate::rclone::{self, TransferOpts};
use crate::remote_index;

#[derive(Debug, Clone, Default)]
pub struct CopyOutOptions {
    pub copy_meta: bool,
    pub copy_conf: bool,
    pub overwrite: bool,
}

/// Download a repo's remote DATA (and optionally META and CONF) to
/// `dest_path`, which must lie outside both the managed data path and the
/// user-repos path.
pub async fn copy_from_remote(
    config: &Config,
    index_name: &str,
    dest_path: &Path,
    opts: &CopyOutOptions,
) -> Result<PathBuf> {
    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;

    let dest_path = absolutize(dest_path)?;
    for (root, label) in [
        (&config.repoyard_data_path, "repoyard data path"),
        (&config.user_repos_path, "user repos path"),
    ] {
        if fsutil::is_within(&dest_path, root) {
            return Err(Error::Lifecycle(format!(
                "destination '{}' is within the {label} '{}'; copies must \
                 land outside managed storage",
                dest_path.display(),
                root.display()
            )));
        }
    }
    if dest_path.exists() && !opts.overwrite {
        return Err(Error::Lifecycle(format!(
            "destination '{}' already exists; use --overwrite to overwrite",
            dest_path.display()
        )));
    }

    let repo_id = repo.repo_id();
    let storage_location = repo.storage_location.clone();
    let remote_index_name =
        remote_index::find_remote_repo_by_id(config, &storage_location, &repo_id)
            .await?
            .ok_or_else(|| {
                Error::Lifecycle(format!(
                    "repo '{index_name}' not found on remote storage '{storage_location}'"
                ))
            })?;

    let sl = repo.storage_config(config)?;
    let rclone_config = config.rclone_config_path();
    let remote_data = meta::remote_part_path(sl, &remote_index_name, RepoPart::Data);

    log::info!(
        "copying DATA from {} to {}",
        rclone::spec(&storage_location, &remote_data),
        dest_path.display()
    );
    fs::create_dir_all(&dest_path)?;
    rclone::copy(
        &rclone_config,
        &storage_location,
        &remote_data,
        "",
        &dest_path,
        &TransferOpts::default(),
    )
    .await?;

    if opts.copy_meta {
        let remote_meta = meta::remote_part_path(sl, &remote_index_name, RepoPart::Meta);
        let dest_meta = dest_path.join(consts::REPO_META_FILE);
        if let Err(e) =
            rclone::copyto(&rclone_config, &storage_location, &remote_meta, "", &dest_meta).await
        {
            log::warn!("failed to copy META: {e}");
        }
    }

    if opts.copy_conf {
        let remote_conf = meta::remote_part_path(sl, &remote_index_name, RepoPart::Conf);
        let dest_conf = dest_path.join(consts::REPO_CONF_DIR);
        fs::create_dir_all(&dest_conf)?;
        if let Err(e) = rclone::copy(
            &rclone_config,
            &storage_location,
            &remote_conf,
            "",
            &dest_conf,
            &TransferOpts::default(),
        )
        .await
        {
            log::warn!("failed to copy CONF: {e}");
        }
    }

    Ok(dest_path)
}

/// Absolute form of a possibly not-yet-existing path; canonicalizing the
/// nearest existing ancestor keeps the containment checks honest against
/// symlinks.
fn absolutize(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Usage(format!("invalid destination '{}'", path.display())))?;
    let base = if parent.as_os_str().is_empty() {
        std::env::current_dir()?
    } else {
        parent
            .canonicalize()
            .unwrap_or_else(|_| parent.to_path_buf())
    };
    Ok(base.join(file_name))
}
