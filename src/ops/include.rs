//! Include a repo on this machine: pull its DATA down and line up records.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{SyncDirection, SyncSetting};
use crate::lock::LockManager;
use crate::meta::{RepoPart, YardMeta};
use crate::ops::sync::{sync_repo, SyncOptions};

/// Include a repo: force-PULL DATA, then a careful sync of META and CONF.
///
/// The force is required because the careful evaluator classifies
/// local-absent + remote-present as EXCLUDED, which is exactly the state an
/// include starts from. CONF is not local yet either, so this first DATA
/// transfer runs unfiltered; filter files take effect from the next sync.
pub async fn include_repo(config: &Config, index_name: &str) -> Result<()> {
    let yard = YardMeta::load(config)?;
    let repo = yard.find_index_name(index_name)?;

    if repo.check_included(config) {
        return Err(Error::Lifecycle(format!(
            "repo '{index_name}' is already included"
        )));
    }

    let lock_manager = LockManager::new(&config.repoyard_data_path);
    let _guard = lock_manager.repo_sync_lock_async(index_name).await?;

    sync_repo(
        config,
        index_name,
        &SyncOptions {
            direction: Some(SyncDirection::Pull),
            setting: SyncSetting::Force,
            parts: Some(vec![RepoPart::Data]),
            skip_lock: true,
        },
    )
    .await?;

    sync_repo(
        config,
        index_name,
        &SyncOptions {
            direction: None,
            setting: SyncSetting::Careful,
            parts: Some(vec![RepoPart::Meta, RepoPart::Conf]),
            skip_lock: true,
        },
    )
    .await?;

    Ok(())
}
