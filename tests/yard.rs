//! Filesystem-level integration tests: repo creation and layout, the
//! local-alias no-op path, deletion, symlink views, and the destination
//! guards. Nothing here shells out to rclone.

use std::fs;
use std::path::Path;

use repoyard::config::Config;
use repoyard::consts;
use repoyard::error::Error;
use repoyard::meta::{RepoPart, YardMeta};
use repoyard::ops::copy_out::CopyOutOptions;
use repoyard::ops::{self, NewRepoOptions, SyncOptions};

fn write_local_config(dir: &Path) -> Config {
    let data = dir.join(".repoyard");
    let body = format!(
        r#"
default_storage_location = "fake"
repoyard_data_path = "{data}"
repo_timestamp_format = "date_and_time"
user_repos_path = "{root}/repos"
user_repo_groups_path = "{root}/repo-groups"
default_repo_groups = ["all"]
repo_subid_character_set = "abcdefghijklmnopqrstuvwxyz0123456789"
repo_subid_length = 5
max_concurrent_rclone_ops = 3

[storage_locations.fake]
storage_type = "local"
store_path = "{data}/fake_store"

[repo_groups.work]
repo_title_mode = "name"
"#,
        data = data.display(),
        root = dir.display()
    );
    let path = dir.join("config.toml");
    fs::write(&path, body).unwrap();
    Config::load(Some(&path)).unwrap()
}

async fn create_repo(config: &Config, name: &str) -> String {
    ops::new_repo(
        config,
        NewRepoOptions {
            repo_name: Some(name.to_string()),
            initialise_git: false,
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn new_repo_lays_out_meta_conf_and_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());

    let index_name = create_repo(&config, "alpha").await;
    assert!(index_name.ends_with("__alpha"));

    let store_dir = config.local_store_path().join("fake").join(&index_name);
    assert!(store_dir.join(consts::REPO_META_FILE).is_file());
    assert!(store_dir.join(consts::REPO_CONF_DIR).is_dir());
    assert!(store_dir
        .join(consts::REPO_CONF_DIR)
        .join(consts::RCLONE_EXCLUDE_FILE)
        .is_file());
    assert!(config.user_repos_path.join(&index_name).is_dir());

    // The global index knows the repo, and it carries the default group.
    let yard = YardMeta::load(&config).unwrap();
    let repo = yard.find_index_name(&index_name).unwrap();
    assert_eq!(repo.name, "alpha");
    assert_eq!(repo.groups, vec!["all".to_string()]);
    assert!(repo.check_included(&config));
}

#[tokio::test]
async fn new_repo_from_path_moves_content_and_defaults_name() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());

    let source = dir.path().join("seed-project");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::write(source.join("sub/file.txt"), "content").unwrap();

    let index_name = ops::new_repo(
        &config,
        NewRepoOptions {
            from_path: Some(source.clone()),
            initialise_git: false,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(index_name.ends_with("__seed-project"));
    assert!(!source.exists());
    let data = config.user_repos_path.join(&index_name);
    assert_eq!(
        fs::read_to_string(data.join("sub/file.txt")).unwrap(),
        "content"
    );
}

#[tokio::test]
async fn sync_on_local_alias_storage_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "alpha").await;

    let outcomes = ops::sync_repo(&config, &index_name, &SyncOptions::default())
        .await
        .unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn sync_of_unknown_repo_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    create_repo(&config, "alpha").await;

    let err = ops::sync_repo(&config, "20990101_000000_zzzzz__ghost", &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Lifecycle(_)));
}

#[tokio::test]
async fn delete_on_local_storage_removes_all_traces() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "doomed").await;

    ops::delete_repo(&config, &index_name).await.unwrap();

    assert!(!config.user_repos_path.join(&index_name).exists());
    assert!(!config
        .local_store_path()
        .join("fake")
        .join(&index_name)
        .exists());
    let yard = YardMeta::load(&config).unwrap();
    assert!(yard.find_index_name(&index_name).is_err());
}

#[tokio::test]
async fn exclude_refuses_local_storage_and_unknown_repos() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "alpha").await;

    let err = ops::exclude_repo(&config, &index_name, true).await.unwrap_err();
    assert!(err.to_string().contains("local storage location"));

    let err = ops::exclude_repo(&config, "20990101_000000_zzzzz__ghost", true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Lifecycle(_)));
}

#[tokio::test]
async fn group_membership_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "alpha").await;

    ops::add_to_group(&config, &index_name, "work", false)
        .await
        .unwrap();
    let yard = YardMeta::load(&config).unwrap();
    let repo = yard.find_index_name(&index_name).unwrap();
    assert!(repo.groups.contains(&"work".to_string()));

    // Twice is a conflict.
    let err = ops::add_to_group(&config, &index_name, "work", false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Lifecycle(_)));

    ops::remove_from_group(&config, &index_name, "work", false)
        .await
        .unwrap();
    let yard = YardMeta::load(&config).unwrap();
    let repo = yard.find_index_name(&index_name).unwrap();
    assert!(!repo.groups.contains(&"work".to_string()));
}

#[tokio::test]
async fn unique_name_groups_reject_a_second_member_with_the_same_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_local_config(dir.path());
    config
        .repo_groups
        .get_mut("work")
        .unwrap()
        .unique_repo_names = true;

    let first = create_repo(&config, "notes").await;
    let second = create_repo(&config, "notes").await;
    ops::add_to_group(&config, &first, "work", false).await.unwrap();
    let err = ops::add_to_group(&config, &second, "work", false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unique repo names"));
}

#[tokio::test]
async fn parent_cycles_and_single_parent_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let a = create_repo(&config, "a").await;
    let b = create_repo(&config, "b").await;
    let c = create_repo(&config, "c").await;

    let id_of = |index: &str| repoyard::meta::extract_repo_id(index).unwrap();

    ops::set_parents(&config, &b, vec![id_of(&a)], false).await.unwrap();
    ops::set_parents(&config, &c, vec![id_of(&b)], false).await.unwrap();

    // a -> c would close the loop a <- b <- c.
    let err = ops::set_parents(&config, &a, vec![id_of(&c)], false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));

    let mut strict = write_local_config(dir.path());
    strict.single_parent = true;
    let err = ops::set_parents(&strict, &c, vec![id_of(&a), id_of(&b)], false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("single_parent"));
}

#[tokio::test]
async fn symlink_views_track_group_membership() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "alpha").await;
    ops::add_to_group(&config, &index_name, "work", false)
        .await
        .unwrap();

    ops::create_user_symlinks(&config).unwrap();

    // The "work" group uses the plain-name title mode.
    let link = config.user_repo_groups_path.join("work").join("alpha");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(
        fs::read_link(&link).unwrap(),
        config.user_repos_path.join(&index_name)
    );
    // The default group uses the index-name mode.
    assert!(config
        .user_repo_groups_path
        .join("all")
        .join(&index_name)
        .exists());

    // Dropping the group removes the link on the next rebuild.
    ops::remove_from_group(&config, &index_name, "work", false)
        .await
        .unwrap();
    ops::create_user_symlinks(&config).unwrap();
    assert!(fs::symlink_metadata(&link).is_err());
}

#[tokio::test]
async fn copy_out_refuses_managed_destinations() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "alpha").await;

    for dest in [
        config.repoyard_data_path.join("copy_here"),
        config.user_repos_path.join("copy_here"),
    ] {
        let err = ops::copy_from_remote(&config, &index_name, &dest, &CopyOutOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("managed storage"), "{err}");
    }

    // An existing destination needs --overwrite; checked before any remote
    // traffic, so it fails cleanly even on local-alias storage.
    let dest = dir.path().join("existing");
    fs::create_dir_all(&dest).unwrap();
    let err = ops::copy_from_remote(&config, &index_name, &dest, &CopyOutOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--overwrite"));
}

#[tokio::test]
async fn force_push_requires_the_force_flag() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "alpha").await;

    let err = ops::force_push_to_remote(&config, &index_name, dir.path(), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--force"));
}

#[tokio::test]
async fn multi_sync_rejects_conflicting_selectors() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let index_name = create_repo(&config, "alpha").await;

    let err = ops::multi_sync(
        &config,
        Some(vec![index_name]),
        Some(vec!["fake".to_string()]),
        &SyncOptions::default(),
        None,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Usage(_)));
}

#[tokio::test]
async fn multi_sync_over_local_repos_settles_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    for name in ["r0", "r1", "r2"] {
        create_repo(&config, name).await;
    }

    let rows = ops::multi_sync(&config, None, None, &SyncOptions::default(), None, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn rename_of_local_only_layout_moves_every_keyed_directory() {
    // The LOCAL half of a rename is pure filesystem work; drive it through
    // the public op on a runtime and inspect the tree.
    let dir = tempfile::tempdir().unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let config = write_local_config(dir.path());
        let index_name = create_repo(&config, "oldname").await;
        // Seed a sync-record directory so the rename has one to carry.
        let record_dir = config.local_sync_records_path().join(&index_name);
        fs::create_dir_all(&record_dir).unwrap();
        fs::write(record_dir.join("data.rec"), "{}").unwrap();

        let new_index = ops::rename_repo(
            &config,
            &index_name,
            "newname",
            ops::RenameScope::Local,
        )
        .await
        .unwrap();

        let (old_id, _) = repoyard::meta::parse_index_name(&index_name).unwrap();
        assert_eq!(new_index, format!("{old_id}__newname"));
        assert!(config.user_repos_path.join(&new_index).is_dir());
        assert!(!config.user_repos_path.join(&index_name).exists());
        assert!(config
            .local_store_path()
            .join("fake")
            .join(&new_index)
            .join(consts::REPO_META_FILE)
            .is_file());
        assert!(config
            .local_sync_records_path()
            .join(&new_index)
            .join("data.rec")
            .is_file());

        // The reconstructed name follows the directory.
        let yard = YardMeta::load(&config).unwrap();
        assert_eq!(yard.find_index_name(&new_index).unwrap().name, "newname");
    });
}

#[test]
fn repo_part_paths_follow_the_documented_layout() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_local_config(dir.path());
    let meta = repoyard::meta::RepoMeta {
        creation_timestamp_utc: "20240615_103000".into(),
        repo_subid: "ab3x9".into(),
        name: "alpha".into(),
        storage_location: "fake".into(),
        creator_hostname: "hostA".into(),
        groups: vec![],
        parents: vec![],
    };
    let index = meta.index_name();

    assert_eq!(
        meta.local_part_path(&config, RepoPart::Data),
        config.user_repos_path.join(&index)
    );
    assert!(meta
        .local_record_path(&config, RepoPart::Conf)
        .ends_with(format!("sync_records/{index}/conf.rec")));
    let remote = meta.remote_part_path(&config, RepoPart::Meta).unwrap();
    assert!(remote.ends_with(format!("repos/{index}/repometa.toml")));
    let record = meta.remote_record_path(&config, RepoPart::Data).unwrap();
    assert!(record.ends_with(format!("sync_records/{index}/data.rec")));
}
