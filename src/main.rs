//! The repoyard command-line interface.

use anyhow::Result;
use clap::Parser;

use repoyard::cli::{resolve_repo, Cli, Command, OutputFormat};
use repoyard::config::Config;
use repoyard::error::Error;
use repoyard::executor::SyncSetting;
use repoyard::interrupt::enable_soft_interruption;
use repoyard::meta::YardMeta;
use repoyard::ops;
use repoyard::ops::copy_out::CopyOutOptions;
use repoyard::ops::discover::DiscoverOptions;
use repoyard::ops::{NewRepoOptions, SyncOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        log::LevelFilter::Off
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_user_error() => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(cli: Cli) -> repoyard::Result<()> {
    // init is the one verb that must work without a loadable config.
    if let Command::Init { data_path } = &cli.command {
        let written = ops::init_yard(cli.config.as_deref(), data_path.as_deref())?;
        println!("{}", written.display());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;

    // Sweep locks abandoned by crashed processes. Held locks are never
    // touched, so this is safe alongside concurrent invocations.
    let removed = repoyard::lock::LockManager::new(&config.repoyard_data_path)
        .cleanup_stale_locks(std::time::Duration::from_secs(60 * 60));
    for path in &removed {
        log::info!("removed stale lock file {}", path.display());
    }

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),

        Command::New {
            storage_location,
            repo_name,
            from_path,
            copy_from_path,
            git_clone_url,
            creator_hostname,
            group,
            no_git_init,
        } => {
            let index_name = ops::new_repo(
                &config,
                NewRepoOptions {
                    storage_location,
                    repo_name,
                    from_path,
                    copy_from_path,
                    git_clone_url,
                    creator_hostname,
                    groups: (!group.is_empty()).then_some(group),
                    initialise_git: !no_git_init,
                },
            )
            .await?;
            ops::create_user_symlinks(&config)?;
            println!("{index_name}");
        }

        Command::Sync {
            target,
            sync_direction,
            sync_setting,
            sync_choices,
            no_soft_interrupt,
            no_refresh_symlinks,
        } => {
            if !no_soft_interrupt {
                enable_soft_interruption();
            }
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            let outcomes = ops::sync_repo(
                &config,
                &index_name,
                &SyncOptions {
                    direction: sync_direction,
                    setting: sync_setting,
                    parts: (!sync_choices.is_empty()).then_some(sync_choices),
                    skip_lock: false,
                },
            )
            .await?;
            for (part, outcome) in &outcomes {
                println!(
                    "{part}: {} ({})",
                    if outcome.synced { "synced" } else { "skipped" },
                    outcome.status.condition
                );
            }
            if !no_refresh_symlinks {
                ops::create_user_symlinks(&config)?;
            }
        }

        Command::SyncMissingMeta {
            repo_index_names,
            storage_locations,
            max_concurrent,
            no_soft_interrupt,
        } => {
            if !no_soft_interrupt {
                enable_soft_interruption();
            }
            if !repo_index_names.is_empty() && !storage_locations.is_empty() {
                return Err(Error::Usage(
                    "cannot provide both --repo and --storage-location".into(),
                ));
            }
            let discovered = ops::sync_missing_metas(
                &config,
                &DiscoverOptions {
                    repo_index_names: (!repo_index_names.is_empty()).then_some(repo_index_names),
                    storage_locations: (!storage_locations.is_empty()).then_some(storage_locations),
                    max_concurrent_rclone_ops: max_concurrent,
                },
            )
            .await?;
            for index_name in &discovered {
                println!("{index_name}");
            }
            ops::create_user_symlinks(&config)?;
        }

        Command::AddToGroup {
            target,
            group_name,
            sync_after,
        } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            ops::add_to_group(&config, &index_name, &group_name, sync_after).await?;
            ops::create_user_symlinks(&config)?;
        }

        Command::RemoveFromGroup {
            target,
            group_name,
            sync_after,
        } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            ops::remove_from_group(&config, &index_name, &group_name, sync_after).await?;
            ops::create_user_symlinks(&config)?;
        }

        Command::Include {
            target,
            no_soft_interrupt,
        } => {
            if !no_soft_interrupt {
                enable_soft_interruption();
            }
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            ops::include_repo(&config, &index_name).await?;
            ops::create_user_symlinks(&config)?;
        }

        Command::Exclude {
            target,
            skip_sync,
            no_soft_interrupt,
        } => {
            if !no_soft_interrupt {
                enable_soft_interruption();
            }
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            ops::exclude_repo(&config, &index_name, skip_sync).await?;
            ops::create_user_symlinks(&config)?;
        }

        Command::Delete {
            target,
            no_soft_interrupt,
        } => {
            if !no_soft_interrupt {
                enable_soft_interruption();
            }
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            ops::delete_repo(&config, &index_name).await?;
            ops::create_user_symlinks(&config)?;
        }

        Command::Rename {
            target,
            new_name,
            scope,
        } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            let result = ops::rename_repo(&config, &index_name, &new_name, scope).await?;
            ops::create_user_symlinks(&config)?;
            println!("{result}");
        }

        Command::SyncName { target, direction } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            let result = ops::sync_name(&config, &index_name, direction).await?;
            ops::create_user_symlinks(&config)?;
            println!("{result}");
        }

        Command::Copy {
            target,
            dest,
            copy_meta,
            copy_conf,
            overwrite,
        } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            let written = ops::copy_from_remote(
                &config,
                &index_name,
                &dest,
                &CopyOutOptions {
                    copy_meta,
                    copy_conf,
                    overwrite,
                },
            )
            .await?;
            println!("{}", written.display());
        }

        Command::ForcePush {
            target,
            source,
            force,
            no_soft_interrupt,
        } => {
            if !no_soft_interrupt {
                enable_soft_interruption();
            }
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            ops::force_push_to_remote(&config, &index_name, &source, force).await?;
        }

        Command::Path { target } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            let repo = yard.find_index_name(&index_name)?;
            println!(
                "{}",
                repo.local_part_path(&config, repoyard::meta::RepoPart::Data)
                    .display()
            );
        }

        Command::Which => {
            let cwd = std::env::current_dir()?;
            match repoyard::cli::repo_from_path(&config, &cwd) {
                Some(index_name) => println!("{index_name}"),
                None => {
                    return Err(Error::Usage(
                        "the current directory is not inside a tracked repo".into(),
                    ))
                }
            }
        }

        Command::RepoStatus {
            target,
            output_format,
        } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            let statuses = ops::repo_status(&config, &index_name).await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
                OutputFormat::Text => {
                    println!("{index_name}");
                    for (part, status) in &statuses {
                        let mut line = format!("  {part}: {}", status.condition);
                        if let Some(message) = &status.error_message {
                            line.push_str(&format!(" ({message})"));
                        }
                        println!("{line}");
                    }
                }
            }
        }

        Command::YardStatus {
            storage_locations,
            output_format,
            max_concurrent,
        } => {
            let rows = ops::yard_status(
                &config,
                (!storage_locations.is_empty()).then_some(storage_locations),
                max_concurrent,
            )
            .await?;
            match output_format {
                OutputFormat::Json => {
                    let map: std::collections::BTreeMap<_, _> = rows.into_iter().collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                OutputFormat::Text => {
                    for (index_name, statuses) in rows {
                        println!("{index_name}");
                        for (part, status) in &statuses {
                            println!("  {part}: {}", status.condition);
                        }
                    }
                }
            }
        }

        Command::List {
            storage_locations,
            included_only,
            groups,
            output_format,
        } => {
            let yard = YardMeta::load(&config)?;
            let selected: Vec<_> = yard
                .repos
                .iter()
                .filter(|m| {
                    storage_locations.is_empty()
                        || storage_locations.contains(&m.storage_location)
                })
                .filter(|m| !included_only || m.check_included(&config))
                .filter(|m| {
                    groups.is_empty() || groups.iter().all(|g| m.groups.contains(g))
                })
                .collect();
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&selected)?),
                OutputFormat::Text => {
                    for repo in selected {
                        let included = if repo.check_included(&config) {
                            "included"
                        } else {
                            "excluded"
                        };
                        println!(
                            "{}\t{}\t{included}",
                            repo.index_name(),
                            repo.storage_location
                        );
                    }
                }
            }
        }

        Command::ListGroups { target } => {
            let yard = YardMeta::load(&config)?;
            let index_name = resolve_repo(&config, &yard, &target)?;
            let repo = yard.find_index_name(&index_name)?;
            for group in &repo.groups {
                println!("{group}");
            }
        }

        Command::MultiSync {
            repo_index_names,
            storage_locations,
            max_concurrent,
            sync_direction,
            sync_setting,
            sync_choices,
            task_timeout,
            no_soft_interrupt,
            no_refresh_symlinks,
        } => {
            if !no_soft_interrupt {
                enable_soft_interruption();
            }
            // REPLACE and FORCE fan out badly; require per-repo invocations.
            if sync_setting != SyncSetting::Careful && sync_direction.is_none() {
                return Err(Error::Usage(
                    "multi-sync with a non-careful setting needs an explicit --sync-direction"
                        .into(),
                ));
            }
            ops::multi_sync(
                &config,
                (!repo_index_names.is_empty()).then_some(repo_index_names),
                (!storage_locations.is_empty()).then_some(storage_locations),
                &SyncOptions {
                    direction: sync_direction,
                    setting: sync_setting,
                    parts: (!sync_choices.is_empty()).then_some(sync_choices),
                    skip_lock: false,
                },
                max_concurrent,
                task_timeout.map(std::time::Duration::from_secs),
            )
            .await?;
            if !no_refresh_symlinks {
                ops::create_user_symlinks(&config)?;
            }
        }

        Command::CreateUserSymlinks => {
            ops::create_user_symlinks(&config)?;
        }
    }

    Ok(())
}
