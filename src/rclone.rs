//! Thin async wrappers around the rclone binary.
//!
//! Every operation is one subprocess invocation awaited to completion,
//! yielding `(returncode, stdout, stderr)`. A remote is addressed as
//! `<remote>:<path>`; an empty remote name means a bare local path.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{Error, Result};

/// One entry of `rclone lsjson` output.
#[derive(Debug, Clone, Deserialize)]
pub struct LsEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(rename = "IsDir")]
    pub is_dir: bool,
}

/// Include/exclude/filter rules threaded into transfer commands, plus the
/// backup directory receiving displaced destination files.
#[derive(Debug, Clone, Default)]
pub struct TransferOpts {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub filter: Vec<String>,
    pub include_file: Option<std::path::PathBuf>,
    pub exclude_file: Option<std::path::PathBuf>,
    pub filters_file: Option<std::path::PathBuf>,
    /// Full rclone spec (`remote:path` or a local path) for `--backup-dir`.
    pub backup_dir: Option<String>,
    pub dry_run: bool,
}

/// Format a remote + path pair as an rclone location spec.
pub fn spec(remote: &str, path: &Path) -> String {
    if remote.is_empty() {
        path.display().to_string()
    } else {
        format!("{}:{}", remote, path.display())
    }
}

fn base_cmd(cmd_name: &str, rclone_config: &Path) -> Vec<String> {
    vec![
        "rclone".to_string(),
        cmd_name.to_string(),
        "--config".to_string(),
        rclone_config.display().to_string(),
    ]
}

fn transfer_cmd(
    cmd_name: &str,
    rclone_config: &Path,
    source: &str,
    source_path: &Path,
    dest: &str,
    dest_path: &Path,
    opts: &TransferOpts,
) -> Vec<String> {
    let mut cmd = base_cmd(cmd_name, rclone_config);
    cmd.push(spec(source, source_path));
    cmd.push(spec(dest, dest_path));
    if opts.dry_run {
        cmd.push("--dry-run".to_string());
    }
    for rule in &opts.include {
        cmd.push("--include".to_string());
        cmd.push(rule.clone());
    }
    if let Some(file) = &opts.include_file {
        cmd.push("--include-from".to_string());
        cmd.push(file.display().to_string());
    }
    for rule in &opts.exclude {
        cmd.push("--exclude".to_string());
        cmd.push(rule.clone());
    }
    if let Some(file) = &opts.exclude_file {
        cmd.push("--exclude-from".to_string());
        cmd.push(file.display().to_string());
    }
    for rule in &opts.filter {
        cmd.push("--filter".to_string());
        cmd.push(rule.clone());
    }
    if let Some(file) = &opts.filters_file {
        cmd.push("--filter-from".to_string());
        cmd.push(file.display().to_string());
    }
    if let Some(backup) = &opts.backup_dir {
        cmd.push("--backup-dir".to_string());
        cmd.push(backup.clone());
    }
    cmd
}

/// Run a command to completion, capturing output.
pub async fn run(cmd: &[String]) -> Result<(i32, String, String)> {
    log::debug!("running: {}", cmd.join(" "));
    let output = Command::new(&cmd[0])
        .args(&cmd[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    let code = output.status.code().unwrap_or(-1);
    Ok((
        code,
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

async fn run_checked(cmd: &[String]) -> Result<()> {
    let (code, stdout, stderr) = run(cmd).await?;
    if code != 0 {
        return Err(Error::SyncFailed { stdout, stderr });
    }
    Ok(())
}

/// `rclone copy` — additive copy of a tree.
pub async fn copy(
    rclone_config: &Path,
    source: &str,
    source_path: &Path,
    dest: &str,
    dest_path: &Path,
    opts: &TransferOpts,
) -> Result<()> {
    let cmd = transfer_cmd("copy", rclone_config, source, source_path, dest, dest_path, opts);
    run_checked(&cmd).await
}

/// `rclone copyto` — copy a single file to an exact destination path.
pub async fn copyto(
    rclone_config: &Path,
    source: &str,
    source_path: &Path,
    dest: &str,
    dest_path: &Path,
) -> Result<()> {
    let mut cmd = base_cmd("copyto", rclone_config);
    cmd.push(spec(source, source_path));
    cmd.push(spec(dest, dest_path));
    run_checked(&cmd).await
}

/// `rclone sync` — one-way mirror; displaced destination files go to the
/// backup directory when one is set.
pub async fn sync(
    rclone_config: &Path,
    source: &str,
    source_path: &Path,
    dest: &str,
    dest_path: &Path,
    opts: &TransferOpts,
) -> Result<()> {
    let cmd = transfer_cmd("sync", rclone_config, source, source_path, dest, dest_path, opts);
    run_checked(&cmd).await
}

/// `rclone moveto` — rename a directory or file on one side.
pub async fn moveto(
    rclone_config: &Path,
    source: &str,
    source_path: &Path,
    dest: &str,
    dest_path: &Path,
) -> Result<()> {
    let mut cmd = base_cmd("moveto", rclone_config);
    cmd.push(spec(source, source_path));
    cmd.push(spec(dest, dest_path));
    run_checked(&cmd).await
}

/// `rclone mkdir` — create a directory (and missing parents); succeeds if it
/// already exists.
pub async fn mkdir(rclone_config: &Path, remote: &str, path: &Path) -> Result<()> {
    let mut cmd = base_cmd("mkdir", rclone_config);
    cmd.push(spec(remote, path));
    run_checked(&cmd).await
}

/// `rclone purge` — remove a directory and all contents. Returns whether the
/// purge succeeded; a missing path counts as failure but is often tolerable.
pub async fn purge(rclone_config: &Path, remote: &str, path: &Path) -> Result<bool> {
    let mut cmd = base_cmd("purge", rclone_config);
    cmd.push(spec(remote, path));
    let (code, _, _) = run(&cmd).await?;
    Ok(code == 0)
}

/// `rclone deletefile` — remove a single file.
pub async fn delete_file(rclone_config: &Path, remote: &str, path: &Path) -> Result<()> {
    let mut cmd = base_cmd("deletefile", rclone_config);
    cmd.push(spec(remote, path));
    run_checked(&cmd).await
}

/// Extra listing switches for [`lsjson`].
#[derive(Debug, Clone, Default)]
pub struct LsOpts {
    pub dirs_only: bool,
    pub files_only: bool,
    pub recursive: bool,
    pub max_depth: Option<u32>,
    pub filter: Vec<String>,
}

/// `rclone lsjson` — list a directory. `None` when the path cannot be listed
/// (typically: it does not exist).
pub async fn lsjson(
    rclone_config: &Path,
    remote: &str,
    path: &Path,
    opts: &LsOpts,
) -> Result<Option<Vec<LsEntry>>> {
    let mut cmd = base_cmd("lsjson", rclone_config);
    cmd.push(spec(remote, path));
    if opts.dirs_only {
        cmd.push("--dirs-only".to_string());
    }
    if opts.files_only {
        cmd.push("--files-only".to_string());
    }
    if opts.recursive {
        cmd.push("--recursive".to_string());
    }
    if let Some(depth) = opts.max_depth {
        cmd.push("--max-depth".to_string());
        cmd.push(depth.to_string());
    }
    for rule in &opts.filter {
        cmd.push("--filter".to_string());
        cmd.push(rule.clone());
    }
    let (code, stdout, _) = run(&cmd).await?;
    if code != 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&stdout)?))
}

/// Whether a path exists on a remote, and whether it is a directory.
/// Checks by listing the parent, since rclone has no direct stat verb that
/// distinguishes files from directories uniformly across backends.
pub async fn path_exists(rclone_config: &Path, remote: &str, path: &Path) -> Result<(bool, bool)> {
    if path.as_os_str().is_empty() || path == Path::new(".") {
        return Ok((true, true));
    }
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let Some(entries) = lsjson(rclone_config, remote, &parent, &LsOpts::default()).await? else {
        return Ok((false, false));
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match entries.iter().find(|e| e.name == name) {
        Some(entry) => Ok((true, entry.is_dir)),
        None => Ok((false, false)),
    }
}

/// `rclone cat` — read a remote file. `None` if it does not exist.
pub async fn cat(rclone_config: &Path, remote: &str, path: &Path) -> Result<Option<String>> {
    let mut cmd = base_cmd("cat", rclone_config);
    cmd.push(spec(remote, path));
    let (code, stdout, _) = run(&cmd).await?;
    if code == 0 {
        Ok(Some(stdout))
    } else {
        Ok(None)
    }
}

/// Write `content` to a remote path by staging a local temp file and
/// `copyto`-ing it over; rclone's copy-then-replace gives the atomicity.
pub async fn write(rclone_config: &Path, remote: &str, path: &Path, content: &str) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new()?;
    use std::io::Write as _;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    copyto(rclone_config, "", tmp.path(), remote, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn spec_formats_remote_and_local() {
        assert_eq!(spec("r1", Path::new("repoyard/repos")), "r1:repoyard/repos");
        assert_eq!(spec("", Path::new("/tmp/x")), "/tmp/x");
    }

    #[test]
    fn transfer_cmd_places_rules_and_backup() {
        let opts = TransferOpts {
            include: vec!["*.rs".into()],
            exclude: vec![".git/".into()],
            filter: vec!["- node_modules/".into()],
            include_file: Some(PathBuf::from("/c/.rclone_include")),
            exclude_file: Some(PathBuf::from("/c/.rclone_exclude")),
            filters_file: Some(PathBuf::from("/c/.rclone_filters")),
            backup_dir: Some("r1:backups/x".into()),
            dry_run: true,
        };
        let cmd = transfer_cmd(
            "sync",
            Path::new("/cfg/rclone.conf"),
            "",
            Path::new("/local/data"),
            "r1",
            Path::new("repoyard/repos/x/data"),
            &opts,
        );
        assert_eq!(cmd[0], "rclone");
        assert_eq!(cmd[1], "sync");
        assert_eq!(cmd[2], "--config");
        assert_eq!(cmd[4], "/local/data");
        assert_eq!(cmd[5], "r1:repoyard/repos/x/data");
        assert!(cmd.contains(&"--dry-run".to_string()));
        let idx = cmd.iter().position(|c| c == "--include").unwrap();
        assert_eq!(cmd[idx + 1], "*.rs");
        let idx = cmd.iter().position(|c| c == "--include-from").unwrap();
        assert_eq!(cmd[idx + 1], "/c/.rclone_include");
        let idx = cmd.iter().position(|c| c == "--exclude-from").unwrap();
        assert_eq!(cmd[idx + 1], "/c/.rclone_exclude");
        let idx = cmd.iter().position(|c| c == "--filter-from").unwrap();
        assert_eq!(cmd[idx + 1], "/c/.rclone_filters");
        let idx = cmd.iter().position(|c| c == "--backup-dir").unwrap();
        assert_eq!(cmd[idx + 1], "r1:backups/x");
    }

    #[test]
    fn lsjson_parses_entries() {
        let parsed: Vec<LsEntry> = serde_json::from_str(
            r#"[{"Path":"a/repometa.toml","Name":"repometa.toml","IsDir":false},
                {"Path":"a","Name":"a","IsDir":true}]"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(!parsed[0].is_dir);
        assert_eq!(parsed[1].name, "a");
    }
}
