//! Small filesystem helpers: atomic writes, recursive mtime, tree copies.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Write `contents` to `path` via a temp file in the same directory plus a
/// rename, creating parent directories as needed.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Most recent mtime under `path` (recursive maximum over regular files).
/// `None` if the path is absent, or is a directory containing no files.
/// Symlinks are not followed; unreadable entries are skipped.
pub fn last_modified(path: &Path) -> Option<DateTime<Utc>> {
    let meta = fs::symlink_metadata(path).ok()?;
    if meta.is_file() {
        return meta.modified().ok().map(DateTime::<Utc>::from);
    }
    if !meta.is_dir() {
        return None;
    }

    let mut max: Option<DateTime<Utc>> = None;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if file_type.is_file() {
                if let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) {
                    let mtime = DateTime::<Utc>::from(mtime);
                    if max.map_or(true, |m| mtime > m) {
                        max = Some(mtime);
                    }
                }
            } else if file_type.is_dir() {
                stack.push(entry.path());
            }
        }
    }
    max
}

/// Whether a directory exists and has no entries.
pub fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path).map_or(false, |mut entries| entries.next().is_none())
}

/// Recursively copy a directory tree. Symlinks are copied as links.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Whether `path` is `ancestor` or lies underneath it.
pub fn is_within(path: &Path, ancestor: &Path) -> bool {
    path.starts_with(ancestor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/file.json");
        write_atomic(&path, "one").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one");
        write_atomic(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        // No temp debris left next to the target.
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn last_modified_absent_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(last_modified(&dir.path().join("nope")).is_none());
        let empty = dir.path().join("empty");
        fs::create_dir(&empty).unwrap();
        assert!(last_modified(&empty).is_none());
    }

    #[test]
    fn last_modified_finds_deep_file() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("x/y");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("f.txt"), "hi").unwrap();
        assert!(last_modified(dir.path()).is_some());
    }

    #[test]
    fn copy_dir_all_copies_nested_trees() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("sub/b.txt"), "b").unwrap();
        let dst = dir.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dst.join("sub/b.txt")).unwrap(), "b");
    }
}
