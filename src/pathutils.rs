//! Path & filesystem utilities (C2): canonicalization, relative-path math,
//! scoped file locks, safe remove/copy/hardlink, modified-time control.
//!
//! Everything else in this crate is built on top of these primitives.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::{FsError, Result};

/// Directory name reserved for the database container; never descended into
/// by path expansion (§4.1.2).
pub const DDB_FOLDER: &str = ".ddb";

/// Converts an absolute or relative path to a forward-slash relative path
/// under `root`. Errors if `path` escapes `root`.
pub fn relative_to(root: &Path, path: &Path) -> Result<String> {
    let root = canonicalize_lenient(root)?;
    let path = canonicalize_lenient(path)?;
    let rel = path
        .strip_prefix(&root)
        .map_err(|_| FsError::NotUnderRoot(path.clone(), root.clone()))?;
    Ok(to_forward_slash(rel))
}

/// Canonicalizes a path that may not yet exist, by canonicalizing the
/// longest existing ancestor and rejoining the remainder. `std::fs::canonicalize`
/// refuses nonexistent paths outright, which is too strict for e.g. `move`
/// destinations.
pub fn canonicalize_lenient(path: &Path) -> Result<PathBuf> {
    if let Ok(c) = fs::canonicalize(path) {
        return Ok(c);
    }
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if existing.as_os_str().is_empty() {
            return Err(FsError::NotFound(path.to_path_buf()).into());
        }
        match fs::canonicalize(&existing) {
            Ok(base) => {
                let mut result = base;
                for component in tail.into_iter().rev() {
                    result.push(component);
                }
                return Ok(result);
            }
            Err(_) => {
                let popped = existing
                    .file_name()
                    .map(|n| n.to_os_string())
                    .ok_or_else(|| FsError::NotFound(path.to_path_buf()))?;
                tail.push(popped);
                existing = existing
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("/"));
            }
        }
    }
}

fn to_forward_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// `depth(path) = count('/', path)` (§3.1, §8).
pub fn depth_of(path: &str) -> u32 {
    path.chars().filter(|&c| c == '/').count() as u32
}

/// True if any path component is `.ddb`, an OS hidden file (leading `.`), or
/// a Windows/OS system marker — these are skipped by path expansion (§4.1.2).
pub fn is_skipped_component(name: &str) -> bool {
    name == DDB_FOLDER || (name.starts_with('.') && name != "." && name != "..")
}

/// True if `path` (or any of its components) contains a dotted component
/// (`.` or `..`), rejected by `move` (§4.1.6, `InvalidArgs::DottedComponent`).
pub fn has_dotted_component(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::CurDir | Component::ParentDir))
}

/// Recursively walks `inputs`, applying the skip rules and `max_depth`
/// semantics from §4.1.2: `0` = unlimited, negative = no recursion into
/// directories (the directory itself is still yielded).
pub fn expand_paths(inputs: &[PathBuf], recursive: bool, max_depth: i32) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        let abs = canonicalize_lenient(input)?;
        expand_one(&abs, recursive, max_depth, 0, &mut out)?;
    }
    Ok(out)
}

fn expand_one(
    path: &Path,
    recursive: bool,
    max_depth: i32,
    current_depth: i32,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if is_skipped_component(name) {
        return Ok(());
    }
    out.push(path.to_path_buf());
    if !path.is_dir() {
        return Ok(());
    }
    if max_depth < 0 {
        return Ok(());
    }
    if !recursive && current_depth >= 1 {
        return Ok(());
    }
    if max_depth > 0 && current_depth >= max_depth {
        return Ok(());
    }
    let entries = fs::read_dir(path).map_err(FsError::Io)?;
    for entry in entries {
        let entry = entry.map_err(FsError::Io)?;
        expand_one(&entry.path(), recursive, max_depth, current_depth + 1, out)?;
    }
    Ok(())
}

/// The "paths to add" variant of expansion (§4.1.2): refuses inputs not
/// contained under `root` and, for every file, also emits every intermediate
/// directory up to `root` so the index engine can synthesize parent entries.
pub fn index_path_list(
    root: &Path,
    inputs: &[PathBuf],
    include_dirs: bool,
) -> Result<Vec<PathBuf>> {
    let root_abs = canonicalize_lenient(root)?;
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();

    let expanded = expand_paths(inputs, true, 0)?;
    for path in expanded {
        if !path.starts_with(&root_abs) {
            return Err(FsError::NotUnderRoot(path, root_abs).into());
        }
        if path.is_dir() && !include_dirs {
            continue;
        }
        // Emit intermediate directories up to root.
        let mut ancestor = path.parent().map(|p| p.to_path_buf());
        let mut intermediates = Vec::new();
        while let Some(a) = ancestor {
            if a == root_abs || !a.starts_with(&root_abs) {
                break;
            }
            intermediates.push(a.clone());
            ancestor = a.parent().map(|p| p.to_path_buf());
        }
        for dir in intermediates.into_iter().rev() {
            if seen.insert(dir.clone()) {
                out.push(dir);
            }
        }
        if seen.insert(path.clone()) {
            out.push(path);
        }
    }
    Ok(out)
}

/// Sets a file's modification time, used to synchronize local mtimes to
/// stored mtimes after a conflict-free `apply_delta` (§4.3.2 step 3).
pub fn set_mtime(path: &Path, unix_seconds: i64) -> Result<()> {
    let time = UNIX_EPOCH + Duration::from_secs(unix_seconds.max(0) as u64);
    let file_time = filetime_from_system_time(time);
    filetime_set(path, file_time)
}

fn filetime_from_system_time(t: SystemTime) -> SystemTime {
    t
}

fn filetime_set(path: &Path, time: SystemTime) -> Result<()> {
    let file = fs::File::options().write(true).open(path);
    match file {
        Ok(f) => {
            f.set_modified(time).map_err(FsError::Io)?;
            Ok(())
        }
        Err(_) => {
            // Directories can't be opened for write on some platforms; fall
            // back to opening read-only.
            let f = fs::File::open(path).map_err(FsError::Io)?;
            f.set_modified(time).map_err(FsError::Io)?;
            Ok(())
        }
    }
}

/// Current mtime of a filesystem entry, as Unix seconds.
pub fn mtime_of(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path).map_err(FsError::Io)?;
    let modified = meta.modified().map_err(FsError::Io)?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64)
}

/// Removes a file or an empty/non-empty directory, never surfacing
/// "not found" as an error (the caller already knows it's gone).
pub fn remove_if_exists(path: &Path) -> Result<()> {
    if path.is_dir() {
        if let Err(e) = fs::remove_dir_all(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(FsError::Io(e).into());
            }
        }
    } else if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(FsError::Io(e).into());
        }
    }
    Ok(())
}

/// Copies `src` to `dst`, creating parent directories as needed.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(FsError::Io)?;
    }
    fs::copy(src, dst).map_err(FsError::Io)?;
    Ok(())
}

/// Hardlinks `src` to `dst`, falling back to a copy when the filesystem
/// doesn't support hardlinks (cross-device, or unsupported filesystem) —
/// the reuse path in §4.3.3 must never fail outright because of this.
pub fn hardlink_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(FsError::Io)?;
    }
    match fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "hardlink failed, falling back to copy");
            copy_file(src, dst)
        }
    }
}

/// A scoped, single-flight filesystem lock over a target path (§4.4.4,
/// §5 "cache builds"). Implemented with an atomic `create_new` sentinel
/// file next to the target: the first caller to create it proceeds, later
/// callers observe `AlreadyExists` and spin-wait briefly before re-checking
/// whether the target now exists.
pub struct ScopedLock {
    lock_path: PathBuf,
    held: bool,
}

impl ScopedLock {
    /// Path of the sentinel lock file for a given cache target.
    fn lock_path_for(target: &Path) -> PathBuf {
        let mut p = target.as_os_str().to_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }

    /// Attempts to acquire the lock for `target`, retrying for up to
    /// `timeout`. Returns `Ok(None)` if another process holds it past the
    /// deadline (the caller should re-check whether the target now exists —
    /// the winner has likely finished).
    pub fn try_acquire(target: &Path, timeout: Duration) -> Result<Option<ScopedLock>> {
        let lock_path = Self::lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(FsError::Io)?;
        }
        let deadline = SystemTime::now() + timeout;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => {
                    return Ok(Some(ScopedLock {
                        lock_path,
                        held: true,
                    }))
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if SystemTime::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => return Err(FsError::Io(e).into()),
            }
        }
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                warn!(path = %self.lock_path.display(), error = %e, "failed to release scoped lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_slashes() {
        assert_eq!(depth_of(""), 0);
        assert_eq!(depth_of("a"), 0);
        assert_eq!(depth_of("a/b"), 1);
        assert_eq!(depth_of("a/b/c"), 2);
    }

    #[test]
    fn skip_rules_catch_ddb_and_hidden() {
        assert!(is_skipped_component(".ddb"));
        assert!(is_skipped_component(".hidden"));
        assert!(!is_skipped_component("photo.jpg"));
        assert!(!is_skipped_component("."));
    }

    #[test]
    fn scoped_lock_is_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tile.png");
        let lock1 = ScopedLock::try_acquire(&target, Duration::from_millis(50)).unwrap();
        assert!(lock1.is_some());
        let lock2 = ScopedLock::try_acquire(&target, Duration::from_millis(50)).unwrap();
        assert!(lock2.is_none());
        drop(lock1);
        let lock3 = ScopedLock::try_acquire(&target, Duration::from_millis(50)).unwrap();
        assert!(lock3.is_some());
    }
}
