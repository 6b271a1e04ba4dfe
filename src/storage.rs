// File: ./src/storage.rs
// Crash-safe file mutation: advisory locks, verified atomic writes and rolling backups.
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory (next to the managed file) that holds rolling backups.
pub const BACKUP_DIR_NAME: &str = ".sync-backups";
pub const DEFAULT_BACKUP_LIMIT: usize = 3;

const BACKUP_SUFFIX: &str = ".bak";
const BACKUP_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6f";

pub struct LocalStorage;

impl LocalStorage {
    /// Helper to get a sidecar lock file path
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut lock_path = file_path.to_path_buf();
        if let Some(ext) = lock_path.extension() {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        } else {
            lock_path.set_extension("lock");
        }
        lock_path
    }

    /// Runs `f` while holding an exclusive advisory lock on `<file>.lock`.
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(parent) = file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let lock_path = Self::get_lock_path(file_path);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {:?}", lock_path))?;

        file.lock_exclusive()?;
        let result = f();
        file.unlock()?;
        result
    }

    /// Atomic write: write a temp file in the same directory, fsync, rename it
    /// over the target and read it back.
    ///
    /// On rename failure the temp file is removed and the target is untouched.
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let contents = contents.as_ref();
        let tmp_path = Self::temp_path_for(path);

        let write_tmp = || -> Result<()> {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create temp file {:?}", tmp_path))?;
            file.write_all(contents)?;
            file.sync_all()?;
            Ok(())
        };
        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(anyhow::anyhow!(
                "Failed to move {:?} over {:?}: {}",
                tmp_path,
                path,
                e
            ));
        }

        let written = fs::read(path).with_context(|| format!("Failed to read back {:?}", path))?;
        if written != contents {
            anyhow::bail!(
                "Read-back verification failed for {:?}: wrote {} bytes, found {}",
                path,
                contents.len(),
                written.len()
            );
        }
        Ok(())
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "notesync".to_string());
        path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
    }

    /// Reads a file as UTF-8, treating a missing file as `None`.
    pub fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Failed to read {:?}: {}", path, e)),
        }
    }

    pub fn backup_dir_for(path: &Path) -> PathBuf {
        path.parent()
            .map(|p| p.join(BACKUP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(BACKUP_DIR_NAME))
    }

    /// Stores `previous` as a timestamped backup of `path` and prunes the
    /// oldest backups so that at most `limit` remain.
    pub fn write_backup(path: &Path, previous: &[u8], limit: usize) -> Result<PathBuf> {
        let dir = Self::backup_dir_for(path);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create backup directory {:?}", dir))?;

        let file_name = Self::file_name(path);
        let stamp = Utc::now().format(BACKUP_STAMP_FORMAT).to_string();
        let mut backup = dir.join(format!("{}.{}{}", file_name, stamp, BACKUP_SUFFIX));
        let mut n = 1;
        while backup.exists() {
            backup = dir.join(format!("{}.{}-{}{}", file_name, stamp, n, BACKUP_SUFFIX));
            n += 1;
        }
        Self::atomic_write(&backup, previous)?;

        let backups = Self::list_backups(path)?;
        if backups.len() > limit {
            for old in &backups[..backups.len() - limit] {
                if let Err(e) = fs::remove_file(old) {
                    log::warn!("Failed to prune backup {:?}: {}", old, e);
                } else {
                    log::debug!("Pruned backup {:?}", old);
                }
            }
        }
        Ok(backup)
    }

    /// Backups of `path`, oldest first (ordered by the timestamp in the filename).
    pub fn list_backups(path: &Path) -> Result<Vec<PathBuf>> {
        let dir = Self::backup_dir_for(path);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let prefix = format!("{}.", Self::file_name(path));

        let mut stamped: Vec<((String, u32), PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(BACKUP_SUFFIX))
            else {
                continue;
            };
            if !Self::looks_like_stamp(stamp) {
                continue;
            }
            stamped.push((Self::backup_order(stamp), entry.path()));
        }
        stamped.sort();
        Ok(stamped.into_iter().map(|(_, p)| p).collect())
    }

    /// `20261016T101500.123456-10` sorts as (stamp, 10), after `-2`.
    fn backup_order(stamp: &str) -> (String, u32) {
        stamp
            .rsplit_once('-')
            .and_then(|(base, n)| Some((base.to_string(), n.parse::<u32>().ok()?)))
            .unwrap_or_else(|| (stamp.to_string(), 0))
    }

    // 20261016T101500.123456
    fn looks_like_stamp(s: &str) -> bool {
        let b = s.as_bytes();
        b.len() >= 15 && b[..8].iter().all(u8::is_ascii_digit) && b[8] == b'T'
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let ctx = TestContext::new();
        let file_path = ctx.path("notes.md");
        fs::write(&file_path, "old").unwrap();

        LocalStorage::atomic_write(&file_path, "new content\n").unwrap();

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "new content\n");
        let leftovers: Vec<_> = fs::read_dir(&ctx.root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files must not survive a write");
    }

    #[test]
    fn test_atomic_write_into_missing_dir_fails_cleanly() {
        let ctx = TestContext::new();
        let file_path = ctx.root.join("missing").join("notes.md");
        assert!(LocalStorage::atomic_write(&file_path, "x").is_err());
        assert!(!file_path.exists());
    }

    #[test]
    fn test_backups_are_capped_and_pruned_oldest_first() {
        let ctx = TestContext::new();
        let file_path = ctx.path("cal.md");

        for i in 0..5 {
            LocalStorage::write_backup(&file_path, format!("v{}", i).as_bytes(), 3).unwrap();
        }

        let backups = LocalStorage::list_backups(&file_path).unwrap();
        assert_eq!(backups.len(), 3);
        let contents: Vec<String> = backups
            .iter()
            .map(|p| fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(contents, vec!["v2", "v3", "v4"]);
    }

    #[test]
    fn test_same_instant_backups_sort_by_counter() {
        let ctx = TestContext::new();
        let file_path = ctx.path("cal.md");
        let dir = LocalStorage::backup_dir_for(&file_path);
        fs::create_dir_all(&dir).unwrap();
        let stamp = "20261016T101500.123456";
        for name in ["-10", "-2", "", "-1"] {
            let backup = dir.join(format!("cal.md.{}{}{}", stamp, name, BACKUP_SUFFIX));
            fs::write(backup, name).unwrap();
        }

        let order: Vec<String> = LocalStorage::list_backups(&file_path)
            .unwrap()
            .iter()
            .map(|p| fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(order, vec!["", "-1", "-2", "-10"]);
    }

    #[test]
    fn test_backups_of_other_files_are_ignored() {
        let ctx = TestContext::new();
        let a = ctx.path("a.md");
        let b = ctx.path("ab.md");
        LocalStorage::write_backup(&a, b"a", 3).unwrap();
        LocalStorage::write_backup(&b, b"b", 3).unwrap();

        assert_eq!(LocalStorage::list_backups(&a).unwrap().len(), 1);
        assert_eq!(LocalStorage::list_backups(&b).unwrap().len(), 1);
    }

    #[test]
    fn test_locking_concurrency() {
        let ctx = TestContext::new();
        let path = ctx.path("counter.txt");
        fs::write(&path, "0").unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = vec![];
        for _ in 0..threads {
            let b = barrier.clone();
            let p = path.clone();
            handles.push(thread::spawn(move || {
                b.wait();
                LocalStorage::with_lock(&p, || {
                    let n: u32 = fs::read_to_string(&p)?.trim().parse()?;
                    LocalStorage::atomic_write(&p, (n + 1).to_string())?;
                    Ok(())
                })
                .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), threads.to_string());
    }
}
