//! The daemon's liveness witness.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use common::process;

/// A pid file owned by this process. Removed on [`PidFile::release`] or drop.
///
/// Ownership is an exclusive lock on a `.lock` sibling, held for the life of
/// the value. The lock file itself is never removed.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: i32,
    lock: Option<File>,
}

#[derive(Debug)]
pub enum Acquire {
    Acquired(PidFile),
    /// Another daemon holds the file. `None` while it has not written its
    /// pid yet.
    AlreadyRunning(Option<i32>),
}

/// Lock file guarding `pid_file`.
pub fn lock_path(pid_file: &Path) -> PathBuf {
    pid_file.with_extension("lock")
}

impl PidFile {
    /// Claim `path` for the current process.
    ///
    /// A file naming a dead process is overwritten. The write goes through a
    /// temporary sibling and a rename, so readers never see a partial pid.
    pub fn acquire(path: &Path) -> Result<Acquire> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let lock_path = lock_path(path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open {}", lock_path.display()))?;
        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Ok(Acquire::AlreadyRunning(process::read_pid(path)));
            }
            Err(TryLockError::Error(e)) => {
                return Err(e).with_context(|| format!("Failed to lock {}", lock_path.display()));
            }
        }

        let own = std::process::id() as i32;
        if let Some(pid) = process::running_pid(path) {
            // A live pid without the lock: a daemon that predates the lock
            // file, or a reused pid.
            if pid != own {
                return Ok(Acquire::AlreadyRunning(Some(pid)));
            }
        } else if path.exists() {
            log::warn!("Removing stale pid file {}", path.display());
        }

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary pid file")?;
        writeln!(tmp, "{}", own).context("Failed to write pid")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        log::debug!("Wrote pid {} to {}", own, path.display());
        Ok(Acquire::Acquired(Self {
            path: path.to_path_buf(),
            pid: own,
            lock: Some(lock),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file if it still names us. Idempotent.
    pub fn release(&mut self) {
        // Dropped last, so nobody can claim the file before it is removed.
        let Some(_lock) = self.lock.take() else {
            return;
        };

        if process::read_pid(&self.path) != Some(self.pid) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed {}", self.path.display()),
            Err(e) => log::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.pid");

        let Acquire::Acquired(mut pid_file) = PidFile::acquire(&path).unwrap() else {
            panic!("expected to acquire");
        };
        assert_eq!(
            process::read_pid(&path),
            Some(std::process::id() as i32)
        );

        pid_file.release();
        assert!(!path.exists());
        pid_file.release();
    }

    #[test]
    fn test_stale_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.pid");
        fs::write(&path, format!("{}\n", i32::MAX)).unwrap();

        assert!(matches!(
            PidFile::acquire(&path).unwrap(),
            Acquire::Acquired(_)
        ));
    }

    #[test]
    fn test_live_holder_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.pid");
        // pid 1 is always alive.
        fs::write(&path, "1\n").unwrap();

        match PidFile::acquire(&path).unwrap() {
            Acquire::AlreadyRunning(pid) => assert_eq!(pid, Some(1)),
            Acquire::Acquired(_) => panic!("should not take over a live pid"),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n");
    }

    #[test]
    fn test_release_leaves_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.pid");

        let Acquire::Acquired(pid_file) = PidFile::acquire(&path).unwrap() else {
            panic!("expected to acquire");
        };
        fs::write(&path, "1\n").unwrap();
        drop(pid_file);
        assert!(path.exists());
    }

    #[test]
    fn test_second_claim_is_refused_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.pid");

        let Acquire::Acquired(mut first) = PidFile::acquire(&path).unwrap() else {
            panic!("expected to acquire");
        };
        let own = std::process::id() as i32;
        match PidFile::acquire(&path).unwrap() {
            Acquire::AlreadyRunning(pid) => assert_eq!(pid, Some(own)),
            Acquire::Acquired(_) => panic!("two owners of one pid file"),
        }
        assert_eq!(process::read_pid(&path), Some(own));

        first.release();
        assert!(matches!(
            PidFile::acquire(&path).unwrap(),
            Acquire::Acquired(_)
        ));
    }

    #[test]
    fn test_lock_held_before_pid_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backdrop.pid");

        // A daemon that locked but has not written its pid yet.
        let lock = File::create(lock_path(&path)).unwrap();
        lock.lock().unwrap();

        match PidFile::acquire(&path).unwrap() {
            Acquire::AlreadyRunning(pid) => assert_eq!(pid, None),
            Acquire::Acquired(_) => panic!("lock holder was ignored"),
        }
        assert!(!path.exists());
    }
}
