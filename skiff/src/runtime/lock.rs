//! Exclusive ownership of a runtime home directory.
//!
//! Two runtimes sharing a home would each believe they own the containers
//! recorded there, so the second one is refused.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

/// Holds an exclusive `flock` on `<home>/.lock` until dropped.
pub struct RuntimeLock {
    _file: Flock<File>,
    path: PathBuf,
}

impl RuntimeLock {
    pub fn acquire(home_dir: &Path) -> SkiffResult<Self> {
        std::fs::create_dir_all(home_dir)
            .map_err(|e| SkiffError::Storage(format!("failed to create home dir: {}", e)))?;

        let lock_path = home_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| SkiffError::Storage(format!("failed to open lock file: {}", e)))?;

        let file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(SkiffError::AlreadyExists(format!(
                    "another skiff runtime is already using {}",
                    home_dir.display()
                )));
            }
            Err((_, errno)) => {
                return Err(SkiffError::Storage(format!(
                    "failed to acquire lock: {}",
                    errno
                )));
            }
        };

        tracing::debug!(lock_path = %lock_path.display(), "Acquired runtime lock");
        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RuntimeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeLock").field("path", &self.path).finish()
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        tracing::debug!(lock_path = %self.path.display(), "Released runtime lock");
    }
}
