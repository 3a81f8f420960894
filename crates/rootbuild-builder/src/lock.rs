//! Advisory buildroot lock.
//! 构建根的建议锁。
//!
//! An exclusive lock is held while a buildroot is being set up or torn down;
//! processes that only use an initialized buildroot hold it shared. The same
//! lock type guards shared caches.
//! 准备或清理构建根时持有排他锁；仅使用已初始化构建根的进程持有共享锁。
//! 同样的锁类型也用于保护共享缓存。

use crate::BuildError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the lock inside the buildroot directory.
/// 构建根目录内锁文件的名称。
pub const LOCK_FILE: &str = "buildroot.lock";

/// Lock mode.
/// 锁模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Exclusive,
    Shared,
}

impl LockMode {
    fn arg(self) -> FlockArg {
        match self {
            LockMode::Exclusive => FlockArg::LockExclusiveNonblock,
            LockMode::Shared => FlockArg::LockSharedNonblock,
        }
    }
}

/// A held `flock(2)` lock. Released on drop.
/// 持有的 `flock(2)` 锁，drop 时释放。
#[derive(Debug)]
pub struct BuildrootLock {
    lock: Flock<File>,
    path: PathBuf,
    mode: LockMode,
}

impl BuildrootLock {
    /// Take the lock on `path` without blocking.
    /// 非阻塞地获取 `path` 上的锁。
    pub fn acquire(path: &Path, mode: LockMode) -> Result<Self, BuildError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| BuildError::io(crate::Phase::Setup, format!("open {}", path.display()), e))?;
        let lock = Flock::lock(file, mode.arg()).map_err(|(_, errno)| contention(path, errno))?;
        debug!(path = %path.display(), ?mode, "buildroot locked");
        Ok(Self {
            lock,
            path: path.to_path_buf(),
            mode,
        })
    }

    /// Lock `<dir>/buildroot.lock`.
    /// 锁定 `<dir>/buildroot.lock`。
    pub fn acquire_in(dir: &Path, mode: LockMode) -> Result<Self, BuildError> {
        Self::acquire(&dir.join(LOCK_FILE), mode)
    }

    /// Switch between exclusive and shared without releasing.
    /// 在排他锁和共享锁之间切换而不释放。
    pub fn relock(&mut self, mode: LockMode) -> Result<(), BuildError> {
        if self.mode == mode {
            return Ok(());
        }
        self.lock
            .relock(mode.arg())
            .map_err(|errno| contention(&self.path, errno))?;
        debug!(path = %self.path.display(), ?mode, "buildroot relocked");
        self.mode = mode;
        Ok(())
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn contention(path: &Path, errno: Errno) -> BuildError {
    if errno == Errno::EWOULDBLOCK {
        BuildError::Locked(path.to_path_buf())
    } else {
        BuildError::io(
            crate::Phase::Setup,
            format!("lock {}", path.display()),
            std::io::Error::from(errno),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exclusive_excludes() {
        let dir = TempDir::new().unwrap();
        let held = BuildrootLock::acquire_in(dir.path(), LockMode::Exclusive).unwrap();
        let err = BuildrootLock::acquire_in(dir.path(), LockMode::Shared).unwrap_err();
        assert_eq!(err.exit_code(), 60);
        drop(held);
        BuildrootLock::acquire_in(dir.path(), LockMode::Exclusive).unwrap();
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let mut first = BuildrootLock::acquire_in(dir.path(), LockMode::Exclusive).unwrap();
        first.relock(LockMode::Shared).unwrap();
        let second = BuildrootLock::acquire_in(dir.path(), LockMode::Shared).unwrap();
        assert_eq!(second.mode(), LockMode::Shared);
        assert!(second.path().ends_with(LOCK_FILE));
    }
}
