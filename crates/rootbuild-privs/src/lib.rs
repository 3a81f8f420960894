//! Privilege switching for rootbuild.
//!
//! The orchestrator runs as root (usually through sudo) and narrows its
//! identity to an unprivileged build user for everything that does not need
//! root. Every transition goes through [`PrivilegeManager`], which keeps a
//! stack of credential snapshots so each narrowing has a provable way back.
//!
//! Callers must pair [`PrivilegeManager::become_user`] and
//! [`PrivilegeManager::drop_privs_temp`] with
//! [`PrivilegeManager::restore_privs`] on every exit path. The scoped helpers
//! [`PrivilegeManager::elevated`] and [`PrivilegeManager::as_unprivileged`]
//! do the pairing for you.

pub mod identity;
pub mod memory;
#[cfg(target_os = "linux")]
pub mod system;

pub use identity::Identity;
pub use memory::MemoryCredentials;
#[cfg(target_os = "linux")]
pub use system::SystemCredentials;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Uid/gid of the superuser.
pub const ROOT: u32 = 0;

/// Errors raised by privilege transitions.
#[derive(Debug, Error)]
pub enum PrivError {
    #[error("{call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("restorePrivs called with an empty privilege stack")]
    StackUnderflow,

    #[error("unbalanced privilege stack: expected depth {expected}, found {actual}")]
    Unbalanced { expected: usize, actual: usize },

    #[error("failed to change owner of {}: {source}", path.display())]
    Chown {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot determine unprivileged identity: {0}")]
    Identity(String),
}

/// Snapshot of the process credentials taken before a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub ruid: u32,
    pub euid: u32,
    pub rgid: u32,
    pub egid: u32,
}

impl Credentials {
    /// Credentials with every id set to root.
    pub fn root() -> Self {
        Self {
            ruid: ROOT,
            euid: ROOT,
            rgid: ROOT,
            egid: ROOT,
        }
    }

    /// Whether the effective uid is root.
    pub fn is_privileged(&self) -> bool {
        self.euid == ROOT
    }
}

/// Kernel primitives the manager is built on.
///
/// `set_uids`/`set_gids` must change real, effective and saved ids in one
/// call (`setresuid(2)`/`setresgid(2)`) so there is never a window where only
/// some of them changed.
pub trait CredentialOps {
    /// Read the current real/effective uid and gid.
    fn current(&self) -> Result<Credentials, PrivError>;

    /// Set real, effective and saved uid atomically.
    fn set_uids(&mut self, real: u32, effective: u32, saved: u32) -> Result<(), PrivError>;

    /// Set real, effective and saved gid atomically.
    fn set_gids(&mut self, real: u32, effective: u32, saved: u32) -> Result<(), PrivError>;

    /// Change ownership of `path` without following symlinks.
    fn lchown(&mut self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
}

/// Tracks and switches the identity of the orchestrator process.
pub struct PrivilegeManager {
    ops: Box<dyn CredentialOps>,
    unprivileged: Identity,
    stack: Vec<Credentials>,
}

impl std::fmt::Debug for PrivilegeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegeManager")
            .field("unprivileged", &self.unprivileged)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

impl PrivilegeManager {
    /// Create a manager on top of the given credential primitives.
    pub fn new(ops: Box<dyn CredentialOps>, unprivileged: Identity) -> Self {
        Self {
            ops,
            unprivileged,
            stack: Vec::new(),
        }
    }

    /// Create a manager that drives the real process credentials.
    #[cfg(target_os = "linux")]
    pub fn system(unprivileged: Identity) -> Self {
        Self::new(Box::new(SystemCredentials), unprivileged)
    }

    /// The identity used for unprivileged work.
    pub fn unprivileged(&self) -> Identity {
        self.unprivileged
    }

    /// Number of snapshots waiting for a `restore_privs`.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Current process credentials.
    pub fn current(&self) -> Result<Credentials, PrivError> {
        self.ops.current()
    }

    /// Save the current credentials and switch to `uid`/`gid`.
    ///
    /// The snapshot stays on the stack even when the switch fails, so the
    /// caller's paired `restore_privs` still balances.
    pub fn become_user(&mut self, uid: u32, gid: u32) -> Result<(), PrivError> {
        self.push()?;
        self.become_without_push(uid, gid)
    }

    /// Narrow to the unprivileged identity until the next `restore_privs`.
    pub fn drop_privs_temp(&mut self) -> Result<(), PrivError> {
        let Identity { uid, gid } = self.unprivileged;
        self.become_user(uid, gid)
    }

    /// Go back to the credentials saved by the most recent transition.
    pub fn restore_privs(&mut self) -> Result<(), PrivError> {
        if self.stack.is_empty() {
            return Err(PrivError::StackUnderflow);
        }
        // Back to root first, then to the saved ids.
        self.elevate()?;
        let saved = self.stack.pop().ok_or(PrivError::StackUnderflow)?;
        trace!(depth = self.stack.len(), ?saved, "restoring credentials");
        self.ops.set_gids(saved.rgid, saved.egid, ROOT)?;
        self.ops.set_uids(saved.ruid, saved.euid, ROOT)?;
        Ok(())
    }

    /// Drop to the unprivileged identity for good.
    ///
    /// The saved ids are replaced too, so the process can never regain root.
    /// Nothing is pushed; the stack is left untouched.
    pub fn drop_privs_forever(&mut self) -> Result<(), PrivError> {
        let Identity { uid, gid } = self.unprivileged;
        debug!(uid, gid, "dropping privileges permanently");
        self.elevate()?;
        self.ops.set_gids(gid, gid, gid)?;
        self.ops.set_uids(uid, uid, uid)?;
        Ok(())
    }

    /// Change ownership of `path` (default: the unprivileged identity).
    ///
    /// Runs as root and leaves the stack as it found it. Paths that vanish
    /// while walking are skipped.
    pub fn change_owner(
        &mut self,
        path: &Path,
        owner: Option<Identity>,
        recursive: bool,
    ) -> Result<(), PrivError> {
        let Identity { uid, gid } = owner.unwrap_or(self.unprivileged);
        debug!(path = %path.display(), uid, gid, recursive, "changing owner");

        self.elevated(|privs| {
            privs.tolerant_chown(path, uid, gid)?;
            if recursive {
                for entry in walkdir::WalkDir::new(path).min_depth(1).follow_links(false) {
                    match entry {
                        Ok(entry) => privs.tolerant_chown(entry.path(), uid, gid)?,
                        Err(e) if is_not_found(&e) => continue,
                        Err(e) => {
                            let entry_path =
                                e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
                            return Err(PrivError::Chown {
                                path: entry_path,
                                source: e.into(),
                            });
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// Run `f` as root, restoring the previous credentials afterwards.
    ///
    /// The restore happens on every exit path, including when `f` fails.
    pub fn elevated<T, E>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<PrivError>,
    {
        self.scoped(ROOT, ROOT, f)
    }

    /// Run `f` as the unprivileged identity, restoring afterwards.
    pub fn as_unprivileged<T, E>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<PrivError>,
    {
        let Identity { uid, gid } = self.unprivileged;
        self.scoped(uid, gid, f)
    }

    /// Verify that the stack is back at `expected` depth.
    pub fn check_balanced(&self, expected: usize) -> Result<(), PrivError> {
        if self.stack.len() == expected {
            Ok(())
        } else {
            Err(PrivError::Unbalanced {
                expected,
                actual: self.stack.len(),
            })
        }
    }

    fn scoped<T, E>(
        &mut self,
        uid: u32,
        gid: u32,
        f: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<PrivError>,
    {
        let depth = self.stack.len();
        let result = match self.become_user(uid, gid) {
            Ok(()) => f(self),
            Err(e) => Err(E::from(e)),
        };
        // become_user may have failed before pushing.
        let restored = if self.stack.len() > depth {
            self.restore_privs()
        } else {
            Ok(())
        };
        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(E::from(e)),
        }
    }

    fn push(&mut self) -> Result<(), PrivError> {
        let snapshot = self.ops.current()?;
        self.stack.push(snapshot);
        trace!(depth = self.stack.len(), ?snapshot, "pushed credentials");
        Ok(())
    }

    fn elevate(&mut self) -> Result<(), PrivError> {
        self.ops.set_uids(ROOT, ROOT, ROOT)?;
        self.ops.set_gids(ROOT, ROOT, ROOT)?;
        Ok(())
    }

    fn become_without_push(&mut self, uid: u32, gid: u32) -> Result<(), PrivError> {
        // gid first: once the uid is gone the gid can no longer change.
        self.elevate()?;
        self.ops.set_gids(gid, gid, ROOT)?;
        self.ops.set_uids(uid, uid, ROOT)?;
        Ok(())
    }

    fn tolerant_chown(&mut self, path: &Path, uid: u32, gid: u32) -> Result<(), PrivError> {
        match self.ops.lchown(path, uid, gid) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PrivError::Chown {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn is_not_found(e: &walkdir::Error) -> bool {
    e.io_error()
        .map(|io| io.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILDER: Identity = Identity {
        uid: 1000,
        gid: 135,
    };

    fn manager() -> (PrivilegeManager, MemoryCredentials) {
        let creds = MemoryCredentials::sudo_session();
        (PrivilegeManager::new(Box::new(creds.clone()), BUILDER), creds)
    }

    #[test]
    fn test_drop_and_restore() {
        let (mut privs, creds) = manager();
        privs.drop_privs_temp().unwrap();
        assert_eq!(creds.credentials().euid, 1000);
        assert_eq!(creds.credentials().egid, 135);
        assert_eq!(privs.depth(), 1);

        privs.restore_privs().unwrap();
        assert_eq!(creds.credentials(), Credentials::root());
        assert_eq!(privs.depth(), 0);
    }

    #[test]
    fn test_nested_transitions_restore_in_order() {
        let (mut privs, creds) = manager();
        privs.drop_privs_temp().unwrap();
        privs.become_user(0, 0).unwrap();
        assert!(creds.credentials().is_privileged());

        privs.restore_privs().unwrap();
        assert_eq!(creds.credentials().euid, 1000);
        privs.restore_privs().unwrap();
        assert_eq!(creds.credentials(), Credentials::root());
    }

    #[test]
    fn test_restore_on_empty_stack() {
        let (mut privs, _) = manager();
        assert!(matches!(privs.restore_privs(), Err(PrivError::StackUnderflow)));
    }

    #[test]
    fn test_elevated_restores_after_error() {
        let (mut privs, creds) = manager();
        privs.drop_privs_temp().unwrap();

        let result: Result<(), PrivError> = privs.elevated(|inner| {
            assert!(inner.current()?.is_privileged());
            Err(PrivError::Identity("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(creds.credentials().euid, 1000);
        assert_eq!(privs.depth(), 1);
    }

    #[test]
    fn test_check_balanced() {
        let (mut privs, _) = manager();
        privs.check_balanced(0).unwrap();
        privs.drop_privs_temp().unwrap();
        assert!(matches!(
            privs.check_balanced(0),
            Err(PrivError::Unbalanced { expected: 0, actual: 1 })
        ));
    }
}
