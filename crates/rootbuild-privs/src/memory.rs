//! In-memory credential state for testing.
//!
//! Models the kernel rules for `setresuid`/`setresgid`: a process with
//! effective uid 0 may set any ids, anyone else may only shuffle between its
//! current real, effective and saved ids.

use crate::{CredentialOps, Credentials, PrivError, ROOT};
use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug)]
struct State {
    uids: [u32; 3],
    gids: [u32; 3],
    denied_uids: HashSet<u32>,
    chowned: Vec<(PathBuf, u32, u32)>,
    transitions: usize,
}

/// Credential primitives backed by plain memory.
///
/// Clones share state, so a test can keep one handle and give another to the
/// [`PrivilegeManager`](crate::PrivilegeManager).
#[derive(Debug, Clone)]
pub struct MemoryCredentials {
    state: Rc<RefCell<State>>,
}

impl MemoryCredentials {
    /// Start with every id set to `uid`/`gid`.
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                uids: [uid; 3],
                gids: [gid; 3],
                denied_uids: HashSet::new(),
                chowned: Vec::new(),
                transitions: 0,
            })),
        }
    }

    /// A process started through sudo: fully root.
    pub fn sudo_session() -> Self {
        Self::new(ROOT, ROOT)
    }

    /// Current real/effective ids.
    pub fn credentials(&self) -> Credentials {
        let state = self.state.borrow();
        Credentials {
            ruid: state.uids[0],
            euid: state.uids[1],
            rgid: state.gids[0],
            egid: state.gids[1],
        }
    }

    /// Saved set-user-id.
    pub fn saved_uid(&self) -> u32 {
        self.state.borrow().uids[2]
    }

    /// Make every switch to `uid` fail with EPERM.
    pub fn deny_uid(&self, uid: u32) {
        self.state.borrow_mut().denied_uids.insert(uid);
    }

    /// Ownership changes performed so far.
    pub fn chowned(&self) -> Vec<(PathBuf, u32, u32)> {
        self.state.borrow().chowned.clone()
    }

    /// Number of successful `set_uids` calls.
    pub fn transitions(&self) -> usize {
        self.state.borrow().transitions
    }
}

fn eperm(call: &'static str) -> PrivError {
    PrivError::Syscall {
        call,
        source: io::Error::from(io::ErrorKind::PermissionDenied),
    }
}

impl CredentialOps for MemoryCredentials {
    fn current(&self) -> Result<Credentials, PrivError> {
        Ok(self.credentials())
    }

    fn set_uids(&mut self, real: u32, effective: u32, saved: u32) -> Result<(), PrivError> {
        let mut state = self.state.borrow_mut();
        let wanted = [real, effective, saved];
        if wanted.iter().any(|id| state.denied_uids.contains(id)) {
            return Err(eperm("setresuid"));
        }
        if state.uids[1] != ROOT && !wanted.iter().all(|id| state.uids.contains(id)) {
            return Err(eperm("setresuid"));
        }
        state.uids = wanted;
        state.transitions += 1;
        Ok(())
    }

    fn set_gids(&mut self, real: u32, effective: u32, saved: u32) -> Result<(), PrivError> {
        let mut state = self.state.borrow_mut();
        let wanted = [real, effective, saved];
        if state.uids[1] != ROOT && !wanted.iter().all(|id| state.gids.contains(id)) {
            return Err(eperm("setresgid"));
        }
        state.gids = wanted;
        Ok(())
    }

    fn lchown(&mut self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.uids[1] != ROOT {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        path.symlink_metadata()?;
        state.chowned.push((path.to_path_buf(), uid, gid));
        Ok(())
    }
}
