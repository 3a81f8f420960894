//! Credential primitives backed by the running process.

use crate::{CredentialOps, Credentials, PrivError};
use nix::errno::Errno;
use nix::unistd::{Gid, Uid, getresgid, getresuid, setresgid, setresuid};
use std::io;
use std::path::Path;

/// Drives the real process credentials through `setresuid(2)`/`setresgid(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCredentials;

fn syscall(call: &'static str) -> impl FnOnce(Errno) -> PrivError {
    move |errno| PrivError::Syscall {
        call,
        source: io::Error::from(errno),
    }
}

impl CredentialOps for SystemCredentials {
    fn current(&self) -> Result<Credentials, PrivError> {
        let uids = getresuid().map_err(syscall("getresuid"))?;
        let gids = getresgid().map_err(syscall("getresgid"))?;
        Ok(Credentials {
            ruid: uids.real.as_raw(),
            euid: uids.effective.as_raw(),
            rgid: gids.real.as_raw(),
            egid: gids.effective.as_raw(),
        })
    }

    fn set_uids(&mut self, real: u32, effective: u32, saved: u32) -> Result<(), PrivError> {
        setresuid(
            Uid::from_raw(real),
            Uid::from_raw(effective),
            Uid::from_raw(saved),
        )
        .map_err(syscall("setresuid"))
    }

    fn set_gids(&mut self, real: u32, effective: u32, saved: u32) -> Result<(), PrivError> {
        setresgid(
            Gid::from_raw(real),
            Gid::from_raw(effective),
            Gid::from_raw(saved),
        )
        .map_err(syscall("setresgid"))
    }

    fn lchown(&mut self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    }
}
