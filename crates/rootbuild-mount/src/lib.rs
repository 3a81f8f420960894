//! Mount management for rootbuild sandboxes.
//!
//! A [`MountTable`] owns every [`MountPoint`] attached inside a sandbox root
//! and knows the order they go up and come down in:
//! essential points first on the way up and last on the way down, since user
//! mounts may sit on top of the kernel filesystems they provide.
//!
//! Mounting goes through the `mount`/`umount` binaries via a
//! [`CommandRunner`] and always runs as root inside
//! [`PrivilegeManager::elevated`](rootbuild_privs::PrivilegeManager::elevated).

pub mod exec;
pub mod point;
pub mod table;

pub use exec::{
    CommandOutput, CommandRunner, ExecContext, ExecError, Invocation, RecordingRunner,
    SystemRunner, run_checked,
};
pub use point::{MountClass, MountPoint};
pub use table::{MountId, MountTable, UnmountOutcome, UnmountReport, parse_proc_mounts};

use rootbuild_privs::PrivError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while attaching mount points.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("no mount point with id {0}")]
    UnknownPoint(MountId),

    #[error("mount target {} does not exist", target.display())]
    MissingTarget { target: PathBuf },

    #[error("failed to mount {}: {source}", target.display())]
    Command {
        target: PathBuf,
        #[source]
        source: ExecError,
    },

    #[error(transparent)]
    Privilege(#[from] PrivError),
}
