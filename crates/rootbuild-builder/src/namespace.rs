//! Private mount namespace.
//! 私有挂载命名空间。

use crate::BuildError;
use nix::mount::{MsFlags, mount};
use nix::sched::{CloneFlags, unshare};
use tracing::debug;

/// Move this process into a new mount namespace whose mounts do not
/// propagate back to the host.
/// 将本进程移入新的挂载命名空间，其挂载不会传播回主机。
pub fn enter_private_mount_namespace() -> Result<(), BuildError> {
    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| BuildError::Unshare(e.into()))?;
    mount::<str, str, str, str>(
        None,
        "/",
        None,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None,
    )
    .map_err(|e| BuildError::Unshare(e.into()))?;
    debug!("entered private mount namespace");
    Ok(())
}
