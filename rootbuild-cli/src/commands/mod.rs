//! CLI command implementations.
//! CLI 命令实现。

pub mod chain;
pub mod clean;
pub mod init;
pub mod order;
pub mod rebuild;

use rootbuild_builder::{
    BuildError, BuildSession, BuildrootConfig, InPhase, Phase, enter_private_mount_namespace,
};
use rootbuild_mount::ExecContext;
use rootbuild_privs::{Identity, PrivilegeManager};

/// Open the buildroots described by `config` for this process.
/// 为当前进程打开 `config` 描述的构建根。
pub fn open_session(config: &BuildrootConfig) -> Result<BuildSession, BuildError> {
    let identity = Identity::from_env().in_phase(Phase::Setup)?;
    if config.unshare_namespace {
        enter_private_mount_namespace()?;
    }
    BuildSession::open(
        config,
        || PrivilegeManager::system(identity),
        &ExecContext::system(),
    )
}

/// Run `body`, then always finalize. The first error wins.
/// 运行 `body`，然后总是执行 finalize。返回第一个错误。
pub fn with_finalize<T>(
    session: &mut BuildSession,
    body: impl FnOnce(&mut BuildSession) -> Result<T, BuildError>,
) -> Result<T, BuildError> {
    let result = body(session);
    let finalized = session.finalize();
    let value = result?;
    finalized?;
    Ok(value)
}
