//! Buildroot orchestration for rootbuild.
//! rootbuild 的构建根编排。
//!
//! This crate drives the life of one buildroot:
//! 本 crate 驱动单个构建根的生命周期：
//!
//! - Setup: lock, directories, essential mounts, package installation
//!   准备：加锁、目录、基础挂载、软件包安装
//! - Build: run the package build as the unprivileged user
//!   构建：以非特权用户运行软件包构建
//! - Teardown: unmount, release the lock, verify privilege balance
//!   清理：卸载、释放锁、校验权限栈平衡
//!
//! Extensions hook into the named stages of that life.
//! 扩展挂接到生命周期中的各个命名阶段。

pub mod buildroot;
pub mod chain;
pub mod config;
pub mod extensions;
pub mod lock;
#[cfg(target_os = "linux")]
pub mod namespace;
pub mod sandbox;
pub mod session;
pub mod state;

pub use buildroot::Buildroot;
pub use chain::{ChainReport, run_chain};
pub use config::{BindMountOptions, BuildrootConfig, ConfigError, MountOptions, TmpfsOptions};
pub use lock::{BuildrootLock, LockMode};
#[cfg(target_os = "linux")]
pub use namespace::enter_private_mount_namespace;
pub use sandbox::Sandbox;
pub use session::BuildSession;
pub use state::{StateError, StateTracker};

use rootbuild_hooks::{ExtensionError, HookError};
use rootbuild_mount::{ExecError, MountError};
use rootbuild_privs::PrivError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle phase a failure happened in.
/// 失败发生的生命周期阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Build,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Setup => "sandbox setup",
            Phase::Build => "build",
            Phase::Teardown => "sandbox teardown",
        })
    }
}

/// Errors that can occur while managing a buildroot.
/// 管理构建根时可能发生的错误。
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{phase} failed in the privilege manager: {source}")]
    Privilege {
        phase: Phase,
        #[source]
        source: PrivError,
    },

    #[error("{phase} failed in the mount table: {source}")]
    Mount {
        phase: Phase,
        #[source]
        source: MountError,
    },

    #[error("{phase} failed in the hook engine: {source}")]
    Hook {
        phase: Phase,
        #[source]
        source: HookError,
    },

    #[error("sandbox setup failed loading extensions: {0}")]
    Extension(#[from] ExtensionError),

    #[error("{phase} failed: {context}: {source}")]
    Io {
        phase: Phase,
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("package manager failed: {0}")]
    PackageManager(#[source] ExecError),

    #[error("build of {package} failed: {source}")]
    BuildFailed {
        package: String,
        #[source]
        source: ExecError,
    },

    #[error("build of {0} produced no packages")]
    NoResults(String),

    #[error("build root {} is locked by another process", .0.display())]
    Locked(PathBuf),

    #[error("result directory {} is not accessible: {source}", path.display())]
    ResultDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unshare the mount namespace: {0}")]
    Unshare(#[source] std::io::Error),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{} package(s) failed to build: {}", .0.len(), .0.join(", "))]
    ChainFailed(Vec<String>),

    #[error("{0}")]
    Other(String),
}

impl BuildError {
    /// Process exit status for this error.
    /// 此错误对应的进程退出码。
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Config(_) => 3,
            BuildError::Privilege {
                source: PrivError::Unbalanced { .. },
                ..
            } => 110,
            BuildError::Privilege { phase, .. }
            | BuildError::Mount { phase, .. }
            | BuildError::Hook { phase, .. }
            | BuildError::Io { phase, .. } => match phase {
                Phase::Build => 10,
                Phase::Setup | Phase::Teardown => 20,
            },
            BuildError::Extension(_) => 20,
            BuildError::PackageManager(_) => 30,
            BuildError::BuildFailed { .. } | BuildError::ChainFailed(_) => 10,
            BuildError::NoResults(_) => 40,
            BuildError::Locked(_) => 60,
            BuildError::ResultDir { .. } => 70,
            BuildError::Unshare(_) => 80,
            BuildError::State(_) => 110,
            BuildError::Other(_) => 1,
        }
    }

    /// Attach an I/O error to a phase.
    /// 将 I/O 错误关联到某个阶段。
    pub fn io(phase: Phase, context: impl Into<String>, source: std::io::Error) -> Self {
        BuildError::Io {
            phase,
            context: context.into(),
            source,
        }
    }
}

/// Tag a component error with the phase it happened in.
/// 为组件错误标注其发生的阶段。
pub trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Result<T, BuildError>;
}

impl<T> InPhase<T> for Result<T, PrivError> {
    fn in_phase(self, phase: Phase) -> Result<T, BuildError> {
        self.map_err(|source| BuildError::Privilege { phase, source })
    }
}

impl<T> InPhase<T> for Result<T, MountError> {
    fn in_phase(self, phase: Phase) -> Result<T, BuildError> {
        self.map_err(|source| BuildError::Mount { phase, source })
    }
}

impl<T> InPhase<T> for Result<T, HookError> {
    fn in_phase(self, phase: Phase) -> Result<T, BuildError> {
        self.map_err(|source| BuildError::Hook { phase, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let io = || std::io::Error::other("x");
        assert_eq!(BuildError::io(Phase::Setup, "mkdir", io()).exit_code(), 20);
        assert_eq!(BuildError::io(Phase::Build, "copy", io()).exit_code(), 10);
        assert_eq!(BuildError::Locked(PathBuf::from("/x")).exit_code(), 60);
        assert_eq!(
            BuildError::Privilege {
                phase: Phase::Teardown,
                source: PrivError::Unbalanced {
                    expected: 0,
                    actual: 1
                },
            }
            .exit_code(),
            110
        );
        assert_eq!(BuildError::Unshare(io()).exit_code(), 80);
        assert_eq!(BuildError::NoResults("a.src.rpm".into()).exit_code(), 40);
    }

    #[test]
    fn test_message_names_phase_and_component() {
        let err: Result<(), PrivError> = Err(PrivError::StackUnderflow);
        let msg = err.in_phase(Phase::Teardown).unwrap_err().to_string();
        assert!(msg.starts_with("sandbox teardown failed in the privilege manager"));
    }
}
