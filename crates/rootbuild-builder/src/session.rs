//! A buildroot together with its optional bootstrap buildroot.
//! 构建根及其可选的引导构建根。
//!
//! With `use_bootstrap`, the package manager for the main buildroot runs
//! from a second, minimal buildroot. The bootstrap comes up first and goes
//! down last.
//! 启用 `use_bootstrap` 时，主构建根的包管理器在第二个最小构建根中运行。
//! 引导构建根最先准备、最后清理。

use crate::buildroot::Buildroot;
use crate::config::BuildrootConfig;
use crate::BuildError;
use rootbuild_mount::ExecContext;
use rootbuild_privs::PrivilegeManager;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// The buildroots one invocation works on.
/// 单次调用所操作的构建根。
#[derive(Debug)]
pub struct BuildSession {
    main: Buildroot,
    bootstrap: Option<Buildroot>,
}

impl BuildSession {
    /// Open the buildroots for `config`.
    /// 打开 `config` 对应的构建根。
    ///
    /// `privs` is called once per buildroot.
    /// 每个构建根调用一次 `privs`。
    pub fn open(
        config: &BuildrootConfig,
        mut privs: impl FnMut() -> PrivilegeManager,
        exec: &ExecContext,
    ) -> Result<Self, BuildError> {
        let bootstrap = if config.use_bootstrap {
            Some(Buildroot::bootstrap(
                config,
                privs(),
                ExecContext::new(exec.shared_runner()),
            )?)
        } else {
            None
        };
        let mut main = Buildroot::new(
            config.clone(),
            privs(),
            ExecContext::new(exec.shared_runner()),
        )?;
        if let Some(bootstrap) = &bootstrap {
            main.attach_bootstrap(bootstrap);
        }
        Ok(Self { main, bootstrap })
    }

    pub fn main(&self) -> &Buildroot {
        &self.main
    }

    pub fn main_mut(&mut self) -> &mut Buildroot {
        &mut self.main
    }

    pub fn bootstrap(&self) -> Option<&Buildroot> {
        self.bootstrap.as_ref()
    }

    /// Prepare the bootstrap, then the main buildroot.
    /// 先准备引导构建根，再准备主构建根。
    #[instrument(skip_all, fields(root = %self.main.config().root))]
    pub fn init(&mut self) -> Result<(), BuildError> {
        if let Some(bootstrap) = &mut self.bootstrap {
            info!(root = %bootstrap.config().root, "preparing bootstrap buildroot");
            bootstrap.init()?;
        }
        self.main.init()
    }

    pub fn rebuild(&mut self, package: &Path) -> Result<Vec<PathBuf>, BuildError> {
        self.main.rebuild(package)
    }

    /// Finalize the main buildroot, then the bootstrap. Both always run;
    /// the first error wins.
    /// 先收尾主构建根，再收尾引导构建根。两者都会执行，返回第一个错误。
    pub fn finalize(&mut self) -> Result<(), BuildError> {
        let main = self.main.finalize();
        let bootstrap = match &mut self.bootstrap {
            Some(bootstrap) => bootstrap.finalize(),
            None => Ok(()),
        };
        main?;
        bootstrap
    }

    /// Remove the main buildroot, then the bootstrap.
    /// 先删除主构建根，再删除引导构建根。
    pub fn clean(&mut self) -> Result<(), BuildError> {
        let main = self.main.clean();
        let bootstrap = match &mut self.bootstrap {
            Some(bootstrap) => bootstrap.clean(),
            None => Ok(()),
        };
        main?;
        bootstrap
    }
}
