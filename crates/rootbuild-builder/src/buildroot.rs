//! Buildroot lifecycle.
//! 构建根生命周期。
//!
//! A [`Buildroot`] walks one sandbox through its life and calls the hook
//! stages at fixed points:
//! [`Buildroot`] 驱动单个沙箱走完其生命周期，并在固定位置调用钩子阶段：
//!
//! - `init`: mount_root, preinit, preyum, postyum, postinit
//! - `rebuild`: prebuild, pre_srpm_build, postbuild, process_logs
//! - `finalize`: postumount
//! - `clean`: umount_root, postclean
//!
//! A failed `init` runs `initfailed` before returning.
//! `init` 失败时，返回前会运行 `initfailed`。
//!
//! The build phase runs as the unprivileged user; only the chroot spawn
//! and ownership changes are elevated.
//! 构建阶段以非特权用户运行；只有 chroot 启动和属主变更会提升权限。

use crate::config::BuildrootConfig;
use crate::extensions::builtin_extensions;
use crate::lock::{BuildrootLock, LockMode};
use crate::sandbox::{Sandbox, essential_mounts, tty_gid};
use crate::state::StateTracker;
use crate::{BuildError, InPhase, Phase};
use rootbuild_hooks::{ExtensionTable, HookRegistry, stages};
use rootbuild_mount::{
    CommandOutput, ExecContext, ExecError, Invocation, MountClass, MountPoint, parse_proc_mounts,
};
use rootbuild_privs::{Identity, PrivError, PrivilegeManager};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

/// Marker left in the root once the initial package set is installed.
/// 初始软件包集合安装完成后留在根目录中的标记。
pub const INITIALIZED_MARKER: &str = ".initialized";

/// Directories every buildroot starts with.
/// 每个构建根初始拥有的目录。
const SKELETON_DIRS: &[&str] = &[
    "var/lib/rpm",
    "var/lib/yum",
    "var/lib/dbus",
    "var/log",
    "var/cache/yum",
    "etc/rpm",
    "tmp",
    "tmp/ccache",
    "var/tmp",
    "etc/yum.repos.d",
    "etc/yum",
    "proc",
    "sys",
    "dev",
];

/// Files touched in a fresh buildroot.
/// 在新构建根中创建的空文件。
const SKELETON_FILES: &[&str] = &["etc/fstab", "var/log/yum.log"];

/// Build tree under `<chroothome>/build`.
/// `<chroothome>/build` 下的构建目录树。
const BUILD_DIRS: &[&str] = &[
    "RPMS", "SRPMS", "SOURCES", "SPECS", "BUILD", "BUILDROOT", "originals",
];

/// One buildroot: the sandbox, the hooks extensions registered on it, and
/// the lock and state bookkeeping around them.
/// 单个构建根：沙箱、扩展在其上注册的钩子，以及相关的锁和状态记录。
pub struct Buildroot {
    config: BuildrootConfig,
    hooks: HookRegistry<Sandbox>,
    sandbox: Sandbox,
    state: StateTracker,
    lock: Option<BuildrootLock>,
    base_depth: usize,
    /// Root of the bootstrap buildroot the package manager runs from.
    bootstrap_root: Option<PathBuf>,
}

impl Buildroot {
    /// Create a buildroot with the built-in extensions.
    /// 使用内置扩展创建构建根。
    pub fn new(
        config: BuildrootConfig,
        privs: PrivilegeManager,
        exec: ExecContext,
    ) -> Result<Self, BuildError> {
        Self::create(config, privs, exec, builtin_extensions(), false)
    }

    /// Create the bootstrap buildroot that belongs to `config`.
    /// 创建属于 `config` 的引导构建根。
    pub fn bootstrap(
        config: &BuildrootConfig,
        privs: PrivilegeManager,
        exec: ExecContext,
    ) -> Result<Self, BuildError> {
        Self::create(config.bootstrap(), privs, exec, builtin_extensions(), true)
    }

    /// Create a buildroot using a custom extension table.
    /// 使用自定义扩展表创建构建根。
    pub fn with_extensions(
        config: BuildrootConfig,
        privs: PrivilegeManager,
        exec: ExecContext,
        table: ExtensionTable<Sandbox>,
    ) -> Result<Self, BuildError> {
        Self::create(config, privs, exec, table, false)
    }

    #[instrument(skip_all, fields(root = %config.root, bootstrap = is_bootstrap))]
    fn create(
        config: BuildrootConfig,
        privs: PrivilegeManager,
        exec: ExecContext,
        mut table: ExtensionTable<Sandbox>,
        is_bootstrap: bool,
    ) -> Result<Self, BuildError> {
        config.validate()?;

        let mut sandbox = Sandbox::new(
            config.rootdir(),
            config.buildroot_dir(),
            config.resultdir(),
            is_bootstrap,
            privs,
            exec,
        );
        for point in essential_mounts(&sandbox.root, config.internal_dev_setup, tty_gid()) {
            sandbox.mounts.add(point, MountClass::Essential);
        }

        let base_depth = sandbox.privs.depth();
        let mut hooks = HookRegistry::new();
        let loaded = table.load(&config.extensions, &mut hooks, &mut sandbox)?;
        if !loaded.is_empty() {
            info!(extensions = %loaded.join(", "), "extensions loaded");
        }

        let mut buildroot = Self {
            config,
            hooks,
            sandbox,
            state: StateTracker::new(),
            lock: None,
            base_depth,
            bootstrap_root: None,
        };
        buildroot.sync_mounts();
        Ok(buildroot)
    }

    /// Run the package manager from `bootstrap` instead of the host.
    /// 改为从 `bootstrap` 中运行包管理器，而不是主机。
    ///
    /// The buildroot is bind mounted into the bootstrap at its own host
    /// path, behind a private tmpfs, so `--installroot` resolves the same
    /// inside and outside.
    /// 构建根以其主机路径绑定挂载到引导构建根中，并由私有 tmpfs 遮盖，
    /// 因此 `--installroot` 在内外解析结果相同。
    pub fn attach_bootstrap(&mut self, bootstrap: &Buildroot) {
        let inner = bootstrap.sandbox.chroot_path(&self.sandbox.root);
        self.sandbox.mounts.add(
            MountPoint::filesystem("rootbuild_hide_root_in_bootstrap", &inner, "tmpfs")
                .with_options(["private"]),
            MountClass::Managed,
        );
        self.sandbox.mounts.add(
            MountPoint::bind(&self.sandbox.root, &inner)
                .recursive()
                .with_options(["private"]),
            MountClass::Managed,
        );
        self.bootstrap_root = Some(bootstrap.sandbox.root.clone());
        self.sync_mounts();
    }

    pub fn bootstrap_root(&self) -> Option<&Path> {
        self.bootstrap_root.as_deref()
    }

    // Mounts left over from an earlier run are reused, not doubled.
    fn sync_mounts(&mut self) {
        if let Ok(proc_mounts) = fs::read_to_string("/proc/mounts") {
            self.sandbox.mounts.sync_with_host(&proc_mounts);
        }
    }

    pub fn config(&self) -> &BuildrootConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn sandbox_mut(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }

    pub fn hooks(&self) -> &HookRegistry<Sandbox> {
        &self.hooks
    }

    /// Registry for hooks added outside the extension table.
    /// 用于在扩展表之外添加钩子的注册表。
    pub fn hooks_mut(&mut self) -> &mut HookRegistry<Sandbox> {
        &mut self.hooks
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    /// Whether the initial package set has been installed.
    /// 初始软件包集合是否已安装。
    pub fn is_initialized(&self) -> bool {
        self.sandbox.root.join(INITIALIZED_MARKER).exists()
    }

    /// Prepare the buildroot for builds.
    /// 准备构建根以供构建。
    ///
    /// Leaves the buildroot mounted and locked shared; pair with
    /// [`finalize`](Self::finalize).
    /// 完成后构建根保持挂载并持有共享锁；需与 [`finalize`](Self::finalize) 配对。
    #[instrument(skip_all, fields(root = %self.config.root))]
    pub fn init(&mut self) -> Result<(), BuildError> {
        match self.in_state("chroot init", Self::prepare) {
            Ok(()) => self.take_lock(LockMode::Shared),
            Err(e) => {
                error!(error = %e, "buildroot init failed");
                if let Err(hook_err) = self.call_hooks(stages::INITFAILED, Phase::Setup) {
                    warn!(error = %hook_err, "initfailed hook failed");
                }
                Err(e)
            }
        }
    }

    fn prepare(&mut self) -> Result<(), BuildError> {
        let basedir = self.sandbox.basedir.clone();
        mkdir(&basedir, Phase::Setup)?;
        self.take_lock(LockMode::Exclusive)?;
        self.share_basedir(&basedir)?;

        let root = self.sandbox.root.clone();
        mkdir(&root, Phase::Setup)?;
        self.call_hooks(stages::MOUNT_ROOT, Phase::Setup)?;
        self.create_resultdir()?;

        self.call_hooks(stages::PREINIT, Phase::Setup)?;
        self.create_skeleton()?;
        if let Some(bootstrap_root) = &self.bootstrap_root {
            mkdir(&bootstrap_root.join(relative(&root)), Phase::Setup)?;
        }
        self.sandbox.mount_all_essential().in_phase(Phase::Setup)?;

        if self.is_initialized() {
            info!("buildroot already initialized, skipping package installation");
        } else {
            let packages = self.config.chroot_setup.clone();
            self.install(&packages)?;
        }
        self.create_build_dirs()?;
        touch(&root.join(INITIALIZED_MARKER), Phase::Setup)?;

        self.call_hooks(stages::POSTINIT, Phase::Setup)?;
        self.sandbox.mount_all_user().in_phase(Phase::Setup)
    }

    /// Install `packages` into the buildroot with the package manager.
    /// 使用包管理器将 `packages` 安装到构建根中。
    #[instrument(skip_all, fields(count = packages.len()))]
    pub fn install(&mut self, packages: &[String]) -> Result<(), BuildError> {
        if packages.is_empty() {
            return Ok(());
        }
        let state = format!("{} install", self.config.package_manager);
        self.in_state(&state, |br| {
            br.call_hooks(stages::PREYUM, Phase::Setup)?;
            let package_manager = br.config.package_manager.as_str();
            let invocation = match &br.bootstrap_root {
                Some(bootstrap_root) => Invocation::new("chroot")
                    .arg(bootstrap_root.display().to_string())
                    .arg(package_manager),
                None => Invocation::new(package_manager),
            };
            let invocation = invocation
                .arg("--installroot")
                .arg(br.sandbox.root.display().to_string())
                .arg("-y")
                .args(&br.config.package_manager_args)
                .args(br.sandbox.exec.extra_args())
                .arg("install")
                .args(packages);
            br.run_elevated(&invocation, Phase::Setup)?
                .map_err(BuildError::PackageManager)?;
            br.call_hooks(stages::POSTYUM, Phase::Setup)
        })
    }

    /// Build `package` inside the buildroot and copy the results out.
    /// 在构建根内构建 `package` 并将结果复制出来。
    ///
    /// Returns the result files in `resultdir`.
    /// 返回 `resultdir` 中的结果文件。
    #[instrument(skip_all, fields(package = %package.display()))]
    pub fn rebuild(&mut self, package: &Path) -> Result<Vec<PathBuf>, BuildError> {
        self.in_state("build", |br| br.build(package))
    }

    fn build(&mut self, package: &Path) -> Result<Vec<PathBuf>, BuildError> {
        let name = package
            .file_name()
            .ok_or_else(|| BuildError::Other(format!("{} is not a file", package.display())))?
            .to_string_lossy()
            .into_owned();

        match self.as_build_user(Phase::Build, |br| br.build_as_user(package, &name)) {
            Ok(results) => {
                info!(package = %name, results = results.len(), "build finished");
                self.call_hooks(stages::POSTBUILD, Phase::Build)?;
                self.call_hooks(stages::PROCESS_LOGS, Phase::Build)?;
                Ok(results)
            }
            Err(e) => {
                if let Err(hook_err) = self.call_hooks(stages::POSTBUILD, Phase::Build) {
                    warn!(error = %hook_err, "postbuild hook failed after build failure");
                }
                Err(e)
            }
        }
    }

    fn build_as_user(&mut self, package: &Path, name: &str) -> Result<Vec<PathBuf>, BuildError> {
        self.call_hooks(stages::PREBUILD, Phase::Build)?;
        self.call_hooks(stages::PRE_SRPM_BUILD, Phase::Build)?;

        let build_dir = self.build_dir();
        let originals = build_dir.join("originals");
        mkdir(&originals, Phase::Build)?;
        fs::copy(package, originals.join(name)).map_err(|e| {
            BuildError::io(Phase::Build, format!("copy {}", package.display()), e)
        })?;

        let Identity { uid, gid } = self.sandbox.unprivileged();
        let inside = format!(
            "{}/build/originals/{name}",
            self.config.chroothome.trim_end_matches('/')
        );
        let invocation = Invocation::new("chroot")
            .arg(format!("--userspec={uid}:{gid}"))
            .arg(self.sandbox.root.display().to_string())
            .args(self.config.build_argv())
            .arg(inside);
        info!(package = %name, "building");
        self.run_elevated(&invocation, Phase::Build)?
            .map_err(|source| BuildError::BuildFailed {
                package: name.to_string(),
                source,
            })?;

        let results = self.collect_results(&build_dir)?;
        if results.is_empty() {
            return Err(BuildError::NoResults(name.to_string()));
        }
        Ok(results)
    }

    /// Tear down after `init`: unmount, release the lock, verify the
    /// privilege stack and state are balanced.
    /// `init` 之后的清理：卸载、释放锁、校验权限栈和状态已平衡。
    ///
    /// Unmount failures are logged, never returned.
    /// 卸载失败只记录日志，不会返回错误。
    #[instrument(skip_all, fields(root = %self.config.root))]
    pub fn finalize(&mut self) -> Result<(), BuildError> {
        self.unmount_everything();
        let hooks = self.call_hooks(stages::POSTUMOUNT, Phase::Teardown);
        self.lock = None;
        hooks?;
        self.sandbox
            .privs
            .check_balanced(self.base_depth)
            .in_phase(Phase::Teardown)?;
        self.state.all_done()?;
        Ok(())
    }

    /// Unmount everything and delete the buildroot from disk.
    /// 卸载所有内容并从磁盘删除构建根。
    #[instrument(skip_all, fields(root = %self.config.root))]
    pub fn clean(&mut self) -> Result<(), BuildError> {
        let basedir = self.sandbox.basedir.clone();
        if !basedir.exists() {
            info!(path = %basedir.display(), "nothing to clean");
            return Ok(());
        }
        self.in_state("clean", |br| {
            br.take_lock(LockMode::Exclusive)?;
            br.unmount_everything();
            br.call_hooks(stages::UMOUNT_ROOT, Phase::Teardown)?;
            br.lock = None;

            let removed = br
                .sandbox
                .privs
                .elevated(|_| Ok::<_, PrivError>(fs::remove_dir_all(&basedir)))
                .in_phase(Phase::Teardown)?;
            removed.map_err(|e| {
                BuildError::io(Phase::Teardown, format!("remove {}", basedir.display()), e)
            })?;
            info!(path = %basedir.display(), "buildroot removed");
            br.call_hooks(stages::POSTCLEAN, Phase::Teardown)
        })
    }

    /// Run `f` inside the named state, dropping the state again on failure.
    fn in_state<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        let depth = self.state.depth();
        self.state.start(name);
        match f(self) {
            Ok(value) => {
                self.state.finish(name)?;
                Ok(value)
            }
            Err(e) => {
                self.state.unwind(depth);
                Err(e)
            }
        }
    }

    /// Run `f` as the unprivileged user. Root comes back on every exit path.
    fn as_build_user<T>(
        &mut self,
        phase: Phase,
        f: impl FnOnce(&mut Self) -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        let depth = self.sandbox.privs.depth();
        let result = match self.sandbox.privs.drop_privs_temp() {
            Ok(()) => f(self),
            Err(source) => Err(BuildError::Privilege { phase, source }),
        };
        // drop_privs_temp may have failed before saving anything.
        let restored = if self.sandbox.privs.depth() > depth {
            self.sandbox.privs.restore_privs().in_phase(phase)
        } else {
            Ok(())
        };
        let value = result?;
        restored?;
        Ok(value)
    }

    fn call_hooks(&mut self, stage: &str, phase: Phase) -> Result<(), BuildError> {
        self.hooks
            .call_hooks(stage, &mut self.sandbox)
            .in_phase(phase)
    }

    /// Run `invocation` as root. The outer error is the privilege switch,
    /// the inner one the command itself.
    fn run_elevated(
        &mut self,
        invocation: &Invocation,
        phase: Phase,
    ) -> Result<Result<CommandOutput, ExecError>, BuildError> {
        let Sandbox { privs, exec, .. } = &mut self.sandbox;
        privs
            .elevated(|_| Ok::<_, PrivError>(exec.run(invocation)))
            .in_phase(phase)
    }

    fn take_lock(&mut self, mode: LockMode) -> Result<(), BuildError> {
        match &mut self.lock {
            Some(lock) => lock.relock(mode),
            None => {
                self.lock = Some(BuildrootLock::acquire_in(&self.sandbox.basedir, mode)?);
                Ok(())
            }
        }
    }

    /// Let the build group write below the buildroot directory.
    fn share_basedir(&mut self, basedir: &Path) -> Result<(), BuildError> {
        let owner = Identity::new(rootbuild_privs::ROOT, self.sandbox.unprivileged().gid);
        self.sandbox
            .privs
            .change_owner(basedir, Some(owner), false)
            .in_phase(Phase::Setup)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(basedir, fs::Permissions::from_mode(0o2775)).map_err(|e| {
                BuildError::io(Phase::Setup, format!("chmod {}", basedir.display()), e)
            })?;
        }
        Ok(())
    }

    fn create_resultdir(&mut self) -> Result<(), BuildError> {
        let path = self.sandbox.resultdir.clone();
        let created = self
            .sandbox
            .privs
            .as_unprivileged(|_| Ok::<_, PrivError>(fs::create_dir_all(&path)))
            .in_phase(Phase::Setup)?;
        created.map_err(|source| BuildError::ResultDir { path, source })
    }

    fn create_skeleton(&mut self) -> Result<(), BuildError> {
        let mut dirs: Vec<String> = SKELETON_DIRS.iter().map(|d| d.to_string()).collect();
        if self.config.internal_dev_setup {
            dirs.extend(["dev/pts".to_string(), "dev/shm".to_string()]);
        }
        dirs.extend(self.config.extra_chroot_dirs.iter().cloned());
        for dir in &dirs {
            mkdir(&self.sandbox.chroot_path(dir), Phase::Setup)?;
        }
        for file in SKELETON_FILES {
            touch(&self.sandbox.chroot_path(file), Phase::Setup)?;
        }
        debug!(dirs = dirs.len(), "skeleton created");
        Ok(())
    }

    fn build_dir(&self) -> PathBuf {
        self.sandbox
            .chroot_path(&self.config.chroothome)
            .join("build")
    }

    /// Hand the build home to the build user, then let it create the tree.
    fn create_build_dirs(&mut self) -> Result<(), BuildError> {
        let build_dir = self.build_dir();
        mkdir(&build_dir, Phase::Setup)?;
        let home = self.sandbox.chroot_path(&self.config.chroothome);
        self.sandbox
            .privs
            .change_owner(&home, None, true)
            .in_phase(Phase::Setup)?;
        self.as_build_user(Phase::Setup, |_| {
            for dir in BUILD_DIRS {
                mkdir(&build_dir.join(dir), Phase::Setup)?;
            }
            Ok(())
        })
    }

    /// Copy built packages to `resultdir`. Runs as the build user.
    fn collect_results(&self, build_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
        let resultdir = self.sandbox.resultdir.clone();
        mkdir(&resultdir, Phase::Build)?;

        let mut results = Vec::new();
        for sub in ["RPMS", "SRPMS"] {
            let walker = walkdir::WalkDir::new(build_dir.join(sub)).sort_by_file_name();
            for entry in walker.into_iter().filter_map(Result::ok) {
                let path = entry.path();
                if !entry.file_type().is_file()
                    || path.extension().is_none_or(|ext| ext != "rpm")
                {
                    continue;
                }
                let dest = resultdir.join(entry.file_name());
                fs::copy(path, &dest).map_err(|e| {
                    BuildError::io(Phase::Build, format!("copy {}", path.display()), e)
                })?;
                results.push(dest);
            }
        }
        Ok(results)
    }

    /// Unmount the table, then anything else still mounted below the root.
    fn unmount_everything(&mut self) {
        let report = self.sandbox.unmount_all();
        for path in &report.failed {
            warn!(path = %path.display(), "mount left in place");
        }
        self.unmount_residual();
    }

    /// Lazily unmount host mounts below the root that the table does not
    /// know about, deepest first, until nothing more comes off.
    fn unmount_residual(&mut self) {
        let mut previous: Option<Vec<PathBuf>> = None;
        loop {
            let Ok(contents) = fs::read_to_string("/proc/mounts") else {
                return;
            };
            let root = self.sandbox.root.clone();
            let residual: Vec<PathBuf> = parse_proc_mounts(&contents)
                .into_iter()
                .filter(|p| p != &root && p.starts_with(&root))
                .collect();
            if residual.is_empty() || previous.as_ref() == Some(&residual) {
                return;
            }
            for path in residual.iter().rev() {
                let invocation = Invocation::new("umount")
                    .args(["-n", "-l"])
                    .arg(path.display().to_string());
                match self.run_elevated(&invocation, Phase::Teardown) {
                    Ok(Ok(_)) => debug!(path = %path.display(), "residual mount removed"),
                    Ok(Err(e)) => warn!(path = %path.display(), error = %e, "residual umount failed"),
                    Err(e) => warn!(error = %e, "cannot elevate for residual umount"),
                }
            }
            previous = Some(residual);
        }
    }
}

impl std::fmt::Debug for Buildroot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buildroot")
            .field("root", &self.config.root)
            .field("sandbox", &self.sandbox)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn relative(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

fn mkdir(path: &Path, phase: Phase) -> Result<(), BuildError> {
    fs::create_dir_all(path)
        .map_err(|e| BuildError::io(phase, format!("create {}", path.display()), e))
}

fn touch(path: &Path, phase: Phase) -> Result<(), BuildError> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(drop)
        .map_err(|e| BuildError::io(phase, format!("touch {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootbuild_mount::RecordingRunner;
    use rootbuild_privs::MemoryCredentials;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: BuildrootConfig,
        runner: RecordingRunner,
        creds: MemoryCredentials,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = BuildrootConfig {
            root: "test".to_string(),
            basedir: dir.path().to_path_buf(),
            unshare_namespace: false,
            ..BuildrootConfig::default()
        };
        Fixture {
            _dir: dir,
            config,
            runner: RecordingRunner::new(),
            creds: MemoryCredentials::sudo_session(),
        }
    }

    impl Fixture {
        fn buildroot(&self) -> Buildroot {
            let privs = PrivilegeManager::new(Box::new(self.creds.clone()), Identity::new(1000, 135));
            let exec = ExecContext::new(Arc::new(self.runner.clone()));
            Buildroot::new(self.config.clone(), privs, exec).unwrap()
        }
    }

    fn counter(br: &mut Buildroot, stage: &str) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        br.hooks_mut().add_fn(stage, move |_: &mut Sandbox| {
            seen.set(seen.get() + 1);
            Ok(())
        });
        count
    }

    #[test]
    fn test_init_installs_once() {
        let fx = fixture();
        let mut br = fx.buildroot();
        br.init().unwrap();
        assert!(br.is_initialized());
        assert!(br.sandbox().root.join("etc/fstab").is_file());
        assert!(br.sandbox().root.join("builddir/build/SPECS").is_dir());
        br.finalize().unwrap();

        let installs = |lines: &[String]| lines.iter().filter(|l| l.starts_with("dnf ")).count();
        assert_eq!(installs(&fx.runner.command_lines()), 1);

        let mut again = fx.buildroot();
        again.init().unwrap();
        again.finalize().unwrap();
        assert_eq!(installs(&fx.runner.command_lines()), 1);
    }

    #[test]
    fn test_install_failure_runs_initfailed() {
        let fx = fixture();
        fx.runner.fail_on("dnf");
        let mut br = fx.buildroot();
        let failed = counter(&mut br, stages::INITFAILED);
        let err = br.init().unwrap_err();
        assert_eq!(err.exit_code(), 30);
        assert_eq!(failed.get(), 1);
        assert_eq!(br.state().depth(), 0);
        br.finalize().unwrap();
    }

    #[test]
    fn test_rebuild_collects_results() {
        let fx = fixture();
        let mut br = fx.buildroot();
        br.init().unwrap();

        let srpm = fx.config.basedir.join("hello-1.0-1.src.rpm");
        fs::write(&srpm, b"srpm").unwrap();
        let rpms = br.sandbox().root.join("builddir/build/RPMS/x86_64");
        fs::create_dir_all(&rpms).unwrap();
        fs::write(rpms.join("hello-1.0-1.x86_64.rpm"), b"rpm").unwrap();
        fs::write(rpms.join("build.log"), b"log").unwrap();

        let processed = counter(&mut br, stages::PROCESS_LOGS);
        let results = br.rebuild(&srpm).unwrap();
        assert_eq!(results, vec![fx.config.resultdir().join("hello-1.0-1.x86_64.rpm")]);
        assert_eq!(processed.get(), 1);
        assert!(br.sandbox().root.join("builddir/build/originals/hello-1.0-1.src.rpm").is_file());

        let build = fx
            .runner
            .command_lines()
            .into_iter()
            .find(|l| l.starts_with("chroot "))
            .unwrap();
        assert!(build.starts_with("chroot --userspec=1000:135 "));
        assert!(build.ends_with("/builddir/build/originals/hello-1.0-1.src.rpm"));
        br.finalize().unwrap();
    }

    #[test]
    fn test_build_phase_runs_as_build_user() {
        let fx = fixture();
        let mut br = fx.buildroot();
        br.init().unwrap();

        let euid = Rc::new(Cell::new(u32::MAX));
        let seen = Rc::clone(&euid);
        br.hooks_mut().add_fn(stages::PREBUILD, move |sb: &mut Sandbox| {
            seen.set(sb.privs.current()?.euid);
            Ok(())
        });
        let srpm = fx.config.basedir.join("hello-1.0-1.src.rpm");
        fs::write(&srpm, b"srpm").unwrap();
        let rpms = br.sandbox().root.join("builddir/build/RPMS");
        fs::write(rpms.join("hello-1.0-1.x86_64.rpm"), b"rpm").unwrap();

        br.rebuild(&srpm).unwrap();
        assert_eq!(euid.get(), 1000);
        assert!(fx.creds.credentials().is_privileged());
        assert_eq!(br.sandbox().privs.depth(), 0);
        br.finalize().unwrap();
    }

    #[test]
    fn test_build_without_packages_fails() {
        let fx = fixture();
        let mut br = fx.buildroot();
        br.init().unwrap();
        let postbuild = counter(&mut br, stages::POSTBUILD);

        let srpm = fx.config.basedir.join("empty-1-1.src.rpm");
        fs::write(&srpm, b"srpm").unwrap();
        let err = br.rebuild(&srpm).unwrap_err();
        assert!(matches!(err, BuildError::NoResults(ref name) if name == "empty-1-1.src.rpm"));
        assert_eq!(err.exit_code(), 40);
        assert_eq!(postbuild.get(), 1);
        assert!(fx.creds.credentials().is_privileged());
        br.finalize().unwrap();
    }

    #[test]
    fn test_custom_chroothome_builds_there() {
        let mut fx = fixture();
        fx.config.chroothome = "/home/builder".to_string();
        let mut br = fx.buildroot();
        br.init().unwrap();

        let srpm = fx.config.basedir.join("a-1-1.src.rpm");
        fs::write(&srpm, b"srpm").unwrap();
        let rpms = br.sandbox().root.join("home/builder/build/RPMS");
        fs::write(rpms.join("a-1-1.noarch.rpm"), b"rpm").unwrap();

        let results = br.rebuild(&srpm).unwrap();
        assert_eq!(results, vec![fx.config.resultdir().join("a-1-1.noarch.rpm")]);
        let build = fx
            .runner
            .command_lines()
            .into_iter()
            .find(|l| l.starts_with("chroot "))
            .unwrap();
        assert!(build.contains(" --define _topdir /home/builder/build "));
        assert!(build.ends_with(" /home/builder/build/originals/a-1-1.src.rpm"));
        br.finalize().unwrap();
    }

    #[test]
    fn test_build_failure_still_runs_postbuild() {
        let fx = fixture();
        fx.runner.fail_on("chroot");
        let mut br = fx.buildroot();
        br.init().unwrap();
        let postbuild = counter(&mut br, stages::POSTBUILD);

        let srpm = fx.config.basedir.join("broken-1-1.src.rpm");
        fs::write(&srpm, b"srpm").unwrap();
        let err = br.rebuild(&srpm).unwrap_err();
        assert_eq!(err.exit_code(), 10);
        assert_eq!(postbuild.get(), 1);
        br.finalize().unwrap();
    }

    #[test]
    fn test_locked_buildroot() {
        let fx = fixture();
        let dir = fx.config.buildroot_dir();
        fs::create_dir_all(&dir).unwrap();
        let _held = BuildrootLock::acquire_in(&dir, LockMode::Exclusive).unwrap();

        let mut br = fx.buildroot();
        assert_eq!(br.init().unwrap_err().exit_code(), 60);
    }

    #[test]
    fn test_essential_before_user_teardown_order() {
        let mut fx = fixture();
        let host = fx.config.basedir.join("host-cache");
        fs::create_dir_all(&host).unwrap();
        fx.config.extensions = vec![rootbuild_hooks::ExtensionConfig::enabled(
            "bind_mount",
            serde_json::json!({"dirs": [[host, "/var/cache/host"]]}),
        )];
        let mut br = fx.buildroot();
        br.init().unwrap();
        fx.runner.clear();
        br.finalize().unwrap();

        let lines = fx.runner.command_lines();
        let user = lines.iter().position(|l| l.ends_with("/var/cache/host")).unwrap();
        let proc = lines.iter().position(|l| l.ends_with("/root/proc")).unwrap();
        assert!(user < proc);
    }

    #[test]
    fn test_clean_removes_buildroot() {
        let fx = fixture();
        let mut br = fx.buildroot();
        br.init().unwrap();
        br.finalize().unwrap();

        let cleaned = counter(&mut br, stages::POSTCLEAN);
        br.clean().unwrap();
        assert!(!fx.config.buildroot_dir().exists());
        assert_eq!(cleaned.get(), 1);
        assert_eq!(fx.creds.credentials(), rootbuild_privs::Credentials::root());
    }
}
