//! The sandbox handle passed to every hook.
//! 传递给每个钩子的沙箱句柄。

use rootbuild_mount::{
    ExecContext, MountError, MountId, MountPoint, MountTable, UnmountOutcome, UnmountReport,
};
use rootbuild_privs::{Identity, PrivilegeManager};
use std::path::{Path, PathBuf};

/// Fallback gid of the `tty` group.
/// `tty` 组的后备 gid。
const DEFAULT_TTY_GID: u32 = 5;

/// One buildroot's filesystem tree plus the components that act on it.
/// 单个构建根的文件系统树以及操作它的组件。
#[derive(Debug)]
pub struct Sandbox {
    /// Root of the tree builds run in. / 构建运行所在树的根。
    pub root: PathBuf,
    /// `<basedir>/<name>`, holding the lock, `root` and `result`.
    /// `<basedir>/<name>`，包含锁、`root` 和 `result`。
    pub basedir: PathBuf,
    pub resultdir: PathBuf,
    pub is_bootstrap: bool,
    pub privs: PrivilegeManager,
    pub mounts: MountTable,
    pub exec: ExecContext,
}

impl Sandbox {
    pub fn new(
        root: PathBuf,
        basedir: PathBuf,
        resultdir: PathBuf,
        is_bootstrap: bool,
        privs: PrivilegeManager,
        exec: ExecContext,
    ) -> Self {
        Self {
            root,
            basedir,
            resultdir,
            is_bootstrap,
            privs,
            mounts: MountTable::new(),
            exec,
        }
    }

    /// Host path of `path` as seen from inside the sandbox.
    /// 沙箱内路径 `path` 在主机上的路径。
    pub fn chroot_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    pub fn unprivileged(&self) -> Identity {
        self.privs.unprivileged()
    }

    pub fn mount(&mut self, id: MountId) -> Result<bool, MountError> {
        self.mounts.mount(id, &mut self.privs, self.exec.runner())
    }

    pub fn unmount(&mut self, id: MountId) -> UnmountOutcome {
        self.mounts.unmount(id, &mut self.privs, self.exec.runner())
    }

    pub fn mount_all_essential(&mut self) -> Result<(), MountError> {
        self.mounts
            .mount_all_essential(&mut self.privs, self.exec.runner())
    }

    pub fn mount_all_user(&mut self) -> Result<(), MountError> {
        self.mounts.mount_all_user(&mut self.privs, self.exec.runner())
    }

    pub fn unmount_all(&mut self) -> UnmountReport {
        self.mounts.unmount_all(&mut self.privs, self.exec.runner())
    }
}

/// Kernel filesystems every buildroot gets.
/// 每个构建根都会获得的内核文件系统。
///
/// `/proc` and `/sys` are first hidden behind a private tmpfs, then the host
/// trees are bound read-only on top.
/// `/proc` 和 `/sys` 先被私有 tmpfs 遮盖，再以只读方式绑定主机目录。
pub fn essential_mounts(root: &Path, internal_dev_setup: bool, tty_gid: u32) -> Vec<MountPoint> {
    let mut points = Vec::new();
    for fs in ["proc", "sys"] {
        let target = root.join(fs);
        points.push(
            MountPoint::filesystem(format!("rootbuild_hide_{fs}fs_from_host"), &target, "tmpfs")
                .with_options(["rprivate"]),
        );
        points.push(
            MountPoint::bind(format!("/{fs}"), &target)
                .recursive()
                .with_options(["nodev", "noexec", "nosuid", "readonly", "rprivate"]),
        );
    }
    if internal_dev_setup {
        points.push(MountPoint::tmpfs(root.join("dev/shm")));
        points.push(
            MountPoint::filesystem("rootbuild_devpts", root.join("dev/pts"), "devpts")
                .with_options([
                    format!("gid={tty_gid}"),
                    "mode=0620".to_string(),
                    "ptmxmode=0666".to_string(),
                    "newinstance".to_string(),
                ]),
        );
    }
    points
}

/// Gid of the host `tty` group.
/// 主机 `tty` 组的 gid。
#[cfg(unix)]
pub fn tty_gid() -> u32 {
    match nix::unistd::Group::from_name("tty") {
        Ok(Some(group)) => group.gid.as_raw(),
        _ => DEFAULT_TTY_GID,
    }
}

#[cfg(not(unix))]
pub fn tty_gid() -> u32 {
    DEFAULT_TTY_GID
}
