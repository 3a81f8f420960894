//! Mount point descriptors.

use crate::exec::Invocation;
use std::path::{Path, PathBuf};

/// Which part of the lifecycle owns a mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountClass {
    /// Kernel filesystems every sandbox needs. Mounted first, unmounted last.
    Essential,
    /// Owned by the tool or an extension, mounted together with the
    /// essential set.
    Managed,
    /// Configured by the user through an extension, mounted after `postinit`.
    User,
    /// Mounted and unmounted only on explicit request (the tmpfs root).
    Standalone,
}

/// Something to attach inside the sandbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountPoint {
    /// Bind an existing host path onto `target`.
    Bind {
        source: PathBuf,
        target: PathBuf,
        recursive: bool,
        options: Vec<String>,
    },
    /// Mount a device or pseudo filesystem of type `fstype`.
    Filesystem {
        device: String,
        target: PathBuf,
        fstype: String,
        options: Vec<String>,
    },
    /// Mount a fresh tmpfs.
    Tmpfs { target: PathBuf, options: Vec<String> },
}

impl MountPoint {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        MountPoint::Bind {
            source: source.into(),
            target: target.into(),
            recursive: false,
            options: Vec::new(),
        }
    }

    pub fn filesystem(
        device: impl Into<String>,
        target: impl Into<PathBuf>,
        fstype: impl Into<String>,
    ) -> Self {
        MountPoint::Filesystem {
            device: device.into(),
            target: target.into(),
            fstype: fstype.into(),
            options: Vec::new(),
        }
    }

    pub fn tmpfs(target: impl Into<PathBuf>) -> Self {
        MountPoint::Tmpfs {
            target: target.into(),
            options: Vec::new(),
        }
    }

    /// Make a bind point recursive (`rbind`). No effect on other kinds.
    pub fn recursive(mut self) -> Self {
        if let MountPoint::Bind { recursive, .. } = &mut self {
            *recursive = true;
        }
        self
    }

    /// Append mount options.
    pub fn with_options<I, S>(mut self, opts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = match &mut self {
            MountPoint::Bind { options, .. }
            | MountPoint::Filesystem { options, .. }
            | MountPoint::Tmpfs { options, .. } => options,
        };
        list.extend(
            opts.into_iter()
                .map(Into::into)
                .filter(|o: &String| !o.is_empty()),
        );
        self
    }

    /// Path inside the sandbox the point is attached to.
    pub fn target(&self) -> &Path {
        match self {
            MountPoint::Bind { target, .. }
            | MountPoint::Filesystem { target, .. }
            | MountPoint::Tmpfs { target, .. } => target,
        }
    }

    /// The source as `mount` sees it.
    pub fn source(&self) -> String {
        match self {
            MountPoint::Bind { source, .. } => source.display().to_string(),
            MountPoint::Filesystem { device, .. } => device.clone(),
            MountPoint::Tmpfs { .. } => "tmpfs".to_string(),
        }
    }

    pub fn options(&self) -> &[String] {
        match self {
            MountPoint::Bind { options, .. }
            | MountPoint::Filesystem { options, .. }
            | MountPoint::Tmpfs { options, .. } => options,
        }
    }

    /// Filesystem type, `None` for bind points.
    pub fn fstype(&self) -> Option<&str> {
        match self {
            MountPoint::Bind { .. } => None,
            MountPoint::Filesystem { fstype, .. } => Some(fstype),
            MountPoint::Tmpfs { .. } => Some("tmpfs"),
        }
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self, MountPoint::Bind { recursive: true, .. })
    }

    /// Commands that attach this point, in order.
    ///
    /// Bind points are attached first and then remounted to apply their
    /// options, since the kernel ignores most flags on the initial bind.
    pub fn mount_commands(&self) -> Vec<Invocation> {
        let target = self.target().display().to_string();
        match self {
            MountPoint::Bind {
                source,
                recursive,
                options,
                ..
            } => {
                let bind = if *recursive { "rbind" } else { "bind" };
                let mut cmds = vec![
                    Invocation::new("mount")
                        .args(["-n", "-o", bind])
                        .arg(source.display().to_string())
                        .arg(target.clone()),
                ];
                if !options.is_empty() {
                    let remount = format!("remount,{},{bind}", options.join(","));
                    cmds.push(
                        Invocation::new("mount")
                            .args(["-n", "-o"])
                            .arg(remount)
                            .arg("--target")
                            .arg(target),
                    );
                }
                cmds
            }
            MountPoint::Filesystem { fstype, options, .. } => {
                vec![fs_mount(fstype, options, self.source(), target)]
            }
            MountPoint::Tmpfs { options, .. } => {
                vec![fs_mount("tmpfs", options, self.source(), target)]
            }
        }
    }

    /// Plain unmount command.
    pub fn unmount_command(&self) -> Invocation {
        Invocation::new("umount")
            .arg("-n")
            .arg(self.target().display().to_string())
    }

    /// Forced recursive unmount used when the plain one fails.
    pub fn force_unmount_command(&self) -> Invocation {
        Invocation::new("umount")
            .args(["-n", "-R", "-f"])
            .arg(self.target().display().to_string())
    }
}

fn fs_mount(fstype: &str, options: &[String], source: String, target: String) -> Invocation {
    let mut cmd = Invocation::new("mount").args(["-n", "-t", fstype]);
    if !options.is_empty() {
        cmd = cmd.arg("-o").arg(options.join(","));
    }
    cmd.arg(source).arg(target)
}
