//! The mount table.

use crate::exec::{CommandRunner, run_checked};
use crate::point::{MountClass, MountPoint};
use crate::MountError;
use rootbuild_privs::{PrivError, PrivilegeManager};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Handle returned by [`MountTable::add`].
pub type MountId = usize;

#[derive(Debug)]
struct Entry {
    point: MountPoint,
    class: MountClass,
    mounted: bool,
}

/// How an unmount attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// Was not mounted; nothing ran.
    NotMounted,
    /// The plain unmount worked.
    Unmounted,
    /// Needed the forced recursive unmount.
    Forced,
    /// Both attempts failed; the point is still considered mounted.
    Failed,
}

impl UnmountOutcome {
    pub fn is_failure(self) -> bool {
        self == UnmountOutcome::Failed
    }
}

/// Summary of [`MountTable::unmount_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmountReport {
    pub unmounted: usize,
    pub failed: Vec<PathBuf>,
}

impl UnmountReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registered mount points and their state.
#[derive(Debug, Default)]
pub struct MountTable {
    entries: Vec<Entry>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mount point. It is not mounted yet.
    pub fn add(&mut self, point: MountPoint, class: MountClass) -> MountId {
        debug!(path = %point.target().display(), ?class, "registering mount point");
        self.entries.push(Entry {
            point,
            class,
            mounted: false,
        });
        self.entries.len() - 1
    }

    pub fn get(&self, id: MountId) -> Option<&MountPoint> {
        self.entries.get(id).map(|e| &e.point)
    }

    pub fn class(&self, id: MountId) -> Option<MountClass> {
        self.entries.get(id).map(|e| e.class)
    }

    pub fn is_mounted(&self, id: MountId) -> bool {
        self.entries.get(id).is_some_and(|e| e.mounted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of every point in `class`, in registration order.
    pub fn ids(&self, class: MountClass) -> Vec<MountId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.class == class)
            .map(|(id, _)| id)
            .collect()
    }

    /// Targets of every registered point except standalone ones.
    pub fn mountpoints(&self) -> Vec<&Path> {
        self.entries
            .iter()
            .filter(|e| e.class != MountClass::Standalone)
            .map(|e| e.point.target())
            .collect()
    }

    /// Attach a point. Returns `false` when it was already mounted.
    ///
    /// The target must already exist; creating it is the job of whoever
    /// registered the point.
    #[instrument(skip_all, fields(id = id))]
    pub fn mount(
        &mut self,
        id: MountId,
        privs: &mut PrivilegeManager,
        runner: &dyn CommandRunner,
    ) -> Result<bool, MountError> {
        let entry = self.entries.get(id).ok_or(MountError::UnknownPoint(id))?;
        let target = entry.point.target().to_path_buf();
        if entry.mounted {
            debug!(path = %target.display(), "already mounted");
            return Ok(false);
        }
        if target.symlink_metadata().is_err() {
            return Err(MountError::MissingTarget { target });
        }

        let commands = entry.point.mount_commands();
        privs.elevated(|_| {
            for cmd in &commands {
                run_checked(runner, cmd).map_err(|source| MountError::Command {
                    target: target.clone(),
                    source,
                })?;
            }
            Ok::<(), MountError>(())
        })?;

        info!(path = %target.display(), "mounted");
        if let Some(entry) = self.entries.get_mut(id) {
            entry.mounted = true;
        }
        Ok(true)
    }

    /// Detach a point, escalating to a forced recursive unmount.
    ///
    /// Never fails: a point that cannot be unmounted is logged and left
    /// marked as mounted.
    #[instrument(skip_all, fields(id = id))]
    pub fn unmount(
        &mut self,
        id: MountId,
        privs: &mut PrivilegeManager,
        runner: &dyn CommandRunner,
    ) -> UnmountOutcome {
        let Some(entry) = self.entries.get(id) else {
            warn!(id, "unmount of unknown mount point");
            return UnmountOutcome::Failed;
        };
        if !entry.mounted {
            return UnmountOutcome::NotMounted;
        }
        let point = entry.point.clone();
        let target = point.target().display().to_string();

        let outcome = privs.elevated(|_| -> Result<UnmountOutcome, PrivError> {
            if run_checked(runner, &point.unmount_command()).is_ok() {
                return Ok(UnmountOutcome::Unmounted);
            }
            warn!(path = %target, "umount failed, retrying with force");
            match run_checked(runner, &point.force_unmount_command()) {
                Ok(_) => Ok(UnmountOutcome::Forced),
                Err(e) => {
                    warn!(path = %target, error = %e, "forced umount failed");
                    Ok(UnmountOutcome::Failed)
                }
            }
        });
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(path = %target, error = %e, "cannot elevate for umount");
                UnmountOutcome::Failed
            }
        };

        if !outcome.is_failure() {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.mounted = false;
            }
        }
        outcome
    }

    /// Mount the essential points, then the managed ones.
    #[instrument(skip_all)]
    pub fn mount_all_essential(
        &mut self,
        privs: &mut PrivilegeManager,
        runner: &dyn CommandRunner,
    ) -> Result<(), MountError> {
        for id in self.ids(MountClass::Essential) {
            self.mount(id, privs, runner)?;
        }
        for id in self.ids(MountClass::Managed) {
            self.mount(id, privs, runner)?;
        }
        Ok(())
    }

    /// Mount the user points, bringing up the essential set first if needed.
    #[instrument(skip_all)]
    pub fn mount_all_user(
        &mut self,
        privs: &mut PrivilegeManager,
        runner: &dyn CommandRunner,
    ) -> Result<(), MountError> {
        for id in self.ids(MountClass::Essential) {
            self.mount(id, privs, runner)?;
        }
        for id in self.ids(MountClass::User) {
            self.mount(id, privs, runner)?;
        }
        Ok(())
    }

    /// Unmount everything except standalone points.
    ///
    /// Managed and user points are tried in reverse order, and the pass is
    /// repeated while it keeps making progress since one mount may hold
    /// another busy. Essential points come down last.
    #[instrument(skip_all)]
    pub fn unmount_all(
        &mut self,
        privs: &mut PrivilegeManager,
        runner: &dyn CommandRunner,
    ) -> UnmountReport {
        let mut report = UnmountReport::default();
        let movable: Vec<MountId> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.class, MountClass::Managed | MountClass::User))
            .map(|(id, _)| id)
            .collect();

        let mut previous_failures = usize::MAX;
        loop {
            let mut failures = 0;
            for &id in movable.iter().rev() {
                match self.unmount(id, privs, runner) {
                    UnmountOutcome::Failed => failures += 1,
                    UnmountOutcome::NotMounted => {}
                    _ => report.unmounted += 1,
                }
            }
            if failures == 0 || failures == previous_failures {
                break;
            }
            previous_failures = failures;
        }

        for id in self.ids(MountClass::Essential).into_iter().rev() {
            match self.unmount(id, privs, runner) {
                UnmountOutcome::Failed => {}
                UnmountOutcome::NotMounted => {}
                _ => report.unmounted += 1,
            }
        }

        report.failed = self
            .entries
            .iter()
            .filter(|e| e.mounted && e.class != MountClass::Standalone)
            .map(|e| e.point.target().to_path_buf())
            .collect();
        if !report.is_clean() {
            warn!(failed = report.failed.len(), "some mounts could not be removed");
        }
        report
    }

    /// Mark points as mounted when `proc_mounts` lists their target.
    ///
    /// `proc_mounts` is the content of `/proc/mounts`.
    pub fn sync_with_host(&mut self, proc_mounts: &str) {
        let active = parse_proc_mounts(proc_mounts);
        for entry in &mut self.entries {
            let target = normalize(entry.point.target());
            if active.iter().any(|p| normalize(p) == target) {
                entry.mounted = true;
            }
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

/// Mount targets listed in a `/proc/mounts` style table.
pub fn parse_proc_mounts(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

// The kernel escapes space, tab, newline and backslash as \ooo.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d)) && digits[0] <= b'3'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RecordingRunner;
    use rootbuild_privs::{Identity, MemoryCredentials};
    use tempfile::TempDir;

    fn privs() -> PrivilegeManager {
        PrivilegeManager::new(
            Box::new(MemoryCredentials::sudo_session()),
            Identity::new(1000, 1000),
        )
    }

    #[test]
    fn test_mount_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let mut privs = privs();
        let mut table = MountTable::new();
        let id = table.add(MountPoint::tmpfs(dir.path()), MountClass::Managed);

        assert!(table.mount(id, &mut privs, &runner).unwrap());
        assert!(!table.mount(id, &mut privs, &runner).unwrap());
        assert_eq!(runner.calls().len(), 1);
        assert!(table.is_mounted(id));
        assert_eq!(privs.depth(), 0);
    }

    #[test]
    fn test_missing_target_runs_nothing() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let mut privs = privs();
        let mut table = MountTable::new();
        let id = table.add(
            MountPoint::bind("/srv", dir.path().join("absent")),
            MountClass::User,
        );

        let err = table.mount(id, &mut privs, &runner).unwrap_err();
        assert!(matches!(err, MountError::MissingTarget { .. }));
        assert!(runner.calls().is_empty());
        assert!(!table.is_mounted(id));
    }

    #[test]
    fn test_failed_mount_not_marked() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        runner.fail_on("mount -n");
        let mut privs = privs();
        let mut table = MountTable::new();
        let id = table.add(MountPoint::tmpfs(dir.path()), MountClass::Managed);

        assert!(matches!(
            table.mount(id, &mut privs, &runner),
            Err(MountError::Command { .. })
        ));
        assert!(!table.is_mounted(id));
        assert_eq!(privs.depth(), 0);
    }

    #[test]
    fn test_unmount_escalates_then_gives_up() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let mut privs = privs();
        let mut table = MountTable::new();
        let id = table.add(MountPoint::tmpfs(dir.path()), MountClass::Managed);
        table.mount(id, &mut privs, &runner).unwrap();

        runner.fail_times("umount -n", 1);
        assert_eq!(table.unmount(id, &mut privs, &runner), UnmountOutcome::Forced);
        assert!(!table.is_mounted(id));

        table.mount(id, &mut privs, &runner).unwrap();
        runner.fail_on("umount");
        assert_eq!(table.unmount(id, &mut privs, &runner), UnmountOutcome::Failed);
        assert!(table.is_mounted(id));
    }

    #[test]
    fn test_unmount_all_order() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let mut privs = privs();
        let mut table = MountTable::new();
        for name in ["proc", "user", "managed"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        table.add(MountPoint::tmpfs(dir.path().join("proc")), MountClass::Essential);
        table.add(MountPoint::tmpfs(dir.path().join("managed")), MountClass::Managed);
        table.add(MountPoint::tmpfs(dir.path().join("user")), MountClass::User);

        table.mount_all_user(&mut privs, &runner).unwrap();
        table.mount_all_essential(&mut privs, &runner).unwrap();
        runner.clear();

        let report = table.unmount_all(&mut privs, &runner);
        assert!(report.is_clean());
        assert_eq!(report.unmounted, 3);
        let order: Vec<String> = runner.command_lines();
        assert!(order[0].ends_with("/user"));
        assert!(order[1].ends_with("/managed"));
        assert!(order[2].ends_with("/proc"));
    }

    #[test]
    fn test_parse_proc_mounts() {
        let contents = "proc /proc proc rw 0 0\ntmpfs /var/lib/my\\040root tmpfs rw 0 0\n";
        assert_eq!(
            parse_proc_mounts(contents),
            vec![PathBuf::from("/proc"), PathBuf::from("/var/lib/my root")]
        );
    }

    #[test]
    fn test_sync_with_host() {
        let mut table = MountTable::new();
        let a = table.add(MountPoint::tmpfs("/var/lib/rb/root/proc/"), MountClass::Essential);
        let b = table.add(MountPoint::tmpfs("/var/lib/rb/root/sys"), MountClass::Essential);
        table.sync_with_host("proc /var/lib/rb/root/proc proc rw 0 0\n");
        assert!(table.is_mounted(a));
        assert!(!table.is_mounted(b));
    }
}
