//! Compiled-in extensions.
//! 内置扩展。
//!
//! Extensions are selected by name in the `extensions` configuration list and
//! initialized in that order.
//! 扩展通过配置中 `extensions` 列表的名称选择，并按该顺序初始化。

pub mod bind_mount;
pub mod mount;
pub mod tmpfs;

use crate::Sandbox;
use rootbuild_hooks::ExtensionTable;
use std::path::Path;

/// Table of every built-in extension.
/// 所有内置扩展的表。
pub fn builtin_extensions() -> ExtensionTable<Sandbox> {
    ExtensionTable::new(vec![
        tmpfs::descriptor(),
        bind_mount::descriptor(),
        mount::descriptor(),
    ])
}

/// Create `path` as a directory, or as an empty file when `as_file` is set.
/// 将 `path` 创建为目录；`as_file` 为真时创建为空文件。
pub(crate) fn create_target(path: &Path, as_file: bool) -> std::io::Result<()> {
    if !as_file {
        return std::fs::create_dir_all(path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_names() {
        let table = builtin_extensions();
        let names: Vec<_> = table.names().collect();
        assert_eq!(names, vec!["tmpfs", "bind_mount", "mount"]);
        for name in names {
            table.get(name).unwrap().check_compatible().unwrap();
        }
    }

    #[test]
    fn test_create_target() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("etc/resolv.conf");
        create_target(&file, true).unwrap();
        assert!(file.is_file());
        let sub = dir.path().join("a/b");
        create_target(&sub, false).unwrap();
        assert!(sub.is_dir());
    }
}
