//! The `rootbuild chain` command.
//!
//! Each package is rebuilt by a child `rootbuild rebuild` process so every
//! build gets its own privilege state and mount namespace.

use super::order::{Privileges, schedule};
use crate::output;
use rootbuild_builder::{BuildError, BuildrootConfig, Phase, run_chain};
use rootbuild_order::package_id;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;

pub fn run(
    config: &BuildrootConfig,
    config_path: Option<&Path>,
    srpms: &[PathBuf],
    manifest: Option<&Path>,
) -> Result<(), BuildError> {
    // Children need root, so the parent only gives it up for the queries.
    let order = schedule(srpms, manifest, Privileges::DropWhileScheduling)?;
    let paths: HashMap<String, &PathBuf> = srpms.iter().map(|p| (package_id(p), p)).collect();
    let exe = std::env::current_exe()
        .map_err(|e| BuildError::io(Phase::Setup, "locate the rootbuild binary", e))?;
    let parallel = config.max_jobs > 1;

    let report = run_chain(&order.groups, config.max_jobs, |id| {
        let Some(path) = paths.get(id) else {
            warn!(package = id, "scheduled package has no input path");
            return false;
        };
        let mut cmd = Command::new(&exe);
        if let Some(cfg) = config_path {
            cmd.arg("--config").arg(cfg);
        }
        if parallel {
            // One buildroot per package, removed again afterwards.
            cmd.arg("--uniqueext").arg(buildroot_suffix(id));
            cmd.arg("rebuild").arg("--cleanup-after");
        } else {
            cmd.arg("rebuild");
        }
        cmd.arg(path);
        match cmd.status() {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(package = id, code = ?status.code(), "rebuild failed");
                false
            }
            Err(e) => {
                warn!(package = id, error = %e, "cannot start rebuild");
                false
            }
        }
    });

    for id in &report.built {
        output::success(&format!("built {id}"));
    }
    for id in &report.skipped {
        output::warning(&format!("skipped {id}"));
    }
    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(BuildError::ChainFailed(report.failed))
    }
}

/// Buildroot name suffix for `id`: alphanumerics kept, the rest mapped to `_`.
fn buildroot_suffix(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buildroot_suffix() {
        assert_eq!(buildroot_suffix("hello-1.0-1.src.rpm"), "hello_1_0_1_src_rpm");
    }
}
