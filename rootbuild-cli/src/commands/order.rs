//! The `rootbuild order` command.
//!
//! Prints the total build order, then the parallel-buildable groups.

use rootbuild_builder::{BuildError, InPhase, Phase};
use rootbuild_mount::SystemRunner;
use rootbuild_order::{BuildOrder, ManifestInspector, OrderError, RpmInspector, Scheduler};
use rootbuild_privs::{Identity, PrivError, PrivilegeManager};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn run(srpms: &[PathBuf], manifest: Option<&Path>) -> Result<(), BuildError> {
    let order = schedule(srpms, manifest, Privileges::DropForever)?;
    print!("{}", format_order(&order));
    Ok(())
}

/// How much root a scheduling run gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privileges {
    /// Never regain root afterwards.
    DropForever,
    /// Run the package queries as the build user, then return to root.
    DropWhileScheduling,
}

/// Schedule `srpms`, from `manifest` when given, else by querying the
/// packages. Package queries never run as root.
pub fn schedule(
    srpms: &[PathBuf],
    manifest: Option<&Path>,
    privileges: Privileges,
) -> Result<BuildOrder, BuildError> {
    match manifest {
        Some(path) => {
            let inspector = ManifestInspector::load(path).map_err(order_error)?;
            Scheduler::new(&inspector).schedule(srpms).map_err(order_error)
        }
        None => {
            let identity = Identity::from_env().in_phase(Phase::Setup)?;
            let mut privs = PrivilegeManager::system(identity);
            without_root(&mut privs, privileges, || {
                let inspector = RpmInspector::new(Arc::new(SystemRunner));
                Scheduler::new(&inspector).schedule(srpms).map_err(order_error)
            })
        }
    }
}

/// Run `f` as the build user when the process is privileged.
fn without_root<T>(
    privs: &mut PrivilegeManager,
    privileges: Privileges,
    f: impl FnOnce() -> Result<T, BuildError>,
) -> Result<T, BuildError> {
    if !privs.current().in_phase(Phase::Setup)?.is_privileged() {
        return f();
    }
    match privileges {
        Privileges::DropForever => {
            privs.drop_privs_forever().in_phase(Phase::Setup)?;
            f()
        }
        Privileges::DropWhileScheduling => privs
            .as_unprivileged(|_| Ok::<_, PrivError>(f()))
            .in_phase(Phase::Setup)?,
    }
}

fn order_error(e: OrderError) -> BuildError {
    BuildError::Other(format!("cannot schedule packages: {e}"))
}

/// Render a build order for the terminal.
pub fn format_order(order: &BuildOrder) -> String {
    let mut out = String::from("Full sorted list - in build order:\n");
    for id in &order.order {
        let _ = writeln!(out, "{id}");
    }
    out.push_str("\ngroups:\n");
    for (index, group) in order.groups.iter().enumerate() {
        let _ = writeln!(out, "group: {}", index + 1);
        for id in group {
            let _ = writeln!(out, "  {id}");
        }
    }
    if !order.is_complete() {
        let _ = writeln!(
            out,
            "\nNOTE: input had {} packages, the sorted list has {}.",
            order.input_count,
            order.order.len()
        );
        out.push_str("NOTE: duplicate file names or unexpected metadata may be the cause.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootbuild_privs::MemoryCredentials;

    #[test]
    fn test_format_order() {
        let order = BuildOrder {
            order: vec!["y.src.rpm".into(), "x.src.rpm".into()],
            groups: vec![vec!["y.src.rpm".into()], vec!["x.src.rpm".into()]],
            broken_cycles: Vec::new(),
            input_count: 2,
        };
        let text = format_order(&order);
        assert!(text.starts_with("Full sorted list - in build order:\ny.src.rpm\nx.src.rpm\n"));
        assert!(text.contains("groups:\ngroup: 1\n  y.src.rpm\ngroup: 2\n  x.src.rpm\n"));
        assert!(!text.contains("NOTE"));
    }

    #[test]
    fn test_format_notes_mismatch() {
        let order = BuildOrder {
            order: vec!["a".into()],
            groups: vec![vec!["a".into()]],
            broken_cycles: Vec::new(),
            input_count: 2,
        };
        assert!(format_order(&order).contains("NOTE: input had 2 packages, the sorted list has 1."));
    }

    fn sudo_privs() -> (PrivilegeManager, MemoryCredentials) {
        let creds = MemoryCredentials::sudo_session();
        let privs = PrivilegeManager::new(Box::new(creds.clone()), Identity::new(1000, 135));
        (privs, creds)
    }

    #[test]
    fn test_queries_run_as_build_user_then_root_returns() {
        let (mut privs, creds) = sudo_privs();
        let euid = without_root(&mut privs, Privileges::DropWhileScheduling, || {
            Ok(creds.credentials().euid)
        })
        .unwrap();
        assert_eq!(euid, 1000);
        assert!(creds.credentials().is_privileged());
        assert_eq!(privs.depth(), 0);
    }

    #[test]
    fn test_order_drops_root_for_good() {
        let (mut privs, creds) = sudo_privs();
        let euid = without_root(&mut privs, Privileges::DropForever, || Ok(creds.credentials().euid))
            .unwrap();
        assert_eq!(euid, 1000);
        assert_eq!(creds.saved_uid(), 1000);
    }
}
