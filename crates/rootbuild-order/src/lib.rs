//! Build order scheduling.
//!
//! Given a batch of source packages, work out which ones need which others
//! built first and split them into groups that can build in parallel:
//!
//! 1. ask a [`PackageInspector`] what each package produces and requires,
//! 2. add an edge `A -> B` when `A` requires something `B` produces,
//! 3. break dependency loops (logged, never fatal),
//! 4. level the graph with a topological sort.
//!
//! Packages are identified by file name. Requirements satisfied from outside
//! the batch are ignored.

pub mod graph;
pub mod inspect;

pub use graph::{BuildOrder, DependencyGraph, PackageInfo};
pub use inspect::{ManifestInspector, MemoryInspector, PackageInspector, RpmInspector, package_id};

use rootbuild_mount::ExecError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument};

/// Errors raised while gathering package metadata.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("package query failed: {0}")]
    Query(#[from] ExecError),
}

/// Schedules batches with a given inspector.
pub struct Scheduler<'a, I: PackageInspector + ?Sized> {
    inspector: &'a I,
}

impl<'a, I: PackageInspector + ?Sized> Scheduler<'a, I> {
    pub fn new(inspector: &'a I) -> Self {
        Self { inspector }
    }

    /// Collect metadata for every package in the batch.
    pub fn inspect<P: AsRef<Path>>(
        &self,
        packages: &[P],
    ) -> Result<BTreeMap<String, PackageInfo>, OrderError> {
        let mut infos = BTreeMap::new();
        for package in packages {
            let package = package.as_ref();
            let info = PackageInfo {
                produces: self.inspector.produces(package)?,
                requires: self.inspector.requires(package)?,
            };
            infos.insert(package_id(package), info);
        }
        Ok(infos)
    }

    /// Compute the build order for `packages`.
    #[instrument(skip_all, fields(packages = packages.len()))]
    pub fn schedule<P: AsRef<Path>>(&self, packages: &[P]) -> Result<BuildOrder, OrderError> {
        let infos = self.inspect(packages)?;
        let order = DependencyGraph::build(&infos).into_order(packages.len());
        info!(groups = order.groups.len(), "build order computed");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_package_scenario() {
        let mut inspector = MemoryInspector::new();
        inspector.add("x.src.rpm", &["X"], &["Y"]);
        inspector.add("y.src.rpm", &["Y"], &[]);

        let order = Scheduler::new(&inspector)
            .schedule(&["x.src.rpm", "y.src.rpm"])
            .unwrap();
        assert_eq!(order.order, vec!["y.src.rpm", "x.src.rpm"]);
        assert_eq!(order.groups, vec![vec!["y.src.rpm"], vec!["x.src.rpm"]]);
    }

    #[test]
    fn test_isolated_packages_share_a_group() {
        let mut inspector = MemoryInspector::new();
        inspector.add("p", &["P"], &[]);
        inspector.add("q", &["Q"], &[]);
        inspector.add("r", &["R"], &["P", "Q"]);

        let order = Scheduler::new(&inspector).schedule(&["r", "q", "p"]).unwrap();
        assert_eq!(order.groups, vec![vec!["p", "q"], vec!["r"]]);
        assert!(order.broken_cycles.is_empty());
    }

    #[test]
    fn test_duplicate_basename_counts_once() {
        let inspector = MemoryInspector::new();
        let order = Scheduler::new(&inspector)
            .schedule(&["/a/foo.src.rpm", "/b/foo.src.rpm"])
            .unwrap();
        assert_eq!(order.order.len(), 1);
        assert!(!order.is_complete());
    }
}
