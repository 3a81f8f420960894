//! Reading build metadata out of source packages.

use crate::OrderError;
use rootbuild_mount::{CommandRunner, Invocation, run_checked};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of package metadata.
pub trait PackageInspector {
    /// Binary package names (and their provides) the package would produce.
    fn produces(&self, package: &Path) -> Result<BTreeSet<String>, OrderError>;

    /// Names the package needs at build time.
    fn requires(&self, package: &Path) -> Result<BTreeSet<String>, OrderError>;
}

/// Node identifier for a package: its file name.
pub fn package_id(package: &Path) -> String {
    package
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| package.display().to_string())
}

/// In-memory inspector for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryInspector {
    packages: HashMap<String, ManifestEntry>,
}

impl MemoryInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: &str, provides: &[&str], requires: &[&str]) {
        self.packages.insert(
            id.to_string(),
            ManifestEntry {
                provides: provides.iter().map(|s| s.to_string()).collect(),
                requires: requires.iter().map(|s| s.to_string()).collect(),
            },
        );
    }
}

impl PackageInspector for MemoryInspector {
    fn produces(&self, package: &Path) -> Result<BTreeSet<String>, OrderError> {
        Ok(self
            .packages
            .get(&package_id(package))
            .map(|e| e.provides.clone())
            .unwrap_or_default())
    }

    fn requires(&self, package: &Path) -> Result<BTreeSet<String>, OrderError> {
        Ok(self
            .packages
            .get(&package_id(package))
            .map(|e| e.requires.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    provides: BTreeSet<String>,
    #[serde(default)]
    requires: BTreeSet<String>,
}

/// Metadata from a JSON manifest keyed by package file name:
///
/// ```json
/// { "foo-1.0-1.src.rpm": { "provides": ["foo", "foo-devel"], "requires": ["bar"] } }
/// ```
#[derive(Debug, Default, Clone)]
pub struct ManifestInspector {
    entries: HashMap<String, ManifestEntry>,
}

impl ManifestInspector {
    pub fn from_json(json: &str) -> Result<Self, OrderError> {
        let entries = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, OrderError> {
        let json = std::fs::read_to_string(path).map_err(|source| OrderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    fn entry(&self, package: &Path) -> Option<&ManifestEntry> {
        let id = package_id(package);
        let entry = self.entries.get(&id);
        if entry.is_none() {
            warn!(package = %id, "package missing from manifest");
        }
        entry
    }
}

impl PackageInspector for ManifestInspector {
    fn produces(&self, package: &Path) -> Result<BTreeSet<String>, OrderError> {
        Ok(self.entry(package).map(|e| e.provides.clone()).unwrap_or_default())
    }

    fn requires(&self, package: &Path) -> Result<BTreeSet<String>, OrderError> {
        Ok(self.entry(package).map(|e| e.requires.clone()).unwrap_or_default())
    }
}

/// Queries source RPMs with the rpm tool chain.
///
/// Products come from the spec file packed in the srpm (`rpmspec`), build
/// requirements from the srpm header (`rpm -qp --requires`). Only names are
/// kept; versions are ignored.
pub struct RpmInspector {
    runner: Arc<dyn CommandRunner>,
}

impl RpmInspector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn rpmspec(&self, spec: &Path, query: &[&str]) -> Result<Vec<String>, OrderError> {
        let inv = Invocation::new("rpmspec")
            .arg("-q")
            .args(query.iter().copied())
            .arg(spec.display().to_string());
        let out = run_checked(self.runner.as_ref(), &inv)?;
        Ok(names(&out.stdout))
    }
}

impl PackageInspector for RpmInspector {
    fn produces(&self, package: &Path) -> Result<BTreeSet<String>, OrderError> {
        let workdir = tempfile::tempdir().map_err(|source| OrderError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let extract = Invocation::new("sh")
            .args([
                "-c",
                "rpm2cpio \"$1\" | cpio --quiet --no-absolute-filenames -i '*.spec'",
                "sh",
            ])
            .arg(package.display().to_string())
            .current_dir(workdir.path());
        run_checked(self.runner.as_ref(), &extract)?;

        let spec = std::fs::read_dir(workdir.path())
            .map_err(|source| OrderError::Io {
                path: workdir.path().to_path_buf(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|p| p.extension().is_some_and(|ext| ext == "spec"));
        let Some(spec) = spec else {
            warn!(package = %package.display(), "no spec file in source package");
            return Ok(BTreeSet::new());
        };

        let mut produced: BTreeSet<String> = self
            .rpmspec(&spec, &["--qf", "%{NAME}\\n"])?
            .into_iter()
            .collect();
        produced.extend(self.rpmspec(&spec, &["--provides"])?);
        debug!(package = %package.display(), count = produced.len(), "products");
        Ok(produced)
    }

    fn requires(&self, package: &Path) -> Result<BTreeSet<String>, OrderError> {
        let inv = Invocation::new("rpm")
            .args(["-qp", "--requires"])
            .arg(package.display().to_string());
        let out = run_checked(self.runner.as_ref(), &inv)?;
        Ok(names(&out.stdout)
            .into_iter()
            .filter(|name| !name.starts_with("rpmlib("))
            .collect())
    }
}

// First word of every non-empty line: "foo >= 1.2" -> "foo".
fn names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
