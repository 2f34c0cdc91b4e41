//! In-memory manifest/lock shapes and the `ProjectAnalyzer`
//! collaborator contract. On-disk parsing is out of scope: this
//! module only defines the shapes an external front-end constructs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::identifier::ProjectIdentifier;
use crate::identifier::{ProjectRoot, SourceUrl};
use crate::version::{Constraint, PairedVersion};

/// Declared dependency constraints of a project at a specific version.
/// Test-only constraints, overrides, required and ignored paths apply only
/// when this manifest belongs to the root of the current solve.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub dependencies: BTreeMap<ProjectRoot, Constraint>,
    pub test_dependencies: BTreeMap<ProjectRoot, Constraint>,
    pub overrides: BTreeMap<ProjectRoot, Constraint>,
    /// Explicit source-URL pin for a dependency, carried alongside its
    /// constraint. Root-only, same as `overrides`.
    pub dependency_sources: BTreeMap<ProjectRoot, SourceUrl>,
    pub required: Vec<String>,
    pub ignored: Vec<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A single entry of a `Lock`: a previously-chosen atom plus the
/// subpackages known to be needed from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockedProject {
    pub id: ProjectIdentifier,
    pub version: PairedVersion,
    pub packages: Vec<String>,
}

/// An ordered set of `LockedProject`s plus the input digest over the root
/// manifest's constraint-relevant fields. Advisory only: supplies
/// preferred versions but never alone satisfies a solve.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Lock {
    pub projects: Vec<LockedProject>,
    pub input_digest: Option<[u8; 32]>,
}

impl Lock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, root: &ProjectRoot) -> Option<&LockedProject> {
        self.projects.iter().find(|p| &p.id.root == root)
    }
}

/// Supplies `(Manifest, Lock)` for an arbitrary checked-out source that does
/// not carry this crate's native manifest format. Errors from it fail the
/// enclosing op with `missingSourceFailure`.
pub trait ProjectAnalyzer: Send + Sync {
    fn derive_manifest_and_lock(
        &self,
        dir: &Path,
        root: &ProjectRoot,
    ) -> Result<(Manifest, Lock), crate::error::Error>;
}

/// Default analyzer reading manifests from a caller-supplied in-memory map,
/// keyed by project root, rather than parsing any particular file format off
/// disk. Production front-ends are expected to bring their own analyzer.
#[derive(Default)]
pub struct NativeProjectAnalyzer {
    fixtures: BTreeMap<ProjectRoot, (Manifest, Lock)>,
}

impl NativeProjectAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixture(mut self, root: ProjectRoot, manifest: Manifest, lock: Lock) -> Self {
        self.fixtures.insert(root, (manifest, lock));
        self
    }
}

impl ProjectAnalyzer for NativeProjectAnalyzer {
    fn derive_manifest_and_lock(
        &self,
        _dir: &Path,
        root: &ProjectRoot,
    ) -> Result<(Manifest, Lock), crate::error::Error> {
        self.fixtures
            .get(root)
            .cloned()
            .ok_or_else(|| crate::error::Error::Other(format!("no manifest fixture for {root}").into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_find_matches_by_root_only() {
        use crate::version::{Revision, Version};
        let root = ProjectRoot::new("github.com/foo/bar");
        let mut lock = Lock::new();
        lock.projects.push(LockedProject {
            id: ProjectIdentifier::bare(root.clone()),
            version: PairedVersion::new(
                Version::PlainTag("v1.0.0".into()),
                Revision("abc123".into()),
            ),
            packages: vec![],
        });
        assert!(lock.find(&root).is_some());
        assert!(lock.find(&ProjectRoot::new("other")).is_none());
    }
}
