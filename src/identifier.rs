//! Project identity: `ProjectRoot`, `ProjectIdentifier`, `Atom`,
//! `AtomWithPackages`.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::version::{PairedVersion, Version};

/// The import path at which a whole repository-shaped unit begins. All
/// packages under it belong to the same project.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectRoot(pub String);

impl fmt::Display for ProjectRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ProjectRoot {
    pub fn new(root: impl Into<String>) -> Self {
        Self(root.into())
    }

    /// Whether `self` is an ancestor-or-equal import path of `other`, i.e.
    /// `other` lies under this root (`root` or `root/sub/...`).
    pub fn contains(&self, other: &str) -> bool {
        other == self.0 || other.starts_with(&format!("{}/", self.0))
    }
}

/// `SourceURL` override attached to a `ProjectIdentifier`. An explicit source
/// takes priority over whatever the root would deduce on its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceUrl(pub Url);

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// (ProjectRoot, optional SourceURL). Equality is "same root and either same
/// source, or one side has empty source matching the root"
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectIdentifier {
    pub root: ProjectRoot,
    pub source: Option<SourceUrl>,
}

impl ProjectIdentifier {
    pub fn bare(root: ProjectRoot) -> Self {
        Self { root, source: None }
    }

    pub fn with_source(root: ProjectRoot, source: SourceUrl) -> Self {
        Self { root, source: Some(source) }
    }
}

impl PartialEq for ProjectIdentifier {
    fn eq(&self, other: &Self) -> bool {
        if self.root != other.root {
            return false;
        }
        match (&self.source, &other.source) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => true,
            (Some(a), Some(b)) => a == b,
        }
    }
}
impl Eq for ProjectIdentifier {}

impl fmt::Display for ProjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(s) => write!(f, "{} ({})", self.root, s),
            None => write!(f, "{}", self.root),
        }
    }
}

/// A concrete (project, version) selection point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Atom {
    pub id: ProjectIdentifier,
    pub version: PairedVersionOrPlain,
}

/// Most atoms carry a `PairedVersion` (discovered from the source); the lock
/// fast path may seed an atom from a lock entry before pairing is confirmed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PairedVersionOrPlain {
    Paired(PairedVersion),
    Plain(Version),
}

impl PairedVersionOrPlain {
    pub fn unpaired(&self) -> &Version {
        match self {
            PairedVersionOrPlain::Paired(p) => &p.unpaired,
            PairedVersionOrPlain::Plain(v) => v,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version.unpaired())
    }
}

/// An atom plus the specific subpackage paths required from it in the
/// current selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AtomWithPackages {
    pub atom: Atom,
    pub packages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_contains_subpaths_only() {
        let root = ProjectRoot::new("github.com/foo/bar");
        assert!(root.contains("github.com/foo/bar"));
        assert!(root.contains("github.com/foo/bar/sub"));
        assert!(!root.contains("github.com/foo/barbaz"));
        assert!(!root.contains("github.com/foo/baz"));
    }

    #[test]
    fn identifier_eq_treats_empty_source_as_matching() {
        let root = ProjectRoot::new("github.com/foo/bar");
        let bare = ProjectIdentifier::bare(root.clone());
        let with_src = ProjectIdentifier::with_source(
            root,
            SourceUrl(Url::parse("https://github.com/foo/bar.git").unwrap()),
        );
        assert_eq!(bare, with_src);
    }
}
