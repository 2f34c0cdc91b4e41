//! Shared fixtures for end-to-end solve tests: a scripted package scanner
//! and a scripted VCS driver, so a whole solve can run against in-memory
//! data rather than a checked-out working tree or a real remote.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use depsolve_core::identifier::SourceUrl;
use depsolve_core::manifest::NativeProjectAnalyzer;
use depsolve_core::package_tree::PackageTree;
use depsolve_core::source::{HttpFetcher, PackageScanner, SourceError, SourceManager};
use depsolve_core::vcs::{DriverError, RawRef, VcsDriver, VcsKind};
use depsolve_core::version::Revision;

/// Returns pre-built `PackageTree`s keyed by import root, ignoring whatever
/// (empty) directory the gateway actually exported to.
#[derive(Default)]
pub struct ScriptedScanner {
    trees: BTreeMap<String, PackageTree>,
}

impl ScriptedScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(mut self, import_root: impl Into<String>, tree: PackageTree) -> Self {
        self.trees.insert(import_root.into(), tree);
        self
    }
}

impl PackageScanner for ScriptedScanner {
    fn scan(&self, _file_root: &Path, import_root: &str) -> PackageTree {
        self.trees.get(import_root).cloned().unwrap_or_else(|| PackageTree::new(import_root))
    }
}

/// Returns scripted refs for whichever candidate URL contains a registered
/// substring, instead of shelling out to `git ls-remote`.
#[derive(Default)]
pub struct ScriptedDriver {
    refs_by_match: Vec<(String, Vec<RawRef>)>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refs(mut self, url_substr: impl Into<String>, refs: Vec<RawRef>) -> Self {
        self.refs_by_match.push((url_substr.into(), refs));
        self
    }
}

#[async_trait::async_trait]
impl VcsDriver for ScriptedDriver {
    async fn list_refs(&self, url: &SourceUrl) -> Result<Vec<RawRef>, DriverError> {
        let url_str = url.0.to_string();
        self.refs_by_match
            .iter()
            .find(|(substr, _)| url_str.contains(substr.as_str()))
            .map(|(_, refs)| refs.clone())
            .ok_or_else(|| DriverError::Remote(format!("no scripted refs for {url_str}")))
    }

    async fn ensure_cached(&self, _url: &SourceUrl, cache_dir: &Path) -> Result<(), DriverError> {
        std::fs::create_dir_all(cache_dir)?;
        Ok(())
    }

    async fn export_revision(&self, _cache_dir: &Path, _rev: &Revision, dest: &Path) -> Result<(), DriverError> {
        std::fs::create_dir_all(dest)?;
        Ok(())
    }

    async fn revision_exists(&self, _cache_dir: &Path, _rev: &Revision) -> Result<bool, DriverError> {
        Ok(true)
    }

    fn scheme(&self) -> VcsKind {
        VcsKind::Git
    }
}

pub struct EmptyFetcher;

#[async_trait::async_trait]
impl HttpFetcher for EmptyFetcher {
    async fn get_text(&self, _url: &str) -> Result<String, SourceError> {
        Ok(String::new())
    }
}

pub fn tag(name: &str, rev: &str) -> RawRef {
    RawRef { name: name.to_string(), revision: Revision(rev.to_string()), is_default_branch: false, is_tag: true }
}

pub fn branch(name: &str, rev: &str, is_default: bool) -> RawRef {
    RawRef { name: name.to_string(), revision: Revision(rev.to_string()), is_default_branch: is_default, is_tag: false }
}

pub fn build_manager(driver: ScriptedDriver, scanner: ScriptedScanner, analyzer: NativeProjectAnalyzer) -> Arc<SourceManager> {
    let cache_root = tempfile::tempdir().unwrap().into_path();
    let manager = SourceManager::new(Arc::new(driver), Arc::new(EmptyFetcher), cache_root, Arc::new(analyzer))
        .expect("cache lock should be free in a fresh tempdir")
        .with_scanner(Arc::new(scanner));
    Arc::new(manager)
}

/// Deduces (and so registers a gateway for) every root the scenario is
/// about to ask the solver to list versions for. The solver itself never
/// deduces roots on the fly; it expects the source manager to already know
/// about every root it queries.
pub async fn register_roots(manager: &SourceManager, roots: &[&str]) {
    for root in roots {
        manager.deduce_project_root(root).await.unwrap_or_else(|e| panic!("deducing {root}: {e}"));
    }
}
