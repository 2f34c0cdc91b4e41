//! Mediates between the solver and the source manager.
//!
//! Caches version lists per `ProjectIdentifier` for the duration of a single
//! solve, sorting them exactly once using the active upgrade/downgrade
//! ordering, and normalizes the "empty source URL = root" equivalence
//! between solver-internal atom identifiers and source-manager identifiers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::identifier::{ProjectIdentifier, ProjectRoot};
use crate::manifest::{Lock, Manifest};
use crate::package_tree::PackageTree;
use crate::source::{SourceError, SourceManager};
use crate::version::{compare_candidates, PairedVersion, Revision, SortMode};

/// Per-solve cache of sorted candidate lists, keyed by project root. Holding
/// the cache at the bridge (not the source manager) keeps the sort pinned
/// for the lifetime of one solve even if the source manager's underlying
/// data changes between solves.
pub struct Bridge {
    source_manager: Arc<SourceManager>,
    sort_mode: SortMode,
    version_cache: RwLock<BTreeMap<ProjectRoot, Arc<Vec<PairedVersion>>>>,
    tree_cache: RwLock<BTreeMap<(ProjectRoot, Revision), Arc<PackageTree>>>,
}

impl Bridge {
    pub fn new(source_manager: Arc<SourceManager>, sort_mode: SortMode) -> Self {
        Self {
            source_manager,
            sort_mode,
            version_cache: RwLock::new(BTreeMap::new()),
            tree_cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Normalizes `id` so that an identifier with no explicit source is
    /// treated as equivalent to its bare root for caching purposes.
    fn cache_key(id: &ProjectIdentifier) -> ProjectRoot {
        id.root.clone()
    }

    pub async fn list_versions(&self, id: &ProjectIdentifier) -> Result<Arc<Vec<PairedVersion>>, SourceError> {
        let key = Self::cache_key(id);
        if let Some(cached) = self.version_cache.read().await.get(&key) {
            return Ok(cached.clone());
        }

        let mut versions = self.source_manager.list_versions(id).await?;
        versions.sort_by(|a, b| compare_candidates(a, b, self.sort_mode));
        let versions = Arc::new(versions);

        self.version_cache.write().await.insert(key, versions.clone());
        Ok(versions)
    }

    pub async fn get_manifest_and_lock(
        &self,
        id: &ProjectIdentifier,
        rev: &Revision,
    ) -> Result<(Manifest, Lock), SourceError> {
        self.source_manager.get_manifest_and_lock(id, rev).await
    }

    pub async fn list_packages(
        &self,
        id: &ProjectIdentifier,
        rev: &Revision,
    ) -> Result<Arc<PackageTree>, SourceError> {
        let key = (Self::cache_key(id), rev.clone());
        if let Some(cached) = self.tree_cache.read().await.get(&key) {
            return Ok(cached.clone());
        }
        let tree = Arc::new(self.source_manager.list_packages(id, rev).await?);
        self.tree_cache.write().await.insert(key, tree.clone());
        Ok(tree)
    }

    pub async fn revision_present_in(
        &self,
        id: &ProjectIdentifier,
        rev: &Revision,
    ) -> Result<bool, SourceError> {
        self.source_manager.revision_present_in(id, rev).await
    }

    pub async fn deduce_project_root(&self, import_path: &str) -> Result<ProjectRoot, SourceError> {
        self.source_manager.deduce_project_root(import_path).await
    }

    /// Read-only hook used by the lock fast path: whether exported
    /// vendor code for `id`@`version` already exists locally, without
    /// triggering any fetch as a side effect.
    pub async fn vendor_code_exists(&self, id: &ProjectIdentifier, version: &PairedVersion) -> bool {
        self.tree_cache
            .read()
            .await
            .contains_key(&(Self::cache_key(id), version.revision.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::NativeProjectAnalyzer;
    use crate::vcs::{DriverError, RawRef, VcsDriver, VcsKind};
    use std::path::Path;

    struct FakeDriver;

    #[async_trait::async_trait]
    impl VcsDriver for FakeDriver {
        async fn list_refs(&self, _url: &crate::identifier::SourceUrl) -> Result<Vec<RawRef>, DriverError> {
            Ok(vec![
                RawRef { name: "v1.0.0".into(), revision: Revision("r1".into()), is_default_branch: false, is_tag: true },
                RawRef { name: "v2.0.0".into(), revision: Revision("r2".into()), is_default_branch: false, is_tag: true },
            ])
        }
        async fn ensure_cached(&self, _url: &crate::identifier::SourceUrl, _cache_dir: &Path) -> Result<(), DriverError> {
            Ok(())
        }
        async fn export_revision(&self, _cache_dir: &Path, _rev: &Revision, _dest: &Path) -> Result<(), DriverError> {
            Ok(())
        }
        async fn revision_exists(&self, _cache_dir: &Path, _rev: &Revision) -> Result<bool, DriverError> {
            Ok(true)
        }
        fn scheme(&self) -> VcsKind {
            VcsKind::Git
        }
    }

    struct FakeFetcher;
    #[async_trait::async_trait]
    impl crate::source::HttpFetcher for FakeFetcher {
        async fn get_text(&self, _url: &str) -> Result<String, SourceError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn version_list_sorted_highest_first_in_upgrade_mode() {
        let manager = Arc::new(
            SourceManager::new(
                Arc::new(FakeDriver),
                Arc::new(FakeFetcher),
                tempfile::tempdir().unwrap().into_path(),
                Arc::new(NativeProjectAnalyzer::new()),
            )
            .unwrap(),
        );
        let bridge = Bridge::new(manager.clone(), SortMode::Upgrade);

        let root = manager.deduce_project_root("github.com/foo/bar").await.unwrap();
        let id = ProjectIdentifier::bare(root);

        let versions = bridge.list_versions(&id).await.unwrap();
        assert_eq!(versions[0].revision, Revision("r2".into()));
    }
}
