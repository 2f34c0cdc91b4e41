//! Source manager. Deduces project roots from import paths, owns
//! per-source gateways and caches, and serializes network work so there is
//! exactly one in-flight operation per (project root, op kind) across the
//! process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::identifier::{ProjectIdentifier, ProjectRoot};
use crate::manifest::{Lock, Manifest, ProjectAnalyzer};
use crate::package_tree::PackageTree;
use crate::source::deduce::{deduce_from_known_patterns, discovery_url, scan_vanity_meta_tags};
use crate::source::gateway::{Gateway, GatewayError};
use crate::source::scan::{PackageScanner, WalkingPackageScanner};
use crate::vcs::VcsDriver;
use crate::version::{PairedVersion, Revision};

#[derive(Debug, Error, Clone)]
pub enum SourceError {
    #[error("no source is known for {0}")]
    MissingSource(ProjectRoot),
    #[error("could not deduce a root for import path '{0}'")]
    DeductionFailed(String),
    #[error("every candidate source for {root} failed: {detail}")]
    AllSourcesFailed { root: ProjectRoot, detail: String },
    #[error("could not acquire the cache directory lock")]
    CouldNotCreateLock,
    #[error("gateway error for {root}: {detail}")]
    Gateway { root: ProjectRoot, detail: String },
}

impl From<(ProjectRoot, GatewayError)> for SourceError {
    fn from((root, e): (ProjectRoot, GatewayError)) -> Self {
        SourceError::Gateway { root, detail: e.to_string() }
    }
}

/// An HTTP client abstraction so vanity-import discovery can be
/// exercised in tests without real network access.
#[async_trait::async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, SourceError>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait::async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::AllSourcesFailed { root: ProjectRoot::new(url), detail: e.to_string() })?
            .text()
            .await
            .map_err(|e| SourceError::AllSourcesFailed { root: ProjectRoot::new(url), detail: e.to_string() })
    }
}

/// A key identifying an in-flight deduplicated operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum InFlightKey {
    Deduce(String),
    ListVersions(ProjectRoot),
}

/// Holds the process-exclusion lock file for a cache directory for as long
/// as the owning `SourceManager` lives. Created with `create_new`, which
/// fails atomically if another process already holds it; removed on drop.
struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    fn acquire(cache_root: &Path) -> Result<Self, SourceError> {
        std::fs::create_dir_all(cache_root).map_err(|_| SourceError::CouldNotCreateLock)?;
        let path = cache_root.join("depsolve.lock");
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|_| SourceError::CouldNotCreateLock)?;
        Ok(Self { path })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Cross-process-exclusion handle for the cache directory. Holds a lock
/// file under `cache_root` for the process's lifetime; the manager's own
/// `in_flight` map additionally coordinates concurrent callers within this
/// process.
pub struct SourceManager {
    driver: Arc<dyn VcsDriver>,
    http: Arc<dyn HttpFetcher>,
    cache_root: PathBuf,
    analyzer: Arc<dyn ProjectAnalyzer>,
    scanner: Arc<dyn PackageScanner>,
    _cache_lock: CacheLock,

    // reader/writer lock protecting the deduction memo and source map,
    // "the deduction radix trie and the source map: protected by a
    // reader/writer lock". A BTreeMap keyed by prefix stands in for a radix
    // trie here since the corpus carries no dedicated trie crate; prefix
    // lookups remain O(depth) via `ProjectRoot::contains`.
    deduced: RwLock<BTreeMap<String, ProjectRoot>>,
    gateways: RwLock<BTreeMap<ProjectRoot, Arc<Gateway>>>,

    in_flight: Mutex<BTreeMap<InFlightKey, broadcast::Sender<()>>>,
}

impl SourceManager {
    /// Acquires the cache directory's process lock and constructs the
    /// manager. Fails with `SourceError::CouldNotCreateLock` if another
    /// process already holds it; the lock is released when this manager
    /// (and every clone of the `Arc` wrapping it) drops.
    pub fn new(
        driver: Arc<dyn VcsDriver>,
        http: Arc<dyn HttpFetcher>,
        cache_root: PathBuf,
        analyzer: Arc<dyn ProjectAnalyzer>,
    ) -> Result<Self, SourceError> {
        let cache_lock = CacheLock::acquire(&cache_root)?;
        Ok(Self {
            driver,
            http,
            cache_root,
            analyzer,
            scanner: Arc::new(WalkingPackageScanner::new()),
            _cache_lock: cache_lock,
            deduced: RwLock::new(BTreeMap::new()),
            gateways: RwLock::new(BTreeMap::new()),
            in_flight: Mutex::new(BTreeMap::new()),
        })
    }

    /// Overrides the default filesystem-walking package scanner. Front-ends
    /// scanning a non-default source language supply their own.
    pub fn with_scanner(mut self, scanner: Arc<dyn PackageScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Deduces the project root owning `import_path`, memoizing the result
    /// so a subsequent query on a subpath returns it directly. Idempotent:
    /// `deduce_project_root(x)` called again returns the same root, and
    /// `deduce_project_root(x + "/sub")` equals `deduce_project_root(x)`
    /// when `x` is itself a root.
    ///
    /// Concurrent callers for the same `import_path` collapse into a single
    /// in-flight computation: the first caller becomes the leader and does
    /// the work; the rest wait on its completion signal and then read the
    /// memo it populated, rather than repeating the network round trip.
    pub async fn deduce_project_root(&self, import_path: &str) -> Result<ProjectRoot, SourceError> {
        if let Some(root) = self.lookup_memo(import_path).await {
            return Ok(root);
        }

        let key = InFlightKey::Deduce(import_path.to_string());
        if !self.become_leader(&key).await {
            self.wait_for_leader(&key).await;
            return self
                .lookup_memo(import_path)
                .await
                .ok_or_else(|| SourceError::DeductionFailed(import_path.to_string()));
        }

        let result = self.deduce_project_root_uncached(import_path).await;
        self.finish_dedup(&key).await;
        result
    }

    async fn deduce_project_root_uncached(&self, import_path: &str) -> Result<ProjectRoot, SourceError> {
        let root = if let Some(d) = deduce_from_known_patterns(import_path) {
            self.register_gateway(&d.root, d.candidate_urls).await;
            d.root
        } else {
            let url = discovery_url(import_path);
            let html = self.http.get_text(&url).await?;
            let imports = scan_vanity_meta_tags(&html);
            let matched = imports
                .into_iter()
                .find(|v| import_path == v.root || import_path.starts_with(&format!("{}/", v.root)))
                .ok_or_else(|| SourceError::DeductionFailed(import_path.to_string()))?;
            let root = ProjectRoot::new(matched.root);
            self.register_gateway(&root, vec![matched.url]).await;
            root
        };

        self.deduced.write().await.insert(root.0.clone(), root.clone());
        debug!("deduced root {root} for import path {import_path}");
        Ok(root)
    }

    async fn lookup_memo(&self, import_path: &str) -> Option<ProjectRoot> {
        let memo = self.deduced.read().await;
        memo.iter()
            .find(|(prefix, _)| *prefix == import_path || import_path.starts_with(&format!("{prefix}/")))
            .map(|(_, root)| root.clone())
    }

    async fn register_gateway(&self, root: &ProjectRoot, candidate_urls: Vec<String>) {
        let mut gateways = self.gateways.write().await;
        gateways.entry(root.clone()).or_insert_with(|| {
            let cache_dir = self.cache_root.join(sanitize_for_path(&root.0));
            Arc::new(Gateway::new(self.driver.clone(), candidate_urls, cache_dir))
        });
    }

    pub async fn source_exists(&self, id: &ProjectIdentifier) -> bool {
        self.gateways.read().await.contains_key(&id.root)
    }

    /// Ensures local cache of refs is current, deduplicating concurrent
    /// callers for the same root into a single in-flight setup.
    pub async fn sync_source_for(&self, id: &ProjectIdentifier) -> Result<(), SourceError> {
        let gateway = self.gateway_for(&id.root).await?;
        let key = InFlightKey::ListVersions(id.root.clone());
        if !self.become_leader(&key).await {
            self.wait_for_leader(&key).await;
            return Ok(());
        }
        let result = gateway.setup().await.map_err(|e| (id.root.clone(), e).into());
        self.finish_dedup(&key).await;
        result
    }

    pub async fn list_versions(&self, id: &ProjectIdentifier) -> Result<Vec<PairedVersion>, SourceError> {
        self.sync_source_for(id).await?;
        let gateway = self.gateway_for(&id.root).await?;
        gateway.list_versions().await.map_err(|e| (id.root.clone(), e).into())
    }

    pub async fn revision_present_in(
        &self,
        id: &ProjectIdentifier,
        rev: &Revision,
    ) -> Result<bool, SourceError> {
        let gateway = self.gateway_for(&id.root).await?;
        gateway.sync_cache().await.map_err(|e| (id.root.clone(), e.clone()))?;
        gateway.revision_exists(rev).await.map_err(|e| (id.root.clone(), e).into())
    }

    /// Fetches `(Manifest, Lock)` for the given revision of `id`. Only the
    /// bare `Revision` is needed to export the tree the analyzer reads, so
    /// this accepts one directly rather than a full `PairedVersion` —
    /// letting a bare-revision constraint, never itself pairable, reuse
    /// this path too.
    pub async fn get_manifest_and_lock(
        &self,
        id: &ProjectIdentifier,
        rev: &Revision,
    ) -> Result<(Manifest, Lock), SourceError> {
        let gateway = self.gateway_for(&id.root).await?;
        gateway.sync_cache().await.map_err(|e| (id.root.clone(), e.clone()))?;
        let tmp = self.cache_root.join("export").join(sanitize_for_path(&id.root.0));
        gateway.export(rev, &tmp).await.map_err(|e| (id.root.clone(), e))?;
        self.analyzer
            .derive_manifest_and_lock(&tmp, &id.root)
            .map_err(|e| SourceError::Gateway { root: id.root.clone(), detail: e.to_string() })
    }

    pub async fn list_packages(
        &self,
        id: &ProjectIdentifier,
        rev: &Revision,
    ) -> Result<PackageTree, SourceError> {
        let gateway = self.gateway_for(&id.root).await?;
        gateway.sync_cache().await.map_err(|e| (id.root.clone(), e.clone()))?;
        let tmp = self.cache_root.join("export").join(sanitize_for_path(&id.root.0));
        gateway.export(rev, &tmp).await.map_err(|e| (id.root.clone(), e))?;
        Ok(self.scanner.scan(&tmp, &id.root.0))
    }

    pub async fn export_project(
        &self,
        id: &ProjectIdentifier,
        version: &PairedVersion,
        dest: &Path,
    ) -> Result<(), SourceError> {
        let gateway = self.gateway_for(&id.root).await?;
        gateway.sync_cache().await.map_err(|e| (id.root.clone(), e.clone()))?;
        gateway.export(&version.revision, dest).await.map_err(|e| (id.root.clone(), e).into())
    }

    async fn gateway_for(&self, root: &ProjectRoot) -> Result<Arc<Gateway>, SourceError> {
        self.gateways
            .read()
            .await
            .get(root)
            .cloned()
            .ok_or_else(|| SourceError::MissingSource(root.clone()))
    }

    /// Registers this call as the leader for `key` if none is in flight yet.
    /// Returns `true` for the leader (who must call `finish_dedup` when
    /// done), `false` for a follower who should call `wait_for_leader`.
    async fn become_leader(&self, key: &InFlightKey) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains_key(key) {
            return false;
        }
        let (tx, _rx) = broadcast::channel(1);
        in_flight.insert(key.clone(), tx);
        true
    }

    /// Blocks until the leader for `key` calls `finish_dedup`.
    async fn wait_for_leader(&self, key: &InFlightKey) {
        let sender = { self.in_flight.lock().await.get(key).cloned() };
        if let Some(sender) = sender {
            let mut rx = sender.subscribe();
            let _ = rx.recv().await;
        }
    }

    /// Signals completion to every follower waiting on `key` and clears the
    /// in-flight entry.
    async fn finish_dedup(&self, key: &InFlightKey) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(tx) = in_flight.remove(key) {
            let _ = tx.send(());
        }
    }
}

fn sanitize_for_path(root: &str) -> String {
    root.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{DriverError, RawRef, VcsKind};
    use std::path::Path as StdPath;

    struct FakeFetcher;

    #[async_trait::async_trait]
    impl HttpFetcher for FakeFetcher {
        async fn get_text(&self, _url: &str) -> Result<String, SourceError> {
            Ok(String::new())
        }
    }

    struct FakeAnalyzer;
    impl ProjectAnalyzer for FakeAnalyzer {
        fn derive_manifest_and_lock(
            &self,
            _dir: &Path,
            _root: &ProjectRoot,
        ) -> Result<(Manifest, Lock), crate::error::Error> {
            Ok((Manifest::new(), Lock::new()))
        }
    }

    struct FakeDriver;

    #[async_trait::async_trait]
    impl VcsDriver for FakeDriver {
        async fn list_refs(&self, _url: &crate::identifier::SourceUrl) -> Result<Vec<RawRef>, DriverError> {
            Ok(vec![RawRef {
                name: "main".into(),
                revision: Revision("abc123".into()),
                is_default_branch: true,
                is_tag: false,
            }])
        }
        async fn ensure_cached(&self, _url: &crate::identifier::SourceUrl, _cache_dir: &StdPath) -> Result<(), DriverError> {
            Ok(())
        }
        async fn export_revision(&self, _cache_dir: &StdPath, _rev: &Revision, _dest: &StdPath) -> Result<(), DriverError> {
            Ok(())
        }
        async fn revision_exists(&self, _cache_dir: &StdPath, _rev: &Revision) -> Result<bool, DriverError> {
            Ok(true)
        }
        fn scheme(&self) -> VcsKind {
            VcsKind::Git
        }
    }

    fn make_manager() -> SourceManager {
        let cache_root = tempfile::tempdir().unwrap().into_path();
        SourceManager::new(Arc::new(FakeDriver), Arc::new(FakeFetcher), cache_root, Arc::new(FakeAnalyzer)).unwrap()
    }

    #[test]
    fn second_manager_on_same_cache_root_fails_to_lock() {
        let cache_root = tempfile::tempdir().unwrap().into_path();
        let first =
            SourceManager::new(Arc::new(FakeDriver), Arc::new(FakeFetcher), cache_root.clone(), Arc::new(FakeAnalyzer));
        assert!(first.is_ok());

        let second = SourceManager::new(Arc::new(FakeDriver), Arc::new(FakeFetcher), cache_root.clone(), Arc::new(FakeAnalyzer));
        assert!(matches!(second, Err(SourceError::CouldNotCreateLock)));

        drop(first);
        let third = SourceManager::new(Arc::new(FakeDriver), Arc::new(FakeFetcher), cache_root, Arc::new(FakeAnalyzer));
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn deduce_then_list_versions_round_trips() {
        let manager = make_manager();
        let root = manager.deduce_project_root("github.com/foo/bar/sub").await.unwrap();
        assert_eq!(root, ProjectRoot::new("github.com/foo/bar"));

        let id = ProjectIdentifier::bare(root);
        let versions = manager.list_versions(&id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].revision, Revision("abc123".into()));
    }

    #[tokio::test]
    async fn deduce_project_root_is_idempotent() {
        let manager = make_manager();
        let a = manager.deduce_project_root("github.com/foo/bar").await.unwrap();
        let b = manager.deduce_project_root("github.com/foo/bar/sub").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn concurrent_deduce_calls_collapse_into_one() {
        let manager = Arc::new(make_manager());
        let (a, b) = tokio::join!(
            manager.deduce_project_root("github.com/x/y"),
            manager.deduce_project_root("github.com/x/y"),
        );
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_for_path("github.com/foo/bar"), "github_com_foo_bar");
    }
}
