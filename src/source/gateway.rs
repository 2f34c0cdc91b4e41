//! Per-source state machine.
//!
//! State is a bitset, not a strict sequence: ops require specified bits and
//! set others. A single shared last-activity timestamp per stream (owned by
//! the driver layer, see `vcs::ProcessVcsDriver`) tracks liveness for the
//! inactivity watchdog; this module owns only the upstream/cache/list-known
//! bits themselves.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use semver::Version as SemverVersion;

use crate::identifier::SourceUrl;
use crate::vcs::{DriverError, RawRef, VcsDriver};
use crate::version::{PairedVersion, Revision, Version};

/// A tag name parses as a semver version if it (optionally prefixed with
/// `v`) is valid semver; otherwise it's an opaque plain tag.
fn version_from_tag_name(name: &str) -> Version {
    let trimmed = name.strip_prefix('v').unwrap_or(name);
    match SemverVersion::parse(trimmed) {
        Ok(v) => Version::Semver(v),
        Err(_) => Version::PlainTag(name.to_string()),
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GatewayState: u8 {
        const SETUP              = 0b0001;
        const EXISTS_UPSTREAM     = 0b0010;
        const EXISTS_IN_CACHE     = 0b0100;
        const LATEST_LIST_KNOWN   = 0b1000;
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("source is not set up: {0:?}")]
    NotSetUp(GatewayState),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("no candidate URL for this source could be reached")]
    AllCandidatesFailed,
}

/// A single source's gateway: the driver, its candidate URLs (first
/// reachable one wins and is remembered), cached ref list, and local cache
/// directory.
pub struct Gateway {
    driver: Arc<dyn VcsDriver>,
    candidate_urls: Vec<String>,
    cache_dir: PathBuf,
    state: RwLock<GatewayState>,
    resolved_url: RwLock<Option<SourceUrl>>,
    refs: RwLock<Vec<RawRef>>,
}

impl Gateway {
    pub fn new(driver: Arc<dyn VcsDriver>, candidate_urls: Vec<String>, cache_dir: PathBuf) -> Self {
        Self {
            driver,
            candidate_urls,
            cache_dir,
            state: RwLock::new(GatewayState::empty()),
            resolved_url: RwLock::new(None),
            refs: RwLock::new(Vec::new()),
        }
    }

    pub async fn state(&self) -> GatewayState {
        *self.state.read().await
    }

    /// Setup op: Unset -> Setup+ExistsUpstream, trying each candidate URL in
    /// order until one successfully lists refs.
    pub async fn setup(&self) -> Result<(), GatewayError> {
        if self.state().await.contains(GatewayState::SETUP | GatewayState::EXISTS_UPSTREAM) {
            return Ok(());
        }
        let mut last_err = None;
        for candidate in &self.candidate_urls {
            let Ok(url) = url::Url::parse(candidate) else { continue };
            let source_url = SourceUrl(url);
            match self.driver.list_refs(&source_url).await {
                Ok(refs) => {
                    *self.resolved_url.write().await = Some(source_url);
                    *self.refs.write().await = refs;
                    let mut state = self.state.write().await;
                    *state |= GatewayState::SETUP | GatewayState::EXISTS_UPSTREAM | GatewayState::LATEST_LIST_KNOWN;
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(GatewayError::Driver(e)),
            None => Err(GatewayError::AllCandidatesFailed),
        }
    }

    /// ListVersions op: requires Setup; sets LatestListKnown, and on a
    /// cache-backed source additionally ExistsInCache once a sync has run.
    pub async fn list_versions(&self) -> Result<Vec<PairedVersion>, GatewayError> {
        self.require(GatewayState::SETUP)?;
        let refs = self.refs.read().await;
        Ok(refs
            .iter()
            .map(|r| {
                let unpaired = if r.is_tag {
                    version_from_tag_name(&r.name)
                } else {
                    Version::Branch { name: r.name.clone(), is_default: r.is_default_branch }
                };
                PairedVersion::new(unpaired, r.revision.clone())
            })
            .collect())
    }

    /// Local clone/export op: requires ExistsUpstream; may set
    /// ExistsInCache.
    pub async fn sync_cache(&self) -> Result<(), GatewayError> {
        self.require(GatewayState::EXISTS_UPSTREAM)?;
        let resolved = self.resolved_url.read().await.clone().expect("EXISTS_UPSTREAM implies a resolved url");
        self.driver.ensure_cached(&resolved, &self.cache_dir).await?;
        let mut state = self.state.write().await;
        *state |= GatewayState::EXISTS_IN_CACHE;
        Ok(())
    }

    pub async fn revision_exists(&self, rev: &Revision) -> Result<bool, GatewayError> {
        self.require(GatewayState::EXISTS_IN_CACHE)?;
        Ok(self.driver.revision_exists(&self.cache_dir, rev).await?)
    }

    pub async fn export(&self, rev: &Revision, dest: &std::path::Path) -> Result<(), GatewayError> {
        self.require(GatewayState::EXISTS_IN_CACHE)?;
        self.driver.export_revision(&self.cache_dir, rev, dest).await?;
        Ok(())
    }

    fn require(&self, bits: GatewayState) -> Result<(), GatewayError> {
        // Caller is expected to have awaited the relevant transition first;
        // this just double-checks the precondition synchronously against a
        // snapshot.
        let state = self.state.try_read().map(|s| *s).unwrap_or(GatewayState::empty());
        if state.contains(bits) {
            Ok(())
        } else {
            Err(GatewayError::NotSetUp(state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_state_is_a_bitset_not_a_sequence() {
        let s = GatewayState::SETUP | GatewayState::LATEST_LIST_KNOWN;
        assert!(s.contains(GatewayState::SETUP));
        assert!(!s.contains(GatewayState::EXISTS_UPSTREAM));
    }

    #[test]
    fn tag_names_parse_as_semver_when_possible() {
        assert_eq!(version_from_tag_name("v1.2.3"), Version::Semver(SemverVersion::parse("1.2.3").unwrap()));
        assert_eq!(version_from_tag_name("1.2.3"), Version::Semver(SemverVersion::parse("1.2.3").unwrap()));
        assert_eq!(version_from_tag_name("release-42"), Version::PlainTag("release-42".to_string()));
    }
}
