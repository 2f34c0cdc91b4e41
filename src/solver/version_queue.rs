//! Per-project lazy candidate enumerator.
//!
//! Initial contents, in order: the lock's version for this project, if any;
//! a preferred version derived from a depender's lock, if any; then, on
//! exhaustion, the source manager's full version list minus items already
//! tried. `advance` pops the front and records the failure that rejected
//! it; `is_exhausted` is true only after the full list has been loaded and
//! drained.

use std::collections::HashSet;
use std::sync::Arc;

use crate::solver::failure::Failure;
use crate::version::{PairedVersion, Revision};

pub struct VersionQueue {
    preferred: Vec<PairedVersion>,
    full_list: Option<Arc<Vec<PairedVersion>>>,
    full_list_cursor: usize,
    tried: HashSet<Revision>,
    pub failures: Vec<Failure>,
}

impl VersionQueue {
    /// `preferred` carries, in order: the lock's version (if any) then the
    /// depender-preferred version (if any, and if the depender has already
    /// been selected).
    pub fn new(preferred: Vec<PairedVersion>) -> Self {
        Self {
            preferred,
            full_list: None,
            full_list_cursor: 0,
            tried: HashSet::new(),
            failures: Vec::new(),
        }
    }

    /// Supplies the full version list once the preferred seeds are
    /// exhausted. Lazily consumed from `full_list_cursor` onward so it need
    /// not be fetched at construction time.
    pub fn set_full_list(&mut self, full_list: Arc<Vec<PairedVersion>>) {
        self.full_list = Some(full_list);
    }

    /// Pops and returns the next untried candidate, or `None` once fully
    /// exhausted.
    pub fn next(&mut self) -> Option<PairedVersion> {
        while let Some(v) = self.preferred.first().cloned() {
            self.preferred.remove(0);
            if self.tried.insert(v.revision.clone()) {
                return Some(v);
            }
        }

        let full_list = self.full_list.clone()?;
        while self.full_list_cursor < full_list.len() {
            let v = full_list[self.full_list_cursor].clone();
            self.full_list_cursor += 1;
            if self.tried.insert(v.revision.clone()) {
                return Some(v);
            }
        }
        None
    }

    /// Records the failure that rejected the most recently returned
    /// candidate and advances past it.
    pub fn advance(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    /// True only once the full list has been loaded and every candidate
    /// drained (not merely while the preferred seeds are still pending).
    pub fn is_exhausted(&self) -> bool {
        match &self.full_list {
            None => false,
            Some(list) => self.preferred.is_empty() && self.full_list_cursor >= list.len(),
        }
    }
}
