//! Solver core. Main loop, package-only expansion, version selection,
//! backjumping, and the lock fast path.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, trace};

use crate::bridge::Bridge;
use crate::digest::input_digest;
use crate::identifier::{Atom, AtomWithPackages, PairedVersionOrPlain, ProjectIdentifier, ProjectRoot, SourceUrl};
use crate::manifest::{Lock, LockedProject, Manifest};
use crate::package_tree::{external_reach, PackageTree};
use crate::solver::failure::{Failure, SolveError};
use crate::solver::selection::Selection;
use crate::solver::unselected::{UnselectedQueue, WorkItem};
use crate::solver::version_queue::VersionQueue;
use crate::tracer::{TraceEvent, Tracer};
use crate::version::{Constraint, PairedVersion, Revision, SortMode, Version};

/// Caller-supplied parameters for one solve.
pub struct SolveParameters {
    pub root_dir: PathBuf,
    pub import_root: ProjectRoot,
    pub root_package_tree: PackageTree,
    pub manifest: Manifest,
    pub lock: Lock,
    pub to_change: BTreeSet<ProjectRoot>,
    pub change_all: bool,
    pub downgrade: bool,
    pub trace: Arc<dyn Tracer>,
}

/// The result of a successful solve.
#[derive(Clone, Debug)]
pub struct Solution {
    pub locked_projects: Vec<LockedProject>,
    pub input_digest: [u8; 32],
    pub attempts: u64,
    pub solver_version: String,
}

pub struct Solver {
    bridge: Arc<Bridge>,
}

impl Solver {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    /// Runs one complete solve to completion or to a surfaced `SolveError`.
    pub async fn solve(&self, params: SolveParameters) -> Result<Solution, SolveError> {
        if let Some(solution) = self.try_lock_fast_path(&params).await {
            return Ok(solution);
        }

        let sort_mode = if params.downgrade { SortMode::Downgrade } else { SortMode::Upgrade };
        let mut selection = Selection::new();
        let mut unselected = UnselectedQueue::new();
        let mut version_queues: std::collections::HashMap<ProjectRoot, VersionQueue> =
            std::collections::HashMap::new();
        let mut attempts: u64 = 0;

        self.seed_root(&params, &mut selection, &mut unselected).await;

        loop {
            let Some(work) = unselected.pop() else {
                let mut solution = self.snapshot(&selection, &params);
                solution.attempts = attempts;
                params.trace.emit(TraceEvent::Done);
                return Ok(solution);
            };

            attempts += 1;

            if selection.is_selected(&work.root) {
                if let Err(failure) =
                    self.expand_packages(&work, &mut selection, &mut unselected, &params).await
                {
                    if !self.backjump(&mut selection, &mut unselected, &mut version_queues, failure.clone(), &params).await {
                        return Err(SolveError::new(vec![failure]));
                    }
                }
                continue;
            }

            match self
                .select_version(&work, &mut selection, &mut unselected, &mut version_queues, &params, sort_mode)
                .await
            {
                Ok(()) => {}
                Err(failure) => {
                    if !self.backjump(&mut selection, &mut unselected, &mut version_queues, failure.clone(), &params).await {
                        return Err(SolveError::new(vec![failure]));
                    }
                }
            }
        }
    }

    /// If the root manifest's digest equals the lock's input digest
    /// and every locked project's version still satisfies its current
    /// constraint and no `-update` is requested for it, emit the lock as
    /// the solution immediately. This implementation additionally requires
    /// that every project reachable from the unselected queue's initial
    /// seed already have a locked entry: a lock that omits a newly imported
    /// project is never eligible for this fast path.
    async fn try_lock_fast_path(&self, params: &SolveParameters) -> Option<Solution> {
        if params.change_all || !params.to_change.is_empty() {
            return None;
        }
        let current_digest = input_digest(&params.manifest);
        if params.lock.input_digest != Some(current_digest) {
            return None;
        }

        let ignored: BTreeSet<String> = params.manifest.ignored.iter().cloned().collect();
        let reach = external_reach(&params.root_package_tree, true, true, &ignored);
        let mut seen_roots = BTreeSet::new();
        for imports in reach.values() {
            for import in imports {
                if let Ok(root) = self.bridge.deduce_project_root(import).await {
                    seen_roots.insert(root);
                }
            }
        }
        for root in &seen_roots {
            if params.lock.find(root).is_none() {
                debug!("lock fast path rejected: {root} is newly imported and not in the lock");
                return None;
            }
        }

        for locked in &params.lock.projects {
            let constraint = params
                .manifest
                .dependencies
                .get(&locked.id.root)
                .cloned()
                .unwrap_or(Constraint::Any);
            if !constraint.matches_paired(&locked.version) {
                return None;
            }
        }

        Some(Solution {
            locked_projects: params.lock.projects.clone(),
            input_digest: current_digest,
            attempts: 0,
            solver_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn seed_root(&self, params: &SolveParameters, selection: &mut Selection, unselected: &mut UnselectedQueue) {
        // A virtual atom standing in for the root project itself, so that
        // root-imposed constraints and root's presence in causal sets work
        // through the same `Selection` machinery as every other depender.
        // It is filtered back out of the final `Solution` in `snapshot`.
        let root_atom = Atom {
            id: ProjectIdentifier::bare(params.import_root.clone()),
            version: PairedVersionOrPlain::Plain(Version::PlainTag("(root)".to_string())),
        };
        selection.push_selection(AtomWithPackages { atom: root_atom.clone(), packages: vec![] }, false);

        let ignored: BTreeSet<String> = params.manifest.ignored.iter().cloned().collect();
        let reach = external_reach(&params.root_package_tree, true, true, &ignored);
        let mut by_root: std::collections::BTreeMap<ProjectRoot, Vec<String>> = std::collections::BTreeMap::new();
        for imports in reach.values() {
            for import in imports {
                let root = self.deduce_root(import).await;
                by_root.entry(root).or_default().push(import.clone());
            }
        }
        for required in &params.manifest.required {
            let root = self.deduce_root(required).await;
            by_root.entry(root).or_default().push(required.clone());
        }
        for (root, packages) in by_root {
            let mut constraint = params
                .manifest
                .dependencies
                .get(&root)
                .cloned()
                .or_else(|| params.manifest.test_dependencies.get(&root).cloned())
                .unwrap_or(Constraint::Any);
            if let Some(over) = params.manifest.overrides.get(&root) {
                constraint = over.clone();
            }
            let source_override = params.manifest.dependency_sources.get(&root).cloned();
            selection.add_dependency(&root, root_atom.clone(), constraint, source_override);
            let admissible_count = self.admissible_count(selection, &root).await;
            unselected.push(WorkItem { root, packages_needed: packages, is_root_dependency: true, admissible_count });
        }
    }

    /// Package-only expansion for an already-selected project.
    async fn expand_packages(
        &self,
        work: &WorkItem,
        selection: &mut Selection,
        unselected: &mut UnselectedQueue,
        params: &SolveParameters,
    ) -> Result<(), Failure> {
        let already = selection.required_packages(&work.root);
        let new_pkgs: Vec<String> = work
            .packages_needed
            .iter()
            .filter(|p| !already.contains(p))
            .cloned()
            .collect();
        if new_pkgs.is_empty() {
            return Ok(());
        }

        let atom = selection
            .atom(&work.root)
            .cloned()
            .expect("work item's root is selected by construction of this branch");

        let id = atom.id.clone();
        let version = match &atom.version {
            PairedVersionOrPlain::Paired(p) => p.clone(),
            PairedVersionOrPlain::Plain(_) => {
                return Err(Failure::checkee_has_problem_packages(
                    work.root.clone(),
                    new_pkgs,
                    vec![work.root.clone()],
                ))
            }
        };

        let tree = self
            .bridge
            .list_packages(&id, &version.revision)
            .await
            .map_err(|_| Failure::missing_source(work.root.clone(), vec![work.root.clone()]))?;

        let missing: Vec<String> = new_pkgs.iter().filter(|p| !tree.packages.contains_key(*p)).cloned().collect();
        if !missing.is_empty() {
            return Err(Failure::checkee_has_problem_packages(
                work.root.clone(),
                missing,
                vec![work.root.clone()],
            ));
        }

        let is_root = work.root == params.import_root;
        let ignored: BTreeSet<String> =
            if is_root { params.manifest.ignored.iter().cloned().collect() } else { BTreeSet::new() };
        let reach = external_reach(&tree, is_root, false, &ignored);
        selection.push_selection(AtomWithPackages { atom: atom.clone(), packages: new_pkgs.clone() }, true);

        for pkg in &new_pkgs {
            if let Some(imports) = reach.get(pkg) {
                for import in imports {
                    let target_root = self.deduce_root(import).await;
                    let mut constraint = Constraint::Any;
                    let mut source_override = None;
                    if is_root {
                        if let Some(over) = params.manifest.overrides.get(&target_root) {
                            constraint = over.clone();
                        }
                        source_override = params.manifest.dependency_sources.get(&target_root).cloned();
                    }
                    selection.add_dependency(&target_root, atom.clone(), constraint, source_override);
                    let admissible_count = self.admissible_count(selection, &target_root).await;
                    unselected.push(WorkItem {
                        root: target_root,
                        packages_needed: vec![import.clone()],
                        is_root_dependency: false,
                        admissible_count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Version selection for a not-yet-selected project.
    async fn select_version(
        &self,
        work: &WorkItem,
        selection: &mut Selection,
        unselected: &mut UnselectedQueue,
        version_queues: &mut std::collections::HashMap<ProjectRoot, VersionQueue>,
        params: &SolveParameters,
        _sort_mode: SortMode,
    ) -> Result<(), Failure> {
        // A depender may have pinned an explicit source URL for this root;
        // once any depender has, every later fetch for this root goes
        // through that same source.
        let required_source = selection
            .dependencies_on(&work.root)
            .into_iter()
            .find_map(|d| d.required_source);
        let id = match &required_source {
            Some(src) => ProjectIdentifier::with_source(work.root.clone(), src.clone()),
            None => ProjectIdentifier::bare(work.root.clone()),
        };

        // A bare Revision constraint bypasses the version queue entirely:
        // the candidate is that exact revision or nothing.
        let active = selection.combined_constraint(&work.root);
        if let Constraint::Revision(rev) = &active {
            let present = self.bridge.revision_present_in(&id, rev).await.unwrap_or(false);
            if !present {
                return Err(Failure::nonexistent_revision(work.root.clone(), vec![work.root.clone()]));
            }
            return self
                .try_candidate(
                    work,
                    &id,
                    PairedVersionOrPlain::Plain(Version::Revision(rev.clone())),
                    rev,
                    selection,
                    unselected,
                    params,
                )
                .await;
        }

        if !version_queues.contains_key(&work.root) {
            let preferred = params
                .lock
                .find(&work.root)
                .map(|l| vec![l.version.clone()])
                .unwrap_or_default();
            version_queues.insert(work.root.clone(), VersionQueue::new(preferred));
        }

        let full_list = self
            .bridge
            .list_versions(&id)
            .await
            .map_err(|_| Failure::missing_source(work.root.clone(), vec![work.root.clone()]))?;
        {
            let queue = version_queues.get_mut(&work.root).expect("just inserted above");
            queue.set_full_list(full_list);
        }

        loop {
            let queue = version_queues.get_mut(&work.root).expect("inserted above");
            let Some(candidate) = queue.next() else {
                let mut causal_set: Vec<ProjectRoot> =
                    selection.dependencies_on(&work.root).into_iter().map(|d| d.depender.id.root).collect();
                causal_set.push(work.root.clone());
                causal_set.sort();
                causal_set.dedup();
                return Err(Failure::no_version(work.root.clone(), causal_set));
            };

            let active = selection.combined_constraint(&work.root);
            if !active.matches_paired(&candidate) {
                let failure = Failure::version_not_allowed(
                    work.root.clone(),
                    candidate.unpaired.clone(),
                    active,
                    vec![work.root.clone()],
                );
                version_queues.get_mut(&work.root).unwrap().advance(failure);
                continue;
            }

            let rev = candidate.revision.clone();
            match self
                .try_candidate(
                    work,
                    &id,
                    PairedVersionOrPlain::Paired(candidate),
                    &rev,
                    selection,
                    unselected,
                    params,
                )
                .await
            {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    version_queues.get_mut(&work.root).unwrap().advance(failure);
                }
            }
        }
    }

    /// Fetches the candidate's manifest and package tree,
    /// computes its complete dependency list, validates each against the
    /// current selection, and on success pushes the atom and enqueues its
    /// dependencies. `version` is the atom this candidate will be recorded
    /// as; `rev` is the revision used to fetch its manifest and package
    /// tree (always `version`'s revision, whether paired or a bare
    /// revision constraint).
    #[allow(clippy::too_many_arguments)]
    async fn try_candidate(
        &self,
        work: &WorkItem,
        id: &ProjectIdentifier,
        version: PairedVersionOrPlain,
        rev: &Revision,
        selection: &mut Selection,
        unselected: &mut UnselectedQueue,
        params: &SolveParameters,
    ) -> Result<(), Failure> {
        let is_root = work.root == params.import_root;

        let tree = self
            .bridge
            .list_packages(id, rev)
            .await
            .map_err(|_| Failure::missing_source(work.root.clone(), vec![work.root.clone()]))?;

        let missing: Vec<String> = work
            .packages_needed
            .iter()
            .filter(|p| !tree.packages.contains_key(*p))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Failure::dep_has_problem_packages(work.root.clone(), missing, vec![work.root.clone()]));
        }

        let (manifest, _lock) = self
            .bridge
            .get_manifest_and_lock(id, rev)
            .await
            .map_err(|_| Failure::missing_source(work.root.clone(), vec![work.root.clone()]))?;

        // Overrides/ignores/required are root-only: they come from the
        // solve's root manifest, not whatever manifest this candidate
        // happens to carry, and they apply only while resolving the root's
        // own direct dependency declarations.
        let ignored: BTreeSet<String> =
            if is_root { params.manifest.ignored.iter().cloned().collect() } else { BTreeSet::new() };
        let reach = external_reach(&tree, is_root, false, &ignored);

        let mut dependencies: Vec<(ProjectRoot, Constraint, Option<SourceUrl>, Vec<String>)> = Vec::new();
        for pkg in &work.packages_needed {
            let Some(imports) = reach.get(pkg) else { continue };
            for import in imports {
                let target_root = self.deduce_root(import).await;
                let mut constraint = manifest
                    .dependencies
                    .get(&target_root)
                    .cloned()
                    .unwrap_or(Constraint::Any);
                let mut source_override = manifest.dependency_sources.get(&target_root).cloned();
                if is_root {
                    if let Some(over) = params.manifest.overrides.get(&target_root) {
                        constraint = over.clone();
                    }
                    if let Some(src) = params.manifest.dependency_sources.get(&target_root) {
                        source_override = Some(src.clone());
                    }
                }
                dependencies.push((target_root, constraint, source_override, vec![import.clone()]));
            }
        }

        for (target_root, constraint, source_override, _) in &dependencies {
            let active = selection.combined_constraint(target_root);
            let merged = active.intersect(constraint);
            if matches!(merged, Constraint::None) {
                return Err(Failure::disjoint_constraint(
                    target_root.clone(),
                    active,
                    vec![work.root.clone(), target_root.clone()],
                ));
            }
            if let Some(existing) = selection.atom(target_root) {
                if !constraint.matches(existing.version.unpaired()) {
                    return Err(Failure::constraint_not_allowed(
                        target_root.clone(),
                        existing.version.unpaired().clone(),
                        constraint.clone(),
                        vec![work.root.clone(), target_root.clone()],
                    ));
                }
                if let Some(src) = source_override {
                    if let Some(existing_src) = &existing.id.source {
                        if existing_src != src {
                            return Err(Failure::source_mismatch(
                                target_root.clone(),
                                vec![work.root.clone(), target_root.clone()],
                            ));
                        }
                    }
                }
            }
            if let Some(src) = source_override {
                for dep in selection.dependencies_on(target_root) {
                    if let Some(other_src) = &dep.required_source {
                        if other_src != src {
                            return Err(Failure::source_mismatch(
                                target_root.clone(),
                                vec![work.root.clone(), target_root.clone()],
                            ));
                        }
                    }
                }
            }
        }

        let atom = Atom { id: id.clone(), version };
        selection.push_selection(
            AtomWithPackages { atom: atom.clone(), packages: work.packages_needed.clone() },
            false,
        );

        for (target_root, constraint, source_override, packages) in dependencies {
            selection.add_dependency(&target_root, atom.clone(), constraint, source_override);
            let admissible_count = self.admissible_count(selection, &target_root).await;
            unselected.push(WorkItem { root: target_root, packages_needed: packages, is_root_dependency: false, admissible_count });
        }

        trace!("selected {atom}");
        params.trace.emit(TraceEvent::Select { atom, packages: work.packages_needed.clone() });
        Ok(())
    }

    /// Collapses an imported package path down to the project root that
    /// owns it (e.g. `github.com/user/repo/sub` -> `github.com/user/repo`).
    /// Falls back to treating the whole path as its own root when it
    /// doesn't match any known hosting pattern, so the failure surfaces
    /// later as a normal missing-source error instead of silently here.
    async fn deduce_root(&self, import: &str) -> ProjectRoot {
        self.bridge.deduce_project_root(import).await.unwrap_or_else(|_| ProjectRoot::new(import))
    }

    /// Counts how many of `root`'s known versions currently satisfy its
    /// combined constraint, for `WorkItem::admissible_count` (fewer
    /// admissible versions sorts a project higher in the unselected queue).
    /// Falls back to `usize::MAX` (least urgent) if the version list can't
    /// be fetched yet.
    async fn admissible_count(&self, selection: &Selection, root: &ProjectRoot) -> usize {
        let required_source = selection.dependencies_on(root).into_iter().find_map(|d| d.required_source);
        let id = match required_source {
            Some(src) => ProjectIdentifier::with_source(root.clone(), src),
            None => ProjectIdentifier::bare(root.clone()),
        };
        let Ok(versions) = self.bridge.list_versions(&id).await else { return usize::MAX };
        let constraint = selection.combined_constraint(root);
        versions.iter().filter(|v| constraint.matches_paired(v)).count()
    }

    /// On queue exhaustion, walk up the selection stack popping
    /// work items until the newest item whose identifier appears in the
    /// causal set of the triggering failure. Returns `false` if no such
    /// item exists (the solve is infeasible).
    async fn backjump(
        &self,
        selection: &mut Selection,
        unselected: &mut UnselectedQueue,
        version_queues: &mut std::collections::HashMap<ProjectRoot, VersionQueue>,
        failure: Failure,
        params: &SolveParameters,
    ) -> bool {
        let _ = unselected;
        let causal = failure.causal_set.clone();
        params.trace.emit(TraceEvent::Failure {
            kind: failure.kind.clone(),
            causal_set: causal.clone(),
            message: failure.detail.clone(),
        });

        while let Some((awp, _pkg_only)) = selection.pop_selection() {
            version_queues.remove(&awp.atom.id.root);
            if causal.contains(&awp.atom.id.root) {
                params.trace.emit(TraceEvent::BackjumpTo { atom: awp.atom });
                return true;
            }
        }
        false
    }

    fn snapshot(&self, selection: &Selection, params: &SolveParameters) -> Solution {
        let locked_projects: Vec<LockedProject> = selection
            .roots()
            .filter_map(|root| {
                let atom = selection.atom(root)?;
                let version = match &atom.version {
                    PairedVersionOrPlain::Paired(p) => p.clone(),
                    PairedVersionOrPlain::Plain(_) => return None,
                };
                Some(LockedProject {
                    id: atom.id.clone(),
                    version,
                    packages: selection.required_packages(root),
                })
            })
            .collect();

        Solution {
            locked_projects,
            input_digest: input_digest(&params.manifest),
            attempts: 0,
            solver_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
