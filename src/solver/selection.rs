//! The current partial assignment: the selection stack and the dependers
//! index.
//!
//! The dependers index is represented as a graph with potential cycles
//! (project A at v1 depending on B, B depending on A at any version): an
//! arena-backed adjacency list keyed by ProjectRoot, using `petgraph`
//! rather than owning links, so a cycle is never materialized through
//! ownership.

use std::collections::{BTreeMap, HashMap};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;

use crate::identifier::{Atom, AtomWithPackages, ProjectRoot, SourceUrl};
use crate::version::Constraint;

/// A constraint imposed by one depending atom onto a dependency's project
/// root, plus the source URL that depender's manifest pins for it (if any),
/// `ProjectIdentifier` source-override.
#[derive(Clone, Debug)]
pub struct Dependency {
    pub depender: Atom,
    pub constraint: Constraint,
    pub required_source: Option<SourceUrl>,
}

/// One entry of the selection stack: records enough to pop it back out.
#[derive(Clone, Debug)]
enum StackEntry {
    /// A brand-new atom was selected (`pkg_only = false`).
    NewAtom { root: ProjectRoot, packages_added: Vec<String> },
    /// The atom for `root` was already selected; this step only grew its
    /// required-package set (`pkg_only = true`).
    PackagesOnly { root: ProjectRoot, packages_added: Vec<String> },
}

/// Reference-counted record of "who currently requires this subpackage",
/// so a package is not dropped while any depender still needs it.
#[derive(Default, Clone)]
struct PackageRefs {
    counts: HashMap<String, u32>,
}

impl PackageRefs {
    fn add(&mut self, pkgs: &[String]) {
        for p in pkgs {
            *self.counts.entry(p.clone()).or_insert(0) += 1;
        }
    }

    fn remove(&mut self, pkgs: &[String]) {
        for p in pkgs {
            if let Some(c) = self.counts.get_mut(p) {
                *c -= 1;
                if *c == 0 {
                    self.counts.remove(p);
                }
            }
        }
    }

    fn paths(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }
}

pub struct Selection {
    atoms: BTreeMap<ProjectRoot, Atom>,
    packages: BTreeMap<ProjectRoot, PackageRefs>,
    stack: Vec<StackEntry>,

    // `StableDiGraph` leaves a tombstone on `remove_node` instead of
    // swap-removing, so `nodes` never goes stale after a backjump pops an
    // atom mid-solve.
    graph: StableDiGraph<ProjectRoot, (Constraint, Option<SourceUrl>)>,
    nodes: HashMap<ProjectRoot, NodeIndex>,
}

impl Default for Selection {
    fn default() -> Self {
        Self::new()
    }
}

impl Selection {
    pub fn new() -> Self {
        Self {
            atoms: BTreeMap::new(),
            packages: BTreeMap::new(),
            stack: Vec::new(),
            graph: StableDiGraph::new(),
            nodes: HashMap::new(),
        }
    }

    fn node_for(&mut self, root: &ProjectRoot) -> NodeIndex {
        if let Some(idx) = self.nodes.get(root) {
            return *idx;
        }
        let idx = self.graph.add_node(root.clone());
        self.nodes.insert(root.clone(), idx);
        idx
    }

    pub fn is_selected(&self, root: &ProjectRoot) -> bool {
        self.atoms.contains_key(root)
    }

    pub fn atom(&self, root: &ProjectRoot) -> Option<&Atom> {
        self.atoms.get(root)
    }

    pub fn required_packages(&self, root: &ProjectRoot) -> Vec<String> {
        self.packages.get(root).map(|p| p.paths()).unwrap_or_default()
    }

    /// `pushSelection(atomWithPackages, pkgOnly)`. `pkg_only = true` means
    /// the atom was already selected; this call only adds more subpackages.
    pub fn push_selection(&mut self, awp: AtomWithPackages, pkg_only: bool) {
        let root = awp.atom.id.root.clone();
        let refs = self.packages.entry(root.clone()).or_default();
        refs.add(&awp.packages);

        if !pkg_only {
            self.atoms.insert(root.clone(), awp.atom);
            self.node_for(&root);
        }

        self.stack.push(if pkg_only {
            StackEntry::PackagesOnly { root, packages_added: awp.packages }
        } else {
            StackEntry::NewAtom { root, packages_added: awp.packages }
        });
    }

    /// `popSelection() -> atomWithPackages, pkgOnly`. Symmetric inverse of
    /// `push_selection`.
    pub fn pop_selection(&mut self) -> Option<(AtomWithPackages, bool)> {
        let entry = self.stack.pop()?;
        match entry {
            StackEntry::NewAtom { root, packages_added } => {
                if let Some(refs) = self.packages.get_mut(&root) {
                    refs.remove(&packages_added);
                }
                let atom = self.atoms.remove(&root)?;
                if let Some(idx) = self.nodes.remove(&root) {
                    self.graph.remove_node(idx);
                }
                Some((AtomWithPackages { atom, packages: packages_added }, false))
            }
            StackEntry::PackagesOnly { root, packages_added } => {
                if let Some(refs) = self.packages.get_mut(&root) {
                    refs.remove(&packages_added);
                }
                let atom = self.atoms.get(&root)?.clone();
                Some((AtomWithPackages { atom, packages: packages_added }, true))
            }
        }
    }

    /// Records that `depender` imposes `constraint` on `target`, as an edge
    /// in the (possibly cyclic) dependers graph. `required_source` is the
    /// source-URL pin, if any, the depender's manifest declared for it.
    pub fn add_dependency(
        &mut self,
        target: &ProjectRoot,
        depender: Atom,
        constraint: Constraint,
        required_source: Option<SourceUrl>,
    ) {
        let depender_root = depender.id.root.clone();
        let from = self.node_for(&depender_root);
        let to = self.node_for(target);
        self.graph.add_edge(from, to, (constraint, required_source));
        let _ = depender;
    }

    /// `getDependenciesOn(root) -> []dependency`: constraints currently
    /// imposed on a project root, derived from incoming graph edges.
    pub fn dependencies_on(&self, root: &ProjectRoot) -> Vec<Dependency> {
        let Some(&to) = self.nodes.get(root) else { return vec![] };
        self.graph
            .edges_directed(to, petgraph::Direction::Incoming)
            .filter_map(|edge| {
                let from_root = self.graph.node_weight(edge.source())?;
                let depender = self.atoms.get(from_root)?.clone();
                let (constraint, required_source) = edge.weight().clone();
                Some(Dependency { depender, constraint, required_source })
            })
            .collect()
    }

    /// The intersection of all active constraints on `root`.
    pub fn combined_constraint(&self, root: &ProjectRoot) -> Constraint {
        self.dependencies_on(root)
            .into_iter()
            .fold(Constraint::Any, |acc, dep| acc.intersect(&dep.constraint))
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &ProjectRoot> {
        self.atoms.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{PairedVersionOrPlain, ProjectIdentifier};
    use crate::version::{PairedVersion, Revision, Version};

    fn atom(root: &str) -> Atom {
        Atom {
            id: ProjectIdentifier::bare(ProjectRoot::new(root)),
            version: PairedVersionOrPlain::Paired(PairedVersion::new(
                Version::PlainTag("v1.0.0".into()),
                Revision("r".into()),
            )),
        }
    }

    #[test]
    fn push_then_pop_is_symmetric() {
        let mut sel = Selection::new();
        let awp = AtomWithPackages { atom: atom("a"), packages: vec!["a".into()] };
        sel.push_selection(awp, false);
        assert!(sel.is_selected(&ProjectRoot::new("a")));

        let (popped, pkg_only) = sel.pop_selection().unwrap();
        assert!(!pkg_only);
        assert_eq!(popped.packages, vec!["a".to_string()]);
        assert!(!sel.is_selected(&ProjectRoot::new("a")));
    }

    #[test]
    fn package_refs_survive_until_last_depender_removed() {
        let mut sel = Selection::new();
        sel.push_selection(
            AtomWithPackages { atom: atom("a"), packages: vec!["a/pkg".into()] },
            false,
        );
        sel.push_selection(
            AtomWithPackages { atom: atom("a"), packages: vec!["a/pkg".into()] },
            true,
        );
        assert_eq!(sel.required_packages(&ProjectRoot::new("a")), vec!["a/pkg".to_string()]);

        sel.pop_selection();
        // one depender remains
        assert_eq!(sel.required_packages(&ProjectRoot::new("a")), vec!["a/pkg".to_string()]);
        sel.pop_selection();
        assert!(sel.required_packages(&ProjectRoot::new("a")).is_empty());
    }

    #[test]
    fn cyclic_dependers_are_representable() {
        let mut sel = Selection::new();
        sel.push_selection(AtomWithPackages { atom: atom("a"), packages: vec![] }, false);
        sel.push_selection(AtomWithPackages { atom: atom("b"), packages: vec![] }, false);
        sel.add_dependency(&ProjectRoot::new("b"), atom("a"), Constraint::Any, None);
        sel.add_dependency(&ProjectRoot::new("a"), atom("b"), Constraint::Any, None);

        assert_eq!(sel.dependencies_on(&ProjectRoot::new("b")).len(), 1);
        assert_eq!(sel.dependencies_on(&ProjectRoot::new("a")).len(), 1);
    }
}
