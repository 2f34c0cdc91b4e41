//! Static import scan and external-reach computation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

/// A single subpackage discovered under an import root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Package {
    pub path: String,
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
    /// Whether this package declares `package main`. A main package is
    /// never importable by anything else, so `external_reach` only
    /// contributes its own reach when `mains_included` is set.
    pub is_main: bool,
}

/// A package scan outcome: either a clean `Package` or a recorded error.
/// Errored packages poison anything that transitively reaches them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PackageOrError {
    Ok(Package),
    Err(PackageError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PackageError {
    /// A relative import (`.`, `..`, `./x`) was found; never silently
    /// accepted.
    LocalImports { path: String, offending: Vec<String> },
    /// No buildable files were found under any OS/arch/tag combination.
    NoBuildableFiles { path: String },
}

/// `ImportRoot -> { path -> PackageOrError }`,
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PackageTree {
    pub import_root: String,
    pub packages: BTreeMap<String, PackageOrError>,
}

impl PackageTree {
    pub fn new(import_root: impl Into<String>) -> Self {
        Self { import_root: import_root.into(), packages: BTreeMap::new() }
    }

    fn is_skipped_dir_name(name: &str) -> bool {
        name.starts_with('.') || name.starts_with('_')
    }

    /// Inserts a scanned package. Local (relative) imports are rejected and
    /// recorded as an error instead.
    pub fn insert_scanned(
        &mut self,
        path: impl Into<String>,
        imports: Vec<String>,
        test_imports: Vec<String>,
        is_main: bool,
    ) {
        let path = path.into();
        let local: Vec<String> = imports
            .iter()
            .chain(test_imports.iter())
            .filter(|i| is_relative_import(i))
            .cloned()
            .collect();
        if !local.is_empty() {
            self.packages.insert(
                path.clone(),
                PackageOrError::Err(PackageError::LocalImports { path, offending: local }),
            );
            return;
        }
        self.packages.insert(path.clone(), PackageOrError::Ok(Package { path, imports, test_imports, is_main }));
    }

    pub fn insert_error(&mut self, path: impl Into<String>, err: PackageError) {
        self.packages.insert(path.into(), PackageOrError::Err(err));
    }

    fn directories_to_skip(name: &str) -> bool {
        Self::is_skipped_dir_name(name) || name == "vendor" || name == "testdata"
    }
}

fn is_relative_import(import: &str) -> bool {
    import == "." || import == ".." || import.starts_with("./") || import.starts_with("../")
}

/// Whether `dir_name` should be skipped while walking a filesystem tree for
/// `ListPackages`, unless it was reached as an explicit import.
pub fn should_skip_directory(dir_name: &str, reached_as_explicit_import: bool) -> bool {
    if PackageTree::is_skipped_dir_name(dir_name) {
        return true;
    }
    if (dir_name == "vendor" || dir_name == "testdata") && !reached_as_explicit_import {
        return true;
    }
    false
}

/// Computes, for each package in `tree`, the set of external imports
/// transitively reachable from it.
///
/// `mains_included`/`tests_included` control whether `main`-only and
/// test-only imports participate; `ignored` paths are treated as absent
/// from the tree, both as sources and as targets. An internal cycle yields
/// the same reach set for every package on the cycle. A package that
/// transitively reaches an errored or missing-from-tree package is excluded
/// from the result (poisoning) rather than returning a partial reach set.
pub fn external_reach(
    tree: &PackageTree,
    mains_included: bool,
    tests_included: bool,
    ignored: &BTreeSet<String>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut result = BTreeMap::new();
    let mut poisoned: HashSet<String> = HashSet::new();

    for (path, entry) in &tree.packages {
        if ignored.contains(path) {
            continue;
        }
        if !mains_included {
            if let PackageOrError::Ok(pkg) = entry {
                if pkg.is_main {
                    continue;
                }
            }
        }
        let mut visiting = HashSet::new();
        if let Some(reach) = reach_one(tree, path, tests_included, ignored, &mut visiting, &mut poisoned) {
            result.insert(path.clone(), reach);
        }
    }
    result
}

fn reach_one(
    tree: &PackageTree,
    path: &str,
    tests_included: bool,
    ignored: &BTreeSet<String>,
    visiting: &mut HashSet<String>,
    poisoned: &mut HashSet<String>,
) -> Option<BTreeSet<String>> {
    if poisoned.contains(path) {
        return None;
    }
    if visiting.contains(path) {
        // Cycle: contribute nothing further from here; the caller that
        // started the cycle folds in the rest once recursion unwinds, giving
        // every package on the cycle the same eventual reach set.
        return Some(BTreeSet::new());
    }
    if ignored.contains(path) {
        return Some(BTreeSet::new());
    }

    let Some(entry) = tree.packages.get(path) else {
        poisoned.insert(path.to_string());
        return None;
    };
    let pkg = match entry {
        PackageOrError::Ok(p) => p,
        PackageOrError::Err(_) => {
            poisoned.insert(path.to_string());
            return None;
        }
    };

    visiting.insert(path.to_string());

    let mut reach = BTreeSet::new();
    let import_iter: Vec<&String> = if tests_included {
        pkg.imports.iter().chain(pkg.test_imports.iter()).collect()
    } else {
        pkg.imports.iter().collect()
    };

    for import in import_iter {
        if ignored.contains(import) {
            continue;
        }
        if tree.import_root.is_empty() || !import.starts_with(&tree.import_root) {
            reach.insert(import.clone());
            continue;
        }
        // internal import: recurse and fold in its reach
        match reach_one(tree, import, tests_included, ignored, visiting, poisoned) {
            Some(sub) => reach.extend(sub),
            None => {
                poisoned.insert(path.to_string());
                visiting.remove(path);
                return None;
            }
        }
    }

    visiting.remove(path);
    Some(reach)
}
