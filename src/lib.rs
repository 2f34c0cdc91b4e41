//! Core of a source-package dependency resolver: a constraint-satisfaction
//! engine that, given a root project's declared dependency constraints and
//! a lock of previously-chosen versions, produces a complete,
//! transitively-consistent assignment of exactly one version per reachable
//! project, or a precise explanation of why none exists.
//!
//! The engine combines a CDCL-style backtracking search with a bimodal
//! input model: projects declare dependencies at project granularity, but
//! the set of dependencies that actually matters is determined by the
//! packages statically reached from the root's import graph.
//!
//! This crate is the solver core only. Manifest/lock file parsing, the
//! on-disk vendor-tree writer, and the command-line front-end are expected
//! to live in a consuming binary; see [`manifest::ProjectAnalyzer`] and
//! [`vcs::VcsDriver`] for the seams a front-end plugs into.

pub mod bridge;
pub mod config;
pub mod digest;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod manifest;
pub mod package_tree;
pub mod solver;
pub mod source;
pub mod tracer;
pub mod vcs;
pub mod version;

pub use error::{Error, Result};
pub use solver::{SolveParameters, Solution, SolveError, Solver};
