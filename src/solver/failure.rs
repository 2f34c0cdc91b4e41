//! Failure taxonomy.
//!
//! Every failure kind is recoverable in principle: the solver records it,
//! marks the version failed, and advances. A failure becomes surfaced only
//! if backjumping cannot find a decision to revise.

use crate::identifier::ProjectRoot;
use crate::version::{Constraint, Version};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    NoVersion,
    DisjointConstraint,
    ConstraintNotAllowed,
    VersionNotAllowed,
    SourceMismatch,
    MissingSource,
    CheckeeHasProblemPackages,
    DepHasProblemPackages,
    NonexistentRevision,
    BadOpts,
}

/// One recorded failure, carrying enough structured data to produce both a
/// human message and a tracer line, and the causal set used by backjumping:
/// the project roots whose presence and/or constraint contributed to it.
#[derive(Clone, Debug, Error)]
#[error("{kind:?} on {project}: {detail}")]
pub struct Failure {
    pub kind: FailureKind,
    pub project: ProjectRoot,
    pub detail: String,
    pub causal_set: Vec<ProjectRoot>,
    pub rejected_version: Option<Version>,
    pub active_constraint: Option<Constraint>,
}

impl Failure {
    pub fn no_version(project: ProjectRoot, causal_set: Vec<ProjectRoot>) -> Self {
        Self {
            detail: format!("no version of {project} satisfies the active constraint"),
            kind: FailureKind::NoVersion,
            project,
            causal_set,
            rejected_version: None,
            active_constraint: None,
        }
    }

    pub fn disjoint_constraint(
        project: ProjectRoot,
        active: Constraint,
        causal_set: Vec<ProjectRoot>,
    ) -> Self {
        Self {
            detail: format!("constraint on {project} is disjoint from the already-active constraint"),
            kind: FailureKind::DisjointConstraint,
            project,
            causal_set,
            rejected_version: None,
            active_constraint: Some(active),
        }
    }

    pub fn constraint_not_allowed(
        project: ProjectRoot,
        rejected: Version,
        active: Constraint,
        causal_set: Vec<ProjectRoot>,
    ) -> Self {
        Self {
            detail: format!("{project}'s selected version is excluded by a newly imposed constraint"),
            kind: FailureKind::ConstraintNotAllowed,
            project,
            causal_set,
            rejected_version: Some(rejected),
            active_constraint: Some(active),
        }
    }

    pub fn version_not_allowed(
        project: ProjectRoot,
        rejected: Version,
        active: Constraint,
        causal_set: Vec<ProjectRoot>,
    ) -> Self {
        Self {
            detail: format!("candidate version of {project} is excluded by an already-active constraint"),
            kind: FailureKind::VersionNotAllowed,
            project,
            causal_set,
            rejected_version: Some(rejected),
            active_constraint: Some(active),
        }
    }

    pub fn source_mismatch(project: ProjectRoot, causal_set: Vec<ProjectRoot>) -> Self {
        Self {
            detail: format!("{project} is required from two disagreeing source URLs"),
            kind: FailureKind::SourceMismatch,
            project,
            causal_set,
            rejected_version: None,
            active_constraint: None,
        }
    }

    pub fn missing_source(project: ProjectRoot, causal_set: Vec<ProjectRoot>) -> Self {
        Self {
            detail: format!("no source is reachable for {project}"),
            kind: FailureKind::MissingSource,
            project,
            causal_set,
            rejected_version: None,
            active_constraint: None,
        }
    }

    pub fn checkee_has_problem_packages(
        project: ProjectRoot,
        missing: Vec<String>,
        causal_set: Vec<ProjectRoot>,
    ) -> Self {
        Self {
            detail: format!("{project} is missing or errors on packages: {}", missing.join(", ")),
            kind: FailureKind::CheckeeHasProblemPackages,
            project,
            causal_set,
            rejected_version: None,
            active_constraint: None,
        }
    }

    pub fn dep_has_problem_packages(
        project: ProjectRoot,
        missing: Vec<String>,
        causal_set: Vec<ProjectRoot>,
    ) -> Self {
        Self {
            detail: format!("a candidate of {project} is missing or errors on packages: {}", missing.join(", ")),
            kind: FailureKind::DepHasProblemPackages,
            project,
            causal_set,
            rejected_version: None,
            active_constraint: None,
        }
    }

    pub fn nonexistent_revision(project: ProjectRoot, causal_set: Vec<ProjectRoot>) -> Self {
        Self {
            detail: format!("the requested revision of {project} does not exist at its source"),
            kind: FailureKind::NonexistentRevision,
            project,
            causal_set,
            rejected_version: None,
            active_constraint: None,
        }
    }

    pub fn bad_opts(project: ProjectRoot, detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            kind: FailureKind::BadOpts,
            project,
            causal_set: vec![],
            rejected_version: None,
            active_constraint: None,
        }
    }
}

/// The surfaced, unrecoverable failure chain: backjumping could not find a
/// decision to revise. Carries every `Failure` recorded along the path that
/// led to infeasibility.
#[derive(Clone, Debug)]
pub struct SolveError {
    pub chain: Vec<Failure>,
}

impl std::fmt::Display for SolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = self.chain.last().map(|f| f.detail.as_str()).unwrap_or("no detail");
        write!(f, "solve failed after {} recorded failures: {last}", self.chain.len())
    }
}

impl std::error::Error for SolveError {}

impl SolveError {
    pub fn new(chain: Vec<Failure>) -> Self {
        Self { chain }
    }

    /// The project roots named by at least one failure in the chain,
    /// satisfying the invariant that a failed solve's returned failure
    /// names at least one project root present in every minimal
    /// unsatisfiable subset the solver traversed.
    pub fn named_roots(&self) -> Vec<ProjectRoot> {
        let mut roots: Vec<ProjectRoot> = self
            .chain
            .iter()
            .flat_map(|f| std::iter::once(f.project.clone()).chain(f.causal_set.clone()))
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_roots_includes_failing_project() {
        let root = ProjectRoot::new("foo");
        let failure = Failure::no_version(root.clone(), vec![ProjectRoot::new("root")]);
        let err = SolveError::new(vec![failure]);
        assert!(err.named_roots().contains(&root));
        assert!(err.named_roots().contains(&ProjectRoot::new("root")));
    }
}
