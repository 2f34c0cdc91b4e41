//! Unified error type used across the resolver core.
//! Variants are designed to provide actionable context to the external
//! front-end that surfaces them to a user.
use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

use crate::identifier::ProjectRoot;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O error from the filesystem or a subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A filesystem operation failed at a specific path.
    #[error("file system error at {path:?}: {error}")]
    FileSystem {
        path: PathBuf,
        error: std::io::ErrorKind,
    },

    /// The provided version or constraint string could not be parsed.
    #[error("invalid version syntax: {0}")]
    InvalidVersionSyntax(#[from] semver::Error),

    /// Network transport failure while talking to a source.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A VCS driver op failed; see [`crate::vcs::DriverError`].
    #[error(transparent)]
    Driver(#[from] crate::vcs::DriverError),

    /// The source manager could not resolve or reach a source.
    #[error(transparent)]
    Source(#[from] crate::source::SourceError),

    /// The solver could not produce a solution; carries the synthesized
    /// failure chain that caused the search to give up.
    #[error("no solution: {0}")]
    Solve(#[from] crate::solver::failure::SolveError),

    /// A `SolveParameters` value violated an internal precondition.
    /// Never recoverable by backjumping, a programming error at the
    /// boundary.
    #[error("invalid solve parameters: {0}")]
    BadOpts(String),

    /// Project root deduction failed for the given import path.
    #[error("could not deduce a project root for import path '{0}'")]
    RootDeductionFailed(String),

    /// A project root appears more than once with incompatible sources.
    #[error("source mismatch for {root}: '{a}' vs '{b}'")]
    SourceMismatch {
        root: ProjectRoot,
        a: String,
        b: String,
    },

    #[error("{0}")]
    Other(Cow<'static, str>),
}

impl From<&'static str> for Error {
    fn from(value: &'static str) -> Self {
        Error::Other(Cow::Borrowed(value))
    }
}
