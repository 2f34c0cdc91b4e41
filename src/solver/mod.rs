//! The backtracking solver.

pub mod core;
pub mod failure;
pub mod selection;
pub mod unselected;
pub mod version_queue;

pub use core::{SolveParameters, Solution, Solver};
pub use failure::{Failure, FailureKind, SolveError};
