//! Derivative-free minimisers for the pose objective.
//!
//! The estimator only needs two things from a solver: minimise a function of
//! a few parameters, and say which kind of solver it is. [NelderMead] is the
//! local pass, [DifferentialEvolution] the bounded global fallback.

mod differential_evolution;
mod nelder_mead;

pub use differential_evolution::DifferentialEvolution;
pub use nelder_mead::NelderMead;

use std::fmt;

/// Which family of solver produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Refines a single starting point
    Local,
    /// Searches a bounded box
    Global,
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverKind::Local => write!(f, "local"),
            SolverKind::Global => write!(f, "global"),
        }
    }
}

/// The best point a solver found. A solver that runs out of iterations still
/// returns its best point, with `converged` unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    /// The best parameters found
    pub params: Vec<f64>,
    /// Objective value at `params`
    pub value: f64,
    /// Whether the solver's stopping criteria were met
    pub converged: bool,
    /// Iterations (simplex steps or generations) run
    pub iterations: usize,
    /// Objective evaluations, polish included
    pub evaluations: usize,
    /// Which solver produced this
    pub kind: SolverKind,
}

/// Error type for solver failures.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The solver gave up before meeting its convergence criteria.
    DidNotConverge { iterations: usize, residual: f64 },
    /// Starting point or bounds have the wrong number of parameters.
    DimensionMismatch { expected: usize, got: usize },
    /// A bound is empty, inverted or not finite.
    InvalidBounds { index: usize, low: f64, high: f64 },
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::DidNotConverge {
                iterations,
                residual,
            } => write!(
                f,
                "did not converge after {} iterations (residual={:.6})",
                iterations, residual
            ),
            SolverError::DimensionMismatch { expected, got } => {
                write!(f, "expected {} parameters, got {}", expected, got)
            }
            SolverError::InvalidBounds { index, low, high } => {
                write!(f, "invalid bounds for parameter {}: [{}, {}]", index, low, high)
            }
        }
    }
}

impl std::error::Error for SolverError {}

/// A derivative-free minimiser.
pub trait Solver {
    /// Local or global.
    fn kind(&self) -> SolverKind;

    /// Minimise `objective`. Local solvers start from `initial`. Global
    /// solvers search their bounds and only check that a non-empty
    /// `initial` has as many parameters as there are bounds.
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        initial: &[f64],
    ) -> Result<Minimum, SolverError>;
}

// NaN compares false against everything and would wedge the simplex ordering.
fn sanitize(value: f64) -> f64 {
    if value.is_nan() {
        f64::INFINITY
    } else {
        value
    }
}
