// =============================================================================
// Error Types
// =============================================================================
//
// Every fallible operation in the crate returns `Result<T>`, an alias over
// `RustyGlmError`. The variants follow the order in which a fit can fail:
//
//   1. DimensionMismatch     - X / y / θ shapes disagree
//   2. InvalidHyperparameter - negative λ, γ, δ, τ outside (0, 1), n ≤ p, ...
//   3. InvalidResponse       - class codes that do not match the loss
//   4. IncompatibleSolver    - the solver cannot handle the loss/penalty pair
//   5. NumericalFailure      - factorization, line search or argmin broke mid-fit
//
// The first four are raised before any iterative work starts. Only the last
// one can happen mid-iteration, and it carries the last valid iterate so the
// caller can still inspect where the solver got to.
//
// =============================================================================

use ndarray::{Array2, ShapeError};
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RustyGlmError>;

/// Errors that can occur while building an objective or fitting a model.
#[derive(Error, Debug, Clone)]
pub enum RustyGlmError {
    /// Shapes of X, y or θ are inconsistent.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A penalty/loss/solver parameter is out of its valid range.
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    /// The response vector is not coded the way the loss expects.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The requested solver cannot minimize this loss/penalty combination.
    #[error("Solver {solver} is incompatible with {loss} loss and {penalty} penalty")]
    IncompatibleSolver {
        solver: String,
        loss: String,
        penalty: String,
    },

    /// A factorization or line search failed to make progress.
    #[error("Numerical failure: {message}")]
    NumericalFailure {
        message: String,
        /// Last iterate the solver had accepted before failing, if any.
        last_iterate: Option<Array2<f64>>,
    },
}

impl RustyGlmError {
    pub(crate) fn numerical(message: impl Into<String>, last_iterate: Option<Array2<f64>>) -> Self {
        RustyGlmError::NumericalFailure {
            message: message.into(),
            last_iterate,
        }
    }

    /// The last valid iterate attached to a `NumericalFailure`.
    pub fn last_iterate(&self) -> Option<&Array2<f64>> {
        match self {
            RustyGlmError::NumericalFailure { last_iterate, .. } => last_iterate.as_ref(),
            _ => None,
        }
    }
}

impl From<argmin::core::Error> for RustyGlmError {
    fn from(err: argmin::core::Error) -> Self {
        RustyGlmError::numerical(format!("argmin: {}", err), None)
    }
}

impl From<ShapeError> for RustyGlmError {
    fn from(err: ShapeError) -> Self {
        RustyGlmError::DimensionMismatch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_iterate_only_on_numerical_failure() {
        let theta = Array2::<f64>::ones((3, 1));
        let err = RustyGlmError::numerical("line search stalled", Some(theta.clone()));
        assert_eq!(err.last_iterate(), Some(&theta));

        let err = RustyGlmError::DimensionMismatch("X has 3 rows".to_string());
        assert!(err.last_iterate().is_none());
    }

    #[test]
    fn test_argmin_errors_become_numerical_failures() {
        let err: RustyGlmError = argmin::core::Error::msg("line search diverged").into();
        assert!(matches!(err, RustyGlmError::NumericalFailure { .. }));
        assert!(err.to_string().contains("line search diverged"));
        assert!(err.last_iterate().is_none());
    }

    #[test]
    fn test_incompatible_solver_message() {
        let err = RustyGlmError::IncompatibleSolver {
            solver: "Newton".to_string(),
            loss: "squared".to_string(),
            penalty: "L1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Solver Newton is incompatible with squared loss and L1 penalty"
        );
    }
}
