// =============================================================================
// Analytical Solver
// =============================================================================
//
// For squared loss with no penalty or an L2 penalty the objective is an exact
// quadratic
//
//     f(θ) = s·½‖y − X̃θ‖² + ½λ‖Dθ‖²
//
// so the minimizer solves the normal equations
//
//     (s·X̃ᵗX̃ + λD) θ = s·X̃ᵗy
//
// where D is the identity with a zero for an exempt intercept. The system
// matrix is the (constant) Hessian and the right-hand side is −∇f(0), so both
// are read straight off the objective.
//
// Two ways to solve it:
//   - Cholesky: form X̃ᵗX̃ once and factorize (default, p moderate)
//   - CG: never form X̃ᵗX̃, apply it through two passes over X per iteration
//
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyGlmError};
use crate::linalg::{cholesky_solve, conjugate_gradient, flatten, unflatten};
use crate::objective::Objective;

use super::{check_count, check_positive, SolverOutput};

/// Options for the direct solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticalOptions {
    /// Use matrix-free conjugate gradient instead of Cholesky.
    /// Default: false
    pub iterative: bool,
    /// Cap on CG iterations when `iterative` is set.
    /// Default: 1000
    pub max_inner: usize,
    /// Relative residual tolerance of the CG solve.
    /// Default: 1e-10
    pub tol: f64,
}

impl Default for AnalyticalOptions {
    fn default() -> Self {
        Self {
            iterative: false,
            max_inner: 1000,
            tol: 1e-10,
        }
    }
}

impl AnalyticalOptions {
    pub fn iterative(mut self, iterative: bool) -> Self {
        self.iterative = iterative;
        self
    }

    pub fn max_inner(mut self, max_inner: usize) -> Self {
        self.max_inner = max_inner;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_count("max_inner", self.max_inner)?;
        check_positive("tol", self.tol)
    }
}

/// Solve the normal equations of a squared-loss objective.
pub(crate) fn solve(objective: &Objective, options: &AnalyticalOptions) -> Result<SolverOutput> {
    let zeros = objective.zeros();
    let rhs = objective.gradient(&zeros).mapv(|g| -g);

    let (theta, iterations, converged) = if options.iterative {
        // ---------------------------------------------------------------------
        // Matrix-free: the Hessian does not depend on θ for a quadratic, so
        // one operator built at 0 serves the whole CG pass.
        // ---------------------------------------------------------------------
        let operator = objective.hessian_operator(&zeros);
        let outcome = conjugate_gradient(
            |v| operator.apply(v),
            &rhs,
            None,
            options.max_inner,
            options.tol,
        );
        if outcome.negative_curvature {
            return Err(RustyGlmError::numerical(
                "normal equations are singular: CG met a direction of zero curvature",
                Some(outcome.solution),
            ));
        }
        if !outcome.converged {
            log::warn!(
                "Analytical CG stopped at max_inner = {} before reaching tol = {:.1e}",
                options.max_inner,
                options.tol
            );
        }
        log::debug!("Analytical CG: {} operator applications", outcome.iterations);
        (outcome.solution, outcome.iterations, outcome.converged)
    } else {
        // ---------------------------------------------------------------------
        // Direct: factorize s·X̃ᵗX̃ + λD.
        // ---------------------------------------------------------------------
        let hessian = objective.hessian(&zeros);
        let solution = cholesky_solve(&hessian, &flatten(&rhs)).ok_or_else(|| {
            RustyGlmError::numerical(
                "normal equations are not positive definite (Cholesky failed); \
                 consider an L2 penalty or the iterative solver",
                None,
            )
        })?;
        (unflatten(&solution, objective.shape())?, 1, true)
    };

    let value = objective.value(&theta);
    log::debug!("Analytical solve finished: objective = {:.6e}", value);

    Ok(SolverOutput {
        theta,
        iterations,
        converged,
        history: vec![value],
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::Loss;
    use crate::objective::ObjectiveSpec;
    use crate::penalty::Penalty;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2};

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 2.0],
            [2.0, 1.0],
            [3.0, 4.0],
            [4.0, 3.0],
            [5.0, 5.0],
            [0.5, -1.0]
        ];
        let y = array![3.1, 2.9, 7.2, 6.8, 10.1, -0.4];
        (x, y)
    }

    #[test]
    fn test_cholesky_zeroes_gradient() {
        let (x, y) = data();
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::L2(0.5));
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let out = solve(&obj, &AnalyticalOptions::default()).unwrap();
        assert!(out.converged);
        assert_eq!(out.iterations, 1);
        let grad = obj.gradient(&out.theta);
        for g in grad.iter() {
            assert_abs_diff_eq!(*g, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_cg_matches_cholesky() {
        let (x, y) = data();
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::L2(0.1));
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let direct = solve(&obj, &AnalyticalOptions::default()).unwrap();
        let cg = solve(&obj, &AnalyticalOptions::default().iterative(true)).unwrap();
        assert!(cg.converged);
        for (a, b) in direct.theta.iter().zip(cg.theta.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_matches_closed_form_without_intercept() {
        // Single feature, no intercept: θ = Σxy / (Σx² + λ).
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 3.0, 2.0];
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::L2(1.0)).fit_intercept(false);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let out = solve(&obj, &AnalyticalOptions::default()).unwrap();
        assert_abs_diff_eq!(out.theta[[0, 0]], 13.0 / 15.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_system_is_numerical_failure() {
        // An all-zero column with no penalty makes XᵗX singular.
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::None).fit_intercept(false);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let err = solve(&obj, &AnalyticalOptions::default()).unwrap_err();
        assert!(matches!(err, RustyGlmError::NumericalFailure { .. }));
    }

    #[test]
    fn test_options_validation() {
        assert!(AnalyticalOptions::default().validate().is_ok());
        assert!(AnalyticalOptions::default().max_inner(0).validate().is_err());
        assert!(AnalyticalOptions::default().tol(-1.0).validate().is_err());
    }
}
