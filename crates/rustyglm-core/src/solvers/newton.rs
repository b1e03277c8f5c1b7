// =============================================================================
// Newton's Method
// =============================================================================
//
// Each iteration forms the dense Hessian H = ∇²f(θ) and steps along
//
//     d = −H⁻¹ ∇f(θ)
//
// with the step length picked by the Hager–Zhang search. Near the optimum
// the unit step is accepted and convergence is quadratic.
//
// MODIFIED CHOLESKY
// -----------------
// For non-convex robust losses (Andrews, Bisquare, Talwar) or a singular
// X̃ᵗWX̃, H need not be positive definite and −H⁻¹g need not point downhill.
// When the factorization fails we retry on H + τI, growing τ tenfold each
// time, which bends d towards steepest descent until H + τI is positive
// definite. Only when that also fails is the iteration abandoned.
//
// Cost per iteration is one (dim·k)² Hessian plus a Cholesky, so this is the
// solver of choice only when p is small.
//
// =============================================================================

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyGlmError};
use crate::linalg::{flatten, norm_inf, spd_solve, unflatten};
use crate::objective::Objective;

use super::problem::{self, LineSearchOptions};
use super::{check_count, check_positive, gradient_converged, SolverOutput};

/// Attempts at H + τI before giving up.
const MAX_SHIFTS: usize = 8;

/// Options for Newton's method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonOptions {
    /// Maximum number of Newton steps.
    /// Default: 50
    pub max_iter: usize,
    /// Relative gradient tolerance: stop when ‖∇f‖∞ ≤ g_tol·max(1, |f|).
    /// Default: 1e-8
    pub g_tol: f64,
    /// Line search parameters.
    pub line_search: LineSearchOptions,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            max_iter: 50,
            g_tol: 1e-8,
            line_search: LineSearchOptions::default(),
        }
    }
}

impl NewtonOptions {
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn g_tol(mut self, g_tol: f64) -> Self {
        self.g_tol = g_tol;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_count("max_iter", self.max_iter)?;
        check_positive("g_tol", self.g_tol)?;
        self.line_search.validate()
    }
}

/// Solve H d = −g, shifting H's diagonal until the factorization succeeds.
///
/// Returns the direction and the shift that was needed (0 when H was
/// already positive definite).
fn newton_direction(hessian: DMatrix<f64>, gradient: &DVector<f64>) -> Option<(DVector<f64>, f64)> {
    let rhs = -gradient;
    if let Some(direction) = spd_solve(hessian.clone(), &rhs) {
        return Some((direction, 0.0));
    }

    let max_diag = hessian.diagonal().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let mut shift = (1e-3 * max_diag).max(1e-8);
    for _ in 0..MAX_SHIFTS {
        let mut shifted = hessian.clone();
        for i in 0..shifted.nrows() {
            shifted[(i, i)] += shift;
        }
        if let Some(direction) = spd_solve(shifted, &rhs) {
            return Some((direction, shift));
        }
        shift *= 10.0;
    }
    None
}

/// Minimize a smooth objective with Newton steps.
pub(crate) fn solve(objective: &Objective, options: &NewtonOptions) -> Result<SolverOutput> {
    let shape = objective.shape();
    let mut theta: Array2<f64> = objective.zeros();
    let (mut value, mut gradient) = objective.value_and_gradient(&theta);

    let mut history = Vec::new();
    let mut iterations = 0;
    let mut converged = gradient_converged(value, &gradient, options.g_tol);

    while !converged && iterations < options.max_iter {
        iterations += 1;

        // ---------------------------------------------------------------------
        // Step 1: Newton direction from the (possibly shifted) Hessian
        // ---------------------------------------------------------------------
        let hessian = objective.hessian_dmatrix(&theta);
        let (step_flat, shift) = match newton_direction(hessian, &flatten(&gradient)) {
            Some(found) => found,
            None => {
                return Err(RustyGlmError::numerical(
                    format!(
                        "Hessian is not positive definite even after {} diagonal shifts",
                        MAX_SHIFTS
                    ),
                    Some(theta),
                ))
            }
        };
        if shift > 0.0 {
            log::debug!("Newton iteration {}: Hessian shifted by {:.2e}", iterations, shift);
        }
        let direction = unflatten(&step_flat, shape)?;

        // ---------------------------------------------------------------------
        // Step 2: line search, starting from the unit step
        // ---------------------------------------------------------------------
        let accepted = match problem::search(
            objective,
            &theta,
            &direction,
            value,
            &gradient,
            1.0,
            &options.line_search,
        ) {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("Newton line search failed at iteration {}", iterations);
                return Err(err);
            }
        };

        theta = accepted.theta;
        value = accepted.value;
        gradient = accepted.gradient;
        history.push(value);

        log::debug!(
            "Newton iteration {}: objective = {:.6e}, step = {:.3e}, |grad|_inf = {:.3e}",
            iterations,
            value,
            accepted.step,
            norm_inf(&gradient)
        );

        converged = gradient_converged(value, &gradient, options.g_tol);
    }

    if converged {
        log::info!("Newton converged after {} iterations", iterations);
    } else {
        log::warn!("Newton hit max_iter = {} before convergence", options.max_iter);
    }

    Ok(SolverOutput {
        theta,
        iterations,
        converged,
        history,
    })
}

// =============================================================================
// Tests
// =============================================================================
