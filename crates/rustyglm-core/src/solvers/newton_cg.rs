// =============================================================================
// Newton-CG (truncated Newton)
// =============================================================================
//
// Same outer iteration as Newton, but the system H d = −g is never formed:
// it is solved approximately by conjugate gradient using only Hessian-vector
// products, each costing two passes over X. This keeps memory at O(n·k) and
// makes second-order steps affordable when p is large.
//
// INEXACT SOLVES
// --------------
// The inner CG stops at relative residual
//
//     ‖H d + g‖ ≤ η‖g‖,     η = min(0.5, √‖g‖∞)
//
// so early iterations use cheap, rough directions and the accuracy tightens
// as the gradient vanishes (superlinear convergence).
//
// If CG meets a direction of non-positive curvature it stops and returns the
// iterate built so far, which is still a descent direction. When that happens
// on the very first inner step the steepest-descent direction −g is used.
//
// =============================================================================

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::linalg::{conjugate_gradient, inner, norm2, norm_inf};
use crate::objective::Objective;

use super::problem::{self, LineSearchOptions};
use super::{check_count, check_positive, gradient_converged, SolverOutput};

/// Options for the truncated Newton solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonCgOptions {
    /// Maximum number of outer Newton steps.
    /// Default: 100
    pub max_iter: usize,
    /// Cap on Hessian-vector products per inner CG solve.
    /// Default: 100
    pub max_inner: usize,
    /// Relative gradient tolerance: stop when ‖∇f‖∞ ≤ g_tol·max(1, |f|).
    /// Default: 1e-8
    pub g_tol: f64,
    /// Line search parameters.
    pub line_search: LineSearchOptions,
}

impl Default for NewtonCgOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            max_inner: 100,
            g_tol: 1e-8,
            line_search: LineSearchOptions::default(),
        }
    }
}

impl NewtonCgOptions {
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn max_inner(mut self, max_inner: usize) -> Self {
        self.max_inner = max_inner;
        self
    }

    pub fn g_tol(mut self, g_tol: f64) -> Self {
        self.g_tol = g_tol;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_count("max_iter", self.max_iter)?;
        check_count("max_inner", self.max_inner)?;
        check_positive("g_tol", self.g_tol)?;
        self.line_search.validate()
    }
}

/// Approximate Newton direction from an inner CG solve.
fn inexact_direction(
    objective: &Objective,
    theta: &Array2<f64>,
    gradient: &Array2<f64>,
    max_inner: usize,
) -> (Array2<f64>, usize) {
    let steepest = gradient.mapv(|g| -g);
    let forcing = norm_inf(gradient).sqrt().min(0.5);

    let operator = objective.hessian_operator(theta);
    let outcome = conjugate_gradient(|v| operator.apply(v), &steepest, None, max_inner, forcing);

    let stalled = outcome.negative_curvature && norm2(&outcome.solution) == 0.0;
    if stalled || inner(&outcome.solution, gradient) >= 0.0 {
        (steepest, outcome.iterations)
    } else {
        (outcome.solution, outcome.iterations)
    }
}

/// Minimize a smooth objective with truncated Newton steps.
pub(crate) fn solve(objective: &Objective, options: &NewtonCgOptions) -> Result<SolverOutput> {
    let mut theta = objective.zeros();
    let (mut value, mut gradient) = objective.value_and_gradient(&theta);

    let mut history = Vec::new();
    let mut iterations = 0;
    let mut converged = gradient_converged(value, &gradient, options.g_tol);

    while !converged && iterations < options.max_iter {
        iterations += 1;

        let (direction, inner_steps) =
            inexact_direction(objective, &theta, &gradient, options.max_inner);

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
                log::warn!("Newton-CG line search failed at iteration {}", iterations);
                return Err(err);
            }
        };

        theta = accepted.theta;
        value = accepted.value;
        gradient = accepted.gradient;
        history.push(value);

        log::debug!(
            "Newton-CG iteration {}: objective = {:.6e}, inner = {}, step = {:.3e}, |grad|_inf = {:.3e}",
            iterations,
            value,
            inner_steps,
            accepted.step,
            norm_inf(&gradient)
        );

        converged = gradient_converged(value, &gradient, options.g_tol);
    }

    if converged {
        log::info!("Newton-CG converged after {} iterations", iterations);
    } else {
        log::warn!("Newton-CG hit max_iter = {} before convergence", options.max_iter);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::{Loss, Rho};
    use crate::objective::ObjectiveSpec;
    use crate::penalty::Penalty;
    use crate::solvers::newton::{self, NewtonOptions};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn multiclass_data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 0.1],
            [0.9, -0.2],
            [1.2, 0.3],
            [-1.0, 0.9],
            [-0.8, 1.1],
            [-1.1, 0.7],
            [0.1, -1.0],
            [-0.2, -1.2],
            [0.0, -0.9],
            [0.5, 0.5]
        ];
        let y = array![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 2.0];
        (x, y)
    }

    #[test]
    fn test_multinomial_matches_newton() {
        let (x, y) = multiclass_data();
        // An unpenalized intercept leaves the class offsets free to shift
        // together, so penalize it to get a unique minimizer.
        let spec = ObjectiveSpec::new(Loss::Multinomial, Penalty::L2(1.0)).penalize_intercept(true);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let truncated = solve(&obj, &NewtonCgOptions::default()).unwrap();
        let exact = newton::solve(&obj, &NewtonOptions::default()).unwrap();
        assert!(truncated.converged);
        assert!(exact.converged);
        assert_eq!(truncated.theta.dim(), (3, 3));
        for (a, b) in truncated.theta.iter().zip(exact.theta.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_huber_stationary_point() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.1, 1.1, 1.9, 3.2, 3.9, 25.0];
        let spec = ObjectiveSpec::new(Loss::Robust(Rho::Huber(1.0)), Penalty::L2(0.01));
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let out = solve(&obj, &NewtonCgOptions::default()).unwrap();
        assert!(out.converged);
        let f = obj.value(&out.theta);
        for g in obj.gradient(&out.theta).iter() {
            assert!(g.abs() <= 1e-8 * f.abs().max(1.0));
        }
    }

    #[test]
    fn test_falls_back_to_steepest_descent_on_negative_curvature() {
        // Bisquare with every residual in the concave region.
        let x = array![[1.0], [1.0], [1.0], [1.0]];
        let y = array![0.95, 1.0, 1.05, 1.0];
        let spec = ObjectiveSpec::new(Loss::Robust(Rho::Bisquare(1.2)), Penalty::None)
            .fit_intercept(false);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let theta = obj.zeros();
        let gradient = obj.gradient(&theta);
        let (direction, _) = inexact_direction(&obj, &theta, &gradient, 10);
        assert_abs_diff_eq!(direction[[0, 0]], -gradient[[0, 0]], epsilon = 1e-15);
    }
}
