// =============================================================================
// L-BFGS
// =============================================================================
//
// Quasi-Newton without a Hessian. The last m step/gradient-change pairs
//
//     s_i = θ_{i+1} − θ_i,     y_i = ∇f(θ_{i+1}) − ∇f(θ_i)
//
// define an implicit inverse-Hessian approximation, applied to the gradient
// by the two-loop recursion in O(m·dim·k). The outer loop is argmin's
// `LBFGS` run through an `Executor`, with the Hager–Zhang search from
// `problem`.
//
// STOPPING
// --------
// argmin stops on ‖∇f‖₂ < g_tol, at max_iter, or when a line search fails
// (kinks in Talwar and Quantile can do that). Whatever the reason, the
// reported `converged` flag is the shared rule ‖∇f‖∞ ≤ g_tol·max(1, |f|)
// evaluated at the last accepted iterate.
//
// =============================================================================

use argmin::core::observers::ObserverMode;
use argmin::core::{Executor, State};
use argmin::solver::quasinewton::LBFGS;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyGlmError};
use crate::objective::Objective;

use super::problem::{HagerZhang, LineSearchOptions, ObjectiveProblem, Param, Trace};
use super::{check_count, check_positive, gradient_converged, SolverOutput};

/// Options for L-BFGS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsOptions {
    /// Number of (s, y) pairs kept.
    /// Default: 10
    pub memory: usize,
    /// Maximum number of iterations.
    /// Default: 1000
    pub max_iter: usize,
    /// Relative gradient tolerance: stop when ‖∇f‖∞ ≤ g_tol·max(1, |f|).
    /// Default: 1e-8
    pub g_tol: f64,
    /// Line search parameters.
    pub line_search: LineSearchOptions,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            memory: 10,
            max_iter: 1000,
            g_tol: 1e-8,
            line_search: LineSearchOptions::default(),
        }
    }
}

impl LbfgsOptions {
    pub fn memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn g_tol(mut self, g_tol: f64) -> Self {
        self.g_tol = g_tol;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_count("memory", self.memory)?;
        check_count("max_iter", self.max_iter)?;
        check_positive("g_tol", self.g_tol)?;
        self.line_search.validate()
    }
}

/// Minimize a (sub)differentiable objective with L-BFGS.
pub(crate) fn solve(objective: &Objective, options: &LbfgsOptions) -> Result<SolverOutput> {
    let start = objective.zeros();
    let (start_value, start_gradient) = objective.value_and_gradient(&start);
    if gradient_converged(start_value, &start_gradient, options.g_tol) {
        log::info!("L-BFGS converged after 0 iterations");
        return Ok(SolverOutput {
            theta: start,
            iterations: 0,
            converged: true,
            history: Vec::new(),
        });
    }

    // ‖∇f‖₂ < g_tol implies the relative ∞-norm rule; the cost tolerance is
    // off so a stalled run ends on a failed search instead.
    let line_search = options.line_search.hager_zhang()?;
    let lbfgs: LBFGS<HagerZhang, Param, Param, f64> = LBFGS::new(line_search, options.memory)
        .with_tolerance_grad(options.g_tol)?
        .with_tolerance_cost(0.0)?;

    let trace = Trace::new("L-BFGS");
    let outcome = Executor::new(ObjectiveProblem::new(objective), lbfgs)
        .configure(|state| {
            state
                .param(ObjectiveProblem::flatten(&start))
                .gradient(ObjectiveProblem::flatten(&start_gradient))
                .cost(start_value)
                .max_iters(options.max_iter as u64)
        })
        .add_observer(trace.clone(), ObserverMode::Always)
        .run();

    let (history, last) = trace.finish();
    let iterations = history.len();
    let theta = match last {
        Some(param) => Array2::from_shape_vec(objective.shape(), param)?,
        None => start,
    };
    let (value, gradient) = objective.value_and_gradient(&theta);
    let converged = gradient_converged(value, &gradient, options.g_tol);

    match outcome {
        Ok(result) => {
            if let Some(reason) = result.state().get_termination_reason() {
                log::debug!("L-BFGS stopped after {} iterations: {}", iterations, reason);
            }
        }
        Err(err) if converged => {
            log::debug!("L-BFGS error after the gradient rule was met: {}", err);
        }
        Err(err) => {
            return Err(RustyGlmError::numerical(
                format!("L-BFGS failed after {} iterations: {}", iterations, err),
                Some(theta),
            ))
        }
    }

    if converged {
        log::info!("L-BFGS converged after {} iterations", iterations);
    } else if iterations >= options.max_iter {
        log::warn!("L-BFGS hit max_iter = {} before convergence", options.max_iter);
    } else {
        log::warn!(
            "L-BFGS stopped after {} iterations without meeting the gradient rule (|f| = {:.6e})",
            iterations,
            value.abs()
        );
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
