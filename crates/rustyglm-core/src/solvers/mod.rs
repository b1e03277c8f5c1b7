// =============================================================================
// Solvers
// =============================================================================
//
// Six ways of minimizing F(θ) = f(θ) + P_nonsmooth(θ). Which ones apply
// depends on the structure of the objective:
//
//   Solver        Needs                                    Work per iteration
//   ----------    -------------------------------------    ---------------------
//   Analytical    squared loss, {none, L2}                 one Cholesky / one CG
//   Newton        twice-differentiable loss, {none, L2}    dense Hessian solve
//   NewtonCg      twice-differentiable loss, {none, L2}    CG on Hessian-vector
//   Lbfgs         (sub)differentiable loss, {none, L2}     argmin LBFGS step
//   ProxGrad      anything; required for {L1, EN}          gradient + prox
//   IwlsCg        robust loss, {none, L2}                  weights + CG
//
// The compatibility table itself lives in `dispatch`; the solvers assume
// they were handed an objective they can minimize. Newton, NewtonCg and
// Lbfgs share argmin's Hager–Zhang line search through `problem`.
//
// CONVERGENCE
// -----------
// Each family uses one documented stopping rule:
//
//   Analytical-CG              ‖r‖ ≤ tol·‖b‖
//   Newton, NewtonCg, Lbfgs    ‖∇f‖∞ ≤ g_tol·max(1, |f|)
//   ProxGrad, IwlsCg           ‖θ − θ_prev‖ ≤ tol·max(‖θ‖, ε)
//
// Iteration caps are hard stops: the solver returns its current iterate with
// `converged = false` and never retries.
//
// =============================================================================

pub mod analytical;
pub mod iwls_cg;
pub mod lbfgs;
pub mod newton;
pub mod newton_cg;
pub mod problem;
pub mod prox_grad;

pub use analytical::AnalyticalOptions;
pub use iwls_cg::IwlsCgOptions;
pub use lbfgs::LbfgsOptions;
pub use newton::NewtonOptions;
pub use newton_cg::NewtonCgOptions;
pub use problem::LineSearchOptions;
pub use prox_grad::ProxGradOptions;

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::linalg::{distance, norm2, norm_inf};
use crate::objective::Objective;

// =============================================================================
// Solver configuration
// =============================================================================

/// Which solver family, without its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolverKind {
    Analytical,
    Newton,
    NewtonCg,
    Lbfgs,
    ProxGrad,
    IwlsCg,
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverKind::Analytical => "Analytical",
            SolverKind::Newton => "Newton",
            SolverKind::NewtonCg => "NewtonCG",
            SolverKind::Lbfgs => "LBFGS",
            SolverKind::ProxGrad => "ProxGrad",
            SolverKind::IwlsCg => "IWLSCG",
        };
        f.write_str(name)
    }
}

/// A solver together with its options. Passed by value into a fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Solver {
    Analytical(AnalyticalOptions),
    Newton(NewtonOptions),
    NewtonCg(NewtonCgOptions),
    Lbfgs(LbfgsOptions),
    ProxGrad(ProxGradOptions),
    IwlsCg(IwlsCgOptions),
}

impl Solver {
    /// Direct Cholesky solve of the normal equations.
    pub fn cholesky() -> Self {
        Solver::Analytical(AnalyticalOptions::default())
    }

    /// Matrix-free CG solve of the normal equations.
    pub fn cg() -> Self {
        Solver::Analytical(AnalyticalOptions::default().iterative(true))
    }

    pub fn newton() -> Self {
        Solver::Newton(NewtonOptions::default())
    }

    pub fn newton_cg() -> Self {
        Solver::NewtonCg(NewtonCgOptions::default())
    }

    pub fn lbfgs() -> Self {
        Solver::Lbfgs(LbfgsOptions::default())
    }

    /// Proximal gradient without acceleration.
    pub fn ista() -> Self {
        Solver::ProxGrad(ProxGradOptions::default().accel(false))
    }

    /// Proximal gradient with Nesterov acceleration.
    pub fn fista() -> Self {
        Solver::ProxGrad(ProxGradOptions::default().accel(true))
    }

    pub fn iwls_cg() -> Self {
        Solver::IwlsCg(IwlsCgOptions::default())
    }

    pub fn kind(&self) -> SolverKind {
        match self {
            Solver::Analytical(_) => SolverKind::Analytical,
            Solver::Newton(_) => SolverKind::Newton,
            Solver::NewtonCg(_) => SolverKind::NewtonCg,
            Solver::Lbfgs(_) => SolverKind::Lbfgs,
            Solver::ProxGrad(_) => SolverKind::ProxGrad,
            Solver::IwlsCg(_) => SolverKind::IwlsCg,
        }
    }

    /// Check the option bundle.
    pub fn validate(&self) -> Result<()> {
        match self {
            Solver::Analytical(o) => o.validate(),
            Solver::Newton(o) => o.validate(),
            Solver::NewtonCg(o) => o.validate(),
            Solver::Lbfgs(o) => o.validate(),
            Solver::ProxGrad(o) => o.validate(),
            Solver::IwlsCg(o) => o.validate(),
        }
    }

    /// Run the solver on an objective it is compatible with.
    pub(crate) fn run(&self, objective: &Objective) -> Result<SolverOutput> {
        match self {
            Solver::Analytical(o) => analytical::solve(objective, o),
            Solver::Newton(o) => newton::solve(objective, o),
            Solver::NewtonCg(o) => newton_cg::solve(objective, o),
            Solver::Lbfgs(o) => lbfgs::solve(objective, o),
            Solver::ProxGrad(o) => prox_grad::solve(objective, o),
            Solver::IwlsCg(o) => iwls_cg::solve(objective, o),
        }
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Solver::Analytical(o) if o.iterative => f.write_str("Analytical(CG)"),
            Solver::Analytical(_) => f.write_str("Analytical(Cholesky)"),
            Solver::ProxGrad(o) if o.accel => f.write_str("ProxGrad(FISTA)"),
            Solver::ProxGrad(_) => f.write_str("ProxGrad(ISTA)"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

// =============================================================================
// Solver output
// =============================================================================

/// What every solver hands back to the dispatch layer.
#[derive(Debug, Clone)]
pub struct SolverOutput {
    /// Final iterate, shape (dim × k).
    pub theta: Array2<f64>,
    /// Outer iterations performed.
    pub iterations: usize,
    /// Whether the stopping rule fired before the iteration cap.
    pub converged: bool,
    /// Full objective F(θ) after each outer iteration.
    pub history: Vec<f64>,
}

// =============================================================================
// Shared helpers
// =============================================================================

/// ‖∇f‖∞ ≤ g_tol·max(1, |f|)
pub(crate) fn gradient_converged(value: f64, gradient: &Array2<f64>, g_tol: f64) -> bool {
    norm_inf(gradient) <= g_tol * value.abs().max(1.0)
}

/// ‖θ − θ_prev‖ ≤ tol·max(‖θ‖, ε)
pub(crate) fn step_converged(theta: &Array2<f64>, previous: &Array2<f64>, tol: f64) -> bool {
    distance(theta, previous) <= tol * norm2(theta).max(f64::EPSILON)
}

pub(crate) fn check_positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(crate::error::RustyGlmError::InvalidHyperparameter(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}

pub(crate) fn check_count(name: &str, value: usize) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(crate::error::RustyGlmError::InvalidHyperparameter(format!(
            "{} must be at least 1",
            name
        )))
    }
}
