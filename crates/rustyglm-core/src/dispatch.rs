// =============================================================================
// Solver Dispatch
// =============================================================================
//
// Maps an objective specification (and an optional explicit solver) to a
// solver run. Everything that can be rejected without iterating is rejected
// here, in this order:
//
//   1. shapes of X and y                    → DimensionMismatch
//   2. penalty / loss parameters, n > p     → InvalidHyperparameter
//   3. response coding                      → InvalidResponse
//   4. solver options                       → InvalidHyperparameter
//   5. solver vs. loss/penalty structure    → IncompatibleSolver
//
// An incompatible explicit solver is an error; it is never swapped for a
// compatible one.
//
// COMPATIBILITY
// -------------
//   Analytical   squared loss, {none, L2}
//   Newton(CG)   twice-differentiable loss (not Quantile, not Talwar), {none, L2}
//   LBFGS        any loss, {none, L2}
//   ProxGrad     any loss, any penalty
//   IWLSCG       robust loss, {none, L2}
//
// DEFAULTS
// --------
//   squared      + {none, L2}   → Analytical (Cholesky)
//   logistic     + {none, L2}   → Newton-CG
//   multinomial  + {none, L2}   → Newton-CG
//   robust ρ     + {none, L2}   → LBFGS if ψ is continuous, else IWLS-CG
//   anything     + {L1, EN}     → FISTA
//
// =============================================================================

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::coefficients::Coefficients;
use crate::error::{Result, RustyGlmError};
use crate::loss::{sigmoid, softmax_rows, Loss};
use crate::objective::{Objective, ObjectiveSpec};
use crate::solvers::{Solver, SolverKind};

// =============================================================================
// Compatibility and defaults
// =============================================================================

/// Check that `solver` can minimize the objective described by `spec`.
pub fn check_compatibility(spec: &ObjectiveSpec, solver: &Solver) -> Result<()> {
    let loss = spec.loss;
    let smooth_penalty = spec.penalty.is_smooth();

    let compatible = match solver.kind() {
        SolverKind::Analytical => loss.is_quadratic() && smooth_penalty,
        SolverKind::Newton | SolverKind::NewtonCg => {
            loss.is_differentiable() && loss.has_curvature() && smooth_penalty
        }
        SolverKind::Lbfgs => smooth_penalty,
        SolverKind::ProxGrad => true,
        SolverKind::IwlsCg => loss.is_robust() && smooth_penalty,
    };

    if compatible {
        Ok(())
    } else {
        Err(RustyGlmError::IncompatibleSolver {
            solver: solver.to_string(),
            loss: loss.name().to_string(),
            penalty: spec.penalty.name().to_string(),
        })
    }
}

/// The solver used when none is given.
pub fn default_solver(spec: &ObjectiveSpec) -> Solver {
    if !spec.penalty.is_smooth() {
        return Solver::fista();
    }
    match spec.loss {
        Loss::Squared => Solver::cholesky(),
        Loss::Logistic | Loss::Multinomial => Solver::newton_cg(),
        Loss::Robust(rho) if rho.is_differentiable() => Solver::lbfgs(),
        Loss::Robust(_) => Solver::iwls_cg(),
    }
}

// =============================================================================
// Fitting
// =============================================================================

/// Outcome of a fit.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Fitted parameters (intercept last).
    pub coefficients: Coefficients,
    /// Final objective value F(θ).
    pub objective: f64,
    /// Outer iterations performed by the solver.
    pub iterations: usize,
    /// Whether the solver's stopping rule fired before its iteration cap.
    pub converged: bool,
    /// Which solver produced the fit.
    pub solver: SolverKind,
    /// Loss the model was fitted with; decides how predictions are read.
    pub loss: Loss,
    /// Objective value after each outer iteration.
    pub history: Vec<f64>,
}

impl FitResult {
    /// Linear predictor Xθ (+ intercept), shape (n × k).
    pub fn predict_linear(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.coefficients.predict_linear(x)
    }

    /// Class probabilities.
    ///
    /// Logistic: one column, P(y = +1). Multinomial: one column per class.
    /// Other losses have no probabilistic reading and return an error.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let eta = self.predict_linear(x)?;
        match self.loss {
            Loss::Logistic => Ok(eta.mapv(sigmoid)),
            Loss::Multinomial => Ok(softmax_rows(&eta)),
            other => Err(RustyGlmError::InvalidResponse(format!(
                "{} loss does not define class probabilities",
                other.name()
            ))),
        }
    }

    /// Point predictions: ±1 labels for logistic, class 1..=c for
    /// multinomial, the linear predictor otherwise.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let eta = self.predict_linear(x)?;
        let predictions = match self.loss {
            Loss::Logistic => eta.column(0).mapv(|e| if e >= 0.0 { 1.0 } else { -1.0 }),
            Loss::Multinomial => eta.map_axis(Axis(1), |row| {
                let mut best = 0;
                for (c, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = c;
                    }
                }
                (best + 1) as f64
            }),
            _ => eta.column(0).to_owned(),
        };
        Ok(predictions)
    }
}

/// Minimize the objective described by `spec` on (X, y).
///
/// With `solver = None` the default for the loss/penalty pair is used. All
/// input validation happens before the solver starts.
pub fn fit<'a>(
    spec: &ObjectiveSpec,
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    solver: Option<Solver>,
) -> Result<FitResult> {
    let objective = Objective::new(spec, x, y)?;

    let solver = match solver {
        Some(solver) => solver,
        None => {
            let chosen = default_solver(spec);
            log::info!(
                "No solver given for {} loss with {} penalty, using {}",
                spec.loss.name(),
                spec.penalty.name(),
                chosen
            );
            chosen
        }
    };
    solver.validate()?;
    check_compatibility(spec, &solver)?;

    let (n, p) = x.dim();
    log::debug!("Fitting with {} on n = {}, p = {}", solver, n, p);

    let output = solver.run(&objective)?;
    let value = objective.value(&output.theta);

    Ok(FitResult {
        coefficients: Coefficients::new(output.theta, spec.fit_intercept),
        objective: value,
        iterations: output.iterations,
        converged: output.converged,
        solver: solver.kind(),
        loss: spec.loss,
        history: output.history,
    })
}

/// The objective F as a closure over borrowed (X, y).
///
/// The closure checks the shape of θ, (dim × k), on every call.
pub fn objective<'a>(
    spec: &ObjectiveSpec,
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
) -> Result<impl Fn(ArrayView2<f64>) -> Result<f64> + 'a> {
    let objective = Objective::new(spec, x, y)?;
    Ok(move |theta: ArrayView2<f64>| {
        objective.check_shape(theta)?;
        Ok(objective.value(&theta.to_owned()))
    })
}

// =============================================================================
// Tests
// =============================================================================
