// =============================================================================
// Objective as an argmin Problem
// =============================================================================
//
// Newton, Newton-CG and L-BFGS hand their line searches (and L-BFGS its
// whole outer loop) to argmin. argmin works on flat parameter vectors, so θ
// (dim × k) is flattened row-major, the same order `Array2::iter` visits it,
// and reshaped on every evaluation.
//
// LINE SEARCH (Hager–Zhang)
// -------------------------
// Along a descent direction d from θ,
//
//     φ(α) = f(θ + α d),      φ'(α) = ∇f(θ + α d) · d
//
// a step is accepted when it satisfies either
//
//   Wolfe:              φ(α) ≤ φ(0) + δ α φ'(0)   and   φ'(α) ≥ σ φ'(0)
//   approximate Wolfe:  φ(α) ≤ φ(0) + ε |φ(0)|    and
//                       (2δ − 1) φ'(0) ≥ φ'(α) ≥ σ φ'(0)
//
// The approximate condition keeps the search working near the optimum,
// where differences in f are lost to rounding. The search starts from the
// bracket [ε_machine, max_step] with a first trial step (1 for Newton).
//
// =============================================================================

use std::sync::{Arc, Mutex, PoisonError};

use argmin::core::observers::Observe;
use argmin::core::{CostFunction, Error, Executor, Gradient, IterState, LineSearch, State, KV};
use argmin::solver::linesearch::HagerZhangLineSearch;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyGlmError};
use crate::linalg::inner;
use crate::objective::Objective;

/// Flat parameter vector handed to argmin.
pub(crate) type Param = Vec<f64>;

pub(crate) type HagerZhang = HagerZhangLineSearch<Param, Param, f64>;

/// argmin state for first-order solvers over `Param`.
pub(crate) type FirstOrderState = IterState<Param, Param, (), (), (), f64>;

/// Options for the Hager–Zhang line search used by the smooth solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchOptions {
    /// Sufficient-decrease constant δ. Default: 0.1
    pub delta: f64,
    /// Curvature constant σ. Default: 0.9
    pub sigma: f64,
    /// Relative tolerance ε of the approximate Wolfe decrease. Default: 1e-6
    pub epsilon: f64,
    /// Upper end of the initial bracket. Default: 1e5
    pub max_step: f64,
    /// Cap on search iterations for each Newton and Newton-CG step.
    /// L-BFGS runs its search until a Wolfe condition holds.
    /// Default: 50
    pub max_iter: usize,
}

impl Default for LineSearchOptions {
    fn default() -> Self {
        Self {
            delta: 0.1,
            sigma: 0.9,
            epsilon: 1e-6,
            max_step: 1e5,
            max_iter: 50,
        }
    }
}

impl LineSearchOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.delta > 0.0 && self.delta < 0.5 && self.delta < self.sigma && self.sigma < 1.0) {
            return Err(RustyGlmError::InvalidHyperparameter(format!(
                "line search needs 0 < δ < min(σ, ½) and σ < 1, got δ = {} and σ = {}",
                self.delta, self.sigma
            )));
        }
        if !(self.epsilon >= 0.0) || !(self.max_step > 1.0 && self.max_step.is_finite()) || self.max_iter == 0 {
            return Err(RustyGlmError::InvalidHyperparameter(
                "line search needs ε ≥ 0, a finite max_step > 1 and at least one iteration".to_string(),
            ));
        }
        Ok(())
    }

    /// A configured argmin Hager–Zhang search.
    pub(crate) fn hager_zhang(&self) -> Result<HagerZhang> {
        Ok(HagerZhangLineSearch::new()
            .with_delta_sigma(self.delta, self.sigma)?
            .with_epsilon(self.epsilon)?
            .with_bounds(f64::EPSILON, self.max_step)?)
    }
}

// =============================================================================
// Problem
// =============================================================================

/// Borrowed objective evaluated on flat parameter vectors.
pub(crate) struct ObjectiveProblem<'o, 'a> {
    objective: &'o Objective<'a>,
    shape: (usize, usize),
}

impl<'o, 'a> ObjectiveProblem<'o, 'a> {
    pub fn new(objective: &'o Objective<'a>) -> Self {
        Self {
            objective,
            shape: objective.shape(),
        }
    }

    pub fn flatten(theta: &Array2<f64>) -> Param {
        theta.iter().copied().collect()
    }

    pub fn reshape(&self, param: &[f64]) -> Result<Array2<f64>> {
        Ok(Array2::from_shape_vec(self.shape, param.to_vec())?)
    }
}

impl CostFunction for ObjectiveProblem<'_, '_> {
    type Param = Param;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let theta = Array2::from_shape_vec(self.shape, param.clone())?;
        Ok(self.objective.value(&theta))
    }
}

impl Gradient for ObjectiveProblem<'_, '_> {
    type Param = Param;
    type Gradient = Param;

    fn gradient(&self, param: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
        let theta = Array2::from_shape_vec(self.shape, param.clone())?;
        Ok(Self::flatten(&self.objective.gradient(&theta)))
    }
}

// =============================================================================
// Line search
// =============================================================================

/// Accepted point along the direction.
#[derive(Debug, Clone)]
pub(crate) struct LineSearchOutcome {
    pub theta: Array2<f64>,
    pub step: f64,
    pub value: f64,
    pub gradient: Array2<f64>,
}

/// Search along `direction` from `theta`, where `value`/`gradient` are f and
/// ∇f at `theta`.
///
/// Fails with `NumericalFailure` (carrying `theta`) when `direction` is not a
/// descent direction or when the search ends above φ(0) + ε|φ(0)|.
pub(crate) fn search(
    objective: &Objective,
    theta: &Array2<f64>,
    direction: &Array2<f64>,
    value: f64,
    gradient: &Array2<f64>,
    initial_step: f64,
    options: &LineSearchOptions,
) -> Result<LineSearchOutcome> {
    let slope = inner(gradient, direction);
    if !(slope < 0.0) {
        return Err(RustyGlmError::numerical(
            format!("direction is not a descent direction (φ'(0) = {:.3e})", slope),
            Some(theta.clone()),
        ));
    }

    let mut line_search = options.hager_zhang()?;
    line_search.search_direction(ObjectiveProblem::flatten(direction));
    line_search.initial_step_length(initial_step)?;

    let problem = ObjectiveProblem::new(objective);
    let result = Executor::new(problem, line_search)
        .configure(|state| {
            state
                .param(ObjectiveProblem::flatten(theta))
                .gradient(ObjectiveProblem::flatten(gradient))
                .cost(value)
                .max_iters(options.max_iter as u64)
        })
        .run()
        .map_err(|err| {
            RustyGlmError::numerical(format!("Hager-Zhang line search failed: {}", err), Some(theta.clone()))
        })?;

    let state = result.state();
    let best_value = state.get_best_cost();
    let accepted = match state.get_best_param() {
        Some(best) if best_value <= value + options.epsilon * value.abs() => best,
        _ => {
            return Err(RustyGlmError::numerical(
                format!(
                    "no decrease found after {} line search iterations (best objective {:.6e})",
                    state.get_iter(),
                    best_value
                ),
                Some(theta.clone()),
            ))
        }
    };

    let next = Array2::from_shape_vec(theta.raw_dim(), accepted.clone())?;
    let moved = &next - theta;
    let step = inner(&moved, direction) / inner(direction, direction);
    let (value, gradient) = objective.value_and_gradient(&next);
    Ok(LineSearchOutcome {
        theta: next,
        step,
        value,
        gradient,
    })
}

// =============================================================================
// Iteration trace
// =============================================================================

#[derive(Debug, Default)]
struct TraceRecord {
    history: Vec<f64>,
    last: Option<Param>,
}

/// argmin observer keeping F after each accepted iteration and the latest
/// iterate. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub(crate) struct Trace {
    label: &'static str,
    record: Arc<Mutex<TraceRecord>>,
}

impl Trace {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            record: Arc::default(),
        }
    }

    /// Objective history and last accepted iterate.
    pub fn finish(&self) -> (Vec<f64>, Option<Param>) {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        (std::mem::take(&mut record.history), record.last.take())
    }
}

impl Observe<FirstOrderState> for Trace {
    fn observe_iter(&mut self, state: &FirstOrderState, _kv: &KV) -> std::result::Result<(), Error> {
        // A failed inner search leaves the state without a parameter vector.
        let Some(param) = state.get_param() else {
            return Ok(());
        };
        let value = state.get_cost();
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        record.history.push(value);
        record.last = Some(param.clone());

        log::debug!(
            "{} iteration {}: objective = {:.6e}, |grad|_inf = {:.3e}",
            self.label,
            record.history.len(),
            value,
            state
                .get_gradient()
                .map_or(f64::NAN, |g| g.iter().fold(0.0_f64, |m, v| m.max(v.abs())))
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
