// =============================================================================
// IWLS-CG: Iteratively Reweighted Least Squares with a CG inner solve
// =============================================================================
//
// Robust regression as a sequence of weighted least-squares problems.
//
// THE BIG PICTURE
// ---------------
// Setting the gradient of s·Σρ(yᵢ − x̃ᵢθ) + ½λ‖Dθ‖² to zero and writing
// ψ(r) = ω(r)·r gives
//
//     (s·X̃ᵗWX̃ + λD) θ = s·X̃ᵗWy,      W = diag(ω(rᵢ))
//
// which would be linear if W did not depend on θ. So we freeze W at the
// current residuals, solve, recompute W, and repeat:
//
//     Start with θ⁰ = 0
//     Repeat:
//         1. Residuals r = y − X̃θ
//         2. Weights ωᵢ = ψ(rᵢ)/rᵢ
//         3. Solve the weighted normal equations by CG, warm-started at θ
//         4. Damp: θ ← θ + d·(θ_solve − θ)
//         5. Stop on relative change of θ
//
// Observations with large residuals get small weights (Huber: δ/|r|), which
// is exactly how the fit becomes insensitive to outliers.
//
// WEIGHT GUARD
// ------------
// ω blows up near r = 0 for the quantile loss (|τ − 1[r<0]| / |r|).
// Residuals smaller than `threshold` are evaluated at ±threshold.
//
// INNER SOLVE
// -----------
// X̃ᵗWX̃ is never formed; CG only needs v ↦ s·X̃ᵗ(W ⊙ X̃v) + λDv, two passes
// over X per inner iteration.
//
// =============================================================================

use ndarray::{s, Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyGlmError};
use crate::linalg::{conjugate_gradient, distance, norm2};
use crate::loss::{Loss, Rho};
use crate::objective::Objective;

use super::{check_count, check_positive, step_converged, SolverOutput};

// =============================================================================
// Configuration
// =============================================================================

/// Options for the IWLS-CG solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IwlsCgOptions {
    /// Maximum number of reweighting steps.
    /// Default: 100
    pub max_iter: usize,
    /// Cap on CG iterations per weighted solve.
    /// Default: 200
    pub max_inner: usize,
    /// Relative parameter-change tolerance.
    /// Default: 1e-4
    pub tol: f64,
    /// Blend between the previous iterate (0) and the new solve (1).
    /// Default: 1.0 (full replacement)
    pub damping: f64,
    /// Residuals below this magnitude are clamped before computing ω.
    /// Default: 1e-6
    pub threshold: f64,
}

impl Default for IwlsCgOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            max_inner: 200,
            tol: 1e-4,
            damping: 1.0,
            threshold: 1e-6,
        }
    }
}

impl IwlsCgOptions {
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
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

    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_count("max_iter", self.max_iter)?;
        check_count("max_inner", self.max_inner)?;
        check_positive("tol", self.tol)?;
        check_positive("threshold", self.threshold)?;
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(RustyGlmError::InvalidHyperparameter(format!(
                "damping must lie in (0, 1], got {}",
                self.damping
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Main loop
// =============================================================================

/// Fit a robust-loss objective by iteratively reweighted least squares.
pub(crate) fn solve(objective: &Objective, options: &IwlsCgOptions) -> Result<SolverOutput> {
    let rho = match objective.loss() {
        Loss::Robust(rho) => rho,
        other => {
            return Err(RustyGlmError::IncompatibleSolver {
                solver: "IWLSCG".to_string(),
                loss: other.name().to_string(),
                penalty: objective.penalty().name().to_string(),
            })
        }
    };

    let design = objective.design();
    let y = objective.y();
    let scale = objective.loss_scale();
    let l2 = objective.penalty().l2_strength();
    let penalized_rows = objective.penalized_rows();
    let y_column = y.to_owned().insert_axis(Axis(1));

    let mut theta = objective.zeros();
    let mut history = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    while !converged && iterations < options.max_iter {
        iterations += 1;

        // ---------------------------------------------------------------------
        // Step 1-2: residuals and weights at the current iterate
        // ---------------------------------------------------------------------
        let eta = design.apply(&theta);
        let weights = robust_weights(rho, y, &eta, options.threshold);

        // ---------------------------------------------------------------------
        // Step 3: (s·X̃ᵗWX̃ + λD) θ = s·X̃ᵗWy by CG from the current θ
        // ---------------------------------------------------------------------
        let weighted_y = &y_column * &weights.view().insert_axis(Axis(1));
        let mut rhs = design.apply_transpose(&weighted_y);
        rhs.mapv_inplace(|v| v * scale);

        let apply = |v: &Array2<f64>| -> Array2<f64> {
            let mut u = design.apply(v);
            u *= &weights.view().insert_axis(Axis(1));
            let mut out = design.apply_transpose(&u);
            out.mapv_inplace(|x| x * scale);
            if l2 > 0.0 {
                out.slice_mut(s![..penalized_rows, ..])
                    .scaled_add(l2, &v.slice(s![..penalized_rows, ..]));
            }
            out
        };
        let outcome = conjugate_gradient(apply, &rhs, Some(theta.clone()), options.max_inner, 1e-10);
        if outcome.negative_curvature {
            return Err(RustyGlmError::numerical(
                format!(
                    "weighted normal equations are singular at iteration {} (all weights vanish on some direction)",
                    iterations
                ),
                Some(theta),
            ));
        }
        if !outcome.converged {
            log::debug!(
                "IWLS iteration {}: inner CG stopped at max_inner = {}",
                iterations,
                options.max_inner
            );
        }

        // ---------------------------------------------------------------------
        // Step 4: damping
        // ---------------------------------------------------------------------
        let mut next = theta.clone();
        next.scaled_add(options.damping, &(&outcome.solution - &theta));

        // ---------------------------------------------------------------------
        // Step 5: convergence on relative change
        // ---------------------------------------------------------------------
        converged = step_converged(&next, &theta, options.tol);
        let change = distance(&next, &theta) / norm2(&next).max(f64::EPSILON);
        theta = next;

        let value = objective.value(&theta);
        history.push(value);
        log::debug!(
            "IWLS iteration {}: objective = {:.6e}, inner = {}, rel_change = {:.2e}",
            iterations,
            value,
            outcome.iterations,
            change
        );
    }

    if converged {
        log::info!("IWLS-CG converged after {} iterations", iterations);
    } else {
        log::warn!("IWLS-CG hit max_iter = {} before convergence", options.max_iter);
    }

    Ok(SolverOutput {
        theta,
        iterations,
        converged,
        history,
    })
}

/// ωᵢ = ψ(rᵢ)/rᵢ with rᵢ = yᵢ − ηᵢ.
fn robust_weights(
    rho: Rho,
    y: ndarray::ArrayView1<f64>,
    eta: &Array2<f64>,
    threshold: f64,
) -> Array1<f64> {
    Zip::from(y)
        .and(eta.column(0))
        .map_collect(|&yi, &ei| rho.weight(yi - ei, threshold))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::ObjectiveSpec;
    use crate::penalty::Penalty;
    use crate::solvers::analytical::{self, AnalyticalOptions};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_huber_with_large_delta_is_ridge() {
        let x = array![[1.0, 0.2], [2.0, -0.3], [3.0, 0.8], [4.0, 0.1], [5.0, -0.5], [6.0, 0.4]];
        let y = array![1.2, 1.9, 3.4, 3.9, 4.6, 6.3];
        let huber = ObjectiveSpec::new(Loss::Robust(Rho::Huber(1e6)), Penalty::L2(0.5));
        let ridge = ObjectiveSpec::new(Loss::Squared, Penalty::L2(0.5));
        let huber = Objective::new(&huber, x.view(), y.view()).unwrap();
        let ridge = Objective::new(&ridge, x.view(), y.view()).unwrap();

        let out = solve(&huber, &IwlsCgOptions::default().tol(1e-8)).unwrap();
        let exact = analytical::solve(&ridge, &AnalyticalOptions::default()).unwrap();
        assert!(out.converged);
        for (a, b) in out.theta.iter().zip(exact.theta.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_lad_finds_the_median() {
        // One all-ones column and no intercept: the LAD fit is the median.
        let x = Array2::ones((7, 1));
        let y = array![0.3, 5.0, 1.1, 2.0, -4.0, 1.7, 40.0];
        let spec = ObjectiveSpec::new(Loss::Robust(Rho::absolute()), Penalty::None).fit_intercept(false);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let out = solve(&obj, &IwlsCgOptions::default().tol(1e-10).max_iter(500)).unwrap();
        assert_abs_diff_eq!(out.theta[[0, 0]], 1.7, epsilon = 1e-3);
    }

    #[test]
    fn test_huber_downweights_outlier() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![0.0, 1.0, 2.1, 2.9, 4.0, 5.1, 60.0];
        let spec = ObjectiveSpec::new(Loss::Robust(Rho::Huber(1.0)), Penalty::None);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let out = solve(&obj, &IwlsCgOptions::default().tol(1e-8)).unwrap();
        assert!(out.converged);
        // Least squares would put the slope near 7; Huber stays close to 1.
        assert!((out.theta[[0, 0]] - 1.0).abs() < 0.5);
    }

    #[test]
    fn test_damping_slows_but_converges() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        let y = array![0.2, 0.9, 2.2, 2.8, 4.1];
        let spec = ObjectiveSpec::new(Loss::Robust(Rho::Fair(1.0)), Penalty::L2(0.1));
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();

        let full = solve(&obj, &IwlsCgOptions::default().tol(1e-8)).unwrap();
        let damped = solve(&obj, &IwlsCgOptions::default().tol(1e-8).damping(0.5)).unwrap();
        assert!(full.converged && damped.converged);
        assert!(damped.iterations > full.iterations);
        for (a, b) in full.theta.iter().zip(damped.theta.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_options_validation() {
        assert!(IwlsCgOptions::default().validate().is_ok());
        assert!(IwlsCgOptions::default().damping(0.0).validate().is_err());
        assert!(IwlsCgOptions::default().damping(1.5).validate().is_err());
        assert!(IwlsCgOptions::default().threshold(0.0).validate().is_err());
    }
}
