// =============================================================================
// Loss Functions
// =============================================================================
//
// A loss maps the linear predictor η = X̃θ (n × k) and the response y to a
// non-negative scalar, summed over observations:
//
//     Squared       ½ Σ (ηᵢ − yᵢ)²                         y real
//     Logistic      Σ log(1 + exp(−yᵢ ηᵢ))                 y ∈ {−1, +1}
//     Multinomial   Σ [ log Σ_c exp(ηᵢc) − ηᵢ,yᵢ ]         y ∈ {1, …, c}
//     Robust(ρ)     Σ ρ(yᵢ − ηᵢ)                           y real
//
// The objective composer only needs three pointwise quantities from a loss,
// all taken with respect to η:
//
//     value        L(η)
//     derivative   ∂L/∂η                (n × k)
//     curvature    ∂²L/∂η²              (diagonal weights, or the softmax
//                                        block diag(p) − ppᵗ per row)
//
// Chain rule through X̃ is the composer's job, not ours.
//
// =============================================================================

use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyGlmError};

/// Above this many observations the pointwise kernels run on the rayon pool.
const PARALLEL_THRESHOLD: usize = 8192;

// =============================================================================
// Scalar helpers
// =============================================================================

/// Logistic sigmoid σ(t) = 1 / (1 + e^{−t}), stable for large |t|.
#[inline]
pub fn sigmoid(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

/// log(1 + e^t) without overflow.
#[inline]
pub fn log1pexp(t: f64) -> f64 {
    if t > 0.0 {
        t + (-t).exp().ln_1p()
    } else {
        t.exp().ln_1p()
    }
}

/// Row-wise softmax of an (n × c) matrix of scores.
pub fn softmax_rows(eta: &Array2<f64>) -> Array2<f64> {
    let mut probs = eta.clone();
    let normalize = |mut row: ndarray::ArrayViewMut1<f64>| {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    };
    if eta.nrows() >= PARALLEL_THRESHOLD {
        Zip::from(probs.rows_mut()).par_for_each(normalize);
    } else {
        Zip::from(probs.rows_mut()).for_each(normalize);
    }
    probs
}

/// Apply `f(yᵢ, ηᵢ)` over observations, in parallel for large n.
fn pointwise<F>(y: ArrayView1<f64>, eta: ArrayView1<f64>, f: F) -> Array1<f64>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    if y.len() >= PARALLEL_THRESHOLD {
        Zip::from(&y).and(&eta).par_map_collect(|&yi, &ei| f(yi, ei))
    } else {
        Zip::from(&y).and(&eta).map_collect(|&yi, &ei| f(yi, ei))
    }
}

// =============================================================================
// Robust ρ functions
// =============================================================================
//
// Each ρ is applied to the residual r = y − η and exposes
//
//     ρ(r)     the loss
//     ψ(r)     ρ'(r), the influence function
//     φ(r)     ψ'(r), the curvature (where defined)
//     ω(r)     ψ(r)/r, the IRLS weight
//
// Huber, Fair and Logistic are convex; Andrews, Bisquare and Talwar are
// redescending (bounded influence) and therefore non-convex. Quantile is
// convex but has a kink at 0 and zero curvature everywhere else.
//
// =============================================================================

/// Robust ρ function with its scale / quantile parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Rho {
    /// r²/2 for |r| ≤ δ, δ(|r| − δ/2) beyond.
    Huber(f64),
    /// δ²(1 − cos(r/δ)) for |r| ≤ πδ, 2δ² beyond.
    Andrews(f64),
    /// Tukey's bisquare: δ²/6 · (1 − (1 − (r/δ)²)³) for |r| ≤ δ, δ²/6 beyond.
    Bisquare(f64),
    /// δ² log cosh(r/δ).
    Logistic(f64),
    /// δ²(|r|/δ − log(1 + |r|/δ)).
    Fair(f64),
    /// r²/2 for |r| ≤ δ, δ²/2 beyond.
    Talwar(f64),
    /// Check function r(τ − 1[r < 0]).
    Quantile(f64),
}

impl Rho {
    /// Least absolute deviation: the τ = 0.5 quantile, i.e. ½|r|.
    pub fn absolute() -> Self {
        Rho::Quantile(0.5)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rho::Huber(_) => "Huber",
            Rho::Andrews(_) => "Andrews",
            Rho::Bisquare(_) => "Bisquare",
            Rho::Logistic(_) => "Logistic",
            Rho::Fair(_) => "Fair",
            Rho::Talwar(_) => "Talwar",
            Rho::Quantile(_) => "Quantile",
        }
    }

    /// The scale δ, or τ for the quantile loss.
    pub fn parameter(&self) -> f64 {
        match *self {
            Rho::Huber(d)
            | Rho::Andrews(d)
            | Rho::Bisquare(d)
            | Rho::Logistic(d)
            | Rho::Fair(d)
            | Rho::Talwar(d)
            | Rho::Quantile(d) => d,
        }
    }

    /// Whether ψ is continuous, so gradient-based line searches are sound.
    pub fn is_differentiable(&self) -> bool {
        !matches!(self, Rho::Talwar(_) | Rho::Quantile(_))
    }

    /// Whether φ carries usable second-order information.
    pub fn has_curvature(&self) -> bool {
        !matches!(self, Rho::Quantile(_))
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Rho::Quantile(tau) => {
                if !(tau > 0.0 && tau < 1.0) {
                    return Err(RustyGlmError::InvalidHyperparameter(format!(
                        "quantile τ must lie in (0, 1), got {}",
                        tau
                    )));
                }
            }
            _ => {
                let delta = self.parameter();
                if !(delta > 0.0 && delta.is_finite()) {
                    return Err(RustyGlmError::InvalidHyperparameter(format!(
                        "{} scale δ must be positive and finite, got {}",
                        self.name(),
                        delta
                    )));
                }
            }
        }
        Ok(())
    }

    /// ρ(r)
    pub fn value(&self, r: f64) -> f64 {
        let a = r.abs();
        match *self {
            Rho::Huber(d) => {
                if a <= d {
                    0.5 * r * r
                } else {
                    d * (a - 0.5 * d)
                }
            }
            Rho::Andrews(d) => {
                if a <= std::f64::consts::PI * d {
                    d * d * (1.0 - (r / d).cos())
                } else {
                    2.0 * d * d
                }
            }
            Rho::Bisquare(d) => {
                let c = d * d / 6.0;
                if a <= d {
                    let u = 1.0 - (r / d).powi(2);
                    c * (1.0 - u * u * u)
                } else {
                    c
                }
            }
            Rho::Logistic(d) => {
                // log cosh(t) = |t| + log1p(e^{−2|t|}) − log 2
                let t = a / d;
                d * d * (t + (-2.0 * t).exp().ln_1p() - std::f64::consts::LN_2)
            }
            Rho::Fair(d) => d * d * (a / d - (a / d).ln_1p()),
            Rho::Talwar(d) => {
                if a <= d {
                    0.5 * r * r
                } else {
                    0.5 * d * d
                }
            }
            Rho::Quantile(tau) => {
                if r < 0.0 {
                    r * (tau - 1.0)
                } else {
                    r * tau
                }
            }
        }
    }

    /// ψ(r) = ρ'(r); a subgradient at kinks.
    pub fn psi(&self, r: f64) -> f64 {
        let a = r.abs();
        match *self {
            Rho::Huber(d) => r.clamp(-d, d),
            Rho::Andrews(d) => {
                if a <= std::f64::consts::PI * d {
                    d * (r / d).sin()
                } else {
                    0.0
                }
            }
            Rho::Bisquare(d) => {
                if a <= d {
                    let u = 1.0 - (r / d).powi(2);
                    r * u * u
                } else {
                    0.0
                }
            }
            Rho::Logistic(d) => d * (r / d).tanh(),
            Rho::Fair(d) => r / (1.0 + a / d),
            Rho::Talwar(d) => {
                if a <= d {
                    r
                } else {
                    0.0
                }
            }
            Rho::Quantile(tau) => {
                if r < 0.0 {
                    tau - 1.0
                } else {
                    tau
                }
            }
        }
    }

    /// φ(r) = ψ'(r), taken as 0 at points where ψ jumps.
    pub fn phi(&self, r: f64) -> f64 {
        let a = r.abs();
        match *self {
            Rho::Huber(d) => {
                if a <= d {
                    1.0
                } else {
                    0.0
                }
            }
            Rho::Andrews(d) => {
                if a <= std::f64::consts::PI * d {
                    (r / d).cos()
                } else {
                    0.0
                }
            }
            Rho::Bisquare(d) => {
                if a <= d {
                    let u2 = (r / d).powi(2);
                    (1.0 - u2) * (1.0 - 5.0 * u2)
                } else {
                    0.0
                }
            }
            Rho::Logistic(d) => {
                let c = (r / d).cosh();
                1.0 / (c * c)
            }
            Rho::Fair(d) => {
                let s = 1.0 + a / d;
                1.0 / (s * s)
            }
            Rho::Talwar(d) => {
                if a <= d {
                    1.0
                } else {
                    0.0
                }
            }
            Rho::Quantile(_) => 0.0,
        }
    }

    /// IRLS weight ω(r) = ψ(r)/r.
    ///
    /// Residuals with |r| < `threshold` are evaluated at ±threshold, which
    /// keeps ω finite for the losses whose weight blows up at 0 (Quantile)
    /// and avoids 0/0 for the others.
    pub fn weight(&self, r: f64, threshold: f64) -> f64 {
        let guarded = if r.abs() < threshold {
            if r < 0.0 {
                -threshold
            } else {
                threshold
            }
        } else {
            r
        };
        self.psi(guarded) / guarded
    }
}

// =============================================================================
// Loss descriptor
// =============================================================================

/// The loss half of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Loss {
    /// ½‖X̃θ − y‖²
    Squared,
    /// Binary logistic loss, y ∈ {−1, +1}.
    Logistic,
    /// Softmax cross-entropy, y ∈ {1, …, c}.
    Multinomial,
    /// Σ ρ(y − X̃θ)
    Robust(Rho),
}

/// Second-order information of a loss at a given η.
///
/// Kept per observation so Hessian-vector products never form the Hessian.
#[derive(Debug, Clone)]
pub(crate) enum Curvature {
    /// ∂²L/∂ηᵢ² for single-output losses, length n.
    Diagonal(Array1<f64>),
    /// Softmax probabilities (n × c); the block for row i is diag(pᵢ) − pᵢpᵢᵗ.
    Softmax(Array2<f64>),
}

impl Curvature {
    /// Apply the per-observation curvature to an (n × k) matrix u.
    pub(crate) fn apply(&self, u: &Array2<f64>) -> Array2<f64> {
        match self {
            Curvature::Diagonal(w) => u * &w.view().insert_axis(Axis(1)),
            Curvature::Softmax(probs) => {
                // (diag(p) − ppᵗ)u = p ⊙ u − p (pᵗu), row by row
                let pu = probs * u;
                let row_dot = pu.sum_axis(Axis(1));
                &pu - &(probs * &row_dot.insert_axis(Axis(1)))
            }
        }
    }
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::Squared => "squared",
            Loss::Logistic => "logistic",
            Loss::Multinomial => "multinomial",
            Loss::Robust(rho) => rho.name(),
        }
    }

    /// Squared loss: the objective is exactly quadratic in θ.
    pub fn is_quadratic(&self) -> bool {
        matches!(self, Loss::Squared)
    }

    pub fn is_robust(&self) -> bool {
        matches!(self, Loss::Robust(_))
    }

    pub fn is_differentiable(&self) -> bool {
        match self {
            Loss::Robust(rho) => rho.is_differentiable(),
            _ => true,
        }
    }

    pub fn has_curvature(&self) -> bool {
        match self {
            Loss::Robust(rho) => rho.has_curvature(),
            _ => true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Loss::Robust(rho) => rho.validate(),
            _ => Ok(()),
        }
    }

    /// Validate the response coding and return the number of outputs k
    /// (1, or the number of classes c for the multinomial loss).
    pub fn n_outputs(&self, y: ArrayView1<f64>) -> Result<usize> {
        if let Some(bad) = y.iter().find(|v| !v.is_finite()) {
            return Err(RustyGlmError::InvalidResponse(format!(
                "response contains a non-finite value ({})",
                bad
            )));
        }
        match self {
            Loss::Squared | Loss::Robust(_) => Ok(1),
            Loss::Logistic => {
                if let Some(bad) = y.iter().find(|&&v| v != 1.0 && v != -1.0) {
                    return Err(RustyGlmError::InvalidResponse(format!(
                        "logistic loss expects labels in {{-1, +1}}, found {}",
                        bad
                    )));
                }
                Ok(1)
            }
            Loss::Multinomial => {
                if let Some(bad) = y.iter().find(|&&v| v < 1.0 || v.fract() != 0.0) {
                    return Err(RustyGlmError::InvalidResponse(format!(
                        "multinomial loss expects integer classes 1..=c, found {}",
                        bad
                    )));
                }
                // Every class needs at least one observation, so c ≤ n.
                let largest = y.iter().fold(0.0_f64, |m, &v| m.max(v));
                if largest > y.len() as f64 {
                    return Err(RustyGlmError::InvalidResponse(format!(
                        "multinomial class {} exceeds the number of observations ({})",
                        largest,
                        y.len()
                    )));
                }
                let n_classes = largest as usize;
                if n_classes < 2 {
                    return Err(RustyGlmError::InvalidResponse(
                        "multinomial loss needs at least 2 classes".to_string(),
                    ));
                }
                Ok(n_classes)
            }
        }
    }

    /// L(η) summed over observations.
    pub(crate) fn value(&self, y: ArrayView1<f64>, eta: &Array2<f64>) -> f64 {
        match self {
            Loss::Squared => pointwise(y, eta.column(0), |yi, ei| 0.5 * (ei - yi).powi(2)).sum(),
            Loss::Logistic => pointwise(y, eta.column(0), |yi, ei| log1pexp(-yi * ei)).sum(),
            Loss::Robust(rho) => {
                let rho = *rho;
                pointwise(y, eta.column(0), move |yi, ei| rho.value(yi - ei)).sum()
            }
            Loss::Multinomial => eta
                .rows()
                .into_iter()
                .zip(y.iter())
                .map(|(row, &yi)| {
                    let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
                    let lse = max + row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();
                    lse - row[yi as usize - 1]
                })
                .sum(),
        }
    }

    /// ∂L/∂η, shape (n × k).
    pub(crate) fn derivative(&self, y: ArrayView1<f64>, eta: &Array2<f64>) -> Array2<f64> {
        let column = |d: Array1<f64>| d.insert_axis(Axis(1));
        match self {
            Loss::Squared => column(pointwise(y, eta.column(0), |yi, ei| ei - yi)),
            Loss::Logistic => column(pointwise(y, eta.column(0), |yi, ei| -yi * sigmoid(-yi * ei))),
            Loss::Robust(rho) => {
                let rho = *rho;
                column(pointwise(y, eta.column(0), move |yi, ei| -rho.psi(yi - ei)))
            }
            Loss::Multinomial => {
                // softmax(η) − onehot(y)
                let mut d = softmax_rows(eta);
                for (i, &yi) in y.iter().enumerate() {
                    d[[i, yi as usize - 1]] -= 1.0;
                }
                d
            }
        }
    }

    /// ∂²L/∂η² in the compact per-observation form.
    pub(crate) fn curvature(&self, y: ArrayView1<f64>, eta: &Array2<f64>) -> Curvature {
        match self {
            Loss::Squared => Curvature::Diagonal(Array1::ones(y.len())),
            Loss::Logistic => Curvature::Diagonal(pointwise(y, eta.column(0), |yi, ei| {
                let s = sigmoid(yi * ei);
                s * (1.0 - s)
            })),
            Loss::Robust(rho) => {
                let rho = *rho;
                Curvature::Diagonal(pointwise(y, eta.column(0), move |yi, ei| rho.phi(yi - ei)))
            }
            Loss::Multinomial => Curvature::Softmax(softmax_rows(eta)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    const ALL_RHOS: [Rho; 7] = [
        Rho::Huber(1.3),
        Rho::Andrews(1.1),
        Rho::Bisquare(2.0),
        Rho::Logistic(0.7),
        Rho::Fair(1.5),
        Rho::Talwar(1.2),
        Rho::Quantile(0.3),
    ];

    #[test]
    fn test_sigmoid_and_log1pexp_are_stable() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5, epsilon = 1e-15);
        assert_eq!(sigmoid(-800.0), 0.0);
        assert_eq!(sigmoid(800.0), 1.0);
        assert_abs_diff_eq!(log1pexp(800.0), 800.0, epsilon = 1e-12);
        assert_abs_diff_eq!(log1pexp(0.0), std::f64::consts::LN_2, epsilon = 1e-15);
        assert!(log1pexp(-800.0) >= 0.0);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let eta = array![[1.0, 2.0, 3.0], [1000.0, 0.0, -1000.0]];
        let p = softmax_rows(&eta);
        for row in p.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(p[[1, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_psi_is_derivative_of_rho() {
        let h = 1e-6;
        for rho in ALL_RHOS {
            for &r in &[-2.7, -0.4, 0.25, 0.9, 3.1] {
                let numeric = (rho.value(r + h) - rho.value(r - h)) / (2.0 * h);
                assert_abs_diff_eq!(rho.psi(r), numeric, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_phi_is_derivative_of_psi() {
        let h = 1e-6;
        for rho in ALL_RHOS.iter().filter(|r| r.has_curvature()) {
            for &r in &[-2.7, -0.4, 0.25, 0.9, 3.1] {
                let numeric = (rho.psi(r + h) - rho.psi(r - h)) / (2.0 * h);
                assert_abs_diff_eq!(rho.phi(r), numeric, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_huber_weight() {
        let rho = Rho::Huber(1.0);
        assert_abs_diff_eq!(rho.weight(0.5, 1e-6), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rho.weight(-4.0, 1e-6), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(rho.weight(0.0, 1e-6), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quantile_weight_is_guarded() {
        let rho = Rho::Quantile(0.25);
        assert_abs_diff_eq!(rho.weight(0.0, 1e-4), 0.25 / 1e-4, epsilon = 1e-6);
        assert_abs_diff_eq!(rho.weight(-2.0, 1e-4), 0.75 / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_absolute_is_half_l1() {
        let rho = Rho::absolute();
        for &r in &[-3.0, -0.5, 0.0, 2.0] {
            assert_abs_diff_eq!(rho.value(r), 0.5 * f64::abs(r), epsilon = 1e-15);
        }
    }

    #[test]
    fn test_redescending_rhos_are_bounded() {
        assert_abs_diff_eq!(Rho::Andrews(1.0).value(100.0), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(Rho::Bisquare(3.0).value(-50.0), 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(Rho::Talwar(2.0).value(9.0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rho_validation() {
        assert!(Rho::Huber(1.0).validate().is_ok());
        assert!(Rho::Huber(-1.0).validate().is_err());
        assert!(Rho::Fair(0.0).validate().is_err());
        assert!(Rho::Quantile(0.5).validate().is_ok());
        assert!(Rho::Quantile(1.0).validate().is_err());
        assert!(Rho::Quantile(0.0).validate().is_err());
    }

    #[test]
    fn test_response_validation() {
        let y = array![1.0, -1.0, 1.0];
        assert_eq!(Loss::Logistic.n_outputs(y.view()).unwrap(), 1);
        assert!(Loss::Logistic.n_outputs(array![1.0, 0.0].view()).is_err());

        let y = array![1.0, 3.0, 2.0, 3.0];
        assert_eq!(Loss::Multinomial.n_outputs(y.view()).unwrap(), 3);
        assert!(Loss::Multinomial.n_outputs(array![1.0, 1.5].view()).is_err());
        assert!(Loss::Multinomial.n_outputs(array![1.0, 1.0].view()).is_err());
        assert!(Loss::Squared.n_outputs(array![1.0, f64::NAN].view()).is_err());
    }

    #[test]
    fn test_multinomial_class_count_is_bounded() {
        let err = Loss::Multinomial
            .n_outputs(array![1.0, 2.0, 1.0, 1e18].view())
            .unwrap_err();
        assert!(matches!(err, RustyGlmError::InvalidResponse(_)));
        assert!(Loss::Multinomial.n_outputs(array![1.0, 5.0, 2.0].view()).is_err());
        assert_eq!(Loss::Multinomial.n_outputs(array![1.0, 3.0, 2.0].view()).unwrap(), 3);
    }

    #[test]
    fn test_derivative_matches_finite_differences() {
        let y = array![1.0, -1.0, 1.0];
        let eta = array![[0.3], [1.2], [-2.0]];
        let h = 1e-6;
        for loss in [Loss::Squared, Loss::Logistic, Loss::Robust(Rho::Huber(0.5))] {
            let d = loss.derivative(y.view(), &eta);
            for i in 0..3 {
                let mut up = eta.clone();
                let mut down = eta.clone();
                up[[i, 0]] += h;
                down[[i, 0]] -= h;
                let numeric = (loss.value(y.view(), &up) - loss.value(y.view(), &down)) / (2.0 * h);
                assert_abs_diff_eq!(d[[i, 0]], numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_multinomial_derivative_matches_finite_differences() {
        let y = array![1.0, 3.0, 2.0];
        let eta = array![[0.2, -0.1, 0.4], [1.0, 0.5, -0.5], [0.0, 2.0, 1.0]];
        let d = Loss::Multinomial.derivative(y.view(), &eta);
        let h = 1e-6;
        for i in 0..3 {
            for c in 0..3 {
                let mut up = eta.clone();
                let mut down = eta.clone();
                up[[i, c]] += h;
                down[[i, c]] -= h;
                let numeric = (Loss::Multinomial.value(y.view(), &up)
                    - Loss::Multinomial.value(y.view(), &down))
                    / (2.0 * h);
                assert_abs_diff_eq!(d[[i, c]], numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_softmax_curvature_annihilates_constant_shift() {
        // Adding the same constant to every class leaves softmax unchanged,
        // so (diag(p) − ppᵗ)1 = 0.
        let probs = softmax_rows(&array![[0.2, -0.1, 0.4], [1.0, 0.5, -0.5]]);
        let curvature = Curvature::Softmax(probs);
        let out = curvature.apply(&Array2::ones((2, 3)));
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }
}
