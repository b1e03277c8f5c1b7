// =============================================================================
// Objective Composer
// =============================================================================
//
// Binds a loss, a penalty and an intercept policy over borrowed data into the
// single function the solvers minimize:
//
//     F(θ) = s · L(y, X̃θ)  +  P_smooth(θ)  +  P_nonsmooth(θ)
//            \__________________________/
//                      f(θ), smooth
//
// where s = 1 (or 1/n when the loss is mean-normalized). Smooth solvers see
// only f through `value_and_gradient` / `hessian_operator`; proximal solvers
// additionally use `prox` for the non-smooth remainder.
//
// PARAMETER SHAPE
// ---------------
// θ is always a (dim × k) matrix: dim = p (+1 with intercept), k = 1 for
// regression / binary classification and k = c for multinomial. Each column
// is one class, the last row is the intercept. All operations share a single
// η = X̃θ pass per evaluation.
//
// =============================================================================

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::design::Design;
use crate::error::{Result, RustyGlmError};
use crate::loss::{Curvature, Loss};
use crate::penalty::Penalty;

// =============================================================================
// Objective specification
// =============================================================================

/// What to minimize: loss, penalty and intercept policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    pub loss: Loss,
    pub penalty: Penalty,
    /// Fit an intercept as the last coefficient. Default: true
    pub fit_intercept: bool,
    /// Include the intercept in the penalty. Default: false
    pub penalize_intercept: bool,
    /// Divide the loss by n. Default: false
    pub scale_loss_with_samples: bool,
}

impl ObjectiveSpec {
    pub fn new(loss: Loss, penalty: Penalty) -> Self {
        Self {
            loss,
            penalty,
            fit_intercept: true,
            penalize_intercept: false,
            scale_loss_with_samples: false,
        }
    }

    pub fn fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn penalize_intercept(mut self, penalize_intercept: bool) -> Self {
        self.penalize_intercept = penalize_intercept;
        self
    }

    pub fn scale_loss_with_samples(mut self, scale: bool) -> Self {
        self.scale_loss_with_samples = scale;
        self
    }

    /// Check λ, γ, δ, τ ranges.
    pub fn validate(&self) -> Result<()> {
        self.loss.validate()?;
        self.penalty.validate()
    }
}

// =============================================================================
// Objective
// =============================================================================

/// A loss + penalty bound to borrowed data.
#[derive(Debug, Clone)]
pub struct Objective<'a> {
    design: Design<'a>,
    y: ArrayView1<'a, f64>,
    loss: Loss,
    penalty: Penalty,
    penalized_rows: usize,
    n_outputs: usize,
    loss_scale: f64,
}

impl<'a> Objective<'a> {
    /// Bind `spec` to X (n × p) and y (length n).
    ///
    /// Fails with DimensionMismatch when the row counts disagree,
    /// InvalidHyperparameter on bad strengths or when n ≤ p, and
    /// InvalidResponse when y is not coded the way the loss expects.
    pub fn new(
        spec: &ObjectiveSpec,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
    ) -> Result<Self> {
        let (n, p) = x.dim();
        if y.len() != n {
            return Err(RustyGlmError::DimensionMismatch(format!(
                "X has {} rows but y has {} elements",
                n,
                y.len()
            )));
        }
        if p == 0 {
            return Err(RustyGlmError::DimensionMismatch(
                "X has no columns".to_string(),
            ));
        }
        if n <= p {
            return Err(RustyGlmError::InvalidHyperparameter(format!(
                "need more observations than features, got n = {} and p = {}",
                n, p
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(RustyGlmError::DimensionMismatch(
                "X contains non-finite values".to_string(),
            ));
        }

        spec.validate()?;
        let n_outputs = spec.loss.n_outputs(y)?;

        let design = Design::new(x, spec.fit_intercept);
        let penalized_rows = if spec.fit_intercept && !spec.penalize_intercept {
            p
        } else {
            design.dim()
        };
        let loss_scale = if spec.scale_loss_with_samples {
            1.0 / n as f64
        } else {
            1.0
        };

        Ok(Self {
            design,
            y,
            loss: spec.loss,
            penalty: spec.penalty,
            penalized_rows,
            n_outputs,
            loss_scale,
        })
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn penalty(&self) -> Penalty {
        self.penalty
    }

    pub fn design(&self) -> &Design<'a> {
        &self.design
    }

    pub fn y(&self) -> ArrayView1<'a, f64> {
        self.y
    }

    /// Number of leading rows of θ the penalty applies to.
    pub fn penalized_rows(&self) -> usize {
        self.penalized_rows
    }

    pub fn loss_scale(&self) -> f64 {
        self.loss_scale
    }

    /// Shape of θ: (dim, k).
    pub fn shape(&self) -> (usize, usize) {
        (self.design.dim(), self.n_outputs)
    }

    /// The all-zero starting point.
    pub fn zeros(&self) -> Array2<f64> {
        Array2::zeros(self.shape())
    }

    /// Whether the whole objective is differentiable (no L1 part).
    pub fn is_smooth(&self) -> bool {
        self.penalty.is_smooth() && self.loss.is_differentiable()
    }

    pub fn check_shape(&self, theta: ArrayView2<f64>) -> Result<()> {
        if theta.dim() != self.shape() {
            return Err(RustyGlmError::DimensionMismatch(format!(
                "θ has shape {:?} but the objective expects {:?}",
                theta.dim(),
                self.shape()
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    /// f(θ) = s·L + P_smooth
    pub fn smooth_value(&self, theta: &Array2<f64>) -> f64 {
        let eta = self.design.apply(theta);
        self.smooth_value_at(theta, &eta)
    }

    fn smooth_value_at(&self, theta: &Array2<f64>, eta: &Array2<f64>) -> f64 {
        self.loss_scale * self.loss.value(self.y, eta)
            + self.penalty.smooth_value(theta.view(), self.penalized_rows)
    }

    /// P_nonsmooth(θ)
    pub fn nonsmooth_value(&self, theta: &Array2<f64>) -> f64 {
        self.penalty.nonsmooth_value(theta.view(), self.penalized_rows)
    }

    /// Full objective F(θ).
    pub fn value(&self, theta: &Array2<f64>) -> f64 {
        self.smooth_value(theta) + self.nonsmooth_value(theta)
    }

    // -------------------------------------------------------------------------
    // First order
    // -------------------------------------------------------------------------

    /// ∇f(θ) = s·X̃ᵗ ∂L/∂η + ∇P_smooth
    pub fn gradient(&self, theta: &Array2<f64>) -> Array2<f64> {
        self.value_and_gradient(theta).1
    }

    /// (f(θ), ∇f(θ)) from one linear-predictor pass.
    pub fn value_and_gradient(&self, theta: &Array2<f64>) -> (f64, Array2<f64>) {
        let eta = self.design.apply(theta);
        let value = self.smooth_value_at(theta, &eta);

        let dloss = self.loss.derivative(self.y, &eta);
        let mut grad = self.design.apply_transpose(&dloss);
        if self.loss_scale != 1.0 {
            grad.mapv_inplace(|g| g * self.loss_scale);
        }
        self.penalty
            .add_smooth_gradient(theta, self.penalized_rows, &mut grad);

        (value, grad)
    }

    /// prox of the non-smooth part with step size `step`.
    pub fn prox(&self, theta: &Array2<f64>, step: f64) -> Array2<f64> {
        self.penalty.prox(theta, step, self.penalized_rows)
    }

    // -------------------------------------------------------------------------
    // Second order
    // -------------------------------------------------------------------------

    /// Matrix-free Hessian of f at θ.
    ///
    /// The returned operator owns only the per-observation curvature and
    /// borrows X, so it can be applied many times inside a CG solve.
    pub fn hessian_operator(&self, theta: &Array2<f64>) -> HessianOperator<'_, 'a> {
        let eta = self.design.apply(theta);
        HessianOperator {
            design: &self.design,
            curvature: self.loss.curvature(self.y, &eta),
            loss_scale: self.loss_scale,
            l2: self.penalty.l2_strength(),
            penalized_rows: self.penalized_rows,
        }
    }

    /// ∇²f(θ) v without forming the Hessian.
    pub fn hessian_vector_product(&self, theta: &Array2<f64>, v: &Array2<f64>) -> Array2<f64> {
        self.hessian_operator(theta).apply(v)
    }

    /// Dense Hessian of f at θ, indexed by the row-major flattening of θ.
    ///
    /// Size (dim·k)². Only the Newton solver asks for this.
    pub fn hessian(&self, theta: &Array2<f64>) -> Array2<f64> {
        let (dim, k) = self.shape();
        let eta = self.design.apply(theta);
        let scale = self.loss_scale;

        let mut hessian = match self.loss.curvature(self.y, &eta) {
            Curvature::Diagonal(w) => {
                let w = w.mapv(|v| v * scale);
                self.design.weighted_gram(Some(&w))
            }
            Curvature::Softmax(probs) => {
                // Block (c, d) is X̃ᵗ diag(p_c ⊙ (δ_cd − p_d)) X̃. The blocks are
                // independent, so they are assembled in parallel.
                let pairs: Vec<(usize, usize)> =
                    (0..k).flat_map(|c| (c..k).map(move |d| (c, d))).collect();
                let blocks: Vec<((usize, usize), Array2<f64>)> = pairs
                    .par_iter()
                    .map(|&(c, d)| {
                        let pc = probs.column(c);
                        let pd = probs.column(d);
                        let w: Array1<f64> = if c == d {
                            pc.mapv(|v| scale * v * (1.0 - v))
                        } else {
                            (&pc * &pd).mapv(|v| -scale * v)
                        };
                        ((c, d), self.design.weighted_gram(Some(&w)))
                    })
                    .collect();

                let mut h = Array2::zeros((dim * k, dim * k));
                for ((c, d), block) in blocks {
                    for j in 0..dim {
                        for l in 0..dim {
                            h[[j * k + c, l * k + d]] = block[[j, l]];
                            h[[l * k + d, j * k + c]] = block[[j, l]];
                        }
                    }
                }
                h
            }
        };

        let l2 = self.penalty.l2_strength();
        if l2 > 0.0 {
            for j in 0..self.penalized_rows {
                for c in 0..k {
                    hessian[[j * k + c, j * k + c]] += l2;
                }
            }
        }
        hessian
    }

    /// Dense Hessian as a nalgebra matrix, ready for factorization.
    pub(crate) fn hessian_dmatrix(&self, theta: &Array2<f64>) -> DMatrix<f64> {
        crate::linalg::to_dmatrix(&self.hessian(theta))
    }
}

// =============================================================================
// Hessian operator
// =============================================================================

/// v ↦ ∇²f(θ) v = s·X̃ᵗ C (X̃ v) + λ D v, with D masking the exempt intercept.
pub struct HessianOperator<'o, 'a> {
    design: &'o Design<'a>,
    curvature: Curvature,
    loss_scale: f64,
    l2: f64,
    penalized_rows: usize,
}

impl HessianOperator<'_, '_> {
    pub fn apply(&self, v: &Array2<f64>) -> Array2<f64> {
        let u = self.design.apply(v);
        let cu = self.curvature.apply(&u);
        let mut out = self.design.apply_transpose(&cu);
        if self.loss_scale != 1.0 {
            out.mapv_inplace(|x| x * self.loss_scale);
        }
        if self.l2 > 0.0 {
            out.slice_mut(ndarray::s![..self.penalized_rows, ..])
                .scaled_add(self.l2, &v.slice(ndarray::s![..self.penalized_rows, ..]));
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::Rho;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.5, -1.0],
            [1.5, 0.3],
            [-0.7, 2.0],
            [1.1, 1.1],
            [-1.3, -0.4],
            [0.2, 0.9]
        ];
        let y = array![1.0, -1.0, 1.0, 1.0, -1.0, -1.0];
        (x, y)
    }

    fn finite_difference_gradient(obj: &Objective, theta: &Array2<f64>) -> Array2<f64> {
        let h = 1e-6;
        let mut g = Array2::zeros(theta.raw_dim());
        for idx in 0..theta.len() {
            let (i, j) = (idx / theta.ncols(), idx % theta.ncols());
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[[i, j]] += h;
            down[[i, j]] -= h;
            g[[i, j]] = (obj.smooth_value(&up) - obj.smooth_value(&down)) / (2.0 * h);
        }
        g
    }

    #[test]
    fn test_rejects_mismatched_rows() {
        let (x, _) = data();
        let y = array![1.0, -1.0];
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::None);
        let err = Objective::new(&spec, x.view(), y.view()).unwrap_err();
        assert!(matches!(err, RustyGlmError::DimensionMismatch(_)));
    }

    #[test]
    fn test_rejects_n_not_greater_than_p() {
        let x = Array2::<f64>::ones((2, 2));
        let y = array![1.0, 2.0];
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::None);
        let err = Objective::new(&spec, x.view(), y.view()).unwrap_err();
        assert!(matches!(err, RustyGlmError::InvalidHyperparameter(_)));
    }

    #[test]
    fn test_squared_value() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 2.0, 2.0];
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::L2(2.0)).fit_intercept(false);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();
        let theta = array![[1.0]];
        // ½(0 + 0 + 1) + ½·2·1
        assert_abs_diff_eq!(obj.value(&theta), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let (x, y) = data();
        let losses = [
            Loss::Squared,
            Loss::Logistic,
            Loss::Robust(Rho::Huber(0.8)),
            Loss::Robust(Rho::Fair(1.0)),
        ];
        let theta = array![[0.3], [-0.2], [0.1]];
        for loss in losses {
            let spec = ObjectiveSpec::new(loss, Penalty::L2(0.7));
            let obj = Objective::new(&spec, x.view(), y.view()).unwrap();
            let g = obj.gradient(&theta);
            let numeric = finite_difference_gradient(&obj, &theta);
            for (a, b) in g.iter().zip(numeric.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_multinomial_gradient_and_hessian() {
        let (x, _) = data();
        let y = array![1.0, 2.0, 3.0, 3.0, 1.0, 2.0];
        let spec = ObjectiveSpec::new(Loss::Multinomial, Penalty::L2(0.5));
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();
        assert_eq!(obj.shape(), (3, 3));

        let theta = array![[0.1, -0.2, 0.3], [0.0, 0.4, -0.1], [0.2, 0.1, -0.3]];
        let g = obj.gradient(&theta);
        let numeric = finite_difference_gradient(&obj, &theta);
        for (a, b) in g.iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }

        // Dense Hessian and the matrix-free operator agree.
        let v = array![[1.0, 0.5, -0.5], [0.2, -1.0, 0.3], [0.0, 0.7, 1.0]];
        let hv = obj.hessian_vector_product(&theta, &v);
        let dense = obj.hessian(&theta);
        let flat_v = Array1::from_iter(v.iter().copied());
        let dense_hv = dense.dot(&flat_v);
        for (a, b) in hv.iter().zip(dense_hv.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_hessian_vector_product_matches_gradient_differences() {
        let (x, y) = data();
        let spec = ObjectiveSpec::new(Loss::Logistic, Penalty::L2(0.3)).scale_loss_with_samples(true);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();
        let theta = array![[0.4], [-0.3], [0.2]];
        let v = array![[1.0], [2.0], [-1.0]];

        let h = 1e-6;
        let up = obj.gradient(&(&theta + &(h * &v)));
        let down = obj.gradient(&(&theta - &(h * &v)));
        let numeric = (&up - &down) / (2.0 * h);
        let hv = obj.hessian_vector_product(&theta, &v);
        for (a, b) in hv.iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_unpenalized_intercept_in_hessian() {
        let (x, y) = data();
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::L2(10.0));
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();
        let h = obj.hessian(&obj.zeros());
        // Intercept diagonal is Σ 1 = n, untouched by λ.
        assert_abs_diff_eq!(h[[2, 2]], 6.0, epsilon = 1e-12);

        let spec = spec.penalize_intercept(true);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(obj.hessian(&obj.zeros())[[2, 2]], 16.0, epsilon = 1e-12);
    }

    #[test]
    fn test_check_shape() {
        let (x, y) = data();
        let spec = ObjectiveSpec::new(Loss::Squared, Penalty::None);
        let obj = Objective::new(&spec, x.view(), y.view()).unwrap();
        assert!(obj.check_shape(Array2::zeros((3, 1)).view()).is_ok());
        assert!(obj.check_shape(Array2::zeros((2, 1)).view()).is_err());
    }
}
