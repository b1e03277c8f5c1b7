// =============================================================================
// Penalty Functions
// =============================================================================
//
// Penalties split into a smooth and a non-smooth part:
//
//     Penalty            smooth part        non-smooth part
//     --------------     -------------      ---------------
//     None               0                  0
//     L2(λ)              λ‖θ‖²/2            0
//     L1(λ)              0                  λ‖θ‖₁
//     ElasticNet(λ, γ)   λ‖θ‖²/2            γ‖θ‖₁
//
// The smooth part is folded into the gradient/Hessian of the loss; the
// non-smooth part is only ever touched through its proximal operator,
// soft-thresholding:
//
//     prox(v, t) = sign(v) · max(|v| − t·λ₁, 0)
//
// INTERCEPT EXEMPTION
// -------------------
// The intercept is the last coefficient (last row for multiclass). When it is
// exempt, every operation below only looks at the first `penalized_rows` rows
// of θ and leaves the rest alone.
//
// =============================================================================

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RustyGlmError};

/// Soft-thresholding: the proximal operator of `threshold · |v|`.
#[inline]
pub fn soft_threshold(v: f64, threshold: f64) -> f64 {
    if v > threshold {
        v - threshold
    } else if v < -threshold {
        v + threshold
    } else {
        0.0
    }
}

/// Shape of a penalty without its strengths, used by the model constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    None,
    L2,
    L1,
    ElasticNet,
}

/// The penalty half of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Penalty {
    None,
    /// Ridge: λ‖θ‖²/2
    L2(f64),
    /// Lasso: λ‖θ‖₁
    L1(f64),
    /// λ‖θ‖²/2 + γ‖θ‖₁
    ElasticNet { lambda: f64, gamma: f64 },
}

impl Penalty {
    /// Build a penalty of the given kind.
    ///
    /// `lambda` is the L2 strength for ridge and elastic net and the L1
    /// strength for lasso; `gamma` is only read by the elastic net.
    pub fn from_kind(kind: PenaltyKind, lambda: f64, gamma: f64) -> Self {
        match kind {
            PenaltyKind::None => Penalty::None,
            PenaltyKind::L2 => Penalty::L2(lambda),
            PenaltyKind::L1 => Penalty::L1(lambda),
            PenaltyKind::ElasticNet => Penalty::ElasticNet { lambda, gamma },
        }
    }

    pub fn kind(&self) -> PenaltyKind {
        match self {
            Penalty::None => PenaltyKind::None,
            Penalty::L2(_) => PenaltyKind::L2,
            Penalty::L1(_) => PenaltyKind::L1,
            Penalty::ElasticNet { .. } => PenaltyKind::ElasticNet,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Penalty::None => "no",
            Penalty::L2(_) => "L2",
            Penalty::L1(_) => "L1",
            Penalty::ElasticNet { .. } => "elastic net",
        }
    }

    /// Strength of the smooth (L2) part.
    pub fn l2_strength(&self) -> f64 {
        match *self {
            Penalty::L2(lambda) | Penalty::ElasticNet { lambda, .. } => lambda,
            Penalty::None | Penalty::L1(_) => 0.0,
        }
    }

    /// Strength of the non-smooth (L1) part.
    pub fn l1_strength(&self) -> f64 {
        match *self {
            Penalty::L1(lambda) => lambda,
            Penalty::ElasticNet { gamma, .. } => gamma,
            Penalty::None | Penalty::L2(_) => 0.0,
        }
    }

    /// Structural smoothness: L1 and elastic net are non-smooth whatever
    /// their strengths.
    pub fn is_smooth(&self) -> bool {
        matches!(self, Penalty::None | Penalty::L2(_))
    }

    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, v: f64| {
            if v >= 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(RustyGlmError::InvalidHyperparameter(format!(
                    "penalty strength {} must be non-negative and finite, got {}",
                    name, v
                )))
            }
        };
        match *self {
            Penalty::None => Ok(()),
            Penalty::L2(lambda) | Penalty::L1(lambda) => check("λ", lambda),
            Penalty::ElasticNet { lambda, gamma } => {
                check("λ", lambda)?;
                check("γ", gamma)
            }
        }
    }

    /// λ‖θ‖²/2 over the penalized rows.
    pub fn smooth_value(&self, theta: ArrayView2<f64>, penalized_rows: usize) -> f64 {
        let lambda = self.l2_strength();
        if lambda == 0.0 {
            return 0.0;
        }
        let head = theta.slice(s![..penalized_rows, ..]);
        0.5 * lambda * head.iter().map(|v| v * v).sum::<f64>()
    }

    /// λ₁‖θ‖₁ over the penalized rows.
    pub fn nonsmooth_value(&self, theta: ArrayView2<f64>, penalized_rows: usize) -> f64 {
        let gamma = self.l1_strength();
        if gamma == 0.0 {
            return 0.0;
        }
        let head = theta.slice(s![..penalized_rows, ..]);
        gamma * head.iter().map(|v| v.abs()).sum::<f64>()
    }

    /// Full penalty value.
    pub fn value(&self, theta: ArrayView2<f64>, penalized_rows: usize) -> f64 {
        self.smooth_value(theta, penalized_rows) + self.nonsmooth_value(theta, penalized_rows)
    }

    /// Add the gradient of the smooth part, λθ on penalized rows, into `grad`.
    pub fn add_smooth_gradient(
        &self,
        theta: &Array2<f64>,
        penalized_rows: usize,
        grad: &mut Array2<f64>,
    ) {
        let lambda = self.l2_strength();
        if lambda == 0.0 {
            return;
        }
        grad.slice_mut(s![..penalized_rows, ..])
            .scaled_add(lambda, &theta.slice(s![..penalized_rows, ..]));
    }

    /// Proximal operator of the non-smooth part with step size `step`.
    pub fn prox(&self, theta: &Array2<f64>, step: f64, penalized_rows: usize) -> Array2<f64> {
        let threshold = step * self.l1_strength();
        let mut out = theta.clone();
        if threshold > 0.0 {
            out.slice_mut(s![..penalized_rows, ..])
                .mapv_inplace(|v| soft_threshold(v, threshold));
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
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_soft_threshold_grid() {
        let lambdas = [0.0, 0.1, 0.5, 2.0];
        let steps = [0.3, 1.0];
        for &lambda in &lambdas {
            for &t in &steps {
                let penalty = Penalty::L1(lambda);
                let v = Array2::from_shape_fn((41, 1), |(i, _)| -4.0 + 0.2 * i as f64);
                let out = penalty.prox(&v, t, v.nrows());
                for (&vi, &oi) in v.iter().zip(out.iter()) {
                    if vi.abs() <= t * lambda {
                        assert_eq!(oi, 0.0);
                    } else {
                        assert_abs_diff_eq!(oi, vi - t * lambda * vi.signum(), epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_elastic_net_split() {
        let theta = array![[1.0], [-2.0], [3.0]];
        let penalty = Penalty::ElasticNet {
            lambda: 2.0,
            gamma: 0.5,
        };
        assert_abs_diff_eq!(penalty.smooth_value(theta.view(), 3), 14.0, epsilon = 1e-12);
        assert_abs_diff_eq!(penalty.nonsmooth_value(theta.view(), 3), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(penalty.value(theta.view(), 3), 17.0, epsilon = 1e-12);
        assert!(!penalty.is_smooth());
    }

    #[test]
    fn test_intercept_row_is_exempt() {
        // Last row is the intercept; only the first two rows are penalized.
        let theta = array![[1.0], [-2.0], [10.0]];
        let penalty = Penalty::L2(1.0);
        assert_abs_diff_eq!(penalty.value(theta.view(), 2), 2.5, epsilon = 1e-12);

        let mut grad = Array2::zeros((3, 1));
        penalty.add_smooth_gradient(&theta, 2, &mut grad);
        assert_eq!(grad, array![[1.0], [-2.0], [0.0]]);

        let prox = Penalty::L1(1.0).prox(&theta, 5.0, 2);
        assert_eq!(prox, array![[0.0], [0.0], [10.0]]);
    }

    #[test]
    fn test_exemption_applies_to_every_class() {
        let theta = array![[1.0, -1.0], [4.0, -4.0]];
        let penalty = Penalty::L1(1.0);
        assert_abs_diff_eq!(penalty.value(theta.view(), 1), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_validation() {
        assert!(Penalty::L2(0.0).validate().is_ok());
        assert!(Penalty::L1(-0.1).validate().is_err());
        assert!(Penalty::ElasticNet {
            lambda: 1.0,
            gamma: f64::NAN
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_from_kind() {
        assert_eq!(Penalty::from_kind(PenaltyKind::L1, 0.3, 9.0), Penalty::L1(0.3));
        assert_eq!(
            Penalty::from_kind(PenaltyKind::ElasticNet, 0.3, 0.1),
            Penalty::ElasticNet {
                lambda: 0.3,
                gamma: 0.1
            }
        );
        assert_eq!(Penalty::from_kind(PenaltyKind::None, 0.3, 0.1).kind(), PenaltyKind::None);
    }
}
