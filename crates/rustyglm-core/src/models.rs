// =============================================================================
// Model Constructors
// =============================================================================
//
// Named shortcuts for the common loss/penalty pairings. Every model is the
// same `GeneralizedLinearRegression`: an objective specification plus an
// optional solver choice.
//
//   Model          Loss              Penalty (default)
//   -----------    --------------    -----------------------------
//   linear         squared           none
//   ridge          squared           L2(λ)
//   lasso          squared           L1(λ)
//   elastic_net    squared           EN(λ, γ)
//   huber          Huber(δ)          L2(λ), EN(λ, γ) when γ > 0
//   quantile       Quantile(τ)       L2(λ), EN(λ, γ) when γ > 0
//   lad            Quantile(½)       L2(λ), EN(λ, γ) when γ > 0
//   robust         any ρ             L2(λ), EN(λ, γ) when γ > 0
//   logistic       logistic          L2(λ), EN(λ, γ) when γ > 0
//   multinomial    multinomial       L2(λ), EN(λ, γ) when γ > 0
//
// λ is the strength of an L2 or L1 penalty and the L2 strength of an elastic
// net; γ is the L1 strength of an elastic net. `penalty_kind` re-selects the
// penalty with the same λ, γ.
//
// =============================================================================

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::dispatch::{self, FitResult};
use crate::error::Result;
use crate::loss::{Loss, Rho};
use crate::objective::ObjectiveSpec;
use crate::penalty::{Penalty, PenaltyKind};
use crate::solvers::Solver;

/// A loss + penalty model with an optional explicit solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneralizedLinearRegression {
    spec: ObjectiveSpec,
    lambda: f64,
    gamma: f64,
    solver: Option<Solver>,
}

impl GeneralizedLinearRegression {
    fn build(loss: Loss, kind: PenaltyKind, lambda: f64, gamma: f64) -> Self {
        Self {
            spec: ObjectiveSpec::new(loss, Penalty::from_kind(kind, lambda, gamma)),
            lambda,
            gamma,
            solver: None,
        }
    }

    /// Penalized model whose penalty kind follows from γ.
    fn penalized(loss: Loss, lambda: f64, gamma: f64) -> Self {
        let kind = if gamma > 0.0 {
            PenaltyKind::ElasticNet
        } else {
            PenaltyKind::L2
        };
        Self::build(loss, kind, lambda, gamma)
    }

    /// Wrap an existing specification.
    pub fn from_spec(spec: ObjectiveSpec) -> Self {
        let (lambda, gamma) = match spec.penalty {
            Penalty::None => (0.0, 0.0),
            Penalty::L2(lambda) | Penalty::L1(lambda) => (lambda, 0.0),
            Penalty::ElasticNet { lambda, gamma } => (lambda, gamma),
        };
        Self {
            spec,
            lambda,
            gamma,
            solver: None,
        }
    }

    /// Ordinary least squares.
    pub fn linear() -> Self {
        Self::build(Loss::Squared, PenaltyKind::None, 0.0, 0.0)
    }

    pub fn ridge(lambda: f64) -> Self {
        Self::build(Loss::Squared, PenaltyKind::L2, lambda, 0.0)
    }

    pub fn lasso(lambda: f64) -> Self {
        Self::build(Loss::Squared, PenaltyKind::L1, lambda, 0.0)
    }

    pub fn elastic_net(lambda: f64, gamma: f64) -> Self {
        Self::build(Loss::Squared, PenaltyKind::ElasticNet, lambda, gamma)
    }

    pub fn huber(delta: f64, lambda: f64, gamma: f64) -> Self {
        Self::penalized(Loss::Robust(Rho::Huber(delta)), lambda, gamma)
    }

    pub fn quantile(tau: f64, lambda: f64, gamma: f64) -> Self {
        Self::penalized(Loss::Robust(Rho::Quantile(tau)), lambda, gamma)
    }

    /// Least absolute deviation, the median regression.
    pub fn lad(lambda: f64, gamma: f64) -> Self {
        Self::penalized(Loss::Robust(Rho::absolute()), lambda, gamma)
    }

    pub fn robust(rho: Rho, lambda: f64, gamma: f64) -> Self {
        Self::penalized(Loss::Robust(rho), lambda, gamma)
    }

    /// Binary logistic regression on labels in {−1, +1}.
    pub fn logistic(lambda: f64, gamma: f64) -> Self {
        Self::penalized(Loss::Logistic, lambda, gamma)
    }

    /// Softmax regression on classes 1..=c.
    pub fn multinomial(lambda: f64, gamma: f64) -> Self {
        Self::penalized(Loss::Multinomial, lambda, gamma)
    }

    // -------------------------------------------------------------------------
    // Builders
    // -------------------------------------------------------------------------

    pub fn fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.spec = self.spec.fit_intercept(fit_intercept);
        self
    }

    pub fn penalize_intercept(mut self, penalize_intercept: bool) -> Self {
        self.spec = self.spec.penalize_intercept(penalize_intercept);
        self
    }

    pub fn scale_loss_with_samples(mut self, scale: bool) -> Self {
        self.spec = self.spec.scale_loss_with_samples(scale);
        self
    }

    /// Switch the penalty kind, keeping λ and γ.
    pub fn penalty_kind(mut self, kind: PenaltyKind) -> Self {
        self.spec.penalty = Penalty::from_kind(kind, self.lambda, self.gamma);
        self
    }

    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = Some(solver);
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn spec(&self) -> &ObjectiveSpec {
        &self.spec
    }

    /// The explicit solver, or the default for this loss/penalty pair.
    pub fn solver(&self) -> Solver {
        self.solver
            .unwrap_or_else(|| dispatch::default_solver(&self.spec))
    }

    // -------------------------------------------------------------------------
    // Fitting
    // -------------------------------------------------------------------------

    pub fn fit<'a>(&self, x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>) -> Result<FitResult> {
        dispatch::fit(&self.spec, x, y, self.solver)
    }

    /// The objective this model minimizes, as a closure over (X, y).
    pub fn objective<'a>(
        &self,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
    ) -> Result<impl Fn(ArrayView2<f64>) -> Result<f64> + 'a> {
        dispatch::objective(&self.spec, x, y)
    }
}
