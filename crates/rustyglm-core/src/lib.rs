// =============================================================================
// RustyGLM Core Library
// =============================================================================
//
// Penalized generalized linear models: find θ minimizing
//
//     Loss(y, Xθ) + Penalty(θ)
//
// for squared, logistic, multinomial and robust losses with none / L2 / L1 /
// elastic-net penalties, using whichever solver fits the structure of the
// problem.
//
// STRUCTURE:
// ----------
//   - loss:         Loss descriptors and robust ρ functions
//   - penalty:      Penalties and their proximal operator
//   - design:       X with an implicit intercept column
//   - objective:    Loss + penalty bound to data (value, gradient, Hessian)
//   - solvers:      Analytical, Newton, Newton-CG, L-BFGS, ProxGrad, IWLS-CG
//   - dispatch:     Solver compatibility, defaults and the `fit` entry point
//   - models:       Named model constructors (ridge, lasso, huber, ...)
//   - coefficients: Fitted parameters with intercept bookkeeping
//   - linalg:       ndarray ↔ nalgebra glue, Cholesky and CG kernels
//   - error:        Error types used throughout the library
//
// FOR MAINTAINERS:
// ----------------
// When adding new functionality:
//   1. Add it to the appropriate module (or create a new one)
//   2. Write tests in that module (see existing tests for examples)
//   3. Re-export public items here so users can access them easily
//   4. New solvers also need a row in `dispatch::check_compatibility`
//
// =============================================================================

pub mod coefficients;
pub mod design;
pub mod dispatch;
pub mod error;
pub mod linalg;
pub mod loss;
pub mod models;
pub mod objective;
pub mod penalty;
pub mod solvers;

pub use coefficients::Coefficients;
pub use dispatch::{check_compatibility, default_solver, fit, objective, FitResult};
pub use error::{Result, RustyGlmError};
pub use loss::{Loss, Rho};
pub use models::GeneralizedLinearRegression;
pub use objective::{Objective, ObjectiveSpec};
pub use penalty::{Penalty, PenaltyKind};
pub use solvers::{
    AnalyticalOptions, IwlsCgOptions, LbfgsOptions, LineSearchOptions, NewtonCgOptions,
    NewtonOptions, ProxGradOptions, Solver, SolverKind,
};
