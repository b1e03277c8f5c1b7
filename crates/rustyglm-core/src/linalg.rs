// =============================================================================
// Numeric Primitives
// =============================================================================
//
// ndarray is the storage type everywhere in the crate (parameters, residuals,
// weights). nalgebra is only reached for dense factorizations, so this module
// centralizes the conversions between the two plus the handful of kernels the
// solvers share:
//
//   - ndarray ↔ nalgebra conversion
//   - Cholesky solves (Analytical and Newton)
//   - inner products and norms over parameter matrices
//   - a matrix-free conjugate gradient (Analytical-CG, Newton-CG, IWLS-CG)
//
// Parameters are always stored as a (dim × outputs) matrix, so the kernels
// below treat an `Array2` as one long vector in logical row-major order.
//
// =============================================================================

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, Zip};

use crate::error::Result;

// =============================================================================
// ndarray → nalgebra
// =============================================================================

/// Convert an ndarray matrix to a nalgebra DMatrix.
#[inline]
pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Flatten a parameter matrix into a DVector, row-major.
///
/// Row-major means coefficient `(j, c)` lands at index `j * outputs + c`,
/// which is the ordering the dense multiclass Hessian is assembled in.
#[inline]
pub fn flatten(theta: &Array2<f64>) -> DVector<f64> {
    DVector::from_iterator(theta.len(), theta.iter().copied())
}

// =============================================================================
// nalgebra → ndarray
// =============================================================================

/// Convert a nalgebra DMatrix to an ndarray matrix.
#[inline]
pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}

/// Inverse of [`flatten`].
pub fn unflatten(v: &DVector<f64>, shape: (usize, usize)) -> Result<Array2<f64>> {
    Ok(Array2::from_shape_vec(shape, v.iter().copied().collect())?)
}

// =============================================================================
// Dense solves
// =============================================================================

/// Solve the symmetric positive-definite system `A x = b` by Cholesky.
///
/// Returns `None` when `A` is not numerically positive definite. There is
/// no LU fallback: callers decide whether that is an error or a reason to
/// regularize and retry.
pub fn cholesky_solve(a: &Array2<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    spd_solve(to_dmatrix(a), b)
}

/// Cholesky solve on a nalgebra matrix.
///
/// A zero pivot gets through the factorization and surfaces as inf/NaN in
/// the solution, so that is treated as failure too.
pub fn spd_solve(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let solution = a.cholesky()?.solve(b);
    if solution.iter().all(|v| v.is_finite()) {
        Some(solution)
    } else {
        None
    }
}

// =============================================================================
// Inner products and norms
// =============================================================================

/// Frobenius inner product ⟨a, b⟩.
#[inline]
pub fn inner(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    Zip::from(a).and(b).fold(0.0, |acc, &x, &y| acc + x * y)
}

/// Euclidean (Frobenius) norm.
#[inline]
pub fn norm2(a: &Array2<f64>) -> f64 {
    inner(a, a).sqrt()
}

/// Largest absolute entry.
#[inline]
pub fn norm_inf(a: &Array2<f64>) -> f64 {
    a.iter().fold(0.0_f64, |m, &v| m.max(v.abs()))
}

/// ‖a − b‖₂ without allocating the difference.
#[inline]
pub fn distance(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    Zip::from(a)
        .and(b)
        .fold(0.0, |acc, &x, &y| acc + (x - y) * (x - y))
        .sqrt()
}

// =============================================================================
// Conjugate gradient
// =============================================================================
//
// Solves A x = b for a symmetric operator A that is only available through
// its action v ↦ Av. The design matrix is never formed into XᵗX: every caller
// hands in a closure over borrowed X and weight buffers.
//
// Negative or zero curvature (pᵗAp ≤ 0) stops the iteration early. For the
// positive-definite systems of Analytical/IWLS this only happens on a
// singular system; Newton-CG relies on it to detect indefinite Hessians.
//
// =============================================================================

/// Outcome of a conjugate-gradient solve.
#[derive(Debug, Clone)]
pub struct CgOutcome {
    /// Best approximation to the solution found.
    pub solution: Array2<f64>,
    /// Number of operator applications performed.
    pub iterations: usize,
    /// Whether ‖r‖ ≤ tol·‖b‖ was reached.
    pub converged: bool,
    /// Whether the iteration stopped on a direction with pᵗAp ≤ 0.
    pub negative_curvature: bool,
}

/// Matrix-free conjugate gradient for `A x = b`.
///
/// # Arguments
/// * `apply` - The operator v ↦ Av
/// * `b` - Right-hand side
/// * `x0` - Warm start (zeros if `None`)
/// * `max_iter` - Hard cap on operator applications
/// * `tol` - Relative residual tolerance ‖r‖ ≤ tol·‖b‖
pub fn conjugate_gradient<F>(
    mut apply: F,
    b: &Array2<f64>,
    x0: Option<Array2<f64>>,
    max_iter: usize,
    tol: f64,
) -> CgOutcome
where
    F: FnMut(&Array2<f64>) -> Array2<f64>,
{
    let mut x = x0.unwrap_or_else(|| Array2::zeros(b.raw_dim()));
    let b_norm = norm2(b);

    if b_norm == 0.0 {
        return CgOutcome {
            solution: Array2::zeros(b.raw_dim()),
            iterations: 0,
            converged: true,
            negative_curvature: false,
        };
    }

    let mut iterations = 0;
    let mut r = if x.iter().all(|&v| v == 0.0) {
        b.clone()
    } else {
        iterations += 1;
        b - &apply(&x)
    };
    let mut p = r.clone();
    let mut rr = inner(&r, &r);
    let threshold = tol * b_norm;

    while iterations < max_iter {
        if rr.sqrt() <= threshold {
            return CgOutcome {
                solution: x,
                iterations,
                converged: true,
                negative_curvature: false,
            };
        }

        let ap = apply(&p);
        iterations += 1;

        let curvature = inner(&p, &ap);
        if curvature <= 0.0 {
            return CgOutcome {
                solution: x,
                iterations,
                converged: false,
                negative_curvature: true,
            };
        }

        let alpha = rr / curvature;
        x.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &ap);

        let rr_new = inner(&r, &r);
        let beta = rr_new / rr;
        rr = rr_new;

        // p ← r + βp
        p.mapv_inplace(|v| beta * v);
        p += &r;
    }

    CgOutcome {
        converged: rr.sqrt() <= threshold,
        solution: x,
        iterations,
        negative_curvature: false,
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
    fn test_roundtrip_matrix() {
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        assert_eq!(to_array2(&to_dmatrix(&a)), a);
    }

    #[test]
    fn test_flatten_is_row_major() {
        let theta = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let flat = flatten(&theta);
        assert_eq!(flat.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(unflatten(&flat, (3, 2)).unwrap(), theta);
    }

    #[test]
    fn test_cholesky_solve() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let b = DVector::from_row_slice(&[5.0, 4.0]);
        let x = cholesky_solve(&a, &b).unwrap();
        assert_abs_diff_eq!(4.0 * x[0] + x[1], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[0] + 3.0 * x[1], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        let b = DVector::from_row_slice(&[1.0, 1.0]);
        assert!(cholesky_solve(&a, &b).is_none());
    }

    #[test]
    fn test_cholesky_rejects_zero_pivot() {
        let a = array![[1.0, 0.0], [0.0, 0.0]];
        let b = DVector::from_row_slice(&[1.0, 1.0]);
        assert!(cholesky_solve(&a, &b).is_none());
    }

    #[test]
    fn test_conjugate_gradient_matches_direct_solve() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let b = array![[1.0], [2.0], [3.0]];
        let out = conjugate_gradient(|v| a.dot(v), &b, None, 50, 1e-12);

        assert!(out.converged);
        assert!(!out.negative_curvature);
        // CG is exact in at most dim steps
        assert!(out.iterations <= 3);
        let residual = &a.dot(&out.solution) - &b;
        assert!(norm2(&residual) < 1e-10);
    }

    #[test]
    fn test_conjugate_gradient_detects_negative_curvature() {
        let a = array![[-1.0, 0.0], [0.0, 2.0]];
        let b = array![[1.0], [0.0]];
        let out = conjugate_gradient(|v| a.dot(v), &b, None, 10, 1e-10);
        assert!(out.negative_curvature);
        assert!(!out.converged);
    }

    #[test]
    fn test_conjugate_gradient_respects_cap() {
        let a = Array2::from_diag(&array![1.0, 10.0, 100.0, 1000.0]);
        let b = Array2::ones((4, 1));
        let out = conjugate_gradient(|v| a.dot(v), &b, None, 2, 1e-14);
        assert_eq!(out.iterations, 2);
        assert!(!out.converged);
    }

    #[test]
    fn test_norms() {
        let a = array![[3.0, -4.0]];
        assert_abs_diff_eq!(norm2(&a), 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(norm_inf(&a), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(distance(&a, &Array2::zeros((1, 2))), 5.0, epsilon = 1e-12);
    }
}
