// =============================================================================
// Design Matrix View
// =============================================================================
//
// A fit borrows the caller's n × p feature matrix and never copies it. When
// an intercept is fitted we do NOT append a column of ones; instead the
// intercept is handled implicitly:
//
//     η = X θ[0..p] + θ[p]          (the intercept is the LAST coefficient)
//     X̃ᵗ r = [ Xᵗ r ; Σᵢ rᵢ ]
//
// Everything downstream (losses, Hessian-vector products, CG systems) goes
// through `apply` / `apply_transpose`, so the augmented matrix X̃ = [X 1]
// only ever exists conceptually.
//
// =============================================================================

use ndarray::{s, Array1, Array2, ArrayView2, Axis};

/// Borrowed design matrix with an optional implicit intercept column.
#[derive(Debug, Clone, Copy)]
pub struct Design<'a> {
    x: ArrayView2<'a, f64>,
    intercept: bool,
}

impl<'a> Design<'a> {
    pub fn new(x: ArrayView2<'a, f64>, intercept: bool) -> Self {
        Self { x, intercept }
    }

    /// Number of observations n.
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    /// Number of raw features p.
    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Number of coefficients per output: p, or p + 1 with an intercept.
    pub fn dim(&self) -> usize {
        self.x.ncols() + usize::from(self.intercept)
    }

    pub fn has_intercept(&self) -> bool {
        self.intercept
    }

    pub fn x(&self) -> ArrayView2<'a, f64> {
        self.x
    }

    /// Linear predictor X̃θ for a (dim × k) parameter matrix, shape (n × k).
    pub fn apply(&self, theta: &Array2<f64>) -> Array2<f64> {
        let p = self.n_features();
        let mut eta = self.x.dot(&theta.slice(s![..p, ..]));
        if self.intercept {
            eta += &theta.row(p);
        }
        eta
    }

    /// X̃ᵗr for an (n × k) matrix, shape (dim × k).
    pub fn apply_transpose(&self, r: &Array2<f64>) -> Array2<f64> {
        let p = self.n_features();
        let mut out = Array2::zeros((self.dim(), r.ncols()));
        out.slice_mut(s![..p, ..]).assign(&self.x.t().dot(r));
        if self.intercept {
            out.row_mut(p).assign(&r.sum_axis(Axis(0)));
        }
        out
    }

    /// Dense weighted Gram matrix X̃ᵗ W X̃, shape (dim × dim).
    ///
    /// Only the dense solvers (Cholesky, Newton) call this. The scaled copy
    /// of X is a scoped working buffer dropped on return.
    pub fn weighted_gram(&self, weights: Option<&Array1<f64>>) -> Array2<f64> {
        let p = self.n_features();
        let dim = self.dim();

        let xw = match weights {
            Some(w) => &self.x * &w.view().insert_axis(Axis(1)),
            None => self.x.to_owned(),
        };

        let mut gram = Array2::zeros((dim, dim));
        gram.slice_mut(s![..p, ..p]).assign(&self.x.t().dot(&xw));

        if self.intercept {
            // Column sums of WX fill the last row/column; the corner is Σw.
            let col_sums = xw.sum_axis(Axis(0));
            gram.slice_mut(s![p, ..p]).assign(&col_sums);
            gram.slice_mut(s![..p, p]).assign(&col_sums);
            gram[[p, p]] = match weights {
                Some(w) => w.sum(),
                None => self.n_samples() as f64,
            };
        }
        gram
    }
}
