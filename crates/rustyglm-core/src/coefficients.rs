// =============================================================================
// Fitted Coefficients
// =============================================================================
//
// A thin wrapper over the (dim × k) parameter matrix that knows where the
// intercept lives (last row) so callers never have to.
//
// =============================================================================

use ndarray::{s, Array2, ArrayView1, ArrayView2};

use crate::design::Design;
use crate::error::{Result, RustyGlmError};

/// Fitted parameters, one column per output.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    values: Array2<f64>,
    has_intercept: bool,
}

impl Coefficients {
    pub fn new(values: Array2<f64>, has_intercept: bool) -> Self {
        Self {
            values,
            has_intercept,
        }
    }

    /// Number of feature coefficients per output (excludes the intercept).
    pub fn n_features(&self) -> usize {
        self.values.nrows() - usize::from(self.has_intercept)
    }

    /// 1 for regression / binary classification, c for multinomial.
    pub fn n_outputs(&self) -> usize {
        self.values.ncols()
    }

    pub fn has_intercept(&self) -> bool {
        self.has_intercept
    }

    /// Full parameter matrix, intercept in the last row.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.values
    }

    /// The parameters as a flat vector, for single-output models.
    pub fn vector(&self) -> Option<ArrayView1<'_, f64>> {
        (self.n_outputs() == 1).then(|| self.values.column(0))
    }

    /// Feature coefficients without the intercept row.
    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.values.slice(s![..self.n_features(), ..])
    }

    /// Intercept per output, if one was fitted.
    pub fn intercept(&self) -> Option<ArrayView1<'_, f64>> {
        self.has_intercept
            .then(|| self.values.row(self.values.nrows() - 1))
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.values
    }

    /// η = Xθ (+ intercept), shape (n × k).
    pub fn predict_linear(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(RustyGlmError::DimensionMismatch(format!(
                "X has {} columns but the model was fitted on {} features",
                x.ncols(),
                self.n_features()
            )));
        }
        Ok(Design::new(x, self.has_intercept).apply(&self.values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_intercept_is_last_row() {
        let coef = Coefficients::new(array![[2.0], [-1.0], [0.5]], true);
        assert_eq!(coef.n_features(), 2);
        assert_eq!(coef.intercept().unwrap()[0], 0.5);
        assert_eq!(coef.weights(), array![[2.0], [-1.0]]);
        assert_eq!(coef.vector().unwrap().len(), 3);
    }

    #[test]
    fn test_predict_linear() {
        let coef = Coefficients::new(array![[2.0], [-1.0], [0.5]], true);
        let x = array![[1.0, 1.0], [0.0, 2.0]];
        let eta = coef.predict_linear(x.view()).unwrap();
        assert_eq!(eta, array![[1.5], [-1.5]]);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let coef = Coefficients::new(array![[2.0, 1.0], [0.0, 1.0]], false);
        assert!(coef.vector().is_none());
        assert!(coef.intercept().is_none());
        let x = array![[1.0, 1.0, 1.0]];
        assert!(matches!(
            coef.predict_linear(x.view()),
            Err(RustyGlmError::DimensionMismatch(_))
        ));
    }
}
