//! Synthetic data shared by the integration tests.

#![allow(dead_code)]

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Gaussian X (n × p), true weights βⱼ = (−1)ʲ(j + 1)/2, intercept 0.5 and
/// response y = Xβ + 0.5 + ε with ε ~ N(0, noise²).
pub fn gaussian_regression(n: usize, p: usize, noise: f64, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();

    let x = Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng));
    let beta = Array1::from_shape_fn(p, |j| {
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        sign * (j as f64 + 1.0) / 2.0
    });
    let y = x.dot(&beta).mapv(|v| v + 0.5) + Array1::from_shape_fn(n, |_| noise * normal.sample(&mut rng));
    (x, y)
}

/// ±1 labels drawn from a logistic model on Gaussian features.
pub fn logistic_classification(n: usize, p: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let (x, eta) = gaussian_regression(n, p, 0.0, seed);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let uniform = rand_distr::Uniform::new(0.0, 1.0).unwrap();
    let y = eta.mapv(|e| {
        let prob = 1.0 / (1.0 + (-e).exp());
        if uniform.sample(&mut rng) < prob {
            1.0
        } else {
            -1.0
        }
    });
    (x, y)
}

/// Three well-separated Gaussian clusters in two dimensions, classes 1..=3.
pub fn three_clusters(per_class: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.5).unwrap();
    let centers = [(2.0, 0.0), (-1.0, 1.7), (-1.0, -1.7)];

    let n = per_class * centers.len();
    let mut x = Array2::zeros((n, 2));
    let mut y = Array1::zeros(n);
    for (c, &(cx, cy)) in centers.iter().enumerate() {
        for i in 0..per_class {
            let row = c * per_class + i;
            x[[row, 0]] = cx + normal.sample(&mut rng);
            x[[row, 1]] = cy + normal.sample(&mut rng);
            y[row] = (c + 1) as f64;
        }
    }
    (x, y)
}

/// X with a column of ones appended, for closed-form references.
pub fn with_intercept_column(x: &Array2<f64>) -> Array2<f64> {
    let ones = Array2::ones((x.nrows(), 1));
    ndarray::concatenate![ndarray::Axis(1), x.view(), ones.view()]
}
