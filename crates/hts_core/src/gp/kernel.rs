//! Stationary covariance functions over normalized well positions

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Well position scaled into `[0, 1]`, `(x, y)` = `(column, row)`.
pub type Point = [f64; 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    SquaredExponential,
    Matern32,
    Matern52,
    Exponential,
}

impl KernelKind {
    pub const ALL: [KernelKind; 4] = [
        KernelKind::SquaredExponential,
        KernelKind::Matern32,
        KernelKind::Matern52,
        KernelKind::Exponential,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::SquaredExponential => "squared_exponential",
            KernelKind::Matern32 => "matern32",
            KernelKind::Matern52 => "matern52",
            KernelKind::Exponential => "exponential",
        }
    }

    /// Correlation at distance `r`; 1 at `r = 0`.
    #[inline]
    pub fn correlation(&self, r: f64, lengthscale: f64) -> f64 {
        let d = r / lengthscale;
        match self {
            KernelKind::SquaredExponential => (-0.5 * d * d).exp(),
            KernelKind::Matern32 => {
                let s = 3f64.sqrt() * d;
                (1.0 + s) * (-s).exp()
            }
            KernelKind::Matern52 => {
                let s = 5f64.sqrt() * d;
                (1.0 + s + s * s / 3.0) * (-s).exp()
            }
            KernelKind::Exponential => (-d).exp(),
        }
    }
}

/// Stationary kernel plus white observation noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub lengthscale: f64,
    pub signal_variance: f64,
    pub noise_variance: f64,
}

#[inline]
fn distance(a: &Point, b: &Point) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Latent covariance between two points, without noise.
#[inline]
pub fn covariance(kind: KernelKind, hyper: &Hyperparameters, a: &Point, b: &Point) -> f64 {
    hyper.signal_variance * kind.correlation(distance(a, b), hyper.lengthscale)
}

/// Training covariance `K + noise * I`.
pub fn covariance_matrix(kind: KernelKind, hyper: &Hyperparameters, points: &[Point]) -> DMatrix<f64> {
    let n = points.len();
    DMatrix::from_fn(n, n, |i, j| {
        let k = covariance(kind, hyper, &points[i], &points[j]);
        if i == j {
            k + hyper.noise_variance
        } else {
            k
        }
    })
}

/// `K(train, test)`, one column per test point.
pub fn cross_covariance(kind: KernelKind, hyper: &Hyperparameters, train: &[Point], test: &[Point]) -> DMatrix<f64> {
    DMatrix::from_fn(train.len(), test.len(), |i, j| covariance(kind, hyper, &train[i], &test[j]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_at_zero_is_one() {
        for kind in KernelKind::ALL {
            assert!((kind.correlation(0.0, 0.3) - 1.0).abs() < 1e-12, "{}", kind.name());
        }
    }

    #[test]
    fn test_correlation_decays() {
        for kind in KernelKind::ALL {
            let near = kind.correlation(0.1, 0.5);
            let far = kind.correlation(1.0, 0.5);
            assert!(near > far && far > 0.0, "{}", kind.name());
        }
    }

    #[test]
    fn test_covariance_matrix_symmetric_with_noise() {
        let hyper = Hyperparameters { lengthscale: 0.5, signal_variance: 2.0, noise_variance: 0.1 };
        let points = [[0.0, 0.0], [0.5, 0.0], [1.0, 1.0]];
        let k = covariance_matrix(KernelKind::Matern32, &hyper, &points);
        assert_eq!(k.nrows(), 3);
        assert!((k[(0, 0)] - 2.1).abs() < 1e-12);
        assert_eq!(k[(0, 2)], k[(2, 0)]);
    }
}
