//! # Gaussian-Process Plate Model
//!
//! Zero-mean GP regression over well positions on standardized readouts.
//! Hyperparameters come from a bounded grid search over lengthscale and
//! noise variance (signal variance fixed at 1 on the standardized scale),
//! choosing the highest log marginal likelihood.
//!
//! ## Scaling
//! - features: `(column, row) / (max(height, width) - 1)`
//! - targets: `(y - mean) / sd`, sd of 0 treated as 1
//!
//! Predictions are returned on the raw readout scale and include the
//! observation noise in their sd.

use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;
use tracing::debug;

use super::kernel::{covariance, covariance_matrix, cross_covariance, Hyperparameters, KernelKind, Point};
use crate::config::GpConfig;
use crate::error::{HtsError, Result};
use crate::plate::{all_coordinates, Coordinate, FlatValue, WellGrid};
use crate::stats::descriptive::{mean, std_dev};

/// Number of free hyperparameters counted by [`GpModel::bic`]
pub const FREE_PARAMETERS: usize = 3;

/// Feature vector of a well.
pub fn well_features(coordinate: Coordinate, height: usize, width: usize) -> Point {
    let span = (height.max(width).saturating_sub(1)).max(1) as f64;
    [coordinate.column as f64 / span, coordinate.row as f64 / span]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub sd: f64,
}

/// Cholesky factor and weights of one hyperparameter setting.
#[derive(Debug, Clone)]
pub(crate) struct Factorization {
    /// Lower-triangular L with L Lᵀ = K + noise I (+ jitter)
    pub l: DMatrix<f64>,
    /// (K + noise I)⁻¹ y
    pub alpha: DVector<f64>,
    pub log_marginal_likelihood: f64,
    pub jitter: f64,
}

impl Factorization {
    /// Factorize the training covariance, escalating diagonal jitter on failure.
    pub fn compute(
        kernel: KernelKind,
        hyper: &Hyperparameters,
        points: &[Point],
        y: &DVector<f64>,
        config: &GpConfig,
    ) -> Option<Self> {
        let k = covariance_matrix(kernel, hyper, points);
        let n = points.len();
        let mut jitter = 0.0;
        for attempt in 0..=config.max_jitter_attempts {
            let mut matrix = k.clone();
            if jitter > 0.0 {
                for i in 0..n {
                    matrix[(i, i)] += jitter;
                }
            }
            if let Some(chol) = matrix.cholesky() {
                let l = chol.l();
                let alpha = chol.solve(y);
                let log_det_half: f64 = (0..n).map(|i| l[(i, i)].ln()).sum();
                let lml = -0.5 * y.dot(&alpha) - log_det_half - 0.5 * n as f64 * (2.0 * PI).ln();
                if !lml.is_finite() {
                    return None;
                }
                return Some(Self { l, alpha, log_marginal_likelihood: lml, jitter });
            }
            jitter = config.jitter * 10f64.powi(attempt as i32);
        }
        None
    }

    /// (K + noise I)⁻¹
    pub fn inverse(&self) -> Option<DMatrix<f64>> {
        let n = self.l.nrows();
        let l_inv = self.l.solve_lower_triangular(&DMatrix::identity(n, n))?;
        Some(l_inv.transpose() * l_inv)
    }
}

/// A fitted model of one readout on one plate.
#[derive(Debug, Clone)]
pub struct GpModel {
    kernel: KernelKind,
    hyper: Hyperparameters,
    height: usize,
    width: usize,
    observations: Vec<FlatValue<f64>>,
    points: Vec<Point>,
    y_mean: f64,
    y_scale: f64,
    y: DVector<f64>,
    factorization: Factorization,
    evaluations: usize,
}

/// Geometric grid of `steps` values from `min` to `max`.
pub(crate) fn log_grid(min: f64, max: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let (lo, hi) = (min.ln(), max.ln());
            (0..steps)
                .map(|i| (lo + (hi - lo) * i as f64 / (steps - 1) as f64).exp())
                .collect()
        }
    }
}

impl GpModel {
    /// Fit by grid search over the configured hyperparameter ranges.
    ///
    /// Non-finite observations are dropped before fitting.
    pub fn fit(
        observations: Vec<FlatValue<f64>>,
        height: usize,
        width: usize,
        kernel: KernelKind,
        config: &GpConfig,
    ) -> Result<Self> {
        let data = TrainingData::new(observations, height, width, config)?;

        let mut best: Option<(Hyperparameters, Factorization)> = None;
        let mut evaluations = 0;
        'search: for lengthscale in log_grid(config.lengthscale_min, config.lengthscale_max, config.lengthscale_steps) {
            for noise_variance in log_grid(config.noise_min, config.noise_max, config.noise_steps) {
                if evaluations >= config.max_iterations {
                    break 'search;
                }
                evaluations += 1;
                let hyper = Hyperparameters { lengthscale, signal_variance: 1.0, noise_variance };
                let Some(f) = Factorization::compute(kernel, &hyper, &data.points, &data.y, config) else {
                    continue;
                };
                let better = best
                    .as_ref()
                    .map_or(true, |(_, b)| f.log_marginal_likelihood > b.log_marginal_likelihood);
                if better {
                    best = Some((hyper, f));
                }
            }
        }

        let (hyper, factorization) = best.ok_or_else(|| {
            HtsError::ModelFit(format!(
                "no evaluable {} hyperparameters after {} evaluations",
                kernel.name(),
                evaluations
            ))
        })?;

        debug!(
            kernel = kernel.name(),
            n = data.observations.len(),
            lengthscale = hyper.lengthscale,
            noise = hyper.noise_variance,
            lml = factorization.log_marginal_likelihood,
            evaluations,
            "GP fitted"
        );

        Ok(data.into_model(kernel, hyper, factorization, evaluations))
    }

    /// Fit with fixed hyperparameters.
    pub fn fit_with(
        observations: Vec<FlatValue<f64>>,
        height: usize,
        width: usize,
        kernel: KernelKind,
        hyper: Hyperparameters,
        config: &GpConfig,
    ) -> Result<Self> {
        let data = TrainingData::new(observations, height, width, config)?;
        let factorization = Factorization::compute(kernel, &hyper, &data.points, &data.y, config)
            .ok_or_else(|| HtsError::ModelFit(format!("{} covariance is not positive definite", kernel.name())))?;
        Ok(data.into_model(kernel, hyper, factorization, 1))
    }

    pub fn kernel(&self) -> KernelKind {
        self.kernel
    }

    pub fn geometry(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    pub fn observations(&self) -> &[FlatValue<f64>] {
        &self.observations
    }

    pub fn n_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.factorization.log_marginal_likelihood
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn jitter(&self) -> f64 {
        self.factorization.jitter
    }

    /// `-2 LML + k ln(n)`
    pub fn bic(&self) -> f64 {
        -2.0 * self.log_marginal_likelihood() + FREE_PARAMETERS as f64 * (self.n_observations() as f64).ln()
    }

    pub(crate) fn factorization(&self) -> &Factorization {
        &self.factorization
    }

    pub(crate) fn standardized_targets(&self) -> &DVector<f64> {
        &self.y
    }

    pub(crate) fn to_raw(&self, mean: f64, variance: f64) -> Prediction {
        Prediction {
            mean: mean * self.y_scale + self.y_mean,
            sd: variance.max(0.0).sqrt() * self.y_scale,
        }
    }

    pub fn predict_points(&self, test: &[Point]) -> Vec<Prediction> {
        if test.is_empty() {
            return Vec::new();
        }
        let k_star = cross_covariance(self.kernel, &self.hyper, &self.points, test);
        let means = k_star.transpose() * &self.factorization.alpha;
        let v = self.factorization.l.solve_lower_triangular(&k_star);
        test.iter()
            .enumerate()
            .map(|(j, p)| {
                let prior = covariance(self.kernel, &self.hyper, p, p);
                let explained = v.as_ref().map_or(prior, |v| v.column(j).norm_squared());
                self.to_raw(means[j], prior - explained + self.hyper.noise_variance)
            })
            .collect()
    }

    pub fn predict(&self, coordinate: Coordinate) -> Prediction {
        let point = well_features(coordinate, self.height, self.width);
        self.predict_points(&[point])
            .pop()
            .unwrap_or(Prediction { mean: f64::NAN, sd: f64::NAN })
    }

    /// Predicted mean and sd grids for every well, including wells without data.
    pub fn predict_plate(&self) -> (WellGrid<f64>, WellGrid<f64>) {
        let coordinates: Vec<Coordinate> = all_coordinates(self.height, self.width).collect();
        let points: Vec<Point> = coordinates
            .iter()
            .map(|&c| well_features(c, self.height, self.width))
            .collect();
        let predictions = self.predict_points(&points);
        let mean = WellGrid::from_fn(self.height, self.width, |c| predictions[c.linear_index(self.width)].mean);
        let sd = WellGrid::from_fn(self.height, self.width, |c| predictions[c.linear_index(self.width)].sd);
        (mean, sd)
    }
}

/// Standardized, validated training set shared by both fit paths.
struct TrainingData {
    height: usize,
    width: usize,
    observations: Vec<FlatValue<f64>>,
    points: Vec<Point>,
    y_mean: f64,
    y_scale: f64,
    y: DVector<f64>,
}

impl TrainingData {
    fn new(observations: Vec<FlatValue<f64>>, height: usize, width: usize, config: &GpConfig) -> Result<Self> {
        let mut observations: Vec<FlatValue<f64>> =
            observations.into_iter().filter(|o| o.value.is_finite()).collect();
        observations.sort_by_key(|o| (o.coordinate, o.replicate));

        let required = config.min_observations.max(2);
        if observations.len() < required {
            return Err(HtsError::ModelFit(format!(
                "{} observations, at least {} required",
                observations.len(),
                required
            )));
        }
        for o in &observations {
            o.coordinate.check_bounds(height, width)?;
        }

        let raw: Vec<f64> = observations.iter().map(|o| o.value).collect();
        let y_mean = mean(&raw).unwrap_or(0.0);
        let y_scale = std_dev(&raw).filter(|sd| *sd > 0.0).unwrap_or(1.0);
        let y = DVector::from_iterator(raw.len(), raw.iter().map(|v| (v - y_mean) / y_scale));
        let points = observations
            .iter()
            .map(|o| well_features(o.coordinate, height, width))
            .collect();

        Ok(Self { height, width, observations, points, y_mean, y_scale, y })
    }

    fn into_model(
        self,
        kernel: KernelKind,
        hyper: Hyperparameters,
        factorization: Factorization,
        evaluations: usize,
    ) -> GpModel {
        GpModel {
            kernel,
            hyper,
            height: self.height,
            width: self.width,
            observations: self.observations,
            points: self.points,
            y_mean: self.y_mean,
            y_scale: self.y_scale,
            y: self.y,
            factorization,
            evaluations,
        }
    }
}
