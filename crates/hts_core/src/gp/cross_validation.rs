//! Leave-one-out and leave-group-out cross-validation of a fitted model
//!
//! Without refitting, held-out posteriors come in closed form from the
//! inverse training covariance `Q = (K + noise I)⁻¹`: for a held-out index
//! set `G` with `A = Q[G, G]`,
//!
//! ```text
//! mean_G = y_G - A⁻¹ alpha_G
//! cov_G  = A⁻¹
//! ```
//!
//! With `refit`, hyperparameters are searched again on each training fold.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::kernel::Point;
use super::model::{well_features, GpModel, Prediction};
use crate::config::GpConfig;
use crate::error::{HtsError, Result};
use crate::plate::{Coordinate, FlatValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvScheme {
    #[default]
    LeaveOneOut,
    /// Hold out every observation of one layout label at a time
    LeaveGroupOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvPoint {
    pub coordinate: Coordinate,
    pub replicate: usize,
    pub fold: usize,
    pub observed: f64,
    pub predicted: f64,
    pub predicted_sd: f64,
    /// observed - predicted
    pub error: f64,
    /// error / predicted_sd
    pub standardized_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub scheme: CvScheme,
    pub refit: bool,
    pub folds: usize,
    /// Row-major, then replicate
    pub points: Vec<CvPoint>,
}

impl CrossValidation {
    pub fn rmse(&self) -> f64 {
        let n = self.points.len().max(1) as f64;
        (self.points.iter().map(|p| p.error * p.error).sum::<f64>() / n).sqrt()
    }

    /// Point with the largest absolute error; first in plate order on ties.
    pub fn max_abs_error(&self) -> Option<&CvPoint> {
        self.points.iter().fold(None, |best: Option<&CvPoint>, p| match best {
            Some(b) if b.error.abs() >= p.error.abs() => Some(b),
            _ => Some(p),
        })
    }
}

/// Fold index per observation.
///
/// For leave-group-out, `groups[i]` names the group of observation `i`.
/// Folds are numbered in order of first appearance.
fn assign_folds(n: usize, scheme: CvScheme, groups: Option<&[String]>) -> Result<Vec<usize>> {
    match scheme {
        CvScheme::LeaveOneOut => Ok((0..n).collect()),
        CvScheme::LeaveGroupOut => {
            let groups = groups.ok_or_else(|| HtsError::InvalidTaskConfig {
                method: "gp_cross_validation".to_string(),
                reason: "leave-group-out needs a group per observation".to_string(),
            })?;
            if groups.len() != n {
                return Err(HtsError::ShapeMismatch {
                    tag: "cv groups".to_string(),
                    expected_height: n,
                    expected_width: 1,
                    found_height: groups.len(),
                    found_width: 1,
                });
            }
            let mut order: Vec<&str> = Vec::new();
            Ok(groups
                .iter()
                .map(|g| match order.iter().position(|o| *o == g.as_str()) {
                    Some(i) => i,
                    None => {
                        order.push(g);
                        order.len() - 1
                    }
                })
                .collect())
        }
    }
}

/// Cross-validate `model` on its own observations.
pub fn cross_validate(
    model: &GpModel,
    scheme: CvScheme,
    groups: Option<&[String]>,
    refit: bool,
    config: &GpConfig,
) -> Result<CrossValidation> {
    let observations = model.observations();
    let folds = assign_folds(observations.len(), scheme, groups)?;
    let n_folds = folds.iter().max().map_or(0, |m| m + 1);

    let mut predictions: Vec<Option<Prediction>> = vec![None; observations.len()];
    if refit {
        refit_folds(model, &folds, n_folds, config, &mut predictions)?;
    } else {
        closed_form_folds(model, &folds, n_folds, &mut predictions)?;
    }

    let points = observations
        .iter()
        .zip(&folds)
        .zip(predictions)
        .map(|((o, &fold), p)| {
            let p = p.unwrap_or(Prediction { mean: f64::NAN, sd: f64::NAN });
            let error = o.value - p.mean;
            CvPoint {
                coordinate: o.coordinate,
                replicate: o.replicate,
                fold,
                observed: o.value,
                predicted: p.mean,
                predicted_sd: p.sd,
                error,
                standardized_error: if p.sd > 0.0 { error / p.sd } else { f64::NAN },
            }
        })
        .collect();

    Ok(CrossValidation { scheme, refit, folds: n_folds, points })
}

fn closed_form_folds(
    model: &GpModel,
    folds: &[usize],
    n_folds: usize,
    predictions: &mut [Option<Prediction>],
) -> Result<()> {
    let q = model
        .factorization()
        .inverse()
        .ok_or_else(|| HtsError::ModelFit("training covariance could not be inverted".to_string()))?;
    let alpha = &model.factorization().alpha;
    let y = model.standardized_targets();

    for fold in 0..n_folds {
        let held: Vec<usize> = (0..folds.len()).filter(|&i| folds[i] == fold).collect();
        let m = held.len();
        let a = DMatrix::from_fn(m, m, |r, c| q[(held[r], held[c])]);
        let a_inv = match a.clone().cholesky() {
            Some(chol) => chol.inverse(),
            None => a
                .try_inverse()
                .ok_or_else(|| HtsError::ModelFit(format!("fold {fold} precision block is singular")))?,
        };
        let alpha_g = DVector::from_fn(m, |r, _| alpha[held[r]]);
        let shift = &a_inv * alpha_g;
        for (r, &i) in held.iter().enumerate() {
            predictions[i] = Some(model.to_raw(y[i] - shift[r], a_inv[(r, r)]));
        }
    }
    Ok(())
}

fn refit_folds(
    model: &GpModel,
    folds: &[usize],
    n_folds: usize,
    config: &GpConfig,
    predictions: &mut [Option<Prediction>],
) -> Result<()> {
    let observations = model.observations();
    let (height, width) = model.geometry();
    for fold in 0..n_folds {
        let training: Vec<FlatValue<f64>> = observations
            .iter()
            .zip(folds)
            .filter(|(_, f)| **f != fold)
            .map(|(o, _)| *o)
            .collect();
        let held: Vec<usize> = (0..folds.len()).filter(|&i| folds[i] == fold).collect();

        let fold_model = GpModel::fit(training, height, width, model.kernel(), config)?;
        let points: Vec<Point> = held
            .iter()
            .map(|&i| well_features(observations[i].coordinate, height, width))
            .collect();
        for (&i, p) in held.iter().zip(fold_model.predict_points(&points)) {
            predictions[i] = Some(p);
        }
    }
    Ok(())
}
