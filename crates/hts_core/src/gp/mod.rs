//! # Gaussian-Process Spatial Model
//!
//! Per-plate spatial regression of a readout over well positions, used to
//! predict local control levels and to find wells that disagree with their
//! neighbourhood (cross-validation error).

pub mod cross_validation;
pub mod kernel;
pub mod model;

pub use cross_validation::{cross_validate, CrossValidation, CvPoint, CvScheme};
pub use kernel::{Hyperparameters, KernelKind};
pub use model::{well_features, GpModel, Prediction};

use crate::config::GpConfig;
use crate::error::{HtsError, Result};
use crate::plate::FlatValue;

/// Fit every kernel and keep the lowest BIC. Failed fits are skipped.
pub fn fit_best(
    observations: &[FlatValue<f64>],
    height: usize,
    width: usize,
    kernels: &[KernelKind],
    config: &GpConfig,
) -> Result<(GpModel, Vec<(KernelKind, Result<f64>)>)> {
    let mut best: Option<GpModel> = None;
    let mut scores = Vec::with_capacity(kernels.len());
    for &kernel in kernels {
        match GpModel::fit(observations.to_vec(), height, width, kernel, config) {
            Ok(model) => {
                scores.push((kernel, Ok(model.bic())));
                if best.as_ref().map_or(true, |b| model.bic() < b.bic()) {
                    best = Some(model);
                }
            }
            Err(e) => scores.push((kernel, Err(e))),
        }
    }
    match best {
        Some(model) => Ok((model, scores)),
        None => Err(HtsError::ModelFit(format!(
            "none of {} kernels could be fitted",
            kernels.len()
        ))),
    }
}
