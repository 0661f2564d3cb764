//! # Statistics & Normalization Engine
//!
//! Pure functions over replicate slices. Nothing here touches plates or
//! holds state; `crate::plate` selects the wells and stores the results.

pub mod classify;
pub mod descriptive;
pub mod normalization;
pub mod quality;
pub mod significance;

use serde::{Deserialize, Serialize};

pub use classify::{classify, Classifier};
pub use descriptive::{mad, mean, median, std_dev, variance};
pub use normalization::{
    divide, divide_all, normalize_by_controls, normalize_linear, ControlWindow, Division, FretBlanks,
    FretCorrection, LinearScale,
};
pub use quality::{ssmd, ssmd_grade, z_factor, z_factor_grade, Estimator, SsmdGrade, ZFactorGrade};
pub use significance::{p_values, z_scores, PValueMethod, Tail};

/// Which end of a scale counts as the favourable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}
