//! # Plate Quality Metrics
//!
//! SSMD (strictly standardized mean difference) and the z-factor, plus the
//! conventional quality grades attached to both.
//!
//! | metric   | grade        | range (lower-is-better convention) |
//! |----------|--------------|------------------------------------|
//! | SSMD     | excellent    | < -2                               |
//! |          | good         | [-2, -1)                           |
//! |          | inferior     | [-1, -0.5)                         |
//! |          | poor         | >= -0.5                            |
//! | z-factor | unacceptable | < 0                                |
//! |          | acceptable   | [0, 0.5)                           |
//! |          | very good    | >= 0.5                             |

use serde::{Deserialize, Serialize};

use super::descriptive::{finite, mad, mean, median, std_dev, variance_or_zero};
use super::Direction;
use crate::error::{HtsError, Result};

/// Normal-consistency constant for the MAD
pub const MAD_SCALE: f64 = 1.4826;

/// SSMD of `group` against `reference`:
/// `(mean_g - mean_r) / sqrt(var_g + var_r)`, negated for lower-is-better.
///
/// A denominator of zero gives `NaN` (undefined).
pub fn ssmd(group: &[f64], reference: &[f64], direction: Direction) -> Result<f64> {
    let (mean_r, var_r) = mean(reference)
        .zip(variance_or_zero(reference))
        .ok_or_else(|| HtsError::InsufficientControls {
            control: "reference".to_string(),
            found: 0,
            required: 1,
        })?;
    let (mean_g, var_g) = mean(group)
        .zip(variance_or_zero(group))
        .ok_or_else(|| HtsError::InsufficientSampleSize {
            context: "ssmd group".to_string(),
            found: 0,
            required: 1,
        })?;

    let denominator = (var_g + var_r).sqrt();
    if denominator == 0.0 {
        return Ok(f64::NAN);
    }
    let value = (mean_g - mean_r) / denominator;
    Ok(match direction {
        Direction::HigherIsBetter => value,
        Direction::LowerIsBetter => -value,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    /// Mean and standard deviation
    #[default]
    Standard,
    /// Median and scaled MAD
    Robust,
}

/// `1 - 3 (s_pos + s_neg) / |c_pos - c_neg|`
pub fn z_factor(positive: &[f64], negative: &[f64], estimator: Estimator) -> Result<f64> {
    z_factor_with_scale(positive, negative, estimator, MAD_SCALE)
}

pub fn z_factor_with_scale(
    positive: &[f64],
    negative: &[f64],
    estimator: Estimator,
    mad_scale: f64,
) -> Result<f64> {
    let (c_pos, s_pos) = center_and_spread(positive, "positive", estimator, mad_scale)?;
    let (c_neg, s_neg) = center_and_spread(negative, "negative", estimator, mad_scale)?;

    let window = (c_pos - c_neg).abs();
    if window == 0.0 {
        return Err(HtsError::DegenerateRange { context: "z-factor control centers".to_string(), value: c_pos });
    }
    Ok(1.0 - 3.0 * (s_pos + s_neg) / window)
}

fn center_and_spread(values: &[f64], control: &str, estimator: Estimator, mad_scale: f64) -> Result<(f64, f64)> {
    let found = finite(values).len();
    if found < 2 {
        return Err(HtsError::InsufficientControls { control: control.to_string(), found, required: 2 });
    }
    let pair = match estimator {
        Estimator::Standard => mean(values).zip(std_dev(values)),
        Estimator::Robust => median(values).zip(mad(values).map(|m| m * mad_scale)),
    };
    pair.ok_or_else(|| HtsError::InsufficientControls { control: control.to_string(), found, required: 2 })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SsmdGrade {
    Excellent,
    Good,
    Inferior,
    Poor,
}

pub fn ssmd_grade(value: f64, direction: Direction) -> SsmdGrade {
    // grade boundaries are stated for lower-is-better
    let v = match direction {
        Direction::LowerIsBetter => value,
        Direction::HigherIsBetter => -value,
    };
    if v < -2.0 {
        SsmdGrade::Excellent
    } else if v < -1.0 {
        SsmdGrade::Good
    } else if v < -0.5 {
        SsmdGrade::Inferior
    } else {
        SsmdGrade::Poor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZFactorGrade {
    Unacceptable,
    Acceptable,
    VeryGood,
}

pub fn z_factor_grade(value: f64) -> ZFactorGrade {
    if value.is_nan() || value < 0.0 {
        ZFactorGrade::Unacceptable
    } else if value < 0.5 {
        ZFactorGrade::Acceptable
    } else {
        ZFactorGrade::VeryGood
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssmd_direction_flips_sign() {
        let group = [10.0, 12.0, 11.0];
        let reference = [1.0, 2.0, 3.0];
        let up = ssmd(&group, &reference, Direction::HigherIsBetter).unwrap();
        let down = ssmd(&group, &reference, Direction::LowerIsBetter).unwrap();
        assert!(up > 0.0);
        assert_eq!(up, -down);
        // diff 9, variances 1 + 1
        assert!((up - 9.0 / 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_ssmd_single_replicates_undefined() {
        let value = ssmd(&[5.0], &[1.0], Direction::HigherIsBetter).unwrap();
        assert!(value.is_nan());
        assert!(ssmd(&[5.0], &[], Direction::HigherIsBetter).is_err());
    }

    #[test]
    fn test_z_factor_standard() {
        let pos = [100.0, 102.0, 98.0];
        let neg = [10.0, 12.0, 8.0];
        // s = 2 for both, window 90
        let z = z_factor(&pos, &neg, Estimator::Standard).unwrap();
        assert!((z - (1.0 - 12.0 / 90.0)).abs() < 1e-12);
        assert_eq!(z_factor_grade(z), ZFactorGrade::VeryGood);
    }

    #[test]
    fn test_z_factor_robust_resists_outlier() {
        let pos = [100.0, 101.0, 99.0, 100.0, 500.0];
        let neg = [10.0, 11.0, 9.0, 10.0, 10.0];
        let standard = z_factor(&pos, &neg, Estimator::Standard).unwrap();
        let robust = z_factor(&pos, &neg, Estimator::Robust).unwrap();
        assert!(robust > standard);
        assert!(robust > 0.5);
    }

    #[test]
    fn test_z_factor_errors() {
        assert!(matches!(
            z_factor(&[1.0], &[0.0, 1.0], Estimator::Standard),
            Err(HtsError::InsufficientControls { found: 1, .. })
        ));
        assert!(matches!(
            z_factor(&[1.0, 3.0], &[2.0, 2.0], Estimator::Standard),
            Err(HtsError::DegenerateRange { .. })
        ));
    }

    #[test]
    fn test_grades() {
        assert_eq!(ssmd_grade(-2.5, Direction::LowerIsBetter), SsmdGrade::Excellent);
        assert_eq!(ssmd_grade(-2.0, Direction::LowerIsBetter), SsmdGrade::Good);
        assert_eq!(ssmd_grade(-0.5, Direction::LowerIsBetter), SsmdGrade::Poor);
        assert_eq!(ssmd_grade(1.5, Direction::HigherIsBetter), SsmdGrade::Good);
        assert_eq!(ssmd_grade(f64::NAN, Direction::HigherIsBetter), SsmdGrade::Poor);
        assert_eq!(z_factor_grade(-0.1), ZFactorGrade::Unacceptable);
        assert_eq!(z_factor_grade(0.0), ZFactorGrade::Acceptable);
    }
}
