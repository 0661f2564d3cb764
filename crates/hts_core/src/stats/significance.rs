//! Significance of values against a null distribution

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use super::descriptive::{finite, mean, std_dev};
use crate::error::{HtsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueMethod {
    /// Normal distribution with the null's mean and sd
    #[default]
    Parametric,
    /// Rank against the null values, `(1 + k) / (n + 1)`
    Empirical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tail {
    #[default]
    Greater,
    Less,
    TwoSided,
}

/// Normal fitted to `values`; errors when the sd is undefined or zero.
pub fn fit_normal(values: &[f64], context: &str) -> Result<Normal> {
    let found = finite(values).len();
    let (mu, sd) = mean(values).zip(std_dev(values)).ok_or_else(|| HtsError::InsufficientSampleSize {
        context: context.to_string(),
        found,
        required: 2,
    })?;
    Normal::new(mu, sd).map_err(|_| HtsError::DegenerateRange { context: context.to_string(), value: mu })
}

fn tail_probability(normal: &Normal, x: f64, tail: Tail) -> f64 {
    let lower = normal.cdf(x);
    let upper = 1.0 - lower;
    match tail {
        Tail::Greater => upper,
        Tail::Less => lower,
        Tail::TwoSided => (2.0 * lower.min(upper)).min(1.0),
    }
}

/// p-value of every value against `null`. Undefined inputs give NaN.
pub fn p_values(
    values: &[f64],
    null: &[f64],
    method: PValueMethod,
    tail: Tail,
    min_null_size: usize,
) -> Result<Vec<f64>> {
    let null = finite(null);
    if null.len() < min_null_size.max(1) {
        return Err(HtsError::InsufficientSampleSize {
            context: "null distribution".to_string(),
            found: null.len(),
            required: min_null_size.max(1),
        });
    }

    match method {
        PValueMethod::Parametric => {
            let normal = fit_normal(&null, "null distribution")?;
            Ok(values
                .iter()
                .map(|&x| if x.is_finite() { tail_probability(&normal, x, tail) } else { f64::NAN })
                .collect())
        }
        PValueMethod::Empirical => {
            let n = null.len() as f64;
            let greater = |x: f64| (1.0 + null.iter().filter(|&&v| v >= x).count() as f64) / (n + 1.0);
            let less = |x: f64| (1.0 + null.iter().filter(|&&v| v <= x).count() as f64) / (n + 1.0);
            Ok(values
                .iter()
                .map(|&x| {
                    if !x.is_finite() {
                        return f64::NAN;
                    }
                    match tail {
                        Tail::Greater => greater(x),
                        Tail::Less => less(x),
                        Tail::TwoSided => (2.0 * greater(x).min(less(x))).min(1.0),
                    }
                })
                .collect())
        }
    }
}

/// z-scores of `values` against the sample mean and sd of `reference`.
pub fn z_scores(values: &[f64], reference: &[f64]) -> Result<Vec<f64>> {
    // validates that the sd is positive
    fit_normal(reference, "z-score reference")?;
    let (mu, sd) = (mean(reference).unwrap_or(0.0), std_dev(reference).unwrap_or(1.0));
    Ok(values.iter().map(|&x| (x - mu) / sd).collect())
}

/// Upper tail of the standard normal at `|z|`.
pub fn upper_tail_of_abs(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(standard) => 1.0 - standard.cdf(z.abs()),
        Err(_) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empirical_plus_one() {
        let null = [1.0, 2.0, 3.0, 4.0];
        let p = p_values(&[3.0, 10.0], &null, PValueMethod::Empirical, Tail::Greater, 3).unwrap();
        // {3, 4} >= 3 -> (1 + 2) / 5
        assert!((p[0] - 0.6).abs() < 1e-12);
        assert!((p[1] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_parametric_tails() {
        let null = [-1.0, 0.0, 1.0];
        let greater = p_values(&[0.0], &null, PValueMethod::Parametric, Tail::Greater, 3).unwrap();
        let two = p_values(&[0.0], &null, PValueMethod::Parametric, Tail::TwoSided, 3).unwrap();
        assert!((greater[0] - 0.5).abs() < 1e-9);
        assert!((two[0] - 1.0).abs() < 1e-9);

        let far = p_values(&[5.0], &null, PValueMethod::Parametric, Tail::Less, 3).unwrap();
        assert!(far[0] > 0.99);
    }

    #[test]
    fn test_small_null_rejected() {
        let err = p_values(&[1.0], &[1.0, 2.0], PValueMethod::Empirical, Tail::Greater, 3).unwrap_err();
        assert!(matches!(err, HtsError::InsufficientSampleSize { found: 2, required: 3, .. }));
    }

    #[test]
    fn test_undefined_values_propagate() {
        let p = p_values(&[f64::NAN], &[1.0, 2.0, 3.0], PValueMethod::Empirical, Tail::Less, 3).unwrap();
        assert!(p[0].is_nan());
    }

    #[test]
    fn test_z_scores() {
        let z = z_scores(&[2.0, 4.0], &[1.0, 2.0, 3.0]).unwrap();
        assert!((z[0]).abs() < 1e-12);
        assert!((z[1] - 2.0).abs() < 1e-12);
        assert!((upper_tail_of_abs(0.0) - 0.5).abs() < 1e-9);
        assert!(z_scores(&[1.0], &[2.0, 2.0]).is_err());
    }
}
