//! Linear, control-based, division and net-FRET normalization

use serde::{Deserialize, Serialize};

use super::descriptive::{mean, min_max};
use crate::error::{HtsError, Result};

/// Min/max scaling fitted on a reference subset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearScale {
    pub min: f64,
    pub max: f64,
}

impl LinearScale {
    pub fn from_subset(subset: &[f64]) -> Result<Self> {
        let (min, max) = min_max(subset).ok_or_else(|| HtsError::InsufficientSampleSize {
            context: "linear normalization subset".to_string(),
            found: 0,
            required: 1,
        })?;
        if max == min {
            return Err(HtsError::DegenerateRange {
                context: "linear normalization".to_string(),
                value: min,
            });
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn apply(&self, x: f64) -> f64 {
        (x - self.min) / (self.max - self.min)
    }
}

/// `(x - min) / (max - min)` with min and max taken over `subset`.
///
/// Values inside the subset's range map into `[0, 1]`.
pub fn normalize_linear(values: &[f64], subset: &[f64]) -> Result<Vec<f64>> {
    let scale = LinearScale::from_subset(subset)?;
    Ok(values.iter().map(|&x| scale.apply(x)).collect())
}

/// Negative and positive control centers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlWindow {
    pub negative: f64,
    pub positive: f64,
}

impl ControlWindow {
    pub fn new(negative: f64, positive: f64) -> Result<Self> {
        if negative == positive {
            return Err(HtsError::DegenerateRange {
                context: "control normalization".to_string(),
                value: negative,
            });
        }
        Ok(Self { negative, positive })
    }

    /// Window from control replicate values; names are used in errors.
    pub fn from_controls(negative: &[f64], positive: &[f64], names: (&str, &str)) -> Result<Self> {
        let neg = mean(negative).ok_or_else(|| missing_control(names.0))?;
        let pos = mean(positive).ok_or_else(|| missing_control(names.1))?;
        Self::new(neg, pos)
    }

    /// 0 at the negative control, 1 at the positive control.
    #[inline]
    pub fn apply(&self, x: f64) -> f64 {
        (x - self.negative) / (self.positive - self.negative)
    }

    /// Point at fraction `t` of the way from negative to positive.
    #[inline]
    pub fn at_fraction(&self, t: f64) -> f64 {
        self.negative + t * (self.positive - self.negative)
    }
}

fn missing_control(name: &str) -> HtsError {
    HtsError::InsufficientControls { control: name.to_string(), found: 0, required: 1 }
}

/// `(x - mean(neg)) / (mean(pos) - mean(neg))` per value.
pub fn normalize_by_controls(values: &[f64], negative: &[f64], positive: &[f64]) -> Result<Vec<f64>> {
    let window = ControlWindow::from_controls(negative, positive, ("negative", "positive"))?;
    Ok(values.iter().map(|&x| window.apply(x)).collect())
}

/// Elementwise quotient; `None` where the denominator is zero or a side is undefined.
#[inline]
pub fn divide(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !numerator.is_finite() || !denominator.is_finite() {
        None
    } else {
        Some(numerator / denominator)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Division {
    /// NaN where undefined
    pub values: Vec<f64>,
    pub undefined: usize,
}

/// Elementwise [`divide`] over paired replicate slices.
pub fn divide_all(numerator: &[f64], denominator: &[f64]) -> Result<Division> {
    if numerator.len() != denominator.len() {
        return Err(HtsError::ShapeMismatch {
            tag: "denominator".to_string(),
            expected_height: numerator.len(),
            expected_width: 1,
            found_height: denominator.len(),
            found_width: 1,
        });
    }
    let mut undefined = 0;
    let values = numerator
        .iter()
        .zip(denominator)
        .map(|(&n, &d)| {
            divide(n, d).unwrap_or_else(|| {
                undefined += 1;
                f64::NAN
            })
        })
        .collect();
    Ok(Division { values, undefined })
}

/// Blank means needed for donor bleed-through compensation.
///
/// Each pair is `(donor channel mean, acceptor channel mean)` of one blank well type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FretBlanks {
    pub donor: (f64, f64),
    pub acceptor: (f64, f64),
    pub buffer: (f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FretCorrection {
    /// Donor emission seen in the acceptor channel per unit of donor channel signal
    pub bleed_through: f64,
    pub acceptor_blank: f64,
    pub donor_buffer: f64,
}

impl FretCorrection {
    pub fn from_blanks(blanks: &FretBlanks) -> Result<Self> {
        let donor_span = blanks.donor.0 - blanks.buffer.0;
        if donor_span == 0.0 {
            return Err(HtsError::DegenerateRange {
                context: "net FRET donor blank vs buffer".to_string(),
                value: blanks.donor.0,
            });
        }
        Ok(Self {
            bleed_through: (blanks.donor.1 - blanks.buffer.1) / donor_span,
            acceptor_blank: blanks.acceptor.1,
            donor_buffer: blanks.buffer.0,
        })
    }

    /// `acceptor - A_acc - p (donor - B_don)`
    #[inline]
    pub fn apply(&self, donor: f64, acceptor: f64) -> f64 {
        acceptor - self.acceptor_blank - self.bleed_through * (donor - self.donor_buffer)
    }
}
