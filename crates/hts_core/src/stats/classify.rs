//! Cutoff classification

use serde::{Deserialize, Serialize};

use super::Direction;
use crate::error::{HtsError, Result};

/// Class index of `value`: the number of thresholds it passes.
///
/// A value equal to a threshold passes it (`>=` for higher-is-better,
/// `<=` for lower-is-better). Undefined values have no class.
pub fn classify(value: f64, thresholds: &[f64], direction: Direction) -> Option<usize> {
    if value.is_nan() {
        return None;
    }
    let passed = thresholds
        .iter()
        .filter(|&&t| match direction {
            Direction::HigherIsBetter => value >= t,
            Direction::LowerIsBetter => value <= t,
        })
        .count();
    Some(passed)
}

/// Thresholds with one label per class, labels ordered worst to best.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
    thresholds: Vec<f64>,
    labels: Vec<String>,
    direction: Direction,
}

impl Classifier {
    pub fn new(thresholds: Vec<f64>, labels: Vec<String>, direction: Direction) -> Result<Self> {
        let invalid = |reason: String| HtsError::InvalidTaskConfig {
            method: "classify_by_cutoff".to_string(),
            reason,
        };
        if labels.len() != thresholds.len() + 1 {
            return Err(invalid(format!(
                "{} thresholds need {} labels, got {}",
                thresholds.len(),
                thresholds.len() + 1,
                labels.len()
            )));
        }
        if thresholds.iter().any(|t| !t.is_finite()) {
            return Err(invalid("thresholds must be finite".to_string()));
        }
        Ok(Self { thresholds, labels, direction })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Same labels and direction over different thresholds.
    pub fn with_thresholds(&self, thresholds: Vec<f64>) -> Result<Self> {
        Self::new(thresholds, self.labels.clone(), self.direction)
    }

    pub fn class_of(&self, value: f64) -> Option<usize> {
        classify(value, &self.thresholds, self.direction)
    }

    pub fn label(&self, value: f64) -> Option<&str> {
        self.class_of(value).and_then(|i| self.labels.get(i)).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ControlWindow;

    fn hit_classifier() -> Classifier {
        Classifier::new(
            vec![0.3, 0.7],
            vec!["inactive".into(), "weak".into(), "hit".into()],
            Direction::HigherIsBetter,
        )
        .unwrap()
    }

    #[test]
    fn test_boundary_is_pass_side() {
        let c = hit_classifier();
        assert_eq!(c.label(0.7), Some("hit"));
        assert_eq!(c.label(0.69), Some("weak"));
        assert_eq!(c.label(-5.0), Some("inactive"));
        assert_eq!(c.label(f64::NAN), None);
    }

    #[test]
    fn test_control_derived_threshold_boundary_is_pass_side() {
        let window = ControlWindow::new(100.0, 900.0).unwrap();
        let absolute: Vec<f64> = [0.25, 0.75].iter().map(|&t| window.at_fraction(t)).collect();
        assert_eq!(absolute, vec![300.0, 700.0]);
        let c = hit_classifier().with_thresholds(absolute).unwrap();
        assert_eq!(c.label(300.0), Some("weak"));
        assert_eq!(c.label(299.5), Some("inactive"));
        assert_eq!(c.label(700.0), Some("hit"));

        // lower-is-better assays have the positive control below the negative
        let window = ControlWindow::new(900.0, 100.0).unwrap();
        let cut = window.at_fraction(0.25);
        assert_eq!(cut, 700.0);
        let c = Classifier::new(vec![cut], vec!["inactive".into(), "active".into()], Direction::LowerIsBetter)
            .unwrap();
        assert_eq!(c.label(700.0), Some("active"));
        assert_eq!(c.label(700.5), Some("inactive"));
    }

    #[test]
    fn test_normalized_and_raw_classes_agree() {
        let window = ControlWindow::new(100.0, 900.0).unwrap();
        let fractions = [0.25, 0.75];
        let absolute: Vec<f64> = fractions.iter().map(|&t| window.at_fraction(t)).collect();
        let raw = [100.0, 299.0, 300.0, 301.0, 700.0, 900.0];
        for x in raw {
            let stored = window.apply(x);
            let from_raw = classify(x, &absolute, Direction::HigherIsBetter);
            let from_stored = classify(stored, &fractions, Direction::HigherIsBetter);
            assert_eq!(from_raw, from_stored, "x = {x}");
        }
        assert_eq!(classify(window.apply(300.0), &fractions, Direction::HigherIsBetter), Some(1));
    }

    #[test]
    fn test_lower_is_better() {
        assert_eq!(classify(0.1, &[0.5, 0.2], Direction::LowerIsBetter), Some(2));
        assert_eq!(classify(0.2, &[0.5, 0.2], Direction::LowerIsBetter), Some(2));
        assert_eq!(classify(0.9, &[0.5, 0.2], Direction::LowerIsBetter), Some(0));
    }

    #[test]
    fn test_label_count_validated() {
        let err = Classifier::new(vec![0.5], vec!["only".into()], Direction::HigherIsBetter).unwrap_err();
        assert!(matches!(err, HtsError::InvalidTaskConfig { .. }));
    }
}
