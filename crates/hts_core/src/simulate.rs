//! Seeded synthetic plates
//!
//! Same layout, model and seed always produce the same readouts.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{HtsError, Result};
use crate::plate::{all_coordinates, general_type, Coordinate, Plate, PlateLayout, WellGrid};

/// Positive controls fill the top of the first column, negative controls
/// the top of the last column, and every other well is a numbered sample.
pub fn control_layout(height: usize, width: usize, replicates: usize) -> Result<PlateLayout> {
    if width < 2 || replicates == 0 || replicates > height {
        return Err(HtsError::InvalidLabel {
            label: format!("{height}x{width}"),
            reason: format!("cannot place {replicates} control replicates per column"),
        });
    }
    let mut rows = vec![vec![String::new(); width]; height];
    let mut sample = 0;
    for coordinate in all_coordinates(height, width) {
        let label = if coordinate.row < replicates && coordinate.column == 0 {
            "pos_1".to_string()
        } else if coordinate.row < replicates && coordinate.column == width - 1 {
            "neg_1".to_string()
        } else {
            sample += 1;
            format!("s_{sample}")
        };
        rows[coordinate.row][coordinate.column] = label;
    }
    PlateLayout::from_rows("controls", rows)
}

/// Gaussian signal per general type, plus a linear spatial gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalModel {
    /// (mean, sd)
    pub positive: (f64, f64),
    pub negative: (f64, f64),
    pub sample: (f64, f64),
    /// Additive drift per row and per column
    pub gradient: (f64, f64),
    /// Added on top of the drawn value
    pub outliers: Vec<(Coordinate, f64)>,
}

impl Default for SignalModel {
    fn default() -> Self {
        Self {
            positive: (1000.0, 50.0),
            negative: (100.0, 20.0),
            sample: (500.0, 150.0),
            gradient: (0.0, 0.0),
            outliers: Vec::new(),
        }
    }
}

impl SignalModel {
    fn distribution(&self, label: Option<&str>) -> Result<Normal<f64>> {
        let (mean, sd) = match label.map(general_type) {
            Some("pos") => self.positive,
            Some("neg") => self.negative,
            _ => self.sample,
        };
        Normal::new(mean, sd).map_err(|e| HtsError::DegenerateRange {
            context: format!("signal model: {e}"),
            value: sd,
        })
    }
}

pub struct PlateSimulator {
    layout: PlateLayout,
    model: SignalModel,
    rng: ChaCha8Rng,
}

impl PlateSimulator {
    pub fn new(layout: PlateLayout, model: SignalModel, seed: u64) -> Self {
        Self { layout, model, rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// One replicate per well.
    pub fn readout(&mut self) -> Result<WellGrid<f64>> {
        let (height, width) = (self.layout.height(), self.layout.width());
        let mut grid = WellGrid::new(height, width);
        for coordinate in all_coordinates(height, width) {
            let distribution = self.model.distribution(self.layout.category(coordinate))?;
            let drift = self.model.gradient.0 * coordinate.row as f64 + self.model.gradient.1 * coordinate.column as f64;
            let outlier: f64 = self
                .model
                .outliers
                .iter()
                .filter(|(c, _)| *c == coordinate)
                .map(|(_, offset)| offset)
                .sum();
            grid.push(coordinate, distribution.sample(&mut self.rng) + drift + outlier)?;
        }
        Ok(grid)
    }

    pub fn plate(&mut self, name: &str, tag: &str) -> Result<Plate> {
        let mut plate = Plate::with_layout(name, self.layout.clone());
        let grid = self.readout()?;
        plate.insert_readout(tag, grid)?;
        Ok(plate)
    }
}
