//! Numeric readout channels of one plate

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use super::coordinate::Coordinate;
use super::grid::{PlateDataGrid, WellGrid};
use crate::error::Result;

/// Measured signal per well and replicate, one tag per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readout {
    grid: PlateDataGrid<f64>,
}

impl Readout {
    pub fn new(height: usize, width: usize) -> Self {
        Self { grid: PlateDataGrid::new(height, width) }
    }

    /// Add a channel from row-major rows of single measurements. NaN cells
    /// are left as empty wells.
    pub fn add_channel(&mut self, tag: &str, rows: Vec<Vec<f64>>) -> Result<()> {
        let rows = rows.into_iter().map(|r| r.into_iter().map(Some).collect()).collect();
        let grid = WellGrid::from_measurements(tag, rows)?;
        self.grid.insert_tag(tag, grid, false)
    }

    /// Finite replicate values of `tag` at the given wells.
    pub fn finite_values_at(&self, tag: &str, wells: &[Coordinate]) -> Result<Vec<f64>> {
        let grid = self.grid.well_grid(tag)?;
        let mut values = Vec::new();
        for &coordinate in wells {
            values.extend(grid.get(coordinate)?.iter().copied().filter(|v| v.is_finite()));
        }
        Ok(values)
    }
}

impl Deref for Readout {
    type Target = PlateDataGrid<f64>;

    fn deref(&self) -> &Self::Target {
        &self.grid
    }
}

impl DerefMut for Readout {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.grid
    }
}
