//! Per-well data-quality masks
//!
//! A `true` entry marks a well whose readouts should not be trusted under
//! that mask's criterion.

use serde::{Deserialize, Serialize};

use super::coordinate::{all_coordinates, Coordinate};
use super::grid::{PlateDataGrid, WellGrid};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIssue {
    grid: PlateDataGrid<bool>,
}

impl DataIssue {
    pub fn new(height: usize, width: usize) -> Self {
        Self { grid: PlateDataGrid::new(height, width) }
    }

    pub fn grid(&self) -> &PlateDataGrid<bool> {
        &self.grid
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.grid.tags()
    }

    /// Store a mask that flags exactly the listed wells.
    pub fn add_from_wells(&mut self, tag: &str, wells: &[Coordinate], overwrite: bool) -> Result<()> {
        let (height, width) = (self.grid.height(), self.grid.width());
        let mut mask = WellGrid::from_fn(height, width, |_| false);
        for &coordinate in wells {
            mask.set(coordinate, true)?;
        }
        self.grid.insert_tag(tag, mask, overwrite)
    }

    pub fn add_mask(&mut self, tag: &str, mask: WellGrid<bool>, overwrite: bool) -> Result<()> {
        self.grid.insert_tag(tag, mask, overwrite)
    }

    pub fn is_flagged(&self, tag: &str, coordinate: Coordinate) -> Result<bool> {
        Ok(self.grid.get_values(tag, coordinate)?.iter().any(|&b| b))
    }

    /// Flagged under any mask.
    pub fn is_flagged_any(&self, coordinate: Coordinate) -> bool {
        self.grid
            .iter_tags()
            .any(|(_, mask)| mask.get(coordinate).map_or(false, |v| v.iter().any(|&b| b)))
    }

    pub fn flagged_wells(&self, tag: &str) -> Result<Vec<Coordinate>> {
        let mut wells = Vec::new();
        for coordinate in all_coordinates(self.grid.height(), self.grid.width()) {
            if self.is_flagged(tag, coordinate)? {
                wells.push(coordinate);
            }
        }
        Ok(wells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_from_wells() {
        let mut issues = DataIssue::new(4, 6);
        let wells = [Coordinate::new(0, 0), Coordinate::new(3, 5)];
        issues.add_from_wells("edge", &wells, false).unwrap();

        assert!(issues.is_flagged("edge", Coordinate::new(3, 5)).unwrap());
        assert!(!issues.is_flagged("edge", Coordinate::new(1, 1)).unwrap());
        assert!(issues.is_flagged_any(Coordinate::new(0, 0)));
        assert_eq!(issues.flagged_wells("edge").unwrap(), wells.to_vec());
        assert!(issues.is_flagged("other", Coordinate::new(0, 0)).is_err());
    }

    #[test]
    fn test_mask_out_of_range_well() {
        let mut issues = DataIssue::new(2, 2);
        assert!(issues.add_from_wells("x", &[Coordinate::new(2, 0)], false).is_err());
        assert!(issues.is_empty());
    }
}
