//! Plate layout: categorical sample / control assignment per well
//!
//! Vocabulary follows the screening convention `<type>_<k>`: `neg_1` is the
//! first negative control, `pos_2` the second positive control, `s_17` the
//! 17th sample. The prefix before the first `_` is the well's general type.
//! Labels are stored lower-cased. Wells without an assignment are empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::coordinate::{all_coordinates, Coordinate};
use super::grid::{PlateDataGrid, WellGrid};
use crate::error::{HtsError, Result};

pub const LAYOUT_TAG: &str = "layout";
pub const GENERAL_TYPE_TAG: &str = "layout_general_type";

const TYPE_DELIMITER: char = '_';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateLayout {
    name: String,
    grid: PlateDataGrid<String>,
    /// Row-major occurrence number of the well's label, starting at 1
    replicate_index: WellGrid<usize>,
    /// Wells per label
    category_counts: BTreeMap<String, usize>,
}

impl PartialEq for PlateLayout {
    fn eq(&self, other: &Self) -> bool {
        self.grid.well_grid(LAYOUT_TAG).ok() == other.grid.well_grid(LAYOUT_TAG).ok()
    }
}

/// General type of a layout label, e.g. `"s_12"` -> `"s"`.
pub fn general_type(label: &str) -> &str {
    label.split(TYPE_DELIMITER).next().unwrap_or(label)
}

impl PlateLayout {
    /// Layout with no assigned wells.
    pub fn empty(height: usize, width: usize) -> Self {
        let mut layout = Self {
            name: String::new(),
            grid: PlateDataGrid::new(height, width),
            replicate_index: WellGrid::new(height, width),
            category_counts: BTreeMap::new(),
        };
        layout.reindex();
        layout
    }

    /// Build from row-major rows of labels; blank labels leave the well unassigned.
    pub fn from_rows(name: &str, rows: Vec<Vec<String>>) -> Result<Self> {
        let rows = WellGrid::from_rows(rows)?;
        let mut layout = Self::empty(rows.height(), rows.width());
        layout.name = name.to_string();
        for (coordinate, values) in rows.iter() {
            if let Some(label) = values.first() {
                layout.put(coordinate, label)?;
            }
        }
        layout.reindex();
        Ok(layout)
    }

    /// Build from `(well label, category)` pairs such as `("A01", "pos_1")`.
    pub fn from_assignments<'a>(
        name: &str,
        height: usize,
        width: usize,
        assignments: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut layout = Self::empty(height, width);
        layout.name = name.to_string();
        for (well, category) in assignments {
            let coordinate = Coordinate::from_label(well, height, width)?;
            layout.put(coordinate, category)?;
        }
        layout.reindex();
        Ok(layout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn height(&self) -> usize {
        self.grid.height()
    }

    pub fn width(&self) -> usize {
        self.grid.width()
    }

    pub fn grid(&self) -> &PlateDataGrid<String> {
        &self.grid
    }

    pub fn is_empty(&self) -> bool {
        self.category_counts.is_empty()
    }

    /// Assign (or reassign) one well.
    pub fn assign(&mut self, coordinate: Coordinate, category: &str) -> Result<()> {
        self.put(coordinate, category)?;
        self.reindex();
        Ok(())
    }

    fn put(&mut self, coordinate: Coordinate, category: &str) -> Result<()> {
        let label = category.trim().to_lowercase();
        if label.is_empty() {
            coordinate.check_bounds(self.height(), self.width())?;
            return Ok(());
        }
        let general = general_type(&label).to_string();
        self.grid.add_data(LAYOUT_TAG, coordinate, label, false)?;
        self.grid.add_data(GENERAL_TYPE_TAG, coordinate, general, false)
    }

    /// Recompute replicate numbering and category counts.
    fn reindex(&mut self) {
        let (height, width) = (self.height(), self.width());
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut replicate_index = WellGrid::new(height, width);
        for coordinate in all_coordinates(height, width) {
            if let Some(label) = self.category(coordinate) {
                let count = counts.entry(label.to_string()).or_insert(0);
                *count += 1;
                // coordinate comes from the grid's own geometry
                let _ = replicate_index.set(coordinate, *count);
            }
        }
        self.category_counts = counts;
        self.replicate_index = replicate_index;
    }

    pub fn category(&self, coordinate: Coordinate) -> Option<&str> {
        self.grid
            .get_values(LAYOUT_TAG, coordinate)
            .ok()
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn general_type(&self, coordinate: Coordinate) -> Option<&str> {
        self.category(coordinate).map(general_type)
    }

    /// Occurrence number of the well's label in row-major order (first is 1).
    pub fn replicate_index(&self, coordinate: Coordinate) -> Option<usize> {
        self.replicate_index.get(coordinate).ok().and_then(|v| v.first().copied())
    }

    /// Wells whose label satisfies `condition`, row-major.
    pub fn wells_where(&self, condition: impl Fn(&str) -> bool) -> Vec<Coordinate> {
        all_coordinates(self.height(), self.width())
            .filter(|&c| self.category(c).is_some_and(&condition))
            .collect()
    }

    /// Wells whose label equals `selector`, or whose general type does.
    pub fn wells_matching(&self, selector: &str) -> Vec<Coordinate> {
        let selector = selector.trim().to_lowercase();
        self.wells_where(|label| label == selector || general_type(label) == selector)
    }

    pub fn wells_matching_any(&self, selectors: &[String]) -> Vec<Coordinate> {
        let selectors: Vec<String> = selectors.iter().map(|s| s.trim().to_lowercase()).collect();
        self.wells_where(|label| {
            selectors.iter().any(|s| label == s || general_type(label) == s)
        })
    }

    /// Number of wells carrying exactly this label.
    pub fn replicate_count(&self, category: &str) -> usize {
        self.category_counts.get(&category.trim().to_lowercase()).copied().unwrap_or(0)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.category_counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Labels in order of first appearance, row-major.
    pub fn categories_in_plate_order(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for coordinate in all_coordinates(self.height(), self.width()) {
            if let Some(label) = self.category(coordinate) {
                if !seen.contains(&label) {
                    seen.push(label);
                }
            }
        }
        seen
    }

    /// Require at least `required` wells matching `selector`.
    pub fn validate_replicates(&self, selector: &str, required: usize) -> Result<()> {
        let found = self.wells_matching(selector).len();
        if found < required {
            return Err(HtsError::InsufficientControls {
                control: selector.to_string(),
                found,
                required,
            });
        }
        Ok(())
    }

    /// Layout of a plate that was turned by 180 degrees.
    pub fn invert(&self) -> Self {
        let mut inverted = Self::empty(self.height(), self.width());
        inverted.name = format!("{}_inverted", self.name);
        if let Ok(grid) = self.grid.well_grid(LAYOUT_TAG) {
            for (coordinate, values) in grid.rotated_180().iter() {
                if let Some(label) = values.first() {
                    // same geometry as self
                    let _ = inverted.put(coordinate, label);
                }
            }
        }
        inverted.reindex();
        inverted
    }

    /// Describe the first difference to `other`, if any.
    pub fn difference(&self, other: &PlateLayout) -> Option<String> {
        if (self.height(), self.width()) != (other.height(), other.width()) {
            return Some(format!(
                "geometry {}x{} vs {}x{}",
                self.height(),
                self.width(),
                other.height(),
                other.width()
            ));
        }
        all_coordinates(self.height(), self.width()).find_map(|c| {
            let (a, b) = (self.category(c), other.category(c));
            (a != b).then(|| format!("well {}: {:?} vs {:?}", c, a, b))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_layout() -> PlateLayout {
        PlateLayout::from_rows(
            "test",
            vec![
                vec!["NEG_1".into(), "s_1".into(), "s_2".into(), "pos_1".into()],
                vec!["neg_1".into(), "s_1".into(), "".into(), "pos_2".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_general_type_and_case_folding() {
        let layout = small_layout();
        assert_eq!(layout.category(Coordinate::new(0, 0)), Some("neg_1"));
        assert_eq!(layout.general_type(Coordinate::new(0, 3)), Some("pos"));
        assert_eq!(layout.category(Coordinate::new(1, 2)), None);
        assert_eq!(general_type("positive_control"), "positive");
        assert_eq!(general_type("buffer"), "buffer");
    }

    #[test]
    fn test_replicate_counts() {
        let layout = small_layout();
        assert_eq!(layout.replicate_count("neg_1"), 2);
        assert_eq!(layout.replicate_count("s_2"), 1);
        assert_eq!(layout.replicate_count("missing"), 0);
        assert_eq!(layout.replicate_index(Coordinate::new(0, 1)), Some(1));
        assert_eq!(layout.replicate_index(Coordinate::new(1, 1)), Some(2));
        assert_eq!(layout.replicate_index(Coordinate::new(1, 2)), None);
    }

    #[test]
    fn test_wells_matching_label_or_type() {
        let layout = small_layout();
        assert_eq!(layout.wells_matching("pos").len(), 2);
        assert_eq!(layout.wells_matching("pos_2"), vec![Coordinate::new(1, 3)]);
        assert_eq!(layout.wells_matching("S").len(), 3);
        assert_eq!(layout.wells_matching_any(&["neg".into(), "pos".into()]).len(), 4);
    }

    #[test]
    fn test_validate_replicates() {
        let layout = small_layout();
        assert!(layout.validate_replicates("neg", 2).is_ok());
        let err = layout.validate_replicates("pos_1", 2).unwrap_err();
        assert!(matches!(err, HtsError::InsufficientControls { found: 1, required: 2, .. }));
    }

    #[test]
    fn test_invert() {
        let layout = small_layout();
        let inverted = layout.invert();
        assert_eq!(inverted.name(), "test_inverted");
        assert_eq!(inverted.category(Coordinate::new(0, 0)), Some("pos_2"));
        assert_eq!(inverted.category(Coordinate::new(1, 3)), Some("neg_1"));
        assert_eq!(inverted.invert(), layout);
    }

    #[test]
    fn test_from_assignments_and_difference() {
        let a = PlateLayout::from_assignments("a", 2, 2, [("A01", "pos"), ("B02", "neg")]).unwrap();
        let mut b = a.clone();
        assert!(a.difference(&b).is_none());
        b.assign(Coordinate::new(0, 1), "s_1").unwrap();
        assert!(a.difference(&b).unwrap().contains("A02"));
        assert_ne!(a, b);
        assert!(PlateLayout::from_assignments("c", 2, 2, [("C01", "pos")]).is_err());
    }

    #[test]
    fn test_categories_in_plate_order() {
        let layout = small_layout();
        assert_eq!(layout.categories_in_plate_order(), vec!["neg_1", "s_1", "s_2", "pos_1", "pos_2"]);
    }
}
