//! # Tagged Plate Data Grid
//!
//! `PlateDataGrid<T>` maps a data tag to a [`WellGrid<T>`], a row-major
//! height x width array of wells where every well holds zero or more
//! replicate values. Readouts (`f64`), layouts (`String`) and data-issue
//! masks (`bool`) are all thin wrappers around it.
//!
//! Invariants:
//! - every tag of one grid shares the grid's height and width
//! - an empty well has zero replicates; there is no sentinel value

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::coordinate::{all_coordinates, Coordinate};
use crate::error::{HtsError, Result};

/// One tag's worth of per-well replicate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellGrid<T> {
    height: usize,
    width: usize,
    wells: Vec<Vec<T>>,
}

impl<T> WellGrid<T> {
    pub fn new(height: usize, width: usize) -> Self {
        let mut wells = Vec::with_capacity(height * width);
        wells.resize_with(height * width, Vec::new);
        Self { height, width, wells }
    }

    /// One value per well, produced by `f`.
    pub fn from_fn(height: usize, width: usize, mut f: impl FnMut(Coordinate) -> T) -> Self {
        let wells = all_coordinates(height, width).map(|c| vec![f(c)]).collect();
        Self { height, width, wells }
    }

    /// Build from row-major rows of single values.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(HtsError::ShapeMismatch {
                tag: "<rows>".to_string(),
                expected_height: height,
                expected_width: width,
                found_height: height,
                found_width: bad.len(),
            });
        }
        let wells = rows.into_iter().flatten().map(|v| vec![v]).collect();
        Ok(Self { height, width, wells })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    fn index(&self, coordinate: Coordinate) -> Result<usize> {
        coordinate.check_bounds(self.height, self.width)?;
        Ok(coordinate.linear_index(self.width))
    }

    pub fn get(&self, coordinate: Coordinate) -> Result<&[T]> {
        let idx = self.index(coordinate)?;
        Ok(&self.wells[idx])
    }

    pub fn push(&mut self, coordinate: Coordinate, value: T) -> Result<()> {
        let idx = self.index(coordinate)?;
        self.wells[idx].push(value);
        Ok(())
    }

    /// Replace every replicate at the well with `value`.
    pub fn set(&mut self, coordinate: Coordinate, value: T) -> Result<()> {
        let idx = self.index(coordinate)?;
        self.wells[idx] = vec![value];
        Ok(())
    }

    pub fn set_all(&mut self, coordinate: Coordinate, values: Vec<T>) -> Result<()> {
        let idx = self.index(coordinate)?;
        self.wells[idx] = values;
        Ok(())
    }

    pub fn clear(&mut self, coordinate: Coordinate) -> Result<()> {
        let idx = self.index(coordinate)?;
        self.wells[idx].clear();
        Ok(())
    }

    /// Iterate wells row-major with their replicate values.
    pub fn iter(&self) -> impl Iterator<Item = (Coordinate, &[T])> + '_ {
        all_coordinates(self.height, self.width).zip(self.wells.iter().map(Vec::as_slice))
    }

    pub fn value_count(&self) -> usize {
        self.wells.iter().map(Vec::len).sum()
    }

    pub fn empty_well_count(&self) -> usize {
        self.wells.iter().filter(|w| w.is_empty()).count()
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> WellGrid<U> {
        WellGrid {
            height: self.height,
            width: self.width,
            wells: self.wells.iter().map(|w| w.iter().map(&mut f).collect()).collect(),
        }
    }

    /// Flat view of every stored value, row-major then replicate order.
    pub fn flatten(&self) -> Flatten<'_, T> {
        Flatten { grid: self, well: 0, replicate: 0 }
    }
}

impl WellGrid<f64> {
    /// Row-major single measurements of `tag`. A `None` or non-finite cell
    /// is an unmeasured well and stays empty.
    pub fn from_measurements(tag: &str, rows: Vec<Vec<Option<f64>>>) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(HtsError::ShapeMismatch {
                tag: tag.to_string(),
                expected_height: height,
                expected_width: width,
                found_height: height,
                found_width: bad.len(),
            });
        }
        let wells = rows
            .into_iter()
            .flatten()
            .map(|v| v.filter(|x| x.is_finite()).into_iter().collect())
            .collect();
        Ok(Self { height, width, wells })
    }
}

impl<T: Clone> WellGrid<T> {
    /// Mirror the grid by 180 degrees.
    pub fn rotated_180(&self) -> Self {
        let mut wells = self.wells.clone();
        wells.reverse();
        Self { height: self.height, width: self.width, wells }
    }
}

/// One value of a flattened grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlatValue<V> {
    pub coordinate: Coordinate,
    pub replicate: usize,
    pub value: V,
}

impl<V: Clone> FlatValue<&V> {
    pub fn cloned(&self) -> FlatValue<V> {
        FlatValue { coordinate: self.coordinate, replicate: self.replicate, value: self.value.clone() }
    }
}

/// Lazy iterator over a [`WellGrid`]. Cloning restarts from the clone point.
#[derive(Debug)]
pub struct Flatten<'a, T> {
    grid: &'a WellGrid<T>,
    well: usize,
    replicate: usize,
}

impl<T> Clone for Flatten<'_, T> {
    fn clone(&self) -> Self {
        Self { grid: self.grid, well: self.well, replicate: self.replicate }
    }
}

impl<'a, T> Iterator for Flatten<'a, T> {
    type Item = FlatValue<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.well < self.grid.wells.len() {
            let values = &self.grid.wells[self.well];
            if self.replicate < values.len() {
                let item = FlatValue {
                    coordinate: Coordinate::new(self.well / self.grid.width, self.well % self.grid.width),
                    replicate: self.replicate,
                    value: &values[self.replicate],
                };
                self.replicate += 1;
                return Some(item);
            }
            self.well += 1;
            self.replicate = 0;
        }
        None
    }
}

/// Rebuild a [`WellGrid`] from flat values in any order.
///
/// Replicate indices of each well must be exactly `0..n`.
pub fn unflatten<T>(
    values: impl IntoIterator<Item = FlatValue<T>>,
    height: usize,
    width: usize,
) -> Result<WellGrid<T>> {
    let mut items: Vec<FlatValue<T>> = values.into_iter().collect();
    for item in &items {
        item.coordinate.check_bounds(height, width)?;
    }
    items.sort_by_key(|item| (item.coordinate, item.replicate));

    let mut grid = WellGrid::new(height, width);
    for item in items {
        let idx = item.coordinate.linear_index(width);
        let expected = grid.wells[idx].len();
        if item.replicate != expected {
            return Err(HtsError::ReplicateGap {
                well: item.coordinate.label(),
                expected,
                found: item.replicate,
            });
        }
        grid.wells[idx].push(item.value);
    }
    Ok(grid)
}

/// Tag -> [`WellGrid`] container with a fixed plate geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateDataGrid<T> {
    height: usize,
    width: usize,
    data: BTreeMap<String, WellGrid<T>>,
}

impl<T> PlateDataGrid<T> {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width, data: BTreeMap::new() }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.data.keys().map(String::as_str)
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.data.contains_key(tag)
    }

    pub fn well_grid(&self, tag: &str) -> Result<&WellGrid<T>> {
        self.data.get(tag).ok_or_else(|| HtsError::unknown_tag(tag, self.data.keys()))
    }

    /// Add one value at a well, creating the tag on first use.
    ///
    /// `append` adds a replicate; otherwise the well's replicates are replaced.
    pub fn add_data(&mut self, tag: &str, coordinate: Coordinate, value: T, append: bool) -> Result<()> {
        coordinate.check_bounds(self.height, self.width)?;
        let (height, width) = (self.height, self.width);
        let grid = self
            .data
            .entry(tag.to_string())
            .or_insert_with(|| WellGrid::new(height, width));
        if append {
            grid.push(coordinate, value)
        } else {
            grid.set(coordinate, value)
        }
    }

    /// Declare a whole tag at once. Fails on a shape different from the plate's.
    pub fn insert_tag(&mut self, tag: &str, grid: WellGrid<T>, overwrite: bool) -> Result<()> {
        if grid.shape() != (self.height, self.width) {
            return Err(HtsError::ShapeMismatch {
                tag: tag.to_string(),
                expected_height: self.height,
                expected_width: self.width,
                found_height: grid.height,
                found_width: grid.width,
            });
        }
        if !overwrite && self.data.contains_key(tag) {
            return Err(HtsError::TagConflict { tag: tag.to_string() });
        }
        self.data.insert(tag.to_string(), grid);
        Ok(())
    }

    pub fn remove_tag(&mut self, tag: &str) -> Option<WellGrid<T>> {
        self.data.remove(tag)
    }

    /// All replicate values at a well; empty for a well without data.
    pub fn get_values(&self, tag: &str, coordinate: Coordinate) -> Result<&[T]> {
        self.well_grid(tag)?.get(coordinate)
    }

    pub fn flatten(&self, tag: &str) -> Result<Flatten<'_, T>> {
        Ok(self.well_grid(tag)?.flatten())
    }

    pub fn iter_tags(&self) -> impl Iterator<Item = (&str, &WellGrid<T>)> + '_ {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn c(row: usize, column: usize) -> Coordinate {
        Coordinate::new(row, column)
    }

    #[test]
    fn test_append_and_replace() {
        let mut grid = PlateDataGrid::new(2, 3);
        grid.add_data("raw", c(0, 1), 1.0, true).unwrap();
        grid.add_data("raw", c(0, 1), 2.0, true).unwrap();
        assert_eq!(grid.get_values("raw", c(0, 1)).unwrap(), &[1.0, 2.0]);

        grid.add_data("raw", c(0, 1), 5.0, false).unwrap();
        assert_eq!(grid.get_values("raw", c(0, 1)).unwrap(), &[5.0]);
    }

    #[test]
    fn test_empty_well_is_not_an_error() {
        let mut grid = PlateDataGrid::new(2, 2);
        grid.add_data("raw", c(0, 0), 1.0, true).unwrap();
        assert!(grid.get_values("raw", c(1, 1)).unwrap().is_empty());
        assert!(matches!(grid.get_values("raw", c(2, 0)), Err(HtsError::OutOfRange { .. })));
        assert!(matches!(grid.get_values("other", c(0, 0)), Err(HtsError::UnknownTag { .. })));
    }

    #[test]
    fn test_insert_tag_shape_mismatch() {
        let mut grid: PlateDataGrid<f64> = PlateDataGrid::new(8, 12);
        let err = grid.insert_tag("raw", WellGrid::new(16, 24), false).unwrap_err();
        assert!(matches!(err, HtsError::ShapeMismatch { expected_height: 8, found_height: 16, .. }));
    }

    #[test]
    fn test_insert_tag_conflict() {
        let mut grid: PlateDataGrid<f64> = PlateDataGrid::new(2, 2);
        grid.insert_tag("raw", WellGrid::new(2, 2), false).unwrap();
        assert!(matches!(
            grid.insert_tag("raw", WellGrid::new(2, 2), false),
            Err(HtsError::TagConflict { .. })
        ));
        assert!(grid.insert_tag("raw", WellGrid::new(2, 2), true).is_ok());
    }

    #[test]
    fn test_flatten_is_restartable() {
        let mut grid = WellGrid::new(2, 2);
        grid.push(c(0, 0), 1).unwrap();
        grid.push(c(1, 1), 2).unwrap();
        grid.push(c(1, 1), 3).unwrap();

        let flat = grid.flatten();
        let first: Vec<_> = flat.clone().map(|v| *v.value).collect();
        let second: Vec<_> = flat.map(|v| (v.coordinate, v.replicate)).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![(c(0, 0), 0), (c(1, 1), 0), (c(1, 1), 1)]);
    }

    #[test]
    fn test_unflatten_rejects_replicate_gap() {
        let values = vec![FlatValue { coordinate: c(0, 0), replicate: 1, value: 1.0 }];
        assert!(matches!(unflatten(values, 2, 2), Err(HtsError::ReplicateGap { .. })));
    }

    #[test]
    fn test_unflatten_all_empty() {
        let grid: WellGrid<f64> = WellGrid::new(3, 4);
        let back = unflatten(grid.flatten().map(|v| v.cloned()), 3, 4).unwrap();
        assert_eq!(back, grid);
        assert_eq!(back.empty_well_count(), 12);
    }

    #[test]
    fn test_unmeasured_cells_become_empty_wells() {
        let rows = vec![vec![Some(1.0), None], vec![Some(f64::NAN), Some(4.0)]];
        let grid = WellGrid::from_measurements("raw", rows).unwrap();
        assert_eq!(grid.shape(), (2, 2));
        assert_eq!(grid.empty_well_count(), 2);
        assert!(grid.get(Coordinate::new(0, 1)).unwrap().is_empty());
        assert_eq!(grid.get(Coordinate::new(1, 1)).unwrap(), &[4.0]);

        let err = WellGrid::from_measurements("raw", vec![vec![Some(1.0)], vec![]]).unwrap_err();
        assert!(matches!(err, HtsError::ShapeMismatch { ref tag, found_width: 0, .. } if tag == "raw"));
    }

    #[test]
    fn test_rotated_180() {
        let grid = WellGrid::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
        let rotated = grid.rotated_180();
        assert_eq!(rotated.get(c(0, 0)).unwrap(), &[4]);
        assert_eq!(rotated.get(c(1, 1)).unwrap(), &[1]);
    }

    proptest! {
        #[test]
        fn prop_flatten_unflatten_exact(
            height in 1usize..6,
            width in 1usize..6,
            counts in proptest::collection::vec(0usize..4, 36),
            seed in any::<i32>(),
        ) {
            let mut grid = WellGrid::new(height, width);
            for (i, coordinate) in all_coordinates(height, width).enumerate() {
                for r in 0..counts[i] {
                    grid.push(coordinate, seed.wrapping_add((i * 7 + r) as i32)).unwrap();
                }
            }
            let back = unflatten(grid.flatten().map(|v| v.cloned()), height, width).unwrap();
            prop_assert_eq!(back.value_count(), grid.value_count());
            prop_assert_eq!(back, grid);
        }
    }
}
