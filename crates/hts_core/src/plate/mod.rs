//! # Plate Data Model
//!
//! A [`Plate`] composes one [`PlateLayout`], raw [`Readout`] channels,
//! derived numeric tags, classification tags and [`DataIssue`] masks, all on
//! one fixed geometry.
//!
//! Tag lookup checks readouts first, then derived tags. Readout tags are
//! never replaced by derived data.

pub mod compute;
pub mod coordinate;
pub mod data_issue;
pub mod grid;
pub mod layout;
pub mod readout;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub use compute::ComputeSummary;
pub use coordinate::{all_coordinates, parse_row_letters, row_letters, Coordinate};
pub use data_issue::DataIssue;
pub use grid::{unflatten, FlatValue, Flatten, PlateDataGrid, WellGrid};
pub use layout::{general_type, PlateLayout};
pub use readout::Readout;

use crate::error::{HtsError, Result};
use crate::gp::GpModel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plate {
    name: String,
    height: usize,
    width: usize,
    layout: PlateLayout,
    readout: Readout,
    computed: PlateDataGrid<f64>,
    categories: PlateDataGrid<String>,
    data_issues: DataIssue,
    metrics: BTreeMap<String, f64>,
    metadata: BTreeMap<String, String>,
    /// Fitted models keyed by source, sample selection and kernel
    #[serde(skip)]
    models: BTreeMap<String, GpModel>,
}

impl Plate {
    /// Plate with an empty layout; it adopts the run layout when added to a run.
    pub fn new(name: &str, height: usize, width: usize) -> Self {
        Self::with_layout(name, PlateLayout::empty(height, width))
    }

    pub fn with_layout(name: &str, layout: PlateLayout) -> Self {
        let (height, width) = (layout.height(), layout.width());
        Self {
            name: name.to_string(),
            height,
            width,
            layout,
            readout: Readout::new(height, width),
            computed: PlateDataGrid::new(height, width),
            categories: PlateDataGrid::new(height, width),
            data_issues: DataIssue::new(height, width),
            metrics: BTreeMap::new(),
            metadata: BTreeMap::new(),
            models: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn layout(&self) -> &PlateLayout {
        &self.layout
    }

    pub fn set_layout(&mut self, layout: PlateLayout) -> Result<()> {
        if (layout.height(), layout.width()) != (self.height, self.width) {
            return Err(HtsError::GeometryMismatch {
                plate: self.name.clone(),
                expected_height: self.height,
                expected_width: self.width,
                found_height: layout.height(),
                found_width: layout.width(),
            });
        }
        self.layout = layout;
        self.models.clear();
        Ok(())
    }

    pub fn readout(&self) -> &Readout {
        &self.readout
    }

    pub fn computed(&self) -> &PlateDataGrid<f64> {
        &self.computed
    }

    pub fn categories(&self) -> &PlateDataGrid<String> {
        &self.categories
    }

    pub fn data_issues(&self) -> &DataIssue {
        &self.data_issues
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    /// Add one raw measurement.
    pub fn add_data(&mut self, tag: &str, coordinate: Coordinate, value: f64, append: bool) -> Result<()> {
        if self.computed.contains_tag(tag) {
            return Err(HtsError::TagConflict { tag: tag.to_string() });
        }
        self.readout.add_data(tag, coordinate, value, append)
    }

    /// Add a raw readout channel from row-major rows.
    pub fn add_readout(&mut self, tag: &str, rows: Vec<Vec<f64>>) -> Result<()> {
        if self.computed.contains_tag(tag) {
            return Err(HtsError::TagConflict { tag: tag.to_string() });
        }
        self.readout.add_channel(tag, rows)
    }

    pub fn insert_readout(&mut self, tag: &str, grid: WellGrid<f64>) -> Result<()> {
        if self.computed.contains_tag(tag) {
            return Err(HtsError::TagConflict { tag: tag.to_string() });
        }
        self.readout.insert_tag(tag, grid, false)
    }

    /// Whether a derived tag can be written under `tag`.
    pub fn check_writable(&self, tag: &str, overwrite: bool) -> Result<()> {
        let taken = self.readout.contains_tag(tag)
            || (!overwrite && (self.computed.contains_tag(tag) || self.categories.contains_tag(tag)));
        if taken {
            return Err(HtsError::TagConflict { tag: tag.to_string() });
        }
        Ok(())
    }

    /// Store a derived numeric tag.
    pub fn add_computed(&mut self, tag: &str, grid: WellGrid<f64>, overwrite: bool) -> Result<()> {
        self.check_writable(tag, overwrite)?;
        self.computed.insert_tag(tag, grid, overwrite)?;
        self.categories.remove_tag(tag);
        self.invalidate_models(tag);
        debug!(plate = %self.name, tag, "stored derived tag");
        Ok(())
    }

    /// Store a derived categorical tag.
    pub fn add_categories(&mut self, tag: &str, grid: WellGrid<String>, overwrite: bool) -> Result<()> {
        self.check_writable(tag, overwrite)?;
        self.categories.insert_tag(tag, grid, overwrite)?;
        self.computed.remove_tag(tag);
        Ok(())
    }

    pub fn add_data_issue(&mut self, tag: &str, wells: &[Coordinate], overwrite: bool) -> Result<()> {
        self.data_issues.add_from_wells(tag, wells, overwrite)
    }

    pub fn add_data_issue_mask(&mut self, tag: &str, mask: WellGrid<bool>, overwrite: bool) -> Result<()> {
        self.data_issues.add_mask(tag, mask, overwrite)
    }

    pub fn set_metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.readout.contains_tag(tag) || self.computed.contains_tag(tag)
    }

    /// Numeric tags: readouts, then derived.
    pub fn tags(&self) -> Vec<&str> {
        self.readout.tags().chain(self.computed.tags()).collect()
    }

    /// Numeric data of a readout or derived tag.
    pub fn values(&self, tag: &str) -> Result<&WellGrid<f64>> {
        if let Ok(grid) = self.readout.well_grid(tag) {
            return Ok(grid);
        }
        self.computed.well_grid(tag).map_err(|_| {
            let known: Vec<String> = self.tags().into_iter().map(str::to_string).collect();
            HtsError::unknown_tag(tag, &known)
        })
    }

    pub fn get_values(&self, tag: &str, coordinate: Coordinate) -> Result<&[f64]> {
        self.values(tag)?.get(coordinate)
    }

    /// Finite replicate values of `tag` at `wells`.
    pub fn values_at(&self, tag: &str, wells: &[Coordinate]) -> Result<Vec<f64>> {
        let grid = self.values(tag)?;
        let mut values = Vec::new();
        for &coordinate in wells {
            values.extend(grid.get(coordinate)?.iter().copied().filter(|v| v.is_finite()));
        }
        Ok(values)
    }

    /// Finite values of `tag` in wells whose label or general type is `selector`.
    pub fn sample_values(&self, tag: &str, selector: &str) -> Result<Vec<f64>> {
        self.values_at(tag, &self.layout.wells_matching(selector))
    }

    /// Wells matching any selector; every well when `selectors` is empty.
    pub fn select_wells(&self, selectors: &[String]) -> Vec<Coordinate> {
        if selectors.is_empty() {
            all_coordinates(self.height, self.width).collect()
        } else {
            self.layout.wells_matching_any(selectors)
        }
    }

    /// Flat finite observations of `tag` at `wells`, row-major then replicate.
    pub fn observations(&self, tag: &str, wells: &[Coordinate]) -> Result<Vec<FlatValue<f64>>> {
        let grid = self.values(tag)?;
        let mut out = Vec::new();
        for &coordinate in wells {
            for (replicate, &value) in grid.get(coordinate)?.iter().enumerate() {
                if value.is_finite() {
                    out.push(FlatValue { coordinate, replicate, value });
                }
            }
        }
        out.sort_by_key(|o| (o.coordinate, o.replicate));
        Ok(out)
    }

    pub fn is_excluded(&self, coordinate: Coordinate) -> bool {
        self.data_issues.is_flagged_any(coordinate)
    }

    pub(crate) fn cached_model(&self, key: &str) -> Option<&GpModel> {
        self.models.get(key)
    }

    pub(crate) fn cache_model(&mut self, key: String, model: GpModel) {
        self.models.insert(key, model);
    }

    pub fn cached_model_count(&self) -> usize {
        self.models.len()
    }

    fn invalidate_models(&mut self, source: &str) {
        let prefix = format!("{source}__");
        self.models.retain(|key, _| !key.starts_with(&prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate() -> Plate {
        let layout = PlateLayout::from_rows(
            "layout",
            vec![
                vec!["neg_1".into(), "s_1".into(), "pos_1".into()],
                vec!["neg_1".into(), "s_2".into(), "pos_1".into()],
            ],
        )
        .unwrap();
        let mut plate = Plate::with_layout("plate_1", layout);
        plate.add_readout("raw", vec![vec![1.0, 5.0, 9.0], vec![3.0, f64::NAN, 11.0]]).unwrap();
        plate
    }

    #[test]
    fn test_lookup_order_and_unknown_tag() {
        let p = plate();
        assert_eq!(p.get_values("raw", Coordinate::new(0, 1)).unwrap(), &[5.0]);
        let err = p.values("missing").unwrap_err();
        assert!(matches!(err, HtsError::UnknownTag { ref known, .. } if known == "raw"));
    }

    #[test]
    fn test_add_computed_refuses_overwrite() {
        let mut p = plate();
        let grid = WellGrid::from_fn(2, 3, |_| 0.0);
        p.add_computed("derived", grid.clone(), false).unwrap();
        assert!(matches!(p.add_computed("derived", grid.clone(), false), Err(HtsError::TagConflict { .. })));
        assert!(p.add_computed("derived", grid.clone(), true).is_ok());
        // raw readouts stay immutable
        assert!(matches!(p.add_computed("raw", grid, true), Err(HtsError::TagConflict { .. })));
    }

    #[test]
    fn test_sample_values_skip_undefined() {
        let p = plate();
        assert_eq!(p.sample_values("raw", "neg").unwrap(), vec![1.0, 3.0]);
        assert_eq!(p.sample_values("raw", "s").unwrap(), vec![5.0]);
        assert_eq!(p.observations("raw", &p.select_wells(&[])).unwrap().len(), 5);
    }

    #[test]
    fn test_set_layout_geometry_checked() {
        let mut p = plate();
        assert!(matches!(
            p.set_layout(PlateLayout::empty(8, 12)),
            Err(HtsError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_data_issue_exclusion() {
        let mut p = plate();
        p.add_data_issue("bubble", &[Coordinate::new(1, 2)], false).unwrap();
        assert!(p.is_excluded(Coordinate::new(1, 2)));
        assert!(!p.is_excluded(Coordinate::new(0, 0)));
    }
}
