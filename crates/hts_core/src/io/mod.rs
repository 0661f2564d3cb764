//! # Input / Output Adapters
//!
//! Loaders turn an external source into a [`LoadedPlate`]; writers serialize
//! anything that exposes its data as [`TableRow`]s through [`TaggedTable`].
//!
//! Two loader formats are supported:
//! - JSON: a serialized [`LoadedPlate`] (`name`, `height`, `width`,
//!   optional `layout` rows, `readouts` keyed by tag, `metadata`)
//! - CSV: a long table with header `well,tag,value`, one replicate per line
//!
//! Adapter failures surface as the I/O, JSON or CSV variants of
//! [`HtsError`], all reported as `AdapterError`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{HtsError, Result};
use crate::plate::{Coordinate, Plate, PlateLayout, WellGrid};
use crate::run::Run;

/// Plate content as read from an external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedPlate {
    pub name: String,
    pub height: usize,
    pub width: usize,
    /// Row-major layout labels; absent means the run layout is adopted
    #[serde(default)]
    pub layout: Option<Vec<Vec<String>>>,
    /// Row-major values per readout tag, one per well. `null` is an
    /// unmeasured well.
    #[serde(default)]
    pub readouts: BTreeMap<String, Vec<Vec<Option<f64>>>>,
    /// Extra replicates as `(tag, well label, value)`. A `None` value
    /// declares the tag without measuring the well.
    #[serde(default)]
    pub replicates: Vec<(String, String, Option<f64>)>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LoadedPlate {
    pub fn new(name: &str, height: usize, width: usize) -> Self {
        Self {
            name: name.to_string(),
            height,
            width,
            layout: None,
            readouts: BTreeMap::new(),
            replicates: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn into_plate(self) -> Result<Plate> {
        let layout = match self.layout {
            Some(rows) => PlateLayout::from_rows(&format!("{}_layout", self.name), rows)?,
            None => PlateLayout::empty(self.height, self.width),
        };
        if (layout.height(), layout.width()) != (self.height, self.width) {
            return Err(HtsError::GeometryMismatch {
                plate: self.name,
                expected_height: self.height,
                expected_width: self.width,
                found_height: layout.height(),
                found_width: layout.width(),
            });
        }
        let (height, width) = (self.height, self.width);
        let mut channels: BTreeMap<String, WellGrid<f64>> = BTreeMap::new();
        for (tag, rows) in self.readouts {
            let grid = WellGrid::from_measurements(&tag, rows)?;
            if grid.shape() != (height, width) {
                return Err(HtsError::ShapeMismatch {
                    tag,
                    expected_height: height,
                    expected_width: width,
                    found_height: grid.height(),
                    found_width: grid.width(),
                });
            }
            channels.insert(tag, grid);
        }
        for (tag, well, value) in self.replicates {
            let coordinate = Coordinate::from_label(&well, height, width)?;
            let grid = channels.entry(tag).or_insert_with(|| WellGrid::new(height, width));
            if let Some(value) = value.filter(|v| v.is_finite()) {
                grid.push(coordinate, value)?;
            }
        }

        let mut plate = Plate::with_layout(&self.name, layout);
        for (tag, grid) in channels {
            let empty = grid.empty_well_count();
            plate.insert_readout(&tag, grid)?;
            if empty > 0 {
                debug!(plate = %self.name, %tag, empty, "readout has unmeasured wells");
            }
        }
        for (key, value) in &self.metadata {
            plate.set_metadata(key, value);
        }
        Ok(plate)
    }
}

pub trait Loader {
    fn load(&self, path: &Path) -> Result<LoadedPlate>;

    fn load_plate(&self, path: &Path) -> Result<Plate> {
        self.load(path)?.into_plate()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLoader;

impl Loader for JsonLoader {
    fn load(&self, path: &Path) -> Result<LoadedPlate> {
        let text = fs::read_to_string(path)?;
        let plate: LoadedPlate = serde_json::from_str(&text)?;
        debug!(path = %path.display(), plate = %plate.name, "loaded plate JSON");
        Ok(plate)
    }
}

/// Long-format CSV loader. Plate name defaults to the file stem.
#[derive(Debug, Clone)]
pub struct CsvLoader {
    pub height: usize,
    pub width: usize,
}

impl CsvLoader {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    well: String,
    tag: String,
    value: Option<f64>,
}

impl Loader for CsvLoader {
    fn load(&self, path: &Path) -> Result<LoadedPlate> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plate")
            .to_string();
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        let mut plate = LoadedPlate::new(&name, self.height, self.width);
        for record in reader.deserialize() {
            let record: CsvRecord = record?;
            plate.replicates.push((record.tag, record.well, record.value));
        }
        debug!(path = %path.display(), rows = plate.replicates.len(), "loaded plate CSV");
        Ok(plate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    #[default]
    Csv,
    Json,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

/// One replicate of one tag at one well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// Plate name, or the run name for run-level tags
    pub source: String,
    pub tag: String,
    pub well: String,
    pub replicate: usize,
    pub value: CellValue,
}

/// Anything that can be flattened into tagged long-format rows.
pub trait TaggedTable {
    fn table_name(&self) -> &str;
    fn rows(&self) -> Vec<TableRow>;
}

fn push_rows<T, F>(rows: &mut Vec<TableRow>, source: &str, grid: &crate::plate::PlateDataGrid<T>, wrap: F)
where
    F: Fn(&T) -> CellValue,
{
    for (tag, wells) in grid.iter_tags() {
        for flat in wells.flatten() {
            rows.push(TableRow {
                source: source.to_string(),
                tag: tag.to_string(),
                well: flat.coordinate.label(),
                replicate: flat.replicate,
                value: wrap(flat.value),
            });
        }
    }
}

impl TaggedTable for Plate {
    fn table_name(&self) -> &str {
        self.name()
    }

    fn rows(&self) -> Vec<TableRow> {
        let mut rows = Vec::new();
        push_rows(&mut rows, self.name(), self.layout().grid(), |v| CellValue::Text(v.clone()));
        push_rows(&mut rows, self.name(), &**self.readout(), |v| CellValue::Number(*v));
        push_rows(&mut rows, self.name(), self.computed(), |v| CellValue::Number(*v));
        push_rows(&mut rows, self.name(), self.categories(), |v| CellValue::Text(v.clone()));
        push_rows(&mut rows, self.name(), self.data_issues().grid(), |v| CellValue::Flag(*v));
        rows
    }
}

impl TaggedTable for Run {
    fn table_name(&self) -> &str {
        self.name()
    }

    /// Run-level tags first, then every plate in index order.
    fn rows(&self) -> Vec<TableRow> {
        let mut rows = Vec::new();
        push_rows(&mut rows, self.name(), self.data(), |v| CellValue::Number(*v));
        for plate in self.ordered_plates() {
            rows.extend(plate.rows());
        }
        rows
    }
}

pub trait Writer {
    /// Write `table`, returning where it went.
    fn write(&self, table: &dyn TaggedTable, format: TableFormat) -> Result<PathBuf>;
}

pub fn to_csv_string(table: &dyn TaggedTable) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in table.rows() {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| HtsError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| HtsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

pub fn to_json_string(table: &dyn TaggedTable) -> Result<String> {
    Ok(serde_json::to_string_pretty(&table.rows())?)
}

/// Writes `<directory>/<table name>.<ext>`.
#[derive(Debug, Clone)]
pub struct FileWriter {
    directory: PathBuf,
}

impl FileWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }
}

impl Writer for FileWriter {
    fn write(&self, table: &dyn TaggedTable, format: TableFormat) -> Result<PathBuf> {
        let content = match format {
            TableFormat::Csv => to_csv_string(table)?,
            TableFormat::Json => to_json_string(table)?,
        };
        fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(format!("{}.{}", table.table_name(), format.extension()));
        fs::write(&path, content)?;
        info!(path = %path.display(), "wrote table");
        Ok(path)
    }
}

impl Run {
    pub fn write(&self, writer: &dyn Writer, format: TableFormat) -> Result<PathBuf> {
        writer.write(self, format)
    }
}
