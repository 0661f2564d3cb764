//! # Run Orchestration
//!
//! A [`Run`] owns a set of same-geometry plates, a shared layout, a
//! [`Protocol`] and run-level tags produced by cross-plate aggregation.
//!
//! ## State machine
//!
//! ```text
//! Empty --add_plate--> Loaded --merge--> Merged --protocol--> Analyzed
//!                        |                 |
//!                        +----protocol-----+--> Failed (required task failed)
//! ```
//!
//! States only move forward. `Failed` is terminal.
//!
//! Plate-scope tasks run on every plate, in parallel when
//! `run.parallel_plates` is set. A task that fails on any plate leaves every
//! plate as it was before the task.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{ErrorKind, HtsError, Result};
use crate::plate::{all_coordinates, ComputeSummary, Coordinate, Plate, PlateDataGrid, PlateLayout, WellGrid};
use crate::protocol::{Protocol, ProtocolTask, TaskKind, TaskScope};
use crate::stats::descriptive::{mean, median, variance};
use crate::stats::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Empty,
    Loaded,
    Merged,
    Analyzed,
    Failed,
}

impl RunState {
    fn rank(self) -> u8 {
        match self {
            RunState::Empty => 0,
            RunState::Loaded => 1,
            RunState::Merged => 2,
            RunState::Analyzed => 3,
            RunState::Failed => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    #[default]
    Mean,
    Median,
}

/// Cross-plate aggregation of one tag into `target`, `target__n` and
/// `target__variance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub source: String,
    /// Defaults to `source`
    #[serde(default)]
    pub target: Option<String>,
    /// Defaults to `run.default_merge`
    #[serde(default)]
    pub method: Option<MergeMethod>,
    /// Skip wells flagged by any data-issue mask on their plate
    #[serde(default)]
    pub exclude_data_issues: bool,
}

impl MergeRequest {
    pub fn new(source: &str) -> Self {
        Self { source: source.to_string(), target: None, method: None, exclude_data_issues: false }
    }

    pub fn target_tag(&self) -> String {
        self.target.clone().unwrap_or_else(|| self.source.clone())
    }
}

/// Rank wells of a run-level tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankRequest {
    pub source: String,
    /// Defaults to `<source>_rank`
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub sample_types: Vec<String>,
}

impl RankRequest {
    pub fn target_tag(&self) -> String {
        self.target.clone().unwrap_or_else(|| format!("{}_rank", self.source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

/// Outcome of one protocol task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: String,
    pub method: String,
    pub status: TaskStatus,
    pub produced_tags: Vec<String>,
    /// Declared outputs left unset by a failure
    pub unset_tags: Vec<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Plate the failure came from, for plate-scope tasks
    pub failed_plate: Option<String>,
    pub undefined_values: usize,
    /// Metrics keyed `<plate>/<metric>`, or by metric name for run-scope tasks
    pub metrics: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
    pub plates: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    fn failed(task: &ProtocolTask, error: &HtsError, failed_plate: Option<String>) -> Self {
        Self {
            task: task.name.clone(),
            method: task.kind.method().to_string(),
            status: TaskStatus::Failed,
            produced_tags: Vec::new(),
            unset_tags: task.kind.output_tags(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            failed_plate,
            undefined_values: 0,
            metrics: BTreeMap::new(),
            warnings: Vec::new(),
            plates: Vec::new(),
            finished_at: Utc::now(),
        }
    }
}

/// Observer notified after every task.
pub trait TaskListener {
    fn on_task_finished(&mut self, record: &TaskRecord);

    fn on_state_changed(&mut self, _from: RunState, _to: RunState) {}
}

pub struct Run {
    id: Uuid,
    name: String,
    height: usize,
    width: usize,
    layout: PlateLayout,
    protocol: Protocol,
    config: PipelineConfig,
    plates: Vec<Plate>,
    data: PlateDataGrid<f64>,
    state: RunState,
    records: Vec<TaskRecord>,
    listeners: Vec<Box<dyn TaskListener>>,
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("geometry", &(self.height, self.width))
            .field("plates", &self.plates.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Run {
    pub fn create(name: &str, height: usize, width: usize, layout: PlateLayout, protocol: Protocol) -> Result<Self> {
        if (layout.height(), layout.width()) != (height, width) {
            return Err(HtsError::GeometryMismatch {
                plate: layout.name().to_string(),
                expected_height: height,
                expected_width: width,
                found_height: layout.height(),
                found_width: layout.width(),
            });
        }
        let id = Uuid::new_v4();
        info!(run = %name, %id, height, width, tasks = protocol.len(), "created run");
        Ok(Self {
            id,
            name: name.to_string(),
            height,
            width,
            layout,
            protocol,
            config: PipelineConfig::default(),
            plates: Vec::new(),
            data: PlateDataGrid::new(height, width),
            state: RunState::Empty,
            records: Vec::new(),
            listeners: Vec::new(),
        })
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
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

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn plates(&self) -> &[Plate] {
        &self.plates
    }

    pub fn plate(&self, name: &str) -> Option<&Plate> {
        self.plates.iter().find(|p| p.name() == name)
    }

    pub fn plate_mut(&mut self, name: &str) -> Option<&mut Plate> {
        self.plates.iter_mut().find(|p| p.name() == name)
    }

    /// Run-level tags.
    pub fn data(&self) -> &PlateDataGrid<f64> {
        &self.data
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn subscribe(&mut self, listener: Box<dyn TaskListener>) {
        self.listeners.push(listener);
    }

    fn transition(&mut self, to: RunState) -> Result<()> {
        let from = self.state;
        if from == to {
            return Ok(());
        }
        if from == RunState::Failed || to.rank() < from.rank() {
            return Err(HtsError::InvalidState { from, to });
        }
        self.state = to;
        debug!(run = %self.name, ?from, ?to, "state changed");
        for listener in &mut self.listeners {
            listener.on_state_changed(from, to);
        }
        Ok(())
    }

    fn require_plates(&self, to: RunState) -> Result<()> {
        match self.state {
            RunState::Empty | RunState::Failed => Err(HtsError::InvalidState { from: self.state, to }),
            _ => Ok(()),
        }
    }

    /// Add a plate. A plate with an empty layout adopts the run layout; any
    /// other layout must match it well for well.
    pub fn add_plate(&mut self, mut plate: Plate) -> Result<()> {
        if !matches!(self.state, RunState::Empty | RunState::Loaded) {
            return Err(HtsError::InvalidState { from: self.state, to: RunState::Loaded });
        }
        if (plate.height(), plate.width()) != (self.height, self.width) {
            return Err(HtsError::GeometryMismatch {
                plate: plate.name().to_string(),
                expected_height: self.height,
                expected_width: self.width,
                found_height: plate.height(),
                found_width: plate.width(),
            });
        }
        if plate.layout().is_empty() {
            plate.set_layout(self.layout.clone())?;
        } else if let Some(reason) = self.layout.difference(plate.layout()) {
            return Err(HtsError::LayoutMismatch { plate: plate.name().to_string(), reason });
        }
        if self.plate(plate.name()).is_some() {
            return Err(HtsError::LayoutMismatch {
                plate: plate.name().to_string(),
                reason: "a plate with this name is already in the run".to_string(),
            });
        }
        debug!(run = %self.name, plate = %plate.name(), "added plate");
        self.plates.push(plate);
        self.transition(RunState::Loaded)
    }

    /// Plates sorted by their numeric index, see [`plate_indices`].
    pub fn ordered_plates(&self) -> Vec<&Plate> {
        let names: Vec<&str> = self.plates.iter().map(Plate::name).collect();
        let indices = plate_indices(&names);
        let mut order: Vec<usize> = (0..self.plates.len()).collect();
        order.sort_by_key(|&i| (indices[i], i));
        order.into_iter().map(|i| &self.plates[i]).collect()
    }

    pub fn merge_replicates(&mut self, source: &str, target: &str, method: MergeMethod) -> Result<ComputeSummary> {
        let request = MergeRequest {
            source: source.to_string(),
            target: Some(target.to_string()),
            method: Some(method),
            exclude_data_issues: false,
        };
        self.merge(&request)
    }

    /// Aggregate one tag across plates, well by well.
    ///
    /// Wells empty on every plate stay empty. The variance is NaN for a well
    /// with fewer than two values.
    pub fn merge(&mut self, request: &MergeRequest) -> Result<ComputeSummary> {
        self.require_plates(RunState::Merged)?;
        let method = request.method.unwrap_or(self.config.run.default_merge);
        let target = request.target_tag();

        let grids = self
            .plates
            .iter()
            .map(|p| p.values(&request.source).map(|g| (p, g)))
            .collect::<Result<Vec<_>>>()?;

        let mut merged = WellGrid::new(self.height, self.width);
        let mut counts = WellGrid::new(self.height, self.width);
        let mut variances = WellGrid::new(self.height, self.width);
        let mut undefined = 0;
        for coordinate in all_coordinates(self.height, self.width) {
            let mut values = Vec::new();
            for (plate, grid) in &grids {
                if request.exclude_data_issues && plate.is_excluded(coordinate) {
                    continue;
                }
                values.extend(grid.get(coordinate)?.iter().copied().filter(|v| v.is_finite()));
            }
            let center = match method {
                MergeMethod::Mean => mean(&values),
                MergeMethod::Median => median(&values),
            };
            let Some(center) = center else { continue };
            let spread = variance(&values).unwrap_or(f64::NAN);
            if spread.is_nan() {
                undefined += 1;
            }
            merged.push(coordinate, center)?;
            counts.push(coordinate, values.len() as f64)?;
            variances.push(coordinate, spread)?;
        }

        let n_tag = format!("{target}__n");
        let variance_tag = format!("{target}__variance");
        self.data.insert_tag(&target, merged, true)?;
        self.data.insert_tag(&n_tag, counts, true)?;
        self.data.insert_tag(&variance_tag, variances, true)?;
        info!(run = %self.name, source = %request.source, %target, ?method, plates = grids.len(), "merged replicates");

        if self.state == RunState::Loaded {
            self.transition(RunState::Merged)?;
        }
        Ok(ComputeSummary {
            produced_tags: vec![target, n_tag, variance_tag],
            undefined_values: undefined,
            ..ComputeSummary::default()
        })
    }

    /// Rank wells by the mean of a run-level tag; rank 1 is the best value.
    ///
    /// Ties keep row-major well order. Wells without a value stay unranked.
    pub fn rank_samples(&mut self, request: &RankRequest) -> Result<ComputeSummary> {
        self.require_plates(self.state)?;
        let grid = self.data.well_grid(&request.source)?;
        let wells = if request.sample_types.is_empty() {
            all_coordinates(self.height, self.width).collect()
        } else {
            self.layout.wells_matching_any(&request.sample_types)
        };

        let mut scored: Vec<(Coordinate, f64)> = Vec::new();
        for coordinate in wells {
            if let Some(value) = mean(grid.get(coordinate)?) {
                scored.push((coordinate, value));
            }
        }
        scored.sort_by_key(|(c, _)| *c);
        scored.sort_by(|a, b| match request.direction {
            Direction::HigherIsBetter => b.1.total_cmp(&a.1),
            Direction::LowerIsBetter => a.1.total_cmp(&b.1),
        });

        let mut ranks = WellGrid::new(self.height, self.width);
        for (rank, (coordinate, _)) in scored.iter().enumerate() {
            ranks.push(*coordinate, (rank + 1) as f64)?;
        }
        let target = request.target_tag();
        self.data.insert_tag(&target, ranks, true)?;
        debug!(run = %self.name, %target, ranked = scored.len(), "ranked samples");
        Ok(ComputeSummary { produced_tags: vec![target], ..ComputeSummary::default() })
    }

    /// Finite values of a plate tag, from wells matching `sample_types` on
    /// the named plates. Empty selections select everything.
    pub fn filter_values(&self, tag: &str, sample_types: &[String], plates: &[String]) -> Result<Vec<f64>> {
        let mut values = Vec::new();
        for plate in &self.plates {
            if !plates.is_empty() && !plates.iter().any(|p| p == plate.name()) {
                continue;
            }
            values.extend(plate.values_at(tag, &plate.select_wells(sample_types))?);
        }
        Ok(values)
    }

    /// Execute one task and record its outcome.
    pub fn run_task(&mut self, task: &ProtocolTask) -> TaskRecord {
        info!(run = %self.name, task = %task.name, method = task.kind.method(), "task started");
        let record = match self.require_plates(RunState::Analyzed) {
            Err(e) => TaskRecord::failed(task, &e, None),
            Ok(()) => match task.kind.scope() {
                TaskScope::Plate => self.run_plate_task(task),
                TaskScope::Run => self.run_run_task(task),
            },
        };
        match (&record.error, record.succeeded()) {
            (Some(error), false) => {
                warn!(run = %self.name, task = %task.name, error = %error, plate = ?record.failed_plate, "task failed")
            }
            _ => info!(
                run = %self.name,
                task = %task.name,
                produced = record.produced_tags.len(),
                undefined = record.undefined_values,
                "task finished"
            ),
        }
        for listener in &mut self.listeners {
            listener.on_task_finished(&record);
        }
        self.records.push(record.clone());
        record
    }

    fn run_plate_task(&mut self, task: &ProtocolTask) -> TaskRecord {
        let config = &self.config;
        let apply = |plate: &Plate| {
            let mut working = plate.clone();
            let outcome = apply_to_plate(&task.kind, &mut working, config);
            (plate.name().to_string(), outcome.map(|summary| (working, summary)))
        };
        let outcomes: Vec<(String, Result<(Plate, ComputeSummary)>)> = if config.run.parallel_plates {
            self.plates.par_iter().map(apply).collect()
        } else {
            self.plates.iter().map(apply).collect()
        };

        let mut updated = Vec::with_capacity(outcomes.len());
        let mut record = TaskRecord {
            task: task.name.clone(),
            method: task.kind.method().to_string(),
            status: TaskStatus::Succeeded,
            produced_tags: Vec::new(),
            unset_tags: Vec::new(),
            error: None,
            error_kind: None,
            failed_plate: None,
            undefined_values: 0,
            metrics: BTreeMap::new(),
            warnings: Vec::new(),
            plates: Vec::new(),
            finished_at: Utc::now(),
        };
        for (name, outcome) in outcomes {
            match outcome {
                Ok((plate, summary)) => {
                    for tag in summary.produced_tags {
                        if !record.produced_tags.contains(&tag) {
                            record.produced_tags.push(tag);
                        }
                    }
                    record.undefined_values += summary.undefined_values;
                    for (metric, value) in summary.metrics {
                        record.metrics.insert(format!("{name}/{metric}"), value);
                    }
                    record.warnings.extend(summary.warnings.into_iter().map(|w| format!("{name}: {w}")));
                    record.plates.push(name);
                    updated.push(plate);
                }
                Err(e) => return TaskRecord::failed(task, &e, Some(name)),
            }
        }
        self.plates = updated;
        record.finished_at = Utc::now();
        record
    }

    fn run_run_task(&mut self, task: &ProtocolTask) -> TaskRecord {
        let outcome = match &task.kind {
            TaskKind::MergeReplicates(request) => self.merge(request),
            TaskKind::Rank(request) => self.rank_samples(request),
            other => Err(HtsError::InvalidTaskConfig {
                method: other.method().to_string(),
                reason: "not a run-scope task".to_string(),
            }),
        };
        match outcome {
            Ok(summary) => TaskRecord {
                task: task.name.clone(),
                method: task.kind.method().to_string(),
                status: TaskStatus::Succeeded,
                produced_tags: summary.produced_tags,
                unset_tags: Vec::new(),
                error: None,
                error_kind: None,
                failed_plate: None,
                undefined_values: summary.undefined_values,
                metrics: summary.metrics,
                warnings: summary.warnings,
                plates: self.plates.iter().map(|p| p.name().to_string()).collect(),
                finished_at: Utc::now(),
            },
            Err(e) => TaskRecord::failed(task, &e, None),
        }
    }

    /// Execute the protocol in order.
    ///
    /// A failed required task moves the run to `Failed` and stops; later
    /// tasks never execute. Failed optional tasks are recorded and skipped.
    pub fn run_protocol(&mut self) -> Result<RunState> {
        self.require_plates(RunState::Analyzed)?;
        let tasks = self.protocol.tasks().to_vec();
        info!(run = %self.name, protocol = %self.protocol.name(), tasks = tasks.len(), "protocol started");
        for task in &tasks {
            let record = self.run_task(task);
            if !record.succeeded() && task.required {
                warn!(run = %self.name, task = %task.name, "required task failed, stopping protocol");
                self.transition(RunState::Failed)?;
                return Ok(self.state);
            }
        }
        self.transition(RunState::Analyzed)?;
        info!(run = %self.name, "protocol finished");
        Ok(self.state)
    }
}

fn apply_to_plate(kind: &TaskKind, plate: &mut Plate, config: &PipelineConfig) -> Result<ComputeSummary> {
    match kind {
        TaskKind::NormalizeLinear(r) => plate.normalize_linear(r, true),
        TaskKind::NormalizeByControls(r) => plate.normalize_by_controls(r, config, true),
        TaskKind::Divide(r) => plate.divide(r, true),
        TaskKind::NetFret(r) => plate.net_fret(r, true),
        TaskKind::Ssmd(r) => plate.ssmd(r, true),
        TaskKind::ZFactor(r) => plate.z_factor(r, config),
        TaskKind::Significance(r) => plate.significance(r, config, true),
        TaskKind::ClassifyByCutoff(r) => plate.classify(r, true),
        TaskKind::CellViability(r) => plate.cell_viability(r, true),
        TaskKind::GaussianProcess(r) => plate.gp_predict(r, config, true),
        TaskKind::GpCrossValidation(r) => plate.gp_cross_validation(r, config, true),
        TaskKind::MergeReplicates(_) | TaskKind::Rank(_) => Err(HtsError::InvalidTaskConfig {
            method: kind.method().to_string(),
            reason: "not a plate-scope task".to_string(),
        }),
    }
}

/// Sort key per plate name.
///
/// Names are split into digit runs; the first run position whose values are
/// distinct across all names becomes the index. Without such a position the
/// insertion order is used.
pub fn plate_indices(names: &[&str]) -> Vec<u64> {
    let tokens: Vec<Vec<u64>> = names
        .iter()
        .map(|name| {
            name.split(|c: char| !c.is_ascii_digit())
                .filter(|t| !t.is_empty())
                .filter_map(|t| t.parse().ok())
                .collect()
        })
        .collect();
    let depth = tokens.iter().map(Vec::len).min().unwrap_or(0);
    for position in 0..depth {
        let mut values: Vec<u64> = tokens.iter().map(|t| t[position]).collect();
        values.sort_unstable();
        values.dedup();
        if values.len() == names.len() {
            return tokens.iter().map(|t| t[position]).collect();
        }
    }
    (0..names.len() as u64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::compute::{ClassifyRequest, ControlReference, LinearNormalization};
    use std::sync::{Arc, Mutex};

    fn layout() -> PlateLayout {
        PlateLayout::from_rows(
            "layout",
            vec![
                vec!["neg".into(), "s_1".into(), "pos".into()],
                vec!["neg".into(), "s_2".into(), "pos".into()],
            ],
        )
        .unwrap()
    }

    fn plate(name: &str, offset: f64) -> Plate {
        let mut plate = Plate::new(name, 2, 3);
        plate
            .add_readout("raw", vec![vec![1.0 + offset, 5.0 + offset, 9.0], vec![2.0, 6.0 + offset, 10.0]])
            .unwrap();
        plate
    }

    fn run() -> Run {
        let mut run = Run::create("run", 2, 3, layout(), Protocol::empty("p")).unwrap();
        run.add_plate(plate("plate_1", 0.0)).unwrap();
        run.add_plate(plate("plate_2", 2.0)).unwrap();
        run
    }

    #[test]
    fn test_add_plate_adopts_layout_and_checks_geometry() {
        let mut run = run();
        assert_eq!(run.state(), RunState::Loaded);
        assert_eq!(run.plates()[0].layout().category(Coordinate::new(0, 2)), Some("pos"));

        let err = run.add_plate(Plate::new("wide", 2, 4)).unwrap_err();
        assert!(matches!(err, HtsError::GeometryMismatch { .. }));

        let mut other = layout();
        other.assign(Coordinate::new(0, 0), "pos").unwrap();
        let err = run.add_plate(Plate::with_layout("odd", other)).unwrap_err();
        assert!(matches!(err, HtsError::LayoutMismatch { .. }));
    }

    #[test]
    fn test_merge_mean_and_variance() {
        let mut run = run();
        let summary = run.merge_replicates("raw", "raw", MergeMethod::Mean).unwrap();
        assert_eq!(summary.produced_tags, vec!["raw", "raw__n", "raw__variance"]);
        assert_eq!(run.state(), RunState::Merged);
        let c = Coordinate::new(0, 0);
        assert_eq!(run.data().get_values("raw", c).unwrap(), &[2.0]);
        assert_eq!(run.data().get_values("raw__n", c).unwrap(), &[2.0]);
        assert_eq!(run.data().get_values("raw__variance", c).unwrap(), &[2.0]);
        // no going back to loading plates
        assert!(matches!(run.add_plate(plate("plate_3", 0.0)), Err(HtsError::InvalidState { .. })));
    }

    #[test]
    fn test_merge_excludes_flagged_wells() {
        let mut run = run();
        run.plate_mut("plate_2").unwrap().add_data_issue("bubble", &[Coordinate::new(0, 0)], false).unwrap();
        let mut request = MergeRequest::new("raw");
        request.exclude_data_issues = true;
        let summary = run.merge(&request).unwrap();
        assert_eq!(summary.undefined_values, 1);
        let c = Coordinate::new(0, 0);
        assert_eq!(run.data().get_values("raw", c).unwrap(), &[1.0]);
        assert!(run.data().get_values("raw__variance", c).unwrap()[0].is_nan());
    }

    #[test]
    fn test_merge_requires_plates() {
        let mut run = Run::create("run", 2, 3, layout(), Protocol::empty("p")).unwrap();
        let err = run.merge(&MergeRequest::new("raw")).unwrap_err();
        assert!(matches!(err, HtsError::InvalidState { from: RunState::Empty, .. }));
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let mut run = run();
        run.merge(&MergeRequest::new("raw")).unwrap();
        let request = RankRequest {
            source: "raw".to_string(),
            target: None,
            direction: Direction::HigherIsBetter,
            sample_types: vec![],
        };
        run.rank_samples(&request).unwrap();
        // (0,2) = 9 and (1,2) = 10 on both plates
        assert_eq!(run.data().get_values("raw_rank", Coordinate::new(1, 2)).unwrap(), &[1.0]);
        assert_eq!(run.data().get_values("raw_rank", Coordinate::new(0, 2)).unwrap(), &[2.0]);
    }

    #[test]
    fn test_filter_values_by_sample_and_plate() {
        let run = run();
        let pos = run.filter_values("raw", &["pos".to_string()], &[]).unwrap();
        assert_eq!(pos, vec![9.0, 10.0, 9.0, 10.0]);
        let neg = run.filter_values("raw", &["neg".to_string()], &["plate_2".to_string()]).unwrap();
        assert_eq!(neg, vec![3.0, 2.0]);
        assert!(run.filter_values("missing", &[], &[]).is_err());
    }

    #[test]
    fn test_plate_indices() {
        assert_eq!(plate_indices(&["run7_p3", "run7_p1", "run7_p2"]), vec![3, 1, 2]);
        assert_eq!(plate_indices(&["a", "b"]), vec![0, 1]);
        assert_eq!(plate_indices(&["10", "9"]), vec![10, 9]);
    }

    #[test]
    fn test_ordered_plates() {
        let mut run = Run::create("run", 2, 3, layout(), Protocol::empty("p")).unwrap();
        run.add_plate(plate("plate_10", 0.0)).unwrap();
        run.add_plate(plate("plate_2", 0.0)).unwrap();
        let names: Vec<&str> = run.ordered_plates().into_iter().map(Plate::name).collect();
        assert_eq!(names, vec!["plate_2", "plate_10"]);
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl TaskListener for Recorder {
        fn on_task_finished(&mut self, record: &TaskRecord) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(record.task.clone());
            }
        }
    }

    #[test]
    fn test_required_failure_stops_protocol() {
        let tasks = vec![
            ProtocolTask::new(
                "scale",
                TaskKind::NormalizeLinear(LinearNormalization {
                    source: "raw".into(),
                    target: "scaled".into(),
                    sample_types: vec![],
                }),
            ),
            ProtocolTask::new(
                "classify",
                TaskKind::ClassifyByCutoff(ClassifyRequest {
                    source: "scaled".into(),
                    target: "class".into(),
                    thresholds: vec![0.5],
                    labels: vec!["low".into(), "high".into()],
                    direction: Direction::HigherIsBetter,
                    control_reference: Some(ControlReference {
                        negative: "absent".into(),
                        positive: "pos".into(),
                    }),
                }),
            )
            .required(),
            ProtocolTask::new("merge", TaskKind::MergeReplicates(MergeRequest::new("scaled"))),
        ];
        let mut run = Run::create("run", 2, 3, layout(), Protocol::new("p", tasks)).unwrap();
        run.add_plate(plate("plate_1", 0.0)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        run.subscribe(Box::new(Recorder(seen.clone())));

        assert_eq!(run.run_protocol().unwrap(), RunState::Failed);
        assert_eq!(run.records().len(), 2);
        let failed = &run.records()[1];
        assert_eq!(failed.error_kind, Some(ErrorKind::InsufficientControlsError));
        assert_eq!(failed.unset_tags, vec!["class"]);
        assert_eq!(failed.failed_plate.as_deref(), Some("plate_1"));
        assert_eq!(*seen.lock().unwrap(), vec!["scale", "classify"]);
        assert!(!run.plates()[0].categories().contains_tag("class"));
        assert!(matches!(run.run_protocol(), Err(HtsError::InvalidState { .. })));
    }

    #[test]
    fn test_failed_task_leaves_plates_unchanged() {
        let mut run = run();
        let task = ProtocolTask::new(
            "divide",
            TaskKind::Divide(crate::plate::compute::DivisionRequest {
                numerator: "raw".into(),
                denominator: "missing".into(),
                target: "ratio".into(),
            }),
        );
        let record = run.run_task(&task);
        assert!(!record.succeeded());
        assert_eq!(record.error_kind, Some(ErrorKind::UnknownTagError));
        assert!(run.plates().iter().all(|p| !p.has_tag("ratio")));
    }
}
