//! End-to-end scenarios across plates, protocols and runs

use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use crate::gp::{CvScheme, KernelKind};
use crate::plate::compute::{GpCrossValidation, ZFactorRequest};
use crate::plate::{all_coordinates, Coordinate, Plate, PlateLayout, WellGrid};
use crate::protocol::{Protocol, ProtocolTask, TaskKind};
use crate::run::{MergeMethod, Run, RunState};
use crate::simulate::{control_layout, PlateSimulator, SignalModel};
use crate::stats::Estimator;

fn z_factor_of_seed(seed: u64) -> f64 {
    let layout = control_layout(8, 12, 2).unwrap();
    let mut plate = PlateSimulator::new(layout, SignalModel::default(), seed).plate("plate_1", "raw").unwrap();
    let request = ZFactorRequest {
        source: "raw".into(),
        positive: "pos_1".into(),
        negative: "neg_1".into(),
        estimator: Estimator::Standard,
        gate: Some(0.5),
        metric: "z_factor".into(),
    };
    let summary = plate.z_factor(&request, &PipelineConfig::default()).unwrap();
    assert_eq!(summary.metrics.get("z_factor").copied(), plate.metric("z_factor"));
    plate.metric("z_factor").unwrap()
}

#[test]
fn test_simulated_plate_z_factor() {
    let z = z_factor_of_seed(42);
    assert!((-1.0..=1.0).contains(&z), "z = {z}");
    assert_eq!(z, z_factor_of_seed(42));
}

#[test]
fn test_three_plates_merge_over_available_wells() {
    let layout = control_layout(8, 12, 2).unwrap();
    let mut run = Run::create("merge", 8, 12, layout, Protocol::empty("none")).unwrap();
    let missing = Coordinate::new(3, 4);
    for (index, offset) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        let mut grid = WellGrid::from_fn(8, 12, |_| offset);
        if index == 2 {
            grid.clear(missing).unwrap();
        }
        let mut plate = Plate::new(&format!("plate_{}", index + 1), 8, 12);
        plate.insert_readout("raw", grid).unwrap();
        run.add_plate(plate).unwrap();
    }
    let third = &run.plates()[2];
    assert!(third.get_values("raw", missing).unwrap().is_empty());
    assert_eq!(third.values("raw").unwrap().empty_well_count(), 1);

    run.merge_replicates("raw", "raw_merged", MergeMethod::Mean).unwrap();
    assert_eq!(run.state(), RunState::Merged);

    assert_eq!(run.data().get_values("raw_merged", missing).unwrap(), &[1.5]);
    assert_eq!(run.data().get_values("raw_merged__n", missing).unwrap(), &[2.0]);
    let full = Coordinate::new(0, 0);
    assert_eq!(run.data().get_values("raw_merged", full).unwrap(), &[2.0]);
    assert_eq!(run.data().get_values("raw_merged__n", full).unwrap(), &[3.0]);
    assert_eq!(run.data().get_values("raw_merged__variance", full).unwrap(), &[1.0]);
}

#[test]
fn test_gp_cross_validation_finds_corrupted_well() {
    let corrupted = Coordinate::new(4, 5);
    let model = SignalModel {
        sample: (200.0, 1.0),
        positive: (200.0, 1.0),
        negative: (200.0, 1.0),
        gradient: (6.0, 3.0),
        outliers: vec![(corrupted, 300.0)],
    };
    let layout = control_layout(8, 12, 2).unwrap();
    let plate = PlateSimulator::new(layout.clone(), model, 7).plate("plate_1", "raw").unwrap();

    let task = ProtocolTask::new(
        "spatial",
        TaskKind::GpCrossValidation(GpCrossValidation {
            source: "raw".into(),
            sample_types: vec![],
            kernel: KernelKind::Matern52,
            scheme: CvScheme::LeaveOneOut,
            refit: false,
            target: None,
        }),
    );
    let mut run = Run::create("gp", 8, 12, layout, Protocol::new("gp", vec![task])).unwrap();
    run.add_plate(plate).unwrap();
    assert_eq!(run.run_protocol().unwrap(), RunState::Analyzed);

    let plate = &run.plates()[0];
    let errors = plate.values("raw_cv_error").unwrap();
    let worst = all_coordinates(8, 12)
        .max_by(|a, b| {
            let ea = errors.get(*a).unwrap()[0].abs();
            let eb = errors.get(*b).unwrap()[0].abs();
            ea.total_cmp(&eb)
        })
        .unwrap();
    assert_eq!(worst, corrupted);
    let record = &run.records()[0];
    assert!(record.metrics.contains_key("plate_1/raw_cv_max_abs_error"));
}

#[test]
fn test_protocol_stops_at_failed_required_task() {
    let yaml = r#"
name: screen
tasks:
  - name: normalize
    method: normalize_linear
    config: { source: raw, target: raw_scaled }
  - name: classify
    method: classify_by_cutoff
    required: true
    config:
      source: raw_scaled
      target: hit_class
      thresholds: [0.5]
      labels: [inactive, active]
      control_reference: { negative: vehicle, positive: reference_compound }
  - name: rank
    method: rank
    config: { source: raw_scaled }
"#;
    let protocol = Protocol::from_yaml_str(yaml).unwrap();
    let layout = control_layout(8, 12, 2).unwrap();
    let mut run = Run::create("screen", 8, 12, layout.clone(), protocol).unwrap();
    run.add_plate(PlateSimulator::new(layout, SignalModel::default(), 3).plate("plate_1", "raw").unwrap())
        .unwrap();

    assert_eq!(run.run_protocol().unwrap(), RunState::Failed);
    let tasks: Vec<&str> = run.records().iter().map(|r| r.task.as_str()).collect();
    assert_eq!(tasks, vec!["normalize", "classify"]);
    assert!(run.records()[0].succeeded());
    assert_eq!(run.records()[1].error_kind, Some(ErrorKind::InsufficientControlsError));
    assert!(run.plates()[0].has_tag("raw_scaled"));
    assert!(!run.data().contains_tag("raw_scaled_rank"));
}

#[test]
fn test_empty_layout_plates_adopt_run_layout() {
    let layout = PlateLayout::from_rows("pair", vec![vec!["neg".into(), "pos".into()]]).unwrap();
    let mut run = Run::create("adopt", 1, 2, layout, Protocol::empty("none")).unwrap();
    run.add_plate(Plate::new("plate_1", 1, 2)).unwrap();
    assert_eq!(run.plates()[0].layout().category(Coordinate::new(0, 1)), Some("pos"));
}
