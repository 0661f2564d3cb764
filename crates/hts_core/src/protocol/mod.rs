//! # Protocol
//!
//! An ordered, immutable list of analysis tasks. Descriptors
//! `{name, method, tags, config, required}` are resolved into the closed
//! [`TaskKind`] set when the protocol is loaded, so an unknown method or a
//! malformed configuration fails before any plate is touched.
//!
//! ```yaml
//! name: primary_screen
//! tasks:
//!   - method: normalize_linear
//!     config: { source: raw, target: raw_linear }
//!   - method: z_factor
//!     tags: [qc]
//!     required: true
//!     config: { source: raw, positive: pos, negative: neg }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HtsError, Result};
use crate::plate::compute::{
    CellViability, ClassifyRequest, ControlNormalization, DivisionRequest, GpCrossValidation, GpPrediction,
    LinearNormalization, NetFret, SignificanceRequest, SsmdRequest, ZFactorRequest,
};
use crate::run::{MergeRequest, RankRequest};

/// Every supported analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "config", rename_all = "snake_case")]
pub enum TaskKind {
    NormalizeLinear(LinearNormalization),
    NormalizeByControls(ControlNormalization),
    Divide(DivisionRequest),
    NetFret(NetFret),
    Ssmd(SsmdRequest),
    ZFactor(ZFactorRequest),
    Significance(SignificanceRequest),
    ClassifyByCutoff(ClassifyRequest),
    CellViability(CellViability),
    GaussianProcess(GpPrediction),
    GpCrossValidation(GpCrossValidation),
    MergeReplicates(MergeRequest),
    Rank(RankRequest),
}

/// Where a task's inputs and outputs live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    /// Runs once per plate, on plate tags
    Plate,
    /// Runs once, on run-level tags
    Run,
}

impl TaskKind {
    pub const METHODS: [&'static str; 13] = [
        "normalize_linear",
        "normalize_by_controls",
        "divide",
        "net_fret",
        "ssmd",
        "z_factor",
        "significance",
        "classify_by_cutoff",
        "cell_viability",
        "gaussian_process",
        "gp_cross_validation",
        "merge_replicates",
        "rank",
    ];

    pub fn method(&self) -> &'static str {
        match self {
            TaskKind::NormalizeLinear(_) => "normalize_linear",
            TaskKind::NormalizeByControls(_) => "normalize_by_controls",
            TaskKind::Divide(_) => "divide",
            TaskKind::NetFret(_) => "net_fret",
            TaskKind::Ssmd(_) => "ssmd",
            TaskKind::ZFactor(_) => "z_factor",
            TaskKind::Significance(_) => "significance",
            TaskKind::ClassifyByCutoff(_) => "classify_by_cutoff",
            TaskKind::CellViability(_) => "cell_viability",
            TaskKind::GaussianProcess(_) => "gaussian_process",
            TaskKind::GpCrossValidation(_) => "gp_cross_validation",
            TaskKind::MergeReplicates(_) => "merge_replicates",
            TaskKind::Rank(_) => "rank",
        }
    }

    pub fn scope(&self) -> TaskScope {
        match self {
            TaskKind::MergeReplicates(_) | TaskKind::Rank(_) => TaskScope::Run,
            _ => TaskScope::Plate,
        }
    }

    /// Resolve a method name and its configuration mapping.
    ///
    /// The mapping is kept apart from the method name, so request fields
    /// that are themselves called `method` survive.
    pub fn from_config(method: &str, config: Map<String, Value>) -> Result<Self> {
        if !Self::METHODS.contains(&method) {
            return Err(HtsError::UnknownTaskType { method: method.to_string() });
        }
        let mut tagged = Map::new();
        tagged.insert("method".to_string(), Value::String(method.to_string()));
        tagged.insert("config".to_string(), Value::Object(config));
        serde_json::from_value(Value::Object(tagged)).map_err(|e| HtsError::InvalidTaskConfig {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Tags this task writes when it succeeds.
    pub fn output_tags(&self) -> Vec<String> {
        match self {
            TaskKind::NormalizeLinear(r) => vec![r.target.clone()],
            TaskKind::NormalizeByControls(r) => vec![r.target_tag(), r.pvalue_tag()],
            TaskKind::Divide(r) => vec![r.target.clone()],
            TaskKind::NetFret(r) => vec![r.target.clone()],
            TaskKind::Ssmd(r) => vec![r.target.clone()],
            TaskKind::ZFactor(_) => Vec::new(),
            TaskKind::Significance(r) => {
                vec![r.target.clone().unwrap_or_else(|| format!("{}_pvalue", r.source))]
            }
            TaskKind::ClassifyByCutoff(r) => vec![r.target.clone()],
            TaskKind::CellViability(r) => {
                vec![format!("{}_zscore", r.key), format!("{}_pvalue", r.key), r.key.clone()]
            }
            TaskKind::GaussianProcess(r) => {
                let mut tags = vec![r.tag("best", "predicted_mean"), r.tag("best", "predicted_sd")];
                for kernel in &r.kernels {
                    tags.push(r.tag(kernel.name(), "predicted_mean"));
                    tags.push(r.tag(kernel.name(), "predicted_sd"));
                }
                tags
            }
            TaskKind::GpCrossValidation(r) => {
                let prefix = r.prefix();
                vec![
                    format!("{prefix}_predicted"),
                    format!("{prefix}_error"),
                    format!("{prefix}_standardized_error"),
                ]
            }
            TaskKind::MergeReplicates(r) => {
                let target = r.target_tag();
                vec![target.clone(), format!("{target}__n"), format!("{target}__variance")]
            }
            TaskKind::Rank(r) => vec![r.target_tag()],
        }
    }
}

/// Raw task entry as it appears in a protocol document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    pub method: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolTask {
    pub name: String,
    pub kind: TaskKind,
    pub tags: Vec<String>,
    /// A failure stops the run
    pub required: bool,
}

impl ProtocolTask {
    pub fn new(name: &str, kind: TaskKind) -> Self {
        Self { name: name.to_string(), kind, tags: Vec::new(), required: false }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn from_descriptor(descriptor: TaskDescriptor) -> Result<Self> {
        let kind = TaskKind::from_config(&descriptor.method, descriptor.config)?;
        Ok(Self {
            name: descriptor.name.unwrap_or_else(|| descriptor.method.clone()),
            kind,
            tags: descriptor.tags,
            required: descriptor.required,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProtocolDocument {
    name: String,
    #[serde(default)]
    tasks: Vec<TaskDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Protocol {
    name: String,
    tasks: Vec<ProtocolTask>,
}

impl Protocol {
    pub fn new(name: &str, tasks: Vec<ProtocolTask>) -> Self {
        Self { name: name.to_string(), tasks }
    }

    pub fn empty(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn from_descriptors(name: &str, descriptors: Vec<TaskDescriptor>) -> Result<Self> {
        let tasks = descriptors
            .into_iter()
            .map(ProtocolTask::from_descriptor)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, tasks))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: ProtocolDocument = serde_json::from_str(json)?;
        Self::from_descriptors(&doc.name, doc.tasks)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let doc: ProtocolDocument = serde_yaml::from_str(yaml)?;
        Self::from_descriptors(&doc.name, doc.tasks)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[ProtocolTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, name: &str) -> Option<&ProtocolTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Tasks carrying `tag`, in declared order.
    pub fn tasks_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a ProtocolTask> + 'a {
        self.tasks.iter().filter(move |t| t.tags.iter().any(|x| x == tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::MergeMethod;
    use crate::stats::{PValueMethod, Tail};

    const YAML: &str = r#"
name: primary_screen
tasks:
  - method: normalize_linear
    config: { source: raw, target: raw_linear }
  - name: plate_quality
    method: z_factor
    tags: [qc]
    required: true
    config: { source: raw, positive: pos, negative: neg, estimator: robust }
  - method: merge_replicates
    config: { source: raw_linear, method: median }
"#;

    #[test]
    fn test_load_yaml_protocol() {
        let protocol = Protocol::from_yaml_str(YAML).unwrap();
        assert_eq!(protocol.name(), "primary_screen");
        assert_eq!(protocol.len(), 3);
        assert_eq!(protocol.tasks()[0].name, "normalize_linear");
        let qc: Vec<_> = protocol.tasks_with_tag("qc").map(|t| t.name.as_str()).collect();
        assert_eq!(qc, vec!["plate_quality"]);
        assert!(protocol.task("plate_quality").unwrap().required);
        match &protocol.tasks()[2].kind {
            TaskKind::MergeReplicates(r) => assert_eq!(r.method, Some(MergeMethod::Median)),
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[test]
    fn test_inner_method_fields_survive_load() {
        let json = r#"{"name": "p", "tasks": [
            {"method": "significance", "config": {"source": "raw", "null": "neg", "method": "empirical", "tail": "less"}},
            {"method": "merge_replicates", "config": {"source": "raw", "method": "median"}}
        ]}"#;
        let protocol = Protocol::from_json_str(json).unwrap();
        match &protocol.tasks()[0].kind {
            TaskKind::Significance(r) => {
                assert_eq!(r.method, PValueMethod::Empirical);
                assert_eq!(r.tail, Tail::Less);
            }
            other => panic!("unexpected task {other:?}"),
        }
        match &protocol.tasks()[1].kind {
            TaskKind::MergeReplicates(r) => assert_eq!(r.method, Some(MergeMethod::Median)),
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[test]
    fn test_task_kind_serializes_as_descriptor() {
        let kind = TaskKind::MergeReplicates(MergeRequest {
            source: "raw".into(),
            target: None,
            method: Some(MergeMethod::Median),
            exclude_data_issues: true,
        });
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["method"], "merge_replicates");
        assert_eq!(value["config"]["method"], "median");
        let config = value["config"].as_object().cloned().unwrap();
        assert_eq!(TaskKind::from_config("merge_replicates", config).unwrap(), kind);
    }

    #[test]
    fn test_unknown_method_rejected_at_load() {
        let json = r#"{"name": "p", "tasks": [{"method": "normalize"}, {"method": "teleport"}]}"#;
        let err = Protocol::from_json_str(json).unwrap_err();
        assert!(matches!(err, HtsError::UnknownTaskType { ref method } if method == "normalize"));
    }

    #[test]
    fn test_bad_config_rejected_at_load() {
        let json = r#"{"name": "p", "tasks": [{"method": "divide", "config": {"numerator": "a"}}]}"#;
        let err = Protocol::from_json_str(json).unwrap_err();
        assert!(matches!(err, HtsError::InvalidTaskConfig { .. }));
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in TaskKind::METHODS {
            let err = TaskKind::from_config(method, Map::new());
            // empty configs are rejected for every method, but never as unknown
            assert!(!matches!(err, Err(HtsError::UnknownTaskType { .. })), "{method}");
        }
    }

    #[test]
    fn test_output_tags() {
        let kind = TaskKind::from_config(
            "gaussian_process",
            serde_json::from_str(r#"{"source": "raw", "kernels": ["matern52"]}"#).unwrap(),
        )
        .unwrap();
        assert_eq!(kind.scope(), TaskScope::Plate);
        assert_eq!(
            kind.output_tags(),
            vec!["best__predicted_mean", "best__predicted_sd", "matern52__predicted_mean", "matern52__predicted_sd"]
        );
    }
}
