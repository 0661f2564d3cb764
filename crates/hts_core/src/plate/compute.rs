//! Per-plate computation entry points
//!
//! Each entry point reads tags from the plate, calls into [`crate::stats`] or
//! [`crate::gp`], and writes its results back as derived tags. All target
//! tags are checked before anything is written, so a failed computation
//! leaves the plate unchanged.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::coordinate::Coordinate;
use super::grid::WellGrid;
use super::Plate;
use crate::config::PipelineConfig;
use crate::error::{HtsError, Result};
use crate::gp::{cross_validate, CvScheme, GpModel, KernelKind};
use crate::stats::descriptive::mean;
use crate::stats::quality::{ssmd_grade, z_factor_grade, z_factor_with_scale, Estimator};
use crate::stats::significance::{fit_normal, p_values, upper_tail_of_abs, z_scores, PValueMethod, Tail};
use crate::stats::{divide, ssmd, Classifier, ControlWindow, Direction, FretBlanks, FretCorrection, LinearScale};

/// What one computation produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeSummary {
    pub produced_tags: Vec<String>,
    /// Values stored as undefined (NaN, or a well left without a class)
    pub undefined_values: usize,
    pub metrics: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
}

impl ComputeSummary {
    fn produced(mut self, tag: &str) -> Self {
        self.produced_tags.push(tag.to_string());
        self
    }

    pub fn merge(&mut self, other: ComputeSummary) {
        self.produced_tags.extend(other.produced_tags);
        self.undefined_values += other.undefined_values;
        self.metrics.extend(other.metrics);
        self.warnings.extend(other.warnings);
    }
}

fn count_undefined(grid: &WellGrid<f64>) -> usize {
    grid.flatten().filter(|v| !v.value.is_finite()).count()
}

fn default_kernel() -> KernelKind {
    KernelKind::Matern32
}

fn default_kernels() -> Vec<KernelKind> {
    vec![KernelKind::Matern32]
}

/// Min/max scaling of a tag, fitted on selected sample types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearNormalization {
    pub source: String,
    pub target: String,
    /// Layout selectors for the min/max subset; empty selects every well
    #[serde(default)]
    pub sample_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlNormalization {
    pub source: String,
    /// Defaults to `<source>_normalized_by_controls`
    #[serde(default)]
    pub target: Option<String>,
    pub negative: String,
    pub positive: String,
    /// Predict control levels per well with a GP instead of plate means
    #[serde(default)]
    pub local: bool,
    #[serde(default = "default_kernel")]
    pub kernel: KernelKind,
}

impl ControlNormalization {
    pub fn target_tag(&self) -> String {
        self.target.clone().unwrap_or_else(|| format!("{}_normalized_by_controls", self.source))
    }

    pub fn pvalue_tag(&self) -> String {
        format!("{}_pvalue_vs_neg_control", self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisionRequest {
    pub numerator: String,
    pub denominator: String,
    pub target: String,
}

fn default_donor_blank() -> String {
    "fluorophore_donor".to_string()
}

fn default_acceptor_blank() -> String {
    "fluorophore_acceptor".to_string()
}

fn default_buffer() -> String {
    "buffer".to_string()
}

fn default_net_fret() -> String {
    "net_fret".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetFret {
    pub donor_channel: String,
    pub acceptor_channel: String,
    #[serde(default = "default_donor_blank")]
    pub donor_blank: String,
    #[serde(default = "default_acceptor_blank")]
    pub acceptor_blank: String,
    #[serde(default = "default_buffer")]
    pub buffer: String,
    #[serde(default = "default_net_fret")]
    pub target: String,
}

/// Per-well SSMD of each layout label's group against a reference control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsmdRequest {
    pub source: String,
    pub target: String,
    pub reference: String,
    /// When set, the SSMD of this control against the reference is stored as plate metric `target`
    #[serde(default)]
    pub positive: Option<String>,
    #[serde(default)]
    pub direction: Direction,
}

fn default_z_factor_metric() -> String {
    "z_factor".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZFactorRequest {
    pub source: String,
    pub positive: String,
    pub negative: String,
    #[serde(default)]
    pub estimator: Estimator,
    /// Minimum acceptable value; falling below it is recorded as a warning
    #[serde(default)]
    pub gate: Option<f64>,
    #[serde(default = "default_z_factor_metric")]
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceRequest {
    pub source: String,
    /// Defaults to `<source>_pvalue`
    #[serde(default)]
    pub target: Option<String>,
    /// Layout selector of the null distribution wells
    pub null: String,
    #[serde(default)]
    pub method: PValueMethod,
    #[serde(default)]
    pub tail: Tail,
    /// Falls back to [`crate::config::StatsConfig::min_null_size`]
    #[serde(default)]
    pub min_null_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReference {
    pub negative: String,
    pub positive: String,
}

/// Class labels from thresholds on each well's mean value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub source: String,
    pub target: String,
    pub thresholds: Vec<f64>,
    /// Worst to best, one more than thresholds
    pub labels: Vec<String>,
    #[serde(default)]
    pub direction: Direction,
    /// Read thresholds as fractions of the negative-to-positive control window
    #[serde(default)]
    pub control_reference: Option<ControlReference>,
}

fn default_viability_key() -> String {
    "realtime-glo".to_string()
}

fn default_viability_threshold() -> f64 {
    0.05
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellViability {
    pub source: String,
    /// Layout selector of wells with normal growth
    pub normal: String,
    #[serde(default = "default_viability_key")]
    pub key: String,
    #[serde(default = "default_viability_threshold")]
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpPrediction {
    pub source: String,
    /// Training wells; empty selects every well
    #[serde(default)]
    pub sample_types: Vec<String>,
    #[serde(default = "default_kernels")]
    pub kernels: Vec<KernelKind>,
    /// Prefix of the predicted tags
    #[serde(default)]
    pub target: Option<String>,
}

impl GpPrediction {
    pub fn tag(&self, model: &str, field: &str) -> String {
        match &self.target {
            Some(prefix) => format!("{prefix}__{model}__{field}"),
            None => format!("{model}__{field}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpCrossValidation {
    pub source: String,
    #[serde(default)]
    pub sample_types: Vec<String>,
    #[serde(default = "default_kernel")]
    pub kernel: KernelKind,
    #[serde(default)]
    pub scheme: CvScheme,
    #[serde(default)]
    pub refit: bool,
    /// Defaults to `<source>_cv`
    #[serde(default)]
    pub target: Option<String>,
}

impl GpCrossValidation {
    pub fn prefix(&self) -> String {
        self.target.clone().unwrap_or_else(|| format!("{}_cv", self.source))
    }
}

impl Plate {
    fn check_all_writable(&self, tags: &[String], overwrite: bool) -> Result<()> {
        tags.iter().try_for_each(|t| self.check_writable(t, overwrite))
    }

    fn store(&mut self, tag: &str, grid: WellGrid<f64>, overwrite: bool, summary: &mut ComputeSummary) -> Result<()> {
        summary.undefined_values += count_undefined(&grid);
        self.add_computed(tag, grid, overwrite)?;
        summary.produced_tags.push(tag.to_string());
        Ok(())
    }

    pub fn normalize_linear(&mut self, request: &LinearNormalization, overwrite: bool) -> Result<ComputeSummary> {
        self.check_writable(&request.target, overwrite)?;
        let subset = self.values_at(&request.source, &self.select_wells(&request.sample_types))?;
        let scale = LinearScale::from_subset(&subset)?;
        let grid = self.values(&request.source)?.map(|&x| scale.apply(x));

        let mut summary = ComputeSummary::default();
        summary.metrics.insert(format!("{}_min", request.target), scale.min);
        summary.metrics.insert(format!("{}_max", request.target), scale.max);
        self.store(&request.target, grid, overwrite, &mut summary)?;
        Ok(summary)
    }

    pub fn normalize_by_controls(
        &mut self,
        request: &ControlNormalization,
        config: &PipelineConfig,
        overwrite: bool,
    ) -> Result<ComputeSummary> {
        let target = request.target_tag();
        let pvalue_tag = request.pvalue_tag();
        self.check_all_writable(&[target.clone(), pvalue_tag.clone()], overwrite)?;
        self.layout.validate_replicates(&request.negative, 1)?;
        self.layout.validate_replicates(&request.positive, 1)?;

        let source = self.values(&request.source)?.clone();
        let mut summary = ComputeSummary::default();

        let (normalized, pvalues) = if request.local {
            let (neg_mean, neg_sd) = self
                .fitted_model(&request.source, &[request.negative.clone()], request.kernel, config)?
                .predict_plate();
            let (pos_mean, _) = self
                .fitted_model(&request.source, &[request.positive.clone()], request.kernel, config)?
                .predict_plate();
            let normalized = map_with_well(&source, |c, x| {
                let n = first(&neg_mean, c);
                let p = first(&pos_mean, c);
                if n == p {
                    f64::NAN
                } else {
                    (x - n) / (p - n)
                }
            });
            let pvalues = map_with_well(&source, |c, x| lower_tail(x, first(&neg_mean, c), first(&neg_sd, c)));
            (normalized, Some(pvalues))
        } else {
            let neg = self.sample_values(&request.source, &request.negative)?;
            let pos = self.sample_values(&request.source, &request.positive)?;
            let window = ControlWindow::from_controls(&neg, &pos, (&request.negative, &request.positive))?;
            debug!(
                plate = %self.name,
                negative = window.negative,
                positive = window.positive,
                "normalizing by plate-wide control means"
            );
            let normalized = source.map(|&x| window.apply(x));
            let pvalues = match fit_normal(&neg, &request.negative) {
                Ok(null) => Some(source.map(|&x| if x.is_finite() { null.cdf(x) } else { f64::NAN })),
                Err(e) => {
                    warn!(plate = %self.name, error = %e, "skipping p-values vs negative control");
                    summary.warnings.push(format!("{pvalue_tag} not computed: {e}"));
                    None
                }
            };
            summary.metrics.insert(format!("{target}_negative_mean"), window.negative);
            summary.metrics.insert(format!("{target}_positive_mean"), window.positive);
            (normalized, pvalues)
        };

        self.store(&target, normalized, overwrite, &mut summary)?;
        if let Some(pvalues) = pvalues {
            self.store(&pvalue_tag, pvalues, overwrite, &mut summary)?;
        }
        Ok(summary)
    }

    pub fn divide(&mut self, request: &DivisionRequest, overwrite: bool) -> Result<ComputeSummary> {
        self.check_writable(&request.target, overwrite)?;
        let numerator = self.values(&request.numerator)?;
        let denominator = self.values(&request.denominator)?;

        let mut result = WellGrid::new(self.height, self.width);
        let mut undefined = 0;
        for (coordinate, num) in numerator.iter() {
            let den = denominator.get(coordinate)?;
            check_paired(&request.denominator, coordinate, num, den)?;
            let values: Vec<f64> = num
                .iter()
                .zip(den)
                .map(|(&n, &d)| divide(n, d).unwrap_or(f64::NAN))
                .collect();
            undefined += values.iter().filter(|v| v.is_nan()).count();
            result.set_all(coordinate, values)?;
        }
        if undefined > 0 {
            warn!(plate = %self.name, target = %request.target, undefined, "division produced undefined values");
        }

        let mut summary = ComputeSummary::default();
        self.store(&request.target, result, overwrite, &mut summary)?;
        Ok(summary)
    }

    pub fn net_fret(&mut self, request: &NetFret, overwrite: bool) -> Result<ComputeSummary> {
        self.check_writable(&request.target, overwrite)?;
        let blank = |plate: &Plate, selector: &str| -> Result<(f64, f64)> {
            let wells = plate.layout.wells_where(|label| label == selector.to_lowercase());
            let donor = mean(&plate.values_at(&request.donor_channel, &wells)?);
            let acceptor = mean(&plate.values_at(&request.acceptor_channel, &wells)?);
            donor.zip(acceptor).ok_or_else(|| HtsError::InsufficientControls {
                control: selector.to_string(),
                found: wells.len(),
                required: 1,
            })
        };
        let blanks = FretBlanks {
            donor: blank(self, &request.donor_blank)?,
            acceptor: blank(self, &request.acceptor_blank)?,
            buffer: blank(self, &request.buffer)?,
        };
        let correction = FretCorrection::from_blanks(&blanks)?;

        let donor = self.values(&request.donor_channel)?;
        let acceptor = self.values(&request.acceptor_channel)?;
        let mut result = WellGrid::new(self.height, self.width);
        for (coordinate, acc) in acceptor.iter() {
            let don = donor.get(coordinate)?;
            check_paired(&request.donor_channel, coordinate, acc, don)?;
            let values = acc.iter().zip(don).map(|(&a, &d)| correction.apply(d, a)).collect();
            result.set_all(coordinate, values)?;
        }

        let mut summary = ComputeSummary::default();
        summary.metrics.insert(format!("{}_bleed_through", request.target), correction.bleed_through);
        self.store(&request.target, result, overwrite, &mut summary)?;
        Ok(summary)
    }

    pub fn ssmd(&mut self, request: &SsmdRequest, overwrite: bool) -> Result<ComputeSummary> {
        self.check_writable(&request.target, overwrite)?;
        let reference = self.sample_values(&request.source, &request.reference)?;
        if reference.is_empty() {
            return Err(HtsError::InsufficientControls {
                control: request.reference.clone(),
                found: 0,
                required: 1,
            });
        }

        let mut per_label: BTreeMap<String, f64> = BTreeMap::new();
        for label in self.layout.categories_in_plate_order() {
            let wells = self.layout.wells_where(|l| l == label);
            let group = self.values_at(&request.source, &wells)?;
            let value = if group.is_empty() {
                f64::NAN
            } else {
                ssmd(&group, &reference, request.direction)?
            };
            per_label.insert(label.to_string(), value);
        }

        let mut result = WellGrid::new(self.height, self.width);
        for (label, value) in &per_label {
            for coordinate in self.layout.wells_where(|l| l == label) {
                result.set(coordinate, *value)?;
            }
        }

        let mut summary = ComputeSummary::default();
        if let Some(positive) = &request.positive {
            let group = self.sample_values(&request.source, positive)?;
            let plate_ssmd = ssmd(&group, &reference, request.direction)?;
            summary.metrics.insert(request.target.clone(), plate_ssmd);
            self.set_metric(&request.target, plate_ssmd);
            debug!(
                plate = %self.name,
                ssmd = plate_ssmd,
                grade = ?ssmd_grade(plate_ssmd, request.direction),
                "plate SSMD"
            );
        }
        self.store(&request.target, result, overwrite, &mut summary)?;
        Ok(summary)
    }

    /// Plate-level z-factor; no per-well output.
    pub fn z_factor(&mut self, request: &ZFactorRequest, config: &PipelineConfig) -> Result<ComputeSummary> {
        let pos = self.sample_values(&request.source, &request.positive)?;
        let neg = self.sample_values(&request.source, &request.negative)?;
        let z = z_factor_with_scale(&pos, &neg, request.estimator, config.stats.robust_mad_scale)?;
        self.set_metric(&request.metric, z);

        let mut summary = ComputeSummary::default();
        summary.metrics.insert(request.metric.clone(), z);
        if let Some(gate) = request.gate {
            if z < gate {
                warn!(plate = %self.name, z, gate, "z-factor below gate");
                summary.warnings.push(format!("{}: {} = {:.3} below gate {}", self.name, request.metric, z, gate));
            }
        }
        debug!(plate = %self.name, z, grade = ?z_factor_grade(z), "z-factor");
        Ok(summary)
    }

    pub fn significance(
        &mut self,
        request: &SignificanceRequest,
        config: &PipelineConfig,
        overwrite: bool,
    ) -> Result<ComputeSummary> {
        let target = request.target.clone().unwrap_or_else(|| format!("{}_pvalue", request.source));
        self.check_writable(&target, overwrite)?;
        let null = self.sample_values(&request.source, &request.null)?;
        let min_null_size = request.min_null_size.unwrap_or(config.stats.min_null_size);

        let source = self.values(&request.source)?;
        let flat: Vec<f64> = source.flatten().map(|v| *v.value).collect();
        let p = p_values(&flat, &null, request.method, request.tail, min_null_size)?;
        let mut cursor = p.into_iter();
        let grid = source.map(|_| cursor.next().unwrap_or(f64::NAN));

        let mut summary = ComputeSummary::default();
        self.store(&target, grid, overwrite, &mut summary)?;
        Ok(summary)
    }

    pub fn classify(&mut self, request: &ClassifyRequest, overwrite: bool) -> Result<ComputeSummary> {
        self.check_writable(&request.target, overwrite)?;
        let mut classifier =
            Classifier::new(request.thresholds.clone(), request.labels.clone(), request.direction)?;

        if let Some(reference) = &request.control_reference {
            let neg = self.sample_values(&request.source, &reference.negative)?;
            let pos = self.sample_values(&request.source, &reference.positive)?;
            let window = ControlWindow::from_controls(&neg, &pos, (&reference.negative, &reference.positive))?;
            let absolute = request.thresholds.iter().map(|&t| window.at_fraction(t)).collect();
            classifier = classifier.with_thresholds(absolute)?;
        }

        let source = self.values(&request.source)?;
        let mut result = WellGrid::new(self.height, self.width);
        let mut undefined = 0;
        for (coordinate, values) in source.iter() {
            if values.is_empty() {
                continue;
            }
            match mean(values).and_then(|m| classifier.label(m)) {
                Some(label) => result.set(coordinate, label.to_string())?,
                None => undefined += 1,
            }
        }

        self.add_categories(&request.target, result, overwrite)?;
        Ok(ComputeSummary { undefined_values: undefined, ..ComputeSummary::default() }.produced(&request.target))
    }

    /// z-scores against normal-growth wells, with a mask of wells whose
    /// one-sided p-value is at or below `threshold`.
    pub fn cell_viability(&mut self, request: &CellViability, overwrite: bool) -> Result<ComputeSummary> {
        let z_tag = format!("{}_zscore", request.key);
        let p_tag = format!("{}_pvalue", request.key);
        self.check_all_writable(&[z_tag.clone(), p_tag.clone()], overwrite)?;
        if !overwrite && self.data_issues.tags().any(|t| t == request.key) {
            return Err(HtsError::TagConflict { tag: request.key.clone() });
        }

        let normal = self.sample_values(&request.source, &request.normal)?;
        let source = self.values(&request.source)?.clone();
        let flat: Vec<f64> = source.flatten().map(|v| *v.value).collect();
        let z = z_scores(&flat, &normal)?;
        let mut cursor = z.into_iter();
        let z_grid = source.map(|_| cursor.next().unwrap_or(f64::NAN));
        let p_grid = z_grid.map(|&z| upper_tail_of_abs(z));

        let flagged: Vec<Coordinate> = p_grid
            .iter()
            .filter(|(_, p)| p.iter().any(|&p| p <= request.threshold))
            .map(|(c, _)| c)
            .collect();

        let mut summary = ComputeSummary::default();
        summary.metrics.insert(format!("{}_flagged_wells", request.key), flagged.len() as f64);
        self.store(&z_tag, z_grid, overwrite, &mut summary)?;
        self.store(&p_tag, p_grid, overwrite, &mut summary)?;
        self.add_data_issue(&request.key, &flagged, overwrite)?;
        summary.produced_tags.push(request.key.clone());
        Ok(summary)
    }

    fn model_key(source: &str, sample_types: &[String], kernel: KernelKind) -> String {
        let samples = if sample_types.is_empty() { "all".to_string() } else { sample_types.join("+") };
        format!("{source}__{samples}__{}", kernel.name())
    }

    /// Cached model of `source` over the selected wells, fitted on first use.
    pub fn fitted_model(
        &mut self,
        source: &str,
        sample_types: &[String],
        kernel: KernelKind,
        config: &PipelineConfig,
    ) -> Result<&GpModel> {
        let key = Self::model_key(source, sample_types, kernel);
        if self.cached_model(&key).is_none() {
            let observations = self.observations(source, &self.select_wells(sample_types))?;
            let model = GpModel::fit(observations, self.height, self.width, kernel, &config.gp)?;
            self.cache_model(key.clone(), model);
        }
        self.cached_model(&key)
            .ok_or_else(|| HtsError::ModelFit(format!("model {key} missing from cache")))
    }

    /// Predicted mean and sd per kernel, plus the lowest-BIC model as `best`.
    pub fn gp_predict(
        &mut self,
        request: &GpPrediction,
        config: &PipelineConfig,
        overwrite: bool,
    ) -> Result<ComputeSummary> {
        if request.kernels.is_empty() {
            return Err(HtsError::InvalidTaskConfig {
                method: "gaussian_process".to_string(),
                reason: "no kernels listed".to_string(),
            });
        }
        let mut tags = vec![request.tag("best", "predicted_mean"), request.tag("best", "predicted_sd")];
        for kernel in &request.kernels {
            tags.push(request.tag(kernel.name(), "predicted_mean"));
            tags.push(request.tag(kernel.name(), "predicted_sd"));
        }
        self.check_all_writable(&tags, overwrite)?;

        let mut summary = ComputeSummary::default();
        let mut fitted: Vec<(KernelKind, f64, WellGrid<f64>, WellGrid<f64>)> = Vec::new();
        for &kernel in &request.kernels {
            match self.fitted_model(&request.source, &request.sample_types, kernel, config) {
                Ok(model) => {
                    let (mean, sd) = model.predict_plate();
                    fitted.push((kernel, model.bic(), mean, sd));
                }
                Err(e) => {
                    warn!(plate = %self.name, kernel = kernel.name(), error = %e, "GP fit failed");
                    summary.warnings.push(format!("{}: {e}", kernel.name()));
                }
            }
        }

        let best_index = fitted
            .iter()
            .enumerate()
            .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .map(|(i, _)| i)
            .ok_or_else(|| HtsError::ModelFit(format!("no kernel could be fitted on '{}'", request.source)))?;

        for (i, (kernel, bic, mean, sd)) in fitted.into_iter().enumerate() {
            summary.metrics.insert(format!("{}_bic", kernel.name()), bic);
            if i == best_index {
                self.store(&request.tag("best", "predicted_mean"), mean.clone(), overwrite, &mut summary)?;
                self.store(&request.tag("best", "predicted_sd"), sd.clone(), overwrite, &mut summary)?;
            }
            self.store(&request.tag(kernel.name(), "predicted_mean"), mean, overwrite, &mut summary)?;
            self.store(&request.tag(kernel.name(), "predicted_sd"), sd, overwrite, &mut summary)?;
        }
        Ok(summary)
    }

    /// Cross-validation errors at each training observation.
    pub fn gp_cross_validation(
        &mut self,
        request: &GpCrossValidation,
        config: &PipelineConfig,
        overwrite: bool,
    ) -> Result<ComputeSummary> {
        let prefix = request.prefix();
        let tags = [
            format!("{prefix}_predicted"),
            format!("{prefix}_error"),
            format!("{prefix}_standardized_error"),
        ];
        self.check_all_writable(&tags, overwrite)?;

        let layout = self.layout.clone();
        let model = self.fitted_model(&request.source, &request.sample_types, request.kernel, config)?;
        let groups: Vec<String> = model
            .observations()
            .iter()
            .map(|o| layout.category(o.coordinate).unwrap_or_default().to_string())
            .collect();
        let cv = cross_validate(model, request.scheme, Some(&groups), request.refit, &config.gp)?;

        let mut predicted = WellGrid::new(self.height, self.width);
        let mut error = WellGrid::new(self.height, self.width);
        let mut standardized = WellGrid::new(self.height, self.width);
        for point in &cv.points {
            predicted.push(point.coordinate, point.predicted)?;
            error.push(point.coordinate, point.error)?;
            standardized.push(point.coordinate, point.standardized_error)?;
        }

        let mut summary = ComputeSummary::default();
        summary.metrics.insert(format!("{prefix}_rmse"), cv.rmse());
        if let Some(worst) = cv.max_abs_error() {
            summary.metrics.insert(format!("{prefix}_max_abs_error"), worst.error.abs());
            debug!(plate = %self.name, well = %worst.coordinate, error = worst.error, "largest CV error");
        }
        self.store(&tags[0], predicted, overwrite, &mut summary)?;
        self.store(&tags[1], error, overwrite, &mut summary)?;
        self.store(&tags[2], standardized, overwrite, &mut summary)?;
        Ok(summary)
    }
}

fn first(grid: &WellGrid<f64>, coordinate: Coordinate) -> f64 {
    grid.get(coordinate).ok().and_then(|v| v.first().copied()).unwrap_or(f64::NAN)
}

fn map_with_well(grid: &WellGrid<f64>, mut f: impl FnMut(Coordinate, f64) -> f64) -> WellGrid<f64> {
    let mut out = WellGrid::new(grid.height(), grid.width());
    for (coordinate, values) in grid.iter() {
        // same geometry as `grid`
        let _ = out.set_all(coordinate, values.iter().map(|&x| f(coordinate, x)).collect());
    }
    out
}

/// Two channels combined value by value must carry the same replicate count.
fn check_paired(tag: &str, coordinate: Coordinate, expected: &[f64], found: &[f64]) -> Result<()> {
    if expected.len() != found.len() {
        return Err(HtsError::ShapeMismatch {
            tag: format!("{tag} at {coordinate}"),
            expected_height: expected.len(),
            expected_width: 1,
            found_height: found.len(),
            found_width: 1,
        });
    }
    Ok(())
}

fn lower_tail(x: f64, mean: f64, sd: f64) -> f64 {
    if !x.is_finite() {
        return f64::NAN;
    }
    Normal::new(mean, sd).map(|n| n.cdf(x)).unwrap_or(f64::NAN)
}
