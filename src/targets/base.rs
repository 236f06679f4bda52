use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::gnss::{GnssMisfitTarget, GnssTargetGroup};
use super::satellite::{SatelliteMisfitTarget, SatelliteTargetGroup};
use super::waveform::{WaveformMisfitTarget, WaveformTargetGroup};
use crate::core::{Event, Parameter, Range, Source, validate_string_id};
use crate::dataset::DatasetProvider;
use crate::engine::{ForwardModel, ModellingRequest, Synthetics};
use crate::errors::{ConfigurationError, EvaluationError};

// ===== RESULTS =====

/// Per-unit `[misfit, normalisation]` rows for one (model, target) evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MisfitResult {
    misfits: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<ResultDetails>,
}

/// Observed and modelled vectors, kept only in [`ResultMode::Full`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultDetails {
    pub observed: Vec<f64>,
    pub synthetic: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tshift: Option<f64>,
}

impl MisfitResult {
    pub fn new(misfits: Vec<[f64; 2]>) -> Self {
        Self {
            misfits,
            details: None,
        }
    }

    pub fn with_details(mut self, details: ResultDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn misfits(&self) -> &[[f64; 2]] {
        &self.misfits
    }

    pub fn details(&self) -> Option<&ResultDetails> {
        self.details.as_ref()
    }

    pub fn nrows(&self) -> usize {
        self.misfits.len()
    }

    /// L2 combination of all rows: `[sqrt(sum m^2), sqrt(sum n^2)]`.
    pub fn combined(&self) -> [f64; 2] {
        let (m2, n2) = self
            .misfits
            .iter()
            .fold((0.0, 0.0), |(m, n), row| (m + row[0] * row[0], n + row[1] * row[1]));
        [m2.sqrt(), n2.sqrt()]
    }

    pub fn is_finite(&self) -> bool {
        self.misfits.iter().all(|r| r[0].is_finite() && r[1].is_finite())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    #[default]
    Sparse,
    Full,
}

/// Output of an analyser stage (e.g. target balancing).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyserResult {
    pub weight: f64,
}

/// Interpolation from the pre-calculated Green's-function store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    NearestNeighbor,
    MultiLinear,
}

// ===== TARGET GROUPS =====

fn default_weight() -> f64 {
    1.0
}

/// Configuration shared by every target of one group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetGroupCommon {
    /// Targets sharing a family share one normalisation denominator.
    #[serde(default)]
    pub normalisation_family: Option<String>,
    /// Prefix of the produced target ids.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub store_id: Option<String>,
}

impl Default for TargetGroupCommon {
    fn default() -> Self {
        Self {
            normalisation_family: None,
            path: None,
            weight: 1.0,
            interpolation: Interpolation::default(),
            store_id: None,
        }
    }
}

impl TargetGroupCommon {
    pub(crate) fn resolve_path(&self, default_path: &str) -> Result<String, ConfigurationError> {
        let path = self.path.as_deref().unwrap_or(default_path).to_string();
        validate_string_id(&path)?;
        Ok(path)
    }
}

/// Closed set of target families.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetGroup {
    Satellite(SatelliteTargetGroup),
    Gnss(GnssTargetGroup),
    Waveform(WaveformTargetGroup),
}

impl TargetGroup {
    pub fn common(&self) -> &TargetGroupCommon {
        match self {
            Self::Satellite(g) => &g.common,
            Self::Gnss(g) => &g.common,
            Self::Waveform(g) => &g.common,
        }
    }

    /// Instantiate this group's targets for `event`.
    ///
    /// Deterministic: targets come out in dataset order.
    pub fn get_targets(
        &self,
        ds: &Arc<dyn DatasetProvider>,
        event: &Event,
        default_path: &str,
    ) -> Result<Vec<MisfitTarget>, ConfigurationError> {
        let targets = match self {
            Self::Satellite(g) => g.get_targets(ds, event, default_path)?,
            Self::Gnss(g) => g.get_targets(ds, event, default_path)?,
            Self::Waveform(g) => g.get_targets(ds, event, default_path)?,
        };

        for t in &targets {
            validate_string_id(&t.string_id())?;
        }

        Ok(targets)
    }
}

// ===== TARGETS =====

/// Family-specific payload of a [`MisfitTarget`].
#[derive(Clone, Debug)]
pub enum TargetKind {
    Satellite(SatelliteMisfitTarget),
    Gnss(GnssMisfitTarget),
    Waveform(WaveformMisfitTarget),
}

impl TargetKind {
    fn discriminator(&self) -> &str {
        match self {
            Self::Satellite(t) => &t.scene_id,
            Self::Gnss(t) => &t.campaign_name,
            Self::Waveform(t) => &t.codes,
        }
    }

    fn family(&self) -> &'static str {
        match self {
            Self::Satellite(_) => "satellite",
            Self::Gnss(_) => "gnss",
            Self::Waveform(_) => "waveform",
        }
    }
}

/// One scorable observation.
pub struct MisfitTarget {
    manual_weight: f64,
    analyser_results: IndexMap<String, AnalyserResult>,
    normalisation_family: Option<String>,
    path: String,
    interpolation: Interpolation,
    store_id: Option<String>,
    result_mode: ResultMode,
    parameter_values: IndexMap<String, f64>,
    dataset: Arc<dyn DatasetProvider>,
    kind: TargetKind,

    target_parameters: OnceLock<Vec<Parameter>>,
    target_ranges: OnceLock<IndexMap<String, Range>>,
}

impl fmt::Debug for MisfitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MisfitTarget")
            .field("id", &self.string_id())
            .field("family", &self.kind.family())
            .field("manual_weight", &self.manual_weight)
            .field("normalisation_family", &self.normalisation_family)
            .finish()
    }
}

impl MisfitTarget {
    pub(crate) fn new(
        common: &TargetGroupCommon,
        path: String,
        dataset: Arc<dyn DatasetProvider>,
        kind: TargetKind,
    ) -> Self {
        Self {
            manual_weight: common.weight,
            analyser_results: IndexMap::new(),
            normalisation_family: common.normalisation_family.clone(),
            path,
            interpolation: common.interpolation,
            store_id: common.store_id.clone(),
            result_mode: ResultMode::Sparse,
            parameter_values: IndexMap::new(),
            dataset,
            kind,
            target_parameters: OnceLock::new(),
            target_ranges: OnceLock::new(),
        }
    }

    /// Globally unique id: `<path>.<discriminator>`.
    pub fn string_id(&self) -> String {
        format!("{}.{}", self.path, self.kind.discriminator())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &TargetKind {
        &self.kind
    }

    pub fn manual_weight(&self) -> f64 {
        self.manual_weight
    }

    pub fn normalisation_family(&self) -> Option<&str> {
        self.normalisation_family.as_deref()
    }

    pub fn dataset(&self) -> &Arc<dyn DatasetProvider> {
        &self.dataset
    }

    pub fn nmisfits(&self) -> usize {
        match &self.kind {
            TargetKind::Satellite(t) => t.nleaves,
            TargetKind::Gnss(t) => t.ncomponents,
            TargetKind::Waveform(t) => t.nsamples,
        }
    }

    /// Free parameters declared by the misfit config, not yet namespaced.
    pub fn parameters(&self) -> Vec<Parameter> {
        match &self.kind {
            TargetKind::Satellite(t) => t.parameters(),
            TargetKind::Gnss(_) | TargetKind::Waveform(_) => Vec::new(),
        }
    }

    pub fn nparameters(&self) -> usize {
        self.target_parameters().len()
    }

    /// Free parameters grouped under this target's id.
    pub fn target_parameters(&self) -> &[Parameter] {
        self.target_parameters.get_or_init(|| {
            let group = vec![self.string_id()];
            self.parameters()
                .iter()
                .map(|p| p.with_groups(group.clone()))
                .collect()
        })
    }

    /// Config-declared ranges keyed `<target_id>:<range_name>`.
    pub fn target_ranges(&self) -> &IndexMap<String, Range> {
        self.target_ranges.get_or_init(|| {
            let id = self.string_id();
            let ranges = match &self.kind {
                TargetKind::Satellite(t) => t.misfit_config.ranges.clone(),
                TargetKind::Gnss(_) | TargetKind::Waveform(_) => IndexMap::new(),
            };
            ranges
                .into_iter()
                .map(|(k, r)| (format!("{}:{}", id, k), r))
                .collect()
        })
    }

    /// Range of one of this target's own parameters.
    pub fn range_for(&self, p: &Parameter) -> Option<Range> {
        let key = format!("{}:{}", self.string_id(), p.name_nogroups());
        self.target_ranges().get(&key).copied()
    }

    /// Replace the family payload; derived parameter/range caches are dropped.
    pub fn set_kind(&mut self, kind: TargetKind) {
        self.kind = kind;
        self.target_parameters = OnceLock::new();
        self.target_ranges = OnceLock::new();
        self.parameter_values.clear();
    }

    pub fn set_parameter_values(&mut self, model: &[f64]) {
        for (p, &v) in self.parameters().iter().zip(model.iter()) {
            self.parameter_values.insert(p.name_nogroups().to_string(), v);
        }
    }

    pub fn parameter_values(&self) -> &IndexMap<String, f64> {
        &self.parameter_values
    }

    pub fn set_result_mode(&mut self, mode: ResultMode) {
        self.result_mode = mode;
    }

    pub fn result_mode(&self) -> ResultMode {
        self.result_mode
    }

    pub fn analyser_results(&self) -> &IndexMap<String, AnalyserResult> {
        &self.analyser_results
    }

    pub fn set_analyser_result(&mut self, analyser_id: impl Into<String>, result: AnalyserResult) {
        self.analyser_results.insert(analyser_id.into(), result);
    }

    /// Manual weight, times every analyser weight when balancing is applied.
    pub fn get_combined_weight(&self, apply_balancing_weights: bool) -> Vec<f64> {
        let mut w = self.manual_weight;
        if apply_balancing_weights {
            w *= self
                .analyser_results
                .values()
                .map(|r| r.weight)
                .product::<f64>();
        }
        vec![w]
    }

    pub fn modelling_request(&self) -> ModellingRequest<'_> {
        ModellingRequest {
            target_id: self.string_id(),
            store_id: self.store_id.as_deref(),
            interpolation: self.interpolation,
            kind: &self.kind,
        }
    }

    /// Score synthetics using this target's current parameter values.
    pub fn post_process(
        &self,
        source: &Source,
        synthetics: &Synthetics,
    ) -> Result<MisfitResult, EvaluationError> {
        self.post_process_with(source, synthetics, &self.parameter_values)
    }

    /// Score synthetics with explicitly supplied free-parameter values.
    pub fn post_process_with(
        &self,
        _source: &Source,
        synthetics: &Synthetics,
        values: &IndexMap<String, f64>,
    ) -> Result<MisfitResult, EvaluationError> {
        let id = self.string_id();
        let full = self.result_mode == ResultMode::Full;
        let result = match &self.kind {
            TargetKind::Satellite(t) => t.post_process(&id, self.dataset.as_ref(), synthetics, values, full)?,
            TargetKind::Gnss(t) => t.post_process(&id, self.dataset.as_ref(), synthetics, full)?,
            TargetKind::Waveform(t) => t.post_process(&id, self.dataset.as_ref(), synthetics, full)?,
        };

        if !result.is_finite() {
            return Err(EvaluationError::NonFinite { target: id });
        }
        Ok(result)
    }

    /// Run the forward model for `source` and score the result.
    pub fn evaluate(
        &self,
        engine: &dyn ForwardModel,
        source: &Source,
        values: &IndexMap<String, f64>,
    ) -> Result<MisfitResult, EvaluationError> {
        let synthetics = engine
            .process(source, &self.modelling_request())
            .map_err(|message| EvaluationError::Engine {
                target: self.string_id(),
                message,
            })?;
        self.post_process_with(source, &synthetics, values)
    }
}

pub(crate) fn missing_parameter(target: &str, name: &str) -> EvaluationError {
    EvaluationError::MissingParameter {
        target: target.to_string(),
        name: name.to_string(),
    }
}

pub(crate) fn mismatch(target: &str, expected: String, synthetics: &Synthetics) -> EvaluationError {
    EvaluationError::SyntheticsMismatch {
        target: target.to_string(),
        expected,
        found: synthetics.describe(),
    }
}
