use std::fmt;
use std::ops::Range as IndexRange;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::core::{Event, Parameter, Range, Source, detect_duplicate_ids};
use crate::dataset::DatasetProvider;
use crate::engine::ForwardModel;
use crate::errors::{ConfigurationError, EvaluationError};
use crate::targets::{AnalyserResult, MisfitResult, MisfitTarget, ResultMode, TargetGroup};

/// Analyser id under which balancing weights are stored on targets.
pub const TARGET_BALANCING: &str = "target_balancing";

/// What a solver needs from a problem: the search space and the misfit.
pub trait Problem {
    fn name(&self) -> &str;

    /// Full (group-qualified) parameter names, in model-vector order.
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max) for each parameter
    fn bounds(&self) -> &[(f64, f64)];

    fn num_params(&self) -> usize {
        self.bounds().len()
    }

    fn target_ids(&self) -> Vec<String>;

    fn ntargets(&self) -> usize {
        self.target_ids().len()
    }

    /// Per-target misfit rows for model `x` (unweighted).
    fn evaluate(&self, x: &[f64]) -> Result<Vec<MisfitResult>, EvaluationError>;

    /// Reduce per-target results to one scalar.
    ///
    /// `extra_weights` holds one factor per target, e.g. bootstrap weights.
    fn combine_misfits(&self, results: &[MisfitResult], extra_weights: Option<&[f64]>) -> f64;

    /// Fail fast on a problem no solver can work with.
    fn check(&self) -> Result<(), ConfigurationError> {
        if self.num_params() == 0 {
            return Err(ConfigurationError::EmptyParameterSpace(self.name().to_string()));
        }
        if self.ntargets() == 0 {
            return Err(ConfigurationError::NoTargets(self.name().to_string()));
        }
        Ok(())
    }

    /// Classic bootstrap: per realisation, draw `ntargets` targets with
    /// replacement and weight each target by its draw count.
    fn bootstrap_weights(&self, nbootstrap: usize, seed: u64) -> Vec<Vec<f64>> {
        let n = self.ntargets();
        let mut rng = StdRng::seed_from_u64(seed);
        (0..nbootstrap)
            .map(|_| {
                let mut w = vec![0.0; n];
                for _ in 0..n {
                    w[rng.gen_range(0..n)] += 1.0;
                }
                w
            })
            .collect()
    }
}

/// Two-level misfit norm.
///
/// Within a normalisation family rows combine as
/// `sqrt(sum (w*m)^2) / sqrt(sum n^2)`; family contributions are summed.
/// Weights scale the misfit only, so they survive the normalisation even when
/// a family holds a single target. A zero weight removes the target from its
/// family, normalisation included. A family whose normalisation vanishes
/// contributes its raw weighted misfit.
pub fn combine_family_misfits(
    results: &[MisfitResult],
    weights: &[f64],
    families: &[usize],
    nfamilies: usize,
    extra_weights: Option<&[f64]>,
) -> f64 {
    let mut m2 = vec![0.0; nfamilies];
    let mut n2 = vec![0.0; nfamilies];

    for (i, result) in results.iter().enumerate() {
        let w = weights[i] * extra_weights.map_or(1.0, |e| e[i]);
        if w == 0.0 {
            continue;
        }
        let f = families[i];
        for row in result.misfits() {
            m2[f] += (w * row[0]).powi(2);
            n2[f] += row[1].powi(2);
        }
    }

    m2.iter()
        .zip(&n2)
        .map(|(&m2, &n2)| {
            let (m, n) = (m2.sqrt(), n2.sqrt());
            if n > 0.0 { m / n } else { m }
        })
        .sum()
}

/// Family bucket per target: shared tag -> shared bucket, untagged -> own bucket.
fn assign_families(targets: &[MisfitTarget]) -> (Vec<usize>, usize) {
    let mut tags: IndexMap<String, usize> = IndexMap::new();
    let mut next = 0;
    let families = targets
        .iter()
        .map(|t| match t.normalisation_family() {
            Some(tag) => *tags.entry(tag.to_string()).or_insert_with(|| {
                next += 1;
                next - 1
            }),
            None => {
                next += 1;
                next - 1
            }
        })
        .collect();
    (families, next)
}

/// Source parameters plus every target's free parameters, scored against the
/// targets produced by a set of target groups.
pub struct InversionProblem {
    name: String,
    nsource: usize,
    parameters: Vec<Parameter>,
    bounds: Vec<(f64, f64)>,
    targets: Vec<MisfitTarget>,
    target_slices: Vec<IndexRange<usize>>,
    families: Vec<usize>,
    nfamilies: usize,
    engine: Arc<dyn ForwardModel>,
    apply_balancing_weights: bool,
}

impl fmt::Debug for InversionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InversionProblem")
            .field("name", &self.name)
            .field("nparameters", &self.parameters.len())
            .field("targets", &self.targets)
            .field("nfamilies", &self.nfamilies)
            .finish()
    }
}

impl InversionProblem {
    pub fn builder(name: impl Into<String>, event: Event) -> ProblemBuilder {
        ProblemBuilder::new(name, event)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn targets(&self) -> &[MisfitTarget] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [MisfitTarget] {
        &mut self.targets
    }

    pub fn nfamilies(&self) -> usize {
        self.nfamilies
    }

    pub fn set_apply_balancing_weights(&mut self, apply: bool) {
        self.apply_balancing_weights = apply;
    }

    /// Source model for the leading `nsource` entries of `x`.
    pub fn unpack(&self, x: &[f64]) -> Source {
        Source {
            values: self.parameters[..self.nsource]
                .iter()
                .zip(x)
                .map(|(p, &v)| (p.name_nogroups().to_string(), v))
                .collect(),
        }
    }

    fn target_values(&self, itarget: usize, x: &[f64]) -> IndexMap<String, f64> {
        let slice = self.target_slices[itarget].clone();
        self.parameters[slice.clone()]
            .iter()
            .zip(&x[slice])
            .map(|(p, &v)| (p.name_nogroups().to_string(), v))
            .collect()
    }

    pub fn target_weights(&self) -> Vec<f64> {
        self.targets
            .iter()
            .map(|t| t.get_combined_weight(self.apply_balancing_weights)[0])
            .collect()
    }

    pub fn global_misfit(&self, x: &[f64]) -> Result<f64, EvaluationError> {
        let results = self.evaluate(x)?;
        Ok(self.combine_misfits(&results, None))
    }

    /// Balancing analyser: evaluate `nsamples` random models and give each
    /// target the weight `1 / mean(misfit)` so that no target dominates by
    /// scale alone. Targets that never produced a finite, positive mean keep
    /// weight 1.
    pub fn analyse_target_balancing(&mut self, nsamples: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sums = vec![0.0; self.targets.len()];
        let mut counts = vec![0usize; self.targets.len()];

        for _ in 0..nsamples {
            let x: Vec<f64> = self
                .bounds
                .iter()
                .map(|&(lo, hi)| if hi > lo { rng.gen_range(lo..=hi) } else { lo })
                .collect();
            let source = self.unpack(&x);
            for (i, t) in self.targets.iter().enumerate() {
                if let Ok(r) = t.evaluate(self.engine.as_ref(), &source, &self.target_values(i, &x)) {
                    let m = r.combined()[0];
                    if m.is_finite() {
                        sums[i] += m;
                        counts[i] += 1;
                    }
                }
            }
        }

        for (i, t) in self.targets.iter_mut().enumerate() {
            let mean = if counts[i] > 0 { sums[i] / counts[i] as f64 } else { 0.0 };
            let weight = if mean > 0.0 && mean.is_finite() { 1.0 / mean } else { 1.0 };
            t.set_analyser_result(TARGET_BALANCING, AnalyserResult { weight });
        }
        self.apply_balancing_weights = true;
        info!(problem = %self.name, nsamples, "target balancing weights computed");
    }
}

impl Problem for InversionProblem {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name()).collect()
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn target_ids(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.string_id()).collect()
    }

    fn ntargets(&self) -> usize {
        self.targets.len()
    }

    fn evaluate(&self, x: &[f64]) -> Result<Vec<MisfitResult>, EvaluationError> {
        debug_assert_eq!(x.len(), self.parameters.len());
        let source = self.unpack(x);
        self.targets
            .iter()
            .enumerate()
            .map(|(i, t)| t.evaluate(self.engine.as_ref(), &source, &self.target_values(i, x)))
            .collect()
    }

    fn combine_misfits(&self, results: &[MisfitResult], extra_weights: Option<&[f64]>) -> f64 {
        combine_family_misfits(
            results,
            &self.target_weights(),
            &self.families,
            self.nfamilies,
            extra_weights,
        )
    }
}

/// Collects source parameters, target groups and collaborators, then
/// validates everything in [`build`](ProblemBuilder::build).
pub struct ProblemBuilder {
    name: String,
    event: Event,
    default_path: String,
    parameters: Vec<(Parameter, Range)>,
    groups: Vec<TargetGroup>,
    dataset: Option<Arc<dyn DatasetProvider>>,
    engine: Option<Arc<dyn ForwardModel>>,
    apply_balancing_weights: bool,
    result_mode: ResultMode,
}

impl ProblemBuilder {
    pub fn new(name: impl Into<String>, event: Event) -> Self {
        let name = name.into();
        Self {
            default_path: name.clone(),
            name,
            event,
            parameters: Vec::new(),
            groups: Vec::new(),
            dataset: None,
            engine: None,
            apply_balancing_weights: false,
            result_mode: ResultMode::Sparse,
        }
    }

    pub fn default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = path.into();
        self
    }

    pub fn parameter(mut self, parameter: Parameter, range: Range) -> Self {
        self.parameters.push((parameter, range));
        self
    }

    pub fn target_group(mut self, group: TargetGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn target_groups(mut self, groups: impl IntoIterator<Item = TargetGroup>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn dataset(mut self, dataset: Arc<dyn DatasetProvider>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ForwardModel>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn apply_balancing_weights(mut self, apply: bool) -> Self {
        self.apply_balancing_weights = apply;
        self
    }

    pub fn result_mode(mut self, mode: ResultMode) -> Self {
        self.result_mode = mode;
        self
    }

    pub fn build(self) -> Result<InversionProblem, ConfigurationError> {
        let dataset = self.dataset.ok_or(ConfigurationError::MissingDataset)?;
        let engine = self.engine.ok_or(ConfigurationError::MissingEngine)?;

        let mut parameters = Vec::new();
        let mut bounds = Vec::new();
        for (p, r) in &self.parameters {
            r.validate(&p.name())?;
            parameters.push(p.clone());
            bounds.push(r.as_bounds());
        }
        let nsource = parameters.len();

        let mut targets = Vec::new();
        let mut group_of = Vec::new();
        for (igroup, group) in self.groups.iter().enumerate() {
            for mut t in group.get_targets(&dataset, &self.event, &self.default_path)? {
                t.set_result_mode(self.result_mode);
                targets.push(t);
                group_of.push(igroup);
            }
        }

        let ids: Vec<String> = targets.iter().map(|t| t.string_id()).collect();
        detect_duplicate_ids(group_of.iter().copied().zip(ids.iter().map(String::as_str)))?;

        let mut target_slices = Vec::with_capacity(targets.len());
        for t in &targets {
            let start = parameters.len();
            for p in t.target_parameters() {
                let r = t
                    .range_for(p)
                    .ok_or_else(|| ConfigurationError::MissingRange(p.name()))?;
                r.validate(&p.name())?;
                parameters.push(p.clone());
                bounds.push(r.as_bounds());
            }
            target_slices.push(start..parameters.len());
        }

        if parameters.is_empty() {
            return Err(ConfigurationError::EmptyParameterSpace(self.name));
        }
        if targets.is_empty() {
            return Err(ConfigurationError::NoTargets(self.name));
        }

        let (families, nfamilies) = assign_families(&targets);
        debug!(
            problem = %self.name,
            nparameters = parameters.len(),
            ntargets = targets.len(),
            nfamilies,
            "problem built"
        );

        Ok(InversionProblem {
            name: self.name,
            nsource,
            parameters,
            bounds,
            targets,
            target_slices,
            families,
            nfamilies,
            engine,
            apply_balancing_weights: self.apply_balancing_weights,
        })
    }
}
