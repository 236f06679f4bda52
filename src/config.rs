//! JSON configuration of an inversion.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{Event, Parameter, Range};
use crate::dataset::DatasetProvider;
use crate::engine::ForwardModel;
use crate::errors::{ConfigurationError, InversionError, InversionResult};
use crate::harvest::HarvestOptions;
use crate::optimization::problem::{InversionProblem, ProblemBuilder};
use crate::optimization::solvers::SolverConfig;
use crate::targets::{ResultMode, TargetGroup};

/// Placeholder in `ProblemConfig::name` replaced by the event name.
pub const EVENT_NAME_PLACEHOLDER: &str = "{event_name}";

/// One source parameter of the search space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub range: Range,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// May contain `{event_name}`.
    pub name: String,
    /// Default target path; falls back to the problem name.
    #[serde(default)]
    pub path: Option<String>,
    pub parameters: Vec<ParameterConfig>,
    #[serde(default)]
    pub apply_balancing_weights: bool,
    /// Random models used by the balancing analyser; 0 skips the analysis.
    #[serde(default)]
    pub balancing_nsamples: usize,
    #[serde(default)]
    pub result_mode: ResultMode,
}

impl ProblemConfig {
    pub fn problem_name(&self, event: &Event) -> String {
        self.name.replace(EVENT_NAME_PLACEHOLDER, &event.name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InversionConfig {
    pub problem: ProblemConfig,
    pub target_groups: Vec<TargetGroup>,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub harvest: HarvestOptions,
}

impl FromStr for InversionConfig {
    type Err = InversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: InversionConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl InversionConfig {
    pub fn from_path(path: impl AsRef<Path>) -> InversionResult<Self> {
        fs::read_to_string(path.as_ref())?.parse()
    }

    /// Checks that need no dataset.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.problem.parameters.is_empty() {
            return Err(ConfigurationError::EmptyParameterSpace(self.problem.name.clone()));
        }
        if self.target_groups.is_empty() {
            return Err(ConfigurationError::NoTargets(self.problem.name.clone()));
        }
        for p in &self.problem.parameters {
            p.range.validate(&p.name)?;
        }
        match &self.solver {
            SolverConfig::Bootstrap(c) => c.validate()?,
        }
        if self.harvest.nbest == 0 {
            return Err(ConfigurationError::InvalidOption {
                name: "nbest".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn problem_builder(
        &self,
        event: &Event,
        dataset: Arc<dyn DatasetProvider>,
        engine: Arc<dyn ForwardModel>,
    ) -> ProblemBuilder {
        let name = self.problem.problem_name(event);
        let mut builder = InversionProblem::builder(name.clone(), event.clone())
            .default_path(self.problem.path.clone().unwrap_or(name))
            .target_groups(self.target_groups.iter().cloned())
            .dataset(dataset)
            .engine(engine)
            .apply_balancing_weights(self.problem.apply_balancing_weights)
            .result_mode(self.problem.result_mode);
        for p in &self.problem.parameters {
            builder = builder.parameter(Parameter::new(&p.name, &p.unit), p.range);
        }
        builder
    }

    /// Build the problem and, if configured, run the balancing analyser.
    pub fn build_problem(
        &self,
        event: &Event,
        dataset: Arc<dyn DatasetProvider>,
        engine: Arc<dyn ForwardModel>,
    ) -> Result<InversionProblem, ConfigurationError> {
        let mut problem = self.problem_builder(event, dataset, engine).build()?;
        if self.problem.apply_balancing_weights && self.problem.balancing_nsamples > 0 {
            problem.analyse_target_balancing(self.problem.balancing_nsamples, 0);
        }
        Ok(problem)
    }

    /// `<base>/<problem name>.run`
    pub fn rundir(&self, base: &Path, event: &Event) -> PathBuf {
        base.join(format!("{}.run", self.problem.problem_name(event)))
    }
}
