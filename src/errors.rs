use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type InversionResult<T> = Result<T, InversionError>;

/// Malformed problem or target-group setup. Raised before the first iteration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("duplicate target id '{id}' (groups #{first_group} and #{second_group})")]
    DuplicateTargetId {
        id: String,
        first_group: usize,
        second_group: usize,
    },

    #[error("problem '{0}' has an empty parameter space")]
    EmptyParameterSpace(String),

    #[error("problem '{0}' has no misfit targets")]
    NoTargets(String),

    #[error("invalid string id '{0}' (expected [A-Za-z][A-Za-z0-9._]{{0,64}})")]
    InvalidStringId(String),

    #[error("no range given for parameter '{0}'")]
    MissingRange(String),

    #[error("invalid range for '{name}': {start} .. {stop}")]
    InvalidRange { name: String, start: f64, stop: f64 },

    #[error("satellite scene '{0}' not found in dataset")]
    UnknownScene(String),

    #[error("GNSS campaign '{0}' not found in dataset")]
    UnknownCampaign(String),

    #[error("injected model #{index} has {found} values, problem has {expected} parameters")]
    InjectDimension {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("no dataset attached to problem builder")]
    MissingDataset,

    #[error("no forward model attached to problem builder")]
    MissingEngine,

    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: String, reason: String },

    #[error("malformed dataset record '{record}': {reason}")]
    InvalidRecord { record: String, reason: String },

    #[error("jobs #{first_job} and #{second_job} share the run directory {}", path.display())]
    SharedRundir {
        path: PathBuf,
        first_job: usize,
        second_job: usize,
    },
}

/// Failure of a single forward-model / misfit evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("forward model failed for target '{target}': {message}")]
    Engine { target: String, message: String },

    #[error("synthetics for target '{target}' do not match: expected {expected}, got {found}")]
    SyntheticsMismatch {
        target: String,
        expected: String,
        found: String,
    },

    #[error("target '{target}' is missing a value for parameter '{name}'")]
    MissingParameter { target: String, name: String },

    #[error("target '{target}' produced a non-finite misfit")]
    NonFinite { target: String },

    #[error("{failed} of {total} evaluations failed (rate {rate:.3})")]
    TooManyFailures { failed: u64, total: u64, rate: f64 },
}

/// Ensemble selection could not satisfy the requested constraints.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarvestError {
    #[error("no chains to harvest")]
    NoChains,

    #[error("chains hold no samples")]
    NoSamples,

    #[error("chain {chain} holds {available} samples, {requested} requested")]
    InsufficientSamples {
        chain: usize,
        available: usize,
        requested: usize,
    },

    #[error("invalid weed level {0} (expected 0, 1, 2 or 3)")]
    InvalidWeedLevel(u8),

    #[error("no chain files found under {0}")]
    MissingChains(PathBuf),

    #[error("harvest output already exists at {0} (use force to overwrite)")]
    AlreadyHarvested(PathBuf),
}

/// Coarse classification used by batch drivers to decide whether to carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Evaluation,
    ResumeConflict,
    Harvest,
    Cancelled,
    Io,
}

#[derive(Error, Debug)]
pub enum InversionError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("run directory {} is not empty ({nfiles} files); use force or preserve", path.display())]
    ResumeConflict { path: PathBuf, nfiles: usize },

    #[error("harvest error: {0}")]
    Harvest(#[from] HarvestError),

    #[error("run cancelled: {0}")]
    Cancelled(String),

    #[error("unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl InversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Evaluation(_) => ErrorKind::Evaluation,
            Self::ResumeConflict { .. } => ErrorKind::ResumeConflict,
            Self::Harvest(_) => ErrorKind::Harvest,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Io(_) | Self::Serialization(_) | Self::Pattern(_) => ErrorKind::Io,
        }
    }
}
