//! Bootstrap misfit optimisation for earthquake source inversion.
//!
//! A [`Problem`] couples source parameters with misfit targets built from a
//! dataset; a [`Solver`] searches it and records ranked chains in a run
//! directory; [`harvest`] reduces those chains to the final [`Ensemble`].

pub mod config;
pub mod core;
pub mod dataset;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod harvest;
pub mod optimization;
pub mod targets;

pub use config::InversionConfig;
pub use self::core::*;
pub use dataset::{Dataset, DatasetProvider};
pub use driver::{GoOptions, Job, RunOutcome, go};
pub use engine::{ForwardModel, ModellingRequest, Synthetics};
pub use errors::{
    ConfigurationError, ErrorKind, EvaluationError, HarvestError, InversionError, InversionResult,
};
pub use harvest::{Ensemble, HarvestOptions, Harvester, WeedLevel, harvest};
pub use optimization::*;
pub use targets::{MisfitResult, MisfitTarget, TargetGroup};
