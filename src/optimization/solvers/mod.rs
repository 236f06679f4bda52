mod bootstrap;
pub mod traits;

use serde::{Deserialize, Serialize};

pub use bootstrap::{BootstrapSearch, BootstrapSearchConfig};
pub use traits::{SolveOptions, Solver, SolverResult};

/// Registered search strategies, selected by `"name"` in configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SolverConfig {
    Bootstrap(BootstrapSearchConfig),
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self::Bootstrap(BootstrapSearchConfig::default())
    }
}

impl SolverConfig {
    pub fn niter(&self) -> u64 {
        match self {
            Self::Bootstrap(c) => c.niter(),
        }
    }
}

pub fn select_solver(config: &SolverConfig) -> Box<dyn Solver> {
    match config {
        SolverConfig::Bootstrap(c) => Box::new(BootstrapSearch::new(c.clone())),
    }
}
