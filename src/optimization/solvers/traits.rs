use std::path::PathBuf;

use crate::errors::InversionResult;
use crate::optimization::callback::{Notifier, OptimizationCallback, PlotSink, Status};
use crate::optimization::chains::ChainSet;
use crate::optimization::problem::Problem;
use crate::optimization::rundir::RundirPolicy;

#[derive(Clone, Debug)]
pub struct SolverResult {
    pub success: bool,
    /// Best global misfit, `inf` if no evaluation succeeded.
    pub misfit: f64,
    pub iterations: u64,
    pub message: String,
    pub params: Vec<f64>,
    pub cost_evals: usize,
    pub failed_evals: usize,
    pub chains: ChainSet,
}

/// Everything a solve call may be handed besides the problem.
///
/// Without a `rundir` nothing is persisted and the chains only live in the
/// returned [`SolverResult`].
#[derive(Default)]
pub struct SolveOptions<'a> {
    pub rundir: Option<PathBuf>,
    pub policy: RundirPolicy,
    pub status: Status,
    pub plot: Option<&'a mut dyn PlotSink>,
    pub xs_inject: Option<&'a [Vec<f64>]>,
    pub notifier: Option<&'a dyn Notifier>,
    pub callback: Option<&'a mut dyn OptimizationCallback>,
}

impl<'a> SolveOptions<'a> {
    pub fn with_rundir(mut self, rundir: impl Into<PathBuf>) -> Self {
        self.rundir = Some(rundir.into());
        self
    }

    pub fn with_policy(mut self, policy: RundirPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_plot(mut self, plot: &'a mut dyn PlotSink) -> Self {
        self.plot = Some(plot);
        self
    }

    pub fn with_inject(mut self, xs: &'a [Vec<f64>]) -> Self {
        self.xs_inject = Some(xs);
        self
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_callback(mut self, callback: &'a mut dyn OptimizationCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Solver interface - takes problem and options
pub trait Solver {
    fn name(&self) -> &str;

    /// Run the search. Infeasible problems fail with a configuration error
    /// before the first evaluation; nothing is retried.
    fn solve(&mut self, problem: &dyn Problem, options: SolveOptions<'_>) -> InversionResult<SolverResult>;
}
