pub mod callback;
pub mod chains;
pub mod problem;
pub mod rundir;
pub mod solvers;
pub mod state;

pub use callback::{
    ConvergenceSnapshot, Notifier, OptimizationCallback, PlotSink, RunEvent, Status, StatusReporter,
};
pub use chains::{Chain, ChainSet, Sample};
pub use problem::{InversionProblem, Problem, ProblemBuilder, combine_family_misfits};
pub use rundir::{ProblemInfo, Rundir, RundirPolicy, SampleRecord};
pub use solvers::{
    BootstrapSearch, BootstrapSearchConfig, SolveOptions, Solver, SolverConfig, SolverResult, select_solver,
};
pub use state::{RateTracker, SolverState, SolverStateSnapshot};
