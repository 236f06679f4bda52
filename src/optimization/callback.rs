use std::time::Duration;

use crossbeam::channel::Sender;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use super::state::SolverState;
use crate::errors::ErrorKind;

/// Called synchronously after every iteration of a solver loop.
///
/// Returning an error cancels the run; the solver propagates it unchanged.
pub trait OptimizationCallback {
    fn on_iteration(&mut self, state: &SolverState, best_misfit: f64) -> Result<(), String>;

    /// Check if optimization should stop early
    fn should_stop(&self) -> bool {
        false
    }
}

/// Convergence summary handed to a [`PlotSink`] at every checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceSnapshot {
    pub problem_name: String,
    pub iiter: u64,
    pub niter: u64,
    pub best_misfit: f64,
    pub best_model: Vec<f64>,
    /// Best misfit of each chain, global chain first.
    pub chain_best: Vec<f64>,
    pub iter_per_second: f64,
    pub runtime_remaining_seconds: f64,
}

impl ConvergenceSnapshot {
    pub fn new(state: &SolverState, best_misfit: f64, chain_best: Vec<f64>) -> Self {
        Self {
            problem_name: state.problem_name.clone(),
            iiter: state.iiter(),
            niter: state.niter,
            best_misfit,
            best_model: state.parameter_values.clone(),
            chain_best,
            iter_per_second: state.iter_per_second(),
            runtime_remaining_seconds: state.runtime_remaining().as_secs_f64(),
        }
    }
}

/// Live diagnostics sink (plots, dashboards).
pub trait PlotSink {
    fn on_checkpoint(&mut self, snapshot: &ConvergenceSnapshot) -> Result<(), String>;
}

/// Progress events emitted by a run for external aggregation.
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    Started {
        run: String,
        niter: u64,
    },
    Progress {
        run: String,
        iiter: u64,
        niter: u64,
        best_misfit: f64,
        iter_per_second: f64,
        runtime_remaining: Duration,
    },
    Finished {
        run: String,
        iiter: u64,
        best_misfit: f64,
    },
    Failed {
        run: String,
        kind: ErrorKind,
        message: String,
    },
}

impl RunEvent {
    pub fn progress(state: &SolverState, best_misfit: f64) -> Self {
        Self::Progress {
            run: state.problem_name.clone(),
            iiter: state.iiter(),
            niter: state.niter,
            best_misfit,
            iter_per_second: state.iter_per_second(),
            runtime_remaining: state.runtime_remaining(),
        }
    }

    pub fn run(&self) -> &str {
        match self {
            Self::Started { run, .. }
            | Self::Progress { run, .. }
            | Self::Finished { run, .. }
            | Self::Failed { run, .. } => run,
        }
    }
}

/// Receiver of [`RunEvent`]s. May be called from any worker thread.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: RunEvent);
}

impl Notifier for Sender<RunEvent> {
    fn notify(&self, event: RunEvent) {
        // a dropped aggregator must not take the run down with it
        let _ = self.send(event);
    }
}

/// How a solver reports progress on the terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    State,
    Quiet,
}

/// Progress bar fed from a [`SolverState`]; renders nothing when quiet.
pub struct StatusReporter {
    bar: Option<ProgressBar>,
}

impl StatusReporter {
    pub fn new(status: Status, niter: u64) -> Self {
        let bar = match status {
            Status::Quiet => None,
            Status::State => {
                let pb = ProgressBar::new(niter);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {msg}",
                    )
                    .expect("indicatif template"),
                );
                pb.enable_steady_tick(Duration::from_millis(200));
                Some(pb)
            }
        };
        Self { bar }
    }

    pub fn is_quiet(&self) -> bool {
        self.bar.is_none()
    }

    pub fn finish(&self, message: &str) {
        if let Some(pb) = &self.bar {
            pb.finish_with_message(message.to_string());
        }
    }
}

/// Message shown next to the bar: rate and time left from the solver state.
pub fn status_line(state: &SolverState, best_misfit: f64) -> String {
    let mut line = format!(
        "{:.1} it/s | ETA {} | best {:.4e}",
        state.iter_per_second(),
        HumanDuration(state.runtime_remaining()),
        best_misfit
    );
    if !state.extra_text.is_empty() {
        line.push_str(" | ");
        line.push_str(&state.extra_text);
    }
    line
}

impl OptimizationCallback for StatusReporter {
    fn on_iteration(&mut self, state: &SolverState, best_misfit: f64) -> Result<(), String> {
        if let Some(pb) = &self.bar {
            pb.set_position(state.iiter());
            pb.set_message(status_line(state, best_misfit));
        }
        Ok(())
    }
}
