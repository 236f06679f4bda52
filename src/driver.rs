//! Multi-event driver: one solve (plus harvest) per job on a worker pool.

use std::path::{self, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, unbounded};
use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::InversionConfig;
use crate::core::Event;
use crate::dataset::DatasetProvider;
use crate::engine::ForwardModel;
use crate::errors::{ConfigurationError, ErrorKind, InversionResult};
use crate::harvest::{Ensemble, HarvestOptions, harvest};
use crate::optimization::callback::{Notifier, RunEvent, Status};
use crate::optimization::rundir::RundirPolicy;
use crate::optimization::solvers::{SolveOptions, select_solver};

/// One event to invert.
pub struct Job {
    pub config: Arc<InversionConfig>,
    pub event: Event,
    pub dataset: Arc<dyn DatasetProvider>,
    pub engine: Arc<dyn ForwardModel>,
    pub rundir: PathBuf,
    pub xs_inject: Option<Vec<Vec<f64>>>,
}

#[derive(Clone, Debug)]
pub struct GoOptions {
    pub nparallel: usize,
    pub status: Status,
    pub policy: RundirPolicy,
    /// Harvest each run right after solving it.
    pub harvest: bool,
}

impl Default for GoOptions {
    fn default() -> Self {
        Self {
            nparallel: num_cpus::get(),
            status: Status::State,
            policy: RundirPolicy::Fail,
            harvest: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub iterations: u64,
    pub misfit: f64,
    pub params: Vec<f64>,
    pub ensemble: Option<Ensemble>,
}

/// Outcome of one job. Failures of one job never stop the others.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: String,
    pub rundir: PathBuf,
    pub result: InversionResult<RunSummary>,
}

/// Counts collected by the event aggregator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunTally {
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
}

fn aggregate(rx: Receiver<RunEvent>) -> RunTally {
    let mut tally = RunTally::default();
    for event in rx.iter() {
        match event {
            RunEvent::Started { run, niter } => {
                tally.started += 1;
                info!(%run, niter, "run started");
            }
            RunEvent::Progress {
                run,
                iiter,
                niter,
                best_misfit,
                iter_per_second,
                runtime_remaining,
            } => {
                info!(
                    %run,
                    iiter,
                    niter,
                    best_misfit,
                    iter_per_second,
                    remaining_s = runtime_remaining.as_secs_f64(),
                    "progress"
                );
            }
            RunEvent::Finished { run, iiter, best_misfit } => {
                tally.finished += 1;
                info!(%run, iiter, best_misfit, "run finished");
            }
            RunEvent::Failed { run, kind, message } => {
                tally.failed += 1;
                warn!(%run, ?kind, %message, "run failed");
            }
        }
    }
    tally
}

fn solve_job(job: &Job, opts: &GoOptions, status: Status, notifier: &dyn Notifier) -> InversionResult<RunSummary> {
    let problem = job
        .config
        .build_problem(&job.event, Arc::clone(&job.dataset), Arc::clone(&job.engine))?;
    let mut solver = select_solver(&job.config.solver);

    let mut options = SolveOptions::default()
        .with_rundir(&job.rundir)
        .with_policy(opts.policy)
        .with_status(status)
        .with_notifier(notifier);
    if let Some(xs) = &job.xs_inject {
        options = options.with_inject(xs);
    }
    let result = solver.solve(&problem, options)?;

    let ensemble = if opts.harvest {
        let harvest_opts = HarvestOptions {
            force: true,
            ..job.config.harvest.clone()
        };
        Some(harvest(&job.rundir, &harvest_opts)?)
    } else {
        None
    };

    Ok(RunSummary {
        iterations: result.iterations,
        misfit: result.misfit,
        params: result.params,
        ensemble,
    })
}

/// Every job must own its run directory; parallel workers would otherwise
/// clear or rename each other's checkpoints.
fn check_unique_rundirs(jobs: &[Job]) -> Result<(), ConfigurationError> {
    let mut seen: IndexMap<PathBuf, usize> = IndexMap::new();
    for (ijob, job) in jobs.iter().enumerate() {
        let key = path::absolute(&job.rundir).unwrap_or_else(|_| job.rundir.clone());
        let key: PathBuf = key.components().collect();
        if let Some(&first_job) = seen.get(&key) {
            return Err(ConfigurationError::SharedRundir {
                path: job.rundir.clone(),
                first_job,
                second_job: ijob,
            });
        }
        seen.insert(key, ijob);
    }
    Ok(())
}

/// Solve every job, `nparallel` at a time.
///
/// Live status is only shown for sequential runs; parallel runs report
/// through the aggregated log instead.
pub fn go(jobs: &[Job], opts: &GoOptions) -> InversionResult<(Vec<RunOutcome>, RunTally)> {
    check_unique_rundirs(jobs)?;
    let nparallel = opts.nparallel.clamp(1, jobs.len().max(1));
    let status = if nparallel > 1 { Status::Quiet } else { opts.status };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nparallel)
        .build()
        .map_err(|e| ConfigurationError::InvalidOption {
            name: "nparallel".into(),
            reason: e.to_string(),
        })?;

    info!(njobs = jobs.len(), nparallel, "starting runs");
    let (tx, rx) = unbounded::<RunEvent>();

    let (outcomes, tally) = thread::scope(|scope| {
        let aggregator = scope.spawn(move || aggregate(rx));

        let outcomes: Vec<RunOutcome> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let run = job.config.problem.problem_name(&job.event);
                    let result = solve_job(job, opts, status, &tx);
                    if let Err(e) = &result {
                        tx.notify(RunEvent::Failed {
                            run: run.clone(),
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                    RunOutcome {
                        run,
                        rundir: job.rundir.clone(),
                        result,
                    }
                })
                .collect()
        });

        // closes the channel so the aggregator drains and returns
        drop(tx);
        let tally = aggregator.join().unwrap_or_else(|_| {
            warn!("event aggregator panicked");
            RunTally::default()
        });
        (outcomes, tally)
    });

    let conflicts = outcomes
        .iter()
        .filter(|o| matches!(&o.result, Err(e) if e.kind() == ErrorKind::ResumeConflict))
        .count();
    info!(
        finished = tally.finished,
        failed = tally.failed,
        conflicts,
        "all runs done"
    );
    Ok((outcomes, tally))
}
