use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::traits::{SolveOptions, Solver, SolverResult};
use crate::errors::{ConfigurationError, EvaluationError, InversionError, InversionResult};
use crate::optimization::callback::{ConvergenceSnapshot, OptimizationCallback, RunEvent, StatusReporter};
use crate::optimization::chains::ChainSet;
use crate::optimization::problem::Problem;
use crate::optimization::rundir::{ProblemInfo, Rundir, SampleRecord};
use crate::optimization::state::SolverState;

/// Redraws of an out-of-bounds directed proposal before it is clamped.
const MAX_REDRAWS: usize = 20;

/// Settings of [`BootstrapSearch`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSearchConfig {
    pub niter_uniform: u64,
    pub niter_directed: u64,
    pub nbootstrap: usize,
    /// Samples kept per chain.
    pub chain_length: usize,
    pub scatter_scale_begin: f64,
    pub scatter_scale_end: f64,
    /// Drawn at random (and written to the rundir) when unset.
    pub seed: Option<u64>,
    pub checkpoint_interval: u64,
    pub plot_interval: u64,
    pub max_failure_rate: f64,
    pub min_evaluations_for_abort: u64,
}

impl Default for BootstrapSearchConfig {
    fn default() -> Self {
        Self {
            niter_uniform: 1000,
            niter_directed: 4000,
            nbootstrap: 100,
            chain_length: 100,
            scatter_scale_begin: 2.0,
            scatter_scale_end: 0.5,
            seed: None,
            checkpoint_interval: 100,
            plot_interval: 100,
            max_failure_rate: 0.5,
            min_evaluations_for_abort: 20,
        }
    }
}

impl BootstrapSearchConfig {
    pub fn niter(&self) -> u64 {
        self.niter_uniform + self.niter_directed
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |name: &str, reason: &str| ConfigurationError::InvalidOption {
            name: name.into(),
            reason: reason.into(),
        };
        if self.chain_length == 0 {
            return Err(invalid("chain_length", "must be positive"));
        }
        if !(self.scatter_scale_begin > 0.0 && self.scatter_scale_end > 0.0) {
            return Err(invalid("scatter_scale", "begin and end must be positive"));
        }
        if self.checkpoint_interval == 0 || self.plot_interval == 0 {
            return Err(invalid("checkpoint_interval", "intervals must be positive"));
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            return Err(invalid("max_failure_rate", "must lie within 0 .. 1"));
        }
        Ok(())
    }
}

/// Bootstrap-ensemble search.
///
/// A uniform phase samples the bounds blindly, a directed phase perturbs
/// members of randomly chosen chains with a shrinking scatter. Every model is
/// ranked in the global chain and in each bootstrap-reweighted chain.
pub struct BootstrapSearch {
    config: BootstrapSearchConfig,
}

impl BootstrapSearch {
    pub fn new(config: BootstrapSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BootstrapSearchConfig {
        &self.config
    }

    /// Scatter scale for a directed iteration, decaying geometrically.
    pub fn scatter_scale(&self, iiter: u64) -> f64 {
        let c = &self.config;
        let span = c.niter_directed.saturating_sub(1).max(1) as f64;
        let t = (iiter.saturating_sub(c.niter_uniform) as f64 / span).min(1.0);
        c.scatter_scale_begin * (c.scatter_scale_end / c.scatter_scale_begin).powf(t)
    }

    fn propose_uniform(&self, rng: &mut StdRng, bounds: &[(f64, f64)]) -> Vec<f64> {
        bounds
            .iter()
            .map(|&(lo, hi)| if hi > lo { rng.gen_range(lo..=hi) } else { lo })
            .collect()
    }

    fn propose_directed(&self, rng: &mut StdRng, chains: &ChainSet, bounds: &[(f64, f64)], iiter: u64) -> Vec<f64> {
        let candidates: Vec<usize> = (0..chains.chains.len())
            .filter(|&i| chains.chains[i].len() >= 2)
            .collect();
        if candidates.is_empty() {
            return self.propose_uniform(rng, bounds);
        }

        let chain = &chains.chains[candidates[rng.gen_range(0..candidates.len())]];
        let member = &chain.samples()[rng.gen_range(0..chain.len())];
        let scale = self.scatter_scale(iiter);
        let std = chain.std(bounds.len());

        let mut x = vec![0.0; bounds.len()];
        for _ in 0..MAX_REDRAWS {
            for (i, xi) in x.iter_mut().enumerate() {
                let z: f64 = rng.sample(StandardNormal);
                *xi = member.x[i] + z * std[i] * scale;
            }
            if x.iter().zip(bounds).all(|(&v, &(lo, hi))| v >= lo && v <= hi) {
                return x;
            }
        }
        clamp_params(&mut x, bounds);
        x
    }

    fn checkpoint(
        &self,
        rundir: Option<&Rundir>,
        records: &mut Vec<SampleRecord>,
        chains: &ChainSet,
        state: &SolverState,
    ) -> InversionResult<()> {
        if let Some(rd) = rundir {
            rd.append_samples(records)?;
            rd.write_chains(chains)?;
            rd.write_state(&state.snapshot())?;
        }
        records.clear();
        Ok(())
    }
}

#[inline]
fn clamp_params(params: &mut [f64], bounds: &[(f64, f64)]) {
    for (p, &(min, max)) in params.iter_mut().zip(bounds) {
        *p = p.clamp(min, max);
    }
}

impl Solver for BootstrapSearch {
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn solve(&mut self, problem: &dyn Problem, options: SolveOptions<'_>) -> InversionResult<SolverResult> {
        let SolveOptions {
            rundir,
            policy,
            status,
            mut plot,
            xs_inject,
            notifier,
            mut callback,
        } = options;

        problem.check()?;
        self.config.validate()?;

        let n = problem.num_params();
        let bounds = problem.bounds().to_vec();
        let inject = xs_inject.unwrap_or(&[]);
        for (index, x) in inject.iter().enumerate() {
            if x.len() != n {
                return Err(ConfigurationError::InjectDimension {
                    index,
                    expected: n,
                    found: x.len(),
                }
                .into());
            }
        }

        let niter = self.config.niter().max(inject.len() as u64);
        let mut seed = self.config.seed.unwrap_or_else(rand::random);
        let mut bootstrap_weights = problem.bootstrap_weights(self.config.nbootstrap, seed);
        let mut chains = ChainSet::new(self.config.nbootstrap, self.config.chain_length);
        let mut state = SolverState::new(problem.name(), problem.parameter_names(), niter);
        let mut start = 0;

        let rundir = match rundir {
            Some(path) => {
                let (rd, resumed) = Rundir::prepare(path, policy)?;
                if resumed {
                    let info = rd.read_problem()?;
                    if info.parameter_names != problem.parameter_names() || info.target_ids != problem.target_ids() {
                        return Err(ConfigurationError::InvalidOption {
                            name: "rundir".into(),
                            reason: format!("checkpoint belongs to a different problem ('{}')", info.name),
                        }
                        .into());
                    }
                    let stored: BootstrapSearchConfig = rd.read_config()?;
                    if let Some(stored_seed) = stored.seed {
                        if self.config.seed.is_some_and(|s| s != stored_seed) {
                            warn!(seed = stored_seed, "resuming with the seed of the interrupted run");
                        }
                        seed = stored_seed;
                    }
                    bootstrap_weights = info.bootstrap_weights;
                    chains = rd.read_chains()?;
                    start = rd.read_state()?.map_or(0, |s| s.iiter);
                    state.resume_at(start);
                    info!(problem = %problem.name(), iiter = start, "resuming run");
                } else {
                    rd.write_problem(&ProblemInfo {
                        name: problem.name().to_string(),
                        parameter_names: problem.parameter_names(),
                        bounds: bounds.clone(),
                        target_ids: problem.target_ids(),
                        bootstrap_weights: bootstrap_weights.clone(),
                    })?;
                    rd.write_config(&BootstrapSearchConfig {
                        seed: Some(seed),
                        ..self.config.clone()
                    })?;
                }
                Some(rd)
            }
            None => None,
        };

        // resumed runs must not replay the first run's proposals
        let mut rng = StdRng::seed_from_u64(seed ^ start);
        let mut reporter = StatusReporter::new(status, niter);
        let mut records = Vec::new();
        let mut cost_evals = 0usize;
        let mut failed_evals = 0usize;
        let mut message = String::from("Completed");
        let mut iterations = start;

        info!(problem = %problem.name(), niter, nbootstrap = self.config.nbootstrap, seed, "starting bootstrap search");
        if let Some(nf) = notifier {
            nf.notify(RunEvent::Started {
                run: problem.name().to_string(),
                niter,
            });
        }

        for iiter in start..niter {
            let x = if (iiter as usize) < inject.len() {
                inject[iiter as usize].clone()
            } else if iiter < self.config.niter_uniform {
                self.propose_uniform(&mut rng, &bounds)
            } else {
                self.propose_directed(&mut rng, &chains, &bounds, iiter)
            };

            cost_evals += 1;
            let mut misfits = vec![f64::INFINITY; chains.chains.len()];
            let record = match problem.evaluate(&x) {
                Ok(results) => {
                    misfits[0] = problem.combine_misfits(&results, None);
                    for (m, w) in misfits[1..].iter_mut().zip(&bootstrap_weights) {
                        *m = problem.combine_misfits(&results, Some(w.as_slice()));
                    }
                    SampleRecord {
                        index: iiter,
                        x: x.clone(),
                        misfits: Some(results.iter().map(|r| r.combined()).collect()),
                    }
                }
                Err(e) => {
                    failed_evals += 1;
                    debug!(iiter, error = %e, "evaluation rejected");
                    SampleRecord {
                        index: iiter,
                        x: x.clone(),
                        misfits: None,
                    }
                }
            };
            records.push(record);
            chains.offer(iiter, &x, &misfits);

            let rate = failed_evals as f64 / cost_evals as f64;
            if cost_evals as u64 >= self.config.min_evaluations_for_abort && rate > self.config.max_failure_rate {
                warn!(failed_evals, cost_evals, "too many failed evaluations, aborting");
                self.checkpoint(rundir.as_ref(), &mut records, &chains, &state)?;
                return Err(EvaluationError::TooManyFailures {
                    failed: failed_evals as u64,
                    total: cost_evals as u64,
                    rate,
                }
                .into());
            }

            iterations = iiter + 1;
            state.set_iiter(iterations);
            let best = chains.global().and_then(|c| c.samples().first());
            let best_misfit = best.map_or(f64::INFINITY, |s| s.misfit);
            if let Some(b) = best {
                state.parameter_values.clone_from(&b.x);
            }
            state.extra_text = format!("failed {}", failed_evals);

            reporter.on_iteration(&state, best_misfit).map_err(InversionError::Cancelled)?;
            let mut stop = false;
            if let Some(cb) = callback.as_deref_mut() {
                cb.on_iteration(&state, best_misfit).map_err(InversionError::Cancelled)?;
                stop = cb.should_stop();
            }

            let last = stop || iterations == niter;
            if last || iterations % self.config.checkpoint_interval == 0 {
                self.checkpoint(rundir.as_ref(), &mut records, &chains, &state)?;
                if let Some(nf) = notifier {
                    nf.notify(RunEvent::progress(&state, best_misfit));
                }
            }
            if let Some(sink) = plot.as_deref_mut() {
                if last || iterations % self.config.plot_interval == 0 {
                    let snapshot = ConvergenceSnapshot::new(&state, best_misfit, chains.best_misfits());
                    sink.on_checkpoint(&snapshot).map_err(InversionError::Cancelled)?;
                }
            }

            if stop {
                message = "Stopped by callback".into();
                break;
            }
        }

        let best = chains.global().and_then(|c| c.samples().first()).cloned();
        reporter.finish(&message);
        if let Some(nf) = notifier {
            nf.notify(RunEvent::Finished {
                run: problem.name().to_string(),
                iiter: iterations,
                best_misfit: best.as_ref().map_or(f64::INFINITY, |s| s.misfit),
            });
        }
        info!(problem = %problem.name(), iterations, cost_evals, failed_evals, "bootstrap search finished");

        Ok(SolverResult {
            success: best.is_some(),
            misfit: best.as_ref().map_or(f64::INFINITY, |s| s.misfit),
            iterations,
            message,
            params: best.map(|s| s.x).unwrap_or_default(),
            cost_evals,
            failed_evals,
            chains,
        })
    }
}
