//! Reduction of a finished run's chains to the final ensemble.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{HarvestError, InversionResult};
use crate::optimization::chains::{Chain, ChainSet, Sample};
use crate::optimization::rundir::{PROBLEM_FILE, Rundir};

/// Outlier filtering applied while harvesting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum WeedLevel {
    /// Union of every chain's best samples.
    #[default]
    None,
    /// Drop bootstrap chains whose mean global misfit exceeds mean + std.
    Chains,
    /// As `Chains`, then drop samples above the population mean.
    ChainsAndSamples,
    /// Global chain only.
    GlobalOnly,
}

impl TryFrom<u8> for WeedLevel {
    type Error = HarvestError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::None),
            1 => Ok(Self::Chains),
            2 => Ok(Self::ChainsAndSamples),
            3 => Ok(Self::GlobalOnly),
            other => Err(HarvestError::InvalidWeedLevel(other)),
        }
    }
}

impl From<WeedLevel> for u8 {
    fn from(level: WeedLevel) -> u8 {
        match level {
            WeedLevel::None => 0,
            WeedLevel::Chains => 1,
            WeedLevel::ChainsAndSamples => 2,
            WeedLevel::GlobalOnly => 3,
        }
    }
}

fn default_nbest() -> usize {
    10
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarvestOptions {
    #[serde(default = "default_nbest")]
    pub nbest: usize,
    #[serde(default)]
    pub weed: WeedLevel,
    /// Overwrite an existing ensemble.
    #[serde(default)]
    pub force: bool,
    /// Treat chains shorter than `nbest` as an error instead of flagging them.
    #[serde(default)]
    pub strict: bool,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            nbest: default_nbest(),
            weed: WeedLevel::None,
            force: false,
            strict: false,
        }
    }
}

/// Finalised posterior sample set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    pub nbest: usize,
    pub weed: WeedLevel,
    #[serde(default)]
    pub parameter_names: Vec<String>,
    /// Chains that contributed samples.
    pub retained_chains: Vec<usize>,
    /// Considered chains that held fewer than `nbest` samples.
    pub short_chains: Vec<usize>,
    /// Ordered by global misfit, ties by sample index.
    pub samples: Vec<Sample>,
}

impl Ensemble {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_short(&self) -> bool {
        !self.short_chains.is_empty()
    }

    pub fn best(&self) -> Option<&Sample> {
        self.samples.first()
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Deterministic ensemble selection from a [`ChainSet`].
#[derive(Clone, Debug)]
pub struct Harvester {
    nbest: usize,
    weed: WeedLevel,
    strict: bool,
}

impl From<&HarvestOptions> for Harvester {
    fn from(opts: &HarvestOptions) -> Self {
        Self::new(opts.nbest, opts.weed).strict(opts.strict)
    }
}

impl Harvester {
    pub fn new(nbest: usize, weed: WeedLevel) -> Self {
        Self {
            nbest,
            weed,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn select(&self, chains: &ChainSet) -> Result<Ensemble, HarvestError> {
        if chains.chains.is_empty() {
            return Err(HarvestError::NoChains);
        }

        let considered: Vec<&Chain> = match self.weed {
            WeedLevel::GlobalOnly => chains.chains.iter().filter(|c| c.is_global()).collect(),
            _ => chains.chains.iter().collect(),
        };
        if considered.is_empty() {
            return Err(HarvestError::NoChains);
        }

        let mut short_chains = Vec::new();
        for c in &considered {
            if c.len() < self.nbest {
                if self.strict {
                    return Err(HarvestError::InsufficientSamples {
                        chain: c.ichain,
                        available: c.len(),
                        requested: self.nbest,
                    });
                }
                warn!(chain = c.ichain, available = c.len(), requested = self.nbest, "short chain");
                short_chains.push(c.ichain);
            }
        }

        let population: Vec<f64> = considered
            .iter()
            .flat_map(|c| c.best(self.nbest).iter().map(|s| s.global_misfit))
            .collect();
        if population.is_empty() {
            return Err(HarvestError::NoSamples);
        }
        let (mean, std) = mean_std(&population);

        let retained: Vec<&Chain> = match self.weed {
            WeedLevel::Chains | WeedLevel::ChainsAndSamples => considered
                .into_iter()
                .filter(|c| {
                    let best = c.best(self.nbest);
                    if c.is_global() || best.is_empty() {
                        return true;
                    }
                    let chain_mean = best.iter().map(|s| s.global_misfit).sum::<f64>() / best.len() as f64;
                    let keep = chain_mean <= mean + std;
                    if !keep {
                        debug!(chain = c.ichain, chain_mean, limit = mean + std, "weeding chain");
                    }
                    keep
                })
                .collect(),
            WeedLevel::None | WeedLevel::GlobalOnly => considered,
        };

        let mut by_index: BTreeMap<u64, Sample> = BTreeMap::new();
        for c in &retained {
            for s in c.best(self.nbest) {
                if self.weed == WeedLevel::ChainsAndSamples && s.global_misfit > mean {
                    continue;
                }
                by_index.entry(s.index).or_insert_with(|| Sample {
                    misfit: s.global_misfit,
                    ..s.clone()
                });
            }
        }

        let mut samples: Vec<Sample> = by_index.into_values().collect();
        if samples.is_empty() {
            return Err(HarvestError::NoSamples);
        }
        samples.sort_by(|a, b| a.global_misfit.total_cmp(&b.global_misfit).then(a.index.cmp(&b.index)));

        Ok(Ensemble {
            nbest: self.nbest,
            weed: self.weed,
            parameter_names: Vec::new(),
            retained_chains: retained.iter().map(|c| c.ichain).collect(),
            short_chains,
            samples,
        })
    }
}

/// Harvest the chains stored in `rundir` and write `harvest/ensemble.json`.
pub fn harvest(rundir: impl AsRef<Path>, opts: &HarvestOptions) -> InversionResult<Ensemble> {
    let rd = Rundir::open(rundir.as_ref());
    let out = rd.ensemble_path();
    if out.exists() && !opts.force {
        return Err(HarvestError::AlreadyHarvested(out).into());
    }

    let chains = rd.read_chains()?;
    let mut ensemble = Harvester::from(opts).select(&chains)?;
    if rd.path().join(PROBLEM_FILE).is_file() {
        ensemble.parameter_names = rd.read_problem()?.parameter_names;
    }

    rd.write_ensemble(&ensemble)?;
    info!(
        rundir = %rd.path().display(),
        nsamples = ensemble.len(),
        nchains = ensemble.retained_chains.len(),
        weed = u8::from(opts.weed),
        "harvest complete"
    );
    Ok(ensemble)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(ichain: usize, base: u64, misfits: &[f64]) -> Chain {
        let mut c = Chain::new(ichain, 10);
        for (i, &m) in misfits.iter().enumerate() {
            c.offer(Sample {
                index: base + i as u64,
                x: vec![m],
                global_misfit: m,
                misfit: m,
            });
        }
        c
    }

    #[test]
    fn weed_level_parsing() {
        assert_eq!(WeedLevel::try_from(2).unwrap(), WeedLevel::ChainsAndSamples);
        assert_eq!(WeedLevel::try_from(4).unwrap_err(), HarvestError::InvalidWeedLevel(4));
        let w: WeedLevel = serde_json::from_str("3").unwrap();
        assert_eq!(w, WeedLevel::GlobalOnly);
        assert!(serde_json::from_str::<WeedLevel>("7").is_err());
    }

    #[test]
    fn duplicates_are_merged() {
        let set = ChainSet {
            chains: vec![chain(0, 0, &[1.0, 2.0]), chain(1, 0, &[1.0, 2.0])],
        };
        let e = Harvester::new(2, WeedLevel::None).select(&set).unwrap();
        assert_eq!(e.len(), 2);
        assert!(!e.is_short());
    }

    #[test]
    fn sample_level_weeding_drops_above_mean() {
        let set = ChainSet {
            chains: vec![chain(0, 0, &[1.0, 2.0, 3.0, 4.0])],
        };
        let e = Harvester::new(4, WeedLevel::ChainsAndSamples).select(&set).unwrap();
        let kept: Vec<f64> = e.samples.iter().map(|s| s.global_misfit).collect();
        assert_eq!(kept, vec![1.0, 2.0]);
    }

    #[test]
    fn short_chains_flagged_or_rejected() {
        let set = ChainSet {
            chains: vec![chain(0, 0, &[1.0, 2.0])],
        };
        let e = Harvester::new(5, WeedLevel::None).select(&set).unwrap();
        assert_eq!(e.short_chains, vec![0]);
        assert_eq!(e.len(), 2);

        let err = Harvester::new(5, WeedLevel::None).strict(true).select(&set).unwrap_err();
        assert_eq!(
            err,
            HarvestError::InsufficientSamples {
                chain: 0,
                available: 2,
                requested: 5
            }
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(
            Harvester::new(5, WeedLevel::None).select(&ChainSet::default()).unwrap_err(),
            HarvestError::NoChains
        );
        let set = ChainSet::new(1, 5);
        assert_eq!(
            Harvester::new(5, WeedLevel::None).select(&set).unwrap_err(),
            HarvestError::NoSamples
        );
    }
}
