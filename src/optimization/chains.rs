use serde::{Deserialize, Serialize};

/// One evaluated model as stored in a chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Evaluation index within the run; unique per model.
    pub index: u64,
    pub x: Vec<f64>,
    /// Unweighted misfit, identical in every chain.
    pub global_misfit: f64,
    /// Misfit under the owning chain's weighting.
    pub misfit: f64,
}

/// Bounded, append-only ranking of the best samples under one weighting.
///
/// Chain 0 is the global chain; chains `1..=nbootstrap` are bootstrap chains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub ichain: usize,
    pub capacity: usize,
    samples: Vec<Sample>,
}

fn rank(a: &Sample, b: &Sample) -> std::cmp::Ordering {
    a.misfit.total_cmp(&b.misfit).then(a.index.cmp(&b.index))
}

impl Chain {
    pub fn new(ichain: usize, capacity: usize) -> Self {
        Self {
            ichain,
            capacity,
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn is_global(&self) -> bool {
        self.ichain == 0
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Keep `sample` if it ranks among the best `capacity`. Returns whether it was kept.
    pub fn offer(&mut self, sample: Sample) -> bool {
        if !sample.misfit.is_finite() {
            return false;
        }
        let pos = self
            .samples
            .partition_point(|s| rank(s, &sample) == std::cmp::Ordering::Less);
        if pos >= self.capacity {
            return false;
        }
        self.samples.insert(pos, sample);
        self.samples.truncate(self.capacity);
        true
    }

    /// Samples ranked best first.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn best(&self, n: usize) -> &[Sample] {
        &self.samples[..n.min(self.samples.len())]
    }

    pub fn best_misfit(&self) -> Option<f64> {
        self.samples.first().map(|s| s.misfit)
    }

    /// Per-parameter standard deviation of the retained models.
    pub fn std(&self, nparams: usize) -> Vec<f64> {
        let n = self.samples.len();
        if n < 2 {
            return vec![0.0; nparams];
        }
        (0..nparams)
            .map(|i| {
                let mean = self.samples.iter().map(|s| s.x[i]).sum::<f64>() / n as f64;
                let var = self.samples.iter().map(|s| (s.x[i] - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                var.sqrt()
            })
            .collect()
    }
}

/// The global chain followed by every bootstrap chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainSet {
    pub chains: Vec<Chain>,
}

impl ChainSet {
    pub fn new(nbootstrap: usize, capacity: usize) -> Self {
        Self {
            chains: (0..=nbootstrap).map(|i| Chain::new(i, capacity)).collect(),
        }
    }

    pub fn global(&self) -> Option<&Chain> {
        self.chains.first()
    }

    pub fn nbootstrap(&self) -> usize {
        self.chains.len().saturating_sub(1)
    }

    /// Offer one model to every chain; `misfits[i]` is its misfit under chain `i`.
    pub fn offer(&mut self, index: u64, x: &[f64], misfits: &[f64]) {
        let global_misfit = misfits[0];
        for (chain, &misfit) in self.chains.iter_mut().zip(misfits) {
            chain.offer(Sample {
                index,
                x: x.to_vec(),
                global_misfit,
                misfit,
            });
        }
    }

    pub fn best_misfits(&self) -> Vec<f64> {
        self.chains
            .iter()
            .map(|c| c.best_misfit().unwrap_or(f64::INFINITY))
            .collect()
    }
}
