use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::base::{MisfitResult, MisfitTarget, ResultDetails, TargetGroupCommon, TargetKind, mismatch};
use crate::core::Event;
use crate::dataset::{DatasetProvider, WaveformChannel};
use crate::engine::Synthetics;
use crate::errors::{ConfigurationError, EvaluationError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformDomain {
    #[default]
    TimeDomain,
    /// Compare absolute amplitudes, ignoring polarity.
    Absolute,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveformMisfitConfig {
    #[serde(default)]
    pub domain: WaveformDomain,
    /// Largest time shift [s] tried when aligning synthetics; 0 disables.
    #[serde(default)]
    pub tautoshift_max: f64,
}

fn default_components() -> Vec<String> {
    vec!["Z".into(), "N".into(), "E".into()]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveformTargetGroup {
    #[serde(flatten)]
    pub common: TargetGroupCommon,
    /// Last character of the channel code, e.g. `Z`.
    #[serde(default = "default_components")]
    pub channels: Vec<String>,
    /// Epicentral distance window [m].
    #[serde(default)]
    pub distance_min: f64,
    #[serde(default)]
    pub distance_max: Option<f64>,
    #[serde(default)]
    pub misfit_config: WaveformMisfitConfig,
}

impl WaveformTargetGroup {
    fn selects(&self, event: &Event, ch: &WaveformChannel) -> bool {
        let d = event.distance_to(ch.lat, ch.lon);
        d >= self.distance_min
            && self.distance_max.is_none_or(|dmax| d <= dmax)
            && self.channels.iter().any(|c| ch.channel.ends_with(c.as_str()))
    }

    pub fn get_targets(
        &self,
        ds: &Arc<dyn DatasetProvider>,
        event: &Event,
        default_path: &str,
    ) -> Result<Vec<MisfitTarget>, ConfigurationError> {
        debug!("Selecting waveform targets...");
        let path = self.common.resolve_path(default_path)?;

        if !(self.misfit_config.tautoshift_max.is_finite() && self.misfit_config.tautoshift_max >= 0.0) {
            return Err(ConfigurationError::InvalidOption {
                name: "tautoshift_max".into(),
                reason: "must be finite and not negative".into(),
            });
        }

        let targets: Vec<MisfitTarget> = ds
            .waveforms()
            .iter()
            .filter(|ch| self.selects(event, ch))
            .map(|ch| {
                ch.validate()?;
                let kind = WaveformMisfitTarget {
                    codes: ch.codes(),
                    lat: ch.lat,
                    lon: ch.lon,
                    tmin: ch.tmin,
                    deltat: ch.deltat,
                    nsamples: ch.ydata.len(),
                    misfit_config: self.misfit_config.clone(),
                };
                Ok(MisfitTarget::new(
                    &self.common,
                    path.clone(),
                    Arc::clone(ds),
                    TargetKind::Waveform(kind),
                ))
            })
            .collect::<Result<_, ConfigurationError>>()?;

        debug!(ntargets = targets.len(), "waveform targets selected");
        Ok(targets)
    }
}

/// One waveform channel; one misfit row per observed sample.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformMisfitTarget {
    pub codes: String,
    pub lat: f64,
    pub lon: f64,
    pub tmin: f64,
    pub deltat: f64,
    pub nsamples: usize,
    pub misfit_config: WaveformMisfitConfig,
}

impl WaveformMisfitTarget {
    /// Largest shift in samples; shifts past both traces only compare zeros.
    fn max_shift(&self, nsynthetic: usize) -> i64 {
        let limit = (self.nsamples + nsynthetic) as i64;
        ((self.misfit_config.tautoshift_max / self.deltat).floor() as i64).clamp(0, limit)
    }

    /// Synthetic sample aligned to observed sample `i`; zero outside the trace.
    fn aligned(ydata: &[f64], i: usize, offset: i64) -> f64 {
        match (i as i64).checked_sub(offset) {
            Some(j) if j >= 0 && (j as usize) < ydata.len() => ydata[j as usize],
            _ => 0.0,
        }
    }

    fn transform(&self, v: f64) -> f64 {
        match self.misfit_config.domain {
            WaveformDomain::TimeDomain => v,
            WaveformDomain::Absolute => v.abs(),
        }
    }

    fn residual_power(&self, obs: &[f64], syn: &[f64], offset: i64) -> f64 {
        obs.iter()
            .enumerate()
            .map(|(i, &o)| {
                let r = self.transform(o) - self.transform(Self::aligned(syn, i, offset));
                r * r
            })
            .sum()
    }

    pub(crate) fn post_process(
        &self,
        target_id: &str,
        ds: &dyn DatasetProvider,
        synthetics: &Synthetics,
        full: bool,
    ) -> Result<MisfitResult, EvaluationError> {
        let channel = ds.get_waveform(&self.codes).ok_or_else(|| EvaluationError::Engine {
            target: target_id.to_string(),
            message: format!("channel '{}' missing from dataset", self.codes),
        })?;

        let (tmin, ydata) = match synthetics {
            Synthetics::Trace { tmin, deltat, ydata }
                if (deltat - channel.deltat).abs() <= 1e-6 * channel.deltat =>
            {
                (*tmin, ydata)
            }
            other => return Err(mismatch(target_id, format!("trace[@ {}s]", channel.deltat), other)),
        };

        let base = ((tmin - channel.tmin) / channel.deltat).round() as i64;

        // try shifts by increasing magnitude so ties resolve towards zero
        let mut best = (0i64, self.residual_power(&channel.ydata, ydata, base));
        for k in 1..=self.max_shift(ydata.len()) {
            for shift in [-k, k] {
                let power = self.residual_power(&channel.ydata, ydata, base.saturating_add(shift));
                if power < best.1 {
                    best = (shift, power);
                }
            }
        }
        let offset = base.saturating_add(best.0);

        let mut synthetic = Vec::with_capacity(channel.ydata.len());
        let rows = channel
            .ydata
            .iter()
            .enumerate()
            .map(|(i, &o)| {
                let s = Self::aligned(ydata, i, offset);
                synthetic.push(s);
                let (o, s) = (self.transform(o), self.transform(s));
                [(o - s).abs(), o.abs()]
            })
            .collect();

        let mut result = MisfitResult::new(rows);
        if full {
            result = result.with_details(ResultDetails {
                observed: channel.ydata.clone(),
                synthetic,
                tshift: Some(best.0 as f64 * channel.deltat),
            });
        }
        Ok(result)
    }
}
