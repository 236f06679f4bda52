//! Interface to the external forward model.
//!
//! The forward model turns a candidate [`Source`] into synthetic data for one
//! target. It is treated as an opaque, synchronous, pure function.

use crate::core::Source;
use crate::targets::{Interpolation, TargetKind};

/// Everything the forward model needs to know about one target.
#[derive(Debug, Clone)]
pub struct ModellingRequest<'a> {
    pub target_id: String,
    pub store_id: Option<&'a str>,
    pub interpolation: Interpolation,
    pub kind: &'a TargetKind,
}

/// Synthetic data returned for one target.
#[derive(Debug, Clone, PartialEq)]
pub enum Synthetics {
    /// Line-of-sight displacement per satellite-scene leaf [m].
    Statics { los: Vec<f64> },
    /// Per-station displacement components [m].
    Displacements {
        north: Vec<f64>,
        east: Vec<f64>,
        up: Vec<f64>,
    },
    /// Regularly sampled synthetic seismogram.
    Trace { tmin: f64, deltat: f64, ydata: Vec<f64> },
}

impl Synthetics {
    pub fn describe(&self) -> String {
        match self {
            Self::Statics { los } => format!("statics[{}]", los.len()),
            Self::Displacements { north, .. } => format!("displacements[{}]", north.len()),
            Self::Trace { ydata, deltat, .. } => format!("trace[{} @ {}s]", ydata.len(), deltat),
        }
    }
}

pub trait ForwardModel: Send + Sync {
    /// Compute synthetics for `request` given `source`.
    ///
    /// Failures are reported as plain messages; the caller attaches the
    /// target id and decides whether the candidate is rejected.
    fn process(&self, source: &Source, request: &ModellingRequest<'_>) -> Result<Synthetics, String>;
}
