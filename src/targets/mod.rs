//! Misfit targets: one per concrete observation, produced by target groups.

mod base;
pub mod gnss;
pub mod satellite;
pub mod waveform;

pub use base::{
    AnalyserResult, Interpolation, MisfitResult, MisfitTarget, ResultDetails, ResultMode,
    TargetGroup, TargetGroupCommon, TargetKind,
};
pub use gnss::{GnssMisfitConfig, GnssMisfitTarget, GnssTargetGroup};
pub use satellite::{SatelliteMisfitConfig, SatelliteMisfitTarget, SatelliteTargetGroup};
pub use waveform::{WaveformDomain, WaveformMisfitConfig, WaveformMisfitTarget, WaveformTargetGroup};
