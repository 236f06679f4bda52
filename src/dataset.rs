//! Read-only access to observations.
//!
//! The inversion never mutates a dataset; targets hold an `Arc` to it and
//! look scenes/campaigns up by id when scoring a model.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

fn invalid(record: &str, reason: String) -> ConfigurationError {
    ConfigurationError::InvalidRecord {
        record: record.to_string(),
        reason,
    }
}

/// Down-sampled satellite (InSAR) scene.
///
/// Per-leaf vectors all have `nleaves()` entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatelliteScene {
    pub scene_id: String,
    /// Lower-left corner of the scene frame.
    pub ll_lat: f64,
    pub ll_lon: f64,
    /// Observed line-of-sight displacement per quadtree leaf [m].
    pub leaf_medians: Vec<f64>,
    /// Leaf focal points relative to the frame origin, `(east, north)` [m].
    pub leaf_focal_points: Vec<(f64, f64)>,
    /// Leaf distance from the scene centre, `(east, north)` [m].
    pub leaf_center_distance: Vec<(f64, f64)>,
    pub leaf_thetas: Vec<f64>,
    pub leaf_phis: Vec<f64>,
    /// Covariance-derived weight per leaf.
    pub weight_vector: Vec<f64>,
}

impl SatelliteScene {
    pub fn nleaves(&self) -> usize {
        self.leaf_medians.len()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let n = self.nleaves();
        let lengths = [
            ("leaf_focal_points", self.leaf_focal_points.len()),
            ("leaf_center_distance", self.leaf_center_distance.len()),
            ("leaf_thetas", self.leaf_thetas.len()),
            ("leaf_phis", self.leaf_phis.len()),
            ("weight_vector", self.weight_vector.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(invalid(
                    &self.scene_id,
                    format!("{} has {} entries, leaf_medians has {}", name, len, n),
                ));
            }
        }
        Ok(())
    }
}

/// One observed displacement component with its uncertainty.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GnssComponent {
    pub shift: f64,
    pub sigma: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GnssStation {
    pub code: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub north: Option<GnssComponent>,
    #[serde(default)]
    pub east: Option<GnssComponent>,
    #[serde(default)]
    pub up: Option<GnssComponent>,
}

impl GnssStation {
    /// Observed components in north/east/up order, skipping absent ones.
    pub fn components(&self) -> impl Iterator<Item = (GnssAxis, GnssComponent)> + '_ {
        [
            (GnssAxis::North, self.north),
            (GnssAxis::East, self.east),
            (GnssAxis::Up, self.up),
        ]
        .into_iter()
        .filter_map(|(axis, c)| c.map(|c| (axis, c)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GnssAxis {
    North,
    East,
    Up,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GnssCampaign {
    pub name: String,
    pub stations: Vec<GnssStation>,
}

impl GnssCampaign {
    pub fn ncomponents(&self) -> usize {
        self.stations.iter().map(|s| s.components().count()).sum()
    }
}

/// Observed seismogram for one channel, regularly sampled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveformChannel {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub lat: f64,
    pub lon: f64,
    pub tmin: f64,
    pub deltat: f64,
    pub ydata: Vec<f64>,
}

impl WaveformChannel {
    /// `NET.STA.LOC.CHA`
    pub fn codes(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.deltat.is_finite() && self.deltat > 0.0) {
            return Err(invalid(
                &self.codes(),
                format!("sampling interval must be positive, got {}", self.deltat),
            ));
        }
        if !self.tmin.is_finite() {
            return Err(invalid(&self.codes(), "start time is not finite".into()));
        }
        Ok(())
    }
}

/// Read-only lookup of observations by id.
pub trait DatasetProvider: Send + Sync {
    fn kite_scenes(&self) -> &[SatelliteScene];

    fn gnss_campaigns(&self) -> &[GnssCampaign];

    fn waveforms(&self) -> &[WaveformChannel];

    fn get_kite_scene(&self, scene_id: &str) -> Option<&SatelliteScene> {
        self.kite_scenes().iter().find(|s| s.scene_id == scene_id)
    }

    fn get_gnss_campaign(&self, name: &str) -> Option<&GnssCampaign> {
        self.gnss_campaigns().iter().find(|c| c.name == name)
    }

    fn get_waveform(&self, codes: &str) -> Option<&WaveformChannel> {
        self.waveforms().iter().find(|w| w.codes() == codes)
    }
}

/// Plain in-memory dataset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub kite_scenes: Vec<SatelliteScene>,
    #[serde(default)]
    pub gnss_campaigns: Vec<GnssCampaign>,
    #[serde(default)]
    pub waveforms: Vec<WaveformChannel>,
}

impl DatasetProvider for Dataset {
    fn kite_scenes(&self) -> &[SatelliteScene] {
        &self.kite_scenes
    }

    fn gnss_campaigns(&self) -> &[GnssCampaign] {
        &self.gnss_campaigns
    }

    fn waveforms(&self) -> &[WaveformChannel] {
        &self.waveforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_components_skip_missing() {
        let st = GnssStation {
            code: "ABCD".into(),
            lat: 0.0,
            lon: 0.0,
            north: Some(GnssComponent { shift: 0.01, sigma: 0.001 }),
            east: None,
            up: Some(GnssComponent { shift: -0.02, sigma: 0.003 }),
        };
        let axes: Vec<GnssAxis> = st.components().map(|(a, _)| a).collect();
        assert_eq!(axes, vec![GnssAxis::North, GnssAxis::Up]);
    }

    #[test]
    fn lookup_by_codes() {
        let ds = Dataset {
            waveforms: vec![WaveformChannel {
                network: "GE".into(),
                station: "STA".into(),
                location: "".into(),
                channel: "BHZ".into(),
                lat: 0.0,
                lon: 0.0,
                tmin: 0.0,
                deltat: 1.0,
                ydata: vec![0.0; 4],
            }],
            ..Default::default()
        };
        assert!(ds.get_waveform("GE.STA..BHZ").is_some());
        assert!(ds.get_kite_scene("nope").is_none());
    }

    #[test]
    fn short_leaf_vectors_are_rejected() {
        let mut scene = SatelliteScene {
            scene_id: "asc".into(),
            ll_lat: 0.0,
            ll_lon: 0.0,
            leaf_medians: vec![0.1, 0.2],
            leaf_focal_points: vec![(0.0, 0.0); 2],
            leaf_center_distance: vec![(0.0, 0.0); 2],
            leaf_thetas: vec![0.5; 2],
            leaf_phis: vec![0.1; 2],
            weight_vector: vec![1.0; 2],
        };
        assert!(scene.validate().is_ok());

        scene.weight_vector.pop();
        assert!(matches!(
            scene.validate(),
            Err(ConfigurationError::InvalidRecord { ref record, .. }) if record == "asc"
        ));
    }
}
