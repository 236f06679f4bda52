use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::base::{
    MisfitResult, MisfitTarget, ResultDetails, TargetGroupCommon, TargetKind, mismatch,
    missing_parameter,
};
use crate::core::{Event, Parameter, Range};
use crate::dataset::DatasetProvider;
use crate::engine::Synthetics;
use crate::errors::{ConfigurationError, EvaluationError};

/// Selects every scene in the dataset.
pub const ALL_SCENES: &str = "*all";

fn default_ranges() -> IndexMap<String, Range> {
    let mut ranges = IndexMap::new();
    ranges.insert("offset".to_string(), Range::new(-0.5, 0.5));
    ranges.insert("ramp_north".to_string(), Range::new(-1e-4, 1e-4));
    ranges.insert("ramp_east".to_string(), Range::new(-1e-4, 1e-4));
    ranges
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatelliteMisfitConfig {
    /// Solve for a planar orbital ramp per scene.
    #[serde(default = "default_true")]
    pub optimise_orbital_ramp: bool,
    #[serde(default = "default_ranges")]
    pub ranges: IndexMap<String, Range>,
}

impl Default for SatelliteMisfitConfig {
    fn default() -> Self {
        Self {
            optimise_orbital_ramp: true,
            ranges: default_ranges(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatelliteTargetGroup {
    #[serde(flatten)]
    pub common: TargetGroupCommon,
    /// Scene ids to use, or [`ALL_SCENES`].
    #[serde(default)]
    pub kite_scenes: Vec<String>,
    #[serde(default)]
    pub misfit_config: SatelliteMisfitConfig,
}

impl SatelliteTargetGroup {
    pub fn get_targets(
        &self,
        ds: &Arc<dyn DatasetProvider>,
        _event: &Event,
        default_path: &str,
    ) -> Result<Vec<MisfitTarget>, ConfigurationError> {
        debug!("Selecting satellite targets...");
        let path = self.common.resolve_path(default_path)?;
        let take_all = self.kite_scenes.iter().any(|s| s == ALL_SCENES);

        if !take_all {
            for id in &self.kite_scenes {
                if ds.get_kite_scene(id).is_none() {
                    return Err(ConfigurationError::UnknownScene(id.clone()));
                }
            }
        }

        let mut targets = Vec::new();
        for scene in ds.kite_scenes() {
            if !take_all && !self.kite_scenes.contains(&scene.scene_id) {
                continue;
            }
            scene.validate()?;

            let nleaves = scene.nleaves();
            let kind = SatelliteMisfitTarget {
                scene_id: scene.scene_id.clone(),
                lats: vec![scene.ll_lat; nleaves],
                lons: vec![scene.ll_lon; nleaves],
                east_shifts: scene.leaf_focal_points.iter().map(|p| p.0).collect(),
                north_shifts: scene.leaf_focal_points.iter().map(|p| p.1).collect(),
                theta: scene.leaf_thetas.clone(),
                phi: scene.leaf_phis.clone(),
                nleaves,
                misfit_config: self.misfit_config.clone(),
            };

            targets.push(MisfitTarget::new(
                &self.common,
                path.clone(),
                Arc::clone(ds),
                TargetKind::Satellite(kind),
            ));
        }

        debug!(ntargets = targets.len(), "satellite targets selected");
        Ok(targets)
    }
}

/// One satellite scene, scored leaf by leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct SatelliteMisfitTarget {
    pub scene_id: String,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub east_shifts: Vec<f64>,
    pub north_shifts: Vec<f64>,
    pub theta: Vec<f64>,
    pub phi: Vec<f64>,
    pub nleaves: usize,
    pub misfit_config: SatelliteMisfitConfig,
}

impl SatelliteMisfitTarget {
    pub fn available_parameters() -> Vec<Parameter> {
        vec![
            Parameter::new("offset", "m"),
            Parameter::new("ramp_north", "m/m"),
            Parameter::new("ramp_east", "m/m"),
        ]
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        if self.misfit_config.optimise_orbital_ramp {
            Self::available_parameters()
        } else {
            Vec::new()
        }
    }

    pub(crate) fn post_process(
        &self,
        target_id: &str,
        ds: &dyn DatasetProvider,
        synthetics: &Synthetics,
        values: &IndexMap<String, f64>,
        full: bool,
    ) -> Result<MisfitResult, EvaluationError> {
        let scene = ds
            .get_kite_scene(&self.scene_id)
            .ok_or_else(|| EvaluationError::Engine {
                target: target_id.to_string(),
                message: format!("scene '{}' missing from dataset", self.scene_id),
            })?;

        let los = match synthetics {
            Synthetics::Statics { los } if los.len() == scene.nleaves() => los,
            other => return Err(mismatch(target_id, format!("statics[{}]", scene.nleaves()), other)),
        };

        let mut stat_syn = los.clone();
        if self.misfit_config.optimise_orbital_ramp {
            let get = |name: &str| {
                values
                    .get(name)
                    .copied()
                    .ok_or_else(|| missing_parameter(target_id, name))
            };
            let offset = get("offset")?;
            let ramp_east = get("ramp_east")?;
            let ramp_north = get("ramp_north")?;

            for (syn, &(de, dn)) in stat_syn.iter_mut().zip(&scene.leaf_center_distance) {
                *syn += offset + de * ramp_east + dn * ramp_north;
            }
        }

        let rows = scene
            .leaf_medians
            .iter()
            .zip(&stat_syn)
            .zip(&scene.weight_vector)
            .map(|((&obs, &syn), &w)| [((obs - syn) * w).abs(), (obs * w).abs()])
            .collect();

        let mut result = MisfitResult::new(rows);
        if full {
            result = result.with_details(ResultDetails {
                observed: scene.leaf_medians.clone(),
                synthetic: stat_syn,
                tshift: None,
            });
        }
        Ok(result)
    }
}
