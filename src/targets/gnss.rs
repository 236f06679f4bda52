use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::base::{MisfitResult, MisfitTarget, ResultDetails, TargetGroupCommon, TargetKind, mismatch};
use crate::core::Event;
use crate::dataset::{DatasetProvider, GnssAxis};
use crate::engine::Synthetics;
use crate::errors::{ConfigurationError, EvaluationError};

/// Selects every campaign in the dataset.
pub const ALL_CAMPAIGNS: &str = "*all";

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GnssMisfitConfig {
    /// Score the vertical component where observed.
    #[serde(default = "default_true")]
    pub include_vertical: bool,
}

impl Default for GnssMisfitConfig {
    fn default() -> Self {
        Self {
            include_vertical: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GnssTargetGroup {
    #[serde(flatten)]
    pub common: TargetGroupCommon,
    #[serde(default)]
    pub gnss_campaigns: Vec<String>,
    #[serde(default)]
    pub misfit_config: GnssMisfitConfig,
}

impl GnssTargetGroup {
    pub fn get_targets(
        &self,
        ds: &Arc<dyn DatasetProvider>,
        _event: &Event,
        default_path: &str,
    ) -> Result<Vec<MisfitTarget>, ConfigurationError> {
        debug!("Selecting GNSS targets...");
        let path = self.common.resolve_path(default_path)?;
        let take_all = self.gnss_campaigns.iter().any(|c| c == ALL_CAMPAIGNS);

        if !take_all {
            for name in &self.gnss_campaigns {
                if ds.get_gnss_campaign(name).is_none() {
                    return Err(ConfigurationError::UnknownCampaign(name.clone()));
                }
            }
        }

        let targets: Vec<MisfitTarget> = ds
            .gnss_campaigns()
            .iter()
            .filter(|c| take_all || self.gnss_campaigns.contains(&c.name))
            .map(|campaign| {
                let kind = GnssMisfitTarget {
                    campaign_name: campaign.name.clone(),
                    station_codes: campaign.stations.iter().map(|s| s.code.clone()).collect(),
                    lats: campaign.stations.iter().map(|s| s.lat).collect(),
                    lons: campaign.stations.iter().map(|s| s.lon).collect(),
                    ncomponents: campaign
                        .stations
                        .iter()
                        .flat_map(|s| s.components())
                        .filter(|(axis, _)| self.misfit_config.include_vertical || *axis != GnssAxis::Up)
                        .count(),
                    misfit_config: self.misfit_config.clone(),
                };
                MisfitTarget::new(&self.common, path.clone(), Arc::clone(ds), TargetKind::Gnss(kind))
            })
            .collect();

        debug!(ntargets = targets.len(), "GNSS targets selected");
        Ok(targets)
    }
}

/// One GNSS campaign; one misfit row per observed station component.
#[derive(Clone, Debug, PartialEq)]
pub struct GnssMisfitTarget {
    pub campaign_name: String,
    pub station_codes: Vec<String>,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub ncomponents: usize,
    pub misfit_config: GnssMisfitConfig,
}

impl GnssMisfitTarget {
    pub(crate) fn post_process(
        &self,
        target_id: &str,
        ds: &dyn DatasetProvider,
        synthetics: &Synthetics,
        full: bool,
    ) -> Result<MisfitResult, EvaluationError> {
        let campaign = ds
            .get_gnss_campaign(&self.campaign_name)
            .ok_or_else(|| EvaluationError::Engine {
                target: target_id.to_string(),
                message: format!("campaign '{}' missing from dataset", self.campaign_name),
            })?;

        let nsta = campaign.stations.len();
        let (north, east, up) = match synthetics {
            Synthetics::Displacements { north, east, up }
                if north.len() == nsta && east.len() == nsta && up.len() == nsta =>
            {
                (north, east, up)
            }
            other => return Err(mismatch(target_id, format!("displacements[{}]", nsta), other)),
        };

        let mut rows = Vec::with_capacity(self.ncomponents);
        let mut observed = Vec::new();
        let mut synthetic = Vec::new();

        for (ista, station) in campaign.stations.iter().enumerate() {
            for (axis, comp) in station.components() {
                let syn = match axis {
                    GnssAxis::North => north[ista],
                    GnssAxis::East => east[ista],
                    GnssAxis::Up if self.misfit_config.include_vertical => up[ista],
                    GnssAxis::Up => continue,
                };
                // zero sigma would blow up the row; such components carry no weight
                let w = if comp.sigma > 0.0 { 1.0 / comp.sigma } else { 0.0 };
                rows.push([((comp.shift - syn) * w).abs(), (comp.shift * w).abs()]);
                if full {
                    observed.push(comp.shift);
                    synthetic.push(syn);
                }
            }
        }

        let mut result = MisfitResult::new(rows);
        if full {
            result = result.with_details(ResultDetails {
                observed,
                synthetic,
                tshift: None,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, GnssCampaign, GnssComponent, GnssStation};

    fn dataset() -> Arc<dyn DatasetProvider> {
        let c = |shift| Some(GnssComponent { shift, sigma: 0.5 });
        Arc::new(Dataset {
            gnss_campaigns: vec![GnssCampaign {
                name: "camp2019".into(),
                stations: vec![
                    GnssStation {
                        code: "AAAA".into(),
                        lat: 0.0,
                        lon: 0.0,
                        north: c(1.0),
                        east: c(2.0),
                        up: c(3.0),
                    },
                    GnssStation {
                        code: "BBBB".into(),
                        lat: 0.1,
                        lon: 0.1,
                        north: c(-1.0),
                        east: None,
                        up: None,
                    },
                ],
            }],
            ..Default::default()
        })
    }

    fn event() -> Event {
        Event {
            name: "ev".into(),
            time: 0.0,
            lat: 0.0,
            lon: 0.0,
            depth: 0.0,
            magnitude: None,
        }
    }

    #[test]
    fn rows_follow_observed_components() {
        let group = GnssTargetGroup {
            common: TargetGroupCommon::default(),
            gnss_campaigns: vec![ALL_CAMPAIGNS.into()],
            misfit_config: GnssMisfitConfig::default(),
        };
        let targets = group.get_targets(&dataset(), &event(), "gnss").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].string_id(), "gnss.camp2019");
        assert_eq!(targets[0].nmisfits(), 4);

        let syn = Synthetics::Displacements {
            north: vec![1.0, 0.0],
            east: vec![0.0, 0.0],
            up: vec![3.0, 0.0],
        };
        let r = targets[0].post_process(&Default::default(), &syn).unwrap();
        assert_eq!(r.misfits(), &[[0.0, 2.0], [4.0, 4.0], [0.0, 6.0], [2.0, 2.0]]);
    }

    #[test]
    fn vertical_can_be_excluded() {
        let group = GnssTargetGroup {
            common: TargetGroupCommon::default(),
            gnss_campaigns: vec!["camp2019".into()],
            misfit_config: GnssMisfitConfig {
                include_vertical: false,
            },
        };
        let targets = group.get_targets(&dataset(), &event(), "gnss").unwrap();
        assert_eq!(targets[0].nmisfits(), 3);
    }

    #[test]
    fn unknown_campaign() {
        let group = GnssTargetGroup {
            common: TargetGroupCommon::default(),
            gnss_campaigns: vec!["other".into()],
            misfit_config: GnssMisfitConfig::default(),
        };
        let err = group.get_targets(&dataset(), &event(), "gnss").unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownCampaign("other".into()));
    }
}
