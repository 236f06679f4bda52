#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quakefit::dataset::{GnssCampaign, GnssComponent, GnssStation, SatelliteScene};
use quakefit::targets::{
    GnssMisfitConfig, GnssTargetGroup, SatelliteMisfitConfig, SatelliteTargetGroup, TargetGroupCommon,
    TargetKind,
};
use quakefit::{
    Chain, Dataset, DatasetProvider, Event, ForwardModel, InversionProblem, ModellingRequest, Parameter,
    Range, Sample, Source, Synthetics, TargetGroup,
};

pub const TRUE_A: f64 = 1.0;
pub const TRUE_B: f64 = 0.5;

/// Linear toy model: LOS = a + b * east_km, GNSS = (north a, east b, up 0).
pub struct ToyEngine {
    /// Fail every evaluation with `a` above this value.
    pub fail_above: Option<f64>,
}

impl ToyEngine {
    pub fn new() -> Self {
        Self { fail_above: None }
    }
}

impl ForwardModel for ToyEngine {
    fn process(&self, source: &Source, request: &ModellingRequest<'_>) -> Result<Synthetics, String> {
        let a = source.get("a").ok_or_else(|| "missing a".to_string())?;
        let b = source.get("b").ok_or_else(|| "missing b".to_string())?;
        if self.fail_above.is_some_and(|limit| a > limit) {
            return Err(format!("a = {} out of model domain", a));
        }
        match request.kind {
            TargetKind::Satellite(t) => Ok(Synthetics::Statics {
                los: t.east_shifts.iter().map(|e| a + b * e / 1000.0).collect(),
            }),
            TargetKind::Gnss(t) => {
                let n = t.station_codes.len();
                Ok(Synthetics::Displacements {
                    north: vec![a; n],
                    east: vec![b; n],
                    up: vec![0.0; n],
                })
            }
            TargetKind::Waveform(_) => Err("toy engine has no waveforms".into()),
        }
    }
}

fn scene(scene_id: &str) -> SatelliteScene {
    let east = [0.0, 1000.0, 2000.0, 3000.0];
    SatelliteScene {
        scene_id: scene_id.into(),
        ll_lat: 0.0,
        ll_lon: 0.0,
        leaf_medians: east.iter().map(|e| TRUE_A + TRUE_B * e / 1000.0).collect(),
        leaf_focal_points: east.iter().map(|&e| (e, 0.0)).collect(),
        leaf_center_distance: vec![(0.0, 0.0); 4],
        leaf_thetas: vec![0.5; 4],
        leaf_phis: vec![0.1; 4],
        weight_vector: vec![1.0; 4],
    }
}

pub fn dataset() -> Arc<dyn DatasetProvider> {
    let c = |shift| Some(GnssComponent { shift, sigma: 0.1 });
    Arc::new(Dataset {
        kite_scenes: vec![scene("asc"), scene("dsc")],
        gnss_campaigns: vec![GnssCampaign {
            name: "camp".into(),
            stations: ["S001", "S002"]
                .iter()
                .map(|code| GnssStation {
                    code: code.to_string(),
                    lat: 0.1,
                    lon: 0.1,
                    north: c(TRUE_A),
                    east: c(TRUE_B),
                    up: c(0.0),
                })
                .collect(),
        }],
        waveforms: Vec::new(),
    })
}

pub fn event(name: &str) -> Event {
    Event {
        name: name.into(),
        time: 0.0,
        lat: 0.0,
        lon: 0.0,
        depth: 5000.0,
        magnitude: Some(6.0),
    }
}

pub fn satellite_group(path: Option<&str>, scenes: &[&str], ramp: bool) -> TargetGroup {
    TargetGroup::Satellite(SatelliteTargetGroup {
        common: TargetGroupCommon {
            path: path.map(String::from),
            ..Default::default()
        },
        kite_scenes: scenes.iter().map(|s| s.to_string()).collect(),
        misfit_config: SatelliteMisfitConfig {
            optimise_orbital_ramp: ramp,
            ..Default::default()
        },
    })
}

pub fn gnss_group(path: Option<&str>) -> TargetGroup {
    TargetGroup::Gnss(GnssTargetGroup {
        common: TargetGroupCommon {
            path: path.map(String::from),
            ..Default::default()
        },
        gnss_campaigns: vec!["camp".into()],
        misfit_config: GnssMisfitConfig::default(),
    })
}

pub fn problem_with(engine: ToyEngine, groups: Vec<TargetGroup>) -> InversionProblem {
    InversionProblem::builder("toy", event("ev1"))
        .parameter(Parameter::new("a", "m"), Range::new(-5.0, 5.0))
        .parameter(Parameter::new("b", "m/km"), Range::new(-5.0, 5.0))
        .target_groups(groups)
        .dataset(dataset())
        .engine(Arc::new(engine))
        .build()
        .unwrap()
}

pub fn toy_problem() -> InversionProblem {
    problem_with(
        ToyEngine::new(),
        vec![satellite_group(Some("insar"), &["asc"], false), gnss_group(Some("gnss"))],
    )
}

/// Chain whose samples carry `misfits` as both global and chain misfit.
pub fn chain(ichain: usize, base_index: u64, misfits: &[f64]) -> Chain {
    let mut c = Chain::new(ichain, misfits.len().max(1));
    for (i, &m) in misfits.iter().enumerate() {
        c.offer(Sample {
            index: base_index + i as u64,
            x: vec![m, -m],
            global_misfit: m,
            misfit: m,
        });
    }
    c
}

/// Byte snapshot of every file below `root`.
pub fn snapshot_dir(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let bytes = std::fs::read(e.path()).unwrap();
            (e.path().to_path_buf(), bytes)
        })
        .collect()
}

/// Recursive copy of a run directory.
pub fn copy_dir(from: &Path, to: &Path) {
    for entry in walkdir::WalkDir::new(from).into_iter().filter_map(|e| e.ok()) {
        let target = to.join(entry.path().strip_prefix(from).unwrap());
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).unwrap();
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}
