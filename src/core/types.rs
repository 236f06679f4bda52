use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

// ===== SEARCH SPACE =====

/// Named, unit-tagged scalar dimension of the search space.
///
/// The full name is group-qualified (`<group>.<name>`) so that nuisance
/// parameters contributed by different targets never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    unit: String,
    #[serde(default)]
    groups: Vec<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            groups: Vec::new(),
        }
    }

    /// Copy of this parameter placed under `groups`.
    pub fn with_groups(&self, groups: Vec<String>) -> Self {
        Self {
            name: self.name.clone(),
            unit: self.unit.clone(),
            groups,
        }
    }

    pub fn name(&self) -> String {
        if self.groups.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.groups.join("."), self.name)
        }
    }

    pub fn name_nogroups(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.unit)
    }
}

/// Closed interval `[start, stop]`.
///
/// Accepts the textual form `"-0.5 .. 0.5"` as well as `{start, stop}` when
/// deserialized.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr")]
pub struct Range {
    pub start: f64,
    pub stop: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeRepr {
    Text(String),
    Bounds { start: f64, stop: f64 },
}

impl TryFrom<RangeRepr> for Range {
    type Error = String;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        match repr {
            RangeRepr::Text(s) => s.parse::<Range>().map_err(|e| e.to_string()),
            RangeRepr::Bounds { start, stop } => Ok(Range { start, stop }),
        }
    }
}

impl Range {
    pub fn new(start: f64, stop: f64) -> Self {
        Self { start, stop }
    }

    pub fn width(&self) -> f64 {
        self.stop - self.start
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.start && value <= self.stop
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.start, self.stop)
    }

    pub fn as_bounds(&self) -> (f64, f64) {
        (self.start, self.stop)
    }

    /// Reject reversed or non-finite intervals.
    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        if !self.start.is_finite() || !self.stop.is_finite() || self.start > self.stop {
            return Err(ConfigurationError::InvalidRange {
                name: name.to_string(),
                start: self.start,
                stop: self.stop,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start, self.stop)
    }
}

impl FromStr for Range {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigurationError::InvalidOption {
            name: "range".into(),
            reason: format!("cannot parse '{}' as 'start .. stop'", s),
        };

        let (a, b) = s.split_once("..").ok_or_else(invalid)?;
        let start = a.trim().parse::<f64>().map_err(|_| invalid())?;
        let stop = b.trim().parse::<f64>().map_err(|_| invalid())?;
        Ok(Range { start, stop })
    }
}

// ===== SOURCE / EVENT =====

/// A candidate source model: parameter values keyed by parameter name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub values: IndexMap<String, f64>,
}

impl Source {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Reference event the inversion is anchored to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Origin time, seconds since epoch.
    pub time: f64,
    pub lat: f64,
    pub lon: f64,
    /// Depth in metres.
    #[serde(default)]
    pub depth: f64,
    #[serde(default)]
    pub magnitude: Option<f64>,
}

impl Event {
    /// Great-circle distance in metres from the event epicentre.
    pub fn distance_to(&self, lat: f64, lon: f64) -> f64 {
        const EARTH_RADIUS: f64 = 6_371_000.0;
        let (phi1, phi2) = (self.lat.to_radians(), lat.to_radians());
        let dphi = phi2 - phi1;
        let dlambda = (lon - self.lon).to_radians();
        let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * a.sqrt().asin()
    }
}
