//! Estimator configuration.
//!
//! The configuration is plain data: it is deserialized from JSON (with
//! defaults for everything but `nmesh` and `bias`) and checked by
//! [`EstimatorConfig::validate`] before an [`Estimator`](crate::Estimator)
//! accepts it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use meshpower_nostd_internal::{IrregularBinEdges, Resampler};

use crate::binner::LineOfSight;
use crate::error::Error;
use crate::overdensity::ShotNoise;
use crate::paint::{BoundaryPolicy, Interlacing};
use crate::propagator::DEFAULT_DIVISION_FLOOR;

const MAX_NMESH: usize = 1 << 14;

#[derive(Serialize, Deserialize)]
#[serde(remote = "Resampler", rename_all = "snake_case")]
enum ResamplerDef {
    Ngp,
    Cic,
    Tsc,
}

/// A sequence of bin edges
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSpec {
    Explicit(Vec<f64>),
    /// `start, start + step, ...` for every value below `stop` (like
    /// `numpy.arange`)
    Arange { start: f64, stop: f64, step: f64 },
    /// `num` evenly spaced values from `start` to `stop` (both included)
    Linspace { start: f64, stop: f64, num: usize },
}

impl EdgeSpec {
    /// Expands the edges and checks that they are monotonically increasing.
    pub fn to_edges(&self, who: &'static str) -> Result<Vec<f64>, Error> {
        let edges = match *self {
            EdgeSpec::Explicit(ref edges) => edges.clone(),
            EdgeSpec::Arange { start, stop, step } => {
                if !(step > 0.0 && start.is_finite() && stop.is_finite()) {
                    return Err(Error::bin_edge(who, "arange needs finite bounds and step > 0"));
                }
                let n = ((stop - start) / step).ceil().max(0.0) as usize;
                (0..n).map(|i| start + i as f64 * step).collect()
            }
            EdgeSpec::Linspace { start, stop, num } => {
                if num < 2 {
                    return Err(Error::bin_edge(who, "linspace needs at least 2 values"));
                }
                let step = (stop - start) / (num - 1) as f64;
                (0..num)
                    .map(|i| if i == num - 1 { stop } else { start + i as f64 * step })
                    .collect()
            }
        };
        IrregularBinEdges::new(&edges).map_err(|what| Error::bin_edge(who, what))?;
        Ok(edges)
    }
}

fn default_boxpad() -> f64 {
    1.5
}

fn default_resampler() -> Resampler {
    Resampler::Tsc
}

fn default_k_edges() -> EdgeSpec {
    EdgeSpec::Arange {
        start: 0.01,
        stop: 1.0,
        step: 0.005,
    }
}

fn default_mu_edges() -> EdgeSpec {
    EdgeSpec::Linspace {
        start: 0.0,
        stop: 1.0,
        num: 21,
    }
}

fn default_ells() -> Vec<u32> {
    vec![0, 2, 4]
}

fn default_compensate() -> bool {
    true
}

fn default_division_floor() -> f64 {
    DEFAULT_DIVISION_FLOOR
}

/// Everything needed to go from catalogs to spectra and propagators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimatorConfig {
    /// number of cells per axis
    pub nmesh: usize,
    /// ratio between the box size and the largest catalog extent, when the
    /// box is derived from the catalogs
    #[serde(default = "default_boxpad")]
    pub boxpad: f64,
    #[serde(with = "ResamplerDef", default = "default_resampler")]
    pub resampler: Resampler,
    #[serde(default)]
    pub interlacing: Interlacing,
    #[serde(default)]
    pub boundary: BoundaryPolicy,
    #[serde(default = "default_k_edges")]
    pub k_edges: EdgeSpec,
    #[serde(default = "default_mu_edges")]
    pub mu_edges: EdgeSpec,
    #[serde(default = "default_ells")]
    pub ells: Vec<u32>,
    #[serde(default)]
    pub los: LineOfSight,
    /// the observer position used by [`LineOfSight::FirstPoint`]
    #[serde(default)]
    pub observer: [f64; 3],
    pub bias: f64,
    #[serde(default)]
    pub growth_rate: Option<f64>,
    /// whether to deconvolve the mass-assignment window
    #[serde(default = "default_compensate")]
    pub compensate: bool,
    /// absolute floor below which a ratio's denominator counts as zero. Each
    /// ratio also applies [`RELATIVE_DIVISION_FLOOR`](crate::RELATIVE_DIVISION_FLOOR)
    /// times its largest denominator magnitude, whichever is larger.
    #[serde(default = "default_division_floor")]
    pub division_floor: f64,
    /// the shot noise subtracted from auto-power spectra of catalog meshes
    #[serde(default)]
    pub auto_shotnoise: ShotNoise,
}

impl EstimatorConfig {
    /// a configuration with default values for everything except `nmesh`
    /// and `bias`
    pub fn new(nmesh: usize, bias: f64) -> Self {
        Self {
            nmesh,
            boxpad: default_boxpad(),
            resampler: default_resampler(),
            interlacing: Interlacing::default(),
            boundary: BoundaryPolicy::default(),
            k_edges: default_k_edges(),
            mu_edges: default_mu_edges(),
            ells: default_ells(),
            los: LineOfSight::default(),
            observer: [0.0; 3],
            bias,
            growth_rate: None,
            compensate: default_compensate(),
            division_floor: default_division_floor(),
            auto_shotnoise: ShotNoise::default(),
        }
    }

    /// Parses (and validates) a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: EstimatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads (and validates) a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.nmesh < 2 || self.nmesh > MAX_NMESH {
            return Err(Error::integer_range(
                "nmesh",
                self.nmesh as i64,
                2,
                MAX_NMESH as i64,
            ));
        }
        if self.nmesh % 2 != 0 {
            return Err(Error::config("nmesh", format!("{} must be even", self.nmesh)));
        }
        if !(self.boxpad >= 1.0 && self.boxpad.is_finite()) {
            return Err(Error::config("boxpad", format!("{} must be at least 1", self.boxpad)));
        }
        if !(self.bias.is_finite() && self.bias > 0.0) {
            return Err(Error::config("bias", format!("{} must be positive and finite", self.bias)));
        }
        if let Some(f) = self.growth_rate {
            if !f.is_finite() {
                return Err(Error::config("growth_rate", "must be finite"));
            }
        }
        if !(self.division_floor.is_finite() && self.division_floor >= 0.0) {
            return Err(Error::config("division_floor", "must be non-negative and finite"));
        }
        if self.ells.is_empty() {
            return Err(Error::config("ells", "at least one multipole is required"));
        }
        if let ShotNoise::Fixed(v) = self.auto_shotnoise {
            if !v.is_finite() {
                return Err(Error::config("auto_shotnoise", "must be finite"));
            }
        }
        let k_edges = self.k_edges()?;
        if k_edges[0] < 0.0 {
            return Err(Error::bin_edge("k_edges", "edges must be non-negative"));
        }
        let mu_edges = self.mu_edges()?;
        if mu_edges[0] < -1.0 || mu_edges[mu_edges.len() - 1] > 1.0 {
            return Err(Error::bin_edge("mu_edges", "edges must lie within [-1, 1]"));
        }
        Ok(())
    }

    pub fn k_edges(&self) -> Result<Vec<f64>, Error> {
        self.k_edges.to_edges("k_edges")
    }

    pub fn mu_edges(&self) -> Result<Vec<f64>, Error> {
        self.mu_edges.to_edges("mu_edges")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EstimatorConfig::from_json_str(r#"{"nmesh": 64, "bias": 1.99}"#).unwrap();
        assert_eq!(config, EstimatorConfig::new(64, 1.99));
        assert_eq!(config.resampler, Resampler::Tsc);
        assert_eq!(config.interlacing, Interlacing::TwoShift);
        assert_eq!(config.ells, vec![0, 2, 4]);
        assert_eq!(config.los, LineOfSight::FirstPoint);
        assert_eq!(config.division_floor, 1e-30);
        let k = config.k_edges().unwrap();
        assert_eq!(k.len(), 198);
        assert_eq!(k[0], 0.01);
        let mu = config.mu_edges().unwrap();
        assert_eq!(mu.len(), 21);
        assert_eq!(mu[20], 1.0);
        assert!((mu[1] - 0.05).abs() < 1e-15);
    }

    #[test]
    fn full_config() {
        let json = r#"{
            "nmesh": 32,
            "boxpad": 1.2,
            "resampler": "cic",
            "interlacing": "off",
            "boundary": "drop_outside",
            "k_edges": {"explicit": [0.0, 0.1, 0.2]},
            "mu_edges": {"linspace": {"start": -1.0, "stop": 1.0, "num": 5}},
            "ells": [0, 2],
            "los": {"fixed": [0.0, 0.0, 2.0]},
            "observer": [1.0, 2.0, 3.0],
            "bias": 2.0,
            "growth_rate": 0.8,
            "compensate": false,
            "division_floor": 1e-20,
            "auto_shotnoise": {"fixed": 10.0}
        }"#;
        let config = EstimatorConfig::from_json_str(json).unwrap();
        assert_eq!(config.resampler, Resampler::Cic);
        assert_eq!(config.boundary, BoundaryPolicy::DropOutside);
        assert_eq!(config.los, LineOfSight::Fixed([0.0, 0.0, 2.0]));
        assert_eq!(config.auto_shotnoise, ShotNoise::Fixed(10.0));
        assert_eq!(config.mu_edges().unwrap(), vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(config.growth_rate, Some(0.8));

        let back = EstimatorConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn invalid_values() {
        for json in [
            r#"{"nmesh": 33, "bias": 1.0}"#,
            r#"{"nmesh": 0, "bias": 1.0}"#,
            r#"{"nmesh": 32, "bias": 0.0}"#,
            r#"{"nmesh": 32, "bias": 1.0, "boxpad": 0.5}"#,
            r#"{"nmesh": 32, "bias": 1.0, "ells": []}"#,
            r#"{"nmesh": 32, "bias": 1.0, "k_edges": {"explicit": [0.2, 0.1]}}"#,
            r#"{"nmesh": 32, "bias": 1.0, "mu_edges": {"explicit": [0.0, 1.5]}}"#,
            r#"{"nmesh": 32, "bias": 1.0, "resampler": "pcs"}"#,
            r#"{"nmesh": 32, "bias": 1.0, "typo": 1}"#,
            r#"{"nmesh": 32}"#,
        ] {
            assert!(EstimatorConfig::from_json_str(json).is_err(), "{json}");
        }
    }

    #[test]
    fn from_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EstimatorConfig::from_path(dir.path().join("nope.json")).is_err());
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"nmesh": 8, "bias": 1.0}"#).unwrap();
        assert_eq!(EstimatorConfig::from_path(&path).unwrap().nmesh, 8);
    }
}
