//! Turns painted catalog meshes into a normalized overdensity field.
//!
//! With data `D` and (optionally) randoms `R`, we compute
//!
//! `δ = (D − α S) / nbar`, with `α = ΣD / ΣS` and `nbar = ΣD / N³`
//!
//! where `S` is the shifted-randoms mesh when one is supplied and the randoms
//! mesh otherwise. Without randoms, `δ = D / nbar − 1`. Unshifted randoms
//! next to shifted ones play no part here.
//!
//! The operation is linear, so it's applied identically to the main and the
//! interlaced (shifted) meshes.

use serde::{Deserialize, Serialize};
use tracing::info;

use meshpower_nostd_internal::Resampler;

use crate::comm::Communicator;
use crate::error::Error;
use crate::geometry::BoxGeometry;
use crate::paint::{CatalogMeshes, PaintReport, PaintedMesh, RealMesh};

/// How the shot noise of an auto-power spectrum is handled
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotNoise {
    /// nothing is subtracted (e.g. for a smooth initial-conditions field)
    Zero,
    /// subtract the Poisson estimate derived from the catalog weights
    #[default]
    Estimate,
    /// subtract a caller-provided value
    Fixed(f64),
}

impl ShotNoise {
    /// the value to subtract, given the Poisson estimate of the field
    pub fn resolve(self, estimate: f64) -> f64 {
        match self {
            ShotNoise::Zero => 0.0,
            ShotNoise::Estimate => estimate,
            ShotNoise::Fixed(value) => value,
        }
    }
}

/// A normalized overdensity field, ready to be transformed
#[derive(Clone, Debug)]
pub struct Overdensity {
    field: PaintedMesh,
    alpha: Option<f64>,
    shot_noise_estimate: f64,
    resampler: Option<Resampler>,
}

impl Overdensity {
    pub fn geometry(&self) -> &BoxGeometry {
        self.field.geometry()
    }

    pub fn field(&self) -> &PaintedMesh {
        &self.field
    }

    /// `ΣD / ΣS` (`None` when no randoms were involved)
    pub fn alpha(&self) -> Option<f64> {
        self.alpha
    }

    /// the kernel that painted this field (`None` for fields provided directly)
    pub fn resampler(&self) -> Option<Resampler> {
        self.resampler
    }

    /// the Poisson shot-noise estimate, which is 0 for fields provided
    /// directly
    pub fn shot_noise_estimate(&self) -> f64 {
        self.shot_noise_estimate
    }

    /// resolves the shot noise to subtract for the given choice
    pub fn shot_noise(&self, choice: ShotNoise) -> f64 {
        choice.resolve(self.shot_noise_estimate)
    }

    pub(crate) fn into_field(self) -> PaintedMesh {
        self.field
    }
}

pub struct OverdensityBuilder;

impl OverdensityBuilder {
    /// Combines painted data (and randoms) meshes into an overdensity.
    ///
    /// The paint reports must be the global ones (as produced by
    /// [`GridAssigner::paint`](crate::GridAssigner::paint)), so every worker
    /// computes identical normalization constants.
    pub fn from_catalog_grids<C: Communicator>(
        comm: &C,
        meshes: CatalogMeshes,
        resampler: Resampler,
    ) -> Result<Overdensity, Error> {
        let CatalogMeshes {
            data: (mut field, data_report),
            randoms,
            shifted_randoms,
        } = meshes;
        let geometry = *field.geometry();
        for (mesh, _) in randoms.iter().chain(shifted_randoms.iter()) {
            geometry.check_compatible(mesh.geometry())?;
        }

        let data_total = data_report.painted_weight;
        if !(data_total > 0.0) {
            return Err(Error::catalog_shape(format!(
                "the total data weight is {data_total}, it must be positive"
            )));
        }
        let nbar = data_total / geometry.n_cells() as f64;
        let volume = geometry.volume();

        // the randoms that actually get subtracted
        let subtracted: Option<(PaintedMesh, PaintReport)> = shifted_randoms.or(randoms);
        let (alpha, shot_noise_estimate) = match subtracted {
            None => {
                field.for_each_mut(|mesh| mesh.local_mut().mapv_inplace(|d| d / nbar - 1.0));
                let sn = volume * data_report.painted_weight_squared / (data_total * data_total);
                (None, sn)
            }
            Some((randoms_mesh, randoms_report)) => {
                let randoms_total = randoms_report.painted_weight;
                if !(randoms_total > 0.0) {
                    return Err(Error::catalog_shape(format!(
                        "the total randoms weight is {randoms_total}, it must be positive"
                    )));
                }
                let alpha = data_total / randoms_total;
                subtract_scaled(&mut field.main, &randoms_mesh.main, alpha, nbar);
                match (field.shifted.as_mut(), randoms_mesh.shifted.as_ref()) {
                    (Some(data_shifted), Some(randoms_shifted)) => {
                        subtract_scaled(data_shifted, randoms_shifted, alpha, nbar)
                    }
                    (None, None) => {}
                    _ => {
                        return Err(Error::internal(
                            "data and randoms meshes disagree about interlacing",
                        ));
                    }
                }
                let sn = volume
                    * (data_report.painted_weight_squared
                        + alpha * alpha * randoms_report.painted_weight_squared)
                    / (data_total * data_total);
                (Some(alpha), sn)
            }
        };

        if comm.is_root() {
            info!(
                alpha = alpha.unwrap_or(f64::NAN),
                nbar,
                shot_noise = shot_noise_estimate,
                "built overdensity"
            );
        }
        Ok(Overdensity {
            field,
            alpha,
            shot_noise_estimate,
            resampler: Some(resampler),
        })
    }

    /// Uses a field as-is (e.g. a precomputed initial-conditions density).
    /// No randoms subtraction, no normalization and no shot noise.
    pub fn field_only(mesh: RealMesh) -> Overdensity {
        Overdensity {
            field: PaintedMesh {
                main: mesh,
                shifted: None,
            },
            alpha: None,
            shot_noise_estimate: 0.0,
            resampler: None,
        }
    }
}

fn subtract_scaled(data: &mut RealMesh, randoms: &RealMesh, alpha: f64, nbar: f64) {
    let mut local = data.local_mut();
    local.zip_mut_with(&randoms.local(), |d, r| *d = (*d - alpha * r) / nbar);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogInputs, PointSet};
    use crate::comm::SerialComm;
    use crate::paint::{BoundaryPolicy, GridAssigner, Interlacing};

    fn assigner(interlacing: Interlacing) -> GridAssigner {
        let geom = BoxGeometry::new(8.0, [4.0; 3], 8).unwrap();
        GridAssigner::new(geom, Resampler::Cic, interlacing, BoundaryPolicy::Periodic)
    }

    fn lattice(step: f64, offset: f64, weight: f64) -> PointSet {
        let mut positions = vec![];
        let n = (8.0 / step) as usize;
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    positions.push([
                        offset + step * i as f64,
                        offset + step * j as f64,
                        offset + step * k as f64,
                    ]);
                }
            }
        }
        let weights = vec![weight; positions.len()];
        PointSet::new(positions, weights).unwrap()
    }

    #[test]
    fn randoms_subtraction_has_zero_mean() {
        let comm = SerialComm::new();
        let inputs = CatalogInputs::with_randoms(lattice(2.0, 0.3, 1.0), lattice(1.0, 0.1, 0.5));
        let a = assigner(Interlacing::TwoShift);
        let meshes = a.paint_catalogs(&comm, &inputs).unwrap();
        let delta = OverdensityBuilder::from_catalog_grids(&comm, meshes, Resampler::Cic).unwrap();
        // 64 data points of weight 1 vs 512 randoms of weight 0.5
        assert!((delta.alpha().unwrap() - 0.25).abs() < 1e-14);
        assert!(delta.field().main.local_sum().abs() < 1e-9);
        assert!(delta.field().shifted.as_ref().unwrap().local_sum().abs() < 1e-9);
        // V (Σw_d² + α² Σw_r²) / (Σw_d)^2 = 512 (64 + 0.0625 * 128) / 4096
        assert!((delta.shot_noise_estimate() - 9.0).abs() < 1e-12);
        assert_eq!(delta.shot_noise(ShotNoise::Zero), 0.0);
        assert_eq!(delta.shot_noise(ShotNoise::Fixed(2.5)), 2.5);
    }

    #[test]
    fn data_only_normalization() {
        let comm = SerialComm::new();
        let data = lattice(1.0, 0.0, 2.0);
        let meshes = assigner(Interlacing::Off)
            .paint_catalogs(&comm, &CatalogInputs::data_only(data))
            .unwrap();
        let delta = OverdensityBuilder::from_catalog_grids(&comm, meshes, Resampler::Cic).unwrap();
        // a point on every node gives a uniform mesh, so delta vanishes
        assert!(delta.field().main.local().iter().all(|d| d.abs() < 1e-12));
        assert!(delta.alpha().is_none());
        // V Σw² / (Σw)² = 512 * 2048 / 1024^2
        assert!((delta.shot_noise_estimate() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn shifted_randoms_take_precedence() {
        let comm = SerialComm::new();
        let inputs = CatalogInputs::with_shifted_randoms(
            lattice(2.0, 0.3, 1.0),
            lattice(1.0, 0.1, 1.0),
            lattice(2.0, 0.7, 2.0),
        );
        let meshes = assigner(Interlacing::Off).paint_catalogs(&comm, &inputs).unwrap();
        let delta = OverdensityBuilder::from_catalog_grids(&comm, meshes, Resampler::Cic).unwrap();
        // 64 data points vs 64 shifted randoms of weight 2
        assert!((delta.alpha().unwrap() - 0.5).abs() < 1e-14);
    }

    #[test]
    fn unshifted_randoms_are_not_painted_next_to_shifted_ones() {
        let comm = SerialComm::new();
        let a = assigner(Interlacing::TwoShift);
        let build = |randoms_weight: f64| {
            let inputs = CatalogInputs::with_shifted_randoms(
                lattice(2.0, 0.3, 1.0),
                lattice(1.0, 0.1, randoms_weight),
                lattice(2.0, 0.7, 2.0),
            );
            let meshes = a.paint_catalogs(&comm, &inputs).unwrap();
            assert!(meshes.randoms.is_none());
            assert!(meshes.shifted_randoms.is_some());
            OverdensityBuilder::from_catalog_grids(&comm, meshes, Resampler::Cic).unwrap()
        };
        let light = build(0.25);
        let heavy = build(40.0);
        assert_eq!(light.field().main, heavy.field().main);
        assert_eq!(light.field().shifted, heavy.field().shifted);
        assert_eq!(light.alpha(), heavy.alpha());
        assert_eq!(light.shot_noise_estimate(), heavy.shot_noise_estimate());
    }

    #[test]
    fn empty_data_is_rejected() {
        let comm = SerialComm::new();
        let meshes = assigner(Interlacing::Off)
            .paint_catalogs(&comm, &CatalogInputs::data_only(PointSet::empty()))
            .unwrap();
        assert!(OverdensityBuilder::from_catalog_grids(&comm, meshes, Resampler::Cic).is_err());
    }

    #[test]
    fn shot_noise_choices() {
        assert_eq!(ShotNoise::Zero.resolve(7.0), 0.0);
        assert_eq!(ShotNoise::Estimate.resolve(7.0), 7.0);
        assert_eq!(ShotNoise::Fixed(-1.0).resolve(7.0), -1.0);
    }

    #[test]
    fn field_only_is_untouched() {
        let geom = BoxGeometry::new(8.0, [4.0; 3], 4).unwrap();
        let mut mesh = RealMesh::zeros(geom, 0..4);
        mesh.local_mut()[[1, 2, 3]] = 5.0;
        let delta = OverdensityBuilder::field_only(mesh.clone());
        assert_eq!(delta.field().main, mesh);
        assert_eq!(delta.shot_noise(ShotNoise::Estimate), 0.0);
        assert!(delta.resampler().is_none());
    }
}
