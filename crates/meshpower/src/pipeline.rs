//! The explicit context object that strings the stages together.
//!
//! An [`Estimator`] carries the communicator handle and the configuration,
//! so every stage receives them explicitly. Every method is collective: all
//! workers must call them in the same order.

use std::path::Path;

use tracing::info;

use crate::binner::MultipoleBinner;
use crate::catalog::CatalogInputs;
use crate::comm::{self, Communicator};
use crate::config::EstimatorConfig;
use crate::error::Error;
use crate::export::{ExportFormat, Records, write_records};
use crate::fft::{FourierMesh, SpectralTransformer};
use crate::geometry::{BoxGeometry, combined_extent};
use crate::overdensity::{OverdensityBuilder, ShotNoise};
use crate::paint::{GridAssigner, RealMesh};
use crate::propagator::{Correlator, PropagatorResult};
use crate::spectrum::{MultipoleSpectrum, SpectrumWedges};

/// A transformed overdensity, together with the quantities that the
/// binning step needs
#[derive(Clone, Debug)]
pub struct MeshField {
    fourier: FourierMesh,
    shot_noise_estimate: f64,
    alpha: Option<f64>,
    // weighted centroid of the (global) data catalog
    centroid: Option<[f64; 3]>,
}

impl MeshField {
    pub fn geometry(&self) -> &BoxGeometry {
        self.fourier.geometry()
    }

    pub fn fourier(&self) -> &FourierMesh {
        &self.fourier
    }

    pub fn shot_noise_estimate(&self) -> f64 {
        self.shot_noise_estimate
    }

    pub fn alpha(&self) -> Option<f64> {
        self.alpha
    }

    pub fn centroid(&self) -> Option<[f64; 3]> {
        self.centroid
    }

    /// resolves the shot noise to subtract for the given choice
    pub fn shot_noise(&self, choice: ShotNoise) -> f64 {
        choice.resolve(self.shot_noise_estimate)
    }
}

pub struct Estimator<'c, C: Communicator> {
    comm: &'c C,
    config: EstimatorConfig,
    k_edges: Vec<f64>,
    mu_edges: Vec<f64>,
}

impl<'c, C: Communicator> Estimator<'c, C> {
    pub fn new(comm: &'c C, config: EstimatorConfig) -> Result<Self, Error> {
        config.validate()?;
        let k_edges = config.k_edges()?;
        let mu_edges = config.mu_edges()?;
        Ok(Self {
            comm,
            config,
            k_edges,
            mu_edges,
        })
    }

    pub fn comm(&self) -> &'c C {
        self.comm
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// See [`comm::scatter_inputs`]: the coordinating worker passes the
    /// catalogs, everyone else passes `None`.
    pub fn scatter_inputs(&self, inputs: Option<CatalogInputs>) -> Result<CatalogInputs, Error> {
        comm::scatter_inputs(self.comm, inputs)
    }

    /// Derives the box from the global extent of every catalog in `inputs`
    /// (each worker passes its local share).
    pub fn geometry_from_extent(&self, inputs: &CatalogInputs) -> Result<BoxGeometry, Error> {
        let local = combined_extent(&inputs.catalogs());
        let global = self.comm.all_reduce(local, |accum, other| {
            *accum = match (*accum, other) {
                (Some((lo_a, hi_a)), Some((lo_b, hi_b))) => Some((
                    std::array::from_fn(|ax| lo_a[ax].min(lo_b[ax])),
                    std::array::from_fn(|ax| hi_a[ax].max(hi_b[ax])),
                )),
                (a, b) => a.or(b),
            };
            Ok(())
        })?;
        let (lo, hi) = global
            .ok_or_else(|| Error::config("boxsize", "can't derive a box from empty catalogs"))?;
        let geometry = BoxGeometry::from_bounds(lo, hi, self.config.boxpad, self.config.nmesh)?;
        if self.comm.is_root() {
            info!(%geometry, "derived the box from the catalog extent");
        }
        Ok(geometry)
    }

    fn global_centroid(&self, inputs: &CatalogInputs) -> Result<Option<[f64; 3]>, Error> {
        let data = inputs.data();
        let mut sums = vec![0.0; 4];
        for (pos, w) in data.positions().iter().zip(data.weights()) {
            for ax in 0..3 {
                sums[ax] += w * pos[ax];
            }
            sums[3] += w;
        }
        let sums = self.comm.all_reduce_sum(sums)?;
        if sums[3] == 0.0 {
            Ok(None)
        } else {
            Ok(Some([sums[0] / sums[3], sums[1] / sums[3], sums[2] / sums[3]]))
        }
    }

    /// Paints the (local shares of the) catalogs, builds the overdensity and
    /// transforms it.
    pub fn mesh_from_catalogs(
        &self,
        geometry: BoxGeometry,
        inputs: &CatalogInputs,
    ) -> Result<MeshField, Error> {
        let assigner = GridAssigner::new(
            geometry,
            self.config.resampler,
            self.config.interlacing,
            self.config.boundary,
        );
        let meshes = assigner.paint_catalogs(self.comm, inputs)?;
        let delta = OverdensityBuilder::from_catalog_grids(self.comm, meshes, self.config.resampler)?;
        let (shot_noise_estimate, alpha) = (delta.shot_noise_estimate(), delta.alpha());
        let centroid = self.global_centroid(inputs)?;
        let fourier = SpectralTransformer::new(geometry).transform_overdensity(
            self.comm,
            delta,
            self.config.compensate,
        )?;
        Ok(MeshField {
            fourier,
            shot_noise_estimate,
            alpha,
            centroid,
        })
    }

    /// Transforms a field that is used as-is (no normalization, no shot
    /// noise, no window compensation)
    pub fn mesh_from_field(&self, mesh: RealMesh) -> Result<MeshField, Error> {
        let geometry = *mesh.geometry();
        let delta = OverdensityBuilder::field_only(mesh);
        let fourier =
            SpectralTransformer::new(geometry).transform_overdensity(self.comm, delta, false)?;
        Ok(MeshField {
            fourier,
            shot_noise_estimate: 0.0,
            alpha: None,
            centroid: None,
        })
    }

    fn binner(&self, a: &MeshField, b: &MeshField) -> Result<MultipoleBinner, Error> {
        let los = self
            .config
            .los
            .resolve(a.centroid.or(b.centroid), self.config.observer)?;
        MultipoleBinner::new(
            self.k_edges.clone(),
            self.mu_edges.clone(),
            self.config.ells.clone(),
            los,
        )
    }

    /// The auto-power multipoles of `mesh`
    pub fn power(&self, mesh: &MeshField, shot_noise: ShotNoise) -> Result<MultipoleSpectrum, Error> {
        let power = SpectralTransformer::cross_power(&mesh.fourier, &mesh.fourier)?;
        self.binner(mesh, mesh)?
            .poles(self.comm, &power, mesh.shot_noise(shot_noise))
    }

    /// The auto-power of `mesh` in `(|k|, μ)` wedges
    pub fn power_wedges(&self, mesh: &MeshField, shot_noise: ShotNoise) -> Result<SpectrumWedges, Error> {
        let power = SpectralTransformer::cross_power(&mesh.fourier, &mesh.fourier)?;
        self.binner(mesh, mesh)?
            .wedges(self.comm, &power, mesh.shot_noise(shot_noise))
    }

    /// The cross-power multipoles of two meshes (no shot noise is
    /// subtracted). Fails if their geometries differ.
    pub fn cross_power(&self, a: &MeshField, b: &MeshField) -> Result<MultipoleSpectrum, Error> {
        let power = SpectralTransformer::cross_power(&a.fourier, &b.fourier)?;
        self.binner(a, b)?.poles(self.comm, &power, 0.0)
    }

    /// The cross-power of two meshes in `(|k|, μ)` wedges
    pub fn cross_power_wedges(&self, a: &MeshField, b: &MeshField) -> Result<SpectrumWedges, Error> {
        let power = SpectralTransformer::cross_power(&a.fourier, &b.fourier)?;
        self.binner(a, b)?.wedges(self.comm, &power, 0.0)
    }

    /// Bins the three spectra relating a reconstructed mesh to the
    /// initial-conditions mesh. The reconstructed auto-power subtracts
    /// `auto_shotnoise` from the configuration, the initial one subtracts
    /// nothing.
    pub fn correlator(&self, reconstructed: &MeshField, initial: &MeshField) -> Result<Correlator, Error> {
        reconstructed.geometry().check_compatible(initial.geometry())?;
        let cross = self.cross_power_wedges(reconstructed, initial)?;
        let auto_rec = self.power_wedges(reconstructed, self.config.auto_shotnoise)?;
        let auto_init = self.power_wedges(initial, ShotNoise::Zero)?;
        Correlator::new(cross, auto_rec, auto_init)
    }

    /// The propagator multipoles, using the bias, growth rate, division
    /// floor and multipoles of the configuration
    pub fn propagator(&self, correlator: &Correlator) -> Result<PropagatorResult, Error> {
        let result = correlator.propagator(
            self.config.bias,
            self.config.growth_rate,
            self.config.division_floor,
            &self.config.ells,
        )?;
        if self.comm.is_root() {
            let n_invalid = result.status().iter().filter(|s| !s.is_valid()).count();
            info!(
                bias = self.config.bias,
                growth_rate = self.config.growth_rate.unwrap_or(0.0),
                n_invalid,
                "computed propagator"
            );
        }
        Ok(result)
    }

    /// Writes `records` from the coordinating worker, then waits for every
    /// worker at a barrier. The format follows the file extension (`.npy`
    /// or `.txt`).
    pub fn save_records(&self, path: impl AsRef<Path>, records: &Records) -> Result<(), Error> {
        let path = path.as_ref();
        let format = ExportFormat::from_path(path).ok_or_else(|| {
            Error::config("path", format!("{} has an unknown extension", path.display()))
        })?;
        if self.comm.is_root() {
            write_records(path, format, records)?;
            info!(path = %path.display(), n_rows = records.values().nrows(), "saved records");
        }
        self.comm.barrier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binner::LineOfSight;
    use crate::catalog::PointSet;
    use crate::comm::SerialComm;
    use crate::config::EdgeSpec;
    use crate::paint::Interlacing;

    fn config(nmesh: usize) -> EstimatorConfig {
        let mut config = EstimatorConfig::new(nmesh, 1.0);
        config.los = LineOfSight::Z;
        config.interlacing = Interlacing::Off;
        config.k_edges = EdgeSpec::Linspace {
            start: 0.0,
            stop: 1.0,
            num: 5,
        };
        config
    }

    fn cube_catalog() -> CatalogInputs {
        let positions: Vec<[f64; 3]> = (0..64)
            .map(|i| [(i % 4) as f64, ((i / 4) % 4) as f64, (i / 16) as f64 + 0.5])
            .collect();
        CatalogInputs::data_only(PointSet::unweighted(positions).unwrap())
    }

    #[test]
    fn geometry_from_serial_extent() {
        let comm = SerialComm::new();
        let estimator = Estimator::new(&comm, config(8)).unwrap();
        let inputs = estimator.scatter_inputs(Some(cube_catalog())).unwrap();
        let geometry = estimator.geometry_from_extent(&inputs).unwrap();
        assert_eq!(geometry.boxsize(), 4.5);
        assert_eq!(geometry.boxcenter(), [1.5, 1.5, 2.0]);
        assert_eq!(geometry.nmesh(), 8);
    }

    #[test]
    fn save_requires_known_extension() {
        let comm = SerialComm::new();
        let estimator = Estimator::new(&comm, config(8)).unwrap();
        let records = Records::from_rows(&["a"], vec![vec![1.0]]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(estimator.save_records(dir.path().join("x.csv"), &records).is_err());
        estimator.save_records(dir.path().join("x.txt"), &records).unwrap();
        assert!(dir.path().join("x.txt").exists());
    }

    #[test]
    fn fields_are_transformed_without_compensation() {
        let comm = SerialComm::new();
        let geometry = BoxGeometry::new(8.0, [0.0; 3], 8).unwrap();
        let mut mesh = RealMesh::zeros(geometry, 0..8);
        mesh.local_mut()[[1, 2, 3]] = 4.0;
        mesh.local_mut()[[5, 0, 7]] = -1.5;

        let mut compensating = config(8);
        compensating.compensate = true;
        let mut plain = config(8);
        plain.compensate = false;
        let a = Estimator::new(&comm, compensating).unwrap();
        let b = Estimator::new(&comm, plain).unwrap();
        let field_a = a.mesh_from_field(mesh.clone()).unwrap();
        let field_b = b.mesh_from_field(mesh.clone()).unwrap();
        assert_eq!(field_a.fourier(), field_b.fourier());

        let direct = SpectralTransformer::new(geometry).forward(&comm, &mesh).unwrap();
        assert_eq!(field_a.fourier(), &direct);
        assert_eq!(field_a.shot_noise(ShotNoise::Estimate), 0.0);
        assert_eq!(field_a.shot_noise(ShotNoise::Fixed(3.0)), 3.0);
    }

    #[test]
    fn first_point_needs_a_catalog() {
        let comm = SerialComm::new();
        let mut cfg = config(8);
        cfg.los = LineOfSight::FirstPoint;
        let estimator = Estimator::new(&comm, cfg).unwrap();
        let geometry = BoxGeometry::new(8.0, [0.0; 3], 8).unwrap();
        let field = estimator.mesh_from_field(RealMesh::zeros(geometry, 0..8)).unwrap();
        assert!(estimator.power(&field, ShotNoise::Zero).is_err());
    }
}
