//! Bins a power mesh into |k| shells (projected onto multipoles) or into
//! `(|k|, μ)` wedges.
//!
//! The power mesh only stores the non-redundant half of the spectrum (kz in
//! `[0, N/2]`). Every cell with `0 < kz < N/2` stands for itself and for its
//! Hermitian partner at `-k`, which has `μ → -μ` and `P → conj(P)`. We feed
//! both to the reducer so that the statistics are those of the full
//! spectrum.
//!
//! The k = 0 mode is always skipped.
//!
//! Each worker accumulates a statepack for its own ky slab, and the
//! statepacks are summed on the coordinating worker (in rank order) and then
//! broadcast, so every worker ends up holding the same result.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use meshpower_nostd_internal::{
    BinEdges, IrregularBinEdges, ModeDatum, PoleReducer, Reducer, StatePackView,
    StatePackViewMut, WedgeReducer, merge_flat_statepacks, reset_full_statepack,
};

use crate::comm::Communicator;
use crate::error::Error;
use crate::fft::PowerMesh;
use crate::spectrum::{BinStatus, MultipoleSpectrum, SpectrumSample, SpectrumWedges};

/// The line-of-sight convention
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOfSight {
    X,
    Y,
    Z,
    /// an arbitrary (not necessarily normalized) direction
    Fixed([f64; 3]),
    /// the direction from the observer to the weighted centroid of the data
    #[default]
    FirstPoint,
}

impl LineOfSight {
    /// Resolves the convention to a unit vector. `FirstPoint` requires the
    /// centroid of the data (which is the caller's job to compute
    /// collectively).
    pub fn resolve(&self, centroid: Option<[f64; 3]>, observer: [f64; 3]) -> Result<[f64; 3], Error> {
        let direction = match *self {
            LineOfSight::X => [1.0, 0.0, 0.0],
            LineOfSight::Y => [0.0, 1.0, 0.0],
            LineOfSight::Z => [0.0, 0.0, 1.0],
            LineOfSight::Fixed(v) => v,
            LineOfSight::FirstPoint => {
                let c = centroid.ok_or_else(|| {
                    Error::config("los", "first_point requires a catalog with positive weight")
                })?;
                [c[0] - observer[0], c[1] - observer[1], c[2] - observer[2]]
            }
        };
        let norm = direction.iter().map(|x| x * x).sum::<f64>().sqrt();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(Error::config(
                "los",
                format!("can't build a unit vector from {direction:?}"),
            ));
        }
        Ok(direction.map(|x| x / norm))
    }
}

/// Bins power meshes with a fixed set of edges, multipoles and line of sight
#[derive(Clone, Debug)]
pub struct MultipoleBinner {
    k_edges: Vec<f64>,
    mu_edges: Vec<f64>,
    ells: Vec<u32>,
    los: [f64; 3],
}

impl MultipoleBinner {
    /// `los` must already be resolved (see [`LineOfSight::resolve`]).
    ///
    /// If `mu_edges` starts at a non-negative value, μ is folded to |μ|
    /// before the wedges are assigned.
    pub fn new(
        k_edges: Vec<f64>,
        mu_edges: Vec<f64>,
        ells: Vec<u32>,
        los: [f64; 3],
    ) -> Result<Self, Error> {
        IrregularBinEdges::new(&k_edges).map_err(|what| Error::bin_edge("k_edges", what))?;
        if k_edges[0] < 0.0 {
            return Err(Error::bin_edge("k_edges", "edges must be non-negative"));
        }
        IrregularBinEdges::new(&mu_edges).map_err(|what| Error::bin_edge("mu_edges", what))?;
        if mu_edges[0] < -1.0 || mu_edges[mu_edges.len() - 1] > 1.0 {
            return Err(Error::bin_edge("mu_edges", "edges must lie within [-1, 1]"));
        }
        if ells.is_empty() {
            return Err(Error::config("ells", "at least one multipole is required"));
        }
        let norm = los.iter().map(|x| x * x).sum::<f64>().sqrt();
        if (norm - 1.0).abs() > 1e-12 {
            return Err(Error::config("los", "the line of sight must be a unit vector"));
        }
        Ok(Self {
            k_edges,
            mu_edges,
            ells,
            los,
        })
    }

    pub fn k_edges(&self) -> &[f64] {
        &self.k_edges
    }

    pub fn mu_edges(&self) -> &[f64] {
        &self.mu_edges
    }

    pub fn ells(&self) -> &[u32] {
        &self.ells
    }

    pub fn los(&self) -> [f64; 3] {
        self.los
    }

    fn folds_mu(&self) -> bool {
        self.mu_edges[0] >= 0.0
    }

    /// calls `f(k_bin, datum)` for every mode of the local slab (and every
    /// Hermitian partner) that lands in a k-bin
    fn for_each_mode(
        &self,
        power: &PowerMesh,
        mut f: impl FnMut(usize, &ModeDatum),
    ) -> Result<(), Error> {
        let geometry = power.geometry();
        let n = geometry.nmesh();
        let kf = geometry.fundamental_k();
        let k_bins = IrregularBinEdges::new(&self.k_edges).map_err(Error::internal)?;
        let local = power.local();
        for ((iy, ix, iz), value) in local.indexed_iter() {
            let [nx, ny, nz] = power.frequencies(iy, ix, iz);
            if nx == 0 && ny == 0 && nz == 0 {
                continue;
            }
            let kvec = [kf * nx as f64, kf * ny as f64, kf * nz as f64];
            let k = kvec.iter().map(|x| x * x).sum::<f64>().sqrt();
            let Some(k_bin) = k_bins.bin_index(k) else {
                continue;
            };
            let mu = (kvec[0] * self.los[0] + kvec[1] * self.los[1] + kvec[2] * self.los[2]) / k;
            // keep round-off from pushing |mu| above 1
            let mu = mu.clamp(-1.0, 1.0);
            f(
                k_bin,
                &ModeDatum {
                    k,
                    mu,
                    power_re: value.re,
                    power_im: value.im,
                    weight: 1.0,
                },
            );
            if iz != 0 && iz != n / 2 {
                f(
                    k_bin,
                    &ModeDatum {
                        k,
                        mu: -mu,
                        power_re: value.re,
                        power_im: -value.im,
                        weight: 1.0,
                    },
                );
            }
        }
        Ok(())
    }

    /// Sums the local statepacks across workers (collective). Every worker
    /// gets the total.
    fn reduce_statepack<C: Communicator>(
        comm: &C,
        reducer: &impl Reducer,
        n_bins: usize,
        local: Vec<f64>,
    ) -> Result<Vec<f64>, Error> {
        comm.all_reduce(local, |accum, other| {
            merge_flat_statepacks(reducer, n_bins, accum, &other).map_err(Error::internal)
        })
    }

    /// Projects the power in each |k| shell onto the multipoles
    /// (collective):
    ///
    /// `P_ℓ(k) = (2ℓ+1) / N_modes · Σ P(𝒌) L_ℓ(μ)`
    ///
    /// `shot_noise` is subtracted from the monopole of every populated bin.
    pub fn poles<C: Communicator>(
        &self,
        comm: &C,
        power: &PowerMesh,
        shot_noise: f64,
    ) -> Result<MultipoleSpectrum, Error> {
        let reducer = PoleReducer::new(&self.ells).map_err(Error::internal)?;
        let n_k = self.k_edges.len() - 1;
        let state_size = reducer.accum_state_size();
        let mut buf = vec![0.0; state_size * n_k];
        {
            let mut statepack =
                StatePackViewMut::from_slice(state_size, n_k, &mut buf).map_err(Error::internal)?;
            reset_full_statepack(&reducer, &mut statepack);
            self.for_each_mode(power, |k_bin, datum| {
                reducer.consume(&mut statepack.get_state_mut(k_bin), datum);
            })?;
        }
        let total = Self::reduce_statepack(comm, &reducer, n_k, buf)?;
        let statepack = StatePackView::from_slice(state_size, n_k, &total).map_err(Error::internal)?;

        let n_ells = self.ells.len();
        let mut out = MultipoleSpectrum {
            k_edges: self.k_edges.clone(),
            ells: self.ells.clone(),
            k_mean: vec![0.0; n_k],
            n_modes: vec![0.0; n_k],
            values: Array2::zeros((n_ells, n_k)),
            status: vec![BinStatus::Valid; n_k],
            shot_noise,
        };
        let mut value = Array1::<f64>::zeros(reducer.output_descr().n_per_accum_state());
        for ik in 0..n_k {
            let state = statepack.get_state(ik);
            reducer.value_from_accum_state(&mut value.view_mut(), &state);
            if reducer.n_modes(&state) == 0.0 {
                out.status[ik] = BinStatus::EmptyBin;
                continue;
            }
            out.n_modes[ik] = value[PoleReducer::VALUE_N_MODES];
            out.k_mean[ik] = value[PoleReducer::VALUE_K_MEAN];
            for (il, &ell) in self.ells.iter().enumerate() {
                let first = PoleReducer::VALUE_FIRST_POLE + 2 * il;
                let mut pole = Complex64::new(value[first], value[first + 1]);
                if ell == 0 {
                    pole.re -= shot_noise;
                }
                out.values[[il, ik]] = pole;
            }
        }
        if comm.is_root() {
            let n_empty = out.status.iter().filter(|s| **s == BinStatus::EmptyBin).count();
            debug!(n_k, n_empty, "binned multipoles");
        }
        Ok(out)
    }

    /// Bins the power into `(|k|, μ)` wedges without collapsing onto
    /// multipoles (collective). `shot_noise` is subtracted from every
    /// populated wedge.
    pub fn wedges<C: Communicator>(
        &self,
        comm: &C,
        power: &PowerMesh,
        shot_noise: f64,
    ) -> Result<SpectrumWedges, Error> {
        let reducer = WedgeReducer;
        let n_k = self.k_edges.len() - 1;
        let n_mu = self.mu_edges.len() - 1;
        let n_bins = n_k * n_mu;
        let state_size = reducer.accum_state_size();
        let mu_bins = IrregularBinEdges::new(&self.mu_edges).map_err(Error::internal)?;
        let fold = self.folds_mu();

        let mut buf = vec![0.0; state_size * n_bins];
        {
            let mut statepack = StatePackViewMut::from_slice(state_size, n_bins, &mut buf)
                .map_err(Error::internal)?;
            reset_full_statepack(&reducer, &mut statepack);
            self.for_each_mode(power, |k_bin, datum| {
                let mu = if fold { datum.mu.abs() } else { datum.mu };
                if let Some(mu_bin) = mu_bins.bin_index_closed_right(mu) {
                    let datum = ModeDatum { mu, ..*datum };
                    reducer.consume(&mut statepack.get_state_mut(k_bin * n_mu + mu_bin), &datum);
                }
            })?;
        }
        let total = Self::reduce_statepack(comm, &reducer, n_bins, buf)?;
        let statepack =
            StatePackView::from_slice(state_size, n_bins, &total).map_err(Error::internal)?;

        let mut value = Array1::<f64>::zeros(reducer.output_descr().n_per_accum_state());
        let mut samples = Vec::with_capacity(n_bins);
        for ik in 0..n_k {
            for imu in 0..n_mu {
                let state = statepack.get_state(ik * n_mu + imu);
                reducer.value_from_accum_state(&mut value.view_mut(), &state);
                let empty = reducer.n_modes(&state) == 0.0;
                samples.push(sample_from_value(ik, imu, &value, empty, shot_noise));
            }
        }
        SpectrumWedges::new(self.k_edges.clone(), self.mu_edges.clone(), samples, shot_noise)
    }
}

fn sample_from_value(
    k_index: usize,
    mu_index: usize,
    value: &Array1<f64>,
    empty: bool,
    shot_noise: f64,
) -> SpectrumSample {
    if empty {
        return SpectrumSample {
            k_index,
            mu_index,
            power: Complex64::new(0.0, 0.0),
            n_modes: 0.0,
            k_mean: 0.0,
            mu_mean: 0.0,
            status: BinStatus::EmptyBin,
        };
    }
    SpectrumSample {
        k_index,
        mu_index,
        power: Complex64::new(
            value[WedgeReducer::VALUE_POWER_RE] - shot_noise,
            value[WedgeReducer::VALUE_POWER_IM],
        ),
        n_modes: value[WedgeReducer::VALUE_N_MODES],
        k_mean: value[WedgeReducer::VALUE_K_MEAN],
        mu_mean: value[WedgeReducer::VALUE_MU_MEAN],
        status: BinStatus::Valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::geometry::BoxGeometry;

    fn power_mesh(n: usize, f: impl Fn([isize; 3]) -> Complex64) -> PowerMesh {
        let geom = BoxGeometry::new(2.0 * std::f64::consts::PI, [0.0; 3], n).unwrap();
        PowerMesh::from_fn(&SerialComm::new(), geom, f)
    }

    #[test]
    fn line_of_sight_resolution() {
        assert_eq!(LineOfSight::Y.resolve(None, [0.0; 3]).unwrap(), [0.0, 1.0, 0.0]);
        let v = LineOfSight::Fixed([0.0, 3.0, 4.0]).resolve(None, [0.0; 3]).unwrap();
        assert_eq!(v, [0.0, 0.6, 0.8]);
        let v = LineOfSight::FirstPoint
            .resolve(Some([1.0, 2.0, 5.0]), [1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(v, [0.0, 0.0, 1.0]);
        assert!(LineOfSight::FirstPoint.resolve(None, [0.0; 3]).is_err());
        assert!(LineOfSight::Fixed([0.0; 3]).resolve(None, [0.0; 3]).is_err());
    }

    #[test]
    fn invalid_binner() {
        let los = [0.0, 0.0, 1.0];
        assert!(MultipoleBinner::new(vec![0.1], vec![0.0, 1.0], vec![0], los).is_err());
        assert!(MultipoleBinner::new(vec![0.1, 0.2], vec![0.0, 1.5], vec![0], los).is_err());
        assert!(MultipoleBinner::new(vec![0.1, 0.2], vec![0.0, 1.0], vec![], los).is_err());
        assert!(MultipoleBinner::new(vec![0.1, 0.2], vec![0.0, 1.0], vec![0], [1.0; 3]).is_err());
    }

    #[test]
    fn mode_counting() {
        // boxsize 2π means kf = 1, so |k| equals the integer frequency norm
        let comm = SerialComm::new();
        let power = power_mesh(8, |_| Complex64::new(1.0, 0.0));
        let binner = MultipoleBinner::new(
            vec![0.5, 1.5, 2.5],
            vec![0.0, 0.5, 1.0],
            vec![0, 2],
            [0.0, 0.0, 1.0],
        )
        .unwrap();
        let poles = binner.poles(&comm, &power, 0.0).unwrap();
        // |n| = 1: 6 modes. |n| in [1.5, 2.5): |n| = sqrt(3) (8) and 2 (6)
        assert_eq!(poles.n_modes(), &[6.0, 14.0]);
        let wedges = binner.wedges(&comm, &power, 0.0).unwrap();
        let total: f64 = wedges.samples().iter().map(|s| s.n_modes).sum();
        assert_eq!(total, 20.0);
        // in the first shell, mu = ±1 for the 2 modes along z
        assert_eq!(wedges.get(0, 1).n_modes, 2.0);
        assert_eq!(wedges.get(0, 0).n_modes, 4.0);
        assert_eq!(wedges.get(0, 1).mu_mean, 1.0);
    }

    #[test]
    fn empty_bins_and_shot_noise() {
        let comm = SerialComm::new();
        let power = power_mesh(8, |_| Complex64::new(5.0, 0.0));
        let binner = MultipoleBinner::new(
            vec![1.05, 1.1, 2.5],
            vec![-1.0, 0.0, 1.0],
            vec![0, 2, 4],
            [1.0, 0.0, 0.0],
        )
        .unwrap();
        let poles = binner.poles(&comm, &power, 2.0).unwrap();
        assert_eq!(poles.status(), &[BinStatus::EmptyBin, BinStatus::Valid]);
        assert_eq!(poles.pole(0).unwrap(), vec![0.0, 3.0]);
        assert_eq!(poles.n_modes()[0], 0.0);

        let wedges = binner.wedges(&comm, &power, 2.0).unwrap();
        assert_eq!(wedges.get(0, 0).status, BinStatus::EmptyBin);
        assert_eq!(wedges.get(0, 1).power, Complex64::new(0.0, 0.0));
        assert_eq!(wedges.get(1, 0).power.re, 3.0);
        assert_eq!(wedges.get(1, 1).power.re, 3.0);
        // without folding, the Hermitian partners populate both signs of mu
        // (mu = 0 belongs to the upper wedge)
        assert_eq!(wedges.get(1, 0).n_modes, 9.0);
        assert_eq!(wedges.get(1, 1).n_modes, 17.0);
    }

    #[test]
    fn quadrupole_of_a_kaiser_like_field() {
        // P(k, mu) = 1 + mu^2 has P_0 = 4/3 and P_2 = 2/3 in the continuum
        // limit. Shells at high k sample mu finely enough for a loose check.
        let comm = SerialComm::new();
        let power = power_mesh(32, |[nx, ny, nz]| {
            let k2 = (nx * nx + ny * ny + nz * nz) as f64;
            let mu2 = if k2 == 0.0 { 0.0 } else { (nz * nz) as f64 / k2 };
            Complex64::new(1.0 + mu2, 0.0)
        });
        let binner =
            MultipoleBinner::new(vec![10.0, 12.0], vec![0.0, 1.0], vec![0, 2], [0.0, 0.0, 1.0])
                .unwrap();
        let poles = binner.poles(&comm, &power, 0.0).unwrap();
        assert!((poles.pole(0).unwrap()[0] - 4.0 / 3.0).abs() < 0.01);
        assert!((poles.pole(2).unwrap()[0] - 2.0 / 3.0).abs() < 0.02);
    }
}
