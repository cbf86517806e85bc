//! The distributed forward transform and the cross-power primitive.
//!
//! A real mesh is distributed in x-slabs, which means that the z and y axes
//! are entirely local. We transform along z (keeping the `N/2 + 1`
//! non-redundant frequencies), then along y, then perform a global transpose
//! so that every worker owns a slab of ky values with the full x axis, and
//! finally transform along x.
//!
//! The local layout of a [`FourierMesh`] is therefore `[ky, kx, kz]`.
//!
//! We use the orthonormal convention: the transform is scaled by `N^{-3/2}`.
//! With this convention the power of a mode is `|F|² V / N³`.

use std::f64::consts::PI;
use std::ops::Range;
use std::sync::Arc;

use ndarray::{Array3, ArrayView1, ArrayView3, Axis, s};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use meshpower_nostd_internal::Resampler;

use crate::comm::{Communicator, SlabDecomposition};
use crate::error::Error;
use crate::geometry::{BoxGeometry, fold_frequency};
use crate::overdensity::Overdensity;
use crate::paint::RealMesh;

/// The local (ky-slab) portion of a Fourier-space mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct FourierMesh {
    geometry: BoxGeometry,
    ky_range: Range<usize>,
    // shape: (ky_range.len(), nmesh, nmesh / 2 + 1)
    data: Array3<Complex64>,
}

/// A complex power value per Fourier cell, with the same layout as a
/// [`FourierMesh`]
#[derive(Clone, Debug, PartialEq)]
pub struct PowerMesh {
    geometry: BoxGeometry,
    ky_range: Range<usize>,
    data: Array3<Complex64>,
}

macro_rules! impl_half_spectrum_accessors {
    ($t:ty) => {
        impl $t {
            pub fn geometry(&self) -> &BoxGeometry {
                &self.geometry
            }

            /// the global ky indices held by this worker
            pub fn ky_range(&self) -> Range<usize> {
                self.ky_range.clone()
            }

            /// local values with shape `[ky, kx, kz]`
            pub fn local(&self) -> ArrayView3<'_, Complex64> {
                self.data.view()
            }

            /// The integer frequencies `[nx, ny, nz]` of the local cell
            /// `[iy, ix, iz]`
            pub fn frequencies(&self, iy: usize, ix: usize, iz: usize) -> [isize; 3] {
                let n = self.geometry.nmesh();
                [
                    fold_frequency(ix, n),
                    fold_frequency(self.ky_range.start + iy, n),
                    iz as isize,
                ]
            }
        }
    };
}

impl_half_spectrum_accessors!(FourierMesh);
impl_half_spectrum_accessors!(PowerMesh);

impl PowerMesh {
    /// Builds a power mesh directly from local values (mostly useful for
    /// synthetic tests).
    pub fn from_local(
        geometry: BoxGeometry,
        ky_range: Range<usize>,
        data: Array3<Complex64>,
    ) -> Result<Self, Error> {
        let n = geometry.nmesh();
        if data.dim() != (ky_range.len(), n, n / 2 + 1) || ky_range.end > n {
            return Err(Error::geometry_mismatch(
                "power mesh shape",
                format!("{:?} covering ky {ky_range:?}", data.dim()),
                geometry,
            ));
        }
        Ok(Self {
            geometry,
            ky_range,
            data,
        })
    }

    /// The ky-slab of `comm.rank()`, filled by `f(frequencies)`
    pub fn from_fn<C: Communicator>(
        comm: &C,
        geometry: BoxGeometry,
        f: impl Fn([isize; 3]) -> Complex64,
    ) -> Self {
        let n = geometry.nmesh();
        let ky_range = SlabDecomposition::new(n, comm.size()).range(comm.rank());
        let start = ky_range.start;
        let data = Array3::from_shape_fn((ky_range.len(), n, n / 2 + 1), |(iy, ix, iz)| {
            f([
                fold_frequency(ix, n),
                fold_frequency(start + iy, n),
                iz as isize,
            ])
        });
        Self {
            geometry,
            ky_range,
            data,
        }
    }
}

/// `sinc(x) = sin(x) / x`
fn sinc(x: f64) -> f64 {
    if x == 0.0 { 1.0 } else { x.sin() / x }
}

/// Forward transforms for meshes of a single geometry
pub struct SpectralTransformer {
    geometry: BoxGeometry,
    fft: Arc<dyn Fft<f64>>,
}

impl SpectralTransformer {
    pub fn new(geometry: BoxGeometry) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(geometry.nmesh());
        Self { geometry, fft }
    }

    pub fn geometry(&self) -> &BoxGeometry {
        &self.geometry
    }

    /// applies the 1D transform to every lane of `arr` along `axis`
    fn transform_lanes(&self, arr: &mut Array3<Complex64>, axis: Axis) {
        let mut buf = Vec::with_capacity(self.geometry.nmesh());
        for mut lane in arr.lanes_mut(axis) {
            buf.clear();
            buf.extend(lane.iter().copied());
            self.fft.process(&mut buf);
            lane.assign(&ArrayView1::from(&buf[..]));
        }
    }

    /// Distributed real-to-complex transform (collective).
    pub fn forward<C: Communicator>(&self, comm: &C, mesh: &RealMesh) -> Result<FourierMesh, Error> {
        self.geometry.check_compatible(mesh.geometry())?;
        let n = self.geometry.nmesh();
        let nz = n / 2 + 1;
        let local = mesh.local();
        let x_range = mesh.slab_range();

        // z-axis (real-to-complex), then y-axis
        let mut partial = Array3::<Complex64>::zeros((x_range.len(), n, nz));
        let mut buf = Vec::with_capacity(n);
        for ix in 0..x_range.len() {
            for iy in 0..n {
                buf.clear();
                buf.extend(
                    local
                        .slice(s![ix, iy, ..])
                        .iter()
                        .map(|&v| Complex64::new(v, 0.0)),
                );
                self.fft.process(&mut buf);
                partial
                    .slice_mut(s![ix, iy, ..])
                    .assign(&ArrayView1::from(&buf[..nz]));
            }
        }
        self.transform_lanes(&mut partial, Axis(1));

        // transpose: send the ky-block owned by each worker
        let ky_slabs = SlabDecomposition::new(n, comm.size());
        let outgoing: Vec<(usize, usize, Vec<Complex64>)> = (0..comm.size())
            .map(|dest| {
                let block = partial.slice(s![.., ky_slabs.range(dest), ..]);
                (x_range.start, x_range.len(), block.iter().copied().collect())
            })
            .collect();
        let incoming = comm.all_to_all_v(outgoing)?;

        let ky_range = ky_slabs.range(comm.rank());
        let n_ky = ky_range.len();
        let mut data = Array3::<Complex64>::zeros((n_ky, n, nz));
        for (x_start, n_x, values) in incoming {
            if values.len() != n_x * n_ky * nz || x_start + n_x > n {
                return Err(Error::collective_failure(
                    comm.rank(),
                    "received a malformed transpose block",
                ));
            }
            let block = ArrayView3::from_shape((n_x, n_ky, nz), &values)
                .map_err(|_| Error::internal("transpose block has the wrong shape"))?;
            data.slice_mut(s![.., x_start..x_start + n_x, ..])
                .assign(&block.permuted_axes([1, 0, 2]));
        }

        // x-axis
        self.transform_lanes(&mut data, Axis(1));
        let norm = (n as f64).powf(-1.5);
        data.mapv_inplace(|v| v * norm);
        debug!(rank = comm.rank(), n_ky, "forward transform complete");

        Ok(FourierMesh {
            geometry: self.geometry,
            ky_range,
            data,
        })
    }

    /// Combines the transforms of the main and the half-cell-shifted meshes:
    /// `F = [F_main + F_shifted e^{iπ(nx+ny+nz)/N}] / 2`
    pub fn combine_interlaced(
        &self,
        main: FourierMesh,
        shifted: &FourierMesh,
    ) -> Result<FourierMesh, Error> {
        main.geometry.check_compatible(&shifted.geometry)?;
        if main.ky_range != shifted.ky_range {
            return Err(Error::geometry_mismatch(
                "ky slab",
                format!("{:?}", main.ky_range),
                format!("{:?}", shifted.ky_range),
            ));
        }
        let n = self.geometry.nmesh() as f64;
        let mut out = main;
        let (n_ky, n_kx, n_kz) = out.data.dim();
        for iy in 0..n_ky {
            for ix in 0..n_kx {
                for iz in 0..n_kz {
                    let [nx, ny, nz] = out.frequencies(iy, ix, iz);
                    let phase = Complex64::from_polar(1.0, PI * (nx + ny + nz) as f64 / n);
                    let value = &mut out.data[[iy, ix, iz]];
                    *value = 0.5 * (*value + shifted.data[[iy, ix, iz]] * phase);
                }
            }
        }
        Ok(out)
    }

    /// Divides out the mass-assignment window `Π_i sinc(π n_i / N)^p`
    pub fn compensate_window(&self, mesh: &mut FourierMesh, resampler: Resampler) {
        let n = self.geometry.nmesh() as f64;
        let p = resampler.order() as i32;
        // the window is separable, so tabulate it per frequency
        let window_1d = |freq: isize| sinc(PI * freq as f64 / n).powi(p);
        let (n_ky, n_kx, n_kz) = mesh.data.dim();
        for iy in 0..n_ky {
            for ix in 0..n_kx {
                for iz in 0..n_kz {
                    let [nx, ny, nz] = mesh.frequencies(iy, ix, iz);
                    let window = window_1d(nx) * window_1d(ny) * window_1d(nz);
                    mesh.data[[iy, ix, iz]] /= window;
                }
            }
        }
    }

    /// Transforms an overdensity: forward transform, interlacing
    /// combination (if a shifted mesh exists) and, optionally, window
    /// compensation (collective).
    pub fn transform_overdensity<C: Communicator>(
        &self,
        comm: &C,
        delta: Overdensity,
        compensate: bool,
    ) -> Result<FourierMesh, Error> {
        let resampler = delta.resampler();
        let field = delta.into_field();
        let mut out = self.forward(comm, &field.main)?;
        if let Some(shifted) = field.shifted.as_ref() {
            let shifted = self.forward(comm, shifted)?;
            out = self.combine_interlaced(out, &shifted)?;
        }
        if let (true, Some(resampler)) = (compensate, resampler) {
            self.compensate_window(&mut out, resampler);
        }
        Ok(out)
    }

    /// `P(k) = F1(k) conj(F2(k)) V / N³`, cell by cell.
    ///
    /// Fails if the operands don't share the same geometry (and slab).
    pub fn cross_power(a: &FourierMesh, b: &FourierMesh) -> Result<PowerMesh, Error> {
        a.geometry.check_compatible(&b.geometry)?;
        if a.ky_range != b.ky_range {
            return Err(Error::geometry_mismatch(
                "ky slab",
                format!("{:?}", a.ky_range),
                format!("{:?}", b.ky_range),
            ));
        }
        let norm = a.geometry.volume() / a.geometry.n_cells() as f64;
        let mut data = a.data.clone();
        data.zip_mut_with(&b.data, |x, y| *x = *x * y.conj() * norm);
        Ok(PowerMesh {
            geometry: a.geometry,
            ky_range: a.ky_range.clone(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;

    fn geometry(n: usize) -> BoxGeometry {
        BoxGeometry::new(n as f64, [0.0; 3], n).unwrap()
    }

    fn cosine_mesh(n: usize, m: usize) -> RealMesh {
        let mut mesh = RealMesh::zeros(geometry(n), 0..n);
        let mut local = mesh.local_mut();
        for ((ix, _, _), v) in local.indexed_iter_mut() {
            *v = (2.0 * PI * (m * ix) as f64 / n as f64).cos();
        }
        mesh
    }

    #[test]
    fn single_mode() {
        let n = 8;
        let comm = SerialComm::new();
        let transformer = SpectralTransformer::new(geometry(n));
        let out = transformer.forward(&comm, &cosine_mesh(n, 2)).unwrap();
        assert_eq!(out.local().dim(), (8, 8, 5));
        let expected = (n as f64).powf(1.5) / 2.0;
        for ((iy, ix, iz), v) in out.local().indexed_iter() {
            let target = if iy == 0 && iz == 0 && (ix == 2 || ix == 6) {
                expected
            } else {
                0.0
            };
            assert!((v.re - target).abs() < 1e-10, "{iy} {ix} {iz}: {v}");
            assert!(v.im.abs() < 1e-10);
        }
    }

    #[test]
    fn parseval_on_the_half_spectrum() {
        let n = 6;
        let comm = SerialComm::new();
        let mut mesh = RealMesh::zeros(geometry(n), 0..n);
        for ((i, j, k), v) in mesh.local_mut().indexed_iter_mut() {
            *v = ((7 * i + 3 * j * j + k) % 5) as f64 - 1.3;
        }
        let real_sum: f64 = mesh.local().iter().map(|v| v * v).sum();
        let out = SpectralTransformer::new(geometry(n))
            .forward(&comm, &mesh)
            .unwrap();
        let mut fourier_sum = 0.0;
        for ((_, _, iz), v) in out.local().indexed_iter() {
            let multiplicity = if iz == 0 || iz == n / 2 { 1.0 } else { 2.0 };
            fourier_sum += multiplicity * v.norm_sqr();
        }
        assert!((fourier_sum - real_sum).abs() < 1e-9 * real_sum);
    }

    #[test]
    fn auto_power_is_real_and_positive() {
        let n = 8;
        let comm = SerialComm::new();
        let out = SpectralTransformer::new(geometry(n))
            .forward(&comm, &cosine_mesh(n, 3))
            .unwrap();
        let power = SpectralTransformer::cross_power(&out, &out).unwrap();
        for v in power.local().iter() {
            assert!(v.re >= 0.0);
            assert_eq!(v.im, 0.0);
        }
        // |F|^2 V / N^3 with V = N^3
        let expected = (n as f64).powi(3) / 4.0;
        assert!((power.local()[[0, 3, 0]].re - expected).abs() < 1e-9);
    }

    #[test]
    fn mismatched_geometry() {
        let comm = SerialComm::new();
        let a = SpectralTransformer::new(geometry(4))
            .forward(&comm, &cosine_mesh(4, 1))
            .unwrap();
        let b = SpectralTransformer::new(geometry(8))
            .forward(&comm, &cosine_mesh(8, 1))
            .unwrap();
        let err = SpectralTransformer::cross_power(&a, &b).unwrap_err();
        assert!(err.is_geometry_mismatch());
        let err = SpectralTransformer::new(geometry(8))
            .forward(&comm, &cosine_mesh(4, 1))
            .unwrap_err();
        assert!(err.is_geometry_mismatch());
    }

    #[test]
    fn window_compensation() {
        let n = 8;
        let comm = SerialComm::new();
        let transformer = SpectralTransformer::new(geometry(n));
        let mut out = transformer.forward(&comm, &cosine_mesh(n, 2)).unwrap();
        let before = out.local()[[0, 2, 0]];
        transformer.compensate_window(&mut out, Resampler::Cic);
        let window = sinc(PI * 2.0 / 8.0).powi(2);
        assert!((out.local()[[0, 2, 0]].re - before.re / window).abs() < 1e-10);
    }

    #[test]
    fn interlacing_phase() {
        let n = 4;
        let geom = geometry(n);
        let comm = SerialComm::new();
        let transformer = SpectralTransformer::new(geom);
        let mut mesh = RealMesh::zeros(geom, 0..n);
        mesh.local_mut()[[1, 2, 3]] = 1.0;
        let main = transformer.forward(&comm, &mesh).unwrap();
        let combined = transformer.combine_interlaced(main.clone(), &main).unwrap();
        // the zero mode is untouched
        assert!((combined.local()[[0, 0, 0]] - main.local()[[0, 0, 0]]).norm() < 1e-14);
        // at the corner (nx, ny, nz) = (2, 2, 2), the phase is e^{3πi/2} = -i
        let expected = 0.5 * main.local()[[2, 2, 2]] * Complex64::new(1.0, -1.0);
        assert!((combined.local()[[2, 2, 2]] - expected).norm() < 1e-14);
    }
}
