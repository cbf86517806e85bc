//! Mass assignment of weighted points onto a slab-decomposed mesh.
//!
//! # How the distributed painting works
//!
//! Every worker owns the x-planes `[x0, x1)` of the mesh (see
//! [`SlabDecomposition`]). Painting proceeds in three steps:
//! 1. each point is routed to the worker owning the first x-plane of its
//!    footprint (after periodic wrapping)
//! 2. every worker paints its points into a local buffer that is
//!    `order - 1` planes wider than its slab, so that no footprint needs to
//!    be split
//! 3. the extra "ghost" planes are shipped to (and summed by) the workers
//!    that own them
//!
//! Each contribution is therefore added exactly once, regardless of how
//! narrow the slabs are.
//!
//! Along y and z, footprints simply wrap around the periodic mesh.

use core::ops::Range;

use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis, s};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use meshpower_nostd_internal::Resampler;

use crate::catalog::{CatalogInputs, PointSet};
use crate::comm::{Communicator, ROOT, SlabDecomposition};
use crate::error::Error;
use crate::geometry::BoxGeometry;

/// Whether a second, half-cell-shifted mesh is painted for anti-aliasing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interlacing {
    Off,
    #[default]
    TwoShift,
}

/// How to treat points that lie outside of the box
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// wrap the points back into the (periodic) box
    #[default]
    Periodic,
    /// drop them (they are counted in [`PaintReport::n_dropped`])
    DropOutside,
}

/// The portion of a real-valued mesh owned by a single worker.
#[derive(Clone, Debug, PartialEq)]
pub struct RealMesh {
    geometry: BoxGeometry,
    slab: Range<usize>,
    // shape: (slab.len(), nmesh, nmesh)
    data: Array3<f64>,
}

impl RealMesh {
    pub fn zeros(geometry: BoxGeometry, slab: Range<usize>) -> Self {
        let n = geometry.nmesh();
        Self {
            geometry,
            data: Array3::zeros((slab.len(), n, n)),
            slab,
        }
    }

    /// the (zero-initialized) slab of `comm.rank()`
    pub fn zeros_for<C: Communicator>(geometry: BoxGeometry, comm: &C) -> Self {
        let slab = SlabDecomposition::new(geometry.nmesh(), comm.size()).range(comm.rank());
        Self::zeros(geometry, slab)
    }

    /// wraps existing slab data
    pub fn from_local(
        geometry: BoxGeometry,
        slab: Range<usize>,
        data: Array3<f64>,
    ) -> Result<Self, Error> {
        let n = geometry.nmesh();
        if data.dim() != (slab.len(), n, n) || slab.end > n {
            return Err(Error::geometry_mismatch(
                "slab shape",
                format!("{:?} covering planes {slab:?}", data.dim()),
                geometry,
            ));
        }
        Ok(Self {
            geometry,
            slab,
            data,
        })
    }

    /// Distributes a full mesh held by the coordinating worker (every other
    /// worker passes `None`) into slabs.
    pub fn scatter_from_root<C: Communicator>(
        comm: &C,
        geometry: BoxGeometry,
        full: Option<Array3<f64>>,
    ) -> Result<Self, Error> {
        let n = geometry.nmesh();
        let slabs = SlabDecomposition::new(n, comm.size());
        if comm.is_root() {
            let full = full
                .ok_or_else(|| Error::catalog_shape("the coordinating worker has no field"))?;
            if full.dim() != (n, n, n) {
                return Err(Error::geometry_mismatch(
                    "field shape",
                    format!("{:?}", full.dim()),
                    geometry,
                ));
            }
            for dest in 1..comm.size() {
                let range = slabs.range(dest);
                let part = full.slice(s![range, .., ..]).to_owned();
                comm.send(dest, Box::new(part))?;
            }
            let range = slabs.range(ROOT);
            let mine = full.slice(s![range.clone(), .., ..]).to_owned();
            Self::from_local(geometry, range, mine)
        } else {
            let part = comm
                .recv(ROOT)?
                .downcast::<Array3<f64>>()
                .map_err(|_| Error::collective_failure(ROOT, "expected a field slab"))?;
            Self::from_local(geometry, slabs.range(comm.rank()), *part)
        }
    }

    pub fn geometry(&self) -> &BoxGeometry {
        &self.geometry
    }

    /// the global x-planes held by this worker
    pub fn slab_range(&self) -> Range<usize> {
        self.slab.clone()
    }

    pub fn local(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn local_mut(&mut self) -> ArrayViewMut3<'_, f64> {
        self.data.view_mut()
    }

    pub fn local_sum(&self) -> f64 {
        self.data.sum()
    }

    /// sum over the whole mesh (collective)
    pub fn sum<C: Communicator>(&self, comm: &C) -> Result<f64, Error> {
        Ok(comm.all_reduce_sum(vec![self.local_sum()])?[0])
    }

    /// Collects the full mesh on the coordinating worker (collective).
    pub fn gather<C: Communicator>(&self, comm: &C) -> Result<Option<Array3<f64>>, Error> {
        let n = self.geometry.nmesh();
        let mine = (self.slab.start, self.data.clone());
        let gathered = comm.reduce_to_root(vec![mine], |accum, other| {
            accum.extend(other);
            Ok(())
        })?;
        Ok(gathered.map(|parts| {
            let mut full = Array3::zeros((n, n, n));
            for (start, part) in parts {
                let stop = start + part.len_of(Axis(0));
                full.slice_mut(s![start..stop, .., ..]).assign(&part);
            }
            full
        }))
    }
}

/// The result of painting one catalog: the main mesh and, with interlacing,
/// the mesh painted at positions shifted by half a cell along every axis.
#[derive(Clone, Debug, PartialEq)]
pub struct PaintedMesh {
    pub main: RealMesh,
    pub shifted: Option<RealMesh>,
}

impl PaintedMesh {
    pub fn geometry(&self) -> &BoxGeometry {
        self.main.geometry()
    }

    /// apply `f` to the main mesh and (if present) the shifted mesh
    pub(crate) fn for_each_mut(&mut self, mut f: impl FnMut(&mut RealMesh)) {
        f(&mut self.main);
        if let Some(shifted) = self.shifted.as_mut() {
            f(shifted);
        }
    }
}

/// Global counts describing a painting step
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PaintReport {
    pub n_painted: usize,
    pub n_dropped: usize,
    pub painted_weight: f64,
    pub painted_weight_squared: f64,
}

/// Meshes painted from the catalogs feeding a single overdensity
#[derive(Clone, Debug)]
pub struct CatalogMeshes {
    pub data: (PaintedMesh, PaintReport),
    /// `None` whenever shifted randoms were painted
    pub randoms: Option<(PaintedMesh, PaintReport)>,
    pub shifted_randoms: Option<(PaintedMesh, PaintReport)>,
}

/// Paints weighted points onto meshes sharing a single geometry
#[derive(Clone, Debug)]
pub struct GridAssigner {
    geometry: BoxGeometry,
    resampler: Resampler,
    interlacing: Interlacing,
    boundary: BoundaryPolicy,
}

impl GridAssigner {
    pub fn new(
        geometry: BoxGeometry,
        resampler: Resampler,
        interlacing: Interlacing,
        boundary: BoundaryPolicy,
    ) -> Self {
        Self {
            geometry,
            resampler,
            interlacing,
            boundary,
        }
    }

    pub fn geometry(&self) -> &BoxGeometry {
        &self.geometry
    }

    pub fn resampler(&self) -> Resampler {
        self.resampler
    }

    pub fn interlacing(&self) -> Interlacing {
        self.interlacing
    }

    /// Paints the local share of a catalog (collective).
    ///
    /// Every worker may hold an arbitrary subset of the points: the result
    /// is the same as if a single worker had painted all of them.
    pub fn paint<C: Communicator>(
        &self,
        comm: &C,
        points: &PointSet,
    ) -> Result<(PaintedMesh, PaintReport), Error> {
        let (grid_coords, n_dropped) = self.grid_coordinates(points);
        let main = self.paint_grid_coords(comm, &grid_coords, 0.0)?;
        let shifted = match self.interlacing {
            Interlacing::Off => None,
            Interlacing::TwoShift => Some(self.paint_grid_coords(comm, &grid_coords, 0.5)?),
        };

        let (w, w2) = grid_coords
            .iter()
            .fold((0.0, 0.0), |(a, b), p| (a + p[3], b + p[3] * p[3]));
        let totals = comm.all_reduce_sum(vec![
            grid_coords.len() as f64,
            n_dropped as f64,
            w,
            w2,
        ])?;
        let report = PaintReport {
            n_painted: totals[0] as usize,
            n_dropped: totals[1] as usize,
            painted_weight: totals[2],
            painted_weight_squared: totals[3],
        };
        if comm.is_root() {
            info!(
                n_painted = report.n_painted,
                weight = report.painted_weight,
                resampler = self.resampler.name(),
                interlaced = shifted.is_some(),
                "painted catalog"
            );
            if report.n_dropped > 0 {
                warn!(n_dropped = report.n_dropped, "dropped points outside of the box");
            }
        }
        Ok((PaintedMesh { main, shifted }, report))
    }

    /// Paints each catalog of `inputs` onto its own mesh (collective)
    pub fn paint_catalogs<C: Communicator>(
        &self,
        comm: &C,
        inputs: &CatalogInputs,
    ) -> Result<CatalogMeshes, Error> {
        let data = self.paint(comm, inputs.data())?;
        let shifted_randoms = inputs
            .shifted_randoms()
            .map(|r| self.paint(comm, r))
            .transpose()?;
        // the unshifted randoms don't enter the overdensity next to shifted ones
        let randoms = match shifted_randoms {
            Some(_) => None,
            None => inputs.randoms().map(|r| self.paint(comm, r)).transpose()?,
        };
        Ok(CatalogMeshes {
            data,
            randoms,
            shifted_randoms,
        })
    }

    /// converts positions to `[gx, gy, gz, weight]` grid coordinates,
    /// applying the boundary policy. Also returns the number of dropped points.
    fn grid_coordinates(&self, points: &PointSet) -> (Vec<[f64; 4]>, usize) {
        let n = self.geometry.nmesh() as f64;
        let origin = self.geometry.origin();
        let inv_cell = 1.0 / self.geometry.cell_size();
        let mut out = Vec::with_capacity(points.len());
        let mut n_dropped = 0;
        for (pos, &w) in points.positions().iter().zip(points.weights()) {
            let g: [f64; 3] = core::array::from_fn(|ax| (pos[ax] - origin[ax]) * inv_cell);
            match self.boundary {
                BoundaryPolicy::Periodic => {
                    out.push([wrap(g[0], n), wrap(g[1], n), wrap(g[2], n), w]);
                }
                BoundaryPolicy::DropOutside => {
                    if g.iter().all(|&x| (0.0..n).contains(&x)) {
                        out.push([g[0], g[1], g[2], w]);
                    } else {
                        n_dropped += 1;
                    }
                }
            }
        }
        (out, n_dropped)
    }

    fn paint_grid_coords<C: Communicator>(
        &self,
        comm: &C,
        grid_coords: &[[f64; 4]],
        shift: f64,
    ) -> Result<RealMesh, Error> {
        let n = self.geometry.nmesh();
        let order = self.resampler.order();
        let slabs = SlabDecomposition::new(n, comm.size());
        let rank = comm.rank();

        // step 1: route every point to the owner of its first x-plane
        let mut outgoing: Vec<Vec<[f64; 4]>> = vec![Vec::new(); comm.size()];
        for p in grid_coords {
            let gx = p[0] + shift;
            let start = self.resampler.footprint(gx).start.rem_euclid(n as isize) as usize;
            outgoing[slabs.owner(start)].push([gx, p[1] + shift, p[2] + shift, p[3]]);
        }
        let incoming = comm.all_to_all_v(outgoing)?;

        // step 2: paint into the padded local buffer
        let slab = slabs.range(rank);
        let mut mesh = RealMesh::zeros(self.geometry, slab.clone());
        if slab.is_empty() {
            // nobody routes points to an empty slab, but we still had to take
            // part in the collectives
            comm.all_to_all_v(vec![Vec::<(usize, Vec<f64>)>::new(); comm.size()])?;
            return Ok(mesh);
        }
        let mut buf = Array3::<f64>::zeros((slab.len() + order - 1, n, n));
        for p in incoming.iter().flatten() {
            self.deposit(&mut buf, slab.start, p);
        }

        // step 3: exchange the ghost planes (a ghost plane may wrap around to
        // our own slab when the mesh is tiny)
        mesh.data.assign(&buf.slice(s![..slab.len(), .., ..]));
        let mut ghosts: Vec<Vec<(usize, Vec<f64>)>> = vec![Vec::new(); comm.size()];
        for j in slab.len()..buf.len_of(Axis(0)) {
            let plane = (slab.start + j) % n;
            let values = buf.index_axis(Axis(0), j);
            let dest = slabs.owner(plane);
            if dest == rank {
                let mut target = mesh.data.index_axis_mut(Axis(0), plane - slab.start);
                target += &values;
            } else {
                ghosts[dest].push((plane, values.iter().copied().collect()));
            }
        }

        let received = comm.all_to_all_v(ghosts)?;
        for (plane, values) in received.into_iter().flatten() {
            if !slab.contains(&plane) || values.len() != n * n {
                return Err(Error::collective_failure(rank, "received a misrouted ghost plane"));
            }
            let mut target = mesh.data.index_axis_mut(Axis(0), plane - slab.start);
            target
                .iter_mut()
                .zip(values)
                .for_each(|(t, v)| *t += v);
        }
        Ok(mesh)
    }

    /// adds the contribution of a single point (given as `[gx, gy, gz, w]`)
    /// to `buf`, whose first plane corresponds to global plane `x0`
    fn deposit(&self, buf: &mut Array3<f64>, x0: usize, p: &[f64; 4]) {
        let n = self.geometry.nmesh() as isize;
        let fx = self.resampler.footprint(p[0]);
        let fy = self.resampler.footprint(p[1]);
        let fz = self.resampler.footprint(p[2]);
        let offset = fx.start.rem_euclid(n) as usize - x0;
        for a in 0..fx.len {
            let wx = p[3] * fx.weights[a];
            for b in 0..fy.len {
                let iy = (fy.start + b as isize).rem_euclid(n) as usize;
                let wxy = wx * fy.weights[b];
                for c in 0..fz.len {
                    let iz = (fz.start + c as isize).rem_euclid(n) as usize;
                    buf[[offset + a, iy, iz]] += wxy * fz.weights[c];
                }
            }
        }
    }
}

/// wraps `x` into `[0, n)`
fn wrap(x: f64, n: f64) -> f64 {
    let wrapped = x.rem_euclid(n);
    // rem_euclid can round up to exactly n for tiny negative inputs
    if wrapped >= n { 0.0 } else { wrapped }
}
