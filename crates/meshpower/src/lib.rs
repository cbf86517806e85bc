/*!
Estimates power spectra, correlators and the propagator of weighted point
sets by painting them onto a periodic mesh and Fourier transforming it.

The main use-case is the comparison of a reconstructed galaxy density field
with the initial-conditions density field that it's meant to recover: the
propagator `G = P_cross / (b P_init)` quantifies how much of the initial
linear density survives the reconstruction.

# High-Level: the pipeline

1. The coordinating worker owns the catalogs and distributes them
   ([`scatter_inputs`]).
2. Each catalog is painted onto a mesh with a mass-assignment kernel
   ([`GridAssigner`]), optionally twice (interlacing) to suppress aliasing.
3. The data and randoms meshes are combined into an overdensity
   ([`OverdensityBuilder`]).
4. The overdensity is Fourier transformed and the (cross-)power is computed
   cell by cell ([`SpectralTransformer`]).
5. The power is binned in `|k|` (multipoles) or in `(|k|, μ)` wedges
   ([`MultipoleBinner`]).
6. Ratios of the binned spectra give the propagator, the correlation
   coefficient and the transfer function ([`PropagatorAggregator`],
   [`Correlator`]).

Every stage that touches the mesh is collective: the mesh is split in slabs
across the workers of a [`Communicator`] and all of them must take part.
[`Estimator`] bundles the communicator and an [`EstimatorConfig`] and drives
the stages in order.

# Developer Guide

The binned reductions and the mass-assignment kernels live in
[`meshpower_nostd_internal`], which doesn't depend on the standard library.
See its crate-level documentation for the statepack convention.

*/

#![deny(rustdoc::broken_intra_doc_links)]

// inform build-system of the crates in this package
mod binner;
mod catalog;
mod comm;
mod config;
mod error;
mod export;
mod fft;
mod geometry;
pub mod logging;
mod overdensity;
mod paint;
mod pipeline;
mod propagator;
mod spectrum;
mod thread_world;

// pull in symbols that visible outside of the package
pub use binner::{LineOfSight, MultipoleBinner};
pub use catalog::{CatalogInputs, PointSet};
pub use comm::{
    Communicator, Payload, ROOT, SerialComm, SlabDecomposition, scatter_inputs, scatter_points,
};
pub use config::{EdgeSpec, EstimatorConfig};
pub use error::Error;
pub use export::{ExportFormat, Records, write_npy, write_records, write_txt};
pub use fft::{FourierMesh, PowerMesh, SpectralTransformer};
pub use geometry::{BoxGeometry, fold_frequency};
pub use meshpower_nostd_internal::Resampler;
pub use overdensity::{Overdensity, OverdensityBuilder, ShotNoise};
pub use paint::{
    BoundaryPolicy, CatalogMeshes, GridAssigner, Interlacing, PaintReport, PaintedMesh, RealMesh,
};
pub use pipeline::{Estimator, MeshField};
pub use propagator::{
    Correlator, DEFAULT_DIVISION_FLOOR, PropagatorAggregator, PropagatorResult,
    RELATIVE_DIVISION_FLOOR, WedgeRatio,
};
pub use spectrum::{BinStatus, MultipoleSpectrum, SpectrumSample, SpectrumWedges};
pub use thread_world::{ThreadComm, ThreadWorld};
