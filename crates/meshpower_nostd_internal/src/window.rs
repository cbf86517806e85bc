//! Mass-assignment (a.k.a. resampler) kernels
//!
//! A kernel spreads a particle's weight over `order` consecutive cells along
//! each axis. We follow the convention that cell `i` is centered on grid
//! coordinate `i` (i.e. the grid is "node-centered"), so a particle at grid
//! coordinate `g` has a fractional offset relative to the nodes around it.
//!
//! The 3D weight of a cell is the product of the 1D weights along each axis,
//! and the 1D weights always sum to 1. Wrapping the footprint around periodic
//! boundaries is the caller's job.

/// The largest footprint (per axis) of any supported kernel
pub const MAX_FOOTPRINT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resampler {
    /// nearest grid point
    Ngp,
    /// cloud-in-cell
    Cic,
    /// triangular-shaped cloud
    Tsc,
}

/// The 1D footprint of a single particle along one axis
///
/// Only the first `len` entries of `weights` are meaningful. The footprint
/// covers cells `start, start+1, ..., start+len-1` (before any wrapping).
#[derive(Clone, Copy, Debug)]
pub struct Footprint {
    pub start: isize,
    pub len: usize,
    pub weights: [f64; MAX_FOOTPRINT],
}

/// floor of `x` as an isize.
///
/// `f64::floor` lives in std, so we build it from the truncating cast.
pub fn floor_to_isize(x: f64) -> isize {
    let truncated = x as isize;
    if (truncated as f64) > x {
        truncated - 1
    } else {
        truncated
    }
}

impl Resampler {
    /// number of cells touched along each axis
    pub const fn order(self) -> usize {
        match self {
            Resampler::Ngp => 1,
            Resampler::Cic => 2,
            Resampler::Tsc => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Resampler::Ngp => "ngp",
            Resampler::Cic => "cic",
            Resampler::Tsc => "tsc",
        }
    }

    /// Computes the 1D footprint for a particle at grid coordinate `coord`
    pub fn footprint(self, coord: f64) -> Footprint {
        match self {
            Resampler::Ngp => Footprint {
                start: floor_to_isize(coord + 0.5),
                len: 1,
                weights: [1.0, 0.0, 0.0],
            },
            Resampler::Cic => {
                let start = floor_to_isize(coord);
                let d = coord - start as f64;
                Footprint {
                    start,
                    len: 2,
                    weights: [1.0 - d, d, 0.0],
                }
            }
            Resampler::Tsc => {
                let nearest = floor_to_isize(coord + 0.5);
                // d lies in [-0.5, 0.5)
                let d = coord - nearest as f64;
                let left = 0.5 - d;
                let right = 0.5 + d;
                Footprint {
                    start: nearest - 1,
                    len: 3,
                    weights: [0.5 * left * left, 0.75 - d * d, 0.5 * right * right],
                }
            }
        }
    }
}
