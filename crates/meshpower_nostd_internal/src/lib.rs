/*!
Internal machinery for the `meshpower` crate that doesn't require the
standard library.

Everything in here is allocation-free: callers own the storage (grid slabs,
statepacks) and this crate only knows how to interpret and update it. The
public crate is responsible for distributing the work, for the FFTs and for
error-handling.

# Developer Guide

The binned statistics follow the same "statepack" convention throughout:
- a single bin is tracked by an `accum_state`, a handful of `f64` registers
  whose meaning is defined by a [`Reducer`]
- a collection of `accum_state`s (one per bin) is a statepack. It's stored as
  a 2D array with shape `[accum_state_size, n_bins]` and is viewed through
  [`StatePackViewMut`]
- partial statepacks (e.g. computed by separate workers) are combined with
  [`Reducer::merge`]. Every reducer in this crate is a plain sum, so the
  merge is associative and commutative, but the callers still merge in rank
  order to stay bitwise reproducible.
*/
#![no_std]
#![deny(rustdoc::broken_intra_doc_links)]

mod bins;
mod legendre;
mod reduce_utils;
mod reducer;
mod state;
mod window;

pub use bins::{BinEdges, IrregularBinEdges, RegularBinEdges, validate_bin_edges};
pub use legendre::{legendre, legendre_integral};
pub use reduce_utils::{merge_flat_statepacks, merge_full_statepacks, reset_full_statepack};
pub use reducer::{ModeDatum, OutputDescr, PoleReducer, Reducer, WedgeReducer};
pub use state::{AccumStateView, AccumStateViewMut, StatePackView, StatePackViewMut};
pub use window::{Footprint, MAX_FOOTPRINT, Resampler, floor_to_isize};
