// basic utilities for manipulating whole statepacks. Most of the time the
// binner is the only caller, but the combination logic is also needed when
// partial results arrive from other workers as flat buffers.

use crate::reducer::Reducer;
use crate::state::{StatePackView, StatePackViewMut};

/// (re)initialize every accum_state in `statepack`
pub fn reset_full_statepack(reducer: &impl Reducer, statepack: &mut StatePackViewMut) {
    for i in 0..statepack.n_states() {
        reducer.init_accum_state(&mut statepack.get_state_mut(i));
    }
}

/// merge every accum_state of `other` into the matching accum_state of
/// `statepack`.
pub fn merge_full_statepacks(
    reducer: &impl Reducer,
    statepack: &mut StatePackViewMut,
    other: &StatePackView,
) -> Result<(), &'static str> {
    if statepack.n_states() != other.n_states() || statepack.state_size() != other.state_size() {
        return Err("statepacks have inconsistent shapes");
    }
    for i in 0..statepack.n_states() {
        reducer.merge(&mut statepack.get_state_mut(i), &other.get_state(i));
    }
    Ok(())
}

/// Same as [`merge_full_statepacks`], but both statepacks are stored in flat
/// buffers (this is how statepacks travel between workers).
pub fn merge_flat_statepacks(
    reducer: &impl Reducer,
    n_bins: usize,
    dst: &mut [f64],
    src: &[f64],
) -> Result<(), &'static str> {
    let state_size = reducer.accum_state_size();
    let mut dst_pack = StatePackViewMut::from_slice(state_size, n_bins, dst)?;
    let src_pack = StatePackView::from_slice(state_size, n_bins, src)?;
    merge_full_statepacks(reducer, &mut dst_pack, &src_pack)
}
