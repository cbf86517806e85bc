//! Reducers that accumulate Fourier modes into binned power statistics
//!
//! # Broader Context
//!
//! Once a power grid `P(𝒌)` is available, every Fourier cell is a "mode" and
//! the binner streams the modes through a [`Reducer`]. Each mode is packaged
//! as a [`ModeDatum`] that holds:
//! - `k` and `mu`, which are used for binning (and for the Legendre weights)
//! - the complex power of the mode
//! - a `weight`, which is almost always 1. (The binner emits the Hermitian
//!   partner of a half-spectrum cell as a separate datum, so we never need to
//!   fold the factor of 2 into the weight. We keep the register anyway so
//!   that alternative mode weightings stay possible.)
//!
//! The actual binning is taken care of separately. A reducer only knows how
//! to update the `accum_state` of a single bin.

use crate::legendre::legendre;
use crate::state::{AccumStateView, AccumStateViewMut};
use ndarray::ArrayViewMut1;

/// A single Fourier mode, as consumed by a [`Reducer`]
#[derive(Clone, Copy, Debug)]
pub struct ModeDatum {
    pub k: f64,
    pub mu: f64,
    pub power_re: f64,
    pub power_im: f64,
    pub weight: f64,
}

/// describes the output components from a single Reducer accum_state
pub enum OutputDescr {
    /// each component is a named scalar
    MultiScalarComp(&'static [&'static str]),
    /// named scalars followed by a (real, imaginary) pair per multipole
    ScalarsThenPoles {
        scalars: &'static [&'static str],
        n_poles: usize,
    },
}

impl OutputDescr {
    /// the number of components to allocate per accum_state
    pub fn n_per_accum_state(&self) -> usize {
        match self {
            Self::MultiScalarComp(names) => names.len(),
            Self::ScalarsThenPoles { scalars, n_poles } => scalars.len() + 2 * n_poles,
        }
    }
}

/// Reducers operate on individual `accum_state`s.
pub trait Reducer {
    /// the number of f64 elements needed to track the accumulator data
    fn accum_state_size(&self) -> usize;

    /// initializes the storage tracking the acumulator's state.
    ///
    /// This blindly overwrites any existing values, so it can also be used to
    /// reset an `accum_state`.
    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut);

    /// consume a mode to update the accum_state
    fn consume(&self, accum_state: &mut AccumStateViewMut, datum: &ModeDatum);

    /// merge the state information tracked by `accum_state` and `other`, and
    /// update `accum_state` accordingly
    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView);

    /// the (weighted) number of modes that contributed to `accum_state`
    fn n_modes(&self, accum_state: &AccumStateView) -> f64;

    /// extract all output-values from a single accum_state. Expects `value`
    /// to have `self.output_descr().n_per_accum_state()` elements.
    ///
    /// An empty bin produces zeros for every component.
    fn value_from_accum_state(&self, value: &mut ArrayViewMut1<f64>, accum_state: &AccumStateView);

    /// Describes the outputs produced from a single accum_state
    fn output_descr(&self) -> OutputDescr;
}

/// Averages the complex power (along with k and mu) within each `(k, mu)`
/// wedge.
#[derive(Clone, Copy, Debug, Default)]
pub struct WedgeReducer;

impl WedgeReducer {
    const WEIGHT: usize = 0;
    const K_SUM: usize = 1;
    const MU_SUM: usize = 2;
    const RE_SUM: usize = 3;
    const IM_SUM: usize = 4;

    pub const VALUE_N_MODES: usize = 0;
    pub const VALUE_K_MEAN: usize = 1;
    pub const VALUE_MU_MEAN: usize = 2;
    pub const VALUE_POWER_RE: usize = 3;
    pub const VALUE_POWER_IM: usize = 4;
    const OUTPUT_COMPONENTS: &'static [&'static str] =
        &["n_modes", "k_mean", "mu_mean", "power_re", "power_im"];
}

impl Reducer for WedgeReducer {
    fn accum_state_size(&self) -> usize {
        5
    }

    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut) {
        accum_state.fill(0.0);
    }

    #[inline(always)]
    fn consume(&self, accum_state: &mut AccumStateViewMut, datum: &ModeDatum) {
        let w = datum.weight;
        accum_state[Self::WEIGHT] += w;
        accum_state[Self::K_SUM] += w * datum.k;
        accum_state[Self::MU_SUM] += w * datum.mu;
        accum_state[Self::RE_SUM] += w * datum.power_re;
        accum_state[Self::IM_SUM] += w * datum.power_im;
    }

    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView) {
        for i in 0..self.accum_state_size() {
            accum_state[i] += other[i];
        }
    }

    fn n_modes(&self, accum_state: &AccumStateView) -> f64 {
        accum_state[Self::WEIGHT]
    }

    fn value_from_accum_state(&self, value: &mut ArrayViewMut1<f64>, accum_state: &AccumStateView) {
        let n_modes = accum_state[Self::WEIGHT];
        value.fill(0.0);
        if n_modes > 0.0 {
            value[Self::VALUE_N_MODES] = n_modes;
            value[Self::VALUE_K_MEAN] = accum_state[Self::K_SUM] / n_modes;
            value[Self::VALUE_MU_MEAN] = accum_state[Self::MU_SUM] / n_modes;
            value[Self::VALUE_POWER_RE] = accum_state[Self::RE_SUM] / n_modes;
            value[Self::VALUE_POWER_IM] = accum_state[Self::IM_SUM] / n_modes;
        }
    }

    fn output_descr(&self) -> OutputDescr {
        OutputDescr::MultiScalarComp(Self::OUTPUT_COMPONENTS)
    }
}

/// Projects the power within each |k| shell onto Legendre multipoles:
///
/// `P_ell(k) = (2 ell + 1) / N_modes * Σ P(𝒌) L_ell(mu)`
#[derive(Clone, Copy, Debug)]
pub struct PoleReducer<'a> {
    ells: &'a [u32],
}

impl<'a> PoleReducer<'a> {
    const WEIGHT: usize = 0;
    const K_SUM: usize = 1;
    const FIRST_POLE: usize = 2;

    pub const VALUE_N_MODES: usize = 0;
    pub const VALUE_K_MEAN: usize = 1;
    /// index of the real part of the first multipole (the imaginary part
    /// immediately follows the real part)
    pub const VALUE_FIRST_POLE: usize = 2;
    const SCALAR_COMPONENTS: &'static [&'static str] = &["n_modes", "k_mean"];

    pub fn new(ells: &'a [u32]) -> Result<Self, &'static str> {
        if ells.is_empty() {
            Err("at least one multipole order is required")
        } else {
            Ok(Self { ells })
        }
    }

    pub fn ells(&self) -> &'a [u32] {
        self.ells
    }
}

impl Reducer for PoleReducer<'_> {
    fn accum_state_size(&self) -> usize {
        Self::FIRST_POLE + 2 * self.ells.len()
    }

    fn init_accum_state(&self, accum_state: &mut AccumStateViewMut) {
        accum_state.fill(0.0);
    }

    #[inline(always)]
    fn consume(&self, accum_state: &mut AccumStateViewMut, datum: &ModeDatum) {
        let w = datum.weight;
        accum_state[Self::WEIGHT] += w;
        accum_state[Self::K_SUM] += w * datum.k;
        for (i, &ell) in self.ells.iter().enumerate() {
            let leg = w * legendre(ell, datum.mu);
            accum_state[Self::FIRST_POLE + 2 * i] += leg * datum.power_re;
            accum_state[Self::FIRST_POLE + 2 * i + 1] += leg * datum.power_im;
        }
    }

    fn merge(&self, accum_state: &mut AccumStateViewMut, other: &AccumStateView) {
        for i in 0..self.accum_state_size() {
            accum_state[i] += other[i];
        }
    }

    fn n_modes(&self, accum_state: &AccumStateView) -> f64 {
        accum_state[Self::WEIGHT]
    }

    fn value_from_accum_state(&self, value: &mut ArrayViewMut1<f64>, accum_state: &AccumStateView) {
        let n_modes = accum_state[Self::WEIGHT];
        value.fill(0.0);
        if n_modes > 0.0 {
            value[Self::VALUE_N_MODES] = n_modes;
            value[Self::VALUE_K_MEAN] = accum_state[Self::K_SUM] / n_modes;
            for (i, &ell) in self.ells.iter().enumerate() {
                let norm = (2 * ell + 1) as f64 / n_modes;
                value[Self::VALUE_FIRST_POLE + 2 * i] =
                    norm * accum_state[Self::FIRST_POLE + 2 * i];
                value[Self::VALUE_FIRST_POLE + 2 * i + 1] =
                    norm * accum_state[Self::FIRST_POLE + 2 * i + 1];
            }
        }
    }

    fn output_descr(&self) -> OutputDescr {
        OutputDescr::ScalarsThenPoles {
            scalars: Self::SCALAR_COMPONENTS,
            n_poles: self.ells.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs(x: f64) -> f64 {
        if x < 0.0 { -x } else { x }
    }

    fn mode(k: f64, mu: f64, power_re: f64) -> ModeDatum {
        ModeDatum {
            k,
            mu,
            power_re,
            power_im: 0.0,
            weight: 1.0,
        }
    }

    #[test]
    fn wedge_mean() {
        let reducer = WedgeReducer;
        let mut storage = [0.0; 5];
        let mut accum_state = AccumStateViewMut::from_contiguous_slice(&mut storage);
        reducer.init_accum_state(&mut accum_state);
        reducer.consume(&mut accum_state, &mode(0.1, 0.2, 4.0));
        reducer.consume(&mut accum_state, &mode(0.3, 0.4, 8.0));

        let mut out = [0.0; 5];
        reducer.value_from_accum_state(
            &mut ArrayViewMut1::from(&mut out[..]),
            &accum_state.as_view(),
        );
        assert_eq!(out[WedgeReducer::VALUE_N_MODES], 2.0);
        assert_eq!(out[WedgeReducer::VALUE_POWER_RE], 6.0);
        assert!(abs(out[WedgeReducer::VALUE_K_MEAN] - 0.2) < 1e-15);
        assert!(abs(out[WedgeReducer::VALUE_MU_MEAN] - 0.3) < 1e-15);
    }

    #[test]
    fn empty_bins_produce_zeros() {
        let ells = [0, 2];
        let reducer = PoleReducer::new(&ells).unwrap();
        let mut storage = [1.0; 6];
        let mut accum_state = AccumStateViewMut::from_contiguous_slice(&mut storage);
        reducer.init_accum_state(&mut accum_state);
        let mut out = [7.0; 6];
        reducer.value_from_accum_state(
            &mut ArrayViewMut1::from(&mut out[..]),
            &accum_state.as_view(),
        );
        assert_eq!(out, [0.0; 6]);
        assert_eq!(reducer.n_modes(&accum_state.as_view()), 0.0);
    }

    #[test]
    fn pole_projection_of_pure_quadrupole() {
        // P(mu) = L_2(mu) sampled at mu in {-1, 0, 1}:
        // mean(L_2) = 0.5 and mean(L_2^2) = 0.75, so P_2 = 5 * 0.75
        let ells = [0, 2];
        let reducer = PoleReducer::new(&ells).unwrap();
        let mut storage = [0.0; 6];
        let mut accum_state = AccumStateViewMut::from_contiguous_slice(&mut storage);
        reducer.init_accum_state(&mut accum_state);
        for mu in [-1.0, 0.0, 1.0] {
            reducer.consume(&mut accum_state, &mode(0.1, mu, legendre(2, mu)));
        }
        let mut out = [0.0; 6];
        reducer.value_from_accum_state(
            &mut ArrayViewMut1::from(&mut out[..]),
            &accum_state.as_view(),
        );
        assert_eq!(out[PoleReducer::VALUE_N_MODES], 3.0);
        assert!(abs(out[PoleReducer::VALUE_FIRST_POLE] - 0.5) < 1e-15);
        assert!(abs(out[PoleReducer::VALUE_FIRST_POLE + 2] - 3.75) < 1e-14);
    }

    #[test]
    fn merge_is_a_sum() {
        let reducer = WedgeReducer;
        let mut a = [0.0; 5];
        let mut b = [0.0; 5];
        let mut state_a = AccumStateViewMut::from_contiguous_slice(&mut a);
        reducer.consume(&mut state_a, &mode(0.1, 0.5, 2.0));
        {
            let mut state_b = AccumStateViewMut::from_contiguous_slice(&mut b);
            reducer.consume(&mut state_b, &mode(0.1, 0.5, 4.0));
        }
        reducer.merge(&mut state_a, &AccumStateView::from_contiguous_slice(&b));
        assert_eq!(reducer.n_modes(&state_a.as_view()), 2.0);
        assert_eq!(state_a[3], 6.0);
    }
}
