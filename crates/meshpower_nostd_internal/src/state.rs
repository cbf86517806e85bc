use core::ops::{Index, IndexMut};
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

/// A read-only view of a single bin's accumulator state
///
/// # Note
/// There is some benefit to wrapping the ndarray types since it helps contain
/// all references to the ndarray package to a small number of files.
pub struct AccumStateView<'a> {
    data: ArrayView1<'a, f64>,
}

impl<'a> AccumStateView<'a> {
    pub fn from_array_view(array_view: ArrayView1<'a, f64>) -> Self {
        Self { data: array_view }
    }

    pub fn from_contiguous_slice(slice: &'a [f64]) -> Self {
        Self {
            data: ArrayView1::from(slice),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Index<usize> for AccumStateView<'_> {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

/// A mutable view of a single bin's accumulator state
pub struct AccumStateViewMut<'a> {
    data: ArrayViewMut1<'a, f64>,
}

impl<'a> AccumStateViewMut<'a> {
    pub fn from_array_view(array_view: ArrayViewMut1<'a, f64>) -> Self {
        Self { data: array_view }
    }

    pub fn from_contiguous_slice(slice: &'a mut [f64]) -> Self {
        Self {
            data: ArrayViewMut1::from(slice),
        }
    }

    pub fn as_view(&self) -> AccumStateView<'_> {
        AccumStateView::from_array_view(self.data.view())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Index<usize> for AccumStateViewMut<'_> {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

impl IndexMut<usize> for AccumStateViewMut<'_> {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.data[i]
    }
}

/// Represents a collection of accumulator states, one per bin
///
/// The underlying array has shape `[accum_state_size, n_bins]`, so a single
/// `accum_state` is a column. For the multi-dimensional binning used by the
/// wedge estimator, the bins are flattened in row-major `(k, mu)` order.
pub struct StatePackViewMut<'a> {
    data: ArrayViewMut2<'a, f64>,
}

impl<'a> StatePackViewMut<'a> {
    pub fn from_array_view(array_view: ArrayViewMut2<'a, f64>) -> Self {
        Self { data: array_view }
    }

    /// wraps a flat buffer holding `n_states` accum_states.
    pub fn from_slice(
        accum_state_size: usize,
        n_states: usize,
        slice: &'a mut [f64],
    ) -> Result<Self, &'static str> {
        ArrayViewMut2::from_shape([accum_state_size, n_states], slice)
            .map(Self::from_array_view)
            .map_err(|_| "the statepack buffer has the wrong length")
    }

    pub fn get_state(&self, i: usize) -> AccumStateView<'_> {
        AccumStateView::from_array_view(self.data.index_axis(Axis(1), i))
    }

    pub fn get_state_mut(&mut self, i: usize) -> AccumStateViewMut<'_> {
        AccumStateViewMut::from_array_view(self.data.index_axis_mut(Axis(1), i))
    }

    pub fn state_size(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_states(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn as_view(&self) -> StatePackView<'_> {
        StatePackView {
            data: self.data.view(),
        }
    }
}

/// Read-only counterpart to [`StatePackViewMut`]
pub struct StatePackView<'a> {
    data: ArrayView2<'a, f64>,
}

impl<'a> StatePackView<'a> {
    pub fn from_array_view(array_view: ArrayView2<'a, f64>) -> Self {
        Self { data: array_view }
    }

    pub fn from_slice(
        accum_state_size: usize,
        n_states: usize,
        slice: &'a [f64],
    ) -> Result<Self, &'static str> {
        ArrayView2::from_shape([accum_state_size, n_states], slice)
            .map(Self::from_array_view)
            .map_err(|_| "the statepack buffer has the wrong length")
    }

    pub fn get_state(&self, i: usize) -> AccumStateView<'_> {
        AccumStateView::from_array_view(self.data.index_axis(Axis(1), i))
    }

    pub fn state_size(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_states(&self) -> usize {
        self.data.len_of(Axis(1))
    }
}
