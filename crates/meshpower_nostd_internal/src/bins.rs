//! Bin edges used for |k| shells and μ wedges. The [`BinEdges`] trait provides
//! a common interface implemented by [`RegularBinEdges`] and
//! [`IrregularBinEdges`].
//!
//! Every bin is a half-open interval `[lo, hi)`: a value that lands exactly on
//! an interior edge belongs to the higher bin. There is one exception, which
//! matters for μ-binning: when `closed_right` is requested, a value equal to
//! the last edge is assigned to the last bin (μ = 1 is a perfectly ordinary
//! value for modes along the line of sight).

/// Super simple. This can be expanded as needed.
pub trait BinEdges {
    /// Calculate the bin index for a given value (see the module docs for the
    /// boundary convention).
    fn bin_index(&self, value: f64) -> Option<usize>;

    fn n_bins(&self) -> usize;

    /// returns the `i`th edge (`i` may equal `self.n_bins()`)
    fn edge(&self, i: usize) -> f64;

    fn leftmost_edge(&self) -> f64 {
        self.edge(0)
    }

    fn rightmost_edge(&self) -> f64 {
        self.edge(self.n_bins())
    }

    /// Like [`BinEdges::bin_index`], but a value equal to the rightmost edge
    /// is assigned to the last bin.
    fn bin_index_closed_right(&self, value: f64) -> Option<usize> {
        if value == self.rightmost_edge() {
            Some(self.n_bins() - 1)
        } else {
            self.bin_index(value)
        }
    }
}

/// Checks that `bin_edges` could be used to build an [`IrregularBinEdges`]
pub fn validate_bin_edges(bin_edges: &[f64]) -> Result<(), &'static str> {
    if bin_edges.len() < 2 {
        return Err("A minimum of two bin edges are required");
    }

    if bin_edges.iter().any(|x| !x.is_finite()) {
        return Err("Bin edges must be finite");
    }

    if bin_edges.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err("Bin edges must be in strictly increasing order");
    }
    Ok(())
}

/// Regular bins with uniform spacing
#[derive(Clone, Debug, PartialEq)]
pub struct RegularBinEdges {
    min: f64,
    width: f64,
    n_bins: usize,
}

impl RegularBinEdges {
    /// Note that we initialize with n_bins rather than the bin width
    pub fn new(min: f64, max: f64, n_bins: usize) -> Result<Self, &'static str> {
        if n_bins == 0 {
            Err("Number of bins must be greater than zero")
        } else if !min.is_finite() || !max.is_finite() {
            Err("Min and max values must be finite")
        } else if max <= min {
            Err("Maximum value must be greater than minimum value")
        } else {
            Ok(Self {
                min,
                width: (max - min) / n_bins as f64,
                n_bins,
            })
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }
}

impl BinEdges for RegularBinEdges {
    fn bin_index(&self, value: f64) -> Option<usize> {
        // written so that NaN falls through to None
        if !(value >= self.min) {
            return None;
        }
        // this cast handles the truncation
        let index = ((value - self.min) / self.width) as usize;
        if index < self.n_bins {
            Some(index)
        } else {
            None
        }
    }

    fn n_bins(&self) -> usize {
        self.n_bins
    }

    fn edge(&self, i: usize) -> f64 {
        if i == self.n_bins {
            // avoid accumulating round-off in the rightmost edge
            self.min + self.width * (self.n_bins as f64)
        } else {
            self.min + self.width * (i as f64)
        }
    }
}

/// Arbitrary (strictly increasing) bin edges, borrowed from the caller.
#[derive(Clone, Debug)]
pub struct IrregularBinEdges<'a> {
    bin_edges: &'a [f64],
}

impl<'a> IrregularBinEdges<'a> {
    pub fn new(bin_edges: &'a [f64]) -> Result<IrregularBinEdges<'a>, &'static str> {
        validate_bin_edges(bin_edges)?;
        Ok(IrregularBinEdges { bin_edges })
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.bin_edges
    }
}

impl BinEdges for IrregularBinEdges<'_> {
    fn bin_index(&self, value: f64) -> Option<usize> {
        let last = self.bin_edges.len() - 1;
        if !(value >= self.bin_edges[0]) || value >= self.bin_edges[last] {
            return None;
        }

        // index of the first edge that is strictly greater than value
        let first_greater = self.bin_edges.partition_point(|&edge| edge <= value);
        Some(first_greater - 1)
    }

    fn n_bins(&self) -> usize {
        self.bin_edges.len() - 1
    }

    fn edge(&self, i: usize) -> f64 {
        self.bin_edges[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs(x: f64) -> f64 {
        if x < 0.0 { -x } else { x }
    }

    #[test]
    fn regular_bins_invalid_creation() {
        assert!(RegularBinEdges::new(0.0, 0.5, 0).is_err());
        assert!(RegularBinEdges::new(0.5, 0.5, 5).is_err());
        assert!(RegularBinEdges::new(0.5, 0.1, 5).is_err());
        assert!(RegularBinEdges::new(f64::NAN, 0.5, 5).is_err());
        assert!(RegularBinEdges::new(0.0, f64::INFINITY, 5).is_err());
    }

    #[test]
    fn irregular_bins_invalid_creation() {
        // not enough edges
        assert!(IrregularBinEdges::new(&[0.01]).is_err());
        // unsorted or repeated edges
        assert!(IrregularBinEdges::new(&[0.2, 0.1]).is_err());
        assert!(IrregularBinEdges::new(&[0.0, 0.1, 0.1]).is_err());
        // non-finite values
        assert!(IrregularBinEdges::new(&[f64::NAN, 0.1]).is_err());
        assert!(IrregularBinEdges::new(&[0.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn k_shell_indexing() {
        let rbins = RegularBinEdges::new(0.0, 0.25, 5).unwrap();
        let ibins = IrregularBinEdges::new(&[0.0, 0.05, 0.1, 0.15, 0.2, 0.25]).unwrap();

        let bins_list: [&dyn BinEdges; 2] = [&rbins, &ibins];
        for bins in &bins_list {
            assert_eq!(bins.n_bins(), 5);
            assert_eq!(bins.bin_index(0.0), Some(0));
            assert_eq!(bins.bin_index(0.049), Some(0));
            assert_eq!(bins.bin_index(0.051), Some(1));
            assert_eq!(bins.bin_index(0.249), Some(4));

            assert_eq!(bins.bin_index(0.25), None);
            assert_eq!(bins.bin_index(-0.01), None);
            assert_eq!(bins.bin_index(f64::NAN), None);
        }
    }

    #[test]
    fn mu_wedge_closed_right() {
        let mu_bins = IrregularBinEdges::new(&[0.0, 0.25, 0.5, 0.75, 1.0]).unwrap();
        assert_eq!(mu_bins.bin_index(1.0), None);
        assert_eq!(mu_bins.bin_index_closed_right(1.0), Some(3));
        assert_eq!(mu_bins.bin_index_closed_right(0.5), Some(2));
        assert_eq!(mu_bins.bin_index_closed_right(1.0001), None);
    }

    #[test]
    fn edges_are_reported() {
        let bins = RegularBinEdges::new(0.01, 0.03, 4).unwrap();
        assert_eq!(bins.leftmost_edge(), 0.01);
        assert!(abs(bins.edge(2) - 0.02) < 1e-15);
        assert!(abs(bins.rightmost_edge() - 0.03) < 1e-15);
    }
}
