//! Weighted point catalogs, the inputs of the whole estimator.

use crate::error::Error;

/// An ordered collection of 3D positions with one weight per position.
///
/// A `PointSet` is immutable once built. Positions are stored as `[x, y, z]`
/// triplets (in the same length units as the box geometry).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointSet {
    positions: Vec<[f64; 3]>,
    weights: Vec<f64>,
}

impl PointSet {
    /// Build a catalog from index-aligned positions and weights.
    ///
    /// Fails if the lengths differ or if any value isn't finite.
    pub fn new(positions: Vec<[f64; 3]>, weights: Vec<f64>) -> Result<Self, Error> {
        if positions.len() != weights.len() {
            return Err(Error::catalog_shape(format!(
                "{} positions but {} weights",
                positions.len(),
                weights.len()
            )));
        }
        if let Some(i) = positions.iter().position(|p| p.iter().any(|x| !x.is_finite())) {
            return Err(Error::catalog_shape(format!(
                "position {i} has a non-finite coordinate"
            )));
        }
        if let Some(i) = weights.iter().position(|w| !w.is_finite()) {
            return Err(Error::catalog_shape(format!("weight {i} isn't finite")));
        }
        Ok(Self { positions, weights })
    }

    /// Every point gets a weight of 1
    pub fn unweighted(positions: Vec<[f64; 3]>) -> Result<Self, Error> {
        let weights = vec![1.0; positions.len()];
        Self::new(positions, weights)
    }

    /// The placeholder catalog held by workers that don't own any input
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn sum_weights(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn sum_weights_squared(&self) -> f64 {
        self.weights.iter().map(|w| w * w).sum()
    }

    /// Returns the weighted centroid (or `None` when the total weight is 0)
    pub fn weighted_centroid(&self) -> Option<[f64; 3]> {
        let total = self.sum_weights();
        if total == 0.0 {
            return None;
        }
        let mut out = [0.0; 3];
        for (pos, w) in self.positions.iter().zip(&self.weights) {
            for ax in 0..3 {
                out[ax] += w * pos[ax];
            }
        }
        Some(out.map(|x| x / total))
    }

    /// per-axis `(min, max)` of the positions. `None` for an empty catalog.
    pub fn extent(&self) -> Option<([f64; 3], [f64; 3])> {
        let first = self.positions.first()?;
        let mut lo = *first;
        let mut hi = *first;
        for pos in &self.positions[1..] {
            for ax in 0..3 {
                lo[ax] = lo[ax].min(pos[ax]);
                hi[ax] = hi[ax].max(pos[ax]);
            }
        }
        Some((lo, hi))
    }

    /// Splits the catalog into `n_chunks` contiguous pieces whose lengths
    /// differ by at most one (earlier chunks get the extra points).
    pub fn split_contiguous(&self, n_chunks: usize) -> Vec<PointSet> {
        let n_chunks = n_chunks.max(1);
        let base = self.len() / n_chunks;
        let remainder = self.len() % n_chunks;
        let mut out = Vec::with_capacity(n_chunks);
        let mut start = 0;
        for i in 0..n_chunks {
            let stop = start + base + usize::from(i < remainder);
            out.push(PointSet {
                positions: self.positions[start..stop].to_vec(),
                weights: self.weights[start..stop].to_vec(),
            });
            start = stop;
        }
        out
    }
}

/// The catalogs that feed a single overdensity mesh.
///
/// The variant determines how the overdensity gets normalized (see
/// [`OverdensityBuilder`](crate::OverdensityBuilder)).
#[derive(Clone, Debug, PartialEq)]
pub enum CatalogInputs {
    /// a single catalog, normalized by its own mean density
    DataOnly { data: PointSet },
    /// data minus (rescaled) randoms
    WithRandoms { data: PointSet, randoms: PointSet },
    /// reconstruction convention: data minus (rescaled) shifted randoms.
    /// The unshifted randoms only contribute to the box extent and are
    /// never painted.
    WithShiftedRandoms {
        data: PointSet,
        randoms: PointSet,
        shifted_randoms: PointSet,
    },
}

impl CatalogInputs {
    pub fn data_only(data: PointSet) -> Self {
        Self::DataOnly { data }
    }

    pub fn with_randoms(data: PointSet, randoms: PointSet) -> Self {
        Self::WithRandoms { data, randoms }
    }

    pub fn with_shifted_randoms(data: PointSet, randoms: PointSet, shifted_randoms: PointSet) -> Self {
        Self::WithShiftedRandoms {
            data,
            randoms,
            shifted_randoms,
        }
    }

    pub fn data(&self) -> &PointSet {
        match self {
            Self::DataOnly { data }
            | Self::WithRandoms { data, .. }
            | Self::WithShiftedRandoms { data, .. } => data,
        }
    }

    pub fn randoms(&self) -> Option<&PointSet> {
        match self {
            Self::DataOnly { .. } => None,
            Self::WithRandoms { randoms, .. } | Self::WithShiftedRandoms { randoms, .. } => {
                Some(randoms)
            }
        }
    }

    pub fn shifted_randoms(&self) -> Option<&PointSet> {
        match self {
            Self::WithShiftedRandoms {
                shifted_randoms, ..
            } => Some(shifted_randoms),
            _ => None,
        }
    }

    /// every catalog held by self (used to derive the box extent)
    pub fn catalogs(&self) -> Vec<&PointSet> {
        let mut out = vec![self.data()];
        out.extend(self.randoms());
        out.extend(self.shifted_randoms());
        out
    }

    /// An input of the same variant where every catalog is empty.
    pub(crate) fn empty_like(&self) -> Self {
        match self {
            Self::DataOnly { .. } => Self::data_only(PointSet::empty()),
            Self::WithRandoms { .. } => Self::with_randoms(PointSet::empty(), PointSet::empty()),
            Self::WithShiftedRandoms { .. } => {
                Self::with_shifted_randoms(PointSet::empty(), PointSet::empty(), PointSet::empty())
            }
        }
    }

    /// Rebuilds an input of the same variant from replacement catalogs
    /// (ordered as in [`CatalogInputs::catalogs`]).
    pub(crate) fn rebuild_like(&self, mut parts: Vec<PointSet>) -> Self {
        parts.resize_with(3, PointSet::empty);
        let mut it = parts.into_iter();
        let mut next = || it.next().unwrap_or_default();
        match self {
            Self::DataOnly { .. } => Self::data_only(next()),
            Self::WithRandoms { .. } => {
                let data = next();
                Self::with_randoms(data, next())
            }
            Self::WithShiftedRandoms { .. } => {
                let data = next();
                let randoms = next();
                Self::with_shifted_randoms(data, randoms, next())
            }
        }
    }
}
