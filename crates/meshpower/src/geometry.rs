//! The box that every mesh of a computation is embedded in.

use crate::catalog::PointSet;
use crate::error::Error;
use std::f64::consts::PI;

/// A cubic box with `nmesh^3` cells.
///
/// Cell `i` is centered on `origin + i * cell_size` (along each axis), where
/// `origin = boxcenter - boxsize / 2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxGeometry {
    boxsize: f64,
    boxcenter: [f64; 3],
    nmesh: usize,
}

impl core::fmt::Display for BoxGeometry {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "(nmesh={}, boxsize={}, boxcenter={:?})",
            self.nmesh, self.boxsize, self.boxcenter
        )
    }
}

impl BoxGeometry {
    pub fn new(boxsize: f64, boxcenter: [f64; 3], nmesh: usize) -> Result<Self, Error> {
        if !(boxsize.is_finite() && boxsize > 0.0) {
            return Err(Error::config("boxsize", format!("{boxsize} must be positive and finite")));
        }
        if boxcenter.iter().any(|c| !c.is_finite()) {
            return Err(Error::config("boxcenter", "must be finite"));
        }
        if nmesh < 2 || nmesh % 2 != 0 {
            return Err(Error::config(
                "nmesh",
                format!("{nmesh} must be an even number no smaller than 2"),
            ));
        }
        Ok(Self {
            boxsize,
            boxcenter,
            nmesh,
        })
    }

    /// Derives the box from the bounding extent of `(lo, hi)` corners: the
    /// center is the midpoint and the (cubic) size is `boxpad` times the
    /// largest extent.
    pub fn from_bounds(lo: [f64; 3], hi: [f64; 3], boxpad: f64, nmesh: usize) -> Result<Self, Error> {
        if !(boxpad >= 1.0) {
            return Err(Error::config("boxpad", format!("{boxpad} must be at least 1")));
        }
        let mut extent: f64 = 0.0;
        let mut center = [0.0; 3];
        for ax in 0..3 {
            extent = extent.max(hi[ax] - lo[ax]);
            center[ax] = 0.5 * (lo[ax] + hi[ax]);
        }
        if extent <= 0.0 {
            return Err(Error::config(
                "boxsize",
                "the catalogs have a vanishing extent",
            ));
        }
        Self::new(boxpad * extent, center, nmesh)
    }

    /// Derives the box from the extent of one or more (local) catalogs.
    ///
    /// This is purely local. [`Estimator::geometry_from_extent`] performs the
    /// collective version.
    ///
    /// [`Estimator::geometry_from_extent`]: crate::Estimator::geometry_from_extent
    pub fn from_extent(catalogs: &[&PointSet], boxpad: f64, nmesh: usize) -> Result<Self, Error> {
        let (lo, hi) = combined_extent(catalogs)
            .ok_or_else(|| Error::config("boxsize", "can't derive a box from empty catalogs"))?;
        Self::from_bounds(lo, hi, boxpad, nmesh)
    }

    pub fn boxsize(&self) -> f64 {
        self.boxsize
    }

    pub fn boxcenter(&self) -> [f64; 3] {
        self.boxcenter
    }

    pub fn nmesh(&self) -> usize {
        self.nmesh
    }

    pub fn cell_size(&self) -> f64 {
        self.boxsize / self.nmesh as f64
    }

    /// position of the center of cell `(0, 0, 0)`
    pub fn origin(&self) -> [f64; 3] {
        self.boxcenter.map(|c| c - 0.5 * self.boxsize)
    }

    pub fn volume(&self) -> f64 {
        self.boxsize * self.boxsize * self.boxsize
    }

    pub fn n_cells(&self) -> usize {
        self.nmesh * self.nmesh * self.nmesh
    }

    /// `2π / boxsize`
    pub fn fundamental_k(&self) -> f64 {
        2.0 * PI / self.boxsize
    }

    pub fn nyquist_k(&self) -> f64 {
        0.5 * self.nmesh as f64 * self.fundamental_k()
    }

    /// Fails with a geometry mismatch unless `other` describes the same box.
    pub fn check_compatible(&self, other: &BoxGeometry) -> Result<(), Error> {
        if self.nmesh != other.nmesh {
            Err(Error::geometry_mismatch("nmesh", self.nmesh, other.nmesh))
        } else if self.boxsize != other.boxsize {
            Err(Error::geometry_mismatch("boxsize", self.boxsize, other.boxsize))
        } else if self.boxcenter != other.boxcenter {
            Err(Error::geometry_mismatch(
                "boxcenter",
                format!("{:?}", self.boxcenter),
                format!("{:?}", other.boxcenter),
            ))
        } else {
            Ok(())
        }
    }
}

/// per-axis `(min, max)` over several catalogs (`None` if all are empty)
pub(crate) fn combined_extent(catalogs: &[&PointSet]) -> Option<([f64; 3], [f64; 3])> {
    catalogs
        .iter()
        .filter_map(|c| c.extent())
        .reduce(|(lo_a, hi_a), (lo_b, hi_b)| {
            let mut lo = lo_a;
            let mut hi = hi_a;
            for ax in 0..3 {
                lo[ax] = lo[ax].min(lo_b[ax]);
                hi[ax] = hi[ax].max(hi_b[ax]);
            }
            (lo, hi)
        })
}

/// folds an FFT index into a signed frequency in `(-n/2, n/2]`
#[inline]
pub fn fold_frequency(i: usize, n: usize) -> isize {
    if i <= n / 2 {
        i as isize
    } else {
        i as isize - n as isize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_geometry() {
        assert!(BoxGeometry::new(0.0, [0.0; 3], 8).is_err());
        assert!(BoxGeometry::new(1.0, [0.0; 3], 7).is_err());
        assert!(BoxGeometry::new(1.0, [0.0; 3], 0).is_err());
        assert!(BoxGeometry::new(1.0, [f64::NAN, 0.0, 0.0], 8).is_err());
    }

    #[test]
    fn derived_quantities() {
        let geom = BoxGeometry::new(100.0, [50.0, 0.0, -50.0], 10).unwrap();
        assert_eq!(geom.cell_size(), 10.0);
        assert_eq!(geom.origin(), [0.0, -50.0, -100.0]);
        assert_eq!(geom.volume(), 1e6);
        assert!((geom.nyquist_k() - 5.0 * geom.fundamental_k()).abs() < 1e-15);
    }

    #[test]
    fn box_from_extent() {
        let a = PointSet::unweighted(vec![[0.0, 0.0, 0.0], [10.0, 2.0, 4.0]]).unwrap();
        let b = PointSet::unweighted(vec![[-2.0, 1.0, 1.0]]).unwrap();
        let geom = BoxGeometry::from_extent(&[&a, &b, &PointSet::empty()], 1.5, 16).unwrap();
        assert_eq!(geom.boxsize(), 18.0);
        assert_eq!(geom.boxcenter(), [4.0, 1.0, 2.0]);

        assert!(BoxGeometry::from_extent(&[&PointSet::empty()], 1.5, 16).is_err());
        assert!(BoxGeometry::from_extent(&[&a], 0.5, 16).is_err());
    }

    #[test]
    fn compatibility() {
        let a = BoxGeometry::new(100.0, [0.0; 3], 32).unwrap();
        let b = BoxGeometry::new(100.0, [0.0; 3], 64).unwrap();
        let err = a.check_compatible(&b).unwrap_err();
        assert!(err.is_geometry_mismatch());
        assert!(a.check_compatible(&a).is_ok());
    }

    #[test]
    fn frequency_folding() {
        let folded: Vec<isize> = (0..6).map(|i| fold_frequency(i, 6)).collect();
        assert_eq!(folded, vec![0, 1, 2, 3, -2, -1]);
    }
}
