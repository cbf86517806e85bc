//! Test-data helpers shared by the `meshpower` integration tests and
//! benchmarks.

use meshpower::{BoxGeometry, PointSet};
use rand::distr::{Distribution, Uniform};
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;

pub fn seeded_rng(seed: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(seed)
}

/// `n_points` positions drawn uniformly from the (half-open) box
pub fn uniform_positions(seed: u64, n_points: usize, geometry: &BoxGeometry) -> Vec<[f64; 3]> {
    let mut rng = seeded_rng(seed);
    let origin = geometry.origin();
    let dist = Uniform::try_from(0.0..geometry.boxsize()).unwrap();
    (0..n_points)
        .map(|_| {
            [
                origin[0] + dist.sample(&mut rng),
                origin[1] + dist.sample(&mut rng),
                origin[2] + dist.sample(&mut rng),
            ]
        })
        .collect()
}

/// a uniform random catalog with unit weights
pub fn uniform_catalog(seed: u64, n_points: usize, geometry: &BoxGeometry) -> PointSet {
    PointSet::unweighted(uniform_positions(seed, n_points, geometry)).unwrap()
}

/// a uniform random catalog with weights drawn from `[w_min, w_max)`
pub fn weighted_uniform_catalog(
    seed: u64,
    n_points: usize,
    geometry: &BoxGeometry,
    w_min: f64,
    w_max: f64,
) -> PointSet {
    let positions = uniform_positions(seed, n_points, geometry);
    let mut rng = seeded_rng(seed.wrapping_add(0x9e37_79b9));
    let dist = Uniform::try_from(w_min..w_max).unwrap();
    let weights = (0..n_points).map(|_| dist.sample(&mut rng)).collect();
    PointSet::new(positions, weights).unwrap()
}

/// A cubic lattice of `n_per_axis³` unit-weight points spanning the box,
/// starting at `offset` (in units of the lattice spacing) from the lower
/// corner of the box.
pub fn lattice(geometry: &BoxGeometry, n_per_axis: usize, offset: f64) -> PointSet {
    let spacing = geometry.boxsize() / n_per_axis as f64;
    let corner = geometry.origin();
    let mut positions = Vec::with_capacity(n_per_axis.pow(3));
    for i in 0..n_per_axis {
        for j in 0..n_per_axis {
            for k in 0..n_per_axis {
                positions.push([
                    corner[0] + (i as f64 + offset) * spacing,
                    corner[1] + (j as f64 + offset) * spacing,
                    corner[2] + (k as f64 + offset) * spacing,
                ]);
            }
        }
    }
    PointSet::unweighted(positions).unwrap()
}
