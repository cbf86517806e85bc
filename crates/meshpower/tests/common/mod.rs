// the reason this is named mod.rs has to do with how cargo treats
// subdirectories of tests/ (they aren't compiled as separate test crates)
#![allow(dead_code)]

use meshpower::{BoxGeometry, EdgeSpec, EstimatorConfig, Interlacing, LineOfSight, Resampler};

// based on numpy!
// https://numpy.org/doc/stable/reference/generated/numpy.isclose.html
pub fn isclose(actual: f64, ref_val: f64, rtol: f64, atol: f64) -> bool {
    let actual_nan = actual.is_nan();
    let ref_nan = ref_val.is_nan();
    if actual_nan || ref_nan {
        actual_nan && ref_nan
    } else {
        (actual - ref_val).abs() <= (atol + rtol * ref_val.abs())
    }
}

pub fn assert_allclose(actual: &[f64], ref_vals: &[f64], rtol: f64, atol: f64) {
    assert_eq!(actual.len(), ref_vals.len(), "length mismatch");
    for (i, (a, r)) in actual.iter().zip(ref_vals).enumerate() {
        assert!(
            isclose(*a, *r, rtol, atol),
            "element {i}: actual = {a}, reference = {r}"
        );
    }
}

/// a periodic box with unit cells whose lower corner sits at the origin
pub fn unit_cell_box(nmesh: usize) -> BoxGeometry {
    let half = 0.5 * nmesh as f64;
    BoxGeometry::new(nmesh as f64, [half; 3], nmesh).unwrap()
}

/// k edges at the given multiples of the fundamental mode of `geometry`
pub fn k_edges_in_fundamentals(geometry: &BoxGeometry, multiples: &[f64]) -> EdgeSpec {
    let kf = geometry.fundamental_k();
    EdgeSpec::Explicit(multiples.iter().map(|m| m * kf).collect())
}

/// a configuration with a line of sight along z
pub fn z_los_config(geometry: &BoxGeometry, resampler: Resampler, interlacing: Interlacing) -> EstimatorConfig {
    let mut config = EstimatorConfig::new(geometry.nmesh(), 1.0);
    config.resampler = resampler;
    config.interlacing = interlacing;
    config.los = LineOfSight::Z;
    config
}
