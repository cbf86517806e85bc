//! Turns auto- and cross-spectra into the propagator (and related ratios).
//!
//! Every ratio is formed per bin. A denominator whose magnitude doesn't
//! exceed the division floor yields a value of 0 flagged with
//! [`BinStatus::DivisionByNearZero`], so no infinity or NaN ever reaches the
//! outputs.
//!
//! The floor of a ratio is the larger of the absolute `division_floor` and
//! [`RELATIVE_DIVISION_FLOOR`] times the largest denominator magnitude over
//! all of its bins. A spectrum that is only nonzero through round-off is
//! therefore flagged instead of producing huge ratios.

use ndarray::Array2;

use meshpower_nostd_internal::legendre_integral;

use crate::error::Error;
use crate::export::Records;
use crate::spectrum::{BinStatus, MultipoleSpectrum, SpectrumWedges};

/// The default (absolute) division floor
pub const DEFAULT_DIVISION_FLOOR: f64 = 1e-30;

/// The division floor relative to the largest denominator of a ratio
pub const RELATIVE_DIVISION_FLOOR: f64 = 1e-12;

/// The propagator per k-bin and multipole
#[derive(Clone, Debug, PartialEq)]
pub struct PropagatorResult {
    k_edges: Vec<f64>,
    k_mean: Vec<f64>,
    ells: Vec<u32>,
    // shape (n_ells, n_k)
    values: Array2<f64>,
    status: Array2<BinStatus>,
    bias: f64,
    growth_rate: Option<f64>,
}

impl PropagatorResult {
    pub fn k_edges(&self) -> &[f64] {
        &self.k_edges
    }

    pub fn k_mean(&self) -> &[f64] {
        &self.k_mean
    }

    pub fn ells(&self) -> &[u32] {
        &self.ells
    }

    /// propagator values with shape `(n_ells, n_k)`; invalid bins hold 0
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// per-bin status with shape `(n_ells, n_k)`
    pub fn status(&self) -> &Array2<BinStatus> {
        &self.status
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn growth_rate(&self) -> Option<f64> {
        self.growth_rate
    }

    /// the values (and statuses) of multipole `ell`
    pub fn pole(&self, ell: u32) -> Option<(Vec<f64>, Vec<BinStatus>)> {
        let il = self.ells.iter().position(|&e| e == ell)?;
        Some((self.values.row(il).to_vec(), self.status.row(il).to_vec()))
    }

    /// one row per (k, ℓ): `k_mean, ell, propagator, status, bias,
    /// growth_rate` (the growth rate column holds 0 when none was used)
    pub fn to_records(&self) -> Result<Records, Error> {
        let mut rows = Vec::with_capacity(self.values.len());
        for ik in 0..self.k_mean.len() {
            for (il, &ell) in self.ells.iter().enumerate() {
                rows.push(vec![
                    self.k_mean[ik],
                    ell as f64,
                    self.values[[il, ik]],
                    self.status[[il, ik]].code() as f64,
                    self.bias,
                    self.growth_rate.unwrap_or(0.0),
                ]);
            }
        }
        Records::from_rows(
            &["k_mean", "ell", "propagator", "status", "bias", "growth_rate"],
            rows,
        )
    }
}

/// A ratio (or other derived quantity) per `(|k|, μ)` wedge
#[derive(Clone, Debug, PartialEq)]
pub struct WedgeRatio {
    k_edges: Vec<f64>,
    mu_edges: Vec<f64>,
    k_mean: Vec<f64>,
    // shape (n_k, n_mu)
    mu_mean: Array2<f64>,
    values: Array2<f64>,
    status: Array2<BinStatus>,
}

impl WedgeRatio {
    pub fn k_edges(&self) -> &[f64] {
        &self.k_edges
    }

    pub fn mu_edges(&self) -> &[f64] {
        &self.mu_edges
    }

    /// shape `(n_k, n_mu)`; invalid wedges hold 0
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn status(&self) -> &Array2<BinStatus> {
        &self.status
    }

    /// `G_ℓ(k) = (2ℓ+1) / Σ_j Δμ_j · Σ_j G_j ∫_{μ-bin j} L_ℓ(μ) dμ` over the
    /// valid wedges of each k-bin.
    ///
    /// A k-bin without valid wedges inherits the "worst" wedge status
    /// (a near-zero division takes precedence over an empty wedge).
    fn project(&self, ells: &[u32], bias: f64, growth_rate: Option<f64>) -> PropagatorResult {
        let (n_k, n_mu) = self.values.dim();
        let mut values = Array2::zeros((ells.len(), n_k));
        let mut status = Array2::from_elem((ells.len(), n_k), BinStatus::Valid);
        for ik in 0..n_k {
            let mut width = 0.0;
            let mut sums = vec![0.0; ells.len()];
            let mut invalid = BinStatus::EmptyBin;
            for imu in 0..n_mu {
                let wedge_status = self.status[[ik, imu]];
                if !wedge_status.is_valid() {
                    if wedge_status != BinStatus::EmptyBin {
                        invalid = wedge_status;
                    }
                    continue;
                }
                let (lo, hi) = (self.mu_edges[imu], self.mu_edges[imu + 1]);
                width += hi - lo;
                for (sum, &ell) in sums.iter_mut().zip(ells) {
                    *sum += self.values[[ik, imu]] * legendre_integral(ell, lo, hi);
                }
            }
            for (il, &ell) in ells.iter().enumerate() {
                if width > 0.0 {
                    values[[il, ik]] = (2 * ell + 1) as f64 * sums[il] / width;
                } else {
                    status[[il, ik]] = invalid;
                }
            }
        }
        PropagatorResult {
            k_edges: self.k_edges.clone(),
            k_mean: self.k_mean.clone(),
            ells: ells.to_vec(),
            values,
            status,
            bias,
            growth_rate,
        }
    }

    /// one row per wedge: `k_mean, mu_mean, k_index, mu_index, value, status`
    pub fn to_records(&self) -> Result<Records, Error> {
        let (n_k, n_mu) = self.values.dim();
        let mut rows = Vec::with_capacity(n_k * n_mu);
        for ik in 0..n_k {
            for imu in 0..n_mu {
                rows.push(vec![
                    self.k_mean[ik],
                    self.mu_mean[[ik, imu]],
                    ik as f64,
                    imu as f64,
                    self.values[[ik, imu]],
                    self.status[[ik, imu]].code() as f64,
                ]);
            }
        }
        Records::from_rows(
            &["k_mean", "mu_mean", "k_index", "mu_index", "value", "status"],
            rows,
        )
    }
}

/// the mode-weighted mean |k| of every k-bin, over all wedges
fn wedge_k_mean(wedges: &SpectrumWedges) -> Vec<f64> {
    (0..wedges.n_k())
        .map(|ik| {
            let (n, k_sum) = (0..wedges.n_mu())
                .map(|imu| wedges.get(ik, imu))
                .fold((0.0, 0.0), |(n, k), s| (n + s.n_modes, k + s.n_modes * s.k_mean));
            if n > 0.0 { k_sum / n } else { 0.0 }
        })
        .collect()
}

/// Builds a [`WedgeRatio`] from a per-wedge closure. The closure receives
/// the index of the wedge and returns `Ok(value)` or the status flagging an
/// invalid value. Wedges that are empty in any of `inputs` are flagged
/// `EmptyBin` without calling the closure.
fn wedge_ratio(
    inputs: &[&SpectrumWedges],
    mut f: impl FnMut(usize, usize) -> Result<f64, BinStatus>,
) -> WedgeRatio {
    let reference = inputs[0];
    let (n_k, n_mu) = (reference.n_k(), reference.n_mu());
    let mut values = Array2::zeros((n_k, n_mu));
    let mut status = Array2::from_elem((n_k, n_mu), BinStatus::Valid);
    let mut mu_mean = Array2::zeros((n_k, n_mu));
    for ik in 0..n_k {
        for imu in 0..n_mu {
            mu_mean[[ik, imu]] = reference.get(ik, imu).mu_mean;
            if inputs.iter().any(|w| !w.get(ik, imu).status.is_valid()) {
                status[[ik, imu]] = BinStatus::EmptyBin;
                continue;
            }
            match f(ik, imu) {
                Ok(v) if v.is_finite() => values[[ik, imu]] = v,
                Ok(_) => status[[ik, imu]] = BinStatus::DivisionByNearZero,
                Err(s) => status[[ik, imu]] = s,
            }
        }
    }
    WedgeRatio {
        k_edges: reference.k_edges().to_vec(),
        mu_edges: reference.mu_edges().to_vec(),
        k_mean: wedge_k_mean(reference),
        mu_mean,
        values,
        status,
    }
}

fn max_abs(values: impl Iterator<Item = f64>) -> f64 {
    values
        .filter(|v| v.is_finite())
        .fold(0.0, |acc: f64, v| acc.max(v.abs()))
}

/// the floor of a ratio whose largest denominator magnitude is `scale`
fn scaled_floor(division_floor: f64, scale: f64) -> f64 {
    division_floor.max(RELATIVE_DIVISION_FLOOR * scale)
}

/// the real power of every populated wedge
fn valid_powers(wedges: &SpectrumWedges) -> impl Iterator<Item = f64> + '_ {
    wedges
        .samples()
        .iter()
        .filter(|s| s.status.is_valid())
        .map(|s| s.power.re)
}

/// `num / denom`, unless `|denom| <= floor`
fn guarded_div(num: f64, denom: f64, floor: f64) -> Result<f64, BinStatus> {
    if denom.abs() <= floor {
        Err(BinStatus::DivisionByNearZero)
    } else {
        Ok(num / denom)
    }
}

fn validate_scalars(bias: f64, division_floor: f64) -> Result<(), Error> {
    if !(bias.is_finite() && bias > 0.0) {
        return Err(Error::config("bias", format!("{bias} must be positive and finite")));
    }
    if !(division_floor.is_finite() && division_floor >= 0.0) {
        return Err(Error::config(
            "division_floor",
            format!("{division_floor} must be non-negative and finite"),
        ));
    }
    Ok(())
}

pub struct PropagatorAggregator;

impl PropagatorAggregator {
    /// `Prop_ℓ(k) = Cross_ℓ(k) / (bias · Auto_ℓ(k))`, using the real parts of
    /// the multipoles.
    pub fn from_poles(
        cross: &MultipoleSpectrum,
        auto: &MultipoleSpectrum,
        bias: f64,
        division_floor: f64,
    ) -> Result<PropagatorResult, Error> {
        validate_scalars(bias, division_floor)?;
        cross.check_same_binning(auto)?;
        let n_k = cross.n_k();
        let n_ells = cross.ells().len();
        let floor = scaled_floor(
            division_floor,
            max_abs(
                (0..n_k)
                    .filter(|&ik| auto.status()[ik].is_valid())
                    .flat_map(|ik| (0..n_ells).map(move |il| bias * auto.values()[[il, ik]].re)),
            ),
        );
        let mut values = Array2::zeros((n_ells, n_k));
        let mut status = Array2::from_elem((n_ells, n_k), BinStatus::Valid);
        for ik in 0..n_k {
            for il in 0..n_ells {
                if !(cross.status()[ik].is_valid() && auto.status()[ik].is_valid()) {
                    status[[il, ik]] = BinStatus::EmptyBin;
                    continue;
                }
                let num = cross.values()[[il, ik]].re;
                let denom = bias * auto.values()[[il, ik]].re;
                match guarded_div(num, denom, floor) {
                    Ok(v) => values[[il, ik]] = v,
                    Err(s) => status[[il, ik]] = s,
                }
            }
        }
        Ok(PropagatorResult {
            k_edges: cross.k_edges().to_vec(),
            k_mean: cross.k_mean().to_vec(),
            ells: cross.ells().to_vec(),
            values,
            status,
            bias,
            growth_rate: None,
        })
    }

    /// Forms the propagator per wedge,
    /// `G(k, μ) = Cross / ((b + f μ̄²) · Auto_init)`, and projects it onto
    /// the requested multipoles (f is 0 when `growth_rate` is `None`).
    pub fn from_wedges(
        cross: &SpectrumWedges,
        auto_init: &SpectrumWedges,
        bias: f64,
        growth_rate: Option<f64>,
        division_floor: f64,
        ells: &[u32],
    ) -> Result<PropagatorResult, Error> {
        let ratio = Self::ratio_wedges(cross, auto_init, bias, growth_rate, division_floor)?;
        Ok(ratio.project(ells, bias, growth_rate))
    }

    /// The propagator per wedge, before any projection
    pub fn ratio_wedges(
        cross: &SpectrumWedges,
        auto_init: &SpectrumWedges,
        bias: f64,
        growth_rate: Option<f64>,
        division_floor: f64,
    ) -> Result<WedgeRatio, Error> {
        validate_scalars(bias, division_floor)?;
        cross.check_same_binning(auto_init)?;
        let f = growth_rate.unwrap_or(0.0);
        let kaiser = |mu: f64| bias + f * mu * mu;
        let floor = scaled_floor(
            division_floor,
            max_abs(
                auto_init
                    .samples()
                    .iter()
                    .filter(|s| s.status.is_valid())
                    .map(|s| kaiser(s.mu_mean) * s.power.re),
            ),
        );
        Ok(wedge_ratio(&[cross, auto_init], |ik, imu| {
            let c = cross.get(ik, imu);
            let a = auto_init.get(ik, imu);
            guarded_div(c.power.re, kaiser(c.mu_mean) * a.power.re, floor)
        }))
    }
}

/// The three spectra of a reconstruction-vs-initial-conditions comparison,
/// on a common `(|k|, μ)` binning.
///
/// The constituents stay accessible so that they can be persisted next to
/// the derived ratios.
#[derive(Clone, Debug, PartialEq)]
pub struct Correlator {
    cross: SpectrumWedges,
    auto_reconstructed: SpectrumWedges,
    auto_initial: SpectrumWedges,
}

impl Correlator {
    pub fn new(
        cross: SpectrumWedges,
        auto_reconstructed: SpectrumWedges,
        auto_initial: SpectrumWedges,
    ) -> Result<Self, Error> {
        cross.check_same_binning(&auto_reconstructed)?;
        cross.check_same_binning(&auto_initial)?;
        Ok(Self {
            cross,
            auto_reconstructed,
            auto_initial,
        })
    }

    /// reconstructed × initial
    pub fn cross(&self) -> &SpectrumWedges {
        &self.cross
    }

    pub fn auto_reconstructed(&self) -> &SpectrumWedges {
        &self.auto_reconstructed
    }

    pub fn auto_initial(&self) -> &SpectrumWedges {
        &self.auto_initial
    }

    /// see [`PropagatorAggregator::ratio_wedges`]
    pub fn ratio_wedges(
        &self,
        bias: f64,
        growth_rate: Option<f64>,
        division_floor: f64,
    ) -> Result<WedgeRatio, Error> {
        PropagatorAggregator::ratio_wedges(
            &self.cross,
            &self.auto_initial,
            bias,
            growth_rate,
            division_floor,
        )
    }

    /// see [`PropagatorAggregator::from_wedges`]
    pub fn propagator(
        &self,
        bias: f64,
        growth_rate: Option<f64>,
        division_floor: f64,
        ells: &[u32],
    ) -> Result<PropagatorResult, Error> {
        PropagatorAggregator::from_wedges(
            &self.cross,
            &self.auto_initial,
            bias,
            growth_rate,
            division_floor,
            ells,
        )
    }

    /// `r(k, μ) = Cross / sqrt(Auto_rec · Auto_init)`
    pub fn correlation(&self, division_floor: f64) -> WedgeRatio {
        let (c, r, i) = (&self.cross, &self.auto_reconstructed, &self.auto_initial);
        let scale = (max_abs(valid_powers(r)) * max_abs(valid_powers(i))).sqrt();
        let floor = scaled_floor(division_floor, scale);
        wedge_ratio(&[c, r, i], |ik, imu| {
            let product = r.get(ik, imu).power.re * i.get(ik, imu).power.re;
            if product < 0.0 {
                return Err(BinStatus::NegativeRadicand);
            }
            guarded_div(c.get(ik, imu).power.re, product.sqrt(), floor)
        })
    }

    /// `T(k, μ) = sqrt(Auto_rec / Auto_init) / (b + f μ̄²)`
    pub fn transfer(
        &self,
        bias: f64,
        growth_rate: Option<f64>,
        division_floor: f64,
    ) -> Result<WedgeRatio, Error> {
        validate_scalars(bias, division_floor)?;
        let f = growth_rate.unwrap_or(0.0);
        let (r, i) = (&self.auto_reconstructed, &self.auto_initial);
        let floor = scaled_floor(division_floor, max_abs(valid_powers(i)));
        Ok(wedge_ratio(&[r, i], |ik, imu| {
            let ratio = guarded_div(r.get(ik, imu).power.re, i.get(ik, imu).power.re, floor)?;
            if ratio < 0.0 {
                return Err(BinStatus::NegativeRadicand);
            }
            let mu = r.get(ik, imu).mu_mean;
            Ok(ratio.sqrt() / (bias + f * mu * mu))
        }))
    }
}
