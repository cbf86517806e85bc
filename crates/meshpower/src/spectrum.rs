//! Typed results of the binning step.

use ndarray::Array2;
use num_complex::Complex64;

use meshpower_nostd_internal::legendre_integral;

use crate::error::Error;
use crate::export::Records;

/// Reliability flag carried by every binned value.
///
/// These are per-bin numerical edge cases, which are reported alongside the
/// data rather than raised as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BinStatus {
    #[default]
    Valid,
    /// no Fourier mode fell into the bin (the value is reported as 0)
    EmptyBin,
    /// the denominator of a ratio was below the division floor (the value
    /// is reported as 0)
    DivisionByNearZero,
    /// a quantity that had to be taken the square root of was negative (the
    /// value is reported as 0)
    NegativeRadicand,
}

impl BinStatus {
    /// integer code used in exported artifacts
    pub fn code(self) -> u8 {
        match self {
            BinStatus::Valid => 0,
            BinStatus::EmptyBin => 1,
            BinStatus::DivisionByNearZero => 2,
            BinStatus::NegativeRadicand => 3,
        }
    }

    pub fn is_valid(self) -> bool {
        self == BinStatus::Valid
    }
}

/// The content of a single `(|k|, μ)` bin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectrumSample {
    pub k_index: usize,
    pub mu_index: usize,
    /// mean power of the modes in the bin (after shot-noise subtraction)
    pub power: Complex64,
    pub n_modes: f64,
    pub k_mean: f64,
    pub mu_mean: f64,
    pub status: BinStatus,
}

/// Power binned in `(|k|, μ)` wedges.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumWedges {
    k_edges: Vec<f64>,
    mu_edges: Vec<f64>,
    // row-major (k, mu)
    samples: Vec<SpectrumSample>,
    shot_noise: f64,
}

impl SpectrumWedges {
    pub(crate) fn new(
        k_edges: Vec<f64>,
        mu_edges: Vec<f64>,
        samples: Vec<SpectrumSample>,
        shot_noise: f64,
    ) -> Result<Self, Error> {
        if samples.len() != (k_edges.len() - 1) * (mu_edges.len() - 1) {
            return Err(Error::internal("wedge samples don't match the bin edges"));
        }
        Ok(Self {
            k_edges,
            mu_edges,
            samples,
            shot_noise,
        })
    }

    pub fn k_edges(&self) -> &[f64] {
        &self.k_edges
    }

    pub fn mu_edges(&self) -> &[f64] {
        &self.mu_edges
    }

    pub fn n_k(&self) -> usize {
        self.k_edges.len() - 1
    }

    pub fn n_mu(&self) -> usize {
        self.mu_edges.len() - 1
    }

    pub fn shot_noise(&self) -> f64 {
        self.shot_noise
    }

    pub fn samples(&self) -> &[SpectrumSample] {
        &self.samples
    }

    pub fn get(&self, k_index: usize, mu_index: usize) -> &SpectrumSample {
        &self.samples[k_index * self.n_mu() + mu_index]
    }

    /// Fails unless `other` uses identical bin edges
    pub fn check_same_binning(&self, other: &SpectrumWedges) -> Result<(), Error> {
        if self.k_edges != other.k_edges || self.mu_edges != other.mu_edges {
            Err(Error::binning_mismatch(format!(
                "wedges with {}x{} bins vs {}x{} bins (or different edges)",
                self.n_k(),
                self.n_mu(),
                other.n_k(),
                other.n_mu()
            )))
        } else {
            Ok(())
        }
    }

    /// Projects the wedges onto Legendre multipoles:
    ///
    /// `P_ℓ(k) = (2ℓ+1) / Σ_j Δμ_j · Σ_j P_j ∫_{μ-bin j} L_ℓ(μ) dμ`
    ///
    /// where the sums only run over the valid wedges of each k-bin. A k-bin
    /// without any valid wedge reports `EmptyBin`.
    pub fn to_poles(&self, ells: &[u32]) -> MultipoleSpectrum {
        let n_k = self.n_k();
        let mut values = Array2::<Complex64>::zeros((ells.len(), n_k));
        let mut k_mean = vec![0.0; n_k];
        let mut n_modes = vec![0.0; n_k];
        let mut status = vec![BinStatus::EmptyBin; n_k];
        for ik in 0..n_k {
            let mut width = 0.0;
            let mut k_sum = 0.0;
            for imu in 0..self.n_mu() {
                let sample = self.get(ik, imu);
                if !sample.status.is_valid() {
                    continue;
                }
                let (lo, hi) = (self.mu_edges[imu], self.mu_edges[imu + 1]);
                width += hi - lo;
                k_sum += sample.n_modes * sample.k_mean;
                n_modes[ik] += sample.n_modes;
                for (il, &ell) in ells.iter().enumerate() {
                    values[[il, ik]] += sample.power * legendre_integral(ell, lo, hi);
                }
            }
            if width > 0.0 {
                status[ik] = BinStatus::Valid;
                k_mean[ik] = k_sum / n_modes[ik];
                for (il, &ell) in ells.iter().enumerate() {
                    values[[il, ik]] *= (2 * ell + 1) as f64 / width;
                }
            }
        }
        MultipoleSpectrum {
            k_edges: self.k_edges.clone(),
            ells: ells.to_vec(),
            k_mean,
            n_modes,
            values,
            status,
            shot_noise: self.shot_noise,
        }
    }

    /// one row per wedge: `k_mean, mu_mean, k_index, mu_index, power_re,
    /// power_im, n_modes, status`
    pub fn to_records(&self) -> Result<Records, Error> {
        let rows = self
            .samples
            .iter()
            .map(|s| {
                vec![
                    s.k_mean,
                    s.mu_mean,
                    s.k_index as f64,
                    s.mu_index as f64,
                    s.power.re,
                    s.power.im,
                    s.n_modes,
                    s.status.code() as f64,
                ]
            })
            .collect();
        Records::from_rows(
            &[
                "k_mean", "mu_mean", "k_index", "mu_index", "power_re", "power_im", "n_modes",
                "status",
            ],
            rows,
        )
    }
}

/// Power projected onto Legendre multipoles, per |k| bin.
#[derive(Clone, Debug, PartialEq)]
pub struct MultipoleSpectrum {
    pub(crate) k_edges: Vec<f64>,
    pub(crate) ells: Vec<u32>,
    pub(crate) k_mean: Vec<f64>,
    pub(crate) n_modes: Vec<f64>,
    // shape (n_ells, n_k)
    pub(crate) values: Array2<Complex64>,
    pub(crate) status: Vec<BinStatus>,
    pub(crate) shot_noise: f64,
}

impl MultipoleSpectrum {
    pub fn k_edges(&self) -> &[f64] {
        &self.k_edges
    }

    pub fn ells(&self) -> &[u32] {
        &self.ells
    }

    pub fn n_k(&self) -> usize {
        self.k_edges.len() - 1
    }

    /// the mode-weighted mean |k| of each bin (0 for empty bins)
    pub fn k_mean(&self) -> &[f64] {
        &self.k_mean
    }

    pub fn n_modes(&self) -> &[f64] {
        &self.n_modes
    }

    pub fn status(&self) -> &[BinStatus] {
        &self.status
    }

    pub fn shot_noise(&self) -> f64 {
        self.shot_noise
    }

    /// complex multipoles with shape `(n_ells, n_k)`
    pub fn values(&self) -> &Array2<Complex64> {
        &self.values
    }

    /// the real part of multipole `ell` (if it was computed)
    pub fn pole(&self, ell: u32) -> Option<Vec<f64>> {
        let il = self.ells.iter().position(|&e| e == ell)?;
        Some(self.values.row(il).iter().map(|v| v.re).collect())
    }

    /// Fails unless `other` uses identical k edges and multipoles
    pub fn check_same_binning(&self, other: &MultipoleSpectrum) -> Result<(), Error> {
        if self.k_edges != other.k_edges {
            Err(Error::binning_mismatch("multipole spectra have different k edges"))
        } else if self.ells != other.ells {
            Err(Error::binning_mismatch(format!(
                "multipoles {:?} vs {:?}",
                self.ells, other.ells
            )))
        } else {
            Ok(())
        }
    }

    /// one row per (k, ℓ): `k_mean, ell, power_re, power_im, n_modes, status`
    pub fn to_records(&self) -> Result<Records, Error> {
        let mut rows = Vec::with_capacity(self.n_k() * self.ells.len());
        for ik in 0..self.n_k() {
            for (il, &ell) in self.ells.iter().enumerate() {
                let v = self.values[[il, ik]];
                rows.push(vec![
                    self.k_mean[ik],
                    ell as f64,
                    v.re,
                    v.im,
                    self.n_modes[ik],
                    self.status[ik].code() as f64,
                ]);
            }
        }
        Records::from_rows(
            &["k_mean", "ell", "power_re", "power_im", "n_modes", "status"],
            rows,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wedges(powers: &[f64]) -> SpectrumWedges {
        let mu_edges = vec![0.0, 0.25, 0.5, 0.75, 1.0];
        // NaN marks an empty wedge
        let samples = powers
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let empty = p.is_nan();
                SpectrumSample {
                    k_index: 0,
                    mu_index: i,
                    power: Complex64::new(if empty { 0.0 } else { p }, 0.0),
                    n_modes: if empty { 0.0 } else { 10.0 },
                    k_mean: 0.15,
                    mu_mean: 0.125 + 0.25 * i as f64,
                    status: if empty {
                        BinStatus::EmptyBin
                    } else {
                        BinStatus::Valid
                    },
                }
            })
            .collect();
        SpectrumWedges::new(vec![0.1, 0.2], mu_edges, samples, 0.0).unwrap()
    }

    #[test]
    fn constant_wedges_project_onto_the_monopole() {
        let poles = wedges(&[3.0, 3.0, 3.0, 3.0]).to_poles(&[0, 2, 4]);
        let p0 = poles.pole(0).unwrap();
        let p2 = poles.pole(2).unwrap();
        let p4 = poles.pole(4).unwrap();
        assert!((p0[0] - 3.0).abs() < 1e-14);
        assert!(p2[0].abs() < 1e-14);
        assert!(p4[0].abs() < 1e-14);
        assert_eq!(poles.n_modes(), &[40.0]);
        assert!((poles.k_mean()[0] - 0.15).abs() < 1e-15);
        assert!(poles.pole(1).is_none());
    }

    #[test]
    fn empty_wedges_are_skipped() {
        let poles = wedges(&[2.0, f64::NAN, 2.0, 2.0]).to_poles(&[0]);
        assert!((poles.pole(0).unwrap()[0] - 2.0).abs() < 1e-14);
        assert_eq!(poles.status(), &[BinStatus::Valid]);

        let poles = wedges(&[f64::NAN; 4]).to_poles(&[0, 2]);
        assert_eq!(poles.status(), &[BinStatus::EmptyBin]);
        assert_eq!(poles.pole(0), Some(vec![0.0]));
    }

    #[test]
    fn records_layout() {
        let w = wedges(&[1.0, 2.0, 3.0, f64::NAN]);
        let records = w.to_records().unwrap();
        assert_eq!(records.values().dim(), (4, 8));
        assert_eq!(records.values()[[3, 7]], 1.0);
        assert_eq!(records.values()[[2, 4]], 3.0);
        let records = w.to_poles(&[0, 2]).to_records().unwrap();
        assert_eq!(records.columns()[1], "ell");
        assert_eq!(records.values().dim(), (2, 6));
    }

    #[test]
    fn binning_checks() {
        let a = wedges(&[1.0; 4]);
        let mut b = a.clone();
        assert!(a.check_same_binning(&b).is_ok());
        b.mu_edges = vec![0.0, 0.5, 1.0];
        assert!(a.check_same_binning(&b).is_err());
    }
}
