//! Legendre polynomials, used to project μ-dependent power onto multipoles.

/// Evaluate the Legendre polynomial `L_ell(mu)` with Bonnet's recursion:
/// `(n+1) L_{n+1} = (2n+1) mu L_n - n L_{n-1}`
pub fn legendre(ell: u32, mu: f64) -> f64 {
    if ell == 0 {
        return 1.0;
    }
    let mut prev = 1.0;
    let mut cur = mu;
    for n in 1..ell {
        let n = n as f64;
        let next = ((2.0 * n + 1.0) * mu * cur - n * prev) / (n + 1.0);
        prev = cur;
        cur = next;
    }
    cur
}

/// Computes `∫_lo^hi L_ell(mu) dmu`.
///
/// For `ell > 0` we rely on `(2ell+1) L_ell = d/dmu (L_{ell+1} - L_{ell-1})`
pub fn legendre_integral(ell: u32, lo: f64, hi: f64) -> f64 {
    if ell == 0 {
        return hi - lo;
    }
    let antiderivative =
        |x: f64| (legendre(ell + 1, x) - legendre(ell - 1, x)) / (2.0 * ell as f64 + 1.0);
    antiderivative(hi) - antiderivative(lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        let diff = a - b;
        (if diff < 0.0 { -diff } else { diff }) < 1e-13
    }

    #[test]
    fn closed_forms() {
        for &mu in &[-1.0, -0.7, -0.2, 0.0, 0.3, 0.55, 1.0] {
            let mu2 = mu * mu;
            assert!(close(legendre(0, mu), 1.0));
            assert!(close(legendre(1, mu), mu));
            assert!(close(legendre(2, mu), 0.5 * (3.0 * mu2 - 1.0)));
            assert!(close(
                legendre(4, mu),
                (35.0 * mu2 * mu2 - 30.0 * mu2 + 3.0) / 8.0
            ));
        }
    }

    #[test]
    fn integrals() {
        // the even multipoles integrate to zero over [0, 1] (for ell > 0)
        assert!(close(legendre_integral(0, 0.0, 1.0), 1.0));
        assert!(close(legendre_integral(2, 0.0, 1.0), 0.0));
        assert!(close(legendre_integral(4, 0.0, 1.0), 0.0));
        // ∫_0^0.5 (3mu^2-1)/2 = (0.125 - 0.5)/2
        assert!(close(legendre_integral(2, 0.0, 0.5), -0.1875));
        // orthogonality over [-1, 1] of L_2 against a constant
        assert!(close(legendre_integral(2, -1.0, 1.0), 0.0));
    }
}
