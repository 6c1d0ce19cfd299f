//! Canonical correlation analysis
//!
//! Largest canonical correlation between a multichannel window `X`
//! (samples x channels) and a reference set `Y` (samples x 2·harmonics):
//!
//! ```text
//! Cxx = XᵀX/(n-1) + εI    Cyy = YᵀY/(n-1) + εI    Cxy = XᵀY/(n-1)
//! M   = Cxx⁺ Cxy Cyy⁺ Cxyᵀ
//! ρ   = sqrt(clip(λmax(sym(M)), 0, 1))
//! ```

use nalgebra::DMatrix;

/// Ridge added to the auto-covariance diagonals
pub const COVARIANCE_RIDGE: f64 = 1e-6;

/// Singular value cut-off for the pseudo-inverses
const PINV_EPS: f64 = 1e-12;

/// Subtract each column's mean in place
fn center_columns(m: &mut DMatrix<f64>) {
    for mut column in m.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
}

/// Largest canonical correlation between `x` and `y`.
///
/// Returns 0.0 when the row counts differ, when there are fewer than two
/// rows, or when the decomposition fails or yields a non-finite value.
#[must_use]
pub fn canonical_correlation(x: &DMatrix<f64>, y: &DMatrix<f64>) -> f64 {
    let n = x.nrows();
    if n != y.nrows() || n < 2 || x.ncols() == 0 || y.ncols() == 0 {
        return 0.0;
    }

    let mut xc = x.clone();
    let mut yc = y.clone();
    center_columns(&mut xc);
    center_columns(&mut yc);

    let scale = 1.0 / (n - 1) as f64;
    let cxx = xc.tr_mul(&xc) * scale + DMatrix::identity(xc.ncols(), xc.ncols()) * COVARIANCE_RIDGE;
    let cyy = yc.tr_mul(&yc) * scale + DMatrix::identity(yc.ncols(), yc.ncols()) * COVARIANCE_RIDGE;
    let cxy = xc.tr_mul(&yc) * scale;

    let (Ok(cxx_inv), Ok(cyy_inv)) = (cxx.pseudo_inverse(PINV_EPS), cyy.pseudo_inverse(PINV_EPS)) else {
        return 0.0;
    };

    let m = &cxx_inv * &cxy * &cyy_inv * cxy.transpose();
    let m = (&m + m.transpose()) * 0.5;

    if m.iter().any(|v| !v.is_finite()) {
        return 0.0;
    }

    let rho_sq = m.symmetric_eigenvalues().max().clamp(0.0, 1.0);
    let rho = rho_sq.sqrt();
    if rho.is_finite() {
        rho
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::references::reference_signals;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    #[test]
    fn test_perfect_correlation() {
        let y = reference_signals(10.0, 250.0, 500, 2);
        // Two channels, both mixtures of the reference columns
        let x = DMatrix::from_fn(500, 2, |i, c| {
            if c == 0 {
                y[(i, 0)] + 0.5 * y[(i, 1)]
            } else {
                y[(i, 2)] - y[(i, 3)]
            }
        });

        let rho = canonical_correlation(&x, &y);
        assert!(rho > 0.999, "rho {rho}");
        assert!(rho <= 1.0);
    }

    #[test]
    fn test_phase_shift_invariant() {
        let y = reference_signals(12.0, 250.0, 750, 1);
        let x = DMatrix::from_fn(750, 1, |i, _| (2.0 * PI * 12.0 * i as f64 / 250.0 + 1.1).sin());
        assert!(canonical_correlation(&x, &y) > 0.999);
    }

    #[test]
    fn test_unrelated_signal_scores_low() {
        let mut rng = SmallRng::seed_from_u64(7);
        let y = reference_signals(10.0, 250.0, 750, 2);
        let x = DMatrix::from_fn(750, 3, |_, _| rng.gen_range(-1.0..1.0));
        let rho = canonical_correlation(&x, &y);
        assert!(rho < 0.3, "rho {rho}");
        assert!(rho >= 0.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let y = reference_signals(10.0, 250.0, 100, 2);
        let x = DMatrix::<f64>::zeros(50, 2);
        assert_eq!(canonical_correlation(&x, &y), 0.0);

        let x = DMatrix::<f64>::zeros(1, 2);
        let y1 = reference_signals(10.0, 250.0, 1, 2);
        assert_eq!(canonical_correlation(&x, &y1), 0.0);

        // Constant channel: covariance is only the ridge, correlation is zero
        let x = DMatrix::from_element(100, 1, 3.0);
        assert!(canonical_correlation(&x, &y) < 1e-6);
    }
}
