//! Truncated singular value decomposition.
//!
//! `X ≈ U_k Σ_k V_kᵀ`, returned as loadings `U_k Σ_k` (pixels × k) and
//! factors `V_k` (channels × k). Singular values are sorted descending and
//! every component is sign-normalized so that its factor sums to a
//! non-negative value; flipping a loading and its factor together leaves the
//! reconstruction unchanged.

use nalgebra::DMatrix;
use tracing::debug;

use crate::error::{DecompError, Result};

/// Off-diagonal threshold of the bidiagonal QR iteration. Machine epsilon is
/// too tight for rank-deficient input and yields a wrong factorization.
const SVD_EPS: f64 = 1e-14;
const SVD_MAX_ITERATIONS: usize = 10_000;

/// Top-`k` singular triplets of a matrix plus the full singular spectrum.
#[derive(Debug, Clone)]
pub(crate) struct SvdComponents {
    /// Left singular vectors, pixels × k.
    pub u: DMatrix<f64>,
    /// Right singular vectors, channels × k.
    pub v: DMatrix<f64>,
    /// All singular values, descending (length `min(rows, cols)`).
    pub singular_values: Vec<f64>,
}

impl SvdComponents {
    /// Loadings `U_k Σ_k`.
    pub fn loadings(&self) -> DMatrix<f64> {
        let mut l = self.u.clone();
        for (j, mut col) in l.column_iter_mut().enumerate() {
            col *= self.singular_values[j];
        }
        l
    }

    /// Factors `V_k`.
    pub fn factors(&self) -> DMatrix<f64> {
        self.v.clone()
    }
}

/// Economy-size SVD of `x`, truncated to the leading `rank` components.
///
/// `rank` must already be validated against `min(rows, cols)`.
pub(crate) fn truncated_svd(x: &DMatrix<f64>, rank: usize) -> Result<SvdComponents> {
    let (m, n) = x.shape();
    debug!("SVD of {}×{} matrix, keeping {} components", m, n, rank);

    let svd = x
        .clone()
        .try_svd(true, true, SVD_EPS, SVD_MAX_ITERATIONS)
        .ok_or_else(|| {
            DecompError::numerical(format!(
                "SVD did not converge within {SVD_MAX_ITERATIONS} iterations"
            ))
        })?;
    let u_full = svd
        .u
        .ok_or_else(|| DecompError::numerical("SVD returned no left singular vectors"))?;
    let v_t_full = svd
        .v_t
        .ok_or_else(|| DecompError::numerical("SVD returned no right singular vectors"))?;

    // Sort descending; nalgebra does not guarantee an order for every backend.
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
    let singular_values: Vec<f64> = order.iter().map(|&i| svd.singular_values[i]).collect();

    if singular_values.iter().any(|s| !s.is_finite()) {
        return Err(DecompError::numerical("SVD produced non-finite singular values"));
    }

    let mut u = DMatrix::<f64>::zeros(m, rank);
    let mut v = DMatrix::<f64>::zeros(n, rank);
    for (j, &src) in order.iter().take(rank).enumerate() {
        u.set_column(j, &u_full.column(src));
        v.set_column(j, &v_t_full.row(src).transpose());
    }
    flip_signs(&mut u, &mut v);

    Ok(SvdComponents {
        u,
        v,
        singular_values,
    })
}

/// Flip each component so that its factor column sums to a non-negative value.
pub(crate) fn flip_signs(loadings: &mut DMatrix<f64>, factors: &mut DMatrix<f64>) {
    for j in 0..factors.ncols() {
        if factors.column(j).sum() < 0.0 {
            factors.column_mut(j).neg_mut();
            loadings.column_mut(j).neg_mut();
        }
    }
}
