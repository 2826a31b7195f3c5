//! Independent component analysis of decomposition factors (FastICA).
//!
//! Starting from a set of components `X ≈ L Fᵀ` (typically the leading SVD
//! components), the factors are treated as `k` mixed signals sampled over the
//! channels. They are centered and whitened, then rotated by the symmetric
//! FastICA fixed-point iteration until the rotated signals are maximally
//! non-Gaussian. With the total unmixing matrix `U = W K`:
//!
//! ```text
//! factors'  = F Uᵀ
//! loadings' = L U⁻¹        ⇒  loadings' factors'ᵀ = L Fᵀ
//! ```
//!
//! so the reconstruction of the data is unchanged. Components are returned in
//! descending order of energy `‖loading‖·‖factor‖` and sign-normalized like the
//! SVD, which fixes the sign/permutation ambiguity of ICA for a given seed.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tracing::{debug, warn};

use super::svd::flip_signs;
use super::Convergence;
use crate::error::{DecompError, Result};

/// Non-quadratic contrast function used to measure non-Gaussianity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Contrast {
    /// `G(u) = log cosh(u)`; robust general-purpose choice.
    #[default]
    LogCosh,
    /// `G(u) = −exp(−u²/2)`; suited to highly super-Gaussian sources.
    Exp,
    /// `G(u) = u⁴/4`; kurtosis-based.
    Cube,
}

impl Contrast {
    /// First and second derivative `(g(u), g'(u))` of the contrast.
    fn derivatives(self, u: f64) -> (f64, f64) {
        match self {
            Contrast::LogCosh => {
                let t = u.tanh();
                (t, 1.0 - t * t)
            }
            Contrast::Exp => {
                let e = (-0.5 * u * u).exp();
                (u * e, (1.0 - u * u) * e)
            }
            Contrast::Cube => (u * u * u, 3.0 * u * u),
        }
    }
}

/// Configuration for FastICA.
#[derive(Debug, Clone)]
pub struct IcaConfig {
    /// Maximum fixed-point iterations. Default 500.
    pub max_iterations: u32,
    /// Convergence threshold on `max |(|diag(W₁ Wᵀ)| − 1)|`. Default 1e-6.
    pub tol: f64,
    /// Contrast function. Default [`Contrast::LogCosh`].
    pub contrast: Contrast,
    /// Seed for the initial rotation. Default 0.
    pub seed: u64,
}

impl Default for IcaConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tol: 1e-6,
            contrast: Contrast::default(),
            seed: 0,
        }
    }
}

pub(crate) struct IcaOutput {
    pub loadings: DMatrix<f64>,
    pub factors: DMatrix<f64>,
    pub convergence: Convergence,
}

/// Unmix `k` components given as loadings (pixels × k) and factors (channels × k).
pub(crate) fn unmix(
    loadings: &DMatrix<f64>,
    factors: &DMatrix<f64>,
    config: &IcaConfig,
) -> Result<IcaOutput> {
    let k = factors.ncols();
    let n = factors.nrows();
    if k == 0 || loadings.ncols() != k {
        return Err(DecompError::shape(format!(
            "ICA needs matching component counts, got {} loadings and {} factors",
            loadings.ncols(),
            k
        )));
    }
    if n <= k {
        return Err(DecompError::shape(format!(
            "ICA needs more channels ({n}) than components ({k})"
        )));
    }

    // ── Centering and whitening ─────────────────────────────────────────
    let mut xc = factors.transpose(); // k × n
    for mut row in xc.row_iter_mut() {
        let mean = row.mean();
        row.add_scalar_mut(-mean);
    }
    let cov = &xc * xc.transpose() / n as f64;
    let eig = SymmetricEigen::new(cov);
    let max_eig = eig.eigenvalues.max();
    if max_eig <= 0.0 || eig.eigenvalues.iter().any(|&d| d <= 1e-12 * max_eig) {
        return Err(DecompError::numerical(
            "factors are linearly dependent; reduce the number of ICA components",
        ));
    }
    let d_inv_sqrt = DMatrix::from_diagonal(&eig.eigenvalues.map(|d| 1.0 / d.sqrt()));
    let whitening = d_inv_sqrt * eig.eigenvectors.transpose(); // k × k
    let z = &whitening * &xc; // k × n

    // ── Symmetric FastICA ───────────────────────────────────────────────
    let mut rng = StdRng::seed_from_u64(config.seed);
    let w0 = DMatrix::from_fn(k, k, |_, _| rng.random::<f64>() * 2.0 - 1.0);
    let mut w = symmetric_decorrelation(&w0)?;
    let mut convergence = None;
    let mut lim = f64::INFINITY;

    for iter in 1..=config.max_iterations {
        let wz = &w * &z;
        let mut g = DMatrix::<f64>::zeros(k, n);
        let mut g_prime_mean = DVector::<f64>::zeros(k);
        for i in 0..k {
            let mut acc = 0.0;
            for t in 0..n {
                let (gi, gpi) = config.contrast.derivatives(wz[(i, t)]);
                g[(i, t)] = gi;
                acc += gpi;
            }
            g_prime_mean[i] = acc / n as f64;
        }

        let w_new = &g * z.transpose() / n as f64 - DMatrix::from_diagonal(&g_prime_mean) * &w;
        let w_new = symmetric_decorrelation(&w_new)?;

        lim = (&w_new * w.transpose())
            .diagonal()
            .iter()
            .map(|d| (d.abs() - 1.0).abs())
            .fold(0.0, f64::max);
        w = w_new;

        if lim < config.tol {
            debug!("FastICA converged after {} iterations (lim {:.3e})", iter, lim);
            convergence = Some(Convergence::Converged { iterations: iter });
            break;
        }
    }

    let convergence = convergence.unwrap_or_else(|| {
        warn!(
            "FastICA did not converge within {} iterations (lim {:.3e}, tol {:.1e})",
            config.max_iterations, lim, config.tol
        );
        Convergence::NotConverged {
            iterations: config.max_iterations,
            last_change: lim,
        }
    });

    // ── Apply the total unmixing to the uncentered components ───────────
    let unmixing = &w * &whitening;
    let unmixing_inv = unmixing
        .clone()
        .try_inverse()
        .ok_or_else(|| DecompError::numerical("ICA unmixing matrix is singular"))?;

    let mut new_factors = factors * unmixing.transpose();
    let mut new_loadings = loadings * unmixing_inv;
    flip_signs(&mut new_loadings, &mut new_factors);
    let (new_loadings, new_factors) = sort_by_energy(new_loadings, new_factors);

    Ok(IcaOutput {
        loadings: new_loadings,
        factors: new_factors,
        convergence,
    })
}

/// `W ← (W Wᵀ)^{-1/2} W`.
fn symmetric_decorrelation(w: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let eig = SymmetricEigen::new(w * w.transpose());
    if eig.eigenvalues.iter().any(|&d| d <= 0.0 || !d.is_finite()) {
        return Err(DecompError::numerical("degenerate ICA rotation"));
    }
    let d_inv_sqrt = DMatrix::from_diagonal(&eig.eigenvalues.map(|d| 1.0 / d.sqrt()));
    Ok(&eig.eigenvectors * d_inv_sqrt * eig.eigenvectors.transpose() * w)
}

/// Reorder components by descending `‖loading‖·‖factor‖`.
fn sort_by_energy(loadings: DMatrix<f64>, factors: DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let k = factors.ncols();
    let energy: Vec<f64> = (0..k)
        .map(|j| loadings.column(j).norm() * factors.column(j).norm())
        .collect();
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| energy[b].total_cmp(&energy[a]));

    let sorted_l = DMatrix::from_fn(loadings.nrows(), k, |i, j| loadings[(i, order[j])]);
    let sorted_f = DMatrix::from_fn(factors.nrows(), k, |i, j| factors[(i, order[j])]);
    (sorted_l, sorted_f)
}
