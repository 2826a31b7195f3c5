//! Non-negative matrix factorization.
//!
//! Minimizes `‖X − W H‖_F` subject to `W ≥ 0`, `H ≥ 0`, where `W` holds the
//! loadings (pixels × k) and `H` the factors (k × channels). Two solvers are
//! available:
//!
//! - [`NmfSolver::Hals`]: hierarchical alternating least squares (one
//!   column/row at a time, projected onto the non-negative orthant). Fast
//!   linear convergence on well-separated sources; the default.
//! - [`NmfSolver::MultiplicativeUpdate`]: the Lee–Seung multiplicative rules.
//!
//! The result is a local optimum that depends on the initialization. Iteration
//! stops when the error improvement relative to the initial error drops below
//! `tol`; hitting `max_iterations` first is reported as
//! [`Convergence::NotConverged`], never as an error.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tracing::{debug, warn};

use super::svd::truncated_svd;
use super::Convergence;
use crate::error::Result;

const DENOM_EPS: f64 = 1e-15;

/// Update rule used by the NMF solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmfSolver {
    #[default]
    Hals,
    MultiplicativeUpdate,
}

/// Starting point for the NMF iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmfInit {
    /// Non-negative double SVD with zeros replaced by the data mean.
    /// Deterministic.
    #[default]
    Nndsvda,
    /// Uniform random entries scaled to the data mean, from a seeded RNG.
    Random { seed: u64 },
}

/// Configuration for NMF.
#[derive(Debug, Clone)]
pub struct NmfConfig {
    /// Maximum number of update sweeps. Default 1000.
    pub max_iterations: u32,
    /// Stop when `(previous_error − error) / initial_error < tol`. Default 1e-6.
    pub tol: f64,
    /// Evaluate the reconstruction error every this many sweeps. Default 10.
    pub check_every: u32,
    /// Update rule. Default [`NmfSolver::Hals`].
    pub solver: NmfSolver,
    /// Initialization. Default [`NmfInit::Nndsvda`].
    pub init: NmfInit,
}

impl Default for NmfConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tol: 1e-6,
            check_every: 10,
            solver: NmfSolver::default(),
            init: NmfInit::default(),
        }
    }
}

/// Output of [`factorize`]: loadings (pixels × k), factors (channels × k).
pub(crate) struct NmfOutput {
    pub loadings: DMatrix<f64>,
    pub factors: DMatrix<f64>,
    pub convergence: Convergence,
    pub error: f64,
}

/// Factorize a non-negative matrix. Inputs must already be validated
/// (non-negative, finite, `rank ≤ min(rows, cols)`).
pub(crate) fn factorize(x: &DMatrix<f64>, rank: usize, config: &NmfConfig) -> Result<NmfOutput> {
    let (mut w, mut h) = match config.init {
        NmfInit::Nndsvda => init_nndsvda(x, rank)?,
        NmfInit::Random { seed } => init_random(x, rank, seed),
    };

    let check_every = config.check_every.max(1);
    let initial_error = frobenius_error(x, &w, &h);
    let mut previous_error = initial_error;
    let mut last_change = f64::INFINITY;
    let mut convergence = None;

    debug!(
        "NMF {:?}: {}×{} matrix, rank {}, initial error {:.6e}",
        config.solver,
        x.nrows(),
        x.ncols(),
        rank,
        initial_error
    );

    for iter in 1..=config.max_iterations {
        match config.solver {
            NmfSolver::Hals => hals_step(x, &mut w, &mut h),
            NmfSolver::MultiplicativeUpdate => mu_step(x, &mut w, &mut h),
        }

        if iter % check_every == 0 {
            let error = frobenius_error(x, &w, &h);
            last_change = if initial_error > 0.0 {
                (previous_error - error) / initial_error
            } else {
                0.0
            };
            debug!("  iter {}: error {:.6e}, change {:.3e}", iter, error, last_change);
            previous_error = error;
            if last_change < config.tol {
                convergence = Some(Convergence::Converged { iterations: iter });
                break;
            }
        }
    }

    let convergence = convergence.unwrap_or_else(|| {
        warn!(
            "NMF did not converge within {} iterations (last relative change {:.3e}, tol {:.1e})",
            config.max_iterations, last_change, config.tol
        );
        Convergence::NotConverged {
            iterations: config.max_iterations,
            last_change,
        }
    });

    normalize_factors(&mut w, &mut h);
    let error = frobenius_error(x, &w, &h);

    Ok(NmfOutput {
        loadings: w,
        factors: h.transpose(),
        convergence,
        error,
    })
}

// ── Update rules ────────────────────────────────────────────────────────────

/// One HALS sweep over all components of `H`, then all components of `W`.
fn hals_step(x: &DMatrix<f64>, w: &mut DMatrix<f64>, h: &mut DMatrix<f64>) {
    let k = w.ncols();

    // H rows
    let wtw = w.transpose() * &*w;
    let wtx = w.transpose() * x;
    for j in 0..k {
        let denom = wtw[(j, j)];
        if denom <= DENOM_EPS {
            continue;
        }
        let grad = wtx.row(j) - wtw.row(j) * &*h;
        let mut row = h.row(j) + grad / denom;
        row.apply(|v| *v = v.max(0.0));
        h.set_row(j, &row);
    }

    // W columns
    let hht = &*h * h.transpose();
    let xht = x * h.transpose();
    for j in 0..k {
        let denom = hht[(j, j)];
        if denom <= DENOM_EPS {
            continue;
        }
        let grad = xht.column(j) - &*w * hht.column(j);
        let mut col = w.column(j) + grad / denom;
        col.apply(|v| *v = v.max(0.0));
        w.set_column(j, &col);
    }
}

/// One Lee–Seung multiplicative update of `H` then `W`.
fn mu_step(x: &DMatrix<f64>, w: &mut DMatrix<f64>, h: &mut DMatrix<f64>) {
    let numer_h = w.transpose() * x;
    let denom_h = w.transpose() * &*w * &*h;
    h.zip_zip_apply(&numer_h, &denom_h, |v, n, d| *v *= n / (d + DENOM_EPS));

    let numer_w = x * h.transpose();
    let denom_w = &*w * (&*h * h.transpose());
    w.zip_zip_apply(&numer_w, &denom_w, |v, n, d| *v *= n / (d + DENOM_EPS));
}

fn frobenius_error(x: &DMatrix<f64>, w: &DMatrix<f64>, h: &DMatrix<f64>) -> f64 {
    (x - w * h).norm()
}

/// Scale every factor row of `H` to unit maximum and move the scale into `W`.
fn normalize_factors(w: &mut DMatrix<f64>, h: &mut DMatrix<f64>) {
    for j in 0..h.nrows() {
        let max = h.row(j).max();
        if max > 0.0 {
            h.row_mut(j).unscale_mut(max);
            w.column_mut(j).scale_mut(max);
        }
    }
}

// ── Initialization ──────────────────────────────────────────────────────────

/// NNDSVDa initialization (Boutsidis & Gallopoulos, 2008), with zero entries
/// filled by the data mean so multiplicative updates can move them.
fn init_nndsvda(x: &DMatrix<f64>, rank: usize) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let (m, n) = x.shape();
    let svd = truncated_svd(x, rank)?;
    let mut w = DMatrix::<f64>::zeros(m, rank);
    let mut h = DMatrix::<f64>::zeros(rank, n);

    for j in 0..rank {
        let s = svd.singular_values[j];
        let u = svd.u.column(j);
        let v = svd.v.column(j);
        if j == 0 {
            // Leading singular vectors of a non-negative matrix are single-signed.
            let scale = s.sqrt();
            w.set_column(0, &(u.abs() * scale));
            h.set_row(0, &(v.abs() * scale).transpose());
            continue;
        }

        let up = u.map(|e| e.max(0.0));
        let un = u.map(|e| (-e).max(0.0));
        let vp = v.map(|e| e.max(0.0));
        let vn = v.map(|e| (-e).max(0.0));
        let (upn, unn, vpn, vnn) = (up.norm(), un.norm(), vp.norm(), vn.norm());
        let mp = upn * vpn;
        let mn = unn * vnn;

        let (uu, vv, sigma, un_norm, vn_norm) = if mp > mn {
            (up, vp, mp, upn, vpn)
        } else {
            (un, vn, mn, unn, vnn)
        };
        if un_norm <= 0.0 || vn_norm <= 0.0 {
            continue;
        }
        let lambda = (s * sigma).sqrt();
        w.set_column(j, &(uu * (lambda / un_norm)));
        h.set_row(j, &(vv * (lambda / vn_norm)).transpose());
    }

    let mean = x.mean();
    w.apply(|v| {
        if *v < DENOM_EPS {
            *v = mean;
        }
    });
    h.apply(|v| {
        if *v < DENOM_EPS {
            *v = mean;
        }
    });
    Ok((w, h))
}

/// Random non-negative initialization with entries of order `sqrt(mean / k)`.
fn init_random(x: &DMatrix<f64>, rank: usize, seed: u64) -> (DMatrix<f64>, DMatrix<f64>) {
    let (m, n) = x.shape();
    let scale = (x.mean() / rank as f64).sqrt();
    let mut rng = StdRng::seed_from_u64(seed);
    let w = DMatrix::from_fn(m, rank, |_, _| scale * rng.random::<f64>());
    let h = DMatrix::from_fn(rank, n, |_, _| scale * rng.random::<f64>());
    (w, h)
}
