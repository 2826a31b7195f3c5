//! Matrix decomposition of an observation matrix into loadings and factors.
//!
//! ```text
//!   ObservationMatrix (pixels × channels)
//!          │  validate: rank, finiteness, non-negativity
//!          ▼
//!   [Poisson scaling]   X_ij / (a_i b_j),  a_i = √Σ_j X_ij,  b_j = √Σ_i X_ij
//!          │
//!          ├── Svd ──▶ U_k Σ_k , V_k
//!          ├── Nmf ──▶ W ≥ 0 , H ≥ 0
//!          └── Ica ──▶ SVD, then FastICA rotation of the factors
//!          │
//!   [undo scaling]      loadings_i *= a_i , factors_j *= b_j
//!          ▼
//!   DecompositionResult { loadings: pixels × k, factors: channels × k }
//! ```
//!
//! All validation happens before any factorization runs. Iterative solvers
//! that stop at their iteration cap still return a usable result, annotated
//! with [`Convergence::NotConverged`].

pub mod ica;
pub mod nmf;
mod svd;

use nalgebra::{DMatrix, DVector};
use tracing::info;

use crate::cube::HyperspectralCube;
use crate::error::{DecompError, Result};
use crate::matrix::{flatten, unflatten, NavMap, ObservationMatrix};
use crate::signal::Capability;
use crate::variance::VarianceRanking;

pub use ica::{Contrast, IcaConfig};
pub use nmf::{NmfConfig, NmfInit, NmfSolver};

/// Factorization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Truncated singular value decomposition.
    Svd,
    /// Non-negative matrix factorization.
    Nmf,
    /// SVD followed by independent component analysis of the factors.
    Ica,
}

impl Algorithm {
    /// Whether the algorithm requires non-negative input.
    pub fn requires_non_negative(self) -> bool {
        matches!(self, Algorithm::Nmf | Algorithm::Ica)
    }
}

/// Outcome of an iterative solver. Not an error: a result that stopped at its
/// iteration cap is still returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convergence {
    /// Closed-form algorithm (SVD); no iteration involved.
    Direct,
    /// Tolerance met after `iterations` iterations.
    Converged { iterations: u32 },
    /// Iteration cap reached before the tolerance was met.
    NotConverged { iterations: u32, last_change: f64 },
}

impl Convergence {
    /// `false` only for [`Convergence::NotConverged`].
    pub fn is_converged(&self) -> bool {
        !matches!(self, Convergence::NotConverged { .. })
    }
}

/// Full set of decomposition options.
#[derive(Debug, Clone)]
pub struct DecompositionConfig {
    /// Factorization algorithm.
    pub algorithm: Algorithm,
    /// Number of components to extract.
    pub rank: usize,
    /// Scale rows and columns by their estimated Poisson noise level before
    /// factorizing. Appropriate for counting data (EELS, CL).
    pub normalize_poisson: bool,
    /// NMF options (used when `algorithm == Nmf`).
    pub nmf: NmfConfig,
    /// ICA options (used when `algorithm == Ica`).
    pub ica: IcaConfig,
}

impl DecompositionConfig {
    /// Options for `algorithm` at `rank`, without Poisson normalization and with
    /// default solver settings.
    pub fn new(algorithm: Algorithm, rank: usize) -> Self {
        Self {
            algorithm,
            rank,
            normalize_poisson: false,
            nmf: NmfConfig::default(),
            ica: IcaConfig::default(),
        }
    }
}

/// Loadings and factors of a rank-`k` decomposition.
#[derive(Debug, Clone)]
pub struct DecompositionResult {
    /// Algorithm that produced the components.
    pub algorithm: Algorithm,
    /// Component loadings, pixels × k. Column `i` reshapes onto the
    /// navigation grid with [`DecompositionResult::loading_map`].
    pub loadings: DMatrix<f64>,
    /// Component factors (spectra), channels × k.
    pub factors: DMatrix<f64>,
    /// Explained-variance ranking of the underlying SVD (SVD and ICA only).
    pub variance: Option<VarianceRanking>,
    /// Solver convergence annotation.
    pub convergence: Convergence,
    /// Whether Poisson normalization was applied (and undone) around the factorization.
    pub poisson_normalized: bool,
    nav_shape: Vec<usize>,
}

impl DecompositionResult {
    /// Number of components.
    pub fn rank(&self) -> usize {
        self.factors.ncols()
    }

    /// Navigation shape of the decomposed data.
    pub fn nav_shape(&self) -> &[usize] {
        &self.nav_shape
    }

    /// Loading vector of component `i` (one value per pixel).
    pub fn loading(&self, i: usize) -> Result<DVector<f64>> {
        self.check_component(i)?;
        Ok(self.loadings.column(i).into_owned())
    }

    /// Factor (spectrum) of component `i`.
    pub fn factor(&self, i: usize) -> Result<DVector<f64>> {
        self.check_component(i)?;
        Ok(self.factors.column(i).into_owned())
    }

    /// Loading of component `i` reshaped onto the navigation grid.
    pub fn loading_map(&self, i: usize) -> Result<NavMap> {
        let loading = self.loading(i)?;
        unflatten(loading.as_slice(), &self.nav_shape)
    }

    /// Explained-variance ratios of the retained components (SVD and ICA only).
    pub fn explained_variance_ratios(&self) -> Option<&[f64]> {
        self.variance.as_ref().map(|v| v.top(self.rank()))
    }

    /// Model `Σ_{i<n} outer(loading_i, factor_i)` from the first `n` components
    /// (all components if `n` exceeds the rank).
    pub fn reconstruct(&self, n: usize) -> DMatrix<f64> {
        let n = n.min(self.rank());
        self.loadings.columns(0, n) * self.factors.columns(0, n).transpose()
    }

    /// Frobenius norm of `X − model(n)`.
    pub fn residual_norm(&self, observed: &ObservationMatrix, n: usize) -> Result<f64> {
        let x = observed.matrix();
        if x.shape() != (self.loadings.nrows(), self.factors.nrows()) {
            return Err(DecompError::shape(format!(
                "observation matrix is {:?}, decomposition covers {}×{}",
                x.shape(),
                self.loadings.nrows(),
                self.factors.nrows()
            )));
        }
        Ok((x - self.reconstruct(n)).norm())
    }

    /// Residual norm of the full model relative to `‖X‖_F`.
    pub fn relative_residual(&self, observed: &ObservationMatrix) -> Result<f64> {
        let residual = self.residual_norm(observed, self.rank())?;
        let norm = observed.matrix().norm();
        Ok(if norm > 0.0 { residual / norm } else { residual })
    }

    /// Reconstruct a cube from the first `n` components, e.g. to denoise the data.
    pub fn model_cube(&self, template: &HyperspectralCube, n: usize) -> Result<HyperspectralCube> {
        let model = ObservationMatrix::new(self.reconstruct(n), self.nav_shape.clone())?;
        model.to_cube(template.axis().clone(), template.kind())
    }

    fn check_component(&self, i: usize) -> Result<()> {
        if i >= self.rank() {
            return Err(DecompError::shape(format!(
                "component {} requested, decomposition has {}",
                i,
                self.rank()
            )));
        }
        Ok(())
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Decompose `matrix` into `rank` components with default solver settings.
pub fn decompose(
    matrix: &ObservationMatrix,
    algorithm: Algorithm,
    rank: usize,
    normalize_poisson: bool,
) -> Result<DecompositionResult> {
    let config = DecompositionConfig {
        normalize_poisson,
        ..DecompositionConfig::new(algorithm, rank)
    };
    decompose_with(matrix, &config)
}

/// Flatten `cube` and decompose it, enabling Poisson normalization when the
/// cube's signal kind records counting statistics.
pub fn decompose_cube(
    cube: &HyperspectralCube,
    algorithm: Algorithm,
    rank: usize,
) -> Result<DecompositionResult> {
    let matrix = flatten(cube)?;
    let normalize_poisson = cube.kind().supports(Capability::PoissonCounts);
    decompose(&matrix, algorithm, rank, normalize_poisson)
}

/// Decompose `matrix` with the full set of options.
pub fn decompose_with(
    matrix: &ObservationMatrix,
    config: &DecompositionConfig,
) -> Result<DecompositionResult> {
    validate(matrix, config)?;

    let rank = config.rank;
    let scaling = config
        .normalize_poisson
        .then(|| PoissonScaling::from_matrix(matrix.matrix()));
    let x = match &scaling {
        Some(s) => s.apply(matrix.matrix()),
        None => matrix.matrix().clone(),
    };

    let (mut loadings, mut factors, variance, convergence) = match config.algorithm {
        Algorithm::Svd => {
            let comps = svd::truncated_svd(&x, rank)?;
            let variance = VarianceRanking::from_singular_values(&comps.singular_values);
            (comps.loadings(), comps.factors(), Some(variance), Convergence::Direct)
        }
        Algorithm::Nmf => {
            let out = nmf::factorize(&x, rank, &config.nmf)?;
            (out.loadings, out.factors, None, out.convergence)
        }
        Algorithm::Ica => {
            let comps = svd::truncated_svd(&x, rank)?;
            let variance = VarianceRanking::from_singular_values(&comps.singular_values);
            let out = ica::unmix(&comps.loadings(), &comps.factors(), &config.ica)?;
            (out.loadings, out.factors, Some(variance), out.convergence)
        }
    };

    if let Some(s) = &scaling {
        s.restore(&mut loadings, &mut factors);
    }

    info!(
        "{:?} decomposition: {}×{} → rank {} ({:?}{})",
        config.algorithm,
        matrix.nrows(),
        matrix.ncols(),
        rank,
        convergence,
        if config.normalize_poisson { ", Poisson-normalized" } else { "" }
    );

    Ok(DecompositionResult {
        algorithm: config.algorithm,
        loadings,
        factors,
        variance,
        convergence,
        poisson_normalized: config.normalize_poisson,
        nav_shape: matrix.nav_shape().to_vec(),
    })
}

/// Rotate the first `rank` components of an existing decomposition into
/// statistically independent ones.
///
/// This is the second half of the usual decompose-then-separate workflow: run
/// an SVD, inspect the scree plot, then unmix the significant components.
pub fn blind_source_separation(
    result: &DecompositionResult,
    rank: usize,
    config: &IcaConfig,
) -> Result<DecompositionResult> {
    let max = result.rank().min(result.factors.nrows().saturating_sub(1));
    if rank == 0 || rank > max {
        return Err(DecompError::Rank {
            requested: rank,
            max,
        });
    }
    let loadings = result.loadings.columns(0, rank).into_owned();
    let factors = result.factors.columns(0, rank).into_owned();
    let out = ica::unmix(&loadings, &factors, config)?;

    info!(
        "Blind source separation of {} components ({:?})",
        rank, out.convergence
    );

    Ok(DecompositionResult {
        algorithm: Algorithm::Ica,
        loadings: out.loadings,
        factors: out.factors,
        variance: result.variance.clone(),
        convergence: out.convergence,
        poisson_normalized: result.poisson_normalized,
        nav_shape: result.nav_shape.clone(),
    })
}

// ── Validation ──────────────────────────────────────────────────────────────

fn validate(matrix: &ObservationMatrix, config: &DecompositionConfig) -> Result<()> {
    let max = match config.algorithm {
        // Whitening needs more channels than components.
        Algorithm::Ica => matrix.max_rank().min(matrix.ncols().saturating_sub(1)),
        Algorithm::Svd | Algorithm::Nmf => matrix.max_rank(),
    };
    if config.rank == 0 || config.rank > max {
        return Err(DecompError::Rank {
            requested: config.rank,
            max,
        });
    }
    let x = matrix.matrix();
    if x.iter().any(|v| !v.is_finite()) {
        return Err(DecompError::domain("observation matrix contains non-finite values"));
    }
    let needs_non_negative = config.algorithm.requires_non_negative() || config.normalize_poisson;
    if needs_non_negative {
        if let Some(min) = x.iter().cloned().reduce(f64::min).filter(|&m| m < 0.0) {
            return Err(DecompError::domain(format!(
                "{:?}{} requires non-negative data, minimum is {:.4e}; shift the cube first",
                config.algorithm,
                if config.normalize_poisson { " with Poisson normalization" } else { "" },
                min
            )));
        }
    }
    Ok(())
}

// ── Poisson noise scaling ───────────────────────────────────────────────────

/// Row and column weights `a_i = √Σ_j X_ij`, `b_j = √Σ_i X_ij`.
///
/// Dividing `X_ij` by `a_i b_j` approximately equalizes the Poisson noise
/// variance across the matrix, which the least-squares criterion of SVD
/// assumes. Zero sums get weight 1.
struct PoissonScaling {
    rows: DVector<f64>,
    cols: DVector<f64>,
}

impl PoissonScaling {
    fn from_matrix(x: &DMatrix<f64>) -> Self {
        let weight = |s: f64| if s > 0.0 { s.sqrt() } else { 1.0 };
        let rows = DVector::from_iterator(x.nrows(), x.row_iter().map(|r| weight(r.sum())));
        let cols = DVector::from_iterator(x.ncols(), x.column_iter().map(|c| weight(c.sum())));
        Self { rows, cols }
    }

    fn apply(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
            x[(i, j)] / (self.rows[i] * self.cols[j])
        })
    }

    fn restore(&self, loadings: &mut DMatrix<f64>, factors: &mut DMatrix<f64>) {
        for (i, mut row) in loadings.row_iter_mut().enumerate() {
            row *= self.rows[i];
        }
        for (j, mut row) in factors.row_iter_mut().enumerate() {
            row *= self.cols[j];
        }
    }
}
