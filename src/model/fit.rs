//! Least-squares fitting of a [`ModelSpec`] to spectra.
//!
//! Levenberg–Marquardt with a forward-difference Jacobian. Bounds are enforced
//! by projecting every trial step back into the feasible box; fixed parameters
//! are excluded from the Jacobian.

use anyhow::{ensure, Context, Result};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::cube::HyperspectralCube;
use crate::matrix::{unflatten, NavMap};

use super::{ComponentKind, ModelSpec};

/// Configuration for Levenberg–Marquardt fitting.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Maximum LM iterations. Default 200.
    pub max_iterations: u32,
    /// Stop when the relative decrease of the residual sum of squares falls
    /// below this value. Default 1e-10.
    pub tol: f64,
    /// Initial damping factor. Default 1e-3.
    pub initial_lambda: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tol: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

/// Fitted values of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedComponent {
    pub kind: ComponentKind,
    /// `(name, value)` in parameter order.
    pub values: Vec<(&'static str, f64)>,
}

/// Result of fitting a model to one spectrum.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Flattened parameter vector, in specification order.
    pub params: Vec<f64>,
    /// Per-component view of `params`.
    pub components: Vec<FittedComponent>,
    /// Residual sum of squares.
    pub rss: f64,
    /// `rss / (n_points − n_free)`, or `rss` when there are no degrees of freedom.
    pub reduced_chi_squared: f64,
    /// LM iterations performed.
    pub iterations: u32,
    /// Whether the tolerance was met (or no further decrease was possible)
    /// before `max_iterations`.
    pub converged: bool,
}

impl FitResult {
    /// Value of parameter `name` of component `component`.
    pub fn param(&self, component: usize, name: &str) -> Option<f64> {
        self.components
            .get(component)?
            .values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, v)| v)
    }
}

/// Fit `spec` to the samples `(x, y)`.
pub fn fit(spec: &ModelSpec, x: &[f64], y: &[f64], config: &FitConfig) -> Result<FitResult> {
    ensure!(
        x.len() == y.len(),
        "x has {} samples but y has {}",
        x.len(),
        y.len()
    );
    ensure!(!spec.components().is_empty(), "model has no components");
    ensure!(
        x.iter().chain(y).all(|v| v.is_finite()),
        "fit data contains non-finite values"
    );
    for (i, c) in spec.components().iter().enumerate() {
        let expected = c.kind.parameter_names().len();
        ensure!(
            c.params.len() == expected,
            "component {} ({:?}) has {} parameters, expected {}",
            i,
            c.kind,
            c.params.len(),
            expected
        );
    }
    for p in spec.parameters() {
        if let Some((lo, hi)) = p.bounds {
            ensure!(lo <= hi, "parameter {} has inverted bounds [{}, {}]", p.name, lo, hi);
        }
    }

    let bounds: Vec<Option<(f64, f64)>> = spec.parameters().map(|p| p.bounds).collect();
    let free: Vec<usize> = spec
        .parameters()
        .enumerate()
        .filter(|(_, p)| !p.fixed)
        .map(|(i, _)| i)
        .collect();
    ensure!(
        x.len() >= free.len(),
        "{} samples cannot constrain {} free parameters",
        x.len(),
        free.len()
    );

    let mut params = spec.initial_params();
    project(&mut params, &bounds);

    let mut residual = residuals(spec, &params, x, y);
    let mut rss = residual.norm_squared();
    let mut lambda = config.initial_lambda;
    let mut iterations = 0;
    let mut converged = free.is_empty();

    while !converged && iterations < config.max_iterations {
        iterations += 1;
        let jac = jacobian(spec, &params, &bounds, &free, x);
        let jtj = jac.transpose() * &jac;
        // Residuals are y − f, so the descent direction is +Jᵀr.
        let jtr = jac.transpose() * &residual;

        let mut improved = false;
        while lambda < 1e16 {
            let mut damped = jtj.clone();
            for d in 0..free.len() {
                damped[(d, d)] += lambda * jtj[(d, d)].max(1e-12);
            }
            let Some(step) = solve(damped, &jtr) else {
                lambda *= 10.0;
                continue;
            };

            let mut trial = params.clone();
            for (k, &i) in free.iter().enumerate() {
                trial[i] += step[k];
            }
            project(&mut trial, &bounds);
            let trial_residual = residuals(spec, &trial, x, y);
            let trial_rss = trial_residual.norm_squared();

            if trial_rss < rss {
                let decrease = (rss - trial_rss) / rss.max(f64::MIN_POSITIVE);
                params = trial;
                residual = trial_residual;
                rss = trial_rss;
                lambda = (lambda / 10.0).max(1e-12);
                improved = true;
                if decrease < config.tol || rss == 0.0 {
                    converged = true;
                }
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            // No step decreases the cost: a (bounded) local minimum.
            converged = true;
        }
    }

    if !converged {
        debug!(
            "Fit stopped at the iteration cap ({}), rss {:.6e}",
            config.max_iterations, rss
        );
    }

    let dof = x.len().saturating_sub(free.len());
    let reduced_chi_squared = if dof > 0 { rss / dof as f64 } else { rss };

    let mut offset = 0;
    let components = spec
        .components()
        .iter()
        .map(|c| {
            let values = c
                .params
                .iter()
                .enumerate()
                .map(|(k, p)| (p.name, params[offset + k]))
                .collect();
            offset += c.params.len();
            FittedComponent {
                kind: c.kind,
                values,
            }
        })
        .collect();

    Ok(FitResult {
        params,
        components,
        rss,
        reduced_chi_squared,
        iterations,
        converged,
    })
}

// ── Per-pixel fitting ───────────────────────────────────────────────────────

/// Fits of one model to every pixel of a cube.
#[derive(Debug, Clone)]
pub struct CubeFit {
    nav_shape: Vec<usize>,
    /// One result per pixel, in flattening order.
    pub results: Vec<FitResult>,
}

impl CubeFit {
    /// Map of parameter `name` of component `component` over the navigation grid.
    pub fn parameter_map(&self, component: usize, name: &str) -> Result<NavMap> {
        let values = self
            .results
            .iter()
            .map(|r| r.param(component, name))
            .collect::<Option<Vec<f64>>>()
            .with_context(|| format!("component {component} has no parameter {name:?}"))?;
        Ok(unflatten(&values, &self.nav_shape)?)
    }

    /// Map of the residual sum of squares.
    pub fn rss_map(&self) -> Result<NavMap> {
        let values: Vec<f64> = self.results.iter().map(|r| r.rss).collect();
        Ok(unflatten(&values, &self.nav_shape)?)
    }

    /// Number of pixels whose fit stopped at the iteration cap.
    pub fn n_not_converged(&self) -> usize {
        self.results.iter().filter(|r| !r.converged).count()
    }
}

/// Fit `spec` independently to every spectrum of `cube`, each starting from
/// the specification's initial values.
pub fn fit_cube(spec: &ModelSpec, cube: &HyperspectralCube, config: &FitConfig) -> Result<CubeFit> {
    ensure!(cube.nav_size() > 0, "cannot fit an empty cube");
    let x = cube.axis().values();
    let results = cube
        .spectra()
        .enumerate()
        .map(|(pixel, y)| {
            fit(spec, x, y, config).with_context(|| format!("fit failed at pixel {pixel}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let fits = CubeFit {
        nav_shape: cube.nav_shape().to_vec(),
        results,
    };
    let n_bad = fits.n_not_converged();
    if n_bad > 0 {
        warn!(
            "{} of {} pixel fits reached the iteration cap",
            n_bad,
            cube.nav_size()
        );
    }
    Ok(fits)
}

// ── Internal helpers ────────────────────────────────────────────────────────

fn residuals(spec: &ModelSpec, params: &[f64], x: &[f64], y: &[f64]) -> DVector<f64> {
    let model = spec.evaluate(params, x);
    DVector::from_iterator(y.len(), y.iter().zip(&model).map(|(&yi, &mi)| yi - mi))
}

/// Forward-difference Jacobian of the model w.r.t. the free parameters.
fn jacobian(
    spec: &ModelSpec,
    params: &[f64],
    bounds: &[Option<(f64, f64)>],
    free: &[usize],
    x: &[f64],
) -> DMatrix<f64> {
    let base = spec.evaluate(params, x);
    let mut jac = DMatrix::<f64>::zeros(x.len(), free.len());
    for (col, &i) in free.iter().enumerate() {
        let mut h = 1e-7 * params[i].abs().max(1e-3);
        // Step backwards when the forward step would leave the box.
        if let Some((_, hi)) = bounds[i] {
            if params[i] + h > hi {
                h = -h;
            }
        }
        let mut shifted = params.to_vec();
        shifted[i] += h;
        let model = spec.evaluate(&shifted, x);
        for (row, (&m, &b)) in model.iter().zip(&base).enumerate() {
            jac[(row, col)] = (m - b) / h;
        }
    }
    jac
}

fn project(params: &mut [f64], bounds: &[Option<(f64, f64)>]) {
    for (p, b) in params.iter_mut().zip(bounds) {
        if let Some((lo, hi)) = *b {
            *p = p.clamp(lo, hi);
        }
    }
}

fn solve(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let step = match a.clone().cholesky() {
        Some(chol) => chol.solve(b),
        None => a.lu().solve(b)?,
    };
    step.iter().all(|v| v.is_finite()).then_some(step)
}
