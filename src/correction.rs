//! Correction steps applied to a cube before decomposition.
//!
//! Every step consumes a `&HyperspectralCube` and returns a new cube, so the
//! sequence of corrections applied to a dataset is explicit at the call site:
//!
//! ```text
//! raw ─▶ crop_signal ─▶ remove_background ─▶ rebin ─▶ shift_to_non_negative ─▶ flatten
//! ```
//!
//! Background models are fitted independently for every pixel over a
//! coordinate window and subtracted over the whole signal axis.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::cube::{unravel_index, HyperspectralCube};
use crate::error::{DecompError, Result};
use crate::signal::{Capability, SignalAxis, HC_EV_NM};

/// Background model for [`HyperspectralCube::remove_background`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackgroundModel {
    /// `A · x^-r`, fitted as a line in log-log space. The conventional
    /// pre-edge model for EELS core-loss edges.
    PowerLaw,
    /// Constant level equal to the window mean.
    Offset,
    /// Polynomial of the given order, fitted by least squares.
    Polynomial { order: u32 },
}

impl HyperspectralCube {
    /// Keep only channels whose coordinate lies in `[start, end]` (inclusive).
    pub fn crop_signal(&self, start: f64, end: f64) -> Result<Self> {
        let (first, last) = self.axis().index_range(start, end).ok_or_else(|| {
            DecompError::shape(format!(
                "crop range [{start}, {end}] contains no channels of the signal axis"
            ))
        })?;

        let axis = SignalAxis::from_values(
            &self.axis().name,
            &self.axis().units,
            self.axis().values()[first..=last].to_vec(),
        )?;
        let data: Vec<f64> = self
            .spectra()
            .flat_map(|s| s[first..=last].iter().copied())
            .collect();

        debug!(
            "Cropped signal to channels {}..={} ({} of {})",
            first,
            last,
            axis.len(),
            self.signal_len()
        );
        HyperspectralCube::new(self.nav_shape().to_vec(), axis, self.kind(), data)
    }

    /// Sum blocks of `nav_factors[i]` pixels along each navigation axis and
    /// `signal_factor` channels along the signal axis.
    ///
    /// Every factor must be non-zero and divide its dimension exactly. The new
    /// channel coordinates are the means of the binned coordinates.
    pub fn rebin(&self, nav_factors: &[usize], signal_factor: usize) -> Result<Self> {
        let nav_shape = self.nav_shape();
        if nav_factors.len() != nav_shape.len() {
            return Err(DecompError::shape(format!(
                "{} rebin factors given for {} navigation dimensions",
                nav_factors.len(),
                nav_shape.len()
            )));
        }
        for (&n, &f) in nav_shape.iter().zip(nav_factors) {
            if f == 0 || n % f != 0 {
                return Err(DecompError::shape(format!(
                    "rebin factor {f} does not divide navigation dimension {n}"
                )));
            }
        }
        let len = self.signal_len();
        if signal_factor == 0 || len % signal_factor != 0 {
            return Err(DecompError::shape(format!(
                "rebin factor {signal_factor} does not divide signal length {len}"
            )));
        }

        let new_nav: Vec<usize> = nav_shape
            .iter()
            .zip(nav_factors)
            .map(|(&n, &f)| n / f)
            .collect();
        let new_len = len / signal_factor;
        let new_nav_size: usize = new_nav.iter().product();
        let mut data = vec![0.0; new_nav_size * new_len];

        let mut index = vec![0usize; nav_shape.len()];
        for (pixel, spectrum) in self.spectra().enumerate() {
            unravel_index(pixel, nav_shape, &mut index);
            let mut target = 0usize;
            for ((&i, &f), &n) in index.iter().zip(nav_factors).zip(&new_nav) {
                target = target * n + i / f;
            }
            let row = &mut data[target * new_len..(target + 1) * new_len];
            for (ch, &v) in spectrum.iter().enumerate() {
                row[ch / signal_factor] += v;
            }
        }

        let values: Vec<f64> = self
            .axis()
            .values()
            .chunks_exact(signal_factor)
            .map(|c| c.iter().sum::<f64>() / signal_factor as f64)
            .collect();
        let axis = SignalAxis::from_values(&self.axis().name, &self.axis().units, values)?;

        HyperspectralCube::new(new_nav, axis, self.kind(), data)
    }

    /// Subtract the global minimum if any sample is negative, so the cube can
    /// be handed to non-negative decompositions. Returns an unchanged copy
    /// otherwise.
    pub fn shift_to_non_negative(&self) -> Self {
        match self.min_value() {
            Some(min) if min < 0.0 => {
                debug!("Shifting cube by {:.4e} to remove negative values", -min);
                let data = self.data().iter().map(|&v| v - min).collect();
                self.with_data(data)
            }
            _ => self.clone(),
        }
    }

    /// Fit `model` to every spectrum over the coordinate `window` and subtract it.
    ///
    /// For [`BackgroundModel::PowerLaw`] the window coordinates must be positive;
    /// channels with non-positive coordinates are left untouched. Pixels without
    /// enough positive samples in the window to fit a power law are left
    /// unchanged and reported with a warning.
    pub fn remove_background(&self, window: (f64, f64), model: BackgroundModel) -> Result<Self> {
        let (first, last) = self.axis().index_range(window.0, window.1).ok_or_else(|| {
            DecompError::shape(format!(
                "background window [{}, {}] contains no channels",
                window.0, window.1
            ))
        })?;
        let x = self.axis().values();
        let xw = &x[first..=last];

        if let BackgroundModel::PowerLaw = model {
            if xw[0] <= 0.0 {
                return Err(DecompError::domain(
                    "power-law background requires positive axis coordinates in the window",
                ));
            }
            if !self.kind().supports(Capability::PowerLawBackground) {
                debug!(
                    "Power-law background applied to a {} signal",
                    self.kind().name()
                );
            }
        }
        if let BackgroundModel::Polynomial { order } = model {
            if xw.len() <= order as usize {
                return Err(DecompError::shape(format!(
                    "window of {} channels is too small for a polynomial of order {}",
                    xw.len(),
                    order
                )));
            }
        }

        let mut skipped = 0usize;
        let mut data = Vec::with_capacity(self.len());
        for spectrum in self.spectra() {
            let yw = &spectrum[first..=last];
            match fit_background(model, xw, yw, x) {
                Some(background) => {
                    data.extend(spectrum.iter().zip(&background).map(|(&v, &b)| v - b));
                }
                None => {
                    skipped += 1;
                    data.extend_from_slice(spectrum);
                }
            }
        }
        if skipped > 0 {
            warn!(
                "Background fit failed for {} of {} pixels; those spectra were left unchanged",
                skipped,
                self.nav_size()
            );
        }

        Ok(self.with_data(data))
    }

    /// Convert a cathodoluminescence cube from a wavelength axis (nm) to an
    /// energy axis (eV), applying the Jacobian `λ² / hc` to the intensities.
    ///
    /// Channels are reordered so that the new energy axis is increasing.
    pub fn to_energy_axis(&self) -> Result<Self> {
        if !self.kind().supports(Capability::WavelengthToEnergy) {
            return Err(DecompError::domain(format!(
                "wavelength to energy conversion is not available for {} signals",
                self.kind().name()
            )));
        }
        let lambda = self.axis().values();
        if lambda[0] <= 0.0 {
            return Err(DecompError::domain("wavelength axis must be positive"));
        }

        let energy: Vec<f64> = lambda.iter().rev().map(|&l| HC_EV_NM / l).collect();
        let jacobian: Vec<f64> = lambda.iter().rev().map(|&l| l * l / HC_EV_NM).collect();
        let axis = SignalAxis::from_values("Energy", "eV", energy)?;

        let data: Vec<f64> = self
            .spectra()
            .flat_map(|s| s.iter().rev().zip(&jacobian).map(|(&v, &j)| v * j))
            .collect();

        HyperspectralCube::new(self.nav_shape().to_vec(), axis, self.kind(), data)
    }
}

// ── Per-pixel background fits ───────────────────────────────────────────────

/// Fit `model` to `(xw, yw)` and evaluate it on the full axis `x`.
fn fit_background(model: BackgroundModel, xw: &[f64], yw: &[f64], x: &[f64]) -> Option<Vec<f64>> {
    match model {
        BackgroundModel::Offset => {
            let mean = yw.iter().sum::<f64>() / yw.len() as f64;
            Some(vec![mean; x.len()])
        }
        BackgroundModel::PowerLaw => {
            let (ln_a, r) = fit_power_law(xw, yw)?;
            Some(
                x.iter()
                    .map(|&xi| if xi > 0.0 { (ln_a - r * xi.ln()).exp() } else { 0.0 })
                    .collect(),
            )
        }
        BackgroundModel::Polynomial { order } => {
            let center = 0.5 * (xw[0] + xw[xw.len() - 1]);
            let half = (0.5 * (xw[xw.len() - 1] - xw[0])).max(f64::EPSILON);
            let coeffs = solve_least_squares(
                xw.iter().map(|&xi| (xi - center) / half),
                yw,
                order as usize + 1,
            )?;
            Some(
                x.iter()
                    .map(|&xi| {
                        let u = (xi - center) / half;
                        coeffs.iter().rev().fold(0.0, |acc, &c| acc * u + c)
                    })
                    .collect(),
            )
        }
    }
}

/// Fit `ln y = ln A - r ln x` over the positive samples. Returns `(ln A, r)`.
fn fit_power_law(xw: &[f64], yw: &[f64]) -> Option<(f64, f64)> {
    let (lx, ly): (Vec<f64>, Vec<f64>) = xw
        .iter()
        .zip(yw)
        .filter(|&(&xi, &yi)| xi > 0.0 && yi > 0.0)
        .map(|(&xi, &yi)| (xi.ln(), yi.ln()))
        .unzip();
    if lx.len() < 2 {
        return None;
    }
    let coeffs = solve_least_squares(lx.into_iter(), &ly, 2)?;
    Some((coeffs[0], -coeffs[1]))
}

/// Least-squares polynomial coefficients `c0 + c1·u + … ` of `n_coeffs` terms.
fn solve_least_squares(
    u: impl Iterator<Item = f64>,
    y: &[f64],
    n_coeffs: usize,
) -> Option<Vec<f64>> {
    let u: Vec<f64> = u.collect();
    let mut a_mat = DMatrix::<f64>::zeros(u.len(), n_coeffs);
    for (row, &ui) in u.iter().enumerate() {
        let mut p = 1.0;
        for col in 0..n_coeffs {
            a_mat[(row, col)] = p;
            p *= ui;
        }
    }
    let b_vec = DVector::from_column_slice(y);
    let svd = a_mat.svd(true, true);
    let coeffs = svd.solve(&b_vec, 1e-12).ok()?;
    coeffs.iter().all(|c| c.is_finite()).then(|| coeffs.iter().copied().collect())
}
