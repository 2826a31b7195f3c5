//! The hyperspectral cube container.
//!
//! A cube is a set of spectra arranged on a navigation grid (typically the
//! scan positions `y × x` of a STEM or SEM map). Samples are stored in one
//! contiguous buffer:
//!
//! ```text
//! data[pixel * L + channel]
//! pixel = row-major rank of (i1, …, in) over nav_shape (last index fastest)
//! ```
//!
//! Cubes are immutable once built. Correction steps in
//! [`correction`](crate::correction) return new cubes.

use crate::error::{DecompError, Result};
use crate::signal::{SignalAxis, SignalKind};

/// A hyperspectral data cube: navigation grid × signal axis.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperspectralCube {
    nav_shape: Vec<usize>,
    axis: SignalAxis,
    kind: SignalKind,
    data: Vec<f64>,
}

impl HyperspectralCube {
    /// Build a cube from a navigation shape, signal axis and sample buffer.
    ///
    /// `data.len()` must equal `Π nav_shape × axis.len()`. A navigation shape of
    /// `[]` describes a single spectrum. A zero-sized navigation dimension gives
    /// an empty cube, which [`flatten`](crate::matrix::flatten) rejects.
    pub fn new(
        nav_shape: Vec<usize>,
        axis: SignalAxis,
        kind: SignalKind,
        data: Vec<f64>,
    ) -> Result<Self> {
        let expected = nav_shape.iter().product::<usize>() * axis.len();
        if data.len() != expected {
            return Err(DecompError::shape(format!(
                "data length {} does not match navigation shape {:?} × signal length {} = {}",
                data.len(),
                nav_shape,
                axis.len(),
                expected
            )));
        }
        Ok(Self {
            nav_shape,
            axis,
            kind,
            data,
        })
    }

    /// Build a cube by evaluating `f(nav_index, channel)` for every sample.
    pub fn from_fn<F>(nav_shape: Vec<usize>, axis: SignalAxis, kind: SignalKind, mut f: F) -> Self
    where
        F: FnMut(&[usize], usize) -> f64,
    {
        let nav_size: usize = nav_shape.iter().product();
        let len = axis.len();
        let mut data = Vec::with_capacity(nav_size * len);
        let mut index = vec![0usize; nav_shape.len()];
        for pixel in 0..nav_size {
            unravel_index(pixel, &nav_shape, &mut index);
            for channel in 0..len {
                data.push(f(&index, channel));
            }
        }
        Self {
            nav_shape,
            axis,
            kind,
            data,
        }
    }

    pub fn nav_shape(&self) -> &[usize] {
        &self.nav_shape
    }

    pub fn axis(&self) -> &SignalAxis {
        &self.axis
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Raw samples, pixel-major.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Number of navigation pixels (product of the navigation shape).
    pub fn nav_size(&self) -> usize {
        self.nav_shape.iter().product()
    }

    /// Number of signal channels.
    pub fn signal_len(&self) -> usize {
        self.axis.len()
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Retag the cube with another signal kind.
    pub fn with_kind(mut self, kind: SignalKind) -> Self {
        self.kind = kind;
        self
    }

    /// Flat pixel index of a navigation multi-index.
    pub fn pixel_index(&self, index: &[usize]) -> Result<usize> {
        ravel_index(index, &self.nav_shape)
    }

    /// Spectrum at a navigation multi-index.
    pub fn spectrum(&self, index: &[usize]) -> Result<&[f64]> {
        let pixel = self.pixel_index(index)?;
        Ok(self.pixel_spectrum(pixel))
    }

    /// Spectrum at a flat pixel index. Panics if `pixel >= nav_size()`.
    pub fn pixel_spectrum(&self, pixel: usize) -> &[f64] {
        let len = self.signal_len();
        &self.data[pixel * len..(pixel + 1) * len]
    }

    /// Iterate over all spectra in flattening order.
    pub fn spectra(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.signal_len())
    }

    /// Sum of all spectra over the navigation grid.
    pub fn sum_spectrum(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.signal_len()];
        for spectrum in self.spectra() {
            for (t, &v) in total.iter_mut().zip(spectrum) {
                *t += v;
            }
        }
        total
    }

    /// Smallest sample value, or `None` for an empty cube.
    pub fn min_value(&self) -> Option<f64> {
        self.data.iter().cloned().reduce(f64::min)
    }

    /// Same shape, axis and kind with new samples of identical length.
    pub(crate) fn with_data(&self, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self {
            nav_shape: self.nav_shape.clone(),
            axis: self.axis.clone(),
            kind: self.kind,
            data,
        }
    }
}

// ── Row-major index helpers ─────────────────────────────────────────────────

/// Row-major rank of `index` within `shape` (last axis fastest).
pub(crate) fn ravel_index(index: &[usize], shape: &[usize]) -> Result<usize> {
    if index.len() != shape.len() {
        return Err(DecompError::shape(format!(
            "index {:?} has {} dimensions, navigation shape {:?} has {}",
            index,
            index.len(),
            shape,
            shape.len()
        )));
    }
    let mut flat = 0usize;
    for (&i, &n) in index.iter().zip(shape) {
        if i >= n {
            return Err(DecompError::shape(format!(
                "index {:?} out of bounds for navigation shape {:?}",
                index, shape
            )));
        }
        flat = flat * n + i;
    }
    Ok(flat)
}

/// Inverse of [`ravel_index`], writing into `out` (must have `shape.len()` slots).
pub(crate) fn unravel_index(mut flat: usize, shape: &[usize], out: &mut [usize]) {
    for (slot, &n) in out.iter_mut().zip(shape).rev() {
        *slot = flat % n;
        flat /= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cube() -> HyperspectralCube {
        let axis = SignalAxis::channels(3).unwrap();
        HyperspectralCube::from_fn(vec![2, 4], axis, SignalKind::Eels, |idx, ch| {
            (idx[0] * 100 + idx[1] * 10 + ch) as f64
        })
    }

    #[test]
    fn test_new_rejects_length_mismatch() {
        let axis = SignalAxis::channels(5).unwrap();
        let err = HyperspectralCube::new(vec![2, 2], axis, SignalKind::Generic, vec![0.0; 19])
            .unwrap_err();
        assert!(matches!(err, DecompError::Shape(_)));
    }

    #[test]
    fn test_spectrum_lookup_is_row_major() {
        let cube = small_cube();
        assert_eq!(cube.nav_size(), 8);
        assert_eq!(cube.pixel_index(&[1, 2]).unwrap(), 6);
        assert_eq!(cube.spectrum(&[1, 2]).unwrap(), &[120.0, 121.0, 122.0]);
        assert!(cube.spectrum(&[2, 0]).is_err());
        assert!(cube.spectrum(&[0]).is_err());
    }

    #[test]
    fn test_sum_spectrum() {
        let cube = small_cube();
        let sum = cube.sum_spectrum();
        // Σ over idx0∈{0,1}, idx1∈{0..3} of (100·i0 + 10·i1) = 4·100 + 2·60 = 520
        assert_eq!(sum, vec![520.0, 528.0, 536.0]);
    }

    #[test]
    fn test_unravel_roundtrip() {
        let shape = [3, 4, 5];
        let mut idx = [0usize; 3];
        for flat in 0..60 {
            unravel_index(flat, &shape, &mut idx);
            assert_eq!(ravel_index(&idx, &shape).unwrap(), flat);
        }
    }
}
