//! Flattening a cube into an observation matrix, and the inverse reshapes.
//!
//! Row `r` of the observation matrix is the spectrum of the pixel whose
//! navigation multi-index has row-major rank `r` (last navigation axis
//! fastest). [`ObservationMatrix::to_cube`] and [`unflatten`] use the same
//! convention, so `flatten → to_cube` reproduces the cube exactly.

use nalgebra::DMatrix;

use crate::cube::{ravel_index, HyperspectralCube};
use crate::error::{DecompError, Result};
use crate::signal::{SignalAxis, SignalKind};

/// A cube viewed as a 2-D matrix: pixels × channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationMatrix {
    matrix: DMatrix<f64>,
    nav_shape: Vec<usize>,
}

impl ObservationMatrix {
    /// Wrap an existing matrix. `matrix.nrows()` must equal `Π nav_shape`.
    pub fn new(matrix: DMatrix<f64>, nav_shape: Vec<usize>) -> Result<Self> {
        let nav_size: usize = nav_shape.iter().product();
        if matrix.nrows() != nav_size {
            return Err(DecompError::shape(format!(
                "matrix has {} rows but navigation shape {:?} has {} pixels",
                matrix.nrows(),
                nav_shape,
                nav_size
            )));
        }
        if matrix.nrows() == 0 || matrix.ncols() == 0 {
            return Err(DecompError::shape("observation matrix must not be empty"));
        }
        Ok(Self { matrix, nav_shape })
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn nav_shape(&self) -> &[usize] {
        &self.nav_shape
    }

    /// Number of pixels (rows).
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of channels (columns).
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Largest rank any decomposition of this matrix can have.
    pub fn max_rank(&self) -> usize {
        self.nrows().min(self.ncols())
    }

    /// Reshape back into a cube with the given signal axis and kind.
    pub fn to_cube(&self, axis: SignalAxis, kind: SignalKind) -> Result<HyperspectralCube> {
        if axis.len() != self.ncols() {
            return Err(DecompError::shape(format!(
                "signal axis has {} channels, matrix has {} columns",
                axis.len(),
                self.ncols()
            )));
        }
        // Column-major storage of the transpose is the row-major order of the matrix.
        let data = self.matrix.transpose().as_slice().to_vec();
        HyperspectralCube::new(self.nav_shape.clone(), axis, kind, data)
    }
}

/// Flatten a cube into an observation matrix (pixels × channels).
pub fn flatten(cube: &HyperspectralCube) -> Result<ObservationMatrix> {
    if cube.nav_size() == 0 || cube.is_empty() {
        return Err(DecompError::shape(format!(
            "cannot flatten an empty cube (navigation shape {:?})",
            cube.nav_shape()
        )));
    }
    if cube.signal_len() == 0 {
        return Err(DecompError::shape("cannot flatten a cube with zero signal length"));
    }
    let matrix = DMatrix::from_row_slice(cube.nav_size(), cube.signal_len(), cube.data());
    ObservationMatrix::new(matrix, cube.nav_shape().to_vec())
}

// ── Navigation maps ─────────────────────────────────────────────────────────

/// A per-pixel quantity (a component loading, a fitted parameter) laid out on
/// the navigation grid.
#[derive(Debug, Clone, PartialEq)]
pub struct NavMap {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NavMap {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Values in row-major order.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Value at a navigation multi-index.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        Ok(self.data[ravel_index(index, &self.shape)?])
    }

    /// Rows of a 2-D map (`shape == [rows, cols]`), e.g. for image display.
    pub fn rows(&self) -> Option<Vec<&[f64]>> {
        match self.shape[..] {
            [_, cols] if cols > 0 => Some(self.data.chunks_exact(cols).collect()),
            _ => None,
        }
    }
}

/// Reshape a per-pixel vector onto the navigation grid `nav_shape`.
pub fn unflatten(values: &[f64], nav_shape: &[usize]) -> Result<NavMap> {
    let nav_size: usize = nav_shape.iter().product();
    if values.len() != nav_size {
        return Err(DecompError::shape(format!(
            "vector of length {} cannot be reshaped to navigation shape {:?} ({} pixels)",
            values.len(),
            nav_shape,
            nav_size
        )));
    }
    Ok(NavMap {
        shape: nav_shape.to_vec(),
        data: values.to_vec(),
    })
}
