//! Error types for cube handling and decomposition.
//!
//! Shape, domain and rank violations are detected at the API boundary, before
//! any expensive linear algebra runs. Non-convergence of an iterative solver is
//! *not* an error; see [`Convergence`](crate::decomposition::Convergence).

use thiserror::Error;

/// Result type for cube, matrix and decomposition operations.
pub type Result<T> = std::result::Result<T, DecompError>;

/// Errors raised by cube construction, corrections and decomposition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecompError {
    /// Dimension mismatch, empty cube or zero-length signal.
    #[error("shape error: {0}")]
    Shape(String),

    /// Data violates a constraint of the requested operation
    /// (negative values for NMF, non-finite samples, unsupported signal kind).
    #[error("domain error: {0}")]
    Domain(String),

    /// Requested component count cannot be extracted from the matrix.
    #[error("rank error: requested {requested} components, but at most {max} are available")]
    Rank { requested: usize, max: usize },

    /// A linear-algebra step failed (singular whitening, non-invertible unmixing).
    #[error("numerical error: {0}")]
    Numerical(String),
}

impl DecompError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        DecompError::Shape(msg.into())
    }

    pub(crate) fn domain(msg: impl Into<String>) -> Self {
        DecompError::Domain(msg.into())
    }

    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        DecompError::Numerical(msg.into())
    }
}
