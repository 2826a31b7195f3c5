//! # specdecomp
//!
//! Matrix decomposition and blind source separation for **hyperspectral
//! microscopy cubes**: EELS and cathodoluminescence spectrum images, or any
//! grid of 1-D spectra.
//!
//! A cube is flattened into an observation matrix (pixels × channels) and
//! factorized into `k` components, each a *loading* (a map over the scan grid)
//! and a *factor* (a spectrum). The loadings reshape back onto the scan grid for
//! display.
//!
//! ## Features
//!
//! - **SVD** with explained-variance ranking for scree plots
//! - **Poisson noise normalization** for counting detectors
//! - **NMF** (HALS or multiplicative updates) with a non-fatal convergence annotation
//! - **ICA** (FastICA) on the leading SVD components, or on any existing decomposition
//! - **Corrections**: signal crop, rebinning, power-law / polynomial background
//!   removal, non-negativity offset, CL wavelength → energy conversion
//! - **Model fitting**: immutable model specifications fitted per spectrum or per
//!   pixel with Levenberg–Marquardt
//!
//! ## Example
//!
//! ```no_run
//! use specdecomp::{
//!     decompose, flatten, Algorithm, HyperspectralCube, SignalAxis, SignalKind,
//! };
//!
//! # fn main() -> Result<(), specdecomp::DecompError> {
//! let axis = SignalAxis::uniform("Energy loss", "eV", 400.0, 0.5, 200)?;
//! let data = vec![0.0; 64 * 64 * 200]; // from an external loader
//! let cube = HyperspectralCube::new(vec![64, 64], axis, SignalKind::Eels, data)?;
//!
//! // Inspect the scree plot first; choosing the number of components is up to you.
//! let matrix = flatten(&cube)?;
//! let svd = decompose(&matrix, Algorithm::Svd, 10, true)?;
//! if let Some(variance) = &svd.variance {
//!     for point in variance.scree().iter().take(10) {
//!         println!("{:>2}: {:.4}", point.component, point.ratio);
//!     }
//! }
//!
//! // Then extract non-negative components and look at their maps.
//! let nmf = decompose(&matrix, Algorithm::Nmf, 3, false)?;
//! let map = nmf.loading_map(0)?;
//! println!("component 0 map: {:?}", map.shape());
//! # Ok(())
//! # }
//! ```
//!
//! ## Conventions
//!
//! - Flattening is row-major over the navigation axes (last axis fastest);
//!   [`unflatten`] and [`ObservationMatrix::to_cube`] invert it exactly.
//! - Loadings are pixels × k, factors are channels × k, and
//!   `loadings · factorsᵀ` approximates the observation matrix.

pub mod correction;
pub mod cube;
pub mod decomposition;
mod error;
pub mod matrix;
pub mod model;
pub mod signal;
pub mod variance;

pub use correction::BackgroundModel;
pub use cube::HyperspectralCube;
pub use decomposition::{
    blind_source_separation, decompose, decompose_cube, decompose_with, Algorithm, Convergence,
    DecompositionConfig, DecompositionResult, IcaConfig, NmfConfig,
};
pub use error::{DecompError, Result};
pub use matrix::{flatten, unflatten, NavMap, ObservationMatrix};
pub use model::{fit, fit_cube, ComponentSpec, FitConfig, FitResult, ModelSpec};
pub use signal::{Capability, SignalAxis, SignalKind};
pub use variance::{ScreePoint, VarianceRanking};

/// Dense matrix type used throughout the crate.
pub type Matrix = nalgebra::DMatrix<f64>;
