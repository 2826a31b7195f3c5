//! Signal kinds, their capabilities, and the calibrated signal axis.
//!
//! The kind of a cube is an explicit tag carried alongside the data. Behaviour
//! that only makes sense for some kinds (wavelength → energy conversion for
//! cathodoluminescence, Poisson noise scaling for counting detectors) is looked
//! up in a static capability table instead of being attached at runtime.

use crate::error::{DecompError, Result};

/// Planck constant × speed of light in eV·nm.
pub const HC_EV_NM: f64 = 1239.841_98;

/// The physical origin of a spectral cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignalKind {
    /// Unspecified 1-D signal.
    #[default]
    Generic,
    /// Electron energy-loss spectroscopy (energy-loss axis in eV).
    Eels,
    /// Cathodoluminescence (wavelength axis in nm, or energy after conversion).
    Cathodoluminescence,
}

/// Optional behaviour a signal kind may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The signal axis is (or can be converted to) an energy axis.
    EnergyAxis,
    /// The axis can be converted from wavelength to energy.
    WavelengthToEnergy,
    /// Samples are detector counts with Poisson statistics, so Poisson
    /// normalization is appropriate before SVD.
    PoissonCounts,
    /// A power-law background (`A·E^-r`) is the conventional pre-edge model.
    PowerLawBackground,
}

const CAPABILITIES: &[(SignalKind, &[Capability])] = &[
    (SignalKind::Generic, &[]),
    (
        SignalKind::Eels,
        &[
            Capability::EnergyAxis,
            Capability::PoissonCounts,
            Capability::PowerLawBackground,
        ],
    ),
    (
        SignalKind::Cathodoluminescence,
        &[
            Capability::EnergyAxis,
            Capability::WavelengthToEnergy,
            Capability::PoissonCounts,
        ],
    ),
];

impl SignalKind {
    /// All capabilities of this kind.
    pub fn capabilities(self) -> &'static [Capability] {
        CAPABILITIES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, caps)| *caps)
            .unwrap_or(&[])
    }

    /// Returns `true` if this kind supports `capability`.
    pub fn supports(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Generic => "Signal1D",
            SignalKind::Eels => "EELS",
            SignalKind::Cathodoluminescence => "CL",
        }
    }
}

// ── Signal axis ─────────────────────────────────────────────────────────────

/// Calibrated coordinates of the signal (channel) dimension.
///
/// Coordinates are stored explicitly so that non-uniform axes (e.g. an energy
/// axis obtained from a uniform wavelength axis) are representable. They must
/// be finite and strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalAxis {
    /// Axis name, e.g. "Energy loss" or "Wavelength".
    pub name: String,
    /// Units, e.g. "eV" or "nm".
    pub units: String,
    values: Vec<f64>,
}

impl SignalAxis {
    /// A uniform axis `offset + i·scale` for `i in 0..size`.
    pub fn uniform(name: &str, units: &str, offset: f64, scale: f64, size: usize) -> Result<Self> {
        let values = (0..size).map(|i| offset + i as f64 * scale).collect();
        Self::from_values(name, units, values)
    }

    /// An axis from explicit channel coordinates.
    pub fn from_values(name: &str, units: &str, values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(DecompError::shape("signal axis must have at least one channel"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DecompError::domain("signal axis coordinates must be finite"));
        }
        if values.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DecompError::domain(
                "signal axis coordinates must be strictly increasing",
            ));
        }
        Ok(Self {
            name: name.to_string(),
            units: units.to_string(),
            values,
        })
    }

    /// A unit-step axis `0, 1, …, size-1` without calibration.
    pub fn channels(size: usize) -> Result<Self> {
        Self::uniform("Channel", "", 0.0, 1.0, size)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Inclusive index range of the channels whose coordinate lies in `[start, end]`.
    ///
    /// Returns `None` if no channel falls inside.
    pub fn index_range(&self, start: f64, end: f64) -> Option<(usize, usize)> {
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        let first = self.values.iter().position(|&v| v >= lo)?;
        let last = self.values.iter().rposition(|&v| v <= hi)?;
        (first <= last).then_some((first, last))
    }
}
