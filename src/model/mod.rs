//! Spectral model specifications for peak and background fitting.
//!
//! A [`ModelSpec`] is an immutable, ordered list of components, each with its
//! parameters' starting values, bounds and fixed flags. Fitting is a pure
//! function of the specification and the data ([`fit`]); no fit state lives
//! inside the specification, so one spec can be fitted to many spectra.
//!
//! # Components
//!
//! | Component    | Parameters            | Shape                                      |
//! |--------------|-----------------------|--------------------------------------------|
//! | `Gaussian`   | `A`, `centre`, `sigma`| `A / (σ√2π) · exp(−(x−c)² / 2σ²)`          |
//! | `Lorentzian` | `A`, `centre`, `gamma`| `A/π · γ / ((x−c)² + γ²)`                  |
//! | `PowerLaw`   | `A`, `r`              | `A · x^−r` for `x > 0`, else 0             |
//! | `Offset`     | `offset`              | constant                                   |
//!
//! `A` is the integrated area for the peak components.

pub mod fit;

pub use fit::{fit, fit_cube, CubeFit, FitConfig, FitResult};

/// Functional form of a model component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Gaussian,
    Lorentzian,
    PowerLaw,
    Offset,
}

impl ComponentKind {
    /// Parameter names, in evaluation order.
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            ComponentKind::Gaussian => &["A", "centre", "sigma"],
            ComponentKind::Lorentzian => &["A", "centre", "gamma"],
            ComponentKind::PowerLaw => &["A", "r"],
            ComponentKind::Offset => &["offset"],
        }
    }

    /// Evaluate the component at `x` with parameters `p` (in `parameter_names` order).
    pub fn evaluate(self, p: &[f64], x: f64) -> f64 {
        match self {
            ComponentKind::Gaussian => {
                let (a, c, s) = (p[0], p[1], p[2]);
                if s == 0.0 {
                    return 0.0;
                }
                let z = (x - c) / s;
                a / (s.abs() * (2.0 * std::f64::consts::PI).sqrt()) * (-0.5 * z * z).exp()
            }
            ComponentKind::Lorentzian => {
                let (a, c, g) = (p[0], p[1], p[2]);
                let d = x - c;
                a / std::f64::consts::PI * g / (d * d + g * g)
            }
            ComponentKind::PowerLaw => {
                if x > 0.0 {
                    p[0] * x.powf(-p[1])
                } else {
                    0.0
                }
            }
            ComponentKind::Offset => p[0],
        }
    }
}

/// One model parameter: starting value, optional bounds, fixed flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub initial: f64,
    /// Inclusive `(lower, upper)` bounds.
    pub bounds: Option<(f64, f64)>,
    /// Fixed parameters keep their initial value during fitting.
    pub fixed: bool,
}

/// A component of a model with its parameter specifications.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub kind: ComponentKind,
    pub params: Vec<ParameterSpec>,
}

impl ComponentSpec {
    fn with_initial(kind: ComponentKind, initial: &[f64]) -> Self {
        let params = kind
            .parameter_names()
            .iter()
            .zip(initial)
            .map(|(&name, &initial)| ParameterSpec {
                name,
                initial,
                bounds: None,
                fixed: false,
            })
            .collect();
        Self { kind, params }
    }

    pub fn gaussian(area: f64, centre: f64, sigma: f64) -> Self {
        Self::with_initial(ComponentKind::Gaussian, &[area, centre, sigma])
    }

    pub fn lorentzian(area: f64, centre: f64, gamma: f64) -> Self {
        Self::with_initial(ComponentKind::Lorentzian, &[area, centre, gamma])
    }

    pub fn power_law(a: f64, r: f64) -> Self {
        Self::with_initial(ComponentKind::PowerLaw, &[a, r])
    }

    pub fn offset(value: f64) -> Self {
        Self::with_initial(ComponentKind::Offset, &[value])
    }

    /// Bound parameter `name` to `[lower, upper]`. Unknown names are ignored.
    pub fn bounded(mut self, name: &str, lower: f64, upper: f64) -> Self {
        if let Some(p) = self.params.iter_mut().find(|p| p.name == name) {
            p.bounds = Some((lower, upper));
        }
        self
    }

    /// Keep parameter `name` at its initial value. Unknown names are ignored.
    pub fn fixed(mut self, name: &str) -> Self {
        if let Some(p) = self.params.iter_mut().find(|p| p.name == name) {
            p.fixed = true;
        }
        self
    }
}

/// An ordered, immutable list of model components.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSpec {
    components: Vec<ComponentSpec>,
}

impl ModelSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new specification with `component` appended.
    pub fn with(mut self, component: ComponentSpec) -> Self {
        self.components.push(component);
        self
    }

    pub fn components(&self) -> &[ComponentSpec] {
        &self.components
    }

    /// Total number of parameters across all components.
    pub fn n_params(&self) -> usize {
        self.components.iter().map(|c| c.params.len()).sum()
    }

    /// All parameter specifications, flattened in component order.
    pub fn parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.components.iter().flat_map(|c| c.params.iter())
    }

    /// Flattened initial parameter vector.
    pub fn initial_params(&self) -> Vec<f64> {
        self.parameters().map(|p| p.initial).collect()
    }

    /// Evaluate the summed model at each `x` for a flattened parameter vector.
    pub fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| self.evaluate_at(params, xi)).collect()
    }

    fn evaluate_at(&self, params: &[f64], x: f64) -> f64 {
        let mut offset = 0;
        let mut total = 0.0;
        for c in &self.components {
            let n = c.params.len();
            total += c.kind.evaluate(&params[offset..offset + n], x);
            offset += n;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_area_normalization() {
        let g = ComponentKind::Gaussian;
        let p = [10.0, 5.0, 0.7];
        // Trapezoid integral over ±10σ
        let dx = 0.001;
        let area: f64 = (0..14000)
            .map(|i| g.evaluate(&p, -2.0 + i as f64 * dx) * dx)
            .sum();
        assert!((area - 10.0).abs() < 1e-6, "area {}", area);
    }

    #[test]
    fn test_model_sums_components() {
        let spec = ModelSpec::new()
            .with(ComponentSpec::offset(2.0))
            .with(ComponentSpec::lorentzian(std::f64::consts::PI, 0.0, 1.0));
        assert_eq!(spec.n_params(), 4);
        let y = spec.evaluate(&spec.initial_params(), &[0.0, 1.0]);
        assert!((y[0] - 3.0).abs() < 1e-12);
        assert!((y[1] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_builders_set_bounds_and_fixed() {
        let c = ComponentSpec::gaussian(1.0, 2.0, 3.0)
            .bounded("sigma", 0.1, 10.0)
            .fixed("centre");
        assert_eq!(c.params[2].bounds, Some((0.1, 10.0)));
        assert!(c.params[1].fixed);
        assert!(!c.params[0].fixed);
    }

    #[test]
    fn test_power_law_zero_for_non_positive_x() {
        let p = [100.0, 2.0];
        assert_eq!(ComponentKind::PowerLaw.evaluate(&p, -1.0), 0.0);
        assert!((ComponentKind::PowerLaw.evaluate(&p, 10.0) - 1.0).abs() < 1e-12);
    }
}
