//! Explained-variance ranking of SVD components (scree plot data).
//!
//! The share of component `i` is `s_i² / Σ_j s_j²`. Choosing how many
//! components are significant (the "elbow" of the scree plot) is left to the
//! operator; nothing here picks a cutoff.

/// Explained-variance ratios of a singular value spectrum, descending.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceRanking {
    singular_values: Vec<f64>,
    ratios: Vec<f64>,
}

/// One point of a scree plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreePoint {
    /// Zero-based component index.
    pub component: usize,
    /// Explained-variance ratio of this component.
    pub ratio: f64,
    /// Cumulative ratio up to and including this component.
    pub cumulative: f64,
}

impl VarianceRanking {
    /// Rank a set of singular values. Values are sorted descending by
    /// magnitude; non-finite entries count as zero.
    pub fn from_singular_values(singular_values: &[f64]) -> Self {
        let mut sv: Vec<f64> = singular_values
            .iter()
            .map(|&s| if s.is_finite() { s.abs() } else { 0.0 })
            .collect();
        sv.sort_by(|a, b| b.total_cmp(a));

        let total: f64 = sv.iter().map(|s| s * s).sum();
        let ratios = if total > 0.0 {
            sv.iter().map(|s| (s * s / total).clamp(0.0, 1.0)).collect()
        } else {
            vec![0.0; sv.len()]
        };

        Self {
            singular_values: sv,
            ratios,
        }
    }

    /// Singular values, descending.
    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }

    /// Explained-variance ratio of every component, descending.
    pub fn ratios(&self) -> &[f64] {
        &self.ratios
    }

    /// Ratios of the first `k` components.
    pub fn top(&self, k: usize) -> &[f64] {
        &self.ratios[..k.min(self.ratios.len())]
    }

    /// Running sum of the ratios.
    pub fn cumulative(&self) -> Vec<f64> {
        self.ratios
            .iter()
            .scan(0.0, |acc, &r| {
                *acc += r;
                Some(acc.min(1.0))
            })
            .collect()
    }

    /// Points for a scree plot (ratio and cumulative ratio per component).
    pub fn scree(&self) -> Vec<ScreePoint> {
        self.ratios
            .iter()
            .zip(self.cumulative())
            .enumerate()
            .map(|(component, (&ratio, cumulative))| ScreePoint {
                component,
                ratio,
                cumulative,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }
}
