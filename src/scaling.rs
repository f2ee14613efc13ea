//! Pointwise scaling of residual curves.
//!
//! Residual curves are divided by a per-distance spread estimated from the
//! simulated residuals, so that distances with large natural variability do
//! not dominate a maximum-type statistic. Directional scalings use a separate
//! divisor for positive and negative residuals.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::curve_set::{require_residual, CurveSet, CurveSetFields};
use crate::pointwise;
use crate::EnvelopeError;

pub const DEFAULT_PROBS: [f64; 2] = [0.025, 0.975];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scaling {
    #[default]
    None,
    /// Pointwise sample standard deviation of the simulated residuals.
    Studentized,
    /// Half-width of the pointwise `[probs[0], probs[1]]` quantile interval.
    Quantile {
        #[serde(default = "default_probs")]
        probs: [f64; 2],
    },
    /// Lower quantile magnitude below zero, upper quantile above.
    DirectionalQuantile {
        #[serde(default = "default_probs")]
        probs: [f64; 2],
    },
}

fn default_probs() -> [f64; 2] {
    DEFAULT_PROBS
}

impl Scaling {
    pub fn name(&self) -> &'static str {
        match self {
            Scaling::None => "none",
            Scaling::Studentized => "studentized",
            Scaling::Quantile { .. } => "quantile",
            Scaling::DirectionalQuantile { .. } => "directional_quantile",
        }
    }

    /// Quantile levels must satisfy `0 <= lo < hi <= 1`.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        match self {
            Scaling::Quantile { probs: [lo, hi] }
            | Scaling::DirectionalQuantile { probs: [lo, hi] } => {
                if !(0.0 <= *lo && lo < hi && *hi <= 1.0) {
                    return Err(EnvelopeError::InvalidConfig(format!(
                        "{} probs must satisfy 0 <= lo < hi <= 1, got [{lo}, {hi}]",
                        self.name()
                    )));
                }
                Ok(())
            }
            Scaling::None | Scaling::Studentized => Ok(()),
        }
    }

    fn min_simulations(&self) -> usize {
        match self {
            Scaling::None => 1,
            _ => 2,
        }
    }
}

/// Per-distance divisors for negative (`lower`) and positive (`upper`) residuals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleFactors {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ScaleFactors {
    /// A distance takes part in measures only if both divisors are positive
    /// and finite.
    pub fn is_active(&self, i: usize) -> bool {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        ok(self.lower[i]) && ok(self.upper[i])
    }

    pub fn scale(&self, residual: f64, i: usize) -> f64 {
        if residual >= 0.0 {
            residual / self.upper[i]
        } else {
            residual / self.lower[i]
        }
    }
}

/// Scaled residual curves plus the distances that carry information.
#[derive(Debug, Clone)]
pub struct ScaledCurves {
    /// Residual curve set holding the scaled values; inactive distances hold 0.
    pub curve_set: CurveSet,
    pub factors: ScaleFactors,
    pub active: Vec<bool>,
}

impl ScaledCurves {
    /// Scaled values of curve `idx` (0 = observed) at active distances.
    pub fn active_values(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .map(move |(i, _)| self.curve_set.value(idx, i))
    }
}

pub fn scale_factors(residual: &CurveSet, scaling: Scaling) -> Result<ScaleFactors, EnvelopeError> {
    scaling.validate()?;
    let residual = require_residual(residual)?;
    let required = scaling.min_simulations();
    if residual.n_sim() < required {
        return Err(EnvelopeError::InsufficientSimulations {
            method: scaling.name(),
            required,
            got: residual.n_sim(),
        });
    }

    let n_r = residual.n_r();
    let mut lower = Vec::with_capacity(n_r);
    let mut upper = Vec::with_capacity(n_r);
    for i in 0..n_r {
        let row = residual.sim_row(i);
        let (lo, hi) = match scaling {
            Scaling::None => (1.0, 1.0),
            Scaling::Studentized => {
                let sd = pointwise::sample_sd(&row);
                (sd, sd)
            }
            Scaling::Quantile { probs } => {
                let half = (pointwise::quantile(&row, probs[1])
                    - pointwise::quantile(&row, probs[0]))
                    / 2.0;
                (half, half)
            }
            Scaling::DirectionalQuantile { probs } => (
                -pointwise::quantile(&row, probs[0]),
                pointwise::quantile(&row, probs[1]),
            ),
        };
        lower.push(lo);
        upper.push(hi);
    }

    Ok(ScaleFactors { lower, upper })
}

/// Scales a residual curve set.
pub fn scale_curves(curve_set: &CurveSet, scaling: Scaling) -> Result<ScaledCurves, EnvelopeError> {
    let factors = scale_factors(curve_set, scaling)?;
    let n_r = curve_set.n_r();
    let active: Vec<bool> = (0..n_r).map(|i| factors.is_active(i)).collect();
    if !active.iter().any(|&on| on) {
        return Err(EnvelopeError::validation(
            "sim_m",
            "simulated curves have no spread at any distance",
        ));
    }

    let scaled = |value: f64, i: usize| {
        if active[i] {
            factors.scale(value, i)
        } else {
            0.0
        }
    };
    let obs = (0..n_r).map(|i| scaled(curve_set.obs()[i], i)).collect();
    let sim = curve_set.sim_m();
    let sim_m = DMatrix::from_fn(n_r, curve_set.n_sim(), |i, j| scaled(sim[(i, j)], i));

    let scaled_set = CurveSet::new(CurveSetFields {
        r: curve_set.r().to_vec(),
        obs,
        sim_m,
        theo: None,
        is_residual: Some(true),
    })?;

    Ok(ScaledCurves {
        curve_set: scaled_set,
        factors,
        active,
    })
}

#[cfg(test)]
mod tests {
    use super::{scale_curves, Scaling};
    use crate::curve_set::{CurveSet, CurveSetFields};
    use crate::EnvelopeError;
    use nalgebra::DMatrix;

    fn residual_set() -> CurveSet {
        CurveSet::new(
            CurveSetFields::new(
                vec![1.0, 2.0],
                vec![2.0, -1.0],
                DMatrix::from_row_slice(2, 4, &[-1.0, 1.0, -1.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
            )
            .with_residual(true),
        )
        .unwrap()
    }

    #[test]
    fn scaling_requires_residual_curves() {
        let cs = CurveSet::new(CurveSetFields::new(
            vec![1.0],
            vec![1.0],
            DMatrix::from_row_slice(1, 2, &[0.0, 2.0]),
        ))
        .unwrap();
        assert!(matches!(
            scale_curves(&cs, Scaling::Studentized),
            Err(EnvelopeError::NotResidual)
        ));
    }

    #[test]
    fn zero_spread_distances_are_inactive() {
        let scaled = scale_curves(&residual_set(), Scaling::Studentized).unwrap();
        assert_eq!(scaled.active, vec![true, false]);
        let sd = (4.0_f64 / 3.0).sqrt();
        assert!((scaled.curve_set.obs()[0] - 2.0 / sd).abs() < 1e-12);
        assert_eq!(scaled.curve_set.obs()[1], 0.0);
        assert_eq!(scaled.active_values(0).count(), 1);
    }

    #[test]
    fn directional_scaling_uses_each_side() {
        let cs = CurveSet::new(
            CurveSetFields::new(
                vec![1.0],
                vec![-2.0],
                DMatrix::from_row_slice(1, 3, &[-1.0, 0.0, 4.0]),
            )
            .with_residual(true),
        )
        .unwrap();
        let scaled = scale_curves(&cs, Scaling::DirectionalQuantile { probs: [0.0, 1.0] }).unwrap();
        assert!((scaled.factors.lower[0] - 1.0).abs() < 1e-12);
        assert!((scaled.factors.upper[0] - 4.0).abs() < 1e-12);
        assert!((scaled.curve_set.obs()[0] + 2.0).abs() < 1e-12);
        assert!((scaled.curve_set.value(3, 0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn quantile_levels_outside_unit_interval_are_rejected() {
        for scaling in [
            Scaling::DirectionalQuantile {
                probs: [0.025, 1.5],
            },
            Scaling::Quantile { probs: [-0.1, 0.9] },
            Scaling::Quantile { probs: [0.9, 0.1] },
        ] {
            assert!(matches!(
                scale_curves(&residual_set(), scaling),
                Err(EnvelopeError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn single_simulation_cannot_be_studentized() {
        let cs = CurveSet::new(
            CurveSetFields::new(vec![1.0], vec![0.0], DMatrix::from_row_slice(1, 1, &[1.0]))
                .with_residual(true),
        )
        .unwrap();
        assert!(matches!(
            scale_curves(&cs, Scaling::Studentized),
            Err(EnvelopeError::InsufficientSimulations { required: 2, .. })
        ));
    }
}
