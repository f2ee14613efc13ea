//! Global deviation tests.
//!
//! The curves are turned into residuals, scaled pointwise, and each curve is
//! summarized by one number; the observed summary is then compared with the
//! simulated ones through a Monte Carlo p-value.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use tracing::debug;

use crate::config::ReferenceChoice;
use crate::curve_set::CurveSet;
use crate::methods::Alternative;
use crate::ops::{self, Reference};
use crate::p_value::{measure_p_value, PValue, TieMethod};
use crate::scaling::{self, Scaling};
use crate::EnvelopeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationMeasure {
    /// Largest deviation over all distances.
    #[default]
    Max,
    /// Sum of squared deviations over all distances.
    Integral,
}

impl DeviationMeasure {
    /// Summarizes one scaled residual curve. `greater` only counts positive
    /// deviations, `less` only negative ones.
    pub fn evaluate(&self, values: impl Iterator<Item = f64>, alternative: Alternative) -> f64 {
        let directed = move |s: f64| match alternative {
            Alternative::TwoSided => s.abs(),
            Alternative::Greater => s,
            Alternative::Less => -s,
        };
        match self {
            DeviationMeasure::Max => values.map(directed).fold(f64::NEG_INFINITY, f64::max),
            DeviationMeasure::Integral => values
                .map(|s| match alternative {
                    Alternative::TwoSided => s,
                    _ => directed(s).max(0.0),
                })
                .map(|s| s * s)
                .sum(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviationConfig {
    #[serde_as(as = "DefaultOnNull")]
    pub measure: DeviationMeasure,
    #[serde_as(as = "DefaultOnNull")]
    pub scaling: Scaling,
    #[serde_as(as = "DefaultOnNull")]
    pub alternative: Alternative,
    #[serde_as(as = "DefaultOnNull")]
    pub reference: ReferenceChoice,
    #[serde_as(as = "DefaultOnNull")]
    pub ties: TieMethod,
}

impl DeviationConfig {
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        self.scaling.validate()
    }
}

impl Default for DeviationConfig {
    fn default() -> Self {
        Self {
            measure: DeviationMeasure::Max,
            scaling: Scaling::Studentized,
            alternative: Alternative::TwoSided,
            reference: ReferenceChoice::TheoreticalOrMean,
            ties: TieMethod::Conservative,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviationResult {
    pub measure: DeviationMeasure,
    pub scaling: Scaling,
    pub alternative: Alternative,
    pub n_sim: usize,
    /// Distances that carried spread and entered the measure.
    pub n_active: usize,
    /// Index 0 is the observed curve.
    pub values: Vec<f64>,
    pub p_value: PValue,
}

pub fn deviation_test(
    curve_set: &CurveSet,
    config: &DeviationConfig,
) -> Result<DeviationResult, EnvelopeError> {
    let _span = tracing::debug_span!(
        "deviation_test",
        measure = ?config.measure,
        scaling = config.scaling.name()
    )
    .entered();
    config.validate()?;

    let residual;
    let residual_set = if curve_set.is_residual() {
        curve_set
    } else {
        residual = ops::residual(curve_set, &Reference::from(config.reference))?;
        &residual
    };
    let scaled = scaling::scale_curves(residual_set, config.scaling)?;

    let values: Vec<f64> = (0..=curve_set.n_sim())
        .map(|idx| {
            config
                .measure
                .evaluate(scaled.active_values(idx), config.alternative)
        })
        .collect();
    let p_value = measure_p_value(values[0], &values[1..], config.ties)?;
    let n_active = scaled.active.iter().filter(|&&on| on).count();
    debug!(observed = values[0], p = p_value.value, n_active, "deviation test done");

    Ok(DeviationResult {
        measure: config.measure,
        scaling: config.scaling,
        alternative: config.alternative,
        n_sim: curve_set.n_sim(),
        n_active,
        values,
        p_value,
    })
}
