//! Directional quantile maximum deviation.
//!
//! Positive deviations are divided by the distance from the reference to the
//! upper pointwise quantile of the simulations, negative ones by the distance
//! to the lower quantile. Asymmetric null distributions therefore get an
//! asymmetric band.

use crate::curve_set::CurveSet;
use crate::methods::{Alternative, EnvelopeBand, GlobalMeasure, RankingMeasure, ScaledMaximum};
use crate::ops::Reference;
use crate::scaling::{Scaling, DEFAULT_PROBS};
use crate::EnvelopeError;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalQuantileMeasure {
    inner: ScaledMaximum,
}

impl DirectionalQuantileMeasure {
    pub fn new(probs: [f64; 2], reference: Reference) -> Self {
        Self {
            inner: ScaledMaximum {
                name: "directional_quantile",
                scaling: Scaling::DirectionalQuantile { probs },
                reference,
            },
        }
    }

    pub fn probs(&self) -> [f64; 2] {
        match self.inner.scaling {
            Scaling::DirectionalQuantile { probs } => probs,
            _ => DEFAULT_PROBS,
        }
    }
}

impl Default for DirectionalQuantileMeasure {
    fn default() -> Self {
        Self::new(DEFAULT_PROBS, Reference::default())
    }
}

impl GlobalMeasure for DirectionalQuantileMeasure {
    fn name(&self) -> &'static str {
        self.inner.name
    }

    fn compute_measures(
        &self,
        curve_set: &CurveSet,
        alternative: Alternative,
    ) -> Result<RankingMeasure, EnvelopeError> {
        self.inner.compute_measures(curve_set, alternative)
    }

    fn envelope(
        &self,
        curve_set: &CurveSet,
        measures: &RankingMeasure,
        alpha: f64,
    ) -> Result<EnvelopeBand, EnvelopeError> {
        self.inner.envelope(curve_set, measures, alpha)
    }
}
