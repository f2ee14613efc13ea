//! Global envelope and deviation tests for functional data.
//!
//! An observed curve (typically an estimated summary function of a spatial
//! point pattern over a range of distances) is compared against curves from
//! simulated realizations of a null model. The tests control the
//! significance level jointly over all distances: the observed curve is
//! rejected when it is extreme anywhere, judged against how extreme the
//! simulated curves themselves are.
//!
//! The pipeline is:
//!
//! 1. build a validated [`CurveSet`] (directly, from a JSON map, or from an
//!    external simulation result via [`ops::from_simulation_source`]),
//! 2. optionally [`ops::crop`], [`ops::combine`] or [`ops::residual`] it,
//! 3. rank the curves with one of the [`Method`]s,
//! 4. derive the global envelope with [`envelope::build_envelope`] and the
//!    Monte Carlo p-value with [`p_value::estimate_p_value`].

pub mod config;
pub mod curve_set;
pub mod deviation;
pub mod envelope;
pub mod methods;
pub mod ops;
pub mod output;
pub mod p_value;
pub mod pointwise;
pub mod scaling;

use thiserror::Error;

pub use config::{EnvelopeConfig, ReferenceChoice};
pub use curve_set::{is_residual_curve_set, require_residual, CurveSet, CurveSetFields};
pub use deviation::{deviation_test, DeviationConfig, DeviationMeasure, DeviationResult};
pub use envelope::{build_envelope, EnvelopeResult};
pub use methods::{Alternative, Method, RankingMeasure};
pub use ops::{combine, crop, crop_fields, from_simulation_source, residual, Reference};
pub use p_value::{estimate_p_value, PValue, TieMethod};
pub use scaling::{scale_curves, Scaling};

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid field `{field}`: {reason}")]
    Validation { field: String, reason: String },
    #[error("simulation source did not retain the simulated curves")]
    MissingSimulationData,
    #[error("incompatible curve sets: {0}")]
    IncompatibleCurveSets(String),
    #[error("no distances left in [{r_min}, {r_max}]")]
    EmptyRange { r_min: f64, r_max: f64 },
    #[error("curve set is not residual")]
    NotResidual,
    #[error("curve set is already residual")]
    AlreadyResidual,
    #[error("no usable reference curve: {0}")]
    MissingReference(String),
    #[error("invalid alternative `{0}`, expected one of two.sided, less, greater")]
    InvalidAlternative(String),
    #[error("all measures are identical, the p-value is undefined")]
    DegenerateMeasures,
    #[error("{method} needs at least {required} simulated curves, got {got}")]
    InsufficientSimulations {
        method: &'static str,
        required: usize,
        got: usize,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EnvelopeError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EnvelopeError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Crops (when the configuration asks for it) and runs the global envelope test.
pub fn run_envelope_test(
    curve_set: &CurveSet,
    config: &EnvelopeConfig,
) -> Result<EnvelopeResult, EnvelopeError> {
    config.validate()?;
    if config.r_min.is_some() || config.r_max.is_some() {
        let cropped = crop(curve_set, config.r_min, config.r_max)?;
        build_envelope(&cropped, config)
    } else {
        build_envelope(curve_set, config)
    }
}
