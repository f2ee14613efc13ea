use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::curve_set::CurveSet;
use crate::deviation::DeviationMeasure;
use crate::ops::{self, Reference};
use crate::scaling::{self, Scaling, DEFAULT_PROBS};
use crate::EnvelopeError;

pub mod qdir;
pub mod rank;
pub mod studentized;

pub use qdir::DirectionalQuantileMeasure;
pub use rank::RankMeasure;
pub use studentized::StudentizedMeasure;

pub const METHOD_ORDER: [&str; 3] = ["rank", "studentized", "directional_quantile"];

/// Direction in which a curve counts as extreme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alternative {
    #[default]
    #[serde(rename = "two.sided")]
    TwoSided,
    #[serde(rename = "less")]
    Less,
    #[serde(rename = "greater")]
    Greater,
}

impl FromStr for Alternative {
    type Err = EnvelopeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "two.sided" | "two_sided" => Ok(Alternative::TwoSided),
            "less" => Ok(Alternative::Less),
            "greater" => Ok(Alternative::Greater),
            other => Err(EnvelopeError::InvalidAlternative(other.to_string())),
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Alternative::TwoSided => "two.sided",
            Alternative::Less => "less",
            Alternative::Greater => "greater",
        };
        f.write_str(name)
    }
}

/// Extremeness of every curve; larger is more extreme.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingMeasure {
    pub method: &'static str,
    pub alternative: Alternative,
    /// Index 0 is the observed curve, `j + 1` is simulation `j`.
    pub values: Vec<f64>,
}

impl RankingMeasure {
    pub fn observed(&self) -> f64 {
        self.values[0]
    }

    pub fn simulated(&self) -> &[f64] {
        &self.values[1..]
    }

    pub fn n_sim(&self) -> usize {
        self.values.len() - 1
    }

    /// Simulated curves exactly as extreme as the observed one.
    pub fn ties_with_observed(&self) -> usize {
        let obs = self.observed();
        self.simulated().iter().filter(|&&v| v == obs).count()
    }

    /// Simulated curves whose measure exceeds `threshold`.
    pub fn exceeding(&self, threshold: f64) -> usize {
        self.simulated().iter().filter(|&&v| v > threshold).count()
    }
}

/// How the envelope was calibrated to the global level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calibration {
    Rank { k: usize, alpha_attained: bool },
    Scaled { critical_value: f64 },
}

/// Pointwise band derived from the simulated curves.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeBand {
    pub central: Vec<f64>,
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
    /// Distances that take part in the classification.
    pub active: Vec<bool>,
    /// Observed curve beyond the band, per distance. Any `true` here holds
    /// exactly when the observed measure exceeds `threshold`.
    pub outside: Vec<bool>,
    /// A curve leaves the band iff its measure exceeds this value.
    pub threshold: f64,
    pub calibration: Calibration,
}

pub trait GlobalMeasure {
    fn name(&self) -> &'static str;

    fn compute_measures(
        &self,
        curve_set: &CurveSet,
        alternative: Alternative,
    ) -> Result<RankingMeasure, EnvelopeError>;

    /// Band whose simulated exceedance fraction is at most `alpha`.
    fn envelope(
        &self,
        curve_set: &CurveSet,
        measures: &RankingMeasure,
        alpha: f64,
    ) -> Result<EnvelopeBand, EnvelopeError>;
}

/// Ranking method selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Method {
    #[default]
    Rank,
    Studentized,
    DirectionalQuantile {
        #[serde(default = "default_probs")]
        probs: [f64; 2],
    },
}

fn default_probs() -> [f64; 2] {
    DEFAULT_PROBS
}

impl Method {
    pub fn from_name(name: &str) -> Result<Self, EnvelopeError> {
        match name {
            "rank" => Ok(Method::Rank),
            "studentized" | "st" => Ok(Method::Studentized),
            "directional_quantile" | "qdir" => Ok(Method::DirectionalQuantile {
                probs: DEFAULT_PROBS,
            }),
            other => Err(EnvelopeError::InvalidConfig(format!(
                "unknown method `{other}`, expected one of {}",
                METHOD_ORDER.join(", ")
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::Rank => "rank",
            Method::Studentized => "studentized",
            Method::DirectionalQuantile { .. } => "directional_quantile",
        }
    }

    /// `reference` is the curve the scaled methods measure deviations from;
    /// the rank method ignores it.
    pub fn strategy(&self, reference: Reference) -> Box<dyn GlobalMeasure> {
        match *self {
            Method::Rank => Box::new(RankMeasure),
            Method::Studentized => Box::new(StudentizedMeasure::new(reference)),
            Method::DirectionalQuantile { probs } => {
                Box::new(DirectionalQuantileMeasure::new(probs, reference))
            }
        }
    }
}

/// Number of simulated curves allowed beyond the envelope at level `alpha`.
pub(crate) fn allowed_exceedances(alpha: f64, n_sim: usize) -> usize {
    ((alpha * n_sim as f64) + 1e-9).floor() as usize
}

/// Maximum scaled deviation from a reference curve, shared by the
/// studentized and directional-quantile methods.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScaledMaximum {
    pub name: &'static str,
    pub scaling: Scaling,
    pub reference: Reference,
}

impl ScaledMaximum {
    /// Reference curve on the curve set's own scale, and the scaled residuals.
    fn prepare(&self, curve_set: &CurveSet) -> Result<(Vec<f64>, scaling::ScaledCurves), EnvelopeError> {
        if curve_set.is_residual() {
            let scaled = scaling::scale_curves(curve_set, self.scaling)?;
            return Ok((vec![0.0; curve_set.n_r()], scaled));
        }
        let central = ops::reference_curve(curve_set, &self.reference)?;
        let residual = ops::residual(curve_set, &Reference::Curve(central.clone()))?;
        let scaled = scaling::scale_curves(&residual, self.scaling)?;
        Ok((central, scaled))
    }

    pub fn compute_measures(
        &self,
        curve_set: &CurveSet,
        alternative: Alternative,
    ) -> Result<RankingMeasure, EnvelopeError> {
        let _span = tracing::debug_span!("scaled_measures", method = self.name).entered();
        let (_, scaled) = self.prepare(curve_set)?;
        let values = (0..=curve_set.n_sim())
            .map(|idx| DeviationMeasure::Max.evaluate(scaled.active_values(idx), alternative))
            .collect();
        Ok(RankingMeasure {
            method: self.name,
            alternative,
            values,
        })
    }

    pub fn envelope(
        &self,
        curve_set: &CurveSet,
        measures: &RankingMeasure,
        alpha: f64,
    ) -> Result<EnvelopeBand, EnvelopeError> {
        let (central, scaled) = self.prepare(curve_set)?;
        let n_sim = measures.n_sim();

        let mut sorted = measures.simulated().to_vec();
        sorted.sort_by(f64::total_cmp);
        let allowed = allowed_exceedances(alpha, n_sim).min(n_sim - 1);
        let critical = sorted[n_sim - allowed - 1];
        debug!(
            method = self.name,
            allowed,
            critical,
            exceeding = measures.exceeding(critical),
            "calibrated scaled envelope"
        );

        // classified on the scaled values the measure itself is built from
        let outside: Vec<bool> = (0..curve_set.n_r())
            .map(|i| {
                let s = scaled.curve_set.obs()[i];
                let directed = match measures.alternative {
                    Alternative::TwoSided => s.abs(),
                    Alternative::Greater => s,
                    Alternative::Less => -s,
                };
                scaled.active[i] && directed > critical
            })
            .collect();

        let factors = &scaled.factors;
        let (lo, hi): (Vec<f64>, Vec<f64>) = central
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let lo = match measures.alternative {
                    Alternative::Greater => f64::NEG_INFINITY,
                    _ => c - critical * factors.lower[i],
                };
                let hi = match measures.alternative {
                    Alternative::Less => f64::INFINITY,
                    _ => c + critical * factors.upper[i],
                };
                (lo, hi)
            })
            .unzip();

        Ok(EnvelopeBand {
            central,
            lo,
            hi,
            active: scaled.active,
            outside,
            threshold: critical,
            calibration: Calibration::Scaled {
                critical_value: critical,
            },
        })
    }
}
