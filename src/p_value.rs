//! Monte Carlo p-values with explicit tie handling.
//!
//! With `n` simulated values, the observed value is ranked among all `n + 1`
//! values. For the upper tail:
//!
//! ```text
//! conservative  p = (1 + #{sim >= obs}) / (n + 1)
//! midrank       p = (1 + #{sim > obs} + #{sim == obs} / 2) / (n + 1)
//! liberal       p = (1 + #{sim > obs}) / (n + 1)
//! ```
//!
//! The lower tail mirrors the counts, and the two-sided value is
//! `min(1, 2 * min(lower, upper))`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::methods::{Alternative, RankingMeasure};
use crate::EnvelopeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieMethod {
    /// Ties count against the observed value.
    #[default]
    Conservative,
    #[serde(rename = "midrank")]
    MidRank,
    /// Ties count in favor of the observed value.
    Liberal,
}

impl std::str::FromStr for TieMethod {
    type Err = EnvelopeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "conservative" => Ok(TieMethod::Conservative),
            "midrank" | "mid_rank" => Ok(TieMethod::MidRank),
            "liberal" => Ok(TieMethod::Liberal),
            other => Err(EnvelopeError::InvalidConfig(format!(
                "unknown tie method `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PValue {
    /// Tail of the measure distribution that was tested. Envelope tests
    /// always use `greater`, whatever alternative the curves were ranked
    /// under.
    pub tail: Alternative,
    pub ties: TieMethod,
    /// The estimate selected by `ties`.
    pub value: f64,
    pub conservative: f64,
    pub mid_rank: f64,
    pub liberal: f64,
    pub n_sim: usize,
    /// Simulated values equal to the observed one.
    pub n_tied: usize,
    /// Every measure was identical; all estimates are forced to 1.
    pub degenerate: bool,
}

impl PValue {
    fn forced_to_one(tail: Alternative, ties: TieMethod, n_sim: usize) -> Self {
        PValue {
            tail,
            ties,
            value: 1.0,
            conservative: 1.0,
            mid_rank: 1.0,
            liberal: 1.0,
            n_sim,
            n_tied: n_sim,
            degenerate: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TailCounts {
    below: usize,
    equal: usize,
    above: usize,
}

impl TailCounts {
    fn new(observed: f64, simulated: &[f64]) -> Self {
        let mut counts = TailCounts {
            below: 0,
            equal: 0,
            above: 0,
        };
        for &v in simulated {
            if v < observed {
                counts.below += 1;
            } else if v > observed {
                counts.above += 1;
            } else {
                counts.equal += 1;
            }
        }
        counts
    }

    /// (conservative, midrank, liberal) for the upper tail.
    fn upper(&self, n1: f64) -> [f64; 3] {
        let beyond = self.above as f64;
        let tied = self.equal as f64;
        [
            (1.0 + beyond + tied) / n1,
            (1.0 + beyond + tied / 2.0) / n1,
            (1.0 + beyond) / n1,
        ]
    }

    fn lower(&self, n1: f64) -> [f64; 3] {
        TailCounts {
            below: self.above,
            equal: self.equal,
            above: self.below,
        }
        .upper(n1)
    }
}

/// Monte Carlo p-value of `observed` against `simulated`.
pub fn monte_carlo_p_value(
    observed: f64,
    simulated: &[f64],
    alternative: Alternative,
    ties: TieMethod,
) -> Result<PValue, EnvelopeError> {
    if simulated.is_empty() {
        return Err(EnvelopeError::validation(
            "measures",
            "at least one simulated value is required",
        ));
    }
    if !observed.is_finite() || !simulated.iter().all(|v| v.is_finite()) {
        return Err(EnvelopeError::validation("measures", "must be finite"));
    }
    if simulated.iter().all(|&v| v == observed) {
        return Err(EnvelopeError::DegenerateMeasures);
    }

    let counts = TailCounts::new(observed, simulated);
    let n1 = (simulated.len() + 1) as f64;
    let [conservative, mid_rank, liberal] = match alternative {
        Alternative::Greater => counts.upper(n1),
        Alternative::Less => counts.lower(n1),
        Alternative::TwoSided => {
            let up = counts.upper(n1);
            let low = counts.lower(n1);
            let two = |k: usize| (2.0 * up[k].min(low[k])).min(1.0);
            [two(0), two(1), two(2)]
        }
    };

    let value = match ties {
        TieMethod::Conservative => conservative,
        TieMethod::MidRank => mid_rank,
        TieMethod::Liberal => liberal,
    };

    Ok(PValue {
        tail: alternative,
        ties,
        value,
        conservative,
        mid_rank,
        liberal,
        n_sim: simulated.len(),
        n_tied: counts.equal,
        degenerate: false,
    })
}

/// Upper-tail p-value of the observed extremeness measure. Unlike
/// [`monte_carlo_p_value`], identical measures are not an error here: the
/// test still has a band and a classification, and the p-value is 1.
pub fn measure_p_value(
    observed: f64,
    simulated: &[f64],
    ties: TieMethod,
) -> Result<PValue, EnvelopeError> {
    match monte_carlo_p_value(observed, simulated, Alternative::Greater, ties) {
        Err(EnvelopeError::DegenerateMeasures) => {
            warn!(
                n_sim = simulated.len(),
                "all measures are identical, p-value forced to 1"
            );
            Ok(PValue::forced_to_one(
                Alternative::Greater,
                ties,
                simulated.len(),
            ))
        }
        other => other,
    }
}

/// P-value of the observed curve's measure against the simulated ones.
///
/// `alternative` names the tail of the measure distribution to test:
/// `"greater"` is the extremity direction for every [`RankingMeasure`],
/// `"less"` the opposite tail, `"two.sided"` both.
pub fn estimate_p_value(
    measures: &RankingMeasure,
    alternative: &str,
) -> Result<PValue, EnvelopeError> {
    let alternative: Alternative = alternative.parse()?;
    monte_carlo_p_value(
        measures.observed(),
        measures.simulated(),
        alternative,
        TieMethod::Conservative,
    )
}
