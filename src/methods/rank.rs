//! Global rank envelope.
//!
//! At every distance the `n_sim + 1` curve values are ranked (ties share
//! their average rank) from the extreme end(s) inward. A curve's extremeness
//! is `(n_sim + 1) - min_r rank(r)`: the curve that reaches the most extreme
//! rank anywhere on the grid is the most extreme overall.

use tracing::{debug, warn};

use crate::curve_set::CurveSet;
use crate::methods::{
    allowed_exceedances, Alternative, Calibration, EnvelopeBand, GlobalMeasure, RankingMeasure,
};
use crate::ops::{self, Reference};
use crate::pointwise;
use crate::EnvelopeError;

#[derive(Debug, Clone, Copy, Default)]
pub struct RankMeasure;

impl RankMeasure {
    /// Pointwise ranks at distance index `i`, observed curve first.
    pub fn pointwise_ranks(curve_set: &CurveSet, i: usize, alternative: Alternative) -> Vec<f64> {
        let n_total = curve_set.n_sim() + 1;
        let values: Vec<f64> = (0..n_total).map(|idx| curve_set.value(idx, i)).collect();
        let top = (n_total + 1) as f64;

        pointwise::average_ranks(&values)
            .into_iter()
            .map(|asc| match alternative {
                Alternative::Less => asc,
                Alternative::Greater => top - asc,
                Alternative::TwoSided => asc.min(top - asc),
            })
            .collect()
    }

    /// Smallest pointwise rank each curve attains over all distances.
    pub fn minimum_ranks(curve_set: &CurveSet, alternative: Alternative) -> Vec<f64> {
        let mut minimum = vec![f64::INFINITY; curve_set.n_sim() + 1];
        for i in 0..curve_set.n_r() {
            for (slot, rank) in minimum
                .iter_mut()
                .zip(Self::pointwise_ranks(curve_set, i, alternative))
            {
                *slot = slot.min(rank);
            }
        }
        minimum
    }
}

impl GlobalMeasure for RankMeasure {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn compute_measures(
        &self,
        curve_set: &CurveSet,
        alternative: Alternative,
    ) -> Result<RankingMeasure, EnvelopeError> {
        let _span = tracing::debug_span!("rank_measures", n_r = curve_set.n_r()).entered();
        let n_total = (curve_set.n_sim() + 1) as f64;
        let values = Self::minimum_ranks(curve_set, alternative)
            .into_iter()
            .map(|k| n_total - k)
            .collect();
        Ok(RankingMeasure {
            method: self.name(),
            alternative,
            values,
        })
    }

    fn envelope(
        &self,
        curve_set: &CurveSet,
        measures: &RankingMeasure,
        alpha: f64,
    ) -> Result<EnvelopeBand, EnvelopeError> {
        let n = measures.n_sim();
        let allowed = allowed_exceedances(alpha, n);

        // Widening the band (larger k) can only admit more exceedances.
        let mut chosen = None;
        for k in 1..=n {
            if measures.exceeding((n - k) as f64) <= allowed {
                chosen = Some(k);
            } else {
                break;
            }
        }
        let (k, alpha_attained) = match chosen {
            Some(k) => (k, true),
            None => {
                warn!(
                    alpha,
                    n_sim = n,
                    "alpha not attainable with this many simulations, using k = 1"
                );
                (1, false)
            }
        };
        debug!(k, allowed, alpha_attained, "calibrated rank envelope");

        let central = ops::reference_curve(curve_set, &Reference::TheoreticalOrMean)?;
        let mut lo = Vec::with_capacity(curve_set.n_r());
        let mut hi = Vec::with_capacity(curve_set.n_r());
        let mut outside = Vec::with_capacity(curve_set.n_r());
        let (low_side, high_side) = match measures.alternative {
            Alternative::TwoSided => (true, true),
            Alternative::Less => (true, false),
            Alternative::Greater => (false, true),
        };
        for i in 0..curve_set.n_r() {
            let mut row = curve_set.sim_row(i);
            row.sort_by(f64::total_cmp);
            let o = curve_set.obs()[i];
            lo.push(if low_side { row[k - 1] } else { f64::NEG_INFINITY });
            hi.push(if high_side { row[n - k] } else { f64::INFINITY });
            outside.push(
                (low_side && beyond_edge(o, &row, k, |v, o| v < o))
                    || (high_side && beyond_edge(o, &row, k, |v, o| v > o)),
            );
        }

        Ok(EnvelopeBand {
            central,
            lo,
            hi,
            active: vec![true; curve_set.n_r()],
            outside,
            threshold: (n - k) as f64,
            calibration: Calibration::Rank { k, alpha_attained },
        })
    }
}

/// Whether `o` lies beyond the k-th most extreme simulated value on one
/// side, `more_extreme(v, o)` telling whether `v` is further out than `o`.
///
/// A value strictly beyond the edge is outside. A value equal to the edge is
/// outside when its average rank among itself and the simulated values is
/// still below `k + 1`, which is the rank measure's own criterion.
fn beyond_edge(o: f64, sorted: &[f64], k: usize, more_extreme: impl Fn(f64, f64) -> bool) -> bool {
    let further = sorted.iter().filter(|&&v| more_extreme(v, o)).count();
    let tied = sorted.iter().filter(|&&v| v == o).count();
    2 * further + tied < 2 * k
}
