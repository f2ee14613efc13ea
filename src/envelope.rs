//! Global envelope construction and classification.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::EnvelopeConfig;
use crate::curve_set::CurveSet;
use crate::methods::{Alternative, Calibration, RankingMeasure};
use crate::p_value::{measure_p_value, PValue, TieMethod};
use crate::EnvelopeError;

/// Outcome of a global envelope test, complete enough to plot and report
/// without the inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeResult {
    pub method: &'static str,
    pub alternative: Alternative,
    pub alpha: f64,
    pub ties: TieMethod,
    pub n_sim: usize,
    pub r: Vec<f64>,
    pub obs: Vec<f64>,
    pub central: Vec<f64>,
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
    /// Distances whose spread allowed them to take part in the test.
    pub active: Vec<bool>,
    /// Observed curve outside the band, per distance. On the rank envelope an
    /// observed value equal to an edge is outside when its average rank is
    /// still among the `k` most extreme.
    pub outside: Vec<bool>,
    pub observed_outside: bool,
    pub threshold: f64,
    pub calibration: Calibration,
    pub measures: RankingMeasure,
    /// Upper tail of the extremeness measures; see [`PValue::tail`].
    pub p_value: PValue,
}

impl EnvelopeResult {
    /// Distances at which the observed curve leaves the band.
    pub fn outside_r(&self) -> Vec<f64> {
        self.r
            .iter()
            .zip(&self.outside)
            .filter(|(_, &out)| out)
            .map(|(&r, _)| r)
            .collect()
    }
}

pub fn build_envelope(
    curve_set: &CurveSet,
    config: &EnvelopeConfig,
) -> Result<EnvelopeResult, EnvelopeError> {
    config.validate()?;
    let strategy = config.method.strategy(config.reference.into());
    let _span = tracing::debug_span!(
        "build_envelope",
        method = strategy.name(),
        n_r = curve_set.n_r(),
        n_sim = curve_set.n_sim()
    )
    .entered();

    let measures = strategy.compute_measures(curve_set, config.alternative)?;
    let band = strategy.envelope(curve_set, &measures, config.alpha)?;

    let observed_outside = band.outside.iter().any(|&out| out);
    debug_assert_eq!(observed_outside, measures.observed() > band.threshold);

    let p_value = measure_p_value(measures.observed(), measures.simulated(), config.ties)?;
    debug!(threshold = band.threshold, observed_outside, "envelope classified");
    info!(
        method = strategy.name(),
        p = p_value.value,
        observed_outside,
        "global envelope test done"
    );

    Ok(EnvelopeResult {
        method: strategy.name(),
        alternative: config.alternative,
        alpha: config.alpha,
        ties: config.ties,
        n_sim: curve_set.n_sim(),
        r: curve_set.r().to_vec(),
        obs: curve_set.obs().to_vec(),
        central: band.central,
        lo: band.lo,
        hi: band.hi,
        active: band.active,
        outside: band.outside,
        observed_outside,
        threshold: band.threshold,
        calibration: band.calibration,
        measures,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::build_envelope;
    use crate::config::EnvelopeConfig;
    use crate::curve_set::{CurveSet, CurveSetFields};
    use crate::methods::{Alternative, Calibration, Method};
    use crate::EnvelopeError;
    use nalgebra::DMatrix;

    fn spread(obs: Vec<f64>) -> CurveSet {
        // 19 sims, values -9..=9 at each of two distances, reversed on the second
        let n = 19;
        let sim_m = DMatrix::from_fn(2, n, |i, j| {
            let v = j as f64 - 9.0;
            if i == 0 {
                v
            } else {
                -v
            }
        });
        CurveSet::new(CurveSetFields::new(vec![0.5, 1.0], obs, sim_m).with_theo(vec![0.0, 0.0]))
            .unwrap()
    }

    #[test]
    fn extreme_observation_is_outside_for_every_method() {
        let cs = spread(vec![50.0, 0.0]);
        for method in [
            Method::Rank,
            Method::Studentized,
            Method::DirectionalQuantile {
                probs: [0.025, 0.975],
            },
        ] {
            let config = EnvelopeConfig {
                method,
                alpha: 0.15,
                ..EnvelopeConfig::default()
            };
            let result = build_envelope(&cs, &config).unwrap();
            assert!(result.observed_outside, "{}", result.method);
            assert_eq!(result.outside_r(), vec![0.5]);
            // two-sided ranks tie the observed maximum with the simulated minimum
            // and the simulated maximum of the reversed distance
            let expected = if method == Method::Rank { 0.15 } else { 0.05 };
            assert!((result.p_value.value - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn central_observation_is_inside() {
        let cs = spread(vec![0.0, 0.0]);
        let result = build_envelope(&cs, &EnvelopeConfig::default()).unwrap();
        assert!(!result.observed_outside);
        assert!(result.outside.iter().all(|&out| !out));
    }

    #[test]
    fn rank_envelope_reports_k() {
        let cs = spread(vec![0.0, 0.0]);
        let config = EnvelopeConfig {
            alpha: 0.15,
            ..EnvelopeConfig::default()
        };
        let result = build_envelope(&cs, &config).unwrap();
        assert_eq!(
            result.calibration,
            Calibration::Rank {
                k: 1,
                alpha_attained: true
            }
        );
        assert_eq!(result.threshold, 18.0);
    }

    #[test]
    fn unattainable_alpha_falls_back_to_extremes() {
        let cs = spread(vec![0.0, 0.0]);
        let result = build_envelope(&cs, &EnvelopeConfig::default()).unwrap();
        assert_eq!(
            result.calibration,
            Calibration::Rank {
                k: 1,
                alpha_attained: false
            }
        );
        assert_eq!(result.lo, vec![-9.0, -9.0]);
        assert_eq!(result.hi, vec![9.0, 9.0]);
    }

    #[test]
    fn greater_alternative_leaves_lower_side_open() {
        let cs = spread(vec![-50.0, 0.0]);
        let config = EnvelopeConfig {
            alternative: Alternative::Greater,
            ..EnvelopeConfig::default()
        };
        let result = build_envelope(&cs, &config).unwrap();
        assert!(result.lo.iter().all(|v| *v == f64::NEG_INFINITY));
        assert!(!result.observed_outside);
    }

    #[test]
    fn single_simulation_still_yields_an_envelope() {
        let cs = CurveSet::new(CurveSetFields::new(
            vec![1.0, 2.0],
            vec![1.0, 2.0],
            DMatrix::from_row_slice(2, 1, &[0.5, 3.0]),
        ))
        .unwrap();
        let result = build_envelope(&cs, &EnvelopeConfig::default()).unwrap();
        assert!(result.p_value.degenerate);
        assert_eq!(result.p_value.value, 1.0);
        assert_eq!(result.lo, vec![0.5, 3.0]);
        assert_eq!(result.outside, vec![true, true]);
        assert!(result.observed_outside);
    }

    #[test]
    fn every_curve_extreme_somewhere_forces_p_to_one() {
        // obs and c4 are maxima, c1 and c3 minima, c2 the maximum of row 1
        let cs = CurveSet::new(CurveSetFields::new(
            vec![1.0, 2.0, 3.0],
            vec![10.0, 5.0, 5.0],
            DMatrix::from_row_slice(
                3,
                4,
                &[
                    0.0, 5.0, 5.5, 6.0, //
                    4.5, 9.0, 0.0, 6.0, //
                    0.0, 4.0, 6.0, 9.0,
                ],
            ),
        ))
        .unwrap();
        let result = build_envelope(&cs, &EnvelopeConfig::default()).unwrap();
        assert!(result.measures.values.iter().all(|&v| v == 4.0));
        assert!(result.p_value.degenerate);
        assert_eq!(result.p_value.value, 1.0);
        assert_eq!(result.outside, vec![true, false, false]);
    }

    #[test]
    fn observed_tied_with_the_edge_agrees_with_its_measure() {
        let cs = CurveSet::new(CurveSetFields::new(
            vec![1.0, 2.0],
            vec![1.0, 2.5],
            DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 3.0, 4.0, 2.0, 3.0, 1.0, 4.0]),
        ))
        .unwrap();
        let result = build_envelope(&cs, &EnvelopeConfig::default()).unwrap();
        assert_eq!(result.measures.observed(), 3.5);
        assert_eq!(result.threshold, 3.0);
        assert_eq!(result.outside, vec![true, false]);
        assert!(result.observed_outside);
    }

    #[test]
    fn invalid_alpha_is_rejected() {
        let cs = spread(vec![0.0, 0.0]);
        let config = EnvelopeConfig {
            alpha: 0.0,
            ..EnvelopeConfig::default()
        };
        assert!(matches!(
            build_envelope(&cs, &config),
            Err(EnvelopeError::InvalidConfig(_))
        ));
    }
}
