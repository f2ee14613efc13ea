//! Studentized maximum deviation.

use crate::curve_set::CurveSet;
use crate::methods::{Alternative, EnvelopeBand, GlobalMeasure, RankingMeasure, ScaledMaximum};
use crate::ops::Reference;
use crate::scaling::Scaling;
use crate::EnvelopeError;

/// Largest deviation from the reference curve in units of the pointwise
/// standard deviation of the simulated curves.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentizedMeasure {
    inner: ScaledMaximum,
}

impl StudentizedMeasure {
    pub fn new(reference: Reference) -> Self {
        Self {
            inner: ScaledMaximum {
                name: "studentized",
                scaling: Scaling::Studentized,
                reference,
            },
        }
    }
}

impl Default for StudentizedMeasure {
    fn default() -> Self {
        Self::new(Reference::default())
    }
}

impl GlobalMeasure for StudentizedMeasure {
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

#[cfg(test)]
mod tests {
    use super::StudentizedMeasure;
    use crate::curve_set::{CurveSet, CurveSetFields};
    use crate::methods::{Alternative, Calibration, GlobalMeasure};
    use crate::EnvelopeError;
    use nalgebra::DMatrix;

    fn curve_set() -> CurveSet {
        // sims at each distance: mean 0, sd 1 (first row) and sd 2 (second row)
        CurveSet::new(
            CurveSetFields::new(
                vec![1.0, 2.0],
                vec![3.0, 3.0],
                DMatrix::from_row_slice(
                    2,
                    3,
                    &[
                        -1.0, 0.0, 1.0, //
                        -2.0, 0.0, 2.0,
                    ],
                ),
            )
            .with_theo(vec![0.0, 0.0]),
        )
        .unwrap()
    }

    #[test]
    fn observed_measure_is_max_studentized_deviation() {
        let m = StudentizedMeasure::default()
            .compute_measures(&curve_set(), Alternative::TwoSided)
            .unwrap();
        assert!((m.observed() - 3.0).abs() < 1e-12);
        assert!((m.simulated()[0] - 1.0).abs() < 1e-12);
        assert!(m.simulated()[1].abs() < 1e-12);
    }

    #[test]
    fn band_scales_with_pointwise_sd() {
        let cs = curve_set();
        let method = StudentizedMeasure::default();
        let m = method.compute_measures(&cs, Alternative::TwoSided).unwrap();
        let band = method.envelope(&cs, &m, 0.05).unwrap();
        // no exceedances allowed with three sims: the critical value is the largest sim measure
        assert!(matches!(band.calibration, Calibration::Scaled { critical_value } if (critical_value - 1.0).abs() < 1e-12));
        assert!((band.hi[0] - 1.0).abs() < 1e-12);
        assert!((band.hi[1] - 2.0).abs() < 1e-12);
        assert!((band.lo[1] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn one_simulation_is_rejected() {
        let cs = CurveSet::new(CurveSetFields::new(
            vec![1.0],
            vec![1.0],
            DMatrix::from_row_slice(1, 1, &[0.0]),
        ))
        .unwrap();
        assert!(matches!(
            StudentizedMeasure::default().compute_measures(&cs, Alternative::TwoSided),
            Err(EnvelopeError::InsufficientSimulations { .. })
        ));
    }
}
