//! Curve-set transformations.
//!
//! Every operation returns a new, re-validated [`CurveSet`]; inputs are never
//! mutated.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::curve_set::{CurveSet, CurveSetFields};
use crate::pointwise;
use crate::EnvelopeError;

/// Result record of an external simulation/estimation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationSource {
    pub r: Vec<f64>,
    pub obs: Vec<f64>,
    #[serde(default)]
    pub theo: Option<Vec<f64>>,
    /// One curve per simulation, each sampled on `r`. `None` when the
    /// simulations ran without keeping their curves.
    #[serde(default)]
    pub sim_curves: Option<Vec<Vec<f64>>>,
}

/// Reference curve subtracted by [`residual`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Reference {
    /// The theoretical curve when present, otherwise the pointwise mean of
    /// the simulated curves.
    #[default]
    TheoreticalOrMean,
    Theoretical,
    Mean,
    Curve(Vec<f64>),
}

pub fn from_simulation_source(source: &SimulationSource) -> Result<CurveSet, EnvelopeError> {
    CurveSet::new(simulation_source_fields(source)?)
}

/// Raw fields of a simulation record, before the finiteness checks.
pub fn simulation_source_fields(
    source: &SimulationSource,
) -> Result<CurveSetFields, EnvelopeError> {
    let curves = match &source.sim_curves {
        Some(curves) if !curves.is_empty() => curves,
        _ => return Err(EnvelopeError::MissingSimulationData),
    };

    let n_r = source.r.len();
    if let Some((j, curve)) = curves.iter().enumerate().find(|(_, c)| c.len() != n_r) {
        return Err(EnvelopeError::validation(
            "sim_m",
            format!("simulation {j} has length {}, expected {n_r}", curve.len()),
        ));
    }

    let sim_m = DMatrix::from_fn(n_r, curves.len(), |i, j| curves[j][i]);
    let mut fields = CurveSetFields::new(source.r.clone(), source.obs.clone(), sim_m);
    fields.theo = source.theo.clone();
    Ok(fields)
}

/// Stacks curve sets along the distance axis, first set's rows first.
pub fn combine(curve_sets: &[CurveSet]) -> Result<CurveSet, EnvelopeError> {
    let Some(first) = curve_sets.first() else {
        return Err(EnvelopeError::IncompatibleCurveSets(
            "nothing to combine".to_string(),
        ));
    };

    for (idx, other) in curve_sets.iter().enumerate().skip(1) {
        if other.theo().is_some() != first.theo().is_some() {
            return Err(EnvelopeError::IncompatibleCurveSets(format!(
                "curve set {idx} does not share the fields of curve set 0"
            )));
        }
        if other.is_residual() != first.is_residual() {
            return Err(EnvelopeError::IncompatibleCurveSets(format!(
                "curve set {idx} differs in is_residual"
            )));
        }
        if other.n_sim() != first.n_sim() {
            return Err(EnvelopeError::IncompatibleCurveSets(format!(
                "curve set {idx} has {} simulations, expected {}",
                other.n_sim(),
                first.n_sim()
            )));
        }
    }

    let total: usize = curve_sets.iter().map(CurveSet::n_r).sum();
    let n_sim = first.n_sim();
    let mut r = Vec::with_capacity(total);
    let mut obs = Vec::with_capacity(total);
    let mut theo = first.theo().map(|_| Vec::with_capacity(total));
    let mut sim_m = DMatrix::zeros(total, n_sim);

    let mut offset = 0;
    for cs in curve_sets {
        r.extend_from_slice(cs.r());
        obs.extend_from_slice(cs.obs());
        if let (Some(acc), Some(part)) = (theo.as_mut(), cs.theo()) {
            acc.extend_from_slice(part);
        }
        sim_m.rows_mut(offset, cs.n_r()).copy_from(cs.sim_m());
        offset += cs.n_r();
    }

    debug!(parts = curve_sets.len(), n_r = total, n_sim, "combined curve sets");
    CurveSet::new(CurveSetFields {
        r,
        obs,
        sim_m,
        theo,
        is_residual: Some(first.is_residual()),
    })
}

/// Keeps the distances with `r_min <= r <= r_max`. Missing bounds are open.
pub fn crop(
    curve_set: &CurveSet,
    r_min: Option<f64>,
    r_max: Option<f64>,
) -> Result<CurveSet, EnvelopeError> {
    let fields = curve_set.clone().into_fields();
    CurveSet::new(crop_rows(&fields, r_min, r_max)?)
}

/// Crops raw fields that may still hold non-finite values (e.g. unstable
/// estimates at the smallest distances); the cropped result must be fully
/// valid.
pub fn crop_fields(
    fields: &CurveSetFields,
    r_min: Option<f64>,
    r_max: Option<f64>,
) -> Result<CurveSet, EnvelopeError> {
    fields.check(true)?;
    CurveSet::new(crop_rows(fields, r_min, r_max)?)
}

fn crop_rows(
    fields: &CurveSetFields,
    r_min: Option<f64>,
    r_max: Option<f64>,
) -> Result<CurveSetFields, EnvelopeError> {
    for (name, bound) in [("r_min", r_min), ("r_max", r_max)] {
        if bound.is_some_and(|b| !b.is_finite()) {
            return Err(EnvelopeError::validation(name, "must be finite"));
        }
    }
    let lo = r_min.unwrap_or(f64::NEG_INFINITY);
    let hi = r_max.unwrap_or(f64::INFINITY);

    let keep: Vec<usize> = fields
        .r
        .iter()
        .enumerate()
        .filter(|(_, &r)| lo <= r && r <= hi)
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(EnvelopeError::EmptyRange {
            r_min: lo,
            r_max: hi,
        });
    }

    debug!(kept = keep.len(), of = fields.r.len(), "cropped curve set");
    let pick = |values: &[f64]| keep.iter().map(|&i| values[i]).collect::<Vec<f64>>();
    Ok(CurveSetFields {
        r: pick(&fields.r),
        obs: pick(&fields.obs),
        sim_m: fields.sim_m.select_rows(&keep),
        theo: fields.theo.as_deref().map(pick),
        is_residual: fields.is_residual,
    })
}

/// Subtracts `reference` from the observed and every simulated curve.
///
/// The result is flagged residual and carries no theoretical curve.
pub fn residual(curve_set: &CurveSet, reference: &Reference) -> Result<CurveSet, EnvelopeError> {
    if curve_set.is_residual() {
        return Err(EnvelopeError::AlreadyResidual);
    }

    let reference = reference_curve(curve_set, reference)?;
    let obs = curve_set
        .obs()
        .iter()
        .zip(&reference)
        .map(|(o, c)| o - c)
        .collect();
    let sim = curve_set.sim_m();
    let sim_m = DMatrix::from_fn(curve_set.n_r(), curve_set.n_sim(), |i, j| {
        sim[(i, j)] - reference[i]
    });

    CurveSet::new(CurveSetFields {
        r: curve_set.r().to_vec(),
        obs,
        sim_m,
        theo: None,
        is_residual: Some(true),
    })
}

pub(crate) fn reference_curve(
    curve_set: &CurveSet,
    reference: &Reference,
) -> Result<Vec<f64>, EnvelopeError> {
    let mean_curve = || {
        (0..curve_set.n_r())
            .map(|i| pointwise::mean(&curve_set.sim_row(i)))
            .collect::<Vec<f64>>()
    };

    match reference {
        Reference::TheoreticalOrMean => Ok(curve_set
            .theo()
            .map(<[f64]>::to_vec)
            .unwrap_or_else(mean_curve)),
        Reference::Theoretical => curve_set.theo().map(<[f64]>::to_vec).ok_or_else(|| {
            EnvelopeError::MissingReference("curve set has no theoretical curve".to_string())
        }),
        Reference::Mean => Ok(mean_curve()),
        Reference::Curve(curve) => {
            if curve.len() != curve_set.n_r() {
                return Err(EnvelopeError::validation(
                    "reference",
                    format!("has length {}, expected {}", curve.len(), curve_set.n_r()),
                ));
            }
            if !curve.iter().all(|v| v.is_finite()) {
                return Err(EnvelopeError::validation("reference", "must be finite"));
            }
            Ok(curve.clone())
        }
    }
}
