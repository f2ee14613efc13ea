//! Validated curve-set container.
//!
//! A [`CurveSet`] holds one observed curve and the simulated curves of a
//! null model, all sampled on the same distance grid `r`. The simulated
//! curves are stored as an `n_r x n_sim` matrix: row `i` holds every
//! simulation's value at `r[i]`, column `j` is simulation `j`'s curve.
//!
//! All invariants are checked once in [`CurveSet::new`]; downstream code
//! relies on them without re-checking.

use nalgebra::DMatrix;
use serde_json::{Map, Value};
use tracing::debug;

use crate::EnvelopeError;

/// Keys accepted by the loosely-typed construction API.
pub const FIELD_NAMES: [&str; 5] = ["r", "obs", "sim_m", "theo", "is_residual"];

/// Raw, unvalidated curve-set fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSetFields {
    pub r: Vec<f64>,
    pub obs: Vec<f64>,
    pub sim_m: DMatrix<f64>,
    pub theo: Option<Vec<f64>>,
    /// Absent means `false`.
    pub is_residual: Option<bool>,
}

impl CurveSetFields {
    pub fn new(r: Vec<f64>, obs: Vec<f64>, sim_m: DMatrix<f64>) -> Self {
        Self {
            r,
            obs,
            sim_m,
            theo: None,
            is_residual: None,
        }
    }

    pub fn with_theo(mut self, theo: Vec<f64>) -> Self {
        self.theo = Some(theo);
        self
    }

    pub fn with_residual(mut self, is_residual: bool) -> Self {
        self.is_residual = Some(is_residual);
        self
    }

    /// Parses a JSON object restricted to the keys in [`FIELD_NAMES`].
    ///
    /// `sim_m` is an array of `n_r` rows, each holding one value per
    /// simulation. `null` entries become NaN so that the finiteness check (or
    /// a relaxed crop) decides what to do with them.
    /// Unvalidated counterpart of [`CurveSet::from_json_str`]; pass the
    /// result to [`crate::ops::crop_fields`] to drop unusable distances.
    pub fn from_json_str(raw: &str) -> Result<Self, EnvelopeError> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Self::from_json_map(&map),
            _ => Err(EnvelopeError::validation(
                "curve_set",
                "expected a JSON object",
            )),
        }
    }

    pub fn from_json_map(map: &Map<String, Value>) -> Result<Self, EnvelopeError> {
        if let Some(key) = map.keys().find(|key| !FIELD_NAMES.contains(&key.as_str())) {
            return Err(EnvelopeError::validation(key.as_str(), "unknown field"));
        }

        let r = number_vec("r", required(map, "r")?)?;
        let obs = number_vec("obs", required(map, "obs")?)?;
        let sim_m = number_rows("sim_m", required(map, "sim_m")?)?;
        let theo = match map.get("theo") {
            None | Some(Value::Null) => None,
            Some(value) => Some(number_vec("theo", value)?),
        };
        let is_residual = match map.get("is_residual") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(flag)) => Some(*flag),
            Some(_) => {
                return Err(EnvelopeError::validation(
                    "is_residual",
                    "must be a single boolean",
                ))
            }
        };

        Ok(Self {
            r,
            obs,
            sim_m,
            theo,
            is_residual,
        })
    }

    /// Structural checks plus, unless `allow_nonfinite`, finiteness of every
    /// curve value. `r` must be finite in either mode.
    pub(crate) fn check(&self, allow_nonfinite: bool) -> Result<(), EnvelopeError> {
        let n_r = self.r.len();
        if n_r == 0 {
            return Err(EnvelopeError::validation(
                "r",
                "must contain at least one distance",
            ));
        }
        if !self.r.iter().all(|v| v.is_finite()) {
            return Err(EnvelopeError::validation("r", "must be finite"));
        }
        if self.obs.len() != n_r {
            return Err(EnvelopeError::validation(
                "obs",
                format!("has length {}, expected {n_r}", self.obs.len()),
            ));
        }
        if self.sim_m.nrows() != n_r {
            return Err(EnvelopeError::validation(
                "sim_m",
                format!("has {} rows, expected {n_r}", self.sim_m.nrows()),
            ));
        }
        if self.sim_m.ncols() == 0 {
            return Err(EnvelopeError::validation(
                "sim_m",
                "must hold at least one simulated curve",
            ));
        }
        if let Some(theo) = &self.theo {
            if theo.len() != n_r {
                return Err(EnvelopeError::validation(
                    "theo",
                    format!("has length {}, expected {n_r}", theo.len()),
                ));
            }
            if self.is_residual.unwrap_or(false) {
                return Err(EnvelopeError::validation(
                    "theo",
                    "a residual curve set must not carry a theoretical curve",
                ));
            }
        }

        if !allow_nonfinite {
            if !self.obs.iter().all(|v| v.is_finite()) {
                return Err(EnvelopeError::validation("obs", "must be finite"));
            }
            if !self.sim_m.iter().all(|v| v.is_finite()) {
                return Err(EnvelopeError::validation("sim_m", "must be finite"));
            }
            if let Some(theo) = &self.theo {
                if !theo.iter().all(|v| v.is_finite()) {
                    return Err(EnvelopeError::validation("theo", "must be finite"));
                }
            }
        }

        Ok(())
    }
}

/// Observed and simulated curves on a shared distance grid.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveSet {
    r: Vec<f64>,
    obs: Vec<f64>,
    sim_m: DMatrix<f64>,
    theo: Option<Vec<f64>>,
    is_residual: bool,
}

impl CurveSet {
    pub fn new(fields: CurveSetFields) -> Result<Self, EnvelopeError> {
        fields.check(false)?;
        debug!(
            n_r = fields.r.len(),
            n_sim = fields.sim_m.ncols(),
            has_theo = fields.theo.is_some(),
            "curve set validated"
        );
        Ok(Self {
            r: fields.r,
            obs: fields.obs,
            sim_m: fields.sim_m,
            theo: fields.theo,
            is_residual: fields.is_residual.unwrap_or(false),
        })
    }

    pub fn from_json_map(map: &Map<String, Value>) -> Result<Self, EnvelopeError> {
        Self::new(CurveSetFields::from_json_map(map)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, EnvelopeError> {
        Self::new(CurveSetFields::from_json_str(raw)?)
    }

    pub fn r(&self) -> &[f64] {
        &self.r
    }

    pub fn obs(&self) -> &[f64] {
        &self.obs
    }

    pub fn sim_m(&self) -> &DMatrix<f64> {
        &self.sim_m
    }

    pub fn theo(&self) -> Option<&[f64]> {
        self.theo.as_deref()
    }

    pub fn is_residual(&self) -> bool {
        self.is_residual
    }

    pub fn n_r(&self) -> usize {
        self.r.len()
    }

    pub fn n_sim(&self) -> usize {
        self.sim_m.ncols()
    }

    /// Simulated values at distance index `i`.
    pub fn sim_row(&self, i: usize) -> Vec<f64> {
        self.sim_m.row(i).iter().copied().collect()
    }

    /// Curve `idx` in measure order: 0 is the observed curve, `j + 1` is
    /// simulation `j`.
    pub fn curve(&self, idx: usize) -> Vec<f64> {
        if idx == 0 {
            self.obs.clone()
        } else {
            self.sim_m.column(idx - 1).iter().copied().collect()
        }
    }

    /// Value of curve `idx` (measure order) at distance index `i`.
    pub fn value(&self, idx: usize, i: usize) -> f64 {
        if idx == 0 {
            self.obs[i]
        } else {
            self.sim_m[(i, idx - 1)]
        }
    }

    pub fn into_fields(self) -> CurveSetFields {
        CurveSetFields {
            r: self.r,
            obs: self.obs,
            sim_m: self.sim_m,
            theo: self.theo,
            is_residual: Some(self.is_residual),
        }
    }
}

pub fn is_residual_curve_set(curve_set: &CurveSet) -> bool {
    curve_set.is_residual()
}

pub fn require_residual(curve_set: &CurveSet) -> Result<&CurveSet, EnvelopeError> {
    if curve_set.is_residual() {
        Ok(curve_set)
    } else {
        Err(EnvelopeError::NotResidual)
    }
}

fn required<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Value, EnvelopeError> {
    map.get(key)
        .ok_or_else(|| EnvelopeError::validation(key, "is required"))
}

fn number(field: &str, value: &Value) -> Result<f64, EnvelopeError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EnvelopeError::validation(field, "number out of range")),
        Value::Null => Ok(f64::NAN),
        _ => Err(EnvelopeError::validation(field, "must contain only numbers")),
    }
}

fn number_vec(field: &str, value: &Value) -> Result<Vec<f64>, EnvelopeError> {
    match value {
        Value::Array(items) => items.iter().map(|item| number(field, item)).collect(),
        _ => Err(EnvelopeError::validation(field, "must be an array of numbers")),
    }
}

fn number_rows(field: &str, value: &Value) -> Result<DMatrix<f64>, EnvelopeError> {
    let Value::Array(rows) = value else {
        return Err(EnvelopeError::validation(
            field,
            "must be an array of rows, one per distance",
        ));
    };

    let mut parsed = Vec::with_capacity(rows.len());
    for row in rows {
        parsed.push(number_vec(field, row)?);
    }

    let n_cols = parsed.first().map_or(0, Vec::len);
    if let Some((i, row)) = parsed.iter().enumerate().find(|(_, row)| row.len() != n_cols) {
        return Err(EnvelopeError::validation(
            field,
            format!("row {i} has {} values, expected {n_cols}", row.len()),
        ));
    }

    Ok(DMatrix::from_fn(parsed.len(), n_cols, |i, j| parsed[i][j]))
}

#[cfg(test)]
mod tests {
    use super::{require_residual, CurveSet, CurveSetFields};
    use crate::EnvelopeError;
    use nalgebra::DMatrix;
    use serde_json::json;

    fn fields() -> CurveSetFields {
        CurveSetFields::new(
            vec![1.0, 2.0, 3.0],
            vec![0.5, 1.0, 1.5],
            DMatrix::from_row_slice(3, 2, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]),
        )
    }

    fn field_of(err: EnvelopeError) -> String {
        match err {
            EnvelopeError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn valid_fields_build_a_curve_set() {
        let cs = CurveSet::new(fields()).unwrap();
        assert_eq!(cs.n_r(), 3);
        assert_eq!(cs.n_sim(), 2);
        assert!(!cs.is_residual());
        assert_eq!(cs.curve(2), vec![0.2, 0.4, 0.6]);
        assert_eq!(cs.value(0, 1), 1.0);
    }

    #[test]
    fn sim_m_row_mismatch_names_sim_m() {
        let mut f = fields();
        f.sim_m = DMatrix::zeros(2, 2);
        assert_eq!(field_of(CurveSet::new(f).unwrap_err()), "sim_m");
    }

    #[test]
    fn empty_simulations_are_rejected() {
        let mut f = fields();
        f.sim_m = DMatrix::zeros(3, 0);
        assert_eq!(field_of(CurveSet::new(f).unwrap_err()), "sim_m");
    }

    #[test]
    fn residual_with_theo_is_rejected() {
        let f = fields().with_theo(vec![0.0; 3]).with_residual(true);
        assert_eq!(field_of(CurveSet::new(f).unwrap_err()), "theo");
    }

    #[test]
    fn non_finite_obs_is_rejected() {
        let mut f = fields();
        f.obs[1] = f64::INFINITY;
        assert_eq!(field_of(CurveSet::new(f).unwrap_err()), "obs");
    }

    #[test]
    fn json_map_rejects_unknown_keys() {
        let value = json!({
            "r": [1.0], "obs": [1.0], "sim_m": [[1.0]], "extra": 3
        });
        let err = CurveSet::from_json_map(value.as_object().unwrap()).unwrap_err();
        assert_eq!(field_of(err), "extra");
    }

    #[test]
    fn json_map_rejects_vector_residual_flag() {
        let value = json!({
            "r": [1.0], "obs": [1.0], "sim_m": [[1.0]], "is_residual": [true, false]
        });
        let err = CurveSet::from_json_map(value.as_object().unwrap()).unwrap_err();
        assert_eq!(field_of(err), "is_residual");
    }

    #[test]
    fn json_map_rejects_ragged_rows() {
        let value = json!({
            "r": [1.0, 2.0], "obs": [1.0, 2.0], "sim_m": [[1.0, 2.0], [3.0]]
        });
        let err = CurveSet::from_json_map(value.as_object().unwrap()).unwrap_err();
        assert_eq!(field_of(err), "sim_m");
    }

    #[test]
    fn json_rows_are_distances() {
        let value = json!({
            "r": [1.0, 2.0], "obs": [1.0, 2.0], "sim_m": [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
        });
        let cs = CurveSet::from_json_map(value.as_object().unwrap()).unwrap();
        assert_eq!(cs.n_sim(), 3);
        assert_eq!(cs.sim_row(1), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn require_residual_checks_flag() {
        let cs = CurveSet::new(fields()).unwrap();
        assert!(matches!(
            require_residual(&cs),
            Err(EnvelopeError::NotResidual)
        ));
        let residual = CurveSet::new(fields().with_residual(true)).unwrap();
        assert!(require_residual(&residual).is_ok());
    }
}
