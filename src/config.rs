use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::methods::{Alternative, Method};
use crate::ops::Reference;
use crate::p_value::TieMethod;
use crate::EnvelopeError;

/// Curve the scaled methods measure deviations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceChoice {
    #[default]
    TheoreticalOrMean,
    Theoretical,
    Mean,
}

impl From<ReferenceChoice> for Reference {
    fn from(choice: ReferenceChoice) -> Self {
        match choice {
            ReferenceChoice::TheoreticalOrMean => Reference::TheoreticalOrMean,
            ReferenceChoice::Theoretical => Reference::Theoretical,
            ReferenceChoice::Mean => Reference::Mean,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    #[serde_as(as = "DefaultOnNull")]
    pub method: Method,
    #[serde_as(as = "DefaultOnNull")]
    pub alpha: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub alternative: Alternative,
    #[serde_as(as = "DefaultOnNull")]
    pub ties: TieMethod,
    pub r_min: Option<f64>,
    pub r_max: Option<f64>,
    #[serde_as(as = "DefaultOnNull")]
    pub reference: ReferenceChoice,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            method: Method::Rank,
            alpha: 0.05,
            alternative: Alternative::TwoSided,
            ties: TieMethod::Conservative,
            r_min: None,
            r_max: None,
            reference: ReferenceChoice::TheoreticalOrMean,
        }
    }
}

impl EnvelopeConfig {
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(EnvelopeError::InvalidConfig(format!(
                "alpha must lie in (0, 1), got {}",
                self.alpha
            )));
        }

        if let Method::DirectionalQuantile { probs: [lo, hi] } = self.method {
            if !(lo > 0.0 && lo < hi && hi < 1.0) {
                return Err(EnvelopeError::InvalidConfig(format!(
                    "probs must satisfy 0 < lo < hi < 1, got [{lo}, {hi}]"
                )));
            }
        }

        let bounds = [self.r_min, self.r_max];
        if bounds.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EnvelopeError::InvalidConfig(
                "r_min and r_max must be finite".to_string(),
            ));
        }

        if let (Some(r_min), Some(r_max)) = (self.r_min, self.r_max) {
            if r_max < r_min {
                return Err(EnvelopeError::InvalidConfig(
                    "r_max must be greater than or equal to r_min".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self, EnvelopeError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{EnvelopeConfig, ReferenceChoice};
    use crate::methods::{Alternative, Method};
    use crate::p_value::TieMethod;
    use crate::EnvelopeError;

    #[test]
    fn nulls_fall_back_to_defaults() {
        let config = EnvelopeConfig::from_json_str(
            r#"{"alpha": null, "method": {"type": "studentized"}, "ties": "midrank"}"#,
        )
        .unwrap();
        assert!((config.alpha - 0.05).abs() < 1e-12);
        assert_eq!(config.method, Method::Studentized);
        assert_eq!(config.ties, TieMethod::MidRank);
        assert_eq!(config.alternative, Alternative::TwoSided);
        assert_eq!(config.reference, ReferenceChoice::TheoreticalOrMean);
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        let config = EnvelopeConfig {
            alpha: 1.0,
            ..EnvelopeConfig::default()
        };
        assert!(matches!(config.validate(), Err(EnvelopeError::InvalidConfig(_))));
    }

    #[test]
    fn inverted_crop_bounds_are_rejected() {
        let config = EnvelopeConfig {
            r_min: Some(2.0),
            r_max: Some(1.0),
            ..EnvelopeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn probs_must_be_increasing() {
        let config = EnvelopeConfig {
            method: Method::DirectionalQuantile { probs: [0.9, 0.1] },
            ..EnvelopeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn alternative_uses_dotted_name() {
        let config: EnvelopeConfig = serde_json::from_str(r#"{"alternative": "two.sided"}"#).unwrap();
        assert_eq!(config.alternative, Alternative::TwoSided);
        let json = serde_json::to_string(&EnvelopeConfig::default()).unwrap();
        assert!(json.contains("\"two.sided\""));
    }
}
