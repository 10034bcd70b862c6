//! Engine configuration
//!
//! One serializable record holding every component's thresholds. Fields
//! missing from a JSON document keep their defaults, so a config file only
//! needs the values it overrides.

use crate::baseline::BaselineConfig;
use crate::causal::CausalConfig;
use crate::changepoint::ChangepointConfig;
use crate::classifier::ClassifierConfig;
use crate::correlation::CorrelationConfig;
use crate::error::InsightError;
use crate::forecast::{ForecastConfig, MAX_HORIZON_DAYS};
use crate::verdict::VerdictConfig;
use serde::{Deserialize, Serialize};

/// Per-component configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub baseline: BaselineConfig,
    pub classifier: ClassifierConfig,
    pub correlation: CorrelationConfig,
    pub causal: CausalConfig,
    pub forecast: ForecastConfig,
    pub changepoint: ChangepointConfig,
    pub verdict: VerdictConfig,
}

impl EngineConfig {
    /// Load from JSON; absent sections and fields take default values
    pub fn from_json(json: &str) -> Result<Self, InsightError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| InsightError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, InsightError> {
        serde_json::to_string_pretty(self).map_err(|e| InsightError::EncodingError(e.to_string()))
    }

    /// Reject values the engines cannot run with
    pub fn validate(&self) -> Result<(), InsightError> {
        let hazard = self.changepoint.hazard_rate;
        if !(hazard > 0.0 && hazard < 1.0) {
            return Err(InsightError::invalid(
                "changepoint.hazard_rate",
                format!("must be in (0, 1), got {}", hazard),
            ));
        }
        if !(self.forecast.noise_variance > 0.0 && self.forecast.noise_variance.is_finite()) {
            return Err(InsightError::invalid(
                "forecast.noise_variance",
                "must be positive and finite",
            ));
        }
        if self.correlation.window_days == 0 {
            return Err(InsightError::invalid("correlation.window_days", "must be at least 1"));
        }
        if self.classifier.recent_window_days == 0 {
            return Err(InsightError::invalid(
                "classifier.recent_window_days",
                "must be at least 1",
            ));
        }
        if self.classifier.full_confidence_samples == 0 {
            return Err(InsightError::invalid(
                "classifier.full_confidence_samples",
                "must be at least 1",
            ));
        }
        let deviation = self.classifier.full_confidence_deviation;
        if !(deviation > 0.0 && deviation.is_finite()) {
            return Err(InsightError::invalid(
                "classifier.full_confidence_deviation",
                format!("must be positive and finite, got {}", deviation),
            ));
        }
        let min_change = self.correlation.min_percent_change;
        if !(min_change >= 0.0 && min_change.is_finite()) {
            return Err(InsightError::invalid(
                "correlation.min_percent_change",
                format!("must be non-negative and finite, got {}", min_change),
            ));
        }
        for (i, &h) in self.forecast.default_horizons_days.iter().enumerate() {
            if !(1..=MAX_HORIZON_DAYS).contains(&h) {
                return Err(InsightError::invalid(
                    format!("forecast.default_horizons_days[{}]", i),
                    format!("must be between 1 and {} days, got {}", MAX_HORIZON_DAYS, h),
                ));
            }
        }
        Ok(())
    }
}
