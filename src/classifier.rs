//! Signal classifier
//!
//! Labels a metric's recent behaviour relative to its own baseline as
//! improving, declining, stable or volatile, with a confidence that grows with
//! baseline size and deviation magnitude.

use crate::baseline::{window_values, MultiWindowBaseline};
use crate::changepoint::{detect_changepoints, ChangepointConfig};
use crate::stats::{mean, sample_std_dev, VARIANCE_FLOOR};
use crate::types::{days_before, ConfidenceLevel, DailyAggregate, Limitation, MetricType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Recent window compared against the baseline
pub const DEFAULT_RECENT_WINDOW_DAYS: u32 = 7;
/// Below this many recent points the class is insufficient_data
pub const DEFAULT_MIN_RECENT_SAMPLES: usize = 3;
/// Recent points needed before a directional class is emitted
pub const DEFAULT_MIN_DIRECTIONAL_SAMPLES: usize = 5;
/// |deviation| in baseline SDs needed for a directional class
pub const DEFAULT_MIN_DEVIATION: f64 = 1.0;
/// Recent CV at or above which a non-directional signal is volatile
pub const DEFAULT_VOLATILE_CV: f64 = 0.20;

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub recent_window_days: u32,
    pub min_recent_samples: usize,
    pub min_directional_samples: usize,
    pub min_deviation: f64,
    pub volatile_cv: f64,
    /// Baseline size at which the sample-count half of confidence saturates
    pub full_confidence_samples: usize,
    /// |deviation| at which the magnitude half of confidence saturates
    pub full_confidence_deviation: f64,
    /// History searched for regime shifts
    pub regime_lookback_days: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            recent_window_days: DEFAULT_RECENT_WINDOW_DAYS,
            min_recent_samples: DEFAULT_MIN_RECENT_SAMPLES,
            min_directional_samples: DEFAULT_MIN_DIRECTIONAL_SAMPLES,
            min_deviation: DEFAULT_MIN_DEVIATION,
            volatile_cv: DEFAULT_VOLATILE_CV,
            full_confidence_samples: 21,
            full_confidence_deviation: 2.0,
            regime_lookback_days: 90,
        }
    }
}

/// Trend class of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    Improving,
    Declining,
    Stable,
    Volatile,
    InsufficientData,
}

impl SignalClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalClass::Improving => "improving",
            SignalClass::Declining => "declining",
            SignalClass::Stable => "stable",
            SignalClass::Volatile => "volatile",
            SignalClass::InsufficientData => "insufficient_data",
        }
    }
}

/// Classification of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalClassification {
    pub metric_type: MetricType,
    pub class: SignalClass,
    /// In [0, 1]
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    /// Recent mean minus baseline mean, in baseline SDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_mean: Option<f64>,
    pub recent_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_window_days: Option<u32>,
    /// Latest regime change detected inside the recent window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime_shift_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limitations: Vec<Limitation>,
}

/// Confidence from baseline size and deviation magnitude.
///
/// Non-decreasing in both arguments and capped at 1.
pub fn confidence_score(baseline_count: usize, deviation: f64, config: &ClassifierConfig) -> f64 {
    let count_part =
        (baseline_count as f64 / config.full_confidence_samples.max(1) as f64).min(1.0);
    let magnitude_part = (deviation.abs() / config.full_confidence_deviation).min(1.0);
    (0.5 * count_part + 0.5 * magnitude_part).clamp(0.0, 1.0)
}

/// Signal classifier
#[derive(Debug, Clone, Default)]
pub struct SignalClassifier {
    config: ClassifierConfig,
    changepoint: ChangepointConfig,
}

impl SignalClassifier {
    pub fn new(config: ClassifierConfig, changepoint: ChangepointConfig) -> Self {
        Self {
            config,
            changepoint,
        }
    }

    /// Classify the recent window of `daily` against `baselines`
    pub fn classify(
        &self,
        metric: &MetricType,
        daily: &[DailyAggregate],
        baselines: &MultiWindowBaseline,
    ) -> SignalClassification {
        let as_of = baselines.as_of;
        let recent = window_values(daily, as_of, self.config.recent_window_days);

        if recent.len() < self.config.min_recent_samples {
            return self.insufficient(
                metric,
                recent.len(),
                Limitation::InsufficientData {
                    required: self.config.min_recent_samples,
                    available: recent.len(),
                    detail: format!(
                        "fewer than {} readings in the last {} days",
                        self.config.min_recent_samples, self.config.recent_window_days
                    ),
                },
            );
        }

        let Some(reference) = baselines.reference() else {
            return self.insufficient(
                metric,
                recent.len(),
                Limitation::InsufficientData {
                    required: 2,
                    available: 0,
                    detail: "no baseline window has two readings".to_string(),
                },
            );
        };

        let recent_mean = mean(&recent).unwrap_or(reference.mean);
        let deviation =
            (recent_mean - reference.mean) / reference.std_dev.max(VARIANCE_FLOOR.sqrt());
        let directional = recent.len() >= self.config.min_directional_samples
            && deviation.abs() >= self.config.min_deviation;

        let class = if directional {
            if metric.polarity().is_improvement(deviation) {
                SignalClass::Improving
            } else {
                SignalClass::Declining
            }
        } else if self.recent_cv(&recent, recent_mean) >= self.config.volatile_cv {
            SignalClass::Volatile
        } else {
            SignalClass::Stable
        };

        let confidence = confidence_score(reference.sample_count, deviation, &self.config);
        tracing::debug!(
            metric = metric.as_str(),
            class = class.as_str(),
            deviation,
            confidence,
            "signal classified"
        );

        SignalClassification {
            metric_type: metric.clone(),
            class,
            confidence,
            confidence_level: ConfidenceLevel::from_score(confidence),
            deviation: Some(deviation),
            recent_mean: Some(recent_mean),
            recent_count: recent.len(),
            baseline_window_days: Some(reference.window_days),
            regime_shift_date: self.recent_regime_shift(daily, as_of),
            limitations: Vec::new(),
        }
    }

    fn recent_cv(&self, recent: &[f64], recent_mean: f64) -> f64 {
        match sample_std_dev(recent) {
            Some(std) if recent_mean != 0.0 => std / recent_mean.abs(),
            _ => 0.0,
        }
    }

    /// Date of the latest changepoint inside the recent window, if any
    fn recent_regime_shift(&self, daily: &[DailyAggregate], as_of: NaiveDate) -> Option<NaiveDate> {
        let lookback_start = days_before(as_of, self.config.regime_lookback_days);
        let history: Vec<&DailyAggregate> = daily
            .iter()
            .filter(|d| d.date > lookback_start && d.date <= as_of)
            .collect();
        let values: Vec<f64> = history.iter().map(|d| d.value).collect();
        let posterior = detect_changepoints(&values, &self.changepoint)?;

        let recent_start = days_before(as_of, self.config.recent_window_days);
        posterior
            .changepoints
            .iter()
            .rev()
            .map(|&index| history[index].date)
            .find(|date| *date > recent_start)
    }

    fn insufficient(
        &self,
        metric: &MetricType,
        recent_count: usize,
        limitation: Limitation,
    ) -> SignalClassification {
        SignalClassification {
            metric_type: metric.clone(),
            class: SignalClass::InsufficientData,
            confidence: 0.0,
            confidence_level: ConfidenceLevel::Low,
            deviation: None,
            recent_mean: None,
            recent_count,
            baseline_window_days: None,
            regime_shift_date: None,
            limitations: vec![limitation],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::tests::{date, make_daily, make_rhr_drop};
    use crate::baseline::BaselineEngine;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn classify(metric: MetricType, daily: &[DailyAggregate], as_of: i64) -> SignalClassification {
        let baselines = BaselineEngine::default().multi_window(&metric, daily, date(as_of));
        SignalClassifier::default().classify(&metric, daily, &baselines)
    }

    #[test]
    fn test_resting_heart_rate_drop_is_improving() {
        let daily = make_rhr_drop();
        let result = classify(MetricType::RestingHeartRate, &daily, 27);

        assert_eq!(result.class, SignalClass::Improving);
        assert_eq!(result.confidence_level, ConfidenceLevel::High);
        assert_eq!(result.baseline_window_days, Some(28));
        assert!(result.deviation.unwrap() < -1.0);
    }

    #[test]
    fn test_hrv_drop_is_declining() {
        let mut values: Vec<f64> = (0..21).map(|i| if i % 2 == 0 { 48.0 } else { 52.0 }).collect();
        values.extend([40.0; 7]);
        let daily = make_daily(MetricType::HeartRateVariability, &values);
        let result = classify(MetricType::HeartRateVariability, &daily, 27);
        assert_eq!(result.class, SignalClass::Declining);
    }

    #[test]
    fn test_too_few_recent_points() {
        let daily = make_daily(MetricType::Steps, &[8000.0, 9000.0]);
        let result = classify(MetricType::Steps, &daily, 1);
        assert_eq!(result.class, SignalClass::InsufficientData);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.limitations.len(), 1);
    }

    #[test]
    fn test_small_deviation_is_stable() {
        let values: Vec<f64> = (0..28).map(|i| if i % 2 == 0 { 59.0 } else { 61.0 }).collect();
        let daily = make_daily(MetricType::RestingHeartRate, &values);
        let result = classify(MetricType::RestingHeartRate, &daily, 27);
        assert_eq!(result.class, SignalClass::Stable);
    }

    #[test]
    fn test_directional_needs_five_recent_points() {
        // Only four readings in the final week, far below the baseline
        let mut daily = make_daily(
            MetricType::RestingHeartRate,
            &(0..21).map(|i| if i % 2 == 0 { 58.0 } else { 62.0 }).collect::<Vec<_>>(),
        );
        for offset in [24, 25, 26, 27] {
            daily.push(DailyAggregate {
                date: date(offset),
                metric_type: MetricType::RestingHeartRate,
                value: 50.0,
                sample_count: 1,
            });
        }
        let result = classify(MetricType::RestingHeartRate, &daily, 27);
        assert_ne!(result.class, SignalClass::Improving);
        assert_eq!(result.recent_count, 4);
    }

    #[test]
    fn test_swinging_recent_window_is_volatile() {
        let mut values = vec![100.0; 21];
        values.extend([60.0, 140.0, 70.0, 130.0, 65.0, 135.0, 100.0]);
        let daily = make_daily(MetricType::Steps, &values);
        let result = classify(MetricType::Steps, &daily, 27);
        assert_eq!(result.class, SignalClass::Volatile);
    }

    #[test]
    fn test_regime_shift_in_recent_window() {
        let values: Vec<f64> = (0..60)
            .map(|i| {
                let jitter = ((i * 7) % 5) as f64 * 0.5 - 1.0;
                if i < 55 { 50.0 + jitter } else { 60.0 + jitter }
            })
            .collect();
        let daily = make_daily(MetricType::Steps, &values);
        let result = classify(MetricType::Steps, &daily, 59);
        assert_eq!(result.regime_shift_date, Some(date(55)));
    }

    proptest! {
        #[test]
        fn prop_confidence_monotone_in_sample_count(
            n in 0usize..200,
            extra in 0usize..50,
            deviation in -5.0f64..5.0,
        ) {
            let config = ClassifierConfig::default();
            let lower = confidence_score(n, deviation, &config);
            let higher = confidence_score(n + extra, deviation, &config);
            prop_assert!(higher >= lower);
            prop_assert!(higher <= 1.0);
        }

        #[test]
        fn prop_confidence_monotone_in_magnitude(
            n in 0usize..60,
            a in 0.0f64..5.0,
            b in 0.0f64..5.0,
        ) {
            let config = ClassifierConfig::default();
            let (small, large) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(confidence_score(n, -large, &config) >= confidence_score(n, small, &config));
        }
    }
}
