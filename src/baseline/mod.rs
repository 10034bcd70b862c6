//! Baseline engine
//!
//! Rolling statistics over trailing windows of daily aggregates, plus the
//! derived views built on them: weekly pattern, personal zones, volatility
//! and momentum. Baselines enable relative interpretation of daily values.
//!
//! A window of `W` days ending at `as_of` covers dates in `(as_of - W, as_of]`.
//! A window with fewer than two values has no baseline at all.

mod pattern;

pub use pattern::*;

use crate::stats::{mean, sample_std_dev, VARIANCE_FLOOR};
use crate::types::{days_before, DailyAggregate, MetricType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Short trailing window in days
pub const SHORT_WINDOW_DAYS: u32 = 7;
/// Medium trailing window in days
pub const MEDIUM_WINDOW_DAYS: u32 = 28;
/// Long trailing window in days
pub const LONG_WINDOW_DAYS: u32 = 90;
/// Fewer samples than this and a window has no baseline
pub const MIN_BASELINE_SAMPLES: usize = 2;
/// Samples needed in the long window for weekly patterns and zones
pub const MIN_DISTRIBUTION_SAMPLES: usize = 14;

/// Baseline engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub short_window_days: u32,
    pub medium_window_days: u32,
    pub long_window_days: u32,
    pub min_pattern_samples: usize,
    pub min_zone_samples: usize,
    pub zone_cut_points: ZoneCutPoints,
    /// Upper CV bounds for very_stable, stable and moderate
    pub stability_cv_bounds: [f64; 3],
    pub momentum_window_days: u32,
    pub momentum_min_points: usize,
    /// |score| below this is steady
    pub momentum_steady_threshold: f64,
    pub momentum_clamp: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            short_window_days: SHORT_WINDOW_DAYS,
            medium_window_days: MEDIUM_WINDOW_DAYS,
            long_window_days: LONG_WINDOW_DAYS,
            min_pattern_samples: MIN_DISTRIBUTION_SAMPLES,
            min_zone_samples: MIN_DISTRIBUTION_SAMPLES,
            zone_cut_points: ZoneCutPoints::default(),
            stability_cv_bounds: [0.05, 0.10, 0.20],
            momentum_window_days: 7,
            momentum_min_points: 2,
            momentum_steady_threshold: 0.5,
            momentum_clamp: 10.0,
        }
    }
}

/// Mean, spread and count of one trailing window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub window_days: u32,
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: usize,
}

impl WindowStats {
    /// Statistics over `values`, absent below two values
    pub fn from_values(window_days: u32, values: &[f64]) -> Option<Self> {
        if values.len() < MIN_BASELINE_SAMPLES {
            return None;
        }
        Some(Self {
            window_days,
            mean: mean(values)?,
            std_dev: sample_std_dev(values)?,
            sample_count: values.len(),
        })
    }

    /// Coefficient of variation, undefined for a zero mean
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        if self.mean == 0.0 {
            return None;
        }
        Some(self.std_dev / self.mean.abs())
    }
}

/// Baselines for the three trailing windows of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiWindowBaseline {
    pub metric_type: MetricType,
    pub as_of: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_7d: Option<WindowStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_28d: Option<WindowStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_90d: Option<WindowStats>,
}

impl MultiWindowBaseline {
    /// Medium window, falling back to the short one
    pub fn reference(&self) -> Option<&WindowStats> {
        self.baseline_28d.as_ref().or(self.baseline_7d.as_ref())
    }

    /// Medium window, falling back to the long one
    pub fn momentum_reference(&self) -> Option<&WindowStats> {
        self.baseline_28d.as_ref().or(self.baseline_90d.as_ref())
    }
}

/// Daily values whose date lies in `(as_of - days, as_of]`
pub fn window_values(daily: &[DailyAggregate], as_of: NaiveDate, days: u32) -> Vec<f64> {
    let start = days_before(as_of, days);
    daily
        .iter()
        .filter(|d| d.date > start && d.date <= as_of)
        .map(|d| d.value)
        .collect()
}

/// Stability tier of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityTier {
    VeryStable,
    Stable,
    Moderate,
    Volatile,
    /// Coefficient of variation is undefined (zero mean)
    Undefined,
}

/// Day-to-day variability of a metric over the medium window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricVolatility {
    pub metric_type: MetricType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficient_of_variation: Option<f64>,
    pub tier: StabilityTier,
}

/// Direction of recent movement relative to the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumDirection {
    Improving,
    Declining,
    Steady,
}

/// Polarity-aware recent movement in standard-deviation units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendMomentum {
    pub metric_type: MetricType,
    pub direction: MomentumDirection,
    /// |score|
    pub magnitude: f64,
    /// Positive means improvement for this metric's polarity
    pub score: f64,
    pub recent_mean: f64,
    pub baseline_mean: f64,
    pub recent_count: usize,
}

/// Everything the baseline engine derives for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineReport {
    pub baselines: MultiWindowBaseline,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_pattern: Option<WeeklyPattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<PersonalZones>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility: Option<MetricVolatility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub momentum: Option<TrendMomentum>,
}

/// Baseline engine over date-ordered daily aggregates of one metric
#[derive(Debug, Clone, Default)]
pub struct BaselineEngine {
    config: BaselineConfig,
}

impl BaselineEngine {
    pub fn new(config: BaselineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Compute all baseline views as of `as_of`
    pub fn report(
        &self,
        metric: &MetricType,
        daily: &[DailyAggregate],
        as_of: NaiveDate,
    ) -> BaselineReport {
        let baselines = self.multi_window(metric, daily, as_of);
        let volatility = self.volatility(&baselines);
        let momentum = self.momentum(metric, daily, &baselines);
        BaselineReport {
            weekly_pattern: self.weekly_pattern(metric, daily, as_of),
            zones: self.zones(metric, daily, as_of),
            volatility,
            momentum,
            baselines,
        }
    }

    /// Trailing 7/28/90-day baselines
    pub fn multi_window(
        &self,
        metric: &MetricType,
        daily: &[DailyAggregate],
        as_of: NaiveDate,
    ) -> MultiWindowBaseline {
        let stats = |days: u32| WindowStats::from_values(days, &window_values(daily, as_of, days));
        MultiWindowBaseline {
            metric_type: metric.clone(),
            as_of,
            baseline_7d: stats(self.config.short_window_days),
            baseline_28d: stats(self.config.medium_window_days),
            baseline_90d: stats(self.config.long_window_days),
        }
    }

    /// Coefficient of variation of the medium window, bucketed into tiers
    pub fn volatility(&self, baselines: &MultiWindowBaseline) -> Option<MetricVolatility> {
        let window = baselines.baseline_28d.as_ref()?;
        let cv = window.coefficient_of_variation();
        let [very_stable, stable, moderate] = self.config.stability_cv_bounds;
        let tier = match cv {
            None => StabilityTier::Undefined,
            Some(cv) if cv < very_stable => StabilityTier::VeryStable,
            Some(cv) if cv < stable => StabilityTier::Stable,
            Some(cv) if cv < moderate => StabilityTier::Moderate,
            Some(_) => StabilityTier::Volatile,
        };
        Some(MetricVolatility {
            metric_type: baselines.metric_type.clone(),
            coefficient_of_variation: cv,
            tier,
        })
    }

    /// Recent slice mean against the baseline mean, sign-flipped by polarity
    pub fn momentum(
        &self,
        metric: &MetricType,
        daily: &[DailyAggregate],
        baselines: &MultiWindowBaseline,
    ) -> Option<TrendMomentum> {
        let reference = baselines.momentum_reference()?;
        let recent = window_values(daily, baselines.as_of, self.config.momentum_window_days);
        if recent.len() < self.config.momentum_min_points {
            return None;
        }
        let recent_mean = mean(&recent)?;

        let spread = reference.std_dev.max(VARIANCE_FLOOR.sqrt());
        let clamp = self.config.momentum_clamp;
        let score = (metric.polarity().sign() * (recent_mean - reference.mean) / spread)
            .clamp(-clamp, clamp);

        let direction = if score.abs() < self.config.momentum_steady_threshold {
            MomentumDirection::Steady
        } else if score > 0.0 {
            MomentumDirection::Improving
        } else {
            MomentumDirection::Declining
        };

        Some(TrendMomentum {
            metric_type: metric.clone(),
            direction,
            magnitude: score.abs(),
            score,
            recent_mean,
            baseline_mean: reference.mean,
            recent_count: recent.len(),
        })
    }

    /// Day-of-week deviations over the long window
    pub fn weekly_pattern(
        &self,
        metric: &MetricType,
        daily: &[DailyAggregate],
        as_of: NaiveDate,
    ) -> Option<WeeklyPattern> {
        let start = days_before(as_of, self.config.long_window_days);
        let window: Vec<&DailyAggregate> = daily
            .iter()
            .filter(|d| d.date > start && d.date <= as_of)
            .collect();
        if window.len() < self.config.min_pattern_samples {
            return None;
        }
        WeeklyPattern::from_days(metric, &window)
    }

    /// Personal zones from the long-window distribution
    pub fn zones(
        &self,
        metric: &MetricType,
        daily: &[DailyAggregate],
        as_of: NaiveDate,
    ) -> Option<PersonalZones> {
        let values = window_values(daily, as_of, self.config.long_window_days);
        if values.len() < self.config.min_zone_samples {
            return None;
        }
        PersonalZones::from_values(metric, &values, &self.config.zone_cut_points)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    pub(crate) fn date(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    pub(crate) fn make_daily(metric: MetricType, values: &[f64]) -> Vec<DailyAggregate> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| DailyAggregate {
                date: date(i as i64),
                metric_type: metric.clone(),
                value,
                sample_count: 1,
            })
            .collect()
    }

    /// 21 days alternating 58/62 (mean 60, sd ~2), then 7 days at 54
    pub(crate) fn make_rhr_drop() -> Vec<DailyAggregate> {
        let mut values: Vec<f64> = (0..21).map(|i| if i % 2 == 0 { 58.0 } else { 62.0 }).collect();
        values.extend(std::iter::repeat(54.0).take(7));
        make_daily(MetricType::RestingHeartRate, &values)
    }

    #[test]
    fn test_windows_below_two_samples_are_absent() {
        let daily = make_daily(MetricType::Steps, &[8000.0]);
        let engine = BaselineEngine::default();
        let baselines = engine.multi_window(&MetricType::Steps, &daily, date(0));

        assert_eq!(baselines.baseline_7d, None);
        assert_eq!(baselines.baseline_28d, None);
        assert_eq!(baselines.baseline_90d, None);

        let json = serde_json::to_value(&baselines).unwrap();
        assert!(json.get("baseline_7d").is_none());
    }

    #[test]
    fn test_window_bounds_are_half_open() {
        let daily = make_daily(MetricType::Steps, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        // as_of = day 7, 7-day window covers days 1..=7
        let values = window_values(&daily, date(7), 7);
        assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_multi_window_stats() {
        let values: Vec<f64> = (0..90).map(|i| i as f64).collect();
        let daily = make_daily(MetricType::HeartRateVariability, &values);
        let engine = BaselineEngine::default();
        let baselines = engine.multi_window(&MetricType::HeartRateVariability, &daily, date(89));

        let short = baselines.baseline_7d.unwrap();
        assert_eq!(short.sample_count, 7);
        assert_eq!(short.mean, 86.0);
        assert_eq!(baselines.baseline_28d.unwrap().sample_count, 28);
        assert_eq!(baselines.baseline_90d.unwrap().sample_count, 90);
    }

    #[test]
    fn test_volatility_tiers() {
        let engine = BaselineEngine::default();
        let steady = make_daily(MetricType::SleepScore, &[80.0, 81.0, 79.0, 80.0]);
        let baselines = engine.multi_window(&MetricType::SleepScore, &steady, date(3));
        let volatility = engine.volatility(&baselines).unwrap();
        assert_eq!(volatility.tier, StabilityTier::VeryStable);

        let noisy = make_daily(MetricType::SleepScore, &[40.0, 90.0, 50.0, 85.0]);
        let baselines = engine.multi_window(&MetricType::SleepScore, &noisy, date(3));
        assert_eq!(
            engine.volatility(&baselines).unwrap().tier,
            StabilityTier::Volatile
        );
    }

    #[test]
    fn test_volatility_undefined_for_zero_mean() {
        let engine = BaselineEngine::default();
        let daily = make_daily(MetricType::Custom("balance".into()), &[-1.0, 1.0, -1.0, 1.0]);
        let baselines = engine.multi_window(&MetricType::Custom("balance".into()), &daily, date(3));
        let volatility = engine.volatility(&baselines).unwrap();
        assert_eq!(volatility.tier, StabilityTier::Undefined);
        assert_eq!(volatility.coefficient_of_variation, None);
    }

    #[test]
    fn test_momentum_lower_is_better_drop_is_improving() {
        let daily = make_rhr_drop();
        let engine = BaselineEngine::default();
        let report = engine.report(&MetricType::RestingHeartRate, &daily, date(27));

        let momentum = report.momentum.unwrap();
        assert_eq!(momentum.direction, MomentumDirection::Improving);
        assert!(momentum.score > 1.0);
        assert_eq!(momentum.recent_mean, 54.0);
        assert_eq!(momentum.recent_count, 7);
    }

    #[test]
    fn test_momentum_steady_and_clamped() {
        let engine = BaselineEngine::default();
        let flat = make_daily(MetricType::Steps, &[100.0; 28]);
        let baselines = engine.multi_window(&MetricType::Steps, &flat, date(27));
        let momentum = engine.momentum(&MetricType::Steps, &flat, &baselines).unwrap();
        assert_eq!(momentum.direction, MomentumDirection::Steady);

        let mut values = vec![100.0; 21];
        values.extend([200.0; 7]);
        let jump = make_daily(MetricType::Steps, &values);
        let baselines = engine.multi_window(&MetricType::Steps, &jump, date(27));
        let momentum = engine.momentum(&MetricType::Steps, &jump, &baselines).unwrap();
        assert_eq!(momentum.direction, MomentumDirection::Improving);
        assert!(momentum.score <= 10.0);
    }

    #[test]
    fn test_report_without_data() {
        let engine = BaselineEngine::default();
        let report = engine.report(&MetricType::Steps, &[], date(0));
        assert_eq!(report.weekly_pattern, None);
        assert_eq!(report.zones, None);
        assert_eq!(report.volatility, None);
        assert_eq!(report.momentum, None);
    }

    proptest! {
        #[test]
        fn prop_baselines_never_synthesized(
            values in proptest::collection::vec(1.0f64..200.0, 0..40),
            offset in 0i64..60,
        ) {
            let daily = make_daily(MetricType::Weight, &values);
            let engine = BaselineEngine::default();
            let baselines = engine.multi_window(&MetricType::Weight, &daily, date(offset));
            for (days, window) in [
                (7, baselines.baseline_7d),
                (28, baselines.baseline_28d),
                (90, baselines.baseline_90d),
            ] {
                let count = window_values(&daily, date(offset), days).len();
                prop_assert_eq!(window.is_some(), count >= 2);
                if let Some(stats) = window {
                    prop_assert_eq!(stats.sample_count, count);
                }
            }
        }
    }
}
