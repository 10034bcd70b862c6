//! Descriptive before/after correlation
//!
//! Compares a metric's mean in symmetric windows around an intervention start
//! and phrases the change with the metric's polarity in mind.

use crate::changepoint::{detect_changepoints, ChangepointConfig};
use crate::schema::InterventionRecord;
use crate::stats::mean;
use crate::types::{days_after, days_before, ConfidenceLevel, DailyAggregate, MetricType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Days on each side of the intervention start
pub const DEFAULT_CORRELATION_WINDOW_DAYS: u32 = 14;
/// Points required on each side
pub const DEFAULT_MIN_POINTS_PER_SIDE: usize = 3;
/// |percent change| below this is treated as noise
pub const DEFAULT_MIN_PERCENT_CHANGE: f64 = 2.0;

/// Correlation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub window_days: u32,
    pub min_points_per_side: usize,
    pub min_percent_change: f64,
    /// Combined points for high confidence
    pub high_confidence_points: usize,
    /// Combined points for medium confidence
    pub medium_confidence_points: usize,
    /// A changepoint this close to the start is reported
    pub regime_shift_tolerance_days: i64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_CORRELATION_WINDOW_DAYS,
            min_points_per_side: DEFAULT_MIN_POINTS_PER_SIDE,
            min_percent_change: DEFAULT_MIN_PERCENT_CHANGE,
            high_confidence_points: 20,
            medium_confidence_points: 10,
            regime_shift_tolerance_days: 3,
        }
    }
}

/// Before/after comparison of one metric around an intervention start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub intervention_id: String,
    pub metric_type: MetricType,
    pub before_avg: f64,
    pub after_avg: f64,
    pub delta: f64,
    pub percent_change: f64,
    pub before_count: usize,
    pub after_count: usize,
    pub confidence: ConfidenceLevel,
    /// Whether the change is an improvement for this metric's polarity
    pub improved: bool,
    /// Whether a regime shift was detected close to the start date
    pub regime_shift_near_start: bool,
    pub insight: String,
}

/// Before/after correlation analyzer
#[derive(Debug, Clone, Default)]
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
    changepoint: ChangepointConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: CorrelationConfig, changepoint: ChangepointConfig) -> Self {
        Self {
            config,
            changepoint,
        }
    }

    /// Compare `[start - N, start)` against `[start, start + N)`.
    ///
    /// Returns `None` when either side is too sparse, the before mean is zero,
    /// or the change is below the noise floor.
    pub fn correlate(
        &self,
        intervention: &InterventionRecord,
        metric: &MetricType,
        daily: &[DailyAggregate],
    ) -> Option<CorrelationResult> {
        let start = intervention.start_date;
        let first = days_before(start, self.config.window_days);
        let end = days_after(start, self.config.window_days);

        let window: Vec<&DailyAggregate> = daily
            .iter()
            .filter(|d| d.date >= first && d.date < end)
            .collect();
        let before: Vec<f64> = window.iter().filter(|d| d.date < start).map(|d| d.value).collect();
        let after: Vec<f64> = window.iter().filter(|d| d.date >= start).map(|d| d.value).collect();

        if before.len() < self.config.min_points_per_side
            || after.len() < self.config.min_points_per_side
        {
            tracing::debug!(
                metric = metric.as_str(),
                before = before.len(),
                after = after.len(),
                "correlation skipped: too few points"
            );
            return None;
        }

        let before_avg = mean(&before)?;
        let after_avg = mean(&after)?;
        if before_avg == 0.0 {
            return None;
        }

        let delta = after_avg - before_avg;
        let percent_change = delta / before_avg.abs() * 100.0;
        if percent_change.abs() < self.config.min_percent_change {
            return None;
        }

        let combined = before.len() + after.len();
        let confidence = if combined >= self.config.high_confidence_points {
            ConfidenceLevel::High
        } else if combined >= self.config.medium_confidence_points {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };

        let improved = metric.polarity().is_improvement(delta);
        let insight = describe_change(
            metric,
            &intervention.canonical_name,
            before_avg,
            after_avg,
            percent_change,
        );

        Some(CorrelationResult {
            intervention_id: intervention.id.clone(),
            metric_type: metric.clone(),
            before_avg,
            after_avg,
            delta,
            percent_change,
            before_count: before.len(),
            after_count: after.len(),
            confidence,
            improved,
            regime_shift_near_start: self.regime_shift_near(&window, start),
            insight,
        })
    }

    /// Correlate every metric, largest |percent change| first
    pub fn correlate_all(
        &self,
        intervention: &InterventionRecord,
        histories: &BTreeMap<MetricType, Vec<DailyAggregate>>,
    ) -> Vec<CorrelationResult> {
        let mut results: Vec<CorrelationResult> = histories
            .iter()
            .filter_map(|(metric, daily)| self.correlate(intervention, metric, daily))
            .collect();
        results.sort_by(|a, b| b.percent_change.abs().total_cmp(&a.percent_change.abs()));
        results
    }

    fn regime_shift_near(&self, window: &[&DailyAggregate], start: NaiveDate) -> bool {
        let values: Vec<f64> = window.iter().map(|d| d.value).collect();
        let Some(posterior) = detect_changepoints(&values, &self.changepoint) else {
            return false;
        };
        posterior.changepoints.iter().any(|&index| {
            (window[index].date - start).num_days().abs() <= self.config.regime_shift_tolerance_days
        })
    }
}

/// Human-readable form of a canonical intervention name
pub(crate) fn humanize(name: &str) -> String {
    name.replace(['_', '-'], " ")
}

fn format_value(value: f64) -> String {
    if value.abs() >= 100.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

/// Polarity-correct one-line description of a before/after change
fn describe_change(
    metric: &MetricType,
    intervention_name: &str,
    before: f64,
    after: f64,
    percent_change: f64,
) -> String {
    let verb = if after > before { "rose" } else { "dropped" };
    let unit = match metric.unit_label() {
        "" => String::new(),
        "%" => "%".to_string(),
        label => format!(" {}", label),
    };
    let assessment = if metric.polarity().is_improvement(after - before) {
        "an improvement"
    } else {
        "a change in the wrong direction"
    };
    format!(
        "{} {} {:.1}% (from {}{} to {}{}) since starting {}, {}.",
        metric.display_name(),
        verb,
        percent_change.abs(),
        format_value(before),
        unit,
        format_value(after),
        unit,
        humanize(intervention_name),
        assessment
    )
}
