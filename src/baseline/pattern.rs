//! Distribution-shaped baseline views: weekly pattern and personal zones

use crate::stats::descriptive::sorted_copy;
use crate::stats::{mean, percentile};
use crate::types::{DailyAggregate, MetricType, Polarity};
use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

/// Day of week, Monday first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// Average deviation of one weekday from the overall mean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayDeviation {
    pub day: DayOfWeek,
    pub deviation: f64,
    pub sample_count: usize,
}

/// Per-weekday deviations; weekdays without data are omitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPattern {
    pub metric_type: MetricType,
    pub overall_mean: f64,
    pub days: Vec<DayDeviation>,
}

impl WeeklyPattern {
    pub(crate) fn from_days(metric: &MetricType, days: &[&DailyAggregate]) -> Option<Self> {
        let values: Vec<f64> = days.iter().map(|d| d.value).collect();
        let overall_mean = mean(&values)?;

        let mut buckets: [Vec<f64>; 7] = Default::default();
        for day in days {
            let slot = DayOfWeek::from(day.date.weekday()) as usize;
            buckets[slot].push(day.value);
        }

        let days = DayOfWeek::ALL
            .iter()
            .zip(buckets.iter())
            .filter_map(|(&day, bucket)| {
                mean(bucket).map(|m| DayDeviation {
                    day,
                    deviation: m - overall_mean,
                    sample_count: bucket.len(),
                })
            })
            .collect();

        Some(Self {
            metric_type: metric.clone(),
            overall_mean,
            days,
        })
    }

    /// Deviation for a weekday, if it had data
    pub fn deviation_for(&self, day: DayOfWeek) -> Option<f64> {
        self.days.iter().find(|d| d.day == day).map(|d| d.deviation)
    }
}

/// Percentile cut points, in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneCutPoints {
    /// Upper edge of the low band
    pub low: f64,
    /// Lower edge of the high band
    pub high: f64,
    /// Outer edge of the optimal band (P90 for higher-is-better, P10 otherwise)
    pub optimal_outer: f64,
}

impl Default for ZoneCutPoints {
    fn default() -> Self {
        Self {
            low: 25.0,
            high: 75.0,
            optimal_outer: 90.0,
        }
    }
}

/// Closed value interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneRange {
    pub lower: f64,
    pub upper: f64,
}

impl ZoneRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Band a value falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneBand {
    Low,
    Normal,
    High,
    Optimal,
}

/// Value bands derived from the individual's own distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalZones {
    pub metric_type: MetricType,
    pub low: ZoneRange,
    pub normal: ZoneRange,
    pub high: ZoneRange,
    pub optimal: ZoneRange,
    pub sample_count: usize,
}

impl PersonalZones {
    pub(crate) fn from_values(
        metric: &MetricType,
        values: &[f64],
        cuts: &ZoneCutPoints,
    ) -> Option<Self> {
        let sorted = sorted_copy(values);
        let min = *sorted.first()?;
        let max = *sorted.last()?;
        let p_low = percentile(&sorted, cuts.low)?;
        let p_high = percentile(&sorted, cuts.high)?;

        let optimal = match metric.polarity() {
            Polarity::HigherIsBetter => ZoneRange {
                lower: p_high,
                upper: percentile(&sorted, cuts.optimal_outer)?,
            },
            Polarity::LowerIsBetter => ZoneRange {
                lower: percentile(&sorted, 100.0 - cuts.optimal_outer)?,
                upper: p_low,
            },
        };

        Some(Self {
            metric_type: metric.clone(),
            low: ZoneRange {
                lower: min,
                upper: p_low,
            },
            normal: ZoneRange {
                lower: p_low,
                upper: p_high,
            },
            high: ZoneRange {
                lower: p_high,
                upper: max,
            },
            optimal,
            sample_count: values.len(),
        })
    }

    /// Band for a value. The optimal band takes precedence.
    pub fn classify(&self, value: f64) -> ZoneBand {
        if self.optimal.contains(value) {
            ZoneBand::Optimal
        } else if value < self.normal.lower {
            ZoneBand::Low
        } else if value > self.normal.upper {
            ZoneBand::High
        } else {
            ZoneBand::Normal
        }
    }
}
