//! Core types shared across the inference engines
//!
//! This module defines the metric vocabulary (type, polarity, units), the
//! per-day aggregate every engine consumes, and the confidence/limitation
//! annotations attached to results.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// `date - days`, saturating at the earliest representable date
pub fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_signed(Duration::days(i64::from(days))).unwrap_or(NaiveDate::MIN)
}

/// `date + days`, saturating at the latest representable date
pub fn days_after(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_signed(Duration::days(i64::from(days))).unwrap_or(NaiveDate::MAX)
}

/// Whether higher or lower values are physiologically better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

impl Polarity {
    /// +1 when an increase is an improvement, -1 otherwise
    pub fn sign(&self) -> f64 {
        match self {
            Polarity::HigherIsBetter => 1.0,
            Polarity::LowerIsBetter => -1.0,
        }
    }

    /// Whether a change with the given sign counts as an improvement
    pub fn is_improvement(&self, delta: f64) -> bool {
        delta * self.sign() > 0.0
    }
}

/// Health metric identifier (vendor-agnostic)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    RestingHeartRate,
    HeartRateVariability,
    SleepDuration,
    SleepScore,
    DeepSleep,
    RecoveryScore,
    Steps,
    ActiveCalories,
    Weight,
    BodyFat,
    BloodGlucose,
    RespiratoryRate,
    Spo2,
    BloodPressureSystolic,
    /// For extensibility
    #[serde(untagged)]
    Custom(String),
}

impl MetricType {
    pub fn as_str(&self) -> &str {
        match self {
            MetricType::RestingHeartRate => "resting_heart_rate",
            MetricType::HeartRateVariability => "heart_rate_variability",
            MetricType::SleepDuration => "sleep_duration",
            MetricType::SleepScore => "sleep_score",
            MetricType::DeepSleep => "deep_sleep",
            MetricType::RecoveryScore => "recovery_score",
            MetricType::Steps => "steps",
            MetricType::ActiveCalories => "active_calories",
            MetricType::Weight => "weight",
            MetricType::BodyFat => "body_fat",
            MetricType::BloodGlucose => "blood_glucose",
            MetricType::RespiratoryRate => "respiratory_rate",
            MetricType::Spo2 => "spo2",
            MetricType::BloodPressureSystolic => "blood_pressure_systolic",
            MetricType::Custom(name) => name.as_str(),
        }
    }

    /// Direction of improvement for this metric
    pub fn polarity(&self) -> Polarity {
        match self {
            MetricType::RestingHeartRate
            | MetricType::Weight
            | MetricType::BodyFat
            | MetricType::BloodGlucose
            | MetricType::RespiratoryRate
            | MetricType::BloodPressureSystolic => Polarity::LowerIsBetter,
            _ => Polarity::HigherIsBetter,
        }
    }

    /// Human-readable name used in narratives
    pub fn display_name(&self) -> String {
        match self {
            MetricType::RestingHeartRate => "Resting heart rate".to_string(),
            MetricType::HeartRateVariability => "HRV".to_string(),
            MetricType::SleepDuration => "Sleep duration".to_string(),
            MetricType::SleepScore => "Sleep score".to_string(),
            MetricType::DeepSleep => "Deep sleep".to_string(),
            MetricType::RecoveryScore => "Recovery score".to_string(),
            MetricType::Steps => "Daily steps".to_string(),
            MetricType::ActiveCalories => "Active calories".to_string(),
            MetricType::Weight => "Body weight".to_string(),
            MetricType::BodyFat => "Body fat".to_string(),
            MetricType::BloodGlucose => "Blood glucose".to_string(),
            MetricType::RespiratoryRate => "Respiratory rate".to_string(),
            MetricType::Spo2 => "Blood oxygen".to_string(),
            MetricType::BloodPressureSystolic => "Systolic blood pressure".to_string(),
            MetricType::Custom(name) => {
                let spaced = name.replace('_', " ");
                let mut chars = spaced.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }

    /// Unit suffix used in narratives
    pub fn unit_label(&self) -> &'static str {
        match self {
            MetricType::RestingHeartRate => "bpm",
            MetricType::HeartRateVariability => "ms",
            MetricType::SleepDuration | MetricType::DeepSleep => "min",
            MetricType::Steps => "steps",
            MetricType::ActiveCalories => "kcal",
            MetricType::Weight => "kg",
            MetricType::BodyFat | MetricType::Spo2 => "%",
            MetricType::BloodGlucose => "mg/dL",
            MetricType::RespiratoryRate => "br/min",
            MetricType::BloodPressureSystolic => "mmHg",
            MetricType::SleepScore | MetricType::RecoveryScore | MetricType::Custom(_) => "",
        }
    }
}

/// One value per metric per day, the average of that day's samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub metric_type: MetricType,
    pub value: f64,
    /// Number of raw samples averaged into `value`
    pub sample_count: u32,
}

/// Coarse confidence tier for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Map a [0, 1] confidence score onto a tier
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

/// Why a result is degraded. Attached to results instead of raised as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Limitation {
    /// Too few points for the requested statistic
    InsufficientData {
        required: usize,
        available: usize,
        detail: String,
    },
    /// Covariance or design matrix not positive definite even at max jitter
    NumericalInstability { detail: String },
    /// No expected-marker-effect entry for the intervention
    UnmappedIntervention { intervention: String },
    /// An expected biomarker is missing from the evaluated panel
    OutOfPanel { biomarker_key: String },
    /// A forecast horizon lies outside the supported range
    HorizonOutOfRange { horizon_days: u32, max_days: u32 },
}
