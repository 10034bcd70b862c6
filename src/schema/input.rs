//! Input record definitions
//!
//! Metric samples, lab readings and intervention records as supplied by the
//! external stores. Everything here is validated before it reaches an engine.

use crate::types::MetricType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Current input schema version
pub const INPUT_SCHEMA_VERSION: &str = "insight.input.v1";

/// One raw measurement of a health metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    /// Known context shape, if the source attached one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SampleContext>,
}

impl MetricSample {
    pub fn new(
        metric_type: MetricType,
        value: f64,
        unit: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_type,
            value,
            unit: unit.into(),
            recorded_at,
            context: None,
        }
    }

    /// Attach a context record
    pub fn with_context(mut self, context: SampleContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Validate the sample
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.value.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "value".to_string(),
            });
        }
        if self.unit.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "unit".to_string(),
            });
        }
        if let MetricType::Custom(name) = &self.metric_type {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyField {
                    field: "metric_type".to_string(),
                });
            }
        }
        match &self.context {
            Some(context) => context.validate(),
            None => Ok(()),
        }
    }
}

/// Stage label for sleep samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Light,
    Deep,
    Rem,
    Awake,
}

/// Context attached to a sample.
///
/// Closed set of shapes; sources with other context drop it before ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleContext {
    Sleep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<SleepStage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_bed_minutes: Option<f64>,
    },
    Workout {
        activity_type: String,
        duration_minutes: f64,
    },
    Fasting {
        hours_fasted: f64,
    },
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl SampleContext {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SampleContext::Sleep {
                in_bed_minutes: Some(minutes),
                ..
            } => non_negative("context.in_bed_minutes", *minutes),
            SampleContext::Sleep { .. } | SampleContext::Manual { .. } => Ok(()),
            SampleContext::Workout {
                activity_type,
                duration_minutes,
            } => {
                if activity_type.trim().is_empty() {
                    return Err(ValidationError::EmptyField {
                        field: "context.activity_type".to_string(),
                    });
                }
                non_negative("context.duration_minutes", *duration_minutes)
            }
            SampleContext::Fasting { hours_fasted } => {
                non_negative("context.hours_fasted", *hours_fasted)
            }
        }
    }
}

/// One biomarker value from a lab draw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabReading {
    pub biomarker_key: String,
    pub value: f64,
    pub unit: String,
    pub test_date: NaiveDate,
}

impl LabReading {
    pub fn new(
        biomarker_key: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        test_date: NaiveDate,
    ) -> Self {
        Self {
            biomarker_key: biomarker_key.into(),
            value,
            unit: unit.into(),
            test_date,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.biomarker_key.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "biomarker_key".to_string(),
            });
        }
        if !self.value.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "value".to_string(),
            });
        }
        Ok(())
    }
}

/// A full lab panel drawn on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabDraw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_id: Option<String>,
    pub test_date: NaiveDate,
    pub readings: Vec<LabReading>,
}

impl LabDraw {
    /// Value for a biomarker key, if the panel contains it
    pub fn value_of(&self, biomarker_key: &str) -> Option<f64> {
        self.readings
            .iter()
            .find(|r| r.biomarker_key == biomarker_key)
            .map(|r| r.value)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for reading in &self.readings {
            reading.validate()?;
        }
        Ok(())
    }
}

/// Reference-range flag reported by the lab for a biomarker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Low,
    Normal,
    High,
    Critical,
}

impl FlagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagStatus::Low => "low",
            FlagStatus::Normal => "normal",
            FlagStatus::High => "high",
            FlagStatus::Critical => "critical",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        !matches!(self, FlagStatus::Normal)
    }
}

/// Current flag for one biomarker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerFlag {
    pub biomarker_key: String,
    pub status: FlagStatus,
}

/// Lifecycle state of an intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

/// A supplement or peptide protocol the user follows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub id: String,
    pub canonical_name: String,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Externally computed adherence, 0-100
    pub adherence_percent: f64,
    #[serde(default)]
    pub status: InterventionStatus,
}

impl InterventionRecord {
    /// Days between start and `as_of` (or the end date, if earlier), never negative
    pub fn days_active(&self, as_of: NaiveDate) -> i64 {
        let until = match self.end_date {
            Some(end) if end < as_of => end,
            _ => as_of,
        };
        (until - self.start_date).num_days().max(0)
    }

    /// Whether the intervention was running on `date`
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map_or(true, |end| date <= end)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "id".to_string(),
            });
        }
        if !self.adherence_percent.is_finite()
            || !(0.0..=100.0).contains(&self.adherence_percent)
        {
            return Err(ValidationError::OutOfRange {
                field: "adherence_percent".to_string(),
                value: self.adherence_percent,
                min: 0.0,
                max: 100.0,
            });
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(ValidationError::InvalidDateRange {
                    start: self.start_date,
                    end,
                });
            }
        }
        Ok(())
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite {
            field: field.to_string(),
        });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

/// Validation errors for input records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be a finite number")]
    NonFinite { field: String },

    #[error("{field} must not be empty")]
    EmptyField { field: String },

    #[error("{field} must be non-negative, got {value}")]
    Negative { field: String, value: f64 },

    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("end date {end} is before start date {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}
