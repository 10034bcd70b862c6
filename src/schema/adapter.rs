//! Adapter from raw metric samples to daily aggregates
//!
//! Parses sample batches (JSON array or NDJSON), validates them, and
//! collapses same-day samples into one [`DailyAggregate`] per metric per
//! UTC calendar date.

use crate::error::InsightError;
use crate::schema::input::{MetricSample, ValidationError};
use crate::types::{DailyAggregate, MetricType};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Adapter for converting raw samples to daily aggregates
pub struct SampleAdapter;

impl SampleAdapter {
    /// Parse a JSON string containing an array of samples
    pub fn parse_array(json: &str) -> Result<Vec<MetricSample>, InsightError> {
        let samples: Vec<MetricSample> = serde_json::from_str(json)?;
        Ok(samples)
    }

    /// Parse NDJSON (newline-delimited JSON) containing samples
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<MetricSample>, InsightError> {
        let mut samples = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<MetricSample>(trimmed) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    return Err(InsightError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(samples)
    }

    /// Validate a batch of samples, collecting every failure
    pub fn validate_samples(samples: &[MetricSample]) -> Vec<ValidationResult> {
        samples
            .iter()
            .enumerate()
            .filter_map(|(index, sample)| {
                sample.validate().err().map(|error| ValidationResult {
                    index,
                    metric_type: sample.metric_type.clone(),
                    error,
                })
            })
            .collect()
    }

    /// Reject the batch at the first invalid sample
    pub fn ensure_valid(samples: &[MetricSample]) -> Result<(), InsightError> {
        match Self::validate_samples(samples).into_iter().next() {
            Some(failure) => Err(InsightError::invalid(
                format!("samples[{}]", failure.index),
                failure.error.to_string(),
            )),
            None => Ok(()),
        }
    }

    /// Average same-day samples of one metric into date-ordered aggregates.
    ///
    /// Samples of other metrics and non-finite values are ignored.
    pub fn daily_aggregates(samples: &[MetricSample], metric: &MetricType) -> Vec<DailyAggregate> {
        let mut by_date: BTreeMap<NaiveDate, (f64, u32)> = BTreeMap::new();

        for sample in samples
            .iter()
            .filter(|s| &s.metric_type == metric && s.value.is_finite())
        {
            let entry = by_date
                .entry(sample.recorded_at.date_naive())
                .or_insert((0.0, 0));
            entry.0 += sample.value;
            entry.1 += 1;
        }

        by_date
            .into_iter()
            .map(|(date, (sum, count))| DailyAggregate {
                date,
                metric_type: metric.clone(),
                value: sum / count as f64,
                sample_count: count,
            })
            .collect()
    }

    /// Aggregate every metric present in the batch
    pub fn group_by_metric(samples: &[MetricSample]) -> BTreeMap<MetricType, Vec<DailyAggregate>> {
        let mut metrics: Vec<MetricType> = samples.iter().map(|s| s.metric_type.clone()).collect();
        metrics.sort();
        metrics.dedup();

        metrics
            .into_iter()
            .map(|metric| {
                let daily = Self::daily_aggregates(samples, &metric);
                (metric, daily)
            })
            .collect()
    }
}

/// A failed sample in a validated batch
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub index: usize,
    pub metric_type: MetricType,
    pub error: ValidationError,
}
