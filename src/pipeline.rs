//! Pipeline orchestration
//!
//! [`InsightEngine`] is the public API. Every entry point is a pure function
//! of its arguments: samples are aggregated per call and no state survives
//! between calls. The `*_json` methods accept a request document, validate it,
//! and return the result serialized as JSON.

use crate::baseline::{BaselineEngine, BaselineReport};
use crate::causal::{CausalEstimator, CausalOutcome};
use crate::changepoint::{detect_changepoints, ChangepointPosterior};
use crate::classifier::{SignalClassification, SignalClassifier};
use crate::config::EngineConfig;
use crate::correlation::{CorrelationAnalyzer, CorrelationResult};
use crate::error::InsightError;
use crate::forecast::{
    ForecastEngine, ForecastOutcome, KernelTable, Threshold, MAX_HORIZON_DAYS,
};
use crate::schema::{
    BiomarkerFlag, InterventionRecord, LabDraw, LabReading, MetricSample, SampleAdapter,
};
use crate::types::{days_before, DailyAggregate, MetricType};
use crate::verdict::{
    compute_marker_deltas, EffectivenessVerdict, ExpectedEffectTable, VerdictEngine,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything derived for one metric as of a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_type: MetricType,
    pub as_of: NaiveDate,
    /// Days with at least one sample, up to `as_of`
    pub days_observed: usize,
    pub baseline: BaselineReport,
    pub classification: SignalClassification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changepoints: Option<ChangepointPosterior>,
    /// Dates of declared changepoints within the regime lookback
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changepoint_dates: Vec<NaiveDate>,
}

/// Statistical inference over one person's health history
#[derive(Debug, Clone)]
pub struct InsightEngine {
    config: EngineConfig,
    effects: ExpectedEffectTable,
    kernels: KernelTable,
}

impl Default for InsightEngine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            effects: ExpectedEffectTable::standard(),
            kernels: KernelTable::standard(),
        }
    }
}

impl InsightEngine {
    /// Engine over custom tables; fails if the config or a kernel is unusable
    pub fn new(
        config: EngineConfig,
        effects: ExpectedEffectTable,
        kernels: KernelTable,
    ) -> Result<Self, InsightError> {
        config.validate()?;
        kernels.validate()?;
        Ok(Self {
            config,
            effects,
            kernels,
        })
    }

    /// Engine with the built-in tables and a custom configuration
    pub fn with_config(config: EngineConfig) -> Result<Self, InsightError> {
        Self::new(config, ExpectedEffectTable::standard(), KernelTable::standard())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn effects(&self) -> &ExpectedEffectTable {
        &self.effects
    }

    pub fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    /// Baselines, pattern, zones, momentum, classification and changepoints for one metric
    pub fn metric_summary(
        &self,
        metric: &MetricType,
        samples: &[MetricSample],
        as_of: NaiveDate,
    ) -> MetricSummary {
        let daily: Vec<DailyAggregate> = SampleAdapter::daily_aggregates(samples, metric)
            .into_iter()
            .filter(|d| d.date <= as_of)
            .collect();
        debug!(
            metric = metric.as_str(),
            samples = samples.len(),
            days = daily.len(),
            %as_of,
            "computing metric summary"
        );

        let baseline =
            BaselineEngine::new(self.config.baseline.clone()).report(metric, &daily, as_of);
        let classification = SignalClassifier::new(
            self.config.classifier.clone(),
            self.config.changepoint.clone(),
        )
        .classify(metric, &daily, &baseline.baselines);

        let lookback_start = days_before(as_of, self.config.classifier.regime_lookback_days);
        let recent: Vec<&DailyAggregate> =
            daily.iter().filter(|d| d.date > lookback_start).collect();
        let values: Vec<f64> = recent.iter().map(|d| d.value).collect();
        let changepoints = detect_changepoints(&values, &self.config.changepoint);
        let changepoint_dates: Vec<NaiveDate> = changepoints
            .as_ref()
            .map(|posterior| {
                posterior
                    .changepoints
                    .iter()
                    .filter_map(|&i| recent.get(i).map(|d| d.date))
                    .collect()
            })
            .unwrap_or_default();

        MetricSummary {
            metric_type: metric.clone(),
            as_of,
            days_observed: daily.len(),
            baseline,
            classification,
            changepoints,
            changepoint_dates,
        }
    }

    /// Before/after correlations of one intervention against every metric history
    pub fn correlations(
        &self,
        intervention: &InterventionRecord,
        histories: &BTreeMap<MetricType, Vec<DailyAggregate>>,
    ) -> Vec<CorrelationResult> {
        debug!(
            intervention = %intervention.id,
            metrics = histories.len(),
            "correlating intervention"
        );
        CorrelationAnalyzer::new(
            self.config.correlation.clone(),
            self.config.changepoint.clone(),
        )
        .correlate_all(intervention, histories)
    }

    /// N-of-1 effect estimate of `intervention` on `metric`
    pub fn causal_estimate(
        &self,
        intervention: &InterventionRecord,
        concurrent: &[InterventionRecord],
        metric: &MetricType,
        samples: &[MetricSample],
        as_of: NaiveDate,
    ) -> CausalOutcome {
        let daily = SampleAdapter::daily_aggregates(samples, metric);
        debug!(
            intervention = %intervention.id,
            metric = metric.as_str(),
            days = daily.len(),
            concurrent = concurrent.len(),
            "estimating causal effect"
        );
        CausalEstimator::new(self.config.causal.clone()).estimate(
            intervention,
            concurrent,
            metric,
            &daily,
            as_of,
        )
    }

    /// GP forecast of one biomarker
    pub fn forecast(
        &self,
        biomarker_key: &str,
        readings: &[LabReading],
        as_of: NaiveDate,
        horizons: &[u32],
        threshold: Option<Threshold>,
    ) -> ForecastOutcome {
        debug!(
            biomarker = biomarker_key,
            readings = readings.len(),
            ?horizons,
            "forecasting biomarker"
        );
        ForecastEngine::new(self.config.forecast.clone(), self.kernels.clone()).forecast(
            biomarker_key,
            readings,
            as_of,
            horizons,
            threshold,
        )
    }

    /// Verdict for one intervention against two draws
    pub fn verdict(
        &self,
        intervention: &InterventionRecord,
        previous: &LabDraw,
        current: &LabDraw,
        flags: &[BiomarkerFlag],
    ) -> EffectivenessVerdict {
        let engine = self.verdict_engine();
        let deltas = compute_marker_deltas(previous, current, engine.config().significance_percent);
        engine.evaluate(intervention, &deltas, flags, current.test_date)
    }

    /// Verdicts for every active or paused intervention, most severe first
    pub fn verdicts_for_draw(
        &self,
        interventions: &[InterventionRecord],
        previous: &LabDraw,
        current: &LabDraw,
        flags: &[BiomarkerFlag],
    ) -> Vec<EffectivenessVerdict> {
        self.verdict_engine()
            .verdicts_for_draw(interventions, previous, current, flags)
    }

    fn verdict_engine(&self) -> VerdictEngine {
        VerdictEngine::new(self.config.verdict.clone(), self.effects.clone())
    }

    pub fn metric_summary_json(&self, request: &str) -> Result<String, InsightError> {
        let request: MetricSummaryRequest = parse_request(request)?;
        let summary = self.metric_summary(&request.metric_type, &request.samples, request.as_of);
        Ok(serde_json::to_string(&summary)?)
    }

    pub fn correlations_json(&self, request: &str) -> Result<String, InsightError> {
        let request: CorrelationRequest = parse_request(request)?;
        let histories = SampleAdapter::group_by_metric(&request.samples);
        let results = self.correlations(&request.intervention, &histories);
        Ok(serde_json::to_string(&results)?)
    }

    pub fn causal_estimate_json(&self, request: &str) -> Result<String, InsightError> {
        let request: CausalRequest = parse_request(request)?;
        let outcome = self.causal_estimate(
            &request.intervention,
            &request.concurrent,
            &request.metric_type,
            &request.samples,
            request.as_of,
        );
        Ok(serde_json::to_string(&outcome)?)
    }

    pub fn forecast_json(&self, request: &str) -> Result<String, InsightError> {
        let request: ForecastRequest = parse_request(request)?;
        let outcome = self.forecast(
            &request.biomarker_key,
            &request.readings,
            request.as_of,
            &request.horizons_days,
            request.threshold,
        );
        Ok(serde_json::to_string(&outcome)?)
    }

    pub fn verdicts_json(&self, request: &str) -> Result<String, InsightError> {
        let request: VerdictRequest = parse_request(request)?;
        let verdicts = self.verdicts_for_draw(
            &request.interventions,
            &request.previous,
            &request.current,
            &request.flags,
        );
        Ok(serde_json::to_string(&verdicts)?)
    }
}

/// A request document that can be checked before any computation
pub trait Request {
    fn validate(&self) -> Result<(), InsightError>;
}

fn parse_request<T>(json: &str) -> Result<T, InsightError>
where
    T: Request + for<'de> Deserialize<'de>,
{
    let request: T = serde_json::from_str(json)?;
    request.validate()?;
    Ok(request)
}

fn check_intervention(field: &str, intervention: &InterventionRecord) -> Result<(), InsightError> {
    intervention
        .validate()
        .map_err(|e| InsightError::invalid(field, e.to_string()))
}

fn check_draw(field: &str, draw: &LabDraw) -> Result<(), InsightError> {
    draw.validate()
        .map_err(|e| InsightError::invalid(field, e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummaryRequest {
    pub metric_type: MetricType,
    pub samples: Vec<MetricSample>,
    pub as_of: NaiveDate,
}

impl Request for MetricSummaryRequest {
    fn validate(&self) -> Result<(), InsightError> {
        SampleAdapter::ensure_valid(&self.samples)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRequest {
    pub intervention: InterventionRecord,
    pub samples: Vec<MetricSample>,
}

impl Request for CorrelationRequest {
    fn validate(&self) -> Result<(), InsightError> {
        check_intervention("intervention", &self.intervention)?;
        SampleAdapter::ensure_valid(&self.samples)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRequest {
    pub intervention: InterventionRecord,
    /// Other interventions that may overlap the analysis window
    #[serde(default)]
    pub concurrent: Vec<InterventionRecord>,
    pub metric_type: MetricType,
    pub samples: Vec<MetricSample>,
    pub as_of: NaiveDate,
}

impl Request for CausalRequest {
    fn validate(&self) -> Result<(), InsightError> {
        check_intervention("intervention", &self.intervention)?;
        for (i, other) in self.concurrent.iter().enumerate() {
            check_intervention(&format!("concurrent[{}]", i), other)?;
        }
        SampleAdapter::ensure_valid(&self.samples)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub biomarker_key: String,
    #[serde(default)]
    pub readings: Vec<LabReading>,
    pub as_of: NaiveDate,
    /// Empty means the configured default horizons
    #[serde(default)]
    pub horizons_days: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
}

impl Request for ForecastRequest {
    fn validate(&self) -> Result<(), InsightError> {
        if self.biomarker_key.trim().is_empty() {
            return Err(InsightError::invalid("biomarker_key", "must not be empty"));
        }
        for (i, reading) in self.readings.iter().enumerate() {
            reading
                .validate()
                .map_err(|e| InsightError::invalid(format!("readings[{}]", i), e.to_string()))?;
        }
        for (i, &h) in self.horizons_days.iter().enumerate() {
            if !(1..=MAX_HORIZON_DAYS).contains(&h) {
                return Err(InsightError::invalid(
                    format!("horizons_days[{}]", i),
                    format!("must be between 1 and {} days, got {}", MAX_HORIZON_DAYS, h),
                ));
            }
        }
        if let Some(threshold) = &self.threshold {
            if !threshold.value.is_finite() {
                return Err(InsightError::invalid("threshold.value", "must be finite"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRequest {
    pub interventions: Vec<InterventionRecord>,
    pub previous: LabDraw,
    pub current: LabDraw,
    #[serde(default)]
    pub flags: Vec<BiomarkerFlag>,
}

impl Request for VerdictRequest {
    fn validate(&self) -> Result<(), InsightError> {
        for (i, intervention) in self.interventions.iter().enumerate() {
            check_intervention(&format!("interventions[{}]", i), intervention)?;
        }
        check_draw("previous", &self.previous)?;
        check_draw("current", &self.current)?;
        if self.previous.test_date > self.current.test_date {
            return Err(InsightError::invalid(
                "previous.test_date",
                "must not be after current.test_date",
            ));
        }
        Ok(())
    }
}
