//! N-of-1 causal effect estimation
//!
//! Regresses a metric on a treatment indicator, a time trend and indicators
//! for concurrent interventions, using the person's own pre-intervention days
//! as the control. The normal equations are solved with a strict Cholesky so a
//! singular design is reported rather than regularized away.

use crate::correlation::humanize;
use crate::schema::InterventionRecord;
use crate::stats::{cholesky_decompose_with, cholesky_solve, mean, VARIANCE_FLOOR};
use crate::types::{days_before, ConfidenceLevel, DailyAggregate, Limitation, MetricType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Days that must elapse before an estimate is attempted
pub const DEFAULT_MIN_ELAPSED_DAYS: i64 = 14;
/// Points required on each side of the start date
pub const DEFAULT_CAUSAL_MIN_POINTS: usize = 5;
/// Pre-intervention history used as the control period
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

/// Strict factorization: no jitter
const STRICT: [f64; 1] = [0.0];

/// Causal estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalConfig {
    pub min_elapsed_days: i64,
    pub min_points_per_side: usize,
    pub lookback_days: u32,
    /// |t| for high confidence (with enough points)
    pub high_t_statistic: f64,
    /// |t| for medium confidence
    pub medium_t_statistic: f64,
    /// Points needed for high confidence
    pub high_confidence_min_points: usize,
}

impl Default for CausalConfig {
    fn default() -> Self {
        Self {
            min_elapsed_days: DEFAULT_MIN_ELAPSED_DAYS,
            min_points_per_side: DEFAULT_CAUSAL_MIN_POINTS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            high_t_statistic: 2.5,
            medium_t_statistic: 2.0,
            high_confidence_min_points: 30,
        }
    }
}

/// How the effect was estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    Ols,
    SimpleComparison,
}

/// Average protocol treatment effect for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEstimate {
    pub intervention_id: String,
    pub metric_type: MetricType,
    pub method: EstimationMethod,
    /// After mean minus before mean
    pub unadjusted_effect: f64,
    /// Treatment coefficient; equals the unadjusted effect for a simple comparison
    pub adjusted_effect: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_statistic: Option<f64>,
    pub before_count: usize,
    pub after_count: usize,
    /// Regressors beyond intercept and treatment
    pub covariates: Vec<String>,
    /// Concurrent interventions left out of the design
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_covariates: Vec<String>,
    pub confidence_level: ConfidenceLevel,
    pub narrative: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limitations: Vec<Limitation>,
}

/// Result of a causal estimate request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CausalOutcome {
    /// Not enough time has passed since the start date
    TooEarly {
        days_elapsed: i64,
        days_remaining: i64,
        message: String,
    },
    Estimated(CausalEstimate),
    InsufficientData {
        required_per_side: usize,
        before_count: usize,
        after_count: usize,
        message: String,
    },
}

impl CausalOutcome {
    pub fn estimate(&self) -> Option<&CausalEstimate> {
        match self {
            CausalOutcome::Estimated(estimate) => Some(estimate),
            _ => None,
        }
    }
}

struct Observation {
    date: NaiveDate,
    value: f64,
    treated: bool,
}

/// A design column and its name
struct Column {
    name: String,
    values: Vec<f64>,
}

/// N-of-1 causal estimator
#[derive(Debug, Clone, Default)]
pub struct CausalEstimator {
    config: CausalConfig,
}

impl CausalEstimator {
    pub fn new(config: CausalConfig) -> Self {
        Self { config }
    }

    /// Estimate the effect of `intervention` on `metric` as of `as_of`.
    ///
    /// `concurrent` may include the intervention itself; it is skipped by id.
    pub fn estimate(
        &self,
        intervention: &InterventionRecord,
        concurrent: &[InterventionRecord],
        metric: &MetricType,
        daily: &[DailyAggregate],
        as_of: NaiveDate,
    ) -> CausalOutcome {
        let days_elapsed = (as_of - intervention.start_date).num_days();
        if days_elapsed < self.config.min_elapsed_days {
            let days_remaining = self.config.min_elapsed_days - days_elapsed.max(0);
            return CausalOutcome::TooEarly {
                days_elapsed: days_elapsed.max(0),
                days_remaining,
                message: format!(
                    "{} started {} days ago. Check back in {} days for an effect estimate on {}.",
                    humanize(&intervention.canonical_name),
                    days_elapsed.max(0),
                    days_remaining,
                    metric.display_name().to_lowercase()
                ),
            };
        }

        let observations = self.observations(intervention, daily, as_of);
        let before: Vec<f64> = observations
            .iter()
            .filter(|o| !o.treated)
            .map(|o| o.value)
            .collect();
        let after: Vec<f64> = observations.iter().filter(|o| o.treated).map(|o| o.value).collect();

        let required = self.config.min_points_per_side;
        if before.len() < required || after.len() < required {
            tracing::debug!(
                metric = metric.as_str(),
                before = before.len(),
                after = after.len(),
                "causal estimate has too few points"
            );
            return CausalOutcome::InsufficientData {
                required_per_side: required,
                before_count: before.len(),
                after_count: after.len(),
                message: format!(
                    "Need at least {} days of {} data before and after starting {} (have {} before, {} after).",
                    required,
                    metric.display_name().to_lowercase(),
                    humanize(&intervention.canonical_name),
                    before.len(),
                    after.len()
                ),
            };
        }

        let (Some(before_mean), Some(after_mean)) = (mean(&before), mean(&after)) else {
            return CausalOutcome::InsufficientData {
                required_per_side: required,
                before_count: before.len(),
                after_count: after.len(),
                message: "No usable readings".to_string(),
            };
        };
        let unadjusted = after_mean - before_mean;
        let percent_change = (before_mean != 0.0).then(|| unadjusted / before_mean.abs() * 100.0);

        let (columns, dropped) = self.design(intervention, concurrent, &observations);
        let y: Vec<f64> = observations.iter().map(|o| o.value).collect();

        let base = Partial {
            intervention,
            metric,
            unadjusted,
            percent_change,
            before_count: before.len(),
            after_count: after.len(),
            dropped,
        };

        if y.len() <= columns.len() {
            tracing::warn!(
                metric = metric.as_str(),
                points = y.len(),
                columns = columns.len(),
                "too few points for regression, falling back to simple comparison"
            );
            return CausalOutcome::Estimated(base.simple_comparison(Limitation::InsufficientData {
                required: columns.len() + 1,
                available: y.len(),
                detail: "fewer observations than regression parameters".to_string(),
            }));
        }

        match ordinary_least_squares(&columns, &y) {
            Ok(fit) => CausalOutcome::Estimated(self.from_fit(base, &columns, fit, y.len())),
            Err(detail) => {
                tracing::warn!(
                    metric = metric.as_str(),
                    intervention = intervention.id.as_str(),
                    "design matrix singular, falling back to simple comparison"
                );
                CausalOutcome::Estimated(
                    base.simple_comparison(Limitation::NumericalInstability { detail }),
                )
            }
        }
    }

    /// Daily points from `start - lookback` through `as_of` (or the end date)
    fn observations(
        &self,
        intervention: &InterventionRecord,
        daily: &[DailyAggregate],
        as_of: NaiveDate,
    ) -> Vec<Observation> {
        let start = intervention.start_date;
        let first = days_before(start, self.config.lookback_days);
        let last = match intervention.end_date {
            Some(end) if end < as_of => end,
            _ => as_of,
        };
        daily
            .iter()
            .filter(|d| d.date >= first && d.date <= last && d.value.is_finite())
            .map(|d| Observation {
                date: d.date,
                value: d.value,
                treated: d.date >= start,
            })
            .collect()
    }

    /// Intercept, treatment, time trend and usable concurrent indicators
    fn design(
        &self,
        intervention: &InterventionRecord,
        concurrent: &[InterventionRecord],
        observations: &[Observation],
    ) -> (Vec<Column>, Vec<String>) {
        let n = observations.len();
        let treatment: Vec<f64> = observations
            .iter()
            .map(|o| if o.treated { 1.0 } else { 0.0 })
            .collect();

        let offsets: Vec<f64> = observations
            .iter()
            .map(|o| (o.date - intervention.start_date).num_days() as f64)
            .collect();
        let center = mean(&offsets).unwrap_or(0.0);
        let span = offsets.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            - offsets.iter().copied().fold(f64::INFINITY, f64::min);
        let scale = if span.is_finite() && span > 0.0 { span } else { 1.0 };

        let mut columns = vec![
            Column {
                name: "intercept".to_string(),
                values: vec![1.0; n],
            },
            Column {
                name: "treatment".to_string(),
                values: treatment,
            },
            Column {
                name: "time_trend".to_string(),
                values: offsets.iter().map(|t| (t - center) / scale).collect(),
            },
        ];

        let mut dropped = Vec::new();
        for other in concurrent.iter().filter(|c| c.id != intervention.id) {
            let values: Vec<f64> = observations
                .iter()
                .map(|o| if other.is_active_on(o.date) { 1.0 } else { 0.0 })
                .collect();
            let varies = values.iter().any(|v| *v != values[0]);
            let duplicate = columns[1..].iter().any(|c| c.values == values);
            if varies && !duplicate {
                columns.push(Column {
                    name: format!("concurrent:{}", other.id),
                    values,
                });
            } else {
                dropped.push(other.id.clone());
            }
        }

        (columns, dropped)
    }

    fn from_fit(
        &self,
        base: Partial<'_>,
        columns: &[Column],
        fit: OlsFit,
        n: usize,
    ) -> CausalEstimate {
        let effect = fit.coefficients[1];
        let standard_error = fit.treatment_variance.max(VARIANCE_FLOOR).sqrt();
        let t = effect / standard_error;

        let confidence_level = if t.abs() >= self.config.high_t_statistic
            && n >= self.config.high_confidence_min_points
        {
            ConfidenceLevel::High
        } else if t.abs() >= self.config.medium_t_statistic {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };

        let concurrent_count = columns.len().saturating_sub(3);
        let adjustment = if concurrent_count == 0 {
            "the time trend".to_string()
        } else {
            format!(
                "the time trend and {} concurrent protocol{}",
                concurrent_count,
                if concurrent_count == 1 { "" } else { "s" }
            )
        };
        let narrative = format!(
            "{} Adjusting for {}, the estimated effect is {} (t = {:.1}, {} confidence).",
            base.headline(),
            adjustment,
            signed_amount(effect, base.metric),
            t,
            confidence_level.as_str()
        );

        CausalEstimate {
            intervention_id: base.intervention.id.clone(),
            metric_type: base.metric.clone(),
            method: EstimationMethod::Ols,
            unadjusted_effect: base.unadjusted,
            adjusted_effect: effect,
            percent_change: base.percent_change,
            standard_error: Some(standard_error),
            t_statistic: Some(t),
            before_count: base.before_count,
            after_count: base.after_count,
            covariates: columns.iter().skip(2).map(|c| c.name.clone()).collect(),
            dropped_covariates: base.dropped,
            confidence_level,
            narrative,
            limitations: Vec::new(),
        }
    }
}

/// Shared fields of an estimate before the method is known
struct Partial<'a> {
    intervention: &'a InterventionRecord,
    metric: &'a MetricType,
    unadjusted: f64,
    percent_change: Option<f64>,
    before_count: usize,
    after_count: usize,
    dropped: Vec<String>,
}

impl Partial<'_> {
    fn headline(&self) -> String {
        let direction = if self.metric.polarity().is_improvement(self.unadjusted) {
            "improved"
        } else if self.unadjusted == 0.0 {
            "did not change"
        } else {
            "worsened"
        };
        format!(
            "{} {} by {} after starting {}.",
            self.metric.display_name(),
            direction,
            signed_amount(self.unadjusted, self.metric),
            humanize(&self.intervention.canonical_name)
        )
    }

    fn simple_comparison(self, limitation: Limitation) -> CausalEstimate {
        let narrative = format!(
            "{} This is a simple before/after comparison without adjustment, so treat it as a rough signal.",
            self.headline()
        );
        CausalEstimate {
            intervention_id: self.intervention.id.clone(),
            metric_type: self.metric.clone(),
            method: EstimationMethod::SimpleComparison,
            unadjusted_effect: self.unadjusted,
            adjusted_effect: self.unadjusted,
            percent_change: self.percent_change,
            standard_error: None,
            t_statistic: None,
            before_count: self.before_count,
            after_count: self.after_count,
            covariates: Vec::new(),
            dropped_covariates: self.dropped,
            confidence_level: ConfidenceLevel::Low,
            narrative,
            limitations: vec![limitation],
        }
    }
}

fn signed_amount(value: f64, metric: &MetricType) -> String {
    let unit = metric.unit_label();
    if unit.is_empty() {
        format!("{:+.1}", value)
    } else {
        format!("{:+.1} {}", value, unit)
    }
}

struct OlsFit {
    coefficients: Vec<f64>,
    /// Var(beta_treatment) = sigma^2 (X'X)^-1 [1][1]
    treatment_variance: f64,
}

/// Solve the normal equations X'X b = X'y with a strict Cholesky
fn ordinary_least_squares(columns: &[Column], y: &[f64]) -> Result<OlsFit, String> {
    let p = columns.len();
    let n = y.len();

    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for i in 0..p {
        for j in 0..=i {
            let dot: f64 = columns[i]
                .values
                .iter()
                .zip(&columns[j].values)
                .map(|(a, b)| a * b)
                .sum();
            xtx[i][j] = dot;
            xtx[j][i] = dot;
        }
        xty[i] = columns[i].values.iter().zip(y).map(|(a, b)| a * b).sum();
    }

    let factor = cholesky_decompose_with(&xtx, &STRICT).map_err(|e| e.to_string())?;
    let coefficients = cholesky_solve(&factor, &xty);

    let rss: f64 = (0..n)
        .map(|row| {
            let fitted: f64 = columns
                .iter()
                .zip(&coefficients)
                .map(|(c, b)| c.values[row] * b)
                .sum();
            (y[row] - fitted).powi(2)
        })
        .sum();
    let sigma_sq = rss / (n - p) as f64;

    let mut unit = vec![0.0; p];
    unit[1] = 1.0;
    let inverse_column = cholesky_solve(&factor, &unit);

    Ok(OlsFit {
        coefficients,
        treatment_variance: sigma_sq * inverse_column[1],
    })
}
