//! Gaussian process forecasts for lab biomarkers
//!
//! Fits a zero-mean GP to a biomarker's standardized history (x = days
//! relative to `as_of`) and predicts at future horizons. Each biomarker uses a
//! pre-selected kernel from an explicit [`KernelTable`].

use crate::error::InsightError;
use crate::schema::LabReading;
use crate::stats::{
    cholesky_decompose, cholesky_solve, forward_substitute, mean, normal_cdf, sample_std_dev,
    Kernel, LinalgError, VARIANCE_FLOOR,
};
use crate::types::Limitation;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Observation noise variance, in standardized units
pub const DEFAULT_NOISE_VARIANCE: f64 = 0.1;
/// Most recent draws kept for training
pub const DEFAULT_MAX_TRAINING_POINTS: usize = 50;
/// Furthest supported horizon, ten years
pub const MAX_HORIZON_DAYS: u32 = 3650;

/// Forecast configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub noise_variance: f64,
    /// Horizons used when a request names none
    pub default_horizons_days: Vec<u32>,
    pub max_training_points: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            noise_variance: DEFAULT_NOISE_VARIANCE,
            default_horizons_days: vec![30, 90, 180],
            max_training_points: DEFAULT_MAX_TRAINING_POINTS,
        }
    }
}

/// Kernel per biomarker key, with a fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelTable {
    entries: BTreeMap<String, Kernel>,
    default: Kernel,
}

impl Default for KernelTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl KernelTable {
    /// Empty table that uses `default` for every biomarker
    pub fn new(default: Kernel) -> Self {
        Self {
            entries: BTreeMap::new(),
            default,
        }
    }

    /// Built-in kernels. Lengthscales are in days, variances in standardized units.
    pub fn standard() -> Self {
        let matern52 = |lengthscale| Kernel::Matern52 {
            lengthscale,
            variance: 1.0,
        };
        let matern32 = |lengthscale| Kernel::Matern32 {
            lengthscale,
            variance: 1.0,
        };

        Self::new(matern52(90.0))
            .with_entry("hba1c", matern52(120.0))
            .with_entry("ldl", matern52(180.0))
            .with_entry("hdl", matern52(240.0))
            .with_entry("triglycerides", matern32(60.0))
            .with_entry("testosterone", matern32(90.0))
            .with_entry(
                "vitamin_d",
                Kernel::Periodic {
                    period: 365.0,
                    lengthscale: 1.0,
                    variance: 1.0,
                },
            )
            .with_entry("crp", matern32(30.0))
            .with_entry("ferritin", matern52(120.0))
    }

    pub fn with_entry(mut self, biomarker_key: &str, kernel: Kernel) -> Self {
        self.entries.insert(biomarker_key.to_string(), kernel);
        self
    }

    pub fn kernel_for(&self, biomarker_key: &str) -> &Kernel {
        self.entries.get(biomarker_key).unwrap_or(&self.default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reject kernels with non-positive or non-finite hyperparameters
    pub fn validate(&self) -> Result<(), InsightError> {
        check_kernel("kernels.default", &self.default)?;
        for (key, kernel) in &self.entries {
            check_kernel(&format!("kernels.{}", key), kernel)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_kernel(field: &str, kernel: &Kernel) -> Result<(), InsightError> {
    let (lengthscale, variance, period) = match *kernel {
        Kernel::Rbf {
            lengthscale,
            variance,
        }
        | Kernel::Matern32 {
            lengthscale,
            variance,
        }
        | Kernel::Matern52 {
            lengthscale,
            variance,
        } => (lengthscale, variance, None),
        Kernel::Periodic {
            period,
            lengthscale,
            variance,
        } => (lengthscale, variance, Some(period)),
    };
    let named = [
        ("lengthscale", Some(lengthscale)),
        ("variance", Some(variance)),
        ("period", period),
    ];
    for (name, value) in named {
        if let Some(value) = value {
            if !(value > 0.0 && value.is_finite()) {
                return Err(InsightError::invalid(
                    format!("{}.{}", field, name),
                    format!("must be positive and finite, got {}", value),
                ));
            }
        }
    }
    Ok(())
}

/// Side of a threshold that counts as crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    Above,
    Below,
}

/// Clinically meaningful boundary for a biomarker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    pub direction: ThresholdDirection,
}

impl Threshold {
    /// P(value is past the threshold) under N(mean, variance)
    pub fn crossing_probability(&self, mean: f64, variance: f64) -> f64 {
        let sd = variance.max(VARIANCE_FLOOR).sqrt();
        let below = normal_cdf((self.value - mean) / sd);
        match self.direction {
            ThresholdDirection::Above => 1.0 - below,
            ThresholdDirection::Below => below,
        }
        .clamp(0.0, 1.0)
    }
}

/// Posterior mean and latent variance at query points
#[derive(Debug, Clone, PartialEq)]
pub struct GpPosterior {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
    /// Diagonal jitter the factorization needed
    pub jitter: f64,
}

/// Zero-mean GP posterior at `x_star` given training data `(x, y)`.
///
/// With no training points this is the prior.
pub fn gp_posterior(
    kernel: &Kernel,
    noise_variance: f64,
    x: &[f64],
    y: &[f64],
    x_star: &[f64],
) -> Result<GpPosterior, LinalgError> {
    let prior_variance = kernel.prior_variance().max(VARIANCE_FLOOR);
    if x.is_empty() {
        return Ok(GpPosterior {
            mean: vec![0.0; x_star.len()],
            variance: vec![prior_variance; x_star.len()],
            jitter: 0.0,
        });
    }

    let n = x.len();
    let mut k = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let value = kernel.evaluate(x[i], x[j]);
            k[i][j] = value;
            k[j][i] = value;
        }
        k[i][i] += noise_variance;
    }

    let factor = cholesky_decompose(&k)?;
    let alpha = cholesky_solve(&factor, y);

    let mut means: Vec<f64> = Vec::with_capacity(x_star.len());
    let mut variances: Vec<f64> = Vec::with_capacity(x_star.len());
    for &xs in x_star {
        let k_star: Vec<f64> = x.iter().map(|&xi| kernel.evaluate(xi, xs)).collect();
        means.push(k_star.iter().zip(&alpha).map(|(a, b)| a * b).sum());

        let v = forward_substitute(&factor, &k_star);
        let explained: f64 = v.iter().map(|vi| vi * vi).sum();
        variances.push((kernel.evaluate(xs, xs) - explained).max(VARIANCE_FLOOR));
    }

    Ok(GpPosterior {
        mean: means,
        variance: variances,
        jitter: factor.jitter(),
    })
}

/// Forecast for one biomarker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpForecast {
    pub biomarker_key: String,
    pub kernel: Kernel,
    pub training_points: usize,
    /// True when there was no history and the prior was returned
    pub used_prior: bool,
    pub horizons_days: Vec<u32>,
    pub dates: Vec<NaiveDate>,
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    /// Evaluated at the furthest horizon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_cross_probability: Option<f64>,
}

/// Result of a forecast request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastOutcome {
    Available(GpForecast),
    /// No forecast could be produced; not an error
    Unavailable {
        biomarker_key: String,
        limitation: Limitation,
    },
}

impl ForecastOutcome {
    pub fn forecast(&self) -> Option<&GpForecast> {
        match self {
            ForecastOutcome::Available(forecast) => Some(forecast),
            ForecastOutcome::Unavailable { .. } => None,
        }
    }
}

/// GP forecast engine
#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    config: ForecastConfig,
    kernels: KernelTable,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig, kernels: KernelTable) -> Self {
        Self { config, kernels }
    }

    /// Forecast `biomarker_key` at `horizons` days after `as_of`.
    ///
    /// Readings for other biomarkers or after `as_of` are ignored. An empty
    /// `horizons` uses the configured defaults.
    pub fn forecast(
        &self,
        biomarker_key: &str,
        readings: &[LabReading],
        as_of: NaiveDate,
        horizons: &[u32],
        threshold: Option<Threshold>,
    ) -> ForecastOutcome {
        let kernel = *self.kernels.kernel_for(biomarker_key);
        let horizons: Vec<u32> = if horizons.is_empty() {
            self.config.default_horizons_days.clone()
        } else {
            horizons.to_vec()
        };

        let mut dates = Vec::with_capacity(horizons.len());
        for &h in &horizons {
            let date = if h <= MAX_HORIZON_DAYS {
                as_of.checked_add_signed(Duration::days(i64::from(h)))
            } else {
                None
            };
            match date {
                Some(date) => dates.push(date),
                None => {
                    tracing::warn!(
                        biomarker = biomarker_key,
                        horizon_days = h,
                        "horizon out of range"
                    );
                    return ForecastOutcome::Unavailable {
                        biomarker_key: biomarker_key.to_string(),
                        limitation: Limitation::HorizonOutOfRange {
                            horizon_days: h,
                            max_days: MAX_HORIZON_DAYS,
                        },
                    };
                }
            }
        }

        let mut history: Vec<&LabReading> = readings
            .iter()
            .filter(|r| r.biomarker_key == biomarker_key && r.test_date <= as_of)
            .filter(|r| r.value.is_finite())
            .collect();
        history.sort_by_key(|r| r.test_date);
        let keep_from = history.len().saturating_sub(self.config.max_training_points);
        let history = &history[keep_from..];

        let values: Vec<f64> = history.iter().map(|r| r.value).collect();
        let center = mean(&values).unwrap_or(0.0);
        let scale = sample_std_dev(&values)
            .filter(|s| *s > 0.0)
            .unwrap_or_else(|| (0.1 * center.abs()).max(1.0));

        let x: Vec<f64> = history
            .iter()
            .map(|r| (r.test_date - as_of).num_days() as f64)
            .collect();
        let y: Vec<f64> = values.iter().map(|v| (v - center) / scale).collect();
        let x_star: Vec<f64> = horizons.iter().map(|&h| f64::from(h)).collect();

        tracing::debug!(
            biomarker = biomarker_key,
            kernel = kernel.name(),
            points = x.len(),
            horizons = x_star.len(),
            "gp forecast"
        );

        let posterior = match gp_posterior(&kernel, self.config.noise_variance, &x, &y, &x_star) {
            Ok(posterior) => posterior,
            Err(err) => {
                tracing::warn!(biomarker = biomarker_key, error = %err, "gp forecast unavailable");
                return ForecastOutcome::Unavailable {
                    biomarker_key: biomarker_key.to_string(),
                    limitation: Limitation::NumericalInstability {
                        detail: err.to_string(),
                    },
                };
            }
        };

        let mean: Vec<f64> = posterior.mean.iter().map(|m| m * scale + center).collect();
        let variance: Vec<f64> = posterior
            .variance
            .iter()
            .map(|v| (v * scale * scale).max(VARIANCE_FLOOR))
            .collect();

        let furthest = horizons
            .iter()
            .enumerate()
            .max_by_key(|(_, h)| **h)
            .map(|(i, _)| i);
        let threshold_cross_probability = threshold
            .zip(furthest)
            .map(|(t, i)| t.crossing_probability(mean[i], variance[i]));

        ForecastOutcome::Available(GpForecast {
            biomarker_key: biomarker_key.to_string(),
            kernel,
            training_points: history.len(),
            used_prior: history.is_empty(),
            dates,
            horizons_days: horizons,
            mean,
            variance,
            threshold,
            threshold_cross_probability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap() + Duration::days(offset)
    }

    fn make_readings(key: &str, points: &[(i64, f64)]) -> Vec<LabReading> {
        points
            .iter()
            .map(|&(offset, value)| LabReading::new(key, value, "mg/dL", day(offset)))
            .collect()
    }

    #[test]
    fn test_no_history_returns_prior() {
        let engine = ForecastEngine::default();
        let outcome = engine.forecast("ldl", &[], day(0), &[30, 90], None);
        let forecast = outcome.forecast().unwrap();

        assert!(forecast.used_prior);
        assert_eq!(forecast.training_points, 0);
        assert_eq!(forecast.mean, vec![0.0, 0.0]);
        assert_eq!(forecast.variance, vec![1.0, 1.0]);
        assert_eq!(forecast.dates, vec![day(30), day(90)]);
    }

    #[test]
    fn test_threshold_probability_from_prior() {
        let outcome = ForecastEngine::default().forecast(
            "ldl",
            &[],
            day(0),
            &[90],
            Some(Threshold {
                value: 0.5,
                direction: ThresholdDirection::Above,
            }),
        );
        let forecast = outcome.forecast().unwrap();

        assert!(forecast.used_prior);
        // P(N(0, 1) > 0.5)
        let probability = forecast.threshold_cross_probability.unwrap();
        assert!((probability - 0.3085).abs() < 1e-3);
    }

    #[test]
    fn test_horizon_out_of_range_is_unavailable() {
        let readings = make_readings("ldl", &[(-90, 130.0), (0, 128.0)]);
        let outcome =
            ForecastEngine::default().forecast("ldl", &readings, day(0), &[90, 4_000_000_000], None);

        assert!(outcome.forecast().is_none());
        assert_eq!(
            outcome,
            ForecastOutcome::Unavailable {
                biomarker_key: "ldl".to_string(),
                limitation: Limitation::HorizonOutOfRange {
                    horizon_days: 4_000_000_000,
                    max_days: MAX_HORIZON_DAYS,
                },
            }
        );
    }

    #[test]
    fn test_forecast_tracks_level_and_widens() {
        let readings = make_readings(
            "ldl",
            &[(-360, 128.0), (-270, 132.0), (-180, 126.0), (-90, 130.0), (0, 129.0)],
        );
        let engine = ForecastEngine::default();
        let forecast = engine
            .forecast("ldl", &readings, day(0), &[30, 180, 720], None)
            .forecast()
            .cloned()
            .unwrap();

        assert_eq!(forecast.training_points, 5);
        assert!(!forecast.used_prior);
        assert!((forecast.mean[0] - 129.0).abs() < 3.0);
        assert!(forecast.variance[0] < forecast.variance[1]);
        assert!(forecast.variance[1] < forecast.variance[2]);
        // Far from data the mean reverts to the training mean
        assert!((forecast.mean[2] - 129.0).abs() < 1.0);
    }

    #[test]
    fn test_threshold_probability_at_furthest_horizon() {
        let readings = make_readings("hba1c", &[(-180, 5.4), (-90, 5.6), (0, 5.8)]);
        let engine = ForecastEngine::default();
        let above = engine
            .forecast(
                "hba1c",
                &readings,
                day(0),
                &[90],
                Some(Threshold {
                    value: 6.5,
                    direction: ThresholdDirection::Above,
                }),
            )
            .forecast()
            .and_then(|f| f.threshold_cross_probability)
            .unwrap();
        let below = engine
            .forecast(
                "hba1c",
                &readings,
                day(0),
                &[90],
                Some(Threshold {
                    value: 6.5,
                    direction: ThresholdDirection::Below,
                }),
            )
            .forecast()
            .and_then(|f| f.threshold_cross_probability)
            .unwrap();

        assert!(above < 0.5);
        assert!((above + below - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_other_biomarkers_and_future_draws_ignored() {
        let mut readings = make_readings("crp", &[(-60, 1.2), (-30, 0.9)]);
        readings.extend(make_readings("ldl", &[(-30, 140.0)]));
        readings.extend(make_readings("crp", &[(30, 9.0)]));
        let forecast = ForecastEngine::default()
            .forecast("crp", &readings, day(0), &[], None)
            .forecast()
            .cloned()
            .unwrap();
        assert_eq!(forecast.training_points, 2);
        assert_eq!(forecast.horizons_days, vec![30, 90, 180]);
        assert_eq!(forecast.kernel.name(), "matern32");
    }

    #[test]
    fn test_noise_free_interpolation() {
        let kernel = Kernel::Rbf {
            lengthscale: 10.0,
            variance: 1.0,
        };
        let posterior =
            gp_posterior(&kernel, 0.0, &[0.0, 20.0], &[1.0, -1.0], &[0.0, 20.0]).unwrap();
        assert!((posterior.mean[0] - 1.0).abs() < 1e-6);
        assert!((posterior.mean[1] + 1.0).abs() < 1e-6);
        assert!(posterior.variance.iter().all(|v| *v < 1e-5));
    }

    #[test]
    fn test_kernel_table_lookup() {
        let table = KernelTable::standard();
        assert_eq!(table.kernel_for("vitamin_d").name(), "periodic");
        assert_eq!(table.kernel_for("unknown_marker").name(), "matern52");
        assert_eq!(table.len(), 8);
    }

    #[test]
    fn test_kernel_table_rejects_bad_hyperparameters() {
        assert!(KernelTable::standard().validate().is_ok());

        let zero_lengthscale = KernelTable::standard().with_entry(
            "ldl",
            Kernel::Matern52 {
                lengthscale: 0.0,
                variance: 1.0,
            },
        );
        let err = zero_lengthscale.validate().unwrap_err();
        assert!(
            matches!(&err, InsightError::InvalidInput { field, .. } if field == "kernels.ldl.lengthscale"),
            "unexpected error: {err}"
        );

        let negative_period = KernelTable::new(Kernel::Periodic {
            period: -365.0,
            lengthscale: 1.0,
            variance: 1.0,
        });
        let err = negative_period.validate().unwrap_err();
        assert!(
            matches!(&err, InsightError::InvalidInput { field, .. } if field == "kernels.default.period"),
            "unexpected error: {err}"
        );

        let nan_variance = KernelTable::new(Kernel::Rbf {
            lengthscale: 30.0,
            variance: f64::NAN,
        });
        assert!(nan_variance.validate().is_err());
    }

    #[test]
    fn test_unavailable_serializes_with_status() {
        let outcome = ForecastOutcome::Unavailable {
            biomarker_key: "ldl".to_string(),
            limitation: Limitation::NumericalInstability {
                detail: "not positive definite".to_string(),
            },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "unavailable");
        assert_eq!(value["limitation"]["kind"], "numerical_instability");
    }

    fn kernel_strategy() -> impl Strategy<Value = Kernel> {
        (0usize..4, 1.0f64..400.0, 0.01f64..10.0).prop_map(|(which, lengthscale, variance)| {
            match which {
                0 => Kernel::Rbf { lengthscale, variance },
                1 => Kernel::Matern32 { lengthscale, variance },
                2 => Kernel::Matern52 { lengthscale, variance },
                _ => Kernel::Periodic {
                    period: 365.0,
                    lengthscale: lengthscale / 100.0,
                    variance,
                },
            }
        })
    }

    proptest! {
        #[test]
        fn prop_posterior_variance_never_negative(
            kernel in kernel_strategy(),
            noise in 0.0f64..1.0,
            points in proptest::collection::vec((-720.0f64..0.0, -3.0f64..3.0), 0..15),
            queries in proptest::collection::vec(-720.0f64..720.0, 1..10),
        ) {
            let x: Vec<f64> = points.iter().map(|p| p.0).collect();
            let y: Vec<f64> = points.iter().map(|p| p.1).collect();
            if let Ok(posterior) = gp_posterior(&kernel, noise, &x, &y, &queries) {
                prop_assert!(posterior.variance.iter().all(|v| *v >= VARIANCE_FLOOR));
            }
        }
    }
}
