//! Bayesian online changepoint detection
//!
//! Maintains a posterior over run length ("observations since the current
//! regime began") for a stream of daily values. Each run-length hypothesis
//! carries Normal-Gamma sufficient statistics; the predictive density is the
//! conjugate Student-t.
//!
//! Run length `r` after observing index `t` means the current regime began at
//! index `t - r`, so `r = 0` is "a change happened at this observation". The
//! change branch scores the new point under the prior predictive, which makes
//! P(r = 0) respond to how surprising the point is for the existing runs.
//!
//! A spike in P(r = 0) only makes a candidate. The candidate is declared once
//! the run that began there still holds most of the posterior mass a few
//! observations later, so a lone outlier is not reported as a regime change.

use crate::stats::{log_sum_exp, mean, sample_std_dev, stable_normalize, student_t_log_pdf};
use serde::{Deserialize, Serialize};

/// Expected regime length of 50 observations
pub const DEFAULT_HAZARD_RATE: f64 = 1.0 / 50.0;

/// P(r = 0) above which a changepoint is declared
pub const DEFAULT_CHANGEPOINT_THRESHOLD: f64 = 0.5;

/// Observations seen before any changepoint may be declared
pub const DEFAULT_BURN_IN: usize = 5;

/// Hypotheses below this posterior mass are dropped
pub const DEFAULT_PRUNE_THRESHOLD: f64 = 1e-10;

/// Observations a candidate's run must persist for before it is declared
pub const DEFAULT_CONFIRMATION_STEPS: usize = 3;

/// Normal-Gamma prior hyperparameters, in standardized units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalGammaPrior {
    pub mu0: f64,
    pub kappa0: f64,
    pub alpha0: f64,
    pub beta0: f64,
}

impl Default for NormalGammaPrior {
    fn default() -> Self {
        Self {
            mu0: 0.0,
            kappa0: 1.0,
            alpha0: 1.0,
            beta0: 1.0,
        }
    }
}

/// Changepoint detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangepointConfig {
    /// Constant per-step probability of a regime change
    pub hazard_rate: f64,
    pub threshold: f64,
    pub burn_in: usize,
    pub prune_threshold: f64,
    pub confirmation_steps: usize,
    pub prior: NormalGammaPrior,
}

impl Default for ChangepointConfig {
    fn default() -> Self {
        Self {
            hazard_rate: DEFAULT_HAZARD_RATE,
            threshold: DEFAULT_CHANGEPOINT_THRESHOLD,
            burn_in: DEFAULT_BURN_IN,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            confirmation_steps: DEFAULT_CONFIRMATION_STEPS,
            prior: NormalGammaPrior::default(),
        }
    }
}

/// Posterior parameters of one run
#[derive(Debug, Clone, Copy, PartialEq)]
struct RunStats {
    mu: f64,
    kappa: f64,
    alpha: f64,
    beta: f64,
}

impl RunStats {
    fn from_prior(prior: &NormalGammaPrior) -> Self {
        Self {
            mu: prior.mu0,
            kappa: prior.kappa0,
            alpha: prior.alpha0,
            beta: prior.beta0,
        }
    }

    /// Student-t posterior predictive log density
    fn predictive_log_pdf(&self, x: f64) -> f64 {
        let nu = 2.0 * self.alpha;
        let scale = (self.beta * (self.kappa + 1.0) / (self.alpha * self.kappa)).sqrt();
        student_t_log_pdf(x, self.mu, scale, nu)
    }

    fn update(&self, x: f64) -> Self {
        let kappa = self.kappa + 1.0;
        let diff = x - self.mu;
        Self {
            mu: (self.kappa * self.mu + x) / kappa,
            kappa,
            alpha: self.alpha + 0.5,
            beta: self.beta + self.kappa * diff * diff / (2.0 * kappa),
        }
    }
}

#[derive(Debug, Clone)]
struct Hypothesis {
    run_length: usize,
    log_prob: f64,
    stats: RunStats,
}

/// Outcome of feeding one observation to the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangepointStep {
    pub index: usize,
    /// Posterior mass on run length 0
    pub change_probability: f64,
    pub map_run_length: usize,
    /// P(r = 0) crossed the threshold here
    pub is_candidate: bool,
    /// Earlier candidate whose run persisted, declared at this step
    pub confirmed_change: Option<usize>,
}

/// Online run-length posterior over a single stream
#[derive(Debug, Clone)]
pub struct ChangepointDetector {
    config: ChangepointConfig,
    hypotheses: Vec<Hypothesis>,
    observed: usize,
    pending: Option<usize>,
    changepoints: Vec<usize>,
}

impl Default for ChangepointDetector {
    fn default() -> Self {
        Self::new(ChangepointConfig::default())
    }
}

impl ChangepointDetector {
    pub fn new(config: ChangepointConfig) -> Self {
        Self {
            config,
            hypotheses: Vec::new(),
            observed: 0,
            pending: None,
            changepoints: Vec::new(),
        }
    }

    /// Number of observations consumed so far
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Indices of confirmed changepoints
    pub fn changepoints(&self) -> &[usize] {
        &self.changepoints
    }

    /// Consume one observation and update the run-length posterior
    pub fn update(&mut self, x: f64) -> ChangepointStep {
        let index = self.observed;
        self.observed += 1;

        let prior = RunStats::from_prior(&self.config.prior);

        if self.hypotheses.is_empty() {
            self.hypotheses.push(Hypothesis {
                run_length: 0,
                log_prob: 0.0,
                stats: prior.update(x),
            });
            return ChangepointStep {
                index,
                change_probability: 0.0,
                map_run_length: 0,
                is_candidate: false,
                confirmed_change: None,
            };
        }

        let hazard = self.config.hazard_rate.clamp(1e-12, 1.0 - 1e-12);
        let log_hazard = hazard.ln();
        let log_survive = (1.0 - hazard).ln();

        // Existing log probs are normalized, so the change branch collapses to
        // log(H) + prior predictive.
        let mut next = Vec::with_capacity(self.hypotheses.len() + 1);
        next.push(Hypothesis {
            run_length: 0,
            log_prob: log_hazard + prior.predictive_log_pdf(x),
            stats: prior.update(x),
        });
        for h in &self.hypotheses {
            next.push(Hypothesis {
                run_length: h.run_length + 1,
                log_prob: h.log_prob + log_survive + h.stats.predictive_log_pdf(x),
                stats: h.stats.update(x),
            });
        }

        let log_probs: Vec<f64> = next.iter().map(|h| h.log_prob).collect();
        let probs = stable_normalize(&log_probs);
        let map_position = argmax(&probs);

        let mut kept = Vec::with_capacity(next.len());
        for (position, (mut h, p)) in next.into_iter().zip(probs.iter().copied()).enumerate() {
            if p >= self.config.prune_threshold || position == map_position {
                h.log_prob = p.ln();
                kept.push(h);
            }
        }
        let total = log_sum_exp(&kept.iter().map(|h| h.log_prob).collect::<Vec<_>>());
        if total.is_finite() {
            for h in &mut kept {
                h.log_prob -= total;
            }
        }

        let change_probability = probs[0];
        let map_run_length = kept
            .iter()
            .max_by(|a, b| a.log_prob.total_cmp(&b.log_prob))
            .map_or(0, |h| h.run_length);
        self.hypotheses = kept;

        let is_candidate =
            index >= self.config.burn_in && change_probability > self.config.threshold;
        if is_candidate && self.pending.is_none() {
            self.pending = Some(index);
        }
        let confirmed_change = self.confirm_pending(index);

        ChangepointStep {
            index,
            change_probability,
            map_run_length,
            is_candidate,
            confirmed_change,
        }
    }

    /// Settle the pending candidate once it is `confirmation_steps` old
    fn confirm_pending(&mut self, index: usize) -> Option<usize> {
        let candidate = self.pending?;
        let age = index - candidate;
        if age < self.config.confirmation_steps {
            return None;
        }
        self.pending = None;

        let persisted: f64 = self
            .hypotheses
            .iter()
            .filter(|h| h.run_length == age)
            .map(|h| h.log_prob.exp())
            .sum();
        if persisted > self.config.threshold {
            tracing::debug!(index = candidate, persisted, "changepoint declared");
            self.changepoints.push(candidate);
            Some(candidate)
        } else {
            tracing::debug!(index = candidate, persisted, "changepoint candidate dropped");
            None
        }
    }

    /// Dense run-length distribution, index = run length
    pub fn run_length_probabilities(&self) -> Vec<f64> {
        let max_run = self
            .hypotheses
            .iter()
            .map(|h| h.run_length)
            .max()
            .unwrap_or(0);
        let mut dense = vec![0.0; max_run + 1];
        if self.hypotheses.is_empty() {
            return dense;
        }
        for h in &self.hypotheses {
            dense[h.run_length] = h.log_prob.exp();
        }
        dense
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}

/// Run-length posterior after a full series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangepointPosterior {
    /// Final posterior, index = run length
    pub run_length_probabilities: Vec<f64>,
    pub map_run_length: usize,
    /// Start of the most probable current regime, absent when it is the
    /// start of the series
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_probable_change_index: Option<usize>,
    /// P(r = 0) at each index (0 at the first index)
    pub change_probabilities: Vec<f64>,
    /// Indices of confirmed changepoints. A candidate within the last
    /// `confirmation_steps` observations is not yet reported.
    pub changepoints: Vec<usize>,
}

/// Run the detector over a whole series.
///
/// Values are standardized by the series mean and standard deviation first, so
/// the prior is scale free. Returns `None` for an empty series.
pub fn detect_changepoints(
    values: &[f64],
    config: &ChangepointConfig,
) -> Option<ChangepointPosterior> {
    let center = mean(values)?;
    let spread = sample_std_dev(values)
        .filter(|s| *s > 0.0 && s.is_finite())
        .unwrap_or(1.0);

    let mut detector = ChangepointDetector::new(config.clone());
    let mut change_probabilities = Vec::with_capacity(values.len());
    let mut map_run_length = 0;
    for &value in values {
        let step = detector.update((value - center) / spread);
        change_probabilities.push(step.change_probability);
        map_run_length = step.map_run_length;
    }

    let last = values.len() - 1;
    let regime_start = last.saturating_sub(map_run_length);
    Some(ChangepointPosterior {
        run_length_probabilities: detector.run_length_probabilities(),
        map_run_length,
        most_probable_change_index: (regime_start > 0).then_some(regime_start),
        change_probabilities,
        changepoints: detector.changepoints().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    /// Deterministic jitter in [-1, 1]
    fn noise(i: usize) -> f64 {
        ((i * 7) % 5) as f64 * 0.5 - 1.0
    }

    fn make_step_series(before: usize, after: usize, low: f64, high: f64) -> Vec<f64> {
        (0..before + after)
            .map(|i| if i < before { low } else { high } + noise(i))
            .collect()
    }

    #[test]
    fn test_detects_single_level_shift() {
        let values = make_step_series(30, 30, 50.0, 60.0);
        let posterior = detect_changepoints(&values, &ChangepointConfig::default()).unwrap();

        assert_eq!(posterior.changepoints, vec![30]);
        assert_eq!(posterior.most_probable_change_index, Some(30));
        assert_eq!(posterior.change_probabilities.len(), 60);
    }

    #[test]
    fn test_stationary_series_has_no_changepoints() {
        let values: Vec<f64> = (0..60).map(|i| 70.0 + noise(i)).collect();
        let posterior = detect_changepoints(&values, &ChangepointConfig::default()).unwrap();
        assert!(posterior.changepoints.is_empty());
        assert_eq!(posterior.most_probable_change_index, None);
    }

    #[test]
    fn test_constant_series_is_stable() {
        let posterior = detect_changepoints(&[5.0; 20], &ChangepointConfig::default()).unwrap();
        assert!(posterior.changepoints.is_empty());
        assert_eq!(posterior.map_run_length, 19);
    }

    #[test]
    fn test_single_spike_is_not_a_changepoint() {
        let mut values: Vec<f64> = (0..60).map(|i| 70.0 + noise(i)).collect();
        values[30] = 90.0;
        let posterior = detect_changepoints(&values, &ChangepointConfig::default()).unwrap();
        assert!(posterior.changepoints.is_empty());
        assert!(posterior.change_probabilities[30] > 0.5);

        let mut late = values.clone();
        late[30] = 70.0 + noise(30);
        late[57] = 90.0;
        let posterior = detect_changepoints(&late, &ChangepointConfig::default()).unwrap();
        assert!(posterior.changepoints.is_empty());
    }

    #[test]
    fn test_online_detector_confirms_after_persistence() {
        let mut detector = ChangepointDetector::default();
        let values = make_step_series(20, 10, 0.0, 10.0);
        let steps: Vec<ChangepointStep> = values.iter().map(|&v| detector.update(v)).collect();

        assert!(steps[20].is_candidate);
        assert_eq!(steps[20].confirmed_change, None);
        let confirmed_at = 20 + DEFAULT_CONFIRMATION_STEPS;
        assert_eq!(steps[confirmed_at].confirmed_change, Some(20));
        assert_eq!(detector.changepoints(), &[20]);
    }

    #[test]
    fn test_empty_series() {
        assert!(detect_changepoints(&[], &ChangepointConfig::default()).is_none());
    }

    #[test]
    fn test_burn_in_suppresses_early_declarations() {
        let config = ChangepointConfig {
            burn_in: 10,
            ..Default::default()
        };
        let values = make_step_series(3, 20, 0.0, 20.0);
        let posterior = detect_changepoints(&values, &config).unwrap();
        assert!(posterior.changepoints.iter().all(|&i| i >= 10));
    }

    #[test]
    fn test_online_detector_tracks_observations() {
        let mut detector = ChangepointDetector::default();
        let first = detector.update(0.1);
        assert_eq!(first.index, 0);
        assert!(!first.is_candidate);
        assert_eq!(first.confirmed_change, None);
        for i in 1..10 {
            detector.update(0.1 * noise(i));
        }
        assert_eq!(detector.observed(), 10);
        let total: f64 = detector.run_length_probabilities().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_run_length_posterior_is_normalized(
            values in proptest::collection::vec(-100.0f64..100.0, 1..80),
        ) {
            let posterior = detect_changepoints(&values, &ChangepointConfig::default()).unwrap();
            let total: f64 = posterior.run_length_probabilities.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-6);
            prop_assert!(posterior
                .change_probabilities
                .iter()
                .all(|p| (0.0..=1.0).contains(p)));
        }
    }
}
