//! Synheart Insight - On-device statistical inference for personal health data
//!
//! Insight turns one person's noisy, irregular health history into structured
//! judgments. Every entry point is a pure function of its inputs:
//! raw samples → daily aggregates → baselines → trend classification;
//! samples + intervention dates → correlation and N-of-1 causal estimates;
//! lab draws → GP forecasts and effectiveness verdicts.
//!
//! ## Modules
//!
//! - **Statistics**: Cholesky linear algebra, GP kernels, distributions
//! - **Baselines & classification**: rolling windows, zones, momentum, trend class
//! - **Interventions**: before/after correlation, OLS effect estimates, lab verdicts
//! - **Biomarkers**: GP forecasts and Bayesian changepoint detection

pub mod baseline;
pub mod causal;
pub mod changepoint;
pub mod classifier;
pub mod config;
pub mod correlation;
pub mod error;
pub mod forecast;
pub mod pipeline;
pub mod schema;
pub mod stats;
pub mod types;
pub mod verdict;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use error::InsightError;
pub use pipeline::{InsightEngine, MetricSummary};

// Schema exports
pub use schema::{
    InterventionRecord, LabDraw, LabReading, MetricSample, SampleAdapter, INPUT_SCHEMA_VERSION,
};

// Result exports
pub use causal::CausalOutcome;
pub use correlation::CorrelationResult;
pub use forecast::ForecastOutcome;
pub use types::{ConfidenceLevel, DailyAggregate, Limitation, MetricType};
pub use verdict::{EffectivenessVerdict, Verdict};

/// Insight version embedded in CLI and FFI output
pub const INSIGHT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-insight";
