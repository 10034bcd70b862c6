//! Statistical primitives
//!
//! Pure, deterministic numerical building blocks shared by the forecast,
//! changepoint, causal and baseline engines. Callers validate their inputs;
//! the only internal guard is [`VARIANCE_FLOOR`].

pub mod descriptive;
pub mod distributions;
pub mod kernels;
pub mod linalg;

pub use descriptive::{mean, percentile, sample_std_dev};
pub use distributions::{ln_gamma, log_sum_exp, normal_cdf, stable_normalize, student_t_log_pdf};
pub use kernels::Kernel;
pub use linalg::{
    cholesky_decompose, cholesky_decompose_with, cholesky_log_determinant, cholesky_solve,
    forward_substitute, CholeskyFactor, LinalgError, Matrix, JITTER_LADDER,
};

/// Smallest variance any engine will report
pub const VARIANCE_FLOOR: f64 = 1e-9;
