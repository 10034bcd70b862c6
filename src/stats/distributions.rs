//! Densities, CDFs and log-space helpers

use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// ln(Gamma(x)) via the Lanczos approximation (g = 7, 9 terms)
pub fn ln_gamma(x: f64) -> f64 {
    if x <= 0.0 && x.fract() == 0.0 {
        return f64::INFINITY;
    }
    if x < 0.5 {
        // Reflection: Gamma(x) Gamma(1 - x) = pi / sin(pi x)
        let sin = (PI * x).sin().abs();
        return (PI / sin).ln() - ln_gamma(1.0 - x);
    }

    let z = x - 1.0;
    let mut series = LANCZOS_COEFFS[0];
    for (i, &c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        series += c / (z + i as f64);
    }
    let t = z + LANCZOS_G + 0.5;
    0.5 * (2.0 * PI).ln() + (z + 0.5) * t.ln() - t + series.ln()
}

/// Log density of a location-scale Student-t distribution.
///
/// `sigma` is the scale (not the variance) and `nu` the degrees of freedom.
pub fn student_t_log_pdf(x: f64, mu: f64, sigma: f64, nu: f64) -> f64 {
    let z = (x - mu) / sigma;
    ln_gamma(0.5 * (nu + 1.0))
        - ln_gamma(0.5 * nu)
        - 0.5 * (nu * PI).ln()
        - sigma.ln()
        - 0.5 * (nu + 1.0) * (z * z / nu).ln_1p()
}

/// ln(sum(exp(values))) without overflow. Empty input gives -inf.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Convert log-probabilities into probabilities that sum to 1.
///
/// When every entry is -inf the mass is spread uniformly.
pub fn stable_normalize(log_probs: &[f64]) -> Vec<f64> {
    if log_probs.is_empty() {
        return Vec::new();
    }
    let total = log_sum_exp(log_probs);
    if !total.is_finite() {
        let uniform = 1.0 / log_probs.len() as f64;
        return vec![uniform; log_probs.len()];
    }
    log_probs.iter().map(|&lp| (lp - total).exp()).collect()
}

/// Standard normal CDF, Abramowitz & Stegun 26.2.17 (|error| < 7.5e-8)
pub fn normal_cdf(x: f64) -> f64 {
    const P: f64 = 0.231_641_9;
    const B: [f64; 5] = [
        0.319_381_530,
        -0.356_563_782,
        1.781_477_937,
        -1.821_255_978,
        1.330_274_429,
    ];

    if x.is_nan() {
        return f64::NAN;
    }
    if x < 0.0 {
        return 1.0 - normal_cdf(-x);
    }

    let t = 1.0 / (1.0 + P * x);
    let density = (-0.5 * x * x).exp() / (2.0 * PI).sqrt();
    let poly = t * (B[0] + t * (B[1] + t * (B[2] + t * (B[3] + t * B[4]))));
    (1.0 - density * poly).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ln_gamma_known_values() {
        assert!((ln_gamma(1.0)).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - PI.sqrt().ln()).abs() < 1e-10);
        assert!((ln_gamma(0.25) - 3.625_609_908_221_908_f64.ln()).abs() < 1e-9);
        assert!(ln_gamma(0.0).is_infinite());
    }

    #[test]
    fn test_student_t_cauchy_peak() {
        // nu = 1 is Cauchy: density at the mode is 1/(pi * sigma)
        let lp = student_t_log_pdf(2.0, 2.0, 1.0, 1.0);
        assert!((lp + PI.ln()).abs() < 1e-9);

        let lp_scaled = student_t_log_pdf(2.0, 2.0, 3.0, 1.0);
        assert!((lp_scaled + (3.0 * PI).ln()).abs() < 1e-9);
    }

    #[test]
    fn test_student_t_approaches_normal() {
        let lp = student_t_log_pdf(1.0, 0.0, 1.0, 1e6);
        let normal = -0.5 - 0.5 * (2.0 * PI).ln();
        assert!((lp - normal).abs() < 1e-4);
    }

    #[test]
    fn test_log_sum_exp_edge_cases() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
        // Would overflow naively
        let big = log_sum_exp(&[1000.0, 1000.0]);
        assert!((big - (1000.0 + 2.0_f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn test_stable_normalize_uniform_fallback() {
        let probs = stable_normalize(&[f64::NEG_INFINITY; 4]);
        assert_eq!(probs, vec![0.25; 4]);
        assert!(stable_normalize(&[]).is_empty());
    }

    #[test]
    fn test_normal_cdf_known_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975_002).abs() < 1e-5);
        assert!((normal_cdf(-1.0) - 0.158_655).abs() < 1e-5);
        assert!(normal_cdf(10.0) <= 1.0);
        assert!(normal_cdf(-10.0) >= 0.0);
    }

    proptest! {
        #[test]
        fn prop_stable_normalize_sums_to_one(
            values in proptest::collection::vec(-500.0f64..500.0, 1..40),
        ) {
            let probs = stable_normalize(&values);
            let total: f64 = probs.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert!(probs.iter().all(|p| *p >= 0.0));
        }

        #[test]
        fn prop_log_sum_exp_matches_naive(
            values in proptest::collection::vec(-20.0f64..20.0, 1..20),
        ) {
            let naive = values.iter().map(|v| v.exp()).sum::<f64>().ln();
            prop_assert!((log_sum_exp(&values) - naive).abs() < 1e-9);
        }

        #[test]
        fn prop_normal_cdf_is_monotone(a in -8.0f64..8.0, b in -8.0f64..8.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(normal_cdf(lo) <= normal_cdf(hi) + 1e-7);
        }
    }
}
