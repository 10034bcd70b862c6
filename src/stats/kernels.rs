//! Covariance kernels for Gaussian process regression
//!
//! Inputs are scalar day offsets; every kernel is stationary, so it only
//! depends on |x1 - x2|.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Squared exponential kernel
pub fn rbf(x1: f64, x2: f64, lengthscale: f64, variance: f64) -> f64 {
    let r = x1 - x2;
    variance * (-(r * r) / (2.0 * lengthscale * lengthscale)).exp()
}

/// Matérn kernel with nu = 3/2
pub fn matern32(x1: f64, x2: f64, lengthscale: f64, variance: f64) -> f64 {
    let scaled = 3.0_f64.sqrt() * (x1 - x2).abs() / lengthscale;
    variance * (1.0 + scaled) * (-scaled).exp()
}

/// Matérn kernel with nu = 5/2
pub fn matern52(x1: f64, x2: f64, lengthscale: f64, variance: f64) -> f64 {
    let r = (x1 - x2).abs() / lengthscale;
    let scaled = 5.0_f64.sqrt() * r;
    variance * (1.0 + scaled + 5.0 * r * r / 3.0) * (-scaled).exp()
}

/// Exp-sine-squared kernel for seasonal markers
pub fn periodic(x1: f64, x2: f64, period: f64, lengthscale: f64, variance: f64) -> f64 {
    let s = (PI * (x1 - x2).abs() / period).sin();
    variance * (-2.0 * s * s / (lengthscale * lengthscale)).exp()
}

/// Kernel choice plus hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kernel {
    Rbf {
        lengthscale: f64,
        variance: f64,
    },
    Matern32 {
        lengthscale: f64,
        variance: f64,
    },
    Matern52 {
        lengthscale: f64,
        variance: f64,
    },
    Periodic {
        period: f64,
        lengthscale: f64,
        variance: f64,
    },
}

impl Kernel {
    /// Evaluate k(x1, x2)
    pub fn evaluate(&self, x1: f64, x2: f64) -> f64 {
        match *self {
            Kernel::Rbf {
                lengthscale,
                variance,
            } => rbf(x1, x2, lengthscale, variance),
            Kernel::Matern32 {
                lengthscale,
                variance,
            } => matern32(x1, x2, lengthscale, variance),
            Kernel::Matern52 {
                lengthscale,
                variance,
            } => matern52(x1, x2, lengthscale, variance),
            Kernel::Periodic {
                period,
                lengthscale,
                variance,
            } => periodic(x1, x2, period, lengthscale, variance),
        }
    }

    /// k(x, x): the prior variance at any point
    pub fn prior_variance(&self) -> f64 {
        self.evaluate(0.0, 0.0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Rbf { .. } => "rbf",
            Kernel::Matern32 { .. } => "matern32",
            Kernel::Matern52 { .. } => "matern52",
            Kernel::Periodic { .. } => "periodic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernels_peak_at_zero_distance() {
        assert_eq!(rbf(3.0, 3.0, 10.0, 2.0), 2.0);
        assert_eq!(matern32(3.0, 3.0, 10.0, 2.0), 2.0);
        assert_eq!(matern52(3.0, 3.0, 10.0, 2.0), 2.0);
        assert_eq!(periodic(3.0, 3.0, 365.0, 1.0, 2.0), 2.0);
    }

    #[test]
    fn test_kernels_decay_with_distance() {
        let near = matern52(0.0, 5.0, 30.0, 1.0);
        let far = matern52(0.0, 50.0, 30.0, 1.0);
        assert!(near > far);
        assert!(far > 0.0);

        assert!(rbf(0.0, 10.0, 10.0, 1.0) < rbf(0.0, 1.0, 10.0, 1.0));
        assert!(matern32(0.0, 10.0, 10.0, 1.0) < matern32(0.0, 1.0, 10.0, 1.0));
    }

    #[test]
    fn test_kernels_are_symmetric() {
        let k = Kernel::Matern32 {
            lengthscale: 20.0,
            variance: 1.5,
        };
        assert_eq!(k.evaluate(-40.0, 12.0), k.evaluate(12.0, -40.0));
    }

    #[test]
    fn test_periodic_repeats_every_period() {
        let same_season = periodic(0.0, 365.0, 365.0, 1.0, 1.0);
        let opposite_season = periodic(0.0, 182.5, 365.0, 1.0, 1.0);
        assert!((same_season - 1.0).abs() < 1e-9);
        assert!(opposite_season < 0.2);
    }

    #[test]
    fn test_rbf_value() {
        // r = lengthscale => exp(-0.5)
        assert!((rbf(0.0, 10.0, 10.0, 1.0) - (-0.5_f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_kernel_serde_tag() {
        let k: Kernel =
            serde_json::from_str(r#"{"type":"matern52","lengthscale":90.0,"variance":1.0}"#)
                .unwrap();
        assert_eq!(k.name(), "matern52");
        assert_eq!(k.prior_variance(), 1.0);
    }
}
