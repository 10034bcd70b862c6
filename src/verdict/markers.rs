//! Lab marker deltas and per-marker assessment

use super::effects::EffectDirection;
use crate::schema::{FlagStatus, LabDraw};
use serde::{Deserialize, Serialize};

/// |percent change| at which a marker movement counts as significant
pub const DEFAULT_SIGNIFICANCE_PERCENT: f64 = 5.0;
/// Smallest |percent change| that still counts as a partial response
pub const DEFAULT_PARTIAL_PERCENT: f64 = 1.0;

/// Change in one biomarker between two draws
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDelta {
    pub biomarker_key: String,
    pub previous_value: f64,
    pub current_value: f64,
    pub absolute_delta: f64,
    pub percent_delta: f64,
    pub is_significant: bool,
}

/// Deltas for every biomarker present in both draws, in `current` panel order.
///
/// Markers whose previous value is zero have no defined percent change and are
/// skipped.
pub fn compute_marker_deltas(
    previous: &LabDraw,
    current: &LabDraw,
    significance_pct: f64,
) -> Vec<MarkerDelta> {
    current
        .readings
        .iter()
        .filter_map(|reading| {
            let before = previous.value_of(&reading.biomarker_key)?;
            if before == 0.0 {
                return None;
            }
            let absolute_delta = reading.value - before;
            let percent_delta = absolute_delta / before.abs() * 100.0;
            Some(MarkerDelta {
                biomarker_key: reading.biomarker_key.clone(),
                previous_value: before,
                current_value: reading.value,
                absolute_delta,
                percent_delta,
                is_significant: percent_delta.abs() >= significance_pct,
            })
        })
        .collect()
}

/// How one expected marker responded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerOutcome {
    Matched,
    Partial,
    NoEffect,
    Opposite,
}

impl MarkerOutcome {
    /// Classify a percent change against the expected direction
    pub fn classify(
        direction: EffectDirection,
        percent_delta: f64,
        significance_pct: f64,
        partial_pct: f64,
    ) -> Self {
        let magnitude = percent_delta.abs();
        let expected = direction.matches(percent_delta);
        if magnitude >= significance_pct {
            if expected {
                MarkerOutcome::Matched
            } else {
                MarkerOutcome::Opposite
            }
        } else if expected && magnitude >= partial_pct {
            MarkerOutcome::Partial
        } else {
            MarkerOutcome::NoEffect
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerOutcome::Matched => "matched",
            MarkerOutcome::Partial => "partial",
            MarkerOutcome::NoEffect => "no_effect",
            MarkerOutcome::Opposite => "opposite",
        }
    }
}

/// An expected marker found in the panel, scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerAssessment {
    pub biomarker_key: String,
    pub expected_direction: EffectDirection,
    pub percent_delta: f64,
    pub outcome: MarkerOutcome,
    /// Current lab flag, when the lab reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<FlagStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LabReading;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn make_draw(day: u32, readings: &[(&str, f64)]) -> LabDraw {
        let test_date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        LabDraw {
            draw_id: None,
            test_date,
            readings: readings
                .iter()
                .map(|(key, value)| LabReading::new(*key, *value, "u", test_date))
                .collect(),
        }
    }

    #[test]
    fn test_deltas_cover_shared_markers_only() {
        let previous = make_draw(1, &[("ldl", 130.0), ("hdl", 50.0), ("crp", 0.0)]);
        let current = make_draw(20, &[("ldl", 117.0), ("crp", 1.2), ("apob", 90.0)]);

        let deltas = compute_marker_deltas(&previous, &current, DEFAULT_SIGNIFICANCE_PERCENT);
        assert_eq!(deltas.len(), 1);
        let ldl = &deltas[0];
        assert_eq!(ldl.biomarker_key, "ldl");
        assert!((ldl.absolute_delta + 13.0).abs() < 1e-9);
        assert!((ldl.percent_delta + 10.0).abs() < 1e-9);
        assert!(ldl.is_significant);
    }

    #[test]
    fn test_small_delta_not_significant() {
        let previous = make_draw(1, &[("hba1c", 5.6)]);
        let current = make_draw(20, &[("hba1c", 5.5)]);
        let deltas = compute_marker_deltas(&previous, &current, DEFAULT_SIGNIFICANCE_PERCENT);
        assert!(!deltas[0].is_significant);
    }

    #[test]
    fn test_outcome_classification() {
        let classify = |direction, pct| {
            MarkerOutcome::classify(
                direction,
                pct,
                DEFAULT_SIGNIFICANCE_PERCENT,
                DEFAULT_PARTIAL_PERCENT,
            )
        };
        use EffectDirection::{Decrease, Increase};

        assert_eq!(classify(Increase, 8.0), MarkerOutcome::Matched);
        assert_eq!(classify(Decrease, -5.0), MarkerOutcome::Matched);
        assert_eq!(classify(Increase, -6.0), MarkerOutcome::Opposite);
        assert_eq!(classify(Increase, 3.0), MarkerOutcome::Partial);
        assert_eq!(classify(Increase, 0.5), MarkerOutcome::NoEffect);
        assert_eq!(classify(Decrease, 3.0), MarkerOutcome::NoEffect);
    }
}
