//! Protocol-lab effectiveness verdicts
//!
//! Scores an intervention against the change between two lab draws. Each
//! expected marker found in the panel is classified, the counts are run
//! through an ordered rule cascade ([`VERDICT_RULES`]), and the first
//! matching rule fixes the verdict, confidence and rationale. The
//! recommendation follows from verdict and rationale alone.

mod effects;
mod markers;
mod rules;

pub use effects::*;
pub use markers::*;
pub use rules::*;

use crate::correlation::humanize;
use crate::schema::{BiomarkerFlag, InterventionRecord, InterventionStatus, LabDraw};
use crate::types::{ConfidenceLevel, Limitation};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Days before opposite movement is treated as a possible adverse effect
pub const DEFAULT_ADVERSE_MIN_DAYS: i64 = 60;
/// Days before matched markers count as working
pub const DEFAULT_WORKING_MIN_DAYS: i64 = 60;
/// Days for a full course; governs not_working and high-confidence working
pub const DEFAULT_FULL_COURSE_DAYS: i64 = 90;
/// Adherence required for working and not_working
pub const DEFAULT_MIN_ADHERENCE_PERCENT: f64 = 70.0;
/// Adherence below this makes a verdict unclear for low adherence
pub const DEFAULT_LOW_ADHERENCE_PERCENT: f64 = 50.0;

/// Verdict engine thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictConfig {
    pub significance_percent: f64,
    pub partial_percent: f64,
    pub adverse_min_days: i64,
    /// Opposite markers for high-confidence possible_adverse
    pub adverse_high_min_opposite: usize,
    pub working_min_days: i64,
    /// Matched markers for high-confidence working
    pub working_high_min_matched: usize,
    pub full_course_days: i64,
    pub not_working_high_min_days: i64,
    pub min_adherence_percent: f64,
    pub high_adherence_percent: f64,
    pub low_adherence_percent: f64,
    pub early_signal_checkpoint_days: u32,
    pub default_checkpoint_days: u32,
}

impl Default for VerdictConfig {
    fn default() -> Self {
        Self {
            significance_percent: DEFAULT_SIGNIFICANCE_PERCENT,
            partial_percent: DEFAULT_PARTIAL_PERCENT,
            adverse_min_days: DEFAULT_ADVERSE_MIN_DAYS,
            adverse_high_min_opposite: 2,
            working_min_days: DEFAULT_WORKING_MIN_DAYS,
            working_high_min_matched: 2,
            full_course_days: DEFAULT_FULL_COURSE_DAYS,
            not_working_high_min_days: 120,
            min_adherence_percent: DEFAULT_MIN_ADHERENCE_PERCENT,
            high_adherence_percent: 80.0,
            low_adherence_percent: DEFAULT_LOW_ADHERENCE_PERCENT,
            early_signal_checkpoint_days: 60,
            default_checkpoint_days: 90,
        }
    }
}

/// Categorical judgment on an intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Working,
    EarlySignal,
    Unclear,
    NotWorking,
    PossibleAdverse,
}

impl Verdict {
    /// Sort key for batches, most urgent highest
    pub fn severity(&self) -> u8 {
        match self {
            Verdict::PossibleAdverse => 4,
            Verdict::NotWorking => 3,
            Verdict::Working => 2,
            Verdict::EarlySignal => 1,
            Verdict::Unclear => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Working => "working",
            Verdict::EarlySignal => "early_signal",
            Verdict::Unclear => "unclear",
            Verdict::NotWorking => "not_working",
            Verdict::PossibleAdverse => "possible_adverse",
        }
    }
}

/// Verdict for one intervention against one pair of draws
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessVerdict {
    pub intervention_id: String,
    pub intervention_name: String,
    pub verdict: Verdict,
    pub confidence: ConfidenceLevel,
    pub rationale: Rationale,
    /// Name of the rule that fired
    pub rule: String,
    pub explanation: String,
    pub recommendation: Recommendation,
    pub target_markers: Vec<MarkerAssessment>,
    pub next_checkpoint_days: u32,
    pub days_active: i64,
    pub adherence_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_kind: Option<MatchKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limitations: Vec<Limitation>,
}

/// Scores interventions against lab deltas
#[derive(Debug, Clone, Default)]
pub struct VerdictEngine {
    config: VerdictConfig,
    effects: ExpectedEffectTable,
}

impl VerdictEngine {
    pub fn new(config: VerdictConfig, effects: ExpectedEffectTable) -> Self {
        Self { config, effects }
    }

    pub fn config(&self) -> &VerdictConfig {
        &self.config
    }

    pub fn effects(&self) -> &ExpectedEffectTable {
        &self.effects
    }

    /// Verdict for one intervention given precomputed marker deltas
    pub fn evaluate(
        &self,
        intervention: &InterventionRecord,
        deltas: &[MarkerDelta],
        flags: &[BiomarkerFlag],
        as_of: NaiveDate,
    ) -> EffectivenessVerdict {
        let days_active = intervention.days_active(as_of);
        let mut limitations = Vec::new();
        let mut target_markers = Vec::new();

        let found = self.effects.lookup(&intervention.canonical_name);
        match found {
            Some(found) => {
                for effect in &found.entry.effects {
                    let Some(delta) = deltas
                        .iter()
                        .find(|d| d.biomarker_key == effect.biomarker_key)
                    else {
                        limitations.push(Limitation::OutOfPanel {
                            biomarker_key: effect.biomarker_key.clone(),
                        });
                        continue;
                    };
                    target_markers.push(MarkerAssessment {
                        biomarker_key: effect.biomarker_key.clone(),
                        expected_direction: effect.direction,
                        percent_delta: delta.percent_delta,
                        outcome: MarkerOutcome::classify(
                            effect.direction,
                            delta.percent_delta,
                            self.config.significance_percent,
                            self.config.partial_percent,
                        ),
                        flag: flags
                            .iter()
                            .find(|f| f.biomarker_key == effect.biomarker_key)
                            .map(|f| f.status),
                    });
                }
            }
            None => {
                warn!(
                    intervention = %intervention.canonical_name,
                    "no expected marker effects for intervention"
                );
                limitations.push(Limitation::UnmappedIntervention {
                    intervention: intervention.canonical_name.clone(),
                });
            }
        }

        let count = |outcome: MarkerOutcome| {
            target_markers
                .iter()
                .filter(|m| m.outcome == outcome)
                .count()
        };
        let facts = VerdictFacts {
            has_mapping: found.is_some(),
            tested: target_markers.len(),
            matched: count(MarkerOutcome::Matched),
            partial: count(MarkerOutcome::Partial),
            opposite: count(MarkerOutcome::Opposite),
            no_effect: count(MarkerOutcome::NoEffect),
            adherence_percent: intervention.adherence_percent,
            days_active,
        };

        let (rule, outcome) = apply_rules(&facts, &self.config);
        debug!(
            intervention = %intervention.id,
            rule,
            verdict = outcome.verdict.as_str(),
            tested = facts.tested,
            matched = facts.matched,
            opposite = facts.opposite,
            "verdict rule fired"
        );

        let next_checkpoint_days = match outcome.verdict {
            Verdict::EarlySignal => self.config.early_signal_checkpoint_days,
            _ => self.config.default_checkpoint_days,
        };

        EffectivenessVerdict {
            intervention_id: intervention.id.clone(),
            intervention_name: intervention.canonical_name.clone(),
            verdict: outcome.verdict,
            confidence: outcome.confidence,
            rationale: outcome.rationale,
            rule: rule.to_string(),
            explanation: explain(
                &intervention.canonical_name,
                &outcome,
                &facts,
                &target_markers,
            ),
            recommendation: Recommendation::for_outcome(outcome.verdict, outcome.rationale),
            target_markers,
            next_checkpoint_days,
            days_active,
            adherence_percent: intervention.adherence_percent,
            match_kind: found.map(|f| f.match_kind),
            limitations,
        }
    }

    /// Score every active or paused intervention against one draw pair.
    ///
    /// Sorted by severity, most urgent first, then by intervention id.
    pub fn verdicts_for_draw(
        &self,
        interventions: &[InterventionRecord],
        previous: &LabDraw,
        current: &LabDraw,
        flags: &[BiomarkerFlag],
    ) -> Vec<EffectivenessVerdict> {
        let deltas = compute_marker_deltas(previous, current, self.config.significance_percent);
        debug!(
            interventions = interventions.len(),
            deltas = deltas.len(),
            test_date = %current.test_date,
            "scoring interventions against lab draw"
        );

        let mut verdicts: Vec<EffectivenessVerdict> = interventions
            .iter()
            .filter(|i| i.status != InterventionStatus::Completed)
            .map(|i| self.evaluate(i, &deltas, flags, current.test_date))
            .collect();
        verdicts.sort_by(|a, b| {
            b.verdict
                .severity()
                .cmp(&a.verdict.severity())
                .then_with(|| a.intervention_id.cmp(&b.intervention_id))
        });
        verdicts
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

fn describe_marker(marker: &MarkerAssessment) -> String {
    let flag = match marker.flag {
        Some(status) if status.is_abnormal() => format!(", flagged {}", status.as_str()),
        _ => String::new(),
    };
    format!(
        "{} {:+.1}% ({}{})",
        marker.biomarker_key,
        marker.percent_delta,
        marker.outcome.as_str(),
        flag
    )
}

fn explain(
    name: &str,
    outcome: &RuleOutcome,
    facts: &VerdictFacts,
    markers: &[MarkerAssessment],
) -> String {
    let name = humanize(name);
    let days = facts.days_active;
    let adherence = facts.adherence_percent;

    let headline = match outcome.rationale {
        Rationale::NoMapping => format!("No expected lab effects are known for {}.", name),
        Rationale::MarkersNotInPanel => format!(
            "None of the markers {} is expected to move were in this lab panel.",
            name
        ),
        Rationale::OppositeMovement => format!(
            "{} moved against the expected direction after {} days on {}.",
            plural(facts.opposite, "target marker"),
            days,
            name
        ),
        Rationale::TargetsMatched => format!(
            "{} of {} tested markers moved as expected after {} days on {} at {:.0}% adherence.",
            facts.matched, facts.tested, days, name, adherence
        ),
        Rationale::EarlyMatch => format!(
            "{} of {} tested markers already moved as expected after {} days on {}.",
            facts.matched, facts.tested, days, name
        ),
        Rationale::NoMeasurableEffect => format!(
            "No target marker moved meaningfully after {} days on {} at {:.0}% adherence.",
            days, name, adherence
        ),
        Rationale::LowAdherence => format!(
            "Adherence to {} is {:.0}%, too low to judge its lab effects.",
            name, adherence
        ),
        Rationale::TooEarly => format!(
            "{} has been active for {} days; lab effects need more time to show.",
            name, days
        ),
        Rationale::Inconclusive => {
            format!("Lab results for {} are mixed or too small to call.", name)
        }
    };

    if markers.is_empty() {
        return headline;
    }
    let details: Vec<String> = markers.iter().map(describe_marker).collect();
    format!("{} Markers: {}.", headline, details.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FlagStatus, LabReading};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn make_engine() -> VerdictEngine {
        VerdictEngine::new(VerdictConfig::default(), ExpectedEffectTable::standard())
    }

    fn make_intervention(id: &str, name: &str, days: i64, adherence: f64) -> InterventionRecord {
        InterventionRecord {
            id: id.to_string(),
            canonical_name: name.to_string(),
            start_date: as_of() - Duration::days(days),
            end_date: None,
            adherence_percent: adherence,
            status: InterventionStatus::Active,
        }
    }

    fn make_draw(date: NaiveDate, readings: &[(&str, f64)]) -> LabDraw {
        LabDraw {
            draw_id: None,
            test_date: date,
            readings: readings
                .iter()
                .map(|(key, value)| LabReading::new(*key, *value, "u", date))
                .collect(),
        }
    }

    fn make_draws(previous: &[(&str, f64)], current: &[(&str, f64)]) -> (LabDraw, LabDraw) {
        (
            make_draw(as_of() - Duration::days(90), previous),
            make_draw(as_of(), current),
        )
    }

    #[test]
    fn test_single_early_match_is_early_signal() {
        let engine = make_engine();
        let intervention = make_intervention("int-1", "vitamin_d3", 45, 85.0);
        let (previous, current) = make_draws(&[("vitamin_d", 30.0)], &[("vitamin_d", 32.4)]);

        let verdicts = engine.verdicts_for_draw(&[intervention], &previous, &current, &[]);
        let verdict = &verdicts[0];

        assert_eq!(verdict.verdict, Verdict::EarlySignal);
        assert_eq!(verdict.confidence, ConfidenceLevel::Low);
        assert_eq!(verdict.recommendation, Recommendation::Continue);
        assert_eq!(verdict.next_checkpoint_days, 60);
        assert_eq!(verdict.target_markers[0].outcome, MarkerOutcome::Matched);
        assert_eq!(verdict.match_kind, Some(MatchKind::Exact));
    }

    #[test]
    fn test_two_matches_after_full_course_is_working() {
        let engine = make_engine();
        let intervention = make_intervention("int-2", "omega_3", 120, 90.0);
        let (previous, current) = make_draws(
            &[("triglycerides", 150.0), ("hdl", 50.0)],
            &[("triglycerides", 130.0), ("hdl", 55.0)],
        );

        let verdicts = engine.verdicts_for_draw(&[intervention], &previous, &current, &[]);
        let verdict = &verdicts[0];

        assert_eq!(verdict.verdict, Verdict::Working);
        assert_eq!(verdict.confidence, ConfidenceLevel::High);
        assert_eq!(verdict.recommendation, Recommendation::Continue);
        assert_eq!(verdict.next_checkpoint_days, 90);
        assert_eq!(verdict.rule, "targets_matched");
        assert!(verdict.limitations.is_empty());
    }

    #[test]
    fn test_unmapped_intervention_is_unclear() {
        let engine = VerdictEngine::default();
        let intervention = make_intervention("int-3", "bpc_157", 100, 95.0);
        let (previous, current) = make_draws(&[("ldl", 100.0)], &[("ldl", 80.0)]);
        let deltas = compute_marker_deltas(&previous, &current, DEFAULT_SIGNIFICANCE_PERCENT);

        let verdict = engine.evaluate(&intervention, &deltas, &[], as_of());
        assert_eq!(verdict.verdict, Verdict::Unclear);
        assert_eq!(verdict.rationale, Rationale::NoMapping);
        assert_eq!(verdict.match_kind, None);
        assert_eq!(
            verdict.limitations,
            vec![Limitation::UnmappedIntervention {
                intervention: "bpc_157".to_string()
            }]
        );
    }

    #[test]
    fn test_out_of_panel_markers_do_not_block() {
        let engine = make_engine();
        let intervention = make_intervention("int-4", "statin", 100, 90.0);
        let (previous, current) = make_draws(&[("ldl", 140.0)], &[("ldl", 100.0)]);

        let verdicts = engine.verdicts_for_draw(&[intervention], &previous, &current, &[]);
        let verdict = &verdicts[0];

        assert_eq!(verdict.verdict, Verdict::Working);
        assert_eq!(verdict.confidence, ConfidenceLevel::Medium);
        assert_eq!(
            verdict.limitations,
            vec![Limitation::OutOfPanel {
                biomarker_key: "apob".to_string()
            }]
        );
    }

    #[test]
    fn test_flags_annotate_explanation() {
        let engine = make_engine();
        let intervention = make_intervention("int-5", "statin", 90, 90.0);
        let (previous, current) = make_draws(&[("ldl", 130.0)], &[("ldl", 143.0)]);
        let flags = vec![BiomarkerFlag {
            biomarker_key: "ldl".to_string(),
            status: FlagStatus::High,
        }];

        let verdicts = engine.verdicts_for_draw(&[intervention], &previous, &current, &flags);
        let verdict = &verdicts[0];

        assert_eq!(verdict.verdict, Verdict::PossibleAdverse);
        assert_eq!(verdict.recommendation, Recommendation::DiscussWithClinician);
        assert_eq!(verdict.target_markers[0].flag, Some(FlagStatus::High));
        assert!(verdict.explanation.contains("ldl +10.0% (opposite, flagged high)"));
    }

    #[test]
    fn test_batch_sorted_by_severity_and_skips_completed() {
        let engine = make_engine();
        let mut finished = make_intervention("a-done", "berberine", 200, 95.0);
        finished.status = InterventionStatus::Completed;
        let interventions = vec![
            make_intervention("b-unmapped", "bpc_157", 100, 90.0),
            make_intervention("c-omega", "omega_3", 120, 90.0),
            make_intervention("d-statin", "statin", 90, 90.0),
            finished,
        ];
        let (previous, current) = make_draws(
            &[("ldl", 130.0), ("triglycerides", 150.0), ("hdl", 50.0)],
            &[("ldl", 143.0), ("triglycerides", 130.0), ("hdl", 55.0)],
        );

        let verdicts = engine.verdicts_for_draw(&interventions, &previous, &current, &[]);
        let order: Vec<(&str, Verdict)> = verdicts
            .iter()
            .map(|v| (v.intervention_id.as_str(), v.verdict))
            .collect();

        assert_eq!(
            order,
            vec![
                ("d-statin", Verdict::PossibleAdverse),
                ("c-omega", Verdict::Working),
                ("b-unmapped", Verdict::Unclear),
            ]
        );
    }

    #[test]
    fn test_verdict_serializes_snake_case() {
        let json = serde_json::to_string(&Verdict::PossibleAdverse).unwrap();
        assert_eq!(json, "\"possible_adverse\"");
    }

    proptest! {
        #[test]
        fn prop_recommendation_follows_verdict(
            pct in -30.0f64..30.0,
            days in 0i64..300,
            adherence in 0.0f64..=100.0,
        ) {
            let engine = make_engine();
            let intervention = make_intervention("p", "vitamin_d3", days, adherence);
            let after = 40.0 * (1.0 + pct / 100.0);
            let (previous, current) = make_draws(&[("vitamin_d", 40.0)], &[("vitamin_d", after)]);
            let verdict = engine
                .verdicts_for_draw(&[intervention], &previous, &current, &[])
                .remove(0);

            prop_assert_eq!(
                verdict.recommendation,
                Recommendation::for_outcome(verdict.verdict, verdict.rationale)
            );
            let expected_checkpoint = match verdict.verdict {
                Verdict::EarlySignal => 60,
                _ => 90,
            };
            prop_assert_eq!(verdict.next_checkpoint_days, expected_checkpoint);
        }
    }
}
