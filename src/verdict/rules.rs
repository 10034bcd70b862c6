//! Ordered verdict rules, first match wins

use super::{Verdict, VerdictConfig};
use crate::types::ConfidenceLevel;
use serde::{Deserialize, Serialize};

/// Counts and context the rules are evaluated against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictFacts {
    /// The intervention resolved to an expected-effect entry
    pub has_mapping: bool,
    /// Expected markers present in the panel
    pub tested: usize,
    pub matched: usize,
    pub partial: usize,
    pub opposite: usize,
    pub no_effect: usize,
    pub adherence_percent: f64,
    pub days_active: i64,
}

/// Why a rule produced its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rationale {
    NoMapping,
    MarkersNotInPanel,
    OppositeMovement,
    TargetsMatched,
    EarlyMatch,
    NoMeasurableEffect,
    LowAdherence,
    TooEarly,
    Inconclusive,
}

/// Verdict, confidence and rationale chosen by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub verdict: Verdict,
    pub confidence: ConfidenceLevel,
    pub rationale: Rationale,
}

type Predicate = fn(&VerdictFacts, &VerdictConfig) -> bool;
type Decision = fn(&VerdictFacts, &VerdictConfig) -> RuleOutcome;

/// A named (predicate, outcome) pair
#[derive(Clone, Copy)]
pub struct VerdictRule {
    pub name: &'static str,
    pub applies: Predicate,
    pub outcome: Decision,
}

/// The cascade, evaluated top to bottom
pub const VERDICT_RULES: &[VerdictRule] = &[
    VerdictRule {
        name: "no_testable_markers",
        applies: |facts, _| facts.tested == 0,
        outcome: |facts, _| RuleOutcome {
            verdict: Verdict::Unclear,
            confidence: ConfidenceLevel::Low,
            rationale: if facts.has_mapping {
                Rationale::MarkersNotInPanel
            } else {
                Rationale::NoMapping
            },
        },
    },
    VerdictRule {
        name: "opposite_movement",
        applies: |facts, config| {
            facts.opposite >= 1 && facts.days_active >= config.adverse_min_days
        },
        outcome: |facts, config| RuleOutcome {
            verdict: Verdict::PossibleAdverse,
            confidence: if facts.opposite >= config.adverse_high_min_opposite {
                ConfidenceLevel::High
            } else {
                ConfidenceLevel::Medium
            },
            rationale: Rationale::OppositeMovement,
        },
    },
    VerdictRule {
        name: "targets_matched",
        applies: |facts, config| {
            facts.matched >= 1
                && facts.adherence_percent >= config.min_adherence_percent
                && facts.days_active >= config.working_min_days
        },
        outcome: |facts, config| {
            let high = facts.matched >= config.working_high_min_matched
                && facts.adherence_percent >= config.high_adherence_percent
                && facts.days_active >= config.full_course_days;
            RuleOutcome {
                verdict: Verdict::Working,
                confidence: if high {
                    ConfidenceLevel::High
                } else {
                    ConfidenceLevel::Medium
                },
                rationale: Rationale::TargetsMatched,
            }
        },
    },
    VerdictRule {
        name: "early_match",
        applies: |facts, config| {
            facts.matched >= 1 && facts.days_active < config.working_min_days
        },
        outcome: |_, _| RuleOutcome {
            verdict: Verdict::EarlySignal,
            confidence: ConfidenceLevel::Low,
            rationale: Rationale::EarlyMatch,
        },
    },
    VerdictRule {
        name: "no_effect_full_course",
        applies: |facts, config| {
            facts.no_effect == facts.tested
                && facts.adherence_percent >= config.min_adherence_percent
                && facts.days_active >= config.full_course_days
        },
        outcome: |facts, config| RuleOutcome {
            verdict: Verdict::NotWorking,
            confidence: if facts.days_active >= config.not_working_high_min_days
                && facts.adherence_percent >= config.high_adherence_percent
            {
                ConfidenceLevel::High
            } else {
                ConfidenceLevel::Medium
            },
            rationale: Rationale::NoMeasurableEffect,
        },
    },
    VerdictRule {
        name: "fallback_unclear",
        applies: |_, _| true,
        outcome: unclear,
    },
];

fn unclear(facts: &VerdictFacts, config: &VerdictConfig) -> RuleOutcome {
    // Adherence below the working floor blocked a verdict the markers supported
    let would_work = facts.matched >= 1 && facts.days_active >= config.working_min_days;
    let would_fail =
        facts.no_effect == facts.tested && facts.days_active >= config.full_course_days;
    let held_back =
        facts.adherence_percent < config.min_adherence_percent && (would_work || would_fail);
    let rationale = if facts.adherence_percent < config.low_adherence_percent || held_back {
        Rationale::LowAdherence
    } else if facts.days_active < config.full_course_days {
        Rationale::TooEarly
    } else {
        Rationale::Inconclusive
    };
    RuleOutcome {
        verdict: Verdict::Unclear,
        confidence: ConfidenceLevel::Low,
        rationale,
    }
}

/// Run the cascade; returns the matching rule's name and outcome
pub fn apply_rules(facts: &VerdictFacts, config: &VerdictConfig) -> (&'static str, RuleOutcome) {
    VERDICT_RULES
        .iter()
        .find(|rule| (rule.applies)(facts, config))
        .map(|rule| (rule.name, (rule.outcome)(facts, config)))
        .unwrap_or_else(|| ("fallback_unclear", unclear(facts, config)))
}

/// What the user should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Continue,
    ContinueAndImproveAdherence,
    ContinueAndWait,
    Pause,
    DiscussWithClinician,
}

impl Recommendation {
    pub fn for_outcome(verdict: Verdict, rationale: Rationale) -> Self {
        match verdict {
            Verdict::Working | Verdict::EarlySignal => Recommendation::Continue,
            Verdict::NotWorking => Recommendation::Pause,
            Verdict::PossibleAdverse => Recommendation::DiscussWithClinician,
            Verdict::Unclear => match rationale {
                Rationale::LowAdherence => Recommendation::ContinueAndImproveAdherence,
                _ => Recommendation::ContinueAndWait,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn make_facts(
        matched: usize,
        opposite: usize,
        no_effect: usize,
        adherence: f64,
        days: i64,
    ) -> VerdictFacts {
        VerdictFacts {
            has_mapping: true,
            tested: matched + opposite + no_effect,
            matched,
            partial: 0,
            opposite,
            no_effect,
            adherence_percent: adherence,
            days_active: days,
        }
    }

    fn rule_for(facts: &VerdictFacts) -> (&'static str, RuleOutcome) {
        apply_rules(facts, &VerdictConfig::default())
    }

    #[test]
    fn test_no_markers_tested() {
        let mut facts = make_facts(0, 0, 0, 90.0, 120);
        let (name, outcome) = rule_for(&facts);
        assert_eq!(name, "no_testable_markers");
        assert_eq!(outcome.rationale, Rationale::MarkersNotInPanel);

        facts.has_mapping = false;
        assert_eq!(rule_for(&facts).1.rationale, Rationale::NoMapping);
    }

    #[test]
    fn test_opposite_wins_over_matched() {
        let (name, outcome) = rule_for(&make_facts(2, 1, 0, 95.0, 100));
        assert_eq!(name, "opposite_movement");
        assert_eq!(outcome.verdict, Verdict::PossibleAdverse);
        assert_eq!(outcome.confidence, ConfidenceLevel::Medium);

        let (_, outcome) = rule_for(&make_facts(0, 2, 0, 95.0, 100));
        assert_eq!(outcome.confidence, ConfidenceLevel::High);
    }

    #[test]
    fn test_opposite_before_sixty_days_is_not_adverse() {
        let (_, outcome) = rule_for(&make_facts(0, 1, 0, 95.0, 30));
        assert_eq!(outcome.verdict, Verdict::Unclear);
        assert_eq!(outcome.rationale, Rationale::TooEarly);
    }

    #[test]
    fn test_working_confidence() {
        let (_, outcome) = rule_for(&make_facts(1, 0, 1, 75.0, 70));
        assert_eq!(outcome.verdict, Verdict::Working);
        assert_eq!(outcome.confidence, ConfidenceLevel::Medium);

        let (_, outcome) = rule_for(&make_facts(2, 0, 0, 80.0, 90));
        assert_eq!(outcome.confidence, ConfidenceLevel::High);
    }

    #[test]
    fn test_early_signal_ignores_adherence() {
        let (name, outcome) = rule_for(&make_facts(1, 0, 0, 40.0, 30));
        assert_eq!(name, "early_match");
        assert_eq!(outcome.verdict, Verdict::EarlySignal);
        assert_eq!(outcome.confidence, ConfidenceLevel::Low);
    }

    #[test]
    fn test_not_working() {
        let (_, outcome) = rule_for(&make_facts(0, 0, 2, 75.0, 95));
        assert_eq!(outcome.verdict, Verdict::NotWorking);
        assert_eq!(outcome.confidence, ConfidenceLevel::Medium);

        let (_, outcome) = rule_for(&make_facts(0, 0, 2, 85.0, 120));
        assert_eq!(outcome.confidence, ConfidenceLevel::High);
    }

    #[test]
    fn test_unclear_rationales() {
        assert_eq!(
            rule_for(&make_facts(0, 0, 2, 40.0, 120)).1.rationale,
            Rationale::LowAdherence
        );
        assert_eq!(
            rule_for(&make_facts(0, 0, 2, 90.0, 70)).1.rationale,
            Rationale::TooEarly
        );
        assert_eq!(
            rule_for(&make_facts(0, 1, 1, 90.0, 45)).1.rationale,
            Rationale::TooEarly
        );
        assert_eq!(
            rule_for(&make_facts(1, 1, 0, 90.0, 30)).1.verdict,
            Verdict::EarlySignal
        );
    }

    #[test]
    fn test_adherence_below_working_floor_blocks_match() {
        let (name, outcome) = rule_for(&make_facts(1, 0, 0, 60.0, 65));
        assert_eq!(name, "fallback_unclear");
        assert_eq!(outcome.verdict, Verdict::Unclear);
        assert_eq!(outcome.rationale, Rationale::LowAdherence);
        assert_eq!(
            Recommendation::for_outcome(outcome.verdict, outcome.rationale),
            Recommendation::ContinueAndImproveAdherence
        );

        // no effect over a full course, but taken only 60% of the time
        assert_eq!(
            rule_for(&make_facts(0, 0, 2, 60.0, 120)).1.rationale,
            Rationale::LowAdherence
        );
    }

    #[test]
    fn test_inconclusive_after_full_course() {
        let mut facts = make_facts(0, 0, 1, 90.0, 120);
        facts.partial = 1;
        facts.tested += 1;
        let (name, outcome) = rule_for(&facts);
        assert_eq!(name, "fallback_unclear");
        assert_eq!(outcome.rationale, Rationale::Inconclusive);
    }

    #[test]
    fn test_recommendation_table() {
        use Rationale::*;
        assert_eq!(
            Recommendation::for_outcome(Verdict::Unclear, LowAdherence),
            Recommendation::ContinueAndImproveAdherence
        );
        assert_eq!(
            Recommendation::for_outcome(Verdict::Unclear, TooEarly),
            Recommendation::ContinueAndWait
        );
        assert_eq!(
            Recommendation::for_outcome(Verdict::PossibleAdverse, OppositeMovement),
            Recommendation::DiscussWithClinician
        );
        assert_eq!(
            Recommendation::for_outcome(Verdict::NotWorking, NoMeasurableEffect),
            Recommendation::Pause
        );
    }

    proptest! {
        #[test]
        fn prop_cascade_is_closed_and_consistent(
            matched in 0usize..4,
            opposite in 0usize..3,
            no_effect in 0usize..4,
            partial in 0usize..3,
            adherence in 0.0f64..=100.0,
            days in 0i64..400,
            has_mapping in any::<bool>(),
        ) {
            let mut facts = make_facts(matched, opposite, no_effect, adherence, days);
            facts.partial = partial;
            facts.tested += partial;
            facts.has_mapping = has_mapping;

            let config = VerdictConfig::default();
            let (name, outcome) = apply_rules(&facts, &config);
            prop_assert!(VERDICT_RULES.iter().any(|rule| rule.name == name));

            match outcome.verdict {
                Verdict::Working => {
                    prop_assert!(facts.matched >= 1);
                    prop_assert!(facts.days_active >= config.working_min_days);
                }
                Verdict::EarlySignal => {
                    prop_assert!(facts.days_active < config.working_min_days);
                    prop_assert_eq!(outcome.confidence, ConfidenceLevel::Low);
                }
                Verdict::PossibleAdverse => {
                    prop_assert!(facts.opposite >= 1);
                }
                Verdict::NotWorking => {
                    prop_assert_eq!(facts.no_effect, facts.tested);
                }
                Verdict::Unclear => {
                    prop_assert_eq!(outcome.confidence, ConfidenceLevel::Low);
                    if facts.tested > 0
                        && facts.matched >= 1
                        && facts.opposite == 0
                        && facts.days_active >= config.working_min_days
                    {
                        prop_assert_eq!(outcome.rationale, Rationale::LowAdherence);
                    }
                }
            }
        }
    }
}
