//! Expected marker effects per intervention
//!
//! An immutable table mapping canonical intervention names to the lab markers
//! they are expected to move, and in which direction.

use serde::{Deserialize, Serialize};

/// Direction a marker is expected to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectDirection {
    Increase,
    Decrease,
}

impl EffectDirection {
    /// Whether a change with this sign is in the expected direction
    pub fn matches(&self, delta: f64) -> bool {
        match self {
            EffectDirection::Increase => delta > 0.0,
            EffectDirection::Decrease => delta < 0.0,
        }
    }
}

/// One expected marker movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedMarkerEffect {
    pub biomarker_key: String,
    pub direction: EffectDirection,
}

/// Expected effects of one intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedEffectEntry {
    pub canonical_id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub effects: Vec<ExpectedMarkerEffect>,
}

/// How an intervention name was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Alias,
    /// One name contains the other; can pick the wrong entry for ambiguous names
    Substring,
}

/// A resolved table entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectMatch<'a> {
    pub entry: &'a ExpectedEffectEntry,
    pub match_kind: MatchKind,
}

/// Intervention name to expected marker effects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedEffectTable {
    entries: Vec<ExpectedEffectEntry>,
}

fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

impl ExpectedEffectTable {
    pub fn new(entries: Vec<ExpectedEffectEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ExpectedEffectEntry] {
        &self.entries
    }

    /// Resolve a name: exact id, then exact alias, then substring either way.
    ///
    /// Ties within a stage go to the earliest entry.
    pub fn lookup(&self, name: &str) -> Option<EffectMatch<'_>> {
        let wanted = normalize(name);
        if wanted.is_empty() {
            return None;
        }

        let stages: [(MatchKind, fn(&ExpectedEffectEntry, &str) -> bool); 3] = [
            (MatchKind::Exact, |e, wanted| normalize(&e.canonical_id) == wanted),
            (MatchKind::Alias, |e, wanted| {
                e.aliases.iter().any(|a| normalize(a) == wanted)
            }),
            (MatchKind::Substring, |e, wanted| {
                std::iter::once(&e.canonical_id)
                    .chain(e.aliases.iter())
                    .map(|n| normalize(n))
                    .any(|n| n.contains(wanted) || wanted.contains(n.as_str()))
            }),
        ];

        stages.iter().find_map(|(match_kind, matches)| {
            self.entries
                .iter()
                .find(|e| matches(e, &wanted))
                .map(|entry| EffectMatch {
                    entry,
                    match_kind: *match_kind,
                })
        })
    }

    /// Built-in table of common supplement and medication protocols
    pub fn standard() -> Self {
        use EffectDirection::{Decrease, Increase};

        let entry = |id: &str, aliases: &[&str], effects: &[(&str, EffectDirection)]| {
            ExpectedEffectEntry {
                canonical_id: id.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                effects: effects
                    .iter()
                    .map(|(key, direction)| ExpectedMarkerEffect {
                        biomarker_key: key.to_string(),
                        direction: *direction,
                    })
                    .collect(),
            }
        };

        Self::new(vec![
            entry(
                "vitamin_d3",
                &["vitamin_d", "cholecalciferol"],
                &[("vitamin_d", Increase)],
            ),
            entry(
                "omega_3",
                &["fish_oil", "epa_dha"],
                &[("triglycerides", Decrease), ("hdl", Increase)],
            ),
            entry(
                "berberine",
                &[],
                &[("hba1c", Decrease), ("fasting_glucose", Decrease), ("ldl", Decrease)],
            ),
            entry(
                "metformin",
                &[],
                &[("hba1c", Decrease), ("fasting_glucose", Decrease)],
            ),
            entry(
                "statin",
                &["atorvastatin", "rosuvastatin"],
                &[("ldl", Decrease), ("apob", Decrease)],
            ),
            entry("psyllium", &["psyllium_husk"], &[("ldl", Decrease)]),
            entry("niacin", &["vitamin_b3"], &[("hdl", Increase), ("triglycerides", Decrease)]),
            entry(
                "iron",
                &["ferrous_bisglycinate"],
                &[("ferritin", Increase), ("hemoglobin", Increase)],
            ),
            entry("curcumin", &["turmeric"], &[("crp", Decrease)]),
            entry("magnesium", &["magnesium_glycinate"], &[("magnesium", Increase)]),
            entry("testosterone_therapy", &["trt"], &[("testosterone", Increase)]),
            entry("tesamorelin", &[], &[("igf_1", Increase)]),
            entry("methylfolate", &["folate", "l_methylfolate"], &[("homocysteine", Decrease)]),
        ])
    }
}
