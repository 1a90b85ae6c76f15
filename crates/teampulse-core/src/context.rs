//! Channel-to-squad resolution.
//!
//! An ordered list of (substring pattern, squad id) rules drives a pure
//! function: first match wins, no match falls back to the `general`
//! squad. The same channel name also decides the importance multiplier
//! applied during scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use teampulse_schema::SquadConfig;

pub const FALLBACK_SQUAD: &str = "general";

const HIGH_STAKES_PATTERNS: &[&str] = &["production", "prod", "critical", "incident", "alert", "outage"];
const CORE_BUSINESS_PATTERNS: &[&str] = &["payments", "billing", "revenue", "sales", "customer"];
const LOW_STAKES_PATTERNS: &[&str] = &["dev", "test", "sandbox", "staging", "playground"];

/// One routing rule: channel names containing `pattern` belong to `squad`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub pattern: String,
    pub squad: String,
}

impl RouteRule {
    pub fn new(pattern: impl Into<String>, squad: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            squad: squad.into(),
        }
    }
}

pub struct SquadResolver {
    rules: Vec<RouteRule>,
    squads: BTreeMap<String, SquadConfig>,
}

impl SquadResolver {
    pub fn new(squads: Vec<SquadConfig>, rules: Vec<RouteRule>) -> Self {
        Self {
            rules,
            squads: squads.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn default_squads() -> Vec<SquadConfig> {
        ["general", "epic", "payments", "platform", "mobile"]
            .into_iter()
            .map(|id| SquadConfig {
                id: id.to_string(),
                name: id.to_string(),
                parent: None,
                channels: vec![],
                tags: vec![],
                people: vec![],
                subsquads: vec![],
            })
            .collect()
    }

    pub fn default_rules() -> Vec<RouteRule> {
        vec![
            RouteRule::new("epic", "epic"),
            RouteRule::new("payment", "payments"),
            RouteRule::new("billing", "payments"),
            RouteRule::new("platform", "platform"),
            RouteRule::new("infra", "platform"),
            RouteRule::new("mobile", "mobile"),
        ]
    }

    /// Squad id for a channel name. First matching rule wins; unmatched
    /// names land in the fallback squad.
    pub fn resolve(&self, channel_name: &str) -> &str {
        let lowered = channel_name.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|r| lowered.contains(&r.pattern.to_ascii_lowercase()))
            .map(|r| r.squad.as_str())
            .unwrap_or(FALLBACK_SQUAD)
    }

    /// Importance multiplier for a channel name.
    pub fn multiplier(&self, channel_name: &str) -> f64 {
        let lowered = channel_name.to_ascii_lowercase();
        let matches = |patterns: &[&str]| patterns.iter().any(|p| lowered.contains(p));
        if matches(HIGH_STAKES_PATTERNS) {
            1.3
        } else if matches(CORE_BUSINESS_PATTERNS) {
            1.2
        } else if matches(LOW_STAKES_PATTERNS) {
            0.9
        } else {
            1.0
        }
    }

    pub fn squad_ids(&self) -> Vec<&str> {
        self.squads.keys().map(|k| k.as_str()).collect()
    }

    pub fn get(&self, squad_id: &str) -> Option<&SquadConfig> {
        self.squads.get(squad_id)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// All channels owned by a squad, plus its direct subsquads'. The
    /// hierarchy is capped at two levels, so this never recurses deeper.
    pub fn channels_for(&self, squad_id: &str) -> Vec<String> {
        self.aggregate(squad_id, |s| &s.channels)
    }

    pub fn people_for(&self, squad_id: &str) -> Vec<String> {
        self.aggregate(squad_id, |s| &s.people)
    }

    pub fn tags_for(&self, squad_id: &str) -> Vec<String> {
        self.aggregate(squad_id, |s| &s.tags)
    }

    fn aggregate<F>(&self, squad_id: &str, pick: F) -> Vec<String>
    where
        F: Fn(&SquadConfig) -> &Vec<String>,
    {
        let mut out: Vec<String> = Vec::new();
        let Some(squad) = self.squads.get(squad_id) else {
            return out;
        };
        out.extend(pick(squad).iter().cloned());

        for sub in self.subsquads_of(squad) {
            out.extend(pick(sub).iter().cloned());
        }

        out.sort();
        out.dedup();
        out
    }

    fn subsquads_of<'a>(&'a self, squad: &'a SquadConfig) -> Vec<&'a SquadConfig> {
        let mut subs: Vec<&SquadConfig> = squad
            .subsquads
            .iter()
            .filter_map(|id| self.squads.get(id))
            .collect();
        // Squads declared via a parent link count as subsquads too.
        for candidate in self.squads.values() {
            if candidate.parent.as_deref() == Some(squad.id.as_str())
                && !subs.iter().any(|s| s.id == candidate.id)
            {
                subs.push(candidate);
            }
        }
        subs
    }
}

impl Default for SquadResolver {
    fn default() -> Self {
        Self::new(Self::default_squads(), Self::default_rules())
    }
}
