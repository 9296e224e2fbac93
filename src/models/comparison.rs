// src/models/comparison.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Position of a person in the run's population snapshot.
pub type PersonIndex = usize;

/// Unordered pair of snapshot indices, stored with `low < high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub low: PersonIndex,
    pub high: PersonIndex,
}

impl PairKey {
    pub fn new(a: PersonIndex, b: PersonIndex) -> Self {
        if a < b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonMethod {
    Tier(u8),
    /// Review-band pair decided on tier confidence because no judge was available.
    TierOffline(u8),
    ExternalAssisted,
    NoMatch,
}

impl ComparisonMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonMethod::Tier(1) => "tier1",
            ComparisonMethod::Tier(2) => "tier2",
            ComparisonMethod::Tier(3) => "tier3",
            ComparisonMethod::Tier(4) => "tier4",
            ComparisonMethod::Tier(_) => "tier5",
            ComparisonMethod::TierOffline(1) => "tier1-offline",
            ComparisonMethod::TierOffline(2) => "tier2-offline",
            ComparisonMethod::TierOffline(3) => "tier3-offline",
            ComparisonMethod::TierOffline(4) => "tier4-offline",
            ComparisonMethod::TierOffline(_) => "tier5-offline",
            ComparisonMethod::ExternalAssisted => "external-assisted",
            ComparisonMethod::NoMatch => "no-match",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "external-assisted" => Some(ComparisonMethod::ExternalAssisted),
            "no-match" => Some(ComparisonMethod::NoMatch),
            other => {
                let tier = other.strip_prefix("tier")?;
                let (digits, offline) = match tier.strip_suffix("-offline") {
                    Some(digits) => (digits, true),
                    None => (tier, false),
                };
                let n = digits.parse::<u8>().ok().filter(|n| (1..=5).contains(n))?;
                Some(if offline {
                    ComparisonMethod::TierOffline(n)
                } else {
                    ComparisonMethod::Tier(n)
                })
            }
        }
    }

    pub fn tier(&self) -> Option<u8> {
        match self {
            ComparisonMethod::Tier(t) | ComparisonMethod::TierOffline(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, ComparisonMethod::TierOffline(_))
    }
}

impl fmt::Display for ComparisonMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a comparison. `Inconclusive` is neither a match nor a permanent non-match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    NoMatch,
    Inconclusive,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Match => "match",
            Verdict::NoMatch => "no_match",
            Verdict::Inconclusive => "inconclusive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "match" => Some(Verdict::Match),
            "no_match" => Some(Verdict::NoMatch),
            "inconclusive" => Some(Verdict::Inconclusive),
            _ => None,
        }
    }
}

/// The stored outcome of comparing two snapshot persons. Conclusive outcomes are written once
/// and never overwritten; provisional ones are scoped to the run that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub index_1: PersonIndex,
    pub index_2: PersonIndex,
    pub person_id_1: String,
    pub person_id_2: String,
    pub signature_1: String,
    pub signature_2: String,
    pub score: f64,
    pub verdict: Verdict,
    pub method: ComparisonMethod,
    pub details: JsonValue,
    pub run_id: String,
    pub completed_at: DateTime<Utc>,
}

impl ComparisonRecord {
    pub fn key(&self) -> PairKey {
        PairKey::new(self.index_1, self.index_2)
    }

    pub fn is_match(&self) -> bool {
        self.verdict == Verdict::Match
    }

    pub fn is_inconclusive(&self) -> bool {
        self.verdict == Verdict::Inconclusive
    }

    /// Outcomes a later run should recompute: judge failures and review-band pairs decided
    /// without a judge.
    pub fn is_provisional(&self) -> bool {
        self.is_inconclusive() || self.method.is_offline()
    }
}

/// What the durable store needs to find a previously computed comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComparisonLookup {
    pub key: PairKey,
    pub person_id_1: String,
    pub person_id_2: String,
    pub signature_1: String,
    pub signature_2: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_unordered() {
        assert_eq!(PairKey::new(7, 3), PairKey::new(3, 7));
        let key = PairKey::new(9, 2);
        assert_eq!((key.low, key.high), (2, 9));
    }

    #[test]
    fn test_method_labels_parse_back() {
        for method in [
            ComparisonMethod::Tier(1),
            ComparisonMethod::Tier(4),
            ComparisonMethod::TierOffline(3),
            ComparisonMethod::ExternalAssisted,
            ComparisonMethod::NoMatch,
        ] {
            assert_eq!(ComparisonMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(ComparisonMethod::Tier(1).to_string(), "tier1");
        assert_eq!(ComparisonMethod::parse("tier9"), None);
        assert_eq!(ComparisonMethod::parse("tier9-offline"), None);
        assert_eq!(ComparisonMethod::parse("tier4-offline").and_then(|m| m.tier()), Some(4));
        assert_eq!(ComparisonMethod::parse("fuzzy"), None);
    }

    #[test]
    fn test_verdict_labels() {
        assert_eq!(Verdict::parse("inconclusive"), Some(Verdict::Inconclusive));
        assert_eq!(Verdict::parse(Verdict::NoMatch.as_str()), Some(Verdict::NoMatch));
        assert_eq!(Verdict::parse("maybe"), None);
    }
}
