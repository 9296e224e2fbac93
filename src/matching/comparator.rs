// src/matching/comparator.rs
use chrono::Utc;
use log::{debug, warn};
use serde_json::json;
use std::env;
use std::sync::Arc;

use crate::matching::external::{ExternalJudge, JudgeContext};
use crate::matching::fingerprint::tier_strategy;
use crate::matching::similarity::compare_persons;
use crate::models::comparison::{ComparisonMethod, ComparisonRecord, PersonIndex, Verdict};
use crate::models::person::PopulationSnapshot;

/// Tier confidences and decision-band thresholds, all on [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPolicy {
    pub tier_confidence: [f64; 5],
    /// Tier confidence at or above this is accepted without an external call.
    pub auto_accept: f64,
    /// Tier confidence below this is a non-match without an external call.
    pub review_floor: f64,
    /// External score needed to accept an ambiguous pair.
    pub llm_accept: f64,
    /// Tier confidence needed to accept an ambiguous pair when no judge is configured.
    pub offline_accept: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            tier_confidence: [0.95, 0.90, 0.85, 0.75, 0.65],
            auto_accept: 0.88,
            review_floor: 0.60,
            llm_accept: 0.80,
            offline_accept: 0.85,
        }
    }
}

impl MatchPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: f64| -> f64 {
            env::var(key)
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| (0.0..=1.0).contains(v))
                .unwrap_or(default)
        };

        let mut tier_confidence = defaults.tier_confidence;
        for (idx, slot) in tier_confidence.iter_mut().enumerate() {
            *slot = read(&format!("DEDUP_TIER{}_CONFIDENCE", idx + 1), *slot);
        }

        Self {
            tier_confidence,
            auto_accept: read("DEDUP_AUTO_ACCEPT", defaults.auto_accept),
            review_floor: read("DEDUP_REVIEW_FLOOR", defaults.review_floor),
            llm_accept: read("DEDUP_LLM_ACCEPT", defaults.llm_accept),
            offline_accept: read("DEDUP_OFFLINE_ACCEPT", defaults.offline_accept),
        }
    }

    pub fn confidence_for(&self, tier: u8) -> f64 {
        self.tier_confidence
            .get((tier as usize).saturating_sub(1))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn band(&self, confidence: f64) -> Band {
        if confidence >= self.auto_accept {
            Band::AutoAccept
        } else if confidence >= self.review_floor {
            Band::Review
        } else {
            Band::Reject
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    AutoAccept,
    Review,
    Reject,
}

/// Decides whether two snapshot persons are the same individual.
#[derive(Clone)]
pub struct PairwiseComparator {
    policy: MatchPolicy,
    judge: Option<Arc<dyn ExternalJudge>>,
}

/// A comparison result plus whether the external judge was consulted.
#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    pub record: ComparisonRecord,
    pub external_call: bool,
}

impl PairwiseComparator {
    pub fn new(policy: MatchPolicy, judge: Option<Arc<dyn ExternalJudge>>) -> Self {
        Self { policy, judge }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn has_judge(&self) -> bool {
        self.judge.is_some()
    }

    /// Whether comparing the pair would consult the external judge.
    pub fn needs_external(&self, snapshot: &PopulationSnapshot, i: PersonIndex, j: PersonIndex) -> bool {
        if self.judge.is_none() {
            return false;
        }
        snapshot
            .fingerprints(i)
            .first_shared_tier(snapshot.fingerprints(j))
            .map(|tier| self.policy.band(self.policy.confidence_for(tier)) == Band::Review)
            .unwrap_or(false)
    }

    /// Produces exactly one record for the pair. External failures become `Inconclusive`.
    pub async fn compare(
        &self,
        snapshot: &PopulationSnapshot,
        i: PersonIndex,
        j: PersonIndex,
        run_id: &str,
    ) -> ComparisonOutcome {
        let (low, high) = if i < j { (i, j) } else { (j, i) };
        let a = snapshot.person(low);
        let b = snapshot.person(high);

        let mut record = ComparisonRecord {
            index_1: low,
            index_2: high,
            person_id_1: a.person_id.clone(),
            person_id_2: b.person_id.clone(),
            signature_1: snapshot.signature(low).to_string(),
            signature_2: snapshot.signature(high).to_string(),
            score: 0.0,
            verdict: Verdict::NoMatch,
            method: ComparisonMethod::NoMatch,
            details: json!({}),
            run_id: run_id.to_string(),
            completed_at: Utc::now(),
        };

        let tier = match snapshot
            .fingerprints(low)
            .first_shared_tier(snapshot.fingerprints(high))
        {
            Some(tier) => tier,
            None => {
                record.details = json!({ "strategy": "no tier agreement" });
                return ComparisonOutcome {
                    record,
                    external_call: false,
                };
            }
        };

        let confidence = self.policy.confidence_for(tier);
        let similarity = compare_persons(a, b);
        let mut details = json!({
            "tier": tier,
            "strategy": tier_strategy(tier),
            "tier_confidence": confidence,
            "similarity": similarity,
        });
        record.score = confidence;

        let mut external_call = false;
        match self.policy.band(confidence) {
            Band::AutoAccept => {
                record.verdict = Verdict::Match;
                record.method = ComparisonMethod::Tier(tier);
            }
            Band::Reject => {
                details["decision"] = json!("below review floor");
            }
            Band::Review => match &self.judge {
                None => {
                    details["decision"] = json!("tier-only (no external judge)");
                    record.method = ComparisonMethod::TierOffline(tier);
                    if confidence >= self.policy.offline_accept {
                        record.verdict = Verdict::Match;
                    }
                }
                Some(judge) => {
                    external_call = true;
                    record.method = ComparisonMethod::ExternalAssisted;
                    let context = JudgeContext {
                        tier,
                        tier_confidence: confidence,
                        similarity,
                    };
                    match judge.judge(a, b, &context).await {
                        Ok(judgment) => {
                            record.score = judgment.confidence_score;
                            record.verdict = if judgment.is_same_person
                                && judgment.confidence_score >= self.policy.llm_accept
                            {
                                Verdict::Match
                            } else {
                                Verdict::NoMatch
                            };
                            details["judge"] = json!(judge.name());
                            details["reasoning"] = json!(judgment.reasoning);
                            details["judge_says_same"] = json!(judgment.is_same_person);
                        }
                        Err(e) => {
                            warn!(
                                "External judgment failed for {} / {}: {}; recording inconclusive",
                                a.person_id, b.person_id, e
                            );
                            record.verdict = Verdict::Inconclusive;
                            details["error"] = json!(e.to_string());
                        }
                    }
                }
            },
        }

        debug!(
            "Compared {} / {}: tier {} -> {} via {} ({:.3})",
            a.person_id,
            b.person_id,
            tier,
            record.verdict.as_str(),
            record.method,
            record.score
        );
        record.details = details;
        record.completed_at = Utc::now();
        ComparisonOutcome {
            record,
            external_call,
        }
    }
}
