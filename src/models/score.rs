use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::criteria::MatchCriteria;

/// Placeholder value for the sub-scores that will eventually come from a
/// behavioral data source (activity history, past match success).
const DEFAULT_BEHAVIORAL_SCORE: f64 = 0.7;

/// A sub-score counts as "high" for confidence purposes above this value.
const HIGH_SCORE_CUTOFF: f64 = 0.7;

/// Weights applied to the individual compatibility components. All
/// sub-scores live in `[0, 1]`, so as long as the weights sum to 1 the
/// total does too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub language: f64,
    pub fluency: f64,
    pub topics: f64,
    pub dating: f64,
    pub activity: f64,
    pub success_rate: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            language: 0.35,
            fluency: 0.25,
            topics: 0.20,
            dating: 0.10,
            activity: 0.05,
            success_rate: 0.05,
        }
    }
}

/// The outcome of scoring one pair of criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityScore {
    pub total: f64,
    pub components: BTreeMap<String, f64>,
    pub confidence: f64,
    pub explanation: String,
}

impl CompatibilityScore {
    /// Score two criteria sets deterministically.
    ///
    /// Language and dating are exact-match indicators; fluency decays
    /// linearly with the level difference; topics use Jaccard overlap.
    /// Activity and success rate are fixed defaults until a data source
    /// backs them.
    pub fn compute(a: &MatchCriteria, b: &MatchCriteria, weights: &ScoringWeights) -> Self {
        let mut components = BTreeMap::new();

        let language = if a.language == b.language { 1.0 } else { 0.0 };
        components.insert("language".to_string(), language);

        let fluency_diff = a.fluency.abs_diff(b.fluency) as f64;
        let fluency = (1.0 - fluency_diff / 5.0).max(0.0);
        components.insert("fluency".to_string(), fluency);

        let topics = a.topic_overlap(b);
        components.insert("topics".to_string(), topics);

        let dating = if a.dating == b.dating { 1.0 } else { 0.0 };
        components.insert("dating".to_string(), dating);

        components.insert("activity".to_string(), DEFAULT_BEHAVIORAL_SCORE);
        components.insert("success_rate".to_string(), DEFAULT_BEHAVIORAL_SCORE);

        let total = (language * weights.language
            + fluency * weights.fluency
            + topics * weights.topics
            + dating * weights.dating
            + components["activity"] * weights.activity
            + components["success_rate"] * weights.success_rate)
            .clamp(0.0, 1.0);

        let confidence = Self::confidence(&components);
        let explanation = Self::explain(&components);

        Self {
            total,
            components,
            confidence,
            explanation,
        }
    }

    /// More high sub-scores means more confidence in the total.
    fn confidence(components: &BTreeMap<String, f64>) -> f64 {
        let high = components
            .values()
            .filter(|&&score| score > HIGH_SCORE_CUTOFF)
            .count();

        (high as f64 / components.len() as f64 + 0.2).min(1.0)
    }

    fn explain(components: &BTreeMap<String, f64>) -> String {
        let mut reasons = Vec::new();

        if components["language"] == 1.0 {
            reasons.push("same conversation language");
        }
        if components["fluency"] > 0.8 {
            reasons.push("similar fluency level");
        }
        if components["topics"] > 0.5 {
            reasons.push("shared interests");
        }
        if components["dating"] == 1.0 {
            reasons.push("matching dating preference");
        }

        if reasons.is_empty() {
            "Basic compatibility".to_string()
        } else {
            format!("High compatibility: {}", reasons.join(", "))
        }
    }
}
