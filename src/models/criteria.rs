use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::MatchingError;

/// Search criteria a user submits when looking for a conversation partner.
///
/// Construct through [`MatchCriteria::new`] so the invariants (non-empty
/// language, fluency in `0..=10`, non-empty topic list) always hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCriteria {
    pub language: String,
    pub fluency: u8,
    pub topics: Vec<String>,
    pub dating: bool,
}

impl MatchCriteria {
    pub const MAX_FLUENCY: u8 = 10;

    /// Topic appended when criteria are relaxed far enough that topical
    /// overlap should no longer gate a match.
    pub const GENERAL_TOPIC: &'static str = "general";

    pub fn new(
        language: impl Into<String>,
        fluency: u8,
        topics: Vec<String>,
        dating: bool,
    ) -> Result<Self, MatchingError> {
        let language = language.into();
        if language.is_empty() {
            return Err(MatchingError::InvalidCriteria(
                "language must be a non-empty string",
            ));
        }
        if fluency > Self::MAX_FLUENCY {
            return Err(MatchingError::InvalidCriteria(
                "fluency must be between 0 and 10",
            ));
        }
        if topics.is_empty() {
            return Err(MatchingError::InvalidCriteria(
                "topics must be a non-empty list",
            ));
        }

        Ok(Self {
            language,
            fluency,
            topics,
            dating,
        })
    }

    /// Re-run the construction invariants on a value that arrived through
    /// deserialization, where serde could not enforce them.
    pub fn validate(&self) -> Result<(), MatchingError> {
        Self::new(
            self.language.clone(),
            self.fluency,
            self.topics.clone(),
            self.dating,
        )
        .map(|_| ())
    }

    /// Base compatibility: same language, fluency within one level, and at
    /// least one shared topic. Re-checked after reservation to defend
    /// against stale queue data.
    pub fn is_compatible_with(&self, other: &MatchCriteria) -> bool {
        if self.language != other.language {
            return false;
        }

        if self.fluency.abs_diff(other.fluency) > 1 {
            return false;
        }

        let topics: HashSet<&str> = self.topics.iter().map(String::as_str).collect();
        other.topics.iter().any(|t| topics.contains(t.as_str()))
    }

    /// Derive loosened criteria for the given retry step. Steps other than
    /// 3, 5 and 8 return the criteria unchanged.
    pub fn relax(&self, step: u32) -> MatchCriteria {
        let mut relaxed = self.clone();

        if step == 3 {
            relaxed.dating = false;
        }

        if step == 5 && !relaxed.topics.iter().any(|t| t == Self::GENERAL_TOPIC) {
            relaxed.topics.push(Self::GENERAL_TOPIC.to_string());
        }

        if step == 8 {
            relaxed.fluency = relaxed.fluency.saturating_sub(1);
        }

        relaxed
    }

    /// Jaccard similarity of the two topic sets, in `[0, 1]`.
    pub fn topic_overlap(&self, other: &MatchCriteria) -> f64 {
        let a: HashSet<&str> = self.topics.iter().map(String::as_str).collect();
        let b: HashSet<&str> = other.topics.iter().map(String::as_str).collect();

        let union = a.union(&b).count();
        if union == 0 {
            return 0.0;
        }
        let intersection = a.intersection(&b).count();

        (intersection as f64 / union as f64).clamp(0.0, 1.0)
    }
}
