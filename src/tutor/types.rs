use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TutorError, TutorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HintStyle {
    #[serde(rename = "Analogy")]
    Analogy,
    #[serde(rename = "Socratic Question")]
    SocraticQuestion,
    #[serde(rename = "Worked Example")]
    WorkedExample,
    #[serde(rename = "Conceptual")]
    Conceptual,
}

impl HintStyle {
    /// Declaration order; also the tie-break order used by the selector.
    pub const ALL: [HintStyle; 4] = [
        Self::Analogy,
        Self::SocraticQuestion,
        Self::WorkedExample,
        Self::Conceptual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analogy => "Analogy",
            Self::SocraticQuestion => "Socratic Question",
            Self::WorkedExample => "Worked Example",
            Self::Conceptual => "Conceptual",
        }
    }

    pub fn parse(s: &str) -> TutorResult<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "analogy" => Ok(Self::Analogy),
            "socraticquestion" | "socratic" => Ok(Self::SocraticQuestion),
            "workedexample" => Ok(Self::WorkedExample),
            "conceptual" => Ok(Self::Conceptual),
            _ => Err(TutorError::InvalidStyle(s.to_string())),
        }
    }
}

impl fmt::Display for HintStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HintStyle {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A learner's hint-style setting, decoded once at the boundary so the
/// selector only ever handles concrete styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "style", rename_all = "lowercase")]
pub enum StylePreference {
    Explicit(HintStyle),
    #[default]
    Adaptive,
    Disabled,
}

impl StylePreference {
    pub fn parse(s: &str) -> TutorResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "automatic" | "adaptive" | "auto" => Ok(Self::Adaptive),
            "none" | "disabled" | "off" => Ok(Self::Disabled),
            _ => HintStyle::parse(s).map(Self::Explicit),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterventionPreference {
    #[default]
    Proactive,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LearnerPreferences {
    pub hint_style: StylePreference,
    pub intervention: InterventionPreference,
}

impl LearnerPreferences {
    /// Proactive help is only offered to learners who opted in and have not
    /// switched hints off entirely.
    pub fn allows_proactive_help(&self) -> bool {
        self.intervention == InterventionPreference::Proactive && !self.hint_style.is_disabled()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub learner_id: String,
    pub skill_id: String,
    pub mastery: f64,
    pub consecutive_errors: u32,
    pub consecutive_skips: u32,
    pub updated_at: i64,
    /// Bumped by the store on every successful write.
    pub version: u64,
}

impl MasteryRecord {
    pub fn new(learner_id: &str, skill_id: &str, prior: f64) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            skill_id: skill_id.to_string(),
            mastery: prior.clamp(0.0, 1.0),
            consecutive_errors: 0,
            consecutive_skips: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
            version: 0,
        }
    }

    pub fn record_answer(&mut self, is_correct: bool, new_mastery: f64) {
        self.mastery = new_mastery.clamp(0.0, 1.0);
        self.consecutive_skips = 0;
        if is_correct {
            self.consecutive_errors = 0;
        } else {
            self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        }
    }

    /// A skip carries no evidence: mastery is left untouched.
    pub fn record_skip(&mut self) {
        self.consecutive_skips = self.consecutive_skips.saturating_add(1);
        self.consecutive_errors = 0;
    }
}

/// One answer or skip event. Constructed through [`InteractionOutcome::answered`]
/// or [`InteractionOutcome::skipped`] so `is_correct` is `None` exactly when the
/// event is a skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionOutcome {
    is_correct: Option<bool>,
    time_taken_ms: Option<i64>,
}

impl InteractionOutcome {
    pub fn answered(is_correct: bool, time_taken_ms: Option<i64>) -> Self {
        Self {
            is_correct: Some(is_correct),
            time_taken_ms,
        }
    }

    pub fn skipped(time_taken_ms: Option<i64>) -> Self {
        Self {
            is_correct: None,
            time_taken_ms,
        }
    }

    pub fn is_correct(&self) -> Option<bool> {
        self.is_correct
    }

    pub fn is_skip(&self) -> bool {
        self.is_correct.is_none()
    }

    pub fn time_taken_ms(&self) -> Option<i64> {
        self.time_taken_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RewardObservation {
    pub total_score: f64,
    pub count: u64,
}

impl RewardObservation {
    pub fn add(&mut self, reward: f64) {
        self.total_score += reward;
        self.count += 1;
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.total_score / self.count as f64)
    }
}
