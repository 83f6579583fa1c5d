use serde::{Deserialize, Serialize};

use crate::error::TutorResult;
use crate::tutor::config::InterventionThresholds;

const MIN_TIME_MULTIPLIER: f64 = 0.8;
const TIME_MULTIPLIER_SPAN: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterventionTrigger {
    TimeLimit { elapsed_ms: i64, limit_ms: f64 },
    LowMastery { mastery: f64, threshold: f64 },
    ErrorStreak { errors: u32, limit: u32 },
    SkipStreak { skips: u32, limit: u32 },
}

impl InterventionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeLimit { .. } => "time_limit",
            Self::LowMastery { .. } => "low_mastery",
            Self::ErrorStreak { .. } => "error_streak",
            Self::SkipStreak { .. } => "skip_streak",
        }
    }
}

/// Decides whether to offer help before the learner asks. Stateless: the
/// caller supplies mastery, streak counters and elapsed time.
#[derive(Debug, Clone)]
pub struct InterventionPolicy {
    thresholds: InterventionThresholds,
}

impl InterventionPolicy {
    pub fn new(thresholds: InterventionThresholds) -> TutorResult<Self> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    /// Time budget scaled by mastery: 0.8x for a novice up to 1.2x for a
    /// learner at full mastery.
    pub fn adjusted_time_limit_ms(&self, mastery: f64) -> f64 {
        let multiplier = MIN_TIME_MULTIPLIER + mastery * TIME_MULTIPLIER_SPAN;
        self.thresholds.base_time_limit_ms as f64 * multiplier
    }

    /// First matching trigger in the order time, mastery, errors, skips.
    pub fn evaluate(
        &self,
        mastery: f64,
        consecutive_errors: u32,
        consecutive_skips: u32,
        time_taken_ms: Option<i64>,
    ) -> Option<InterventionTrigger> {
        if let Some(elapsed_ms) = time_taken_ms {
            let limit_ms = self.adjusted_time_limit_ms(mastery);
            if elapsed_ms as f64 > limit_ms {
                return Some(InterventionTrigger::TimeLimit {
                    elapsed_ms,
                    limit_ms,
                });
            }
        }

        if mastery < self.thresholds.mastery_threshold {
            return Some(InterventionTrigger::LowMastery {
                mastery,
                threshold: self.thresholds.mastery_threshold,
            });
        }

        if consecutive_errors >= self.thresholds.max_consecutive_errors {
            return Some(InterventionTrigger::ErrorStreak {
                errors: consecutive_errors,
                limit: self.thresholds.max_consecutive_errors,
            });
        }

        if consecutive_skips >= self.thresholds.max_consecutive_skips {
            return Some(InterventionTrigger::SkipStreak {
                skips: consecutive_skips,
                limit: self.thresholds.max_consecutive_skips,
            });
        }

        None
    }

    pub fn check_intervention(
        &self,
        mastery: f64,
        consecutive_errors: u32,
        consecutive_skips: u32,
        time_taken_ms: Option<i64>,
    ) -> bool {
        match self.evaluate(mastery, consecutive_errors, consecutive_skips, time_taken_ms) {
            Some(trigger) => {
                tracing::info!(
                    trigger = trigger.as_str(),
                    mastery,
                    consecutive_errors,
                    consecutive_skips,
                    ?time_taken_ms,
                    "intervention triggered"
                );
                true
            }
            None => {
                tracing::debug!(mastery, consecutive_errors, consecutive_skips, "no intervention");
                false
            }
        }
    }
}

impl Default for InterventionPolicy {
    fn default() -> Self {
        Self {
            thresholds: InterventionThresholds::default(),
        }
    }
}
