//! Turn sequencing around the three engine components.
//!
//! One turn: snapshot mastery, maybe choose a hint style, take the answer or
//! skip, update mastery, credit the hint with its blended reward, then
//! evaluate the intervention policy for the next turn.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{TutorError, TutorResult};
use crate::tutor::config::TutorConfig;
use crate::tutor::decision::{HintStyleSelector, SelectionReason};
use crate::tutor::knowledge::KnowledgeTracker;
use crate::tutor::policy::{InterventionPolicy, InterventionTrigger};
use crate::tutor::store::{
    InMemoryMasteryStore, InMemoryPreferenceStore, InMemoryRewardStore, MasteryStore,
    PreferenceStore, RewardStore,
};
use crate::tutor::types::{
    HintStyle, InteractionOutcome, LearnerPreferences, MasteryRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintDecision {
    pub style: HintStyle,
    pub reason: SelectionReason,
    pub pre_hint_mastery: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintReward {
    pub style: HintStyle,
    pub mastery_delta: f64,
    pub reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeReport {
    pub record: MasteryRecord,
    pub previous_mastery: f64,
    pub predicted_correct: f64,
    pub hint_reward: Option<HintReward>,
    /// Set when the pending hint could not be credited; mastery was still
    /// updated.
    #[serde(skip)]
    pub feedback_error: Option<TutorError>,
    pub intervention: Option<InterventionTrigger>,
}

impl OutcomeReport {
    pub fn intervention_needed(&self) -> bool {
        self.intervention.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerSnapshot {
    pub learner_id: String,
    pub preferences: LearnerPreferences,
    pub skills: Vec<MasteryRecord>,
    pub style_rewards: BTreeMap<HintStyle, f64>,
}

#[derive(Debug, Clone, Copy)]
struct PendingHint {
    style: HintStyle,
    pre_hint_mastery: f64,
}

type SkillKey = (String, String);

pub struct TutorSession<R = StdRng> {
    config: TutorConfig,
    tracker: KnowledgeTracker,
    policy: InterventionPolicy,
    selector: HintStyleSelector<R>,
    mastery: Arc<dyn MasteryStore>,
    rewards: Arc<dyn RewardStore>,
    preferences: Arc<dyn PreferenceStore>,
    pending_hints: Mutex<HashMap<SkillKey, PendingHint>>,
}

impl TutorSession<StdRng> {
    pub fn new(
        config: TutorConfig,
        mastery: Arc<dyn MasteryStore>,
        rewards: Arc<dyn RewardStore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> TutorResult<Self> {
        Self::with_rng(config, mastery, rewards, preferences, StdRng::from_os_rng())
    }

    pub fn in_memory(config: TutorConfig) -> TutorResult<Self> {
        let mastery = Arc::new(InMemoryMasteryStore::new(config.bkt.p_l0));
        Self::new(
            config,
            mastery,
            Arc::new(InMemoryRewardStore::new()),
            Arc::new(InMemoryPreferenceStore::new()),
        )
    }
}

impl<R: Rng + Send> TutorSession<R> {
    pub fn with_rng(
        config: TutorConfig,
        mastery: Arc<dyn MasteryStore>,
        rewards: Arc<dyn RewardStore>,
        preferences: Arc<dyn PreferenceStore>,
        rng: R,
    ) -> TutorResult<Self> {
        config.validate()?;
        if (mastery.prior() - config.bkt.p_l0).abs() > f64::EPSILON {
            return Err(TutorError::InvalidConfig(format!(
                "mastery store prior {} does not match p_l0 {}",
                mastery.prior(),
                config.bkt.p_l0
            )));
        }
        let tracker = KnowledgeTracker::new(config.bkt)?;
        let policy = InterventionPolicy::new(config.intervention)?;
        let selector = HintStyleSelector::with_rng(
            config.selector.clone(),
            Arc::clone(&rewards),
            Arc::clone(&preferences),
            rng,
        )?;

        Ok(Self {
            config,
            tracker,
            policy,
            selector,
            mastery,
            rewards,
            preferences,
            pending_hints: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &TutorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &KnowledgeTracker {
        &self.tracker
    }

    pub fn selector(&self) -> &HintStyleSelector<R> {
        &self.selector
    }

    pub fn preferences(&self, learner_id: &str) -> LearnerPreferences {
        self.preferences.get(learner_id)
    }

    pub fn set_preferences(&self, learner_id: &str, preferences: LearnerPreferences) {
        tracing::info!(learner_id, ?preferences, "learner preferences updated");
        self.preferences.set(learner_id, preferences);
    }

    /// Chooses a hint style and remembers the pre-hint mastery so the next
    /// outcome on this skill can credit the style. `None` when the learner has
    /// hints disabled; the selector is not consulted in that case.
    pub fn request_hint(&self, learner_id: &str, skill_id: &str) -> Option<HintDecision> {
        if self.preferences.get(learner_id).hint_style.is_disabled() {
            tracing::debug!(learner_id, skill_id, "hints disabled, no style selected");
            return None;
        }

        let selection = self.selector.select_style_default(learner_id);
        let pre_hint_mastery = self.mastery.get(learner_id, skill_id).mastery;

        self.pending_hints.lock().insert(
            (learner_id.to_string(), skill_id.to_string()),
            PendingHint {
                style: selection.style,
                pre_hint_mastery,
            },
        );

        tracing::info!(
            learner_id,
            skill_id,
            style = %selection.style,
            reason = ?selection.reason,
            pre_hint_mastery,
            "hint style selected"
        );

        Some(HintDecision {
            style: selection.style,
            reason: selection.reason,
            pre_hint_mastery,
        })
    }

    pub fn submit_outcome(
        &self,
        learner_id: &str,
        skill_id: &str,
        outcome: InteractionOutcome,
        hint_rating: Option<i32>,
    ) -> TutorResult<OutcomeReport> {
        if let Some(rating) = hint_rating {
            if !(1..=5).contains(&rating) {
                return Err(TutorError::InvalidRating(rating));
            }
        }

        let (previous_mastery, record) = self.apply_outcome(learner_id, skill_id, outcome)?;

        let pending = self
            .pending_hints
            .lock()
            .remove(&(learner_id.to_string(), skill_id.to_string()));

        let mut hint_reward = None;
        let mut feedback_error = None;
        if let Some(pending) = pending {
            let mastery_delta = record.mastery - pending.pre_hint_mastery;
            match self.selector.record_feedback(
                learner_id,
                pending.style,
                hint_rating,
                mastery_delta,
                self.config.selector.rating_weight,
            ) {
                Ok(reward) => {
                    hint_reward = Some(HintReward {
                        style: pending.style,
                        mastery_delta,
                        reward,
                    })
                }
                Err(err) => {
                    tracing::error!(learner_id, skill_id, error = %err, "hint feedback rejected");
                    feedback_error = Some(err);
                }
            }
        }

        let intervention = if self.preferences.get(learner_id).allows_proactive_help() {
            self.policy.evaluate(
                record.mastery,
                record.consecutive_errors,
                record.consecutive_skips,
                outcome.time_taken_ms(),
            )
        } else {
            None
        };
        if let Some(trigger) = intervention {
            tracing::info!(learner_id, skill_id, trigger = trigger.as_str(), "intervention queued for next turn");
        }

        let predicted_correct = self.tracker.predict_correct_probability(record.mastery)?;

        Ok(OutcomeReport {
            record,
            previous_mastery,
            predicted_correct,
            hint_reward,
            feedback_error,
            intervention,
        })
    }

    /// Read-modify-write of one mastery record, retried when a concurrent
    /// writer bumped the version in between.
    fn apply_outcome(
        &self,
        learner_id: &str,
        skill_id: &str,
        outcome: InteractionOutcome,
    ) -> TutorResult<(f64, MasteryRecord)> {
        let mut retries = 0;
        loop {
            let mut record = self.mastery.get(learner_id, skill_id);
            let previous = record.mastery;

            match outcome.is_correct() {
                Some(is_correct) => {
                    let updated = self.tracker.update_mastery(record.mastery, is_correct)?;
                    record.record_answer(is_correct, updated);
                }
                None => record.record_skip(),
            }

            match self.mastery.put(&record) {
                Ok(stored) => return Ok((previous, stored)),
                Err(err @ TutorError::Conflict { .. }) if retries < self.config.max_update_retries => {
                    retries += 1;
                    tracing::warn!(learner_id, skill_id, retries, error = %err, "retrying mastery update");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Proactive check while the learner is still working on an item.
    pub fn check_intervention(
        &self,
        learner_id: &str,
        skill_id: &str,
        time_spent_ms: Option<i64>,
    ) -> bool {
        if !self.preferences.get(learner_id).allows_proactive_help() {
            return false;
        }

        let record = self.mastery.get(learner_id, skill_id);
        self.policy.check_intervention(
            record.mastery,
            record.consecutive_errors,
            record.consecutive_skips,
            time_spent_ms,
        )
    }

    pub fn predict_correct(&self, learner_id: &str, skill_id: &str) -> TutorResult<f64> {
        let record = self.mastery.get(learner_id, skill_id);
        self.tracker.predict_correct_probability(record.mastery)
    }

    /// Mastery per requested skill; untouched skills report the prior
    /// without creating a record.
    pub fn mastery_overview(&self, learner_id: &str, skills: &[&str]) -> BTreeMap<String, f64> {
        let known: HashMap<String, f64> = self
            .mastery
            .records(learner_id)
            .into_iter()
            .map(|r| (r.skill_id, r.mastery))
            .collect();

        skills
            .iter()
            .map(|skill| {
                let mastery = known
                    .get(*skill)
                    .copied()
                    .unwrap_or_else(|| self.tracker.initial_mastery());
                (skill.to_string(), mastery)
            })
            .collect()
    }

    pub fn learner_snapshot(&self, learner_id: &str) -> LearnerSnapshot {
        LearnerSnapshot {
            learner_id: learner_id.to_string(),
            preferences: self.preferences.get(learner_id),
            skills: self.mastery.records(learner_id),
            style_rewards: self.selector.average_rewards(learner_id),
        }
    }

    pub fn reset_learner(&self, learner_id: &str) {
        self.mastery.reset_learner(learner_id);
        self.rewards.reset_learner(learner_id);
        self.pending_hints
            .lock()
            .retain(|(learner, _), _| learner != learner_id);
        tracing::info!(learner_id, "learner state reset");
    }
}
