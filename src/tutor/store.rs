//! Keyed stores for the engine's mutable state.
//!
//! Mastery is keyed by (learner, skill) and guarded by a version number so a
//! stale read-modify-write cycle is rejected instead of overwriting a newer
//! value. Reward observations are keyed by (learner, style) and only ever
//! incremented, which the store applies atomically.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{TutorError, TutorResult};
use crate::tutor::types::{HintStyle, LearnerPreferences, MasteryRecord, RewardObservation};

pub trait MasteryStore: Send + Sync {
    /// Mastery assigned to records created on first access.
    fn prior(&self) -> f64;

    /// Current record, created at the store's prior on first access.
    fn get(&self, learner_id: &str, skill_id: &str) -> MasteryRecord;

    /// Compare-and-swap on `record.version`. Returns the stored record with
    /// its new version, or [`TutorError::Conflict`] if another writer got
    /// there first.
    fn put(&self, record: &MasteryRecord) -> TutorResult<MasteryRecord>;

    fn records(&self, learner_id: &str) -> Vec<MasteryRecord>;

    fn reset_learner(&self, learner_id: &str);
}

pub trait RewardStore: Send + Sync {
    fn get_all(&self, learner_id: &str) -> HashMap<HintStyle, RewardObservation>;

    /// Adds `delta` to the style's running total and bumps its count.
    fn increment(&self, learner_id: &str, style: HintStyle, delta: f64) -> RewardObservation;

    fn reset_learner(&self, learner_id: &str);
}

pub trait PreferenceStore: Send + Sync {
    fn get(&self, learner_id: &str) -> LearnerPreferences;

    fn set(&self, learner_id: &str, preferences: LearnerPreferences);
}

pub struct InMemoryMasteryStore {
    prior: f64,
    records: RwLock<HashMap<String, HashMap<String, MasteryRecord>>>,
}

impl InMemoryMasteryStore {
    pub fn new(prior: f64) -> Self {
        Self {
            prior: prior.clamp(0.0, 1.0),
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl MasteryStore for InMemoryMasteryStore {
    fn prior(&self) -> f64 {
        self.prior
    }

    fn get(&self, learner_id: &str, skill_id: &str) -> MasteryRecord {
        if let Some(record) = self
            .records
            .read()
            .get(learner_id)
            .and_then(|skills| skills.get(skill_id))
        {
            return record.clone();
        }

        let mut guard = self.records.write();
        guard
            .entry(learner_id.to_string())
            .or_default()
            .entry(skill_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(learner_id, skill_id, prior = self.prior, "mastery record created");
                MasteryRecord::new(learner_id, skill_id, self.prior)
            })
            .clone()
    }

    fn put(&self, record: &MasteryRecord) -> TutorResult<MasteryRecord> {
        let mut guard = self.records.write();
        let skills = guard.entry(record.learner_id.clone()).or_default();
        let found = skills.get(&record.skill_id).map(|r| r.version).unwrap_or(0);

        if found != record.version {
            return Err(TutorError::Conflict {
                learner_id: record.learner_id.clone(),
                skill_id: record.skill_id.clone(),
                expected: record.version,
                found,
            });
        }

        let mut stored = record.clone();
        stored.mastery = stored.mastery.clamp(0.0, 1.0);
        stored.version = found + 1;
        stored.updated_at = chrono::Utc::now().timestamp_millis();
        skills.insert(stored.skill_id.clone(), stored.clone());
        Ok(stored)
    }

    fn records(&self, learner_id: &str) -> Vec<MasteryRecord> {
        let mut records: Vec<MasteryRecord> = self
            .records
            .read()
            .get(learner_id)
            .map(|skills| skills.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        records
    }

    fn reset_learner(&self, learner_id: &str) {
        self.records.write().remove(learner_id);
    }
}

#[derive(Default)]
pub struct InMemoryRewardStore {
    observations: RwLock<HashMap<String, HashMap<HintStyle, RewardObservation>>>,
}

impl InMemoryRewardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RewardStore for InMemoryRewardStore {
    fn get_all(&self, learner_id: &str) -> HashMap<HintStyle, RewardObservation> {
        self.observations
            .read()
            .get(learner_id)
            .cloned()
            .unwrap_or_default()
    }

    fn increment(&self, learner_id: &str, style: HintStyle, delta: f64) -> RewardObservation {
        let mut guard = self.observations.write();
        let observation = guard
            .entry(learner_id.to_string())
            .or_default()
            .entry(style)
            .or_default();
        observation.add(delta);
        *observation
    }

    fn reset_learner(&self, learner_id: &str) {
        self.observations.write().remove(learner_id);
    }
}

#[derive(Default)]
pub struct InMemoryPreferenceStore {
    preferences: RwLock<HashMap<String, LearnerPreferences>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn get(&self, learner_id: &str) -> LearnerPreferences {
        self.preferences
            .read()
            .get(learner_id)
            .copied()
            .unwrap_or_default()
    }

    fn set(&self, learner_id: &str, preferences: LearnerPreferences) {
        self.preferences
            .write()
            .insert(learner_id.to_string(), preferences);
    }
}
