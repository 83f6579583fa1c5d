use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_probability, TutorError, TutorResult};
use crate::tutor::config::SelectorConfig;
use crate::tutor::store::{PreferenceStore, RewardStore};
use crate::tutor::types::{HintStyle, StylePreference};

const NEUTRAL_RATING: i32 = 3;
const MIN_RATING: i32 = 1;
const MAX_RATING: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Override,
    Exploration,
    Exploitation,
    ColdStart,
    /// Exploration was drawn but there was nothing to explore.
    EmptyPool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StyleSelection {
    pub style: HintStyle,
    pub reason: SelectionReason,
    /// Running average of the chosen style, when it has one.
    pub average_reward: Option<f64>,
}

/// Reward credited to a style after it was shown: the normalized rating
/// (1..5 mapped onto 0..1, neutral 3 when absent) blended with the mastery
/// change that followed the hint.
///
/// `mastery_delta` is not bounded, so a regression after a hint can push the
/// reward below zero even with a good rating. That is the intended measure of
/// hint effectiveness.
pub fn blended_reward(explicit_rating: Option<i32>, mastery_delta: f64, rating_weight: f64) -> f64 {
    let rating = explicit_rating.unwrap_or(NEUTRAL_RATING);
    let normalized = (rating - MIN_RATING) as f64 / (MAX_RATING - MIN_RATING) as f64;
    rating_weight * normalized + (1.0 - rating_weight) * mastery_delta
}

/// Epsilon-greedy bandit over hint styles with a per-learner running-average
/// reward table. Explicit learner preferences bypass it entirely.
pub struct HintStyleSelector<R = StdRng> {
    config: SelectorConfig,
    rewards: Arc<dyn RewardStore>,
    preferences: Arc<dyn PreferenceStore>,
    rng: Mutex<R>,
}

impl HintStyleSelector<StdRng> {
    pub fn new(
        config: SelectorConfig,
        rewards: Arc<dyn RewardStore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> TutorResult<Self> {
        Self::with_rng(config, rewards, preferences, StdRng::from_os_rng())
    }
}

impl<R: Rng + Send> HintStyleSelector<R> {
    pub fn with_rng(
        config: SelectorConfig,
        rewards: Arc<dyn RewardStore>,
        preferences: Arc<dyn PreferenceStore>,
        rng: R,
    ) -> TutorResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rewards,
            preferences,
            rng: Mutex::new(rng),
        })
    }

    pub fn select_style(
        &self,
        learner_id: &str,
        exploration_rate: f64,
        available_styles: &[HintStyle],
    ) -> HintStyle {
        self.select(learner_id, exploration_rate, available_styles)
            .style
    }

    /// Selection with the configured exploration rate over the configured
    /// style set.
    pub fn select_style_default(&self, learner_id: &str) -> StyleSelection {
        self.select(learner_id, self.config.exploration_rate, &self.config.styles)
    }

    /// Never fails: every degenerate case resolves to the configured default.
    pub fn select(
        &self,
        learner_id: &str,
        exploration_rate: f64,
        available_styles: &[HintStyle],
    ) -> StyleSelection {
        match self.preferences.get(learner_id).hint_style {
            StylePreference::Explicit(style) => {
                tracing::debug!(learner_id, style = %style, "explicit style preference");
                return StyleSelection {
                    style,
                    reason: SelectionReason::Override,
                    average_reward: None,
                };
            }
            StylePreference::Disabled => {
                tracing::warn!(learner_id, "style selection requested for a learner with hints disabled");
            }
            StylePreference::Adaptive => {}
        }

        let exploration_rate = if exploration_rate.is_nan() {
            0.0
        } else {
            exploration_rate.clamp(0.0, 1.0)
        };

        let explore = {
            let mut rng = self.rng.lock();
            let r: f64 = rng.random();
            if r < exploration_rate {
                Some(if available_styles.is_empty() {
                    None
                } else {
                    Some(available_styles[rng.random_range(0..available_styles.len())])
                })
            } else {
                None
            }
        };

        match explore {
            Some(Some(style)) => {
                tracing::debug!(learner_id, style = %style, "exploring hint style");
                StyleSelection {
                    style,
                    reason: SelectionReason::Exploration,
                    average_reward: self.average_for(learner_id, style),
                }
            }
            Some(None) => {
                tracing::debug!(learner_id, "exploration pool empty, using default style");
                StyleSelection {
                    style: self.config.default_style,
                    reason: SelectionReason::EmptyPool,
                    average_reward: None,
                }
            }
            None => self.exploit(learner_id, available_styles),
        }
    }

    /// Best running average among the pooled styles; cold start when none of
    /// them has been rated yet.
    fn exploit(&self, learner_id: &str, available_styles: &[HintStyle]) -> StyleSelection {
        let observations = self.rewards.get_all(learner_id);

        let mut best: Option<(HintStyle, f64)> = None;
        for style in HintStyle::ALL
            .into_iter()
            .filter(|style| available_styles.contains(style))
        {
            let Some(average) = observations.get(&style).and_then(|obs| obs.average()) else {
                continue;
            };
            // Strict comparison keeps the earlier-declared style on ties.
            if best.map_or(true, |(_, best_avg)| average > best_avg) {
                best = Some((style, average));
            }
        }

        match best {
            Some((style, average)) => {
                tracing::debug!(learner_id, style = %style, average, "exploiting best hint style");
                StyleSelection {
                    style,
                    reason: SelectionReason::Exploitation,
                    average_reward: Some(average),
                }
            }
            None => {
                tracing::debug!(learner_id, style = %self.config.default_style, "cold start");
                StyleSelection {
                    style: self.config.default_style,
                    reason: SelectionReason::ColdStart,
                    average_reward: None,
                }
            }
        }
    }

    /// Credits a shown style with its blended reward and returns that reward.
    pub fn record_feedback(
        &self,
        learner_id: &str,
        style: HintStyle,
        explicit_rating: Option<i32>,
        mastery_delta: f64,
        rating_weight: f64,
    ) -> TutorResult<f64> {
        if !self.config.contains(style) {
            return Err(TutorError::InvalidStyle(style.to_string()));
        }
        if let Some(rating) = explicit_rating {
            if !(MIN_RATING..=MAX_RATING).contains(&rating) {
                return Err(TutorError::InvalidRating(rating));
            }
        }
        let rating_weight = ensure_probability("rating_weight", rating_weight)?;
        if !mastery_delta.is_finite() {
            return Err(TutorError::InvalidProbability {
                name: "mastery_delta",
                value: mastery_delta,
            });
        }

        let blended = blended_reward(explicit_rating, mastery_delta, rating_weight);
        if !(0.0..=1.0).contains(&blended) {
            tracing::warn!(
                learner_id,
                style = %style,
                blended,
                mastery_delta,
                "blended reward outside [0, 1]; recorded unbounded"
            );
        }

        let observation = self.rewards.increment(learner_id, style, blended);
        tracing::info!(
            learner_id,
            style = %style,
            ?explicit_rating,
            mastery_delta,
            blended,
            count = observation.count,
            "hint feedback recorded"
        );
        Ok(blended)
    }

    /// Boundary variant that decodes the style name first.
    pub fn record_feedback_named(
        &self,
        learner_id: &str,
        style: &str,
        explicit_rating: Option<i32>,
        mastery_delta: f64,
        rating_weight: f64,
    ) -> TutorResult<f64> {
        let style = HintStyle::parse(style)?;
        self.record_feedback(learner_id, style, explicit_rating, mastery_delta, rating_weight)
    }

    pub fn average_rewards(&self, learner_id: &str) -> BTreeMap<HintStyle, f64> {
        self.rewards
            .get_all(learner_id)
            .into_iter()
            .filter_map(|(style, obs)| obs.average().map(|avg| (style, avg)))
            .collect()
    }

    fn average_for(&self, learner_id: &str, style: HintStyle) -> Option<f64> {
        self.rewards
            .get_all(learner_id)
            .get(&style)
            .and_then(|obs| obs.average())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::store::{InMemoryPreferenceStore, InMemoryRewardStore};
    use crate::tutor::types::LearnerPreferences;

    fn selector(seed: u64) -> (HintStyleSelector, Arc<InMemoryPreferenceStore>) {
        let prefs = Arc::new(InMemoryPreferenceStore::new());
        let selector = HintStyleSelector::with_rng(
            SelectorConfig::default(),
            Arc::new(InMemoryRewardStore::new()),
            prefs.clone(),
            StdRng::seed_from_u64(seed),
        )
        .unwrap();
        (selector, prefs)
    }

    #[test]
    fn blends_rating_and_gain() {
        assert!((blended_reward(Some(5), 0.1, 0.7) - 0.73).abs() < 1e-12);
        assert!((blended_reward(None, 0.0, 0.7) - 0.35).abs() < 1e-12);
        assert!(blended_reward(Some(1), -0.4, 0.5) < 0.0);
    }

    #[test]
    fn cold_start_uses_default() {
        let (selector, _) = selector(1);
        let selection = selector.select("new", 0.0, &HintStyle::ALL);
        assert_eq!(selection.style, HintStyle::WorkedExample);
        assert_eq!(selection.reason, SelectionReason::ColdStart);
    }

    #[test]
    fn exploits_highest_average() {
        let (selector, _) = selector(2);
        selector
            .record_feedback("u", HintStyle::Analogy, Some(5), 0.1, 0.7)
            .unwrap();
        selector
            .record_feedback("u", HintStyle::SocraticQuestion, Some(1), -0.05, 0.7)
            .unwrap();
        for _ in 0..20 {
            assert_eq!(selector.select_style("u", 0.0, &HintStyle::ALL), HintStyle::Analogy);
        }
    }

    #[test]
    fn ties_follow_declaration_order() {
        let (selector, _) = selector(3);
        selector
            .record_feedback("u", HintStyle::Conceptual, Some(4), 0.0, 1.0)
            .unwrap();
        selector
            .record_feedback("u", HintStyle::SocraticQuestion, Some(4), 0.0, 1.0)
            .unwrap();
        assert_eq!(
            selector.select_style("u", 0.0, &HintStyle::ALL),
            HintStyle::SocraticQuestion
        );
    }

    #[test]
    fn explicit_preference_wins() {
        let (selector, prefs) = selector(4);
        prefs.set(
            "u",
            LearnerPreferences {
                hint_style: StylePreference::Explicit(HintStyle::Conceptual),
                ..Default::default()
            },
        );
        selector
            .record_feedback("u", HintStyle::Analogy, Some(5), 0.5, 0.7)
            .unwrap();
        for _ in 0..20 {
            let selection = selector.select("u", 1.0, &HintStyle::ALL);
            assert_eq!(selection.style, HintStyle::Conceptual);
            assert_eq!(selection.reason, SelectionReason::Override);
        }
    }

    #[test]
    fn full_exploration_stays_in_pool() {
        let (selector, _) = selector(5);
        let pool = [HintStyle::Analogy, HintStyle::Conceptual];
        for _ in 0..50 {
            let selection = selector.select("u", 1.0, &pool);
            assert_eq!(selection.reason, SelectionReason::Exploration);
            assert!(pool.contains(&selection.style));
        }
    }

    #[test]
    fn empty_pool_falls_back() {
        let (selector, _) = selector(6);
        let selection = selector.select("u", 1.0, &[]);
        assert_eq!(selection.style, HintStyle::WorkedExample);
        assert_eq!(selection.reason, SelectionReason::EmptyPool);
    }

    #[test]
    fn exploitation_stays_in_pool() {
        let (selector, _) = selector(8);
        selector
            .record_feedback("u", HintStyle::Analogy, Some(5), 0.3, 0.7)
            .unwrap();
        selector
            .record_feedback("u", HintStyle::Conceptual, Some(2), 0.0, 0.7)
            .unwrap();

        let selection = selector.select("u", 0.0, &[HintStyle::Conceptual, HintStyle::WorkedExample]);
        assert_eq!(selection.style, HintStyle::Conceptual);
        assert_eq!(selection.reason, SelectionReason::Exploitation);

        let unrated = selector.select("u", 0.0, &[HintStyle::SocraticQuestion]);
        assert_eq!(unrated.style, HintStyle::WorkedExample);
        assert_eq!(unrated.reason, SelectionReason::ColdStart);
    }

    #[test]
    fn rejects_style_outside_config_and_bad_rating() {
        let prefs = Arc::new(InMemoryPreferenceStore::new());
        let selector = HintStyleSelector::with_rng(
            SelectorConfig {
                styles: vec![HintStyle::WorkedExample, HintStyle::Analogy],
                ..Default::default()
            },
            Arc::new(InMemoryRewardStore::new()),
            prefs,
            StdRng::seed_from_u64(7),
        )
        .unwrap();

        assert_eq!(
            selector.record_feedback("u", HintStyle::Conceptual, None, 0.0, 0.7),
            Err(TutorError::InvalidStyle("Conceptual".to_string()))
        );
        assert_eq!(
            selector.record_feedback("u", HintStyle::Analogy, Some(6), 0.0, 0.7),
            Err(TutorError::InvalidRating(6))
        );
        assert!(matches!(
            selector.record_feedback_named("u", "Mime", None, 0.0, 0.7),
            Err(TutorError::InvalidStyle(_))
        ));
        assert!(selector.average_rewards("u").is_empty());
    }
}
