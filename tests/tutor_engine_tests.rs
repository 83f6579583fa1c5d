use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::SeedableRng;

use tutor_core::tutor::config::{BktParams, InterventionThresholds, SelectorConfig};
use tutor_core::tutor::decision::{HintStyleSelector, SelectionReason};
use tutor_core::tutor::knowledge::KnowledgeTracker;
use tutor_core::tutor::policy::{InterventionPolicy, InterventionTrigger};
use tutor_core::tutor::store::{
    InMemoryMasteryStore, InMemoryPreferenceStore, InMemoryRewardStore, MasteryStore,
    PreferenceStore,
};
use tutor_core::tutor::{
    HintStyle, InteractionOutcome, InterventionPreference, LearnerPreferences, MasteryRecord,
    StylePreference,
};
use tutor_core::{TutorConfig, TutorError, TutorResult, TutorSession};

fn sample_bkt() -> BktParams {
    BktParams {
        p_l0: 0.2,
        p_t: 0.15,
        p_g: 0.2,
        p_s: 0.1,
    }
}

fn sample_thresholds() -> InterventionThresholds {
    InterventionThresholds {
        mastery_threshold: 0.15,
        max_consecutive_errors: 3,
        max_consecutive_skips: 2,
        base_time_limit_ms: 10_000,
    }
}

fn sample_config() -> TutorConfig {
    TutorConfig {
        bkt: sample_bkt(),
        intervention: sample_thresholds(),
        selector: SelectorConfig {
            exploration_rate: 0.0,
            ..Default::default()
        },
        max_update_retries: 3,
    }
}

fn sample_session(seed: u64) -> TutorSession {
    TutorSession::with_rng(
        sample_config(),
        Arc::new(InMemoryMasteryStore::new(0.2)),
        Arc::new(InMemoryRewardStore::new()),
        Arc::new(InMemoryPreferenceStore::new()),
        StdRng::seed_from_u64(seed),
    )
    .unwrap()
}

fn sample_selector(seed: u64) -> (HintStyleSelector, Arc<InMemoryPreferenceStore>) {
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
fn integration_learning_gain_after_correct_answer() {
    let tracker = KnowledgeTracker::new(sample_bkt()).unwrap();
    let next = tracker.update_mastery(0.2, true).unwrap();
    assert!((next - 0.6).abs() < 1e-9, "got {next}");
}

#[test]
fn integration_learning_loss_after_incorrect_answer() {
    let tracker = KnowledgeTracker::new(sample_bkt()).unwrap();
    let next = tracker.update_mastery(0.2, false).unwrap();
    assert!((next - 0.1758).abs() < 1e-4, "got {next}");
}

#[test]
fn integration_intervention_by_mastery() {
    let policy = InterventionPolicy::new(sample_thresholds()).unwrap();
    assert!(policy.check_intervention(0.10, 0, 0, None));
}

#[test]
fn integration_intervention_by_time() {
    let policy = InterventionPolicy::new(sample_thresholds()).unwrap();
    assert!(policy.check_intervention(0.6, 0, 0, Some(11_000)));
    assert!(!policy.check_intervention(0.6, 0, 0, Some(10_000)));
}

#[test]
fn integration_bandit_exploits_best_average() {
    let (selector, _) = sample_selector(21);

    // Rating weight 1.0 isolates the rating, 0.0 isolates the mastery gain.
    selector
        .record_feedback("learner", HintStyle::Analogy, Some(5), 0.0, 1.0)
        .unwrap();
    selector
        .record_feedback("learner", HintStyle::Analogy, Some(5), 0.0, 0.8)
        .unwrap();
    selector
        .record_feedback("learner", HintStyle::SocraticQuestion, Some(1), 0.3, 0.0)
        .unwrap();

    let averages = selector.average_rewards("learner");
    assert!((averages[&HintStyle::Analogy] - 0.9).abs() < 1e-9);
    assert!((averages[&HintStyle::SocraticQuestion] - 0.3).abs() < 1e-9);

    for _ in 0..25 {
        assert_eq!(
            selector.select_style("learner", 0.0, &HintStyle::ALL),
            HintStyle::Analogy
        );
    }
}

#[test]
fn integration_reward_blending() {
    let (selector, _) = sample_selector(22);
    let blended = selector
        .record_feedback("learner", HintStyle::WorkedExample, Some(5), 0.1, 0.7)
        .unwrap();
    assert!((blended - 0.73).abs() < 1e-12);

    let implicit = selector
        .record_feedback("learner", HintStyle::WorkedExample, None, -0.2, 0.7)
        .unwrap();
    assert!((implicit - (0.7 * 0.5 + 0.3 * -0.2)).abs() < 1e-12);
}

#[test]
fn integration_regression_penalizes_style_below_rating_floor() {
    let (selector, _) = sample_selector(23);
    let reward = selector
        .record_feedback("learner", HintStyle::Conceptual, Some(1), -0.5, 0.5)
        .unwrap();
    assert!(reward < 0.0);
}

#[test]
fn integration_explicit_preference_beats_history_and_exploration() {
    let (selector, prefs) = sample_selector(24);
    prefs.set(
        "learner",
        LearnerPreferences {
            hint_style: StylePreference::parse("Socratic Question").unwrap(),
            intervention: InterventionPreference::Proactive,
        },
    );
    selector
        .record_feedback("learner", HintStyle::Analogy, Some(5), 0.4, 0.7)
        .unwrap();

    for rate in [0.0, 0.5, 1.0] {
        let selection = selector.select("learner", rate, &HintStyle::ALL);
        assert_eq!(selection.style, HintStyle::SocraticQuestion);
        assert_eq!(selection.reason, SelectionReason::Override);
    }
}

#[test]
fn integration_seeded_exploration_is_reproducible() {
    let pick = |seed| {
        let (selector, _) = sample_selector(seed);
        (0..30)
            .map(|_| selector.select_style("learner", 0.5, &HintStyle::ALL))
            .collect::<Vec<_>>()
    };
    assert_eq!(pick(99), pick(99));
}

#[test]
fn integration_unknown_style_in_feedback_is_rejected() {
    let (selector, _) = sample_selector(25);
    let err = selector
        .record_feedback_named("learner", "Interpretive Dance", Some(4), 0.0, 0.7)
        .unwrap_err();
    assert_eq!(err, TutorError::InvalidStyle("Interpretive Dance".to_string()));
    assert!(selector.average_rewards("learner").is_empty());
}

#[test]
fn integration_full_turn_feeds_gain_into_bandit() {
    let session = sample_session(30);

    let decision = session.request_hint("learner", "fractions").unwrap();
    assert_eq!(decision.style, HintStyle::WorkedExample);
    assert_eq!(decision.reason, SelectionReason::ColdStart);

    let report = session
        .submit_outcome(
            "learner",
            "fractions",
            InteractionOutcome::answered(true, Some(4_000)),
            Some(5),
        )
        .unwrap();

    assert!((report.record.mastery - 0.6).abs() < 1e-9);
    assert_eq!(report.previous_mastery, 0.2);
    let reward = report.hint_reward.unwrap();
    assert!((reward.mastery_delta - 0.4).abs() < 1e-9);
    assert!((reward.reward - (0.7 + 0.3 * 0.4)).abs() < 1e-9);
    assert!(!report.intervention_needed());

    let snapshot = session.learner_snapshot("learner");
    assert_eq!(snapshot.skills.len(), 1);
    assert!(snapshot.style_rewards.contains_key(&HintStyle::WorkedExample));
}

#[test]
fn integration_error_streak_flags_next_turn() {
    let session = sample_session(31);
    let miss = || {
        session
            .submit_outcome(
                "learner",
                "ratios",
                InteractionOutcome::answered(false, None),
                None,
            )
            .unwrap()
    };

    assert!(miss().intervention.is_none());
    assert!(miss().intervention.is_none());

    // Repeated misses settle mastery near 0.17, above the floor, so the
    // streak is what fires.
    let report = miss();
    assert_eq!(report.record.consecutive_errors, 3);
    assert!(report.record.mastery > 0.15);
    assert_eq!(
        report.intervention,
        Some(InterventionTrigger::ErrorStreak { errors: 3, limit: 3 })
    );
}

#[test]
fn integration_skip_streak_keeps_mastery_bits() {
    let session = sample_session(32);
    session
        .submit_outcome("learner", "ratios", InteractionOutcome::answered(true, None), None)
        .unwrap();
    let before = session.mastery_overview("learner", &["ratios"])["ratios"];

    let first = session
        .submit_outcome("learner", "ratios", InteractionOutcome::skipped(None), None)
        .unwrap();
    let second = session
        .submit_outcome("learner", "ratios", InteractionOutcome::skipped(None), None)
        .unwrap();

    assert_eq!(first.record.mastery.to_bits(), before.to_bits());
    assert_eq!(second.record.mastery.to_bits(), before.to_bits());
    assert_eq!(second.record.consecutive_skips, 2);
    assert!(matches!(
        second.intervention,
        Some(InterventionTrigger::SkipStreak { skips: 2, limit: 2 })
    ));
}

#[test]
fn integration_manual_learner_is_never_flagged() {
    let session = sample_session(33);
    session.set_preferences(
        "learner",
        LearnerPreferences {
            hint_style: StylePreference::Adaptive,
            intervention: InterventionPreference::Manual,
        },
    );
    assert!(!session.check_intervention("learner", "fractions", Some(120_000)));

    let report = session
        .submit_outcome(
            "learner",
            "fractions",
            InteractionOutcome::answered(false, Some(120_000)),
            None,
        )
        .unwrap();
    assert!(report.intervention.is_none());
}

#[test]
fn integration_disabled_learner_never_reaches_selector() {
    let session = sample_session(34);
    session.set_preferences(
        "learner",
        LearnerPreferences {
            hint_style: StylePreference::Disabled,
            intervention: InterventionPreference::Proactive,
        },
    );

    assert!(session.request_hint("learner", "fractions").is_none());
    let report = session
        .submit_outcome("learner", "fractions", InteractionOutcome::answered(true, None), Some(5))
        .unwrap();
    assert!(report.hint_reward.is_none());
    assert!(session.selector().average_rewards("learner").is_empty());
}

#[test]
fn integration_overview_defaults_to_prior_and_reset_clears_state() {
    let session = sample_session(35);
    session.request_hint("learner", "fractions");
    session
        .submit_outcome("learner", "fractions", InteractionOutcome::answered(true, None), None)
        .unwrap();

    let overview = session.mastery_overview("learner", &["fractions", "geometry"]);
    assert!((overview["fractions"] - 0.6).abs() < 1e-9);
    assert_eq!(overview["geometry"], 0.2);
    assert!((session.predict_correct("learner", "fractions").unwrap() - 0.62).abs() < 1e-9);

    session.reset_learner("learner");
    let snapshot = session.learner_snapshot("learner");
    assert!(snapshot.skills.is_empty());
    assert!(snapshot.style_rewards.is_empty());
}

/// Store that loses the first `failures` compare-and-swap attempts to a
/// simulated concurrent writer.
struct ContendedStore {
    inner: InMemoryMasteryStore,
    failures: parking_lot::Mutex<u32>,
}

impl MasteryStore for ContendedStore {
    fn prior(&self) -> f64 {
        self.inner.prior()
    }

    fn get(&self, learner_id: &str, skill_id: &str) -> MasteryRecord {
        self.inner.get(learner_id, skill_id)
    }

    fn put(&self, record: &MasteryRecord) -> TutorResult<MasteryRecord> {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(TutorError::Conflict {
                learner_id: record.learner_id.clone(),
                skill_id: record.skill_id.clone(),
                expected: record.version,
                found: record.version + 1,
            });
        }
        self.inner.put(record)
    }

    fn records(&self, learner_id: &str) -> Vec<MasteryRecord> {
        self.inner.records(learner_id)
    }

    fn reset_learner(&self, learner_id: &str) {
        self.inner.reset_learner(learner_id)
    }
}

fn contended_session(failures: u32) -> TutorSession {
    TutorSession::with_rng(
        sample_config(),
        Arc::new(ContendedStore {
            inner: InMemoryMasteryStore::new(0.2),
            failures: parking_lot::Mutex::new(failures),
        }),
        Arc::new(InMemoryRewardStore::new()),
        Arc::new(InMemoryPreferenceStore::new()),
        StdRng::seed_from_u64(40),
    )
    .unwrap()
}

#[test]
fn integration_conflict_is_retried() {
    let session = contended_session(2);
    let report = session
        .submit_outcome("learner", "fractions", InteractionOutcome::answered(true, None), None)
        .unwrap();
    assert!((report.record.mastery - 0.6).abs() < 1e-9);
    assert_eq!(report.record.version, 1);
}

#[test]
fn integration_conflict_surfaces_after_retries_exhausted() {
    let session = contended_session(10);
    let err = session
        .submit_outcome("learner", "fractions", InteractionOutcome::answered(true, None), None)
        .unwrap_err();
    assert!(matches!(err, TutorError::Conflict { .. }));
}

#[test]
fn integration_concurrent_writers_do_not_lose_updates() {
    let mut config = sample_config();
    config.max_update_retries = 10_000;
    let session = Arc::new(
        TutorSession::with_rng(
            config,
            Arc::new(InMemoryMasteryStore::new(0.2)),
            Arc::new(InMemoryRewardStore::new()),
            Arc::new(InMemoryPreferenceStore::new()),
            StdRng::seed_from_u64(41),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for _ in 0..25 {
                    session
                        .submit_outcome(
                            "learner",
                            "fractions",
                            InteractionOutcome::skipped(None),
                            None,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let record = session.learner_snapshot("learner").skills.remove(0);
    assert_eq!(record.consecutive_skips, 200);
    assert_eq!(record.version, 200);
    assert_eq!(record.mastery, 0.2);
}
