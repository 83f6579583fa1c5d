use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use tutor_core::config::Config;
use tutor_core::logging::init_tracing;
use tutor_core::tutor::{
    HintStyle, InteractionOutcome, InterventionPreference, LearnerPreferences, StylePreference,
};
use tutor_core::{TutorConfig, TutorError, TutorResult, TutorSession};

const SKILLS: [&str; 3] = ["fractions", "ratios", "linear_equations"];
const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Persona {
    name: String,
    /// Latent chance of answering correctly before any practice.
    base_knowledge: f64,
    practice_gain: f64,
    favored_style: Option<HintStyle>,
    /// Knowledge gained from a hint in the favored style; other styles give a
    /// third of it.
    hint_boost: f64,
    skip_probability: f64,
    hint_request_probability: f64,
    accept_proactive_probability: f64,
    min_think_time_ms: i64,
    max_think_time_ms: i64,
    #[serde(default)]
    hint_style: StylePreference,
    #[serde(default)]
    intervention: InterventionPreference,
    #[serde(default = "default_questions_per_skill")]
    questions_per_skill: usize,
}

fn default_questions_per_skill() -> usize {
    12
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersonaSummary {
    persona: String,
    learner_id: String,
    answered: usize,
    correct: usize,
    skipped: usize,
    proactive_offers: usize,
    hints_by_style: BTreeMap<HintStyle, usize>,
    interventions_flagged: usize,
    preferences: LearnerPreferences,
    final_mastery: BTreeMap<String, f64>,
    style_rewards: BTreeMap<HintStyle, f64>,
}

fn default_personas() -> Vec<Persona> {
    vec![
        Persona {
            name: "Struggling Novice".to_string(),
            base_knowledge: 0.15,
            practice_gain: 0.02,
            favored_style: Some(HintStyle::WorkedExample),
            hint_boost: 0.15,
            skip_probability: 0.15,
            hint_request_probability: 0.6,
            accept_proactive_probability: 0.9,
            min_think_time_ms: 6_000,
            max_think_time_ms: 16_000,
            hint_style: StylePreference::Adaptive,
            intervention: InterventionPreference::Proactive,
            questions_per_skill: default_questions_per_skill(),
        },
        Persona {
            name: "Analogy Thinker".to_string(),
            base_knowledge: 0.35,
            practice_gain: 0.03,
            favored_style: Some(HintStyle::Analogy),
            hint_boost: 0.2,
            skip_probability: 0.05,
            hint_request_probability: 0.4,
            accept_proactive_probability: 0.7,
            min_think_time_ms: 4_000,
            max_think_time_ms: 11_000,
            hint_style: StylePreference::Adaptive,
            intervention: InterventionPreference::Proactive,
            questions_per_skill: default_questions_per_skill(),
        },
        Persona {
            name: "Confident Expert".to_string(),
            base_knowledge: 0.8,
            practice_gain: 0.01,
            favored_style: Some(HintStyle::Conceptual),
            hint_boost: 0.05,
            skip_probability: 0.02,
            hint_request_probability: 0.1,
            accept_proactive_probability: 0.3,
            min_think_time_ms: 2_000,
            max_think_time_ms: 7_000,
            hint_style: StylePreference::Explicit(HintStyle::Conceptual),
            intervention: InterventionPreference::Manual,
            questions_per_skill: default_questions_per_skill(),
        },
        Persona {
            name: "Hint Refuser".to_string(),
            base_knowledge: 0.3,
            practice_gain: 0.03,
            favored_style: None,
            hint_boost: 0.0,
            skip_probability: 0.2,
            hint_request_probability: 0.0,
            accept_proactive_probability: 0.0,
            min_think_time_ms: 3_000,
            max_think_time_ms: 12_000,
            hint_style: StylePreference::Disabled,
            intervention: InterventionPreference::Proactive,
            questions_per_skill: default_questions_per_skill(),
        },
    ]
}

fn load_personas() -> Vec<Persona> {
    let Ok(path) = std::env::var("SIMULATION_PERSONAS") else {
        return default_personas();
    };

    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<Vec<Persona>>(&raw).map_err(|e| e.to_string()));

    match parsed {
        Ok(personas) if !personas.is_empty() => personas,
        Ok(_) => {
            tracing::warn!(%path, "persona file is empty, using built-in personas");
            default_personas()
        }
        Err(error) => {
            tracing::warn!(%path, %error, "failed to load personas, using built-in personas");
            default_personas()
        }
    }
}

fn learner_id_for(persona: &Persona) -> String {
    format!("sim_{}", persona.name.to_lowercase().replace(' ', "_"))
}

async fn run_persona(
    session: Arc<TutorSession>,
    persona: Persona,
    seed: u64,
) -> TutorResult<PersonaSummary> {
    let mut rng = StdRng::seed_from_u64(seed);
    let learner_id = learner_id_for(&persona);

    session.set_preferences(
        &learner_id,
        LearnerPreferences {
            hint_style: persona.hint_style,
            intervention: persona.intervention,
        },
    );

    let mut summary = PersonaSummary {
        persona: persona.name.clone(),
        learner_id: learner_id.clone(),
        preferences: session.preferences(&learner_id),
        ..Default::default()
    };

    for skill in SKILLS {
        let mut knowledge = persona.base_knowledge.clamp(0.0, 1.0);

        for _ in 0..persona.questions_per_skill {
            let think_ms =
                rng.random_range(persona.min_think_time_ms..=persona.max_think_time_ms.max(persona.min_think_time_ms));

            let offered = session.check_intervention(&learner_id, skill, Some(think_ms));
            if offered {
                summary.proactive_offers += 1;
            }
            let wants_hint = (offered && rng.random::<f64>() < persona.accept_proactive_probability)
                || rng.random::<f64>() < persona.hint_request_probability;

            let hint = if wants_hint {
                session.request_hint(&learner_id, skill)
            } else {
                None
            };
            if let Some(decision) = hint {
                *summary.hints_by_style.entry(decision.style).or_default() += 1;
                let boost = if persona.favored_style == Some(decision.style) {
                    persona.hint_boost
                } else {
                    persona.hint_boost / 3.0
                };
                knowledge = (knowledge + boost).min(1.0);
            }

            let outcome = if rng.random::<f64>() < persona.skip_probability {
                summary.skipped += 1;
                InteractionOutcome::skipped(Some(think_ms))
            } else {
                let is_correct = rng.random::<f64>() < knowledge;
                summary.answered += 1;
                if is_correct {
                    summary.correct += 1;
                }
                knowledge = (knowledge + persona.practice_gain).min(1.0);
                InteractionOutcome::answered(is_correct, Some(think_ms))
            };

            let rating = hint.map(|_| match outcome.is_correct() {
                None => 3,
                Some(true) => 5,
                Some(false) => 1,
            });

            let report = session.submit_outcome(&learner_id, skill, outcome, rating)?;
            if report.intervention_needed() {
                summary.interventions_flagged += 1;
            }

            tokio::task::yield_now().await;
        }
    }

    summary.final_mastery = session.mastery_overview(&learner_id, &SKILLS);
    summary.style_rewards = session.learner_snapshot(&learner_id).style_rewards;
    Ok(summary)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config);

    let tutor_config = TutorConfig::from_env();
    let session = match TutorSession::in_memory(tutor_config) {
        Ok(session) => Arc::new(session),
        Err(err) => {
            tracing::error!(error = %err, "invalid tutor configuration");
            std::process::exit(1);
        }
    };

    let selector_config = &session.config().selector;
    tracing::info!(
        exploration_rate = selector_config.exploration_rate,
        rating_weight = selector_config.rating_weight,
        default_style = %selector_config.default_style,
        "tutor session ready"
    );

    let seed = std::env::var("SIMULATION_SEED")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_SEED);

    let personas = load_personas();
    tracing::info!(personas = personas.len(), seed, "starting simulation");

    let handles: Vec<_> = personas
        .into_iter()
        .enumerate()
        .map(|(idx, persona)| {
            let session = Arc::clone(&session);
            tokio::spawn(run_persona(session, persona, seed.wrapping_add(idx as u64)))
        })
        .collect();

    let mut failed = false;
    for handle in handles {
        match handle.await {
            Ok(Ok(summary)) => match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(err) => tracing::error!(error = %err, "failed to encode summary"),
            },
            Ok(Err(err)) => {
                failed = true;
                report_error(&err);
            }
            Err(err) => {
                failed = true;
                tracing::error!(error = %err, "simulation task panicked");
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}

fn report_error(err: &TutorError) {
    match err {
        TutorError::Conflict { .. } => {
            tracing::error!(error = %err, "mastery update kept conflicting")
        }
        _ => tracing::error!(error = %err, "simulation failed"),
    }
}
