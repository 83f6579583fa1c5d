//! Bayesian Knowledge Tracing
//!
//! Two-state (known / unknown) hidden Markov update of per-skill mastery:
//! condition the prior on the observed answer using guess and slip
//! probabilities, then apply the learning transition `p_t`.
//!
//! The tracker holds only immutable parameters, so one instance can be shared
//! across threads and called for any (learner, skill) pair. Persisting the
//! result is the caller's job.

use crate::error::{ensure_probability, TutorResult};
use crate::tutor::config::BktParams;

#[derive(Debug, Clone)]
pub struct KnowledgeTracker {
    params: BktParams,
}

impl KnowledgeTracker {
    pub fn new(params: BktParams) -> TutorResult<Self> {
        params.validate()?;
        tracing::info!(
            p_l0 = params.p_l0,
            p_t = params.p_t,
            p_g = params.p_g,
            p_s = params.p_s,
            "knowledge tracker initialized"
        );
        Ok(Self { params })
    }

    pub fn initial_mastery(&self) -> f64 {
        self.params.p_l0
    }

    /// P(known | evidence), without the learning transition.
    ///
    /// When the evidence has zero probability under the current parameters
    /// the prior is returned unchanged.
    pub fn posterior(&self, prior: f64, is_correct: bool) -> TutorResult<f64> {
        let prior = ensure_probability("prior", prior)?;
        Ok(self.posterior_unchecked(prior, is_correct))
    }

    /// Posterior on the evidence followed by the learning transition, clamped
    /// to [0, 1].
    pub fn update_mastery(&self, prior: f64, is_correct: bool) -> TutorResult<f64> {
        let prior = ensure_probability("prior", prior)?;
        let posterior = self.posterior_unchecked(prior, is_correct);
        let updated = (posterior + (1.0 - posterior) * self.params.p_t).clamp(0.0, 1.0);

        tracing::debug!(prior, posterior, updated, is_correct, "bkt update");
        Ok(updated)
    }

    /// Probability that the next answer on this skill is correct.
    pub fn predict_correct_probability(&self, mastery: f64) -> TutorResult<f64> {
        let mastery = ensure_probability("mastery", mastery)?;
        let p = mastery * (1.0 - self.params.p_s) + (1.0 - mastery) * self.params.p_g;
        Ok(p.clamp(0.0, 1.0))
    }

    fn posterior_unchecked(&self, prior: f64, is_correct: bool) -> f64 {
        let BktParams { p_g, p_s, .. } = self.params;
        let (given_known, given_unknown) = if is_correct {
            (1.0 - p_s, p_g)
        } else {
            (p_s, 1.0 - p_g)
        };

        let evidence = given_known * prior + given_unknown * (1.0 - prior);
        if evidence == 0.0 {
            return prior;
        }

        (given_known * prior / evidence).clamp(0.0, 1.0)
    }
}

impl Default for KnowledgeTracker {
    fn default() -> Self {
        Self {
            params: BktParams::default(),
        }
    }
}
