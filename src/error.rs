use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TutorError {
    #[error("invalid probability for {name}: {value} (expected a finite value in [0, 1])")]
    InvalidProbability { name: &'static str, value: f64 },
    #[error("invalid hint style: {0}")]
    InvalidStyle(String),
    #[error("invalid rating: {0} (expected 1..=5)")]
    InvalidRating(i32),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(
        "concurrent update on mastery record {learner_id}/{skill_id}: expected version {expected}, found {found}"
    )]
    Conflict {
        learner_id: String,
        skill_id: String,
        expected: u64,
        found: u64,
    },
}

pub type TutorResult<T> = Result<T, TutorError>;

pub(crate) fn ensure_probability(name: &'static str, value: f64) -> TutorResult<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(TutorError::InvalidProbability { name, value })
    }
}
