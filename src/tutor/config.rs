use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_probability, TutorError, TutorResult};
use crate::tutor::types::HintStyle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BktParams {
    /// Prior mastery for a skill never seen before.
    pub p_l0: f64,
    /// Learning transition applied after every answer.
    pub p_t: f64,
    pub p_g: f64,
    pub p_s: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            p_l0: 0.2,
            p_t: 0.15,
            p_g: 0.2,
            p_s: 0.1,
        }
    }
}

impl BktParams {
    pub fn validate(&self) -> TutorResult<()> {
        ensure_probability("p_l0", self.p_l0)?;
        ensure_probability("p_t", self.p_t)?;
        ensure_probability("p_g", self.p_g)?;
        ensure_probability("p_s", self.p_s)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterventionThresholds {
    pub mastery_threshold: f64,
    pub max_consecutive_errors: u32,
    pub max_consecutive_skips: u32,
    pub base_time_limit_ms: i64,
}

impl Default for InterventionThresholds {
    fn default() -> Self {
        Self {
            mastery_threshold: 0.15,
            max_consecutive_errors: 3,
            max_consecutive_skips: 2,
            base_time_limit_ms: 10_000,
        }
    }
}

impl InterventionThresholds {
    pub fn validate(&self) -> TutorResult<()> {
        ensure_probability("mastery_threshold", self.mastery_threshold)?;
        if self.base_time_limit_ms < 0 {
            return Err(TutorError::InvalidConfig(format!(
                "base_time_limit_ms must be non-negative, got {}",
                self.base_time_limit_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub styles: Vec<HintStyle>,
    pub default_style: HintStyle,
    pub exploration_rate: f64,
    /// Share of the blended reward taken by the explicit rating; the rest
    /// comes from the mastery delta.
    pub rating_weight: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            styles: HintStyle::ALL.to_vec(),
            default_style: HintStyle::WorkedExample,
            exploration_rate: 0.1,
            rating_weight: 0.7,
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> TutorResult<()> {
        if self.styles.is_empty() {
            return Err(TutorError::InvalidConfig("style set is empty".to_string()));
        }
        if !self.styles.contains(&self.default_style) {
            return Err(TutorError::InvalidConfig(format!(
                "default style {} is not in the configured style set",
                self.default_style
            )));
        }
        ensure_probability("exploration_rate", self.exploration_rate)?;
        ensure_probability("rating_weight", self.rating_weight)?;
        Ok(())
    }

    pub fn contains(&self, style: HintStyle) -> bool {
        self.styles.contains(&style)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorConfig {
    pub bkt: BktParams,
    pub intervention: InterventionThresholds,
    pub selector: SelectorConfig,
    pub max_update_retries: u32,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            bkt: BktParams::default(),
            intervention: InterventionThresholds::default(),
            selector: SelectorConfig::default(),
            max_update_retries: 3,
        }
    }
}

impl TutorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_from_env("BKT_P_L0", &mut config.bkt.p_l0);
        override_from_env("BKT_P_T", &mut config.bkt.p_t);
        override_from_env("BKT_P_G", &mut config.bkt.p_g);
        override_from_env("BKT_P_S", &mut config.bkt.p_s);

        override_from_env(
            "INTERVENTION_MASTERY_THRESHOLD",
            &mut config.intervention.mastery_threshold,
        );
        override_from_env(
            "INTERVENTION_MAX_CONSECUTIVE_ERRORS",
            &mut config.intervention.max_consecutive_errors,
        );
        override_from_env(
            "INTERVENTION_MAX_CONSECUTIVE_SKIPS",
            &mut config.intervention.max_consecutive_skips,
        );
        override_from_env(
            "INTERVENTION_TIME_LIMIT_MS",
            &mut config.intervention.base_time_limit_ms,
        );

        override_from_env("EXPLORATION_RATE", &mut config.selector.exploration_rate);
        override_from_env("RATING_WEIGHT", &mut config.selector.rating_weight);
        if let Ok(val) = std::env::var("DEFAULT_HINT_STYLE") {
            match HintStyle::parse(&val) {
                Ok(style) => config.selector.default_style = style,
                Err(err) => tracing::warn!(error = %err, "ignoring DEFAULT_HINT_STYLE"),
            }
        }

        override_from_env("MASTERY_UPDATE_RETRIES", &mut config.max_update_retries);

        config
    }

    pub fn validate(&self) -> TutorResult<()> {
        self.bkt.validate()?;
        self.intervention.validate()?;
        self.selector.validate()?;
        Ok(())
    }
}

fn override_from_env<T: FromStr>(key: &str, target: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "unparseable config value, keeping default"),
    }
}
