use std::path::PathBuf;

/// Process-level settings. Engine tuning lives in [`crate::tutor::TutorConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub file_log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_logs = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let file_log_dir = file_logs.then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });

        Self {
            log_level,
            file_log_dir,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_log_dir: None,
        }
    }
}
