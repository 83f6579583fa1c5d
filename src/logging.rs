use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "tutor.log";

pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. The guard flushes the file writer on drop,
/// so the caller keeps it alive until shutdown.
pub fn init_tracing(config: &Config) -> Option<FileLogGuard> {
    let stdout_layer = fmt::layer().with_target(true);

    let Some(log_dir) = config.file_log_dir.as_ref() else {
        tracing_subscriber::registry()
            .with(env_filter(&config.log_level))
            .with(stdout_layer)
            .init();
        return None;
    };

    if let Err(err) = std::fs::create_dir_all(log_dir) {
        eprintln!("failed to create log directory {}: {err}", log_dir.display());
        tracing_subscriber::registry()
            .with(env_filter(&config.log_level))
            .with(stdout_layer)
            .init();
        return None;
    }

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Some(FileLogGuard { _guard: guard })
}
