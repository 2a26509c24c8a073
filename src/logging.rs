//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};

const LOG_FILE_PREFIX: &str = "varian-turbo.log";

/// Install the global subscriber.
///
/// Logs go to stderr so stdout stays free for status output. With a log
/// directory configured a daily file is written as well; keep the returned
/// guard alive until exit so it gets flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Logging(format!("invalid log level {:?}: {e}", config.level)))?;

    let console = fmt::layer().with_writer(std::io::stderr);

    match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(|e| AppError::Logging(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .map_err(|e| AppError::Logging(e.to_string()))?;
            Ok(None)
        }
    }
}
