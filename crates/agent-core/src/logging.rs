//! Subscriber setup for embedders. Library code only emits `tracing` events.

use std::path::PathBuf;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{
    NonBlocking,
    WorkerGuard,
};
use tracing_appender::rolling::{
    RollingFileAppender,
    Rotation,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{
    EnvFilter,
    Layer,
    Registry,
};

use crate::agent::util::directories::logs_dir;
use crate::agent::util::error::UtilError;

pub const LOG_FILE_NAME: &str = "agent-core.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogRotation {
    #[default]
    Never,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Defaults to the data directory's `logs` folder.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub rotation: LogRotation,
    /// Also write human readable logs to stderr.
    #[serde(default)]
    pub stderr: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: None,
            level: default_level(),
            rotation: LogRotation::default(),
            stderr: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Directory(#[from] UtilError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid log level '{}'", .0)]
    InvalidLevel(String),
    #[error("a global subscriber is already installed: {}", .0)]
    AlreadyInitialized(String),
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over [LogConfig::level].
///
/// The returned guard flushes the file writer when dropped and must be kept alive.
pub fn init_logging(config: &LogConfig) -> Result<WorkerGuard, LoggingError> {
    let directory = match &config.directory {
        Some(dir) => dir.clone(),
        None => logs_dir()?,
    };
    std::fs::create_dir_all(&directory)?;

    let level: LevelFilter = config
        .level
        .parse()
        .map_err(|_err| LoggingError::InvalidLevel(config.level.clone()))?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let rotation = match config.rotation {
        LogRotation::Never => Rotation::NEVER,
        LogRotation::Daily => Rotation::DAILY,
    };
    let (non_blocking, file_guard) = NonBlocking::new(RollingFileAppender::new(rotation, directory, LOG_FILE_NAME));
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);
    let stderr_layer = config
        .stderr
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed());

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|err| LoggingError::AlreadyInitialized(err.to_string()))?;

    Ok(file_guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"rotation": "daily"}"#).unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.directory.is_none());
    }

    #[test]
    fn test_invalid_level() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            directory: Some(dir.path().to_path_buf()),
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(init_logging(&config), Err(LoggingError::InvalidLevel(_))));
    }
}
