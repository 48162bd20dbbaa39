use std::env;
use std::path::PathBuf;

use tracing::warn;

use super::error::UtilError;

const DATA_DIR_NAME: &str = "agent-core";

/// Overrides the default data directory location.
pub const DATA_DIR_ENV_VAR: &str = "AGENT_CORE_DATA_DIR";

type Result<T, E = UtilError> = std::result::Result<T, E>;

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(UtilError::MissingHomeDir)
}

/// Path to the local data directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(p) = env::var(DATA_DIR_ENV_VAR) {
        warn!(?p, "Using override env var for data directory");
        return Ok(PathBuf::from(p));
    }

    Ok(dirs::data_local_dir()
        .ok_or(UtilError::MissingDataLocalDir)?
        .join(DATA_DIR_NAME))
}

/// Default location of the sqlite database backing history and allowed tools.
pub fn database_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("data.sqlite3"))
}

/// Default directory for log files.
pub fn logs_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}
