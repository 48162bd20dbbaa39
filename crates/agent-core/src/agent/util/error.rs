use std::env::VarError;

use thiserror::Error;

/// Failures of the filesystem and environment helpers.
#[derive(Debug, Error)]
pub enum UtilError {
    #[error("Missing a home directory")]
    MissingHomeDir,
    #[error("Missing a local data directory")]
    MissingDataLocalDir,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    PathExpand(#[from] shellexpand::LookupError<VarError>),
    #[error("'{}' is not an absolute path", .0)]
    NotAbsolute(String),
    #[error("invalid tool name pattern: {}", .0)]
    Pattern(#[from] globset::Error),
}

/// Attaches a description of the failed operation to an io error.
pub trait ErrorContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T, UtilError>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, UtilError> {
        self.map_err(|source| UtilError::Io {
            context: context.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_io_context_is_displayed() {
        let err = Err::<(), std::io::Error>(std::io::Error::new(std::io::ErrorKind::InvalidData, "oops"))
            .context(format!("failed to read {:?}", PathBuf::from("roots.json")))
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to read \"roots.json\": oops");
    }
}
