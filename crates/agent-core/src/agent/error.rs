use serde::{
    Deserialize,
    Serialize,
};

/// Coarse classification shared by every component error.
///
/// Callers branch on the kind rather than on component specific variants: a [ErrorKind::Timeout]
/// may be retried, a [ErrorKind::Forbidden] should be reported to the user, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ErrorKind {
    /// Bad input that the caller can correct.
    User,
    /// Unknown tool, prompt, resource, or server.
    NotFound,
    /// A confirmation or MCP operation did not complete in time.
    Timeout,
    /// The operation exists but was denied by the user or policy.
    Forbidden,
    /// The caller aborted the operation.
    Cancelled,
    /// Storage, transport, or serialization failure.
    System,
}

impl ErrorKind {
    /// Whether retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::System)
    }
}

/// Implemented by every component boundary error.
pub trait ClassifiedError: std::error::Error {
    fn kind(&self) -> ErrorKind;
}
