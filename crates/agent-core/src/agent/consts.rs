pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Tool result recorded when the user denies a tool call.
pub const TOOL_DENIED_MESSAGE: &str = "Tool execution was denied by the user.";

/// Tool result recorded when a tool call was not approved in time.
pub const TOOL_CONFIRMATION_TIMEOUT_MESSAGE: &str = "Tool execution was not approved in time.";

/// Stands in for the result of a tool call that was interrupted before it finished.
pub const TOOL_INTERRUPTED_MESSAGE: &str = "Tool execution was interrupted before it produced a result.";
