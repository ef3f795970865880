//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network failure or non-2xx provider response.
    Transport,
    Authentication,
    RateLimit,
    Timeout,
    Server,
    /// Malformed provider chunk or settings file.
    Parse,
    /// A single action block failed.
    Action,
    /// User-initiated abort.
    Cancelled,
    Configuration,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryLater,
    CheckCredentials,
    CheckConfiguration,
    IncreaseTimeout,
    InspectAction,
    ReportIssue,
    None,
}
