use thiserror::Error;

/// Errors that keep a session from starting.
///
/// Everything that can go wrong once the interview is running is handled
/// inside the orchestrator and surfaced through the session's error message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterviewError {
    #[error("Speech capture is not supported in this environment")]
    Unsupported,

    #[error("Microphone access is required for the interview")]
    PermissionDenied,

    #[error("Invalid candidate details: {0}")]
    InvalidCandidate(String),

    #[error("An interview is already in progress for this orchestrator")]
    AlreadyStarted,
}
