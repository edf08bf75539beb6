use crate::types::{Feedback, NextQuestion, OpeningLine};

/// Identifies the session an event was issued under.
///
/// Each started session gets a fresh token; events carrying any other token
/// are dropped, which is how late completions after teardown are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    /// Only the turn machine issues tokens for real sessions; adapters build
    /// their own when exercising handles in isolation.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Everything that can drive the turn machine forward.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    InterviewStarted(OpeningLine),
    StartFailed(String),
    /// Capture is armed.
    Listening,
    SpeechStarted,
    SpeechEnded(String),
    SpeechFailed(String),
    SynthesisDone,
    RemoteResponded(NextQuestion),
    RemoteFailed(String),
    RetryElapsed,
    FeedbackReady(Feedback),
    FeedbackFailed(String),
    /// Outcome of the persistence call: the record id or the error message.
    Persisted(Result<String, String>),
    TeardownRequested,
}

/// An [`Event`] tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub token: SessionToken,
    pub event: Event,
}

impl Envelope {
    pub fn new(token: SessionToken, event: Event) -> Self {
        Self { token, event }
    }
}
